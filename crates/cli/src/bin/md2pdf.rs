use chrono::{DateTime, Local};
use clap::Parser;
use ebook_core::parser::UNTITLED;
use ebook_core::{
    html_document, parse_book_markdown, render_markdown_pdf, ExportError, OutputLanguage,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

const NAME_WIDTH: usize = 40;

fn main() {
    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser)]
#[command(name = "md2pdf", version, about = "Convert a Markdown file to PDF")]
struct Cli {
    /// Markdown file to convert; without it a file is picked from DIR
    #[arg(short, long, value_name = "INPUT")]
    input: Option<PathBuf>,

    /// PDF to write; defaults to the input with a `.pdf` extension
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Directory searched for Markdown files
    #[arg(short, long, value_name = "DIR", default_value = "output")]
    directory: PathBuf,

    /// Also write a styled HTML preview next to the PDF
    #[arg(long)]
    html: bool,
}

#[derive(Debug, Error)]
enum Md2PdfError {
    #[error("directory `{0}` not found")]
    MissingDirectory(PathBuf),
    #[error("no Markdown files in `{0}`")]
    NoFiles(PathBuf),
    #[error("failed to read `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to read from stdin: {0}")]
    Stdin(#[source] io::Error),
    #[error(transparent)]
    Export(#[from] ExportError),
}

struct MarkdownFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn run(cli: Cli) -> Result<(), Md2PdfError> {
    let input = match cli.input {
        Some(input) => input,
        None => {
            let files = list_markdown_files(&cli.directory)?;
            print_listing(&files);
            match choose(&files, &mut io::stdin().lock())? {
                Some(path) => path,
                None => {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
        }
    };
    let output = cli.output.unwrap_or_else(|| input.with_extension("pdf"));
    convert(&input, &output, cli.html)?;
    println!("PDF written to {}", output.display());
    Ok(())
}

fn convert(input: &Path, output: &Path, html: bool) -> Result<(), Md2PdfError> {
    let markdown = fs::read_to_string(input).map_err(|source| Md2PdfError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let title = document_title(input, &markdown);
    render_markdown_pdf(&title, &markdown, output)?;

    if html {
        let preview = output.with_extension("html");
        let page = html_document(&title, OutputLanguage::default(), &markdown);
        fs::write(&preview, page).map_err(|source| Md2PdfError::Io {
            path: preview.clone(),
            source,
        })?;
        println!("HTML preview written to {}", preview.display());
    }
    Ok(())
}

/// The first H1, or the file stem when there is none.
fn document_title(path: &Path, markdown: &str) -> String {
    let (title, _) = parse_book_markdown(markdown);
    if title != UNTITLED {
        return title;
    }
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or(title)
}

/// `*.md` files in `dir`, newest first.
fn list_markdown_files(dir: &Path) -> Result<Vec<MarkdownFile>, Md2PdfError> {
    if !dir.is_dir() {
        return Err(Md2PdfError::MissingDirectory(dir.to_path_buf()));
    }
    let entries = fs::read_dir(dir).map_err(|source| Md2PdfError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Md2PdfError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let metadata = entry.metadata().map_err(|source| Md2PdfError::Io {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            continue;
        }
        files.push(MarkdownFile {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
            path,
        });
    }
    if files.is_empty() {
        return Err(Md2PdfError::NoFiles(dir.to_path_buf()));
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

fn display_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.chars().count() > NAME_WIDTH {
        let head: String = name.chars().take(NAME_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        name
    }
}

fn print_listing(files: &[MarkdownFile]) {
    println!("\nMarkdown files (newest first):");
    println!("\n{:<4} {:<40} {:<20} {:<10}", "No.", "File name", "Modified", "Size");
    println!("{}", "-".repeat(74));
    for (index, file) in files.iter().enumerate() {
        let modified: DateTime<Local> = file.modified.into();
        println!(
            "{:<4} {:<40} {:<20} {:.1}KB",
            index + 1,
            display_name(&file.path),
            modified.format("%d/%m/%Y %H:%M").to_string(),
            file.size as f64 / 1024.0
        );
    }
}

/// Reads a 1-based index or `q`. Invalid answers are asked again; end of
/// input counts as `q`.
fn choose(files: &[MarkdownFile], input: &mut impl BufRead) -> Result<Option<PathBuf>, Md2PdfError> {
    loop {
        print!("\nNumber of the file to convert (or 'q' to quit): ");
        io::stdout().flush().map_err(Md2PdfError::Stdin)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(Md2PdfError::Stdin)? == 0 {
            return Ok(None);
        }
        let answer = line.trim();
        if answer.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match answer.parse::<usize>() {
            Ok(choice) if (1..=files.len()).contains(&choice) => {
                return Ok(Some(files[choice - 1].path.clone()));
            }
            Ok(_) => println!("Invalid number, try again."),
            Err(_) => println!("Invalid input, enter a number or 'q' to quit."),
        }
    }
}
