mod epub;
mod pdf;
mod saver;

pub use pdf::render_markdown_pdf;
pub use saver::{render_book_markdown, BookSaver};

use pulldown_cmark::{html, Options, Parser};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::book::{BookState, OutputLanguage};

pub const DEFAULT_MARKDOWN_TEMPLATE: &str = "# {title}\n\n{content}\n";

const HTML_STYLE: &str = r#"
body { font-family: Arial, sans-serif; line-height: 1.6; margin: 2cm; }
h1, h2, h3 { color: #2c3e50; }
h1 { border-bottom: 2px solid #2c3e50; padding-bottom: 10px; }
code { background-color: #f7f7f7; padding: 2px 5px; border-radius: 3px; }
pre { background-color: #f7f7f7; padding: 15px; border-radius: 5px; overflow-x: auto; }
blockquote { border-left: 4px solid #2c3e50; margin: 0; padding-left: 15px; color: #666; }
table { border-collapse: collapse; width: 100%; margin: 15px 0; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
th { background-color: #f7f7f7; }
"#;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("book has no title")]
    EmptyTitle,
    #[error("book has no chapters")]
    NoChapters,
    #[error("output path must not be empty")]
    EmptyPath,
    #[error("output file `{path}` must have the `.{expected}` extension")]
    InvalidExtension { path: PathBuf, expected: &'static str },
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to build PDF: {0}")]
    Pdf(String),
    #[error("failed to build EPUB: {0}")]
    Epub(String),
}

pub(crate) fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn require_path(path: &Path) -> Result<(), ExportError> {
    if path.as_os_str().is_empty() {
        return Err(ExportError::EmptyPath);
    }
    Ok(())
}

pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let mut output = String::new();
    html::push_html(&mut output, Parser::new_ext(markdown, options));
    output
}

/// Standalone, styled HTML page for a Markdown document.
pub fn html_document(title: &str, language: OutputLanguage, markdown: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        lang = language.code(),
        title = html_escape::encode_text(title),
        style = HTML_STYLE,
        body = markdown_to_html(markdown),
    )
}

/// Writes a finished book in the supported formats.
pub struct BookExporter<'a> {
    state: &'a BookState,
}

impl<'a> BookExporter<'a> {
    pub fn new(state: &'a BookState) -> Result<Self, ExportError> {
        if state.title.trim().is_empty() {
            return Err(ExportError::EmptyTitle);
        }
        if state.book.is_empty() {
            return Err(ExportError::NoChapters);
        }
        Ok(Self { state })
    }

    fn joined_content(&self) -> String {
        self.state
            .book
            .iter()
            .map(|chapter| chapter.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// `{title}` and `{content}` in the template are replaced; the default
    /// template matches the saver's layout.
    pub fn export_markdown(&self, path: &Path, template: Option<&str>) -> Result<(), ExportError> {
        require_path(path)?;
        let rendered = template
            .unwrap_or(DEFAULT_MARKDOWN_TEMPLATE)
            .replace("{title}", &self.state.title)
            .replace("{content}", &self.joined_content());
        write_file(path, rendered)
    }

    pub fn export_html(&self, path: &Path) -> Result<(), ExportError> {
        require_path(path)?;
        let document = html_document(
            &self.state.title,
            self.state.language,
            &render_book_markdown(self.state),
        );
        write_file(path, document)
    }

    pub fn export_pdf(&self, path: &Path) -> Result<(), ExportError> {
        require_path(path)?;
        render_markdown_pdf(&self.state.title, &render_book_markdown(self.state), path)
    }

    pub fn export_epub(&self, path: &Path) -> Result<(), ExportError> {
        require_path(path)?;
        let has_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
        if !has_extension {
            return Err(ExportError::InvalidExtension {
                path: path.to_path_buf(),
                expected: "epub",
            });
        }
        epub::write_epub(self.state, path)
    }
}
