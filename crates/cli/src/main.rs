use clap::{Args, Parser, Subcommand};
use ebook_adapters::{AdapterError, OpenAiCompatibleModel, SerperSearch};
use ebook_core::{
    parse_book_markdown, parse_markdown_outline, BookExporter, BookFlow, BookRequest, BookSaver,
    BookState, CompletionRequest, ConfigError, ExportError, FlowError, FlowOptions,
    LanguageModel, LanguageModelError, LevelFilterSink, LogLevel, LogRecord, LogSink,
    OutlineError, OutlineService, OutputLanguage, PromptError, PromptRegistry, Settings,
    SharedLogSink, StdoutLogSink, TeeLogSink, TracingLogSink, ValidationError,
};
use std::error::Error as StdError;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let mut log_path: Option<PathBuf> = None;

    match run(cli, &mut log_path) {
        Ok(()) => {}
        Err(CliError::Cancelled) => println!("\nCancelled."),
        Err(err) => {
            eprintln!("Error: {err}");
            if let Some(path) = log_path {
                tracing::error!(target: "ebook", "Fatal error: {}", error_chain(&err));
                eprintln!("Details were written to {}", path.display());
            }
            std::process::exit(1);
        }
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str("\n  caused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

fn run(cli: Cli, log_path: &mut Option<PathBuf>) -> Result<(), CliError> {
    let Cli {
        config,
        prompts_dir,
        command,
    } = cli;
    let config = config.as_deref();
    let prompts_dir = prompts_dir.as_deref();

    // Export and import work on files alone and need neither settings nor a model.
    match command {
        Command::Export(args) => run_export(args, &StdoutLogSink::new()),
        Command::ImportOutline(args) => run_import_outline(args),
        Command::Generate(args) => {
            let session = Session::open(config, prompts_dir, log_path)?;
            run_generate(&session.settings, &session.prompts, args, &session.sink)
        }
        Command::Outline(args) => {
            let session = Session::open(config, prompts_dir, log_path)?;
            run_outline(&session.settings, &session.prompts, args, &session.sink)
        }
        Command::CheckLlm => {
            let session = Session::open(config, prompts_dir, log_path)?;
            run_check_llm(&session.settings, &session.sink)
        }
    }
}

/// Settings, prompts and logging for the commands that talk to a model.
/// Progress goes to the console at Info and above; every record at the
/// configured level goes through `tracing` to the log file, together with
/// the adapters' `log` output.
struct Session {
    settings: Settings,
    prompts: PromptRegistry,
    sink: TeeLogSink,
}

impl Session {
    fn open(
        config: Option<&Path>,
        prompts_dir: Option<&Path>,
        log_path: &mut Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let settings = Settings::load(config)?;

        let path = settings.log_file();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.log_level().as_str()));
        file_subscriber(&path, filter)?
            .try_init()
            .map_err(CliError::Logging)?;
        *log_path = Some(path);

        let prompts = match prompts_dir {
            Some(dir) => PromptRegistry::with_custom_directories(&[dir])?,
            None => PromptRegistry::new()?,
        };
        let console: SharedLogSink =
            Arc::new(LevelFilterSink::new(StdoutLogSink::new(), LogLevel::Info));
        let sink = TeeLogSink::new()
            .with(console)
            .with(Arc::new(TracingLogSink));
        Ok(Self {
            settings,
            prompts,
            sink,
        })
    }
}

/// Plain-text `tracing` subscriber appending to `path`.
fn file_subscriber(
    path: &Path,
    filter: EnvFilter,
) -> Result<impl tracing::Subscriber + Send + Sync, CliError> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CliError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish())
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(CliError::Runtime)
}

/// Reads one non-empty answer from stdin. End of input cancels the run.
fn ask(label: &str) -> Result<String, CliError> {
    let stdin = io::stdin();
    loop {
        print!("{label}: ");
        io::stdout().flush().map_err(CliError::Stdin)?;
        let mut line = String::new();
        let read = stdin.lock().read_line(&mut line).map_err(CliError::Stdin)?;
        if read == 0 {
            return Err(CliError::Cancelled);
        }
        let answer = line.trim();
        if !answer.is_empty() {
            return Ok(answer.to_string());
        }
        println!("Please enter a value.");
    }
}

fn run_generate(
    settings: &Settings,
    prompts: &PromptRegistry,
    args: GenerateArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let topic = match args.topic {
        Some(topic) => topic,
        None => ask("Book topic")?,
    };
    let audience = match args.audience {
        Some(audience) => audience,
        None => ask("Target audience")?,
    };
    let book_type = match args.book_type {
        Some(book_type) => book_type,
        None => ask("Book type (e.g. technical, business, educational, practical guide)")?,
    };
    let request = BookRequest::from_book_type(&topic, &audience, &book_type)?;
    let language = args.language.unwrap_or(settings.default_language);

    settings.ensure_directories()?;
    let model = OpenAiCompatibleModel::from_settings(settings)?;
    let research = settings
        .serper_api_key()
        .map(|key| SerperSearch::new(key, settings.llm_timeout))
        .transpose()?;
    sink.log(LogRecord::new(
        LogLevel::Debug,
        format!(
            "Model {} at {} (research {})",
            model.model_name(),
            model.base_url(),
            if research.is_some() { "on" } else { "off" }
        ),
    ));

    let mut options = FlowOptions::from_settings(settings);
    options.export_pdf |= args.pdf;
    options.export_epub |= args.epub;

    let mut flow = BookFlow::new(prompts, sink, BookSaver::from_settings(settings, sink), options);
    if let Some(research) = research.as_ref() {
        flow = flow.with_research(research);
    }

    let state = runtime()?.block_on(flow.run(&model, &request, language))?;
    if let Some(path) = &state.output_path {
        println!("Ebook written to {}", path.display());
    }
    Ok(())
}

fn run_outline(
    settings: &Settings,
    prompts: &PromptRegistry,
    args: OutlineArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let request = BookRequest::new(&args.topic, &args.goal, &args.audience)?;
    let language = args.language.unwrap_or(settings.default_language);
    let model = OpenAiCompatibleModel::from_settings(settings)?;
    let research = settings
        .serper_api_key()
        .map(|key| SerperSearch::new(key, settings.llm_timeout))
        .transpose()?;

    let mut service = OutlineService::new(prompts, sink)
        .with_chapter_bounds(settings.min_chapters, settings.max_chapters)
        .with_max_tokens(settings.max_tokens);
    if let Some(research) = research.as_ref() {
        service = service.with_research(research);
    }

    let chapters = runtime()?.block_on(service.generate(&model, &request, language))?;
    let json = serde_json::to_string_pretty(&serde_json::json!({ "chapters": chapters }))?;
    write_json(&json, args.out.as_deref())
}

fn run_export(args: ExportArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    if args.pdf.is_none() && args.epub.is_none() && args.html.is_none() {
        return Err(CliError::NothingToExport);
    }
    let text = fs::read_to_string(&args.input).map_err(|source| CliError::Io {
        path: args.input.clone(),
        source,
    })?;
    let (title, chapters) = parse_book_markdown(&text);
    let state = BookState::from_chapters(title, chapters, args.language);
    let exporter = BookExporter::new(&state)?;

    if let Some(path) = &args.pdf {
        exporter.export_pdf(path)?;
        report(sink, "PDF", path);
    }
    if let Some(path) = &args.epub {
        exporter.export_epub(path)?;
        report(sink, "EPUB", path);
    }
    if let Some(path) = &args.html {
        exporter.export_html(path)?;
        report(sink, "HTML", path);
    }
    Ok(())
}

/// Converts a hand-written Markdown outline into the JSON `outline` prints.
fn run_import_outline(args: ImportOutlineArgs) -> Result<(), CliError> {
    let text = fs::read_to_string(&args.input).map_err(|source| CliError::Io {
        path: args.input.clone(),
        source,
    })?;
    let json = serde_json::to_string_pretty(&parse_markdown_outline(&text))?;
    write_json(&json, args.out.as_deref())
}

fn write_json(json: &str, out: Option<&Path>) -> Result<(), CliError> {
    match out {
        Some(path) => {
            fs::write(path, format!("{json}\n")).map_err(|source| CliError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            println!("Outline saved to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn report(sink: &dyn LogSink, format: &str, path: &Path) {
    sink.log(LogRecord::info(format!("{format} written to {}", path.display())));
}

fn run_check_llm(settings: &Settings, sink: &dyn LogSink) -> Result<(), CliError> {
    let model = OpenAiCompatibleModel::from_settings(settings)?;
    sink.log(LogRecord::info(format!(
        "Testing {} ({}) at {}",
        model.model_name(),
        settings.llm_interface,
        model.base_url()
    )));
    sink.log(LogRecord::info("Sending test prompt: Please reply 'OK'"));

    let answer = runtime()?.block_on(async {
        model
            .complete(&CompletionRequest::text("Please reply 'OK'").with_max_tokens(16))
            .await
    })?;
    if answer.trim().is_empty() {
        return Err(CliError::TestFailed(
            "the model returned an empty answer".to_string(),
        ));
    }
    sink.log(LogRecord::info(format!(
        "LLM configuration works. Reply: {}",
        answer.trim()
    )));
    Ok(())
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to load prompts: {0}")]
    Prompt(#[from] PromptError),
    #[error("adapter setup failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("LLM call failed: {0}")]
    Model(#[from] LanguageModelError),
    #[error("outline generation failed: {0}")]
    Outline(#[from] OutlineError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("failed to encode outline: {0}")]
    Json(#[from] serde_json::Error),
    #[error("file error at `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to read from stdin: {0}")]
    Stdin(#[source] io::Error),
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to install the log subscriber: {0}")]
    Logging(#[source] TryInitError),
    #[error("nothing to export: pass at least one of --pdf, --epub or --html")]
    NothingToExport,
    #[error("LLM test failed: {0}")]
    TestFailed(String),
    #[error("cancelled by user")]
    Cancelled,
}

#[derive(Parser)]
#[command(
    name = "ebookctl",
    version,
    about = "Generate complete ebooks with an LLM"
)]
struct Cli {
    /// Config file (JSON or TOML) layered under the environment
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory with prompt overrides (TOML or YAML)
    #[arg(long, global = true, value_name = "DIR")]
    prompts_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a full ebook; missing values are asked for on stdin
    Generate(GenerateArgs),
    /// Generate only the chapter outline as JSON
    Outline(OutlineArgs),
    /// Re-export a saved Markdown book
    Export(ExportArgs),
    /// Convert a Markdown outline (## chapter headings) to outline JSON
    ImportOutline(ImportOutlineArgs),
    /// Send a test prompt to the configured model
    CheckLlm,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long)]
    topic: Option<String>,
    #[arg(long)]
    audience: Option<String>,
    /// Free text, e.g. "technical" or "guia prático"
    #[arg(long)]
    book_type: Option<String>,
    /// Output language (pt-BR or en-US); defaults to DEFAULT_LANGUAGE
    #[arg(long)]
    language: Option<OutputLanguage>,
    /// Also write a PDF next to the Markdown file
    #[arg(long)]
    pdf: bool,
    /// Also write an EPUB next to the Markdown file
    #[arg(long)]
    epub: bool,
}

#[derive(Args)]
struct OutlineArgs {
    #[arg(long)]
    topic: String,
    #[arg(long)]
    goal: String,
    #[arg(long)]
    audience: String,
    #[arg(long)]
    language: Option<OutputLanguage>,
    /// Write the JSON here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Markdown book written by `generate`
    #[arg(long, value_name = "BOOK.md")]
    input: PathBuf,
    #[arg(long, value_name = "OUT")]
    pdf: Option<PathBuf>,
    #[arg(long, value_name = "OUT")]
    epub: Option<PathBuf>,
    #[arg(long, value_name = "OUT")]
    html: Option<PathBuf>,
    #[arg(long, default_value = "pt-BR")]
    language: OutputLanguage,
}

#[derive(Args)]
struct ImportOutlineArgs {
    /// Markdown outline: a `#` title, a description paragraph, `##` chapters
    #[arg(long, value_name = "OUTLINE.md")]
    input: PathBuf,
    /// Write the JSON here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] io::Error);

    #[test]
    fn error_chain_lists_every_cause() {
        let err = Outer(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(error_chain(&err), "outer\n  caused by: disk full");
    }

    #[test]
    fn cli_parses_generate_flags() {
        let cli = Cli::try_parse_from([
            "ebookctl",
            "--config",
            "ebook.toml",
            "generate",
            "--topic",
            "Python",
            "--language",
            "en-US",
            "--pdf",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("ebook.toml")));
        match cli.command {
            Command::Generate(args) => {
                assert_eq!(args.topic.as_deref(), Some("Python"));
                assert_eq!(args.language, Some(OutputLanguage::English));
                assert!(args.pdf);
                assert!(!args.epub);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn export_needs_a_target() {
        let args = ExportArgs {
            input: PathBuf::from("missing.md"),
            pdf: None,
            epub: None,
            html: None,
            language: OutputLanguage::Portuguese,
        };
        assert!(matches!(
            run_export(args, &ebook_core::NullLogSink),
            Err(CliError::NothingToExport)
        ));
    }

    #[test]
    fn log_file_receives_progress_at_the_configured_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let subscriber = file_subscriber(&path, EnvFilter::new("info")).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            TracingLogSink.log(LogRecord::new(LogLevel::Debug, "hidden detail"));
            TracingLogSink.log(LogRecord::info("Book saved to output/python.md"));
            TracingLogSink.log(LogRecord::warn("Research unavailable"));
        });

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("INFO ebook: Book saved to output/python.md"));
        assert!(contents.contains("WARN ebook: Research unavailable"));
        assert!(!contents.contains("hidden detail"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn imports_markdown_outline_as_json() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("outline.md");
        let out = dir.path().join("outline.json");
        fs::write(
            &input,
            "# Python\n\nUm guia para iniciantes.\n\n## Capítulo 1: Instalação\nPreparando o ambiente.\n\n## Conclusão\nFim.\n",
        )
        .unwrap();

        run_import_outline(ImportOutlineArgs {
            input,
            out: Some(out.clone()),
        })
        .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["title"], "Python");
        assert_eq!(json["description"], "Um guia para iniciantes.");
        assert_eq!(json["chapters"].as_array().unwrap().len(), 1);
        assert_eq!(json["chapters"][0]["title"], "Instalação");
    }

    #[test]
    fn import_outline_needs_no_settings() {
        let cli = Cli::try_parse_from(["ebookctl", "import-outline", "--input", "plan.md"]).unwrap();
        assert!(matches!(cli.command, Command::ImportOutline(_)));
    }
}
