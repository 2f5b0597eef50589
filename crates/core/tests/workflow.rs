use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ebook_core::{
    parse_book_markdown, render_book_markdown, BookExporter, BookFlow, BookRequest, BookSaver,
    BookState, CompletionRequest, FlowFailure, FlowOptions, FlowStage, LanguageModel,
    LanguageModelError, OutputLanguage, PromptRegistry, ResponseFormat, VecLogSink,
};
use tempfile::tempdir;

const TITLES: [&str; 5] = [
    "Capítulo 1",
    "Capítulo 2",
    "Capítulo 3",
    "Capítulo 4",
    "Capítulo 5",
];

const PUNCTUATED_TITLES: [&str; 6] = [
    "Sumário",
    "O que é Python?",
    "Variáveis: tipos e valores",
    "Funções | parâmetros",
    "Laços e condições",
    "Conclusão",
];

/// Answers JSON requests from a queue and writes chapters for text requests,
/// tracking how many calls overlap. Chapters open with the heading the prompt
/// asks for; table-of-contents prompts get a chapter list.
struct MockLanguageModel {
    outlines: Mutex<VecDeque<String>>,
    fail_chapter: Option<&'static str>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    fn new<I, S>(outlines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outlines: Mutex::new(outlines.into_iter().map(Into::into).collect()),
            fail_chapter: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn assert_empty(&self) {
        let guard = self.outlines.lock().expect("mock mutex poisoned");
        assert!(guard.is_empty(), "expected all mock outlines to be consumed");
    }
}

fn mock_error(message: &str) -> LanguageModelError {
    LanguageModelError::new(io::Error::new(io::ErrorKind::Other, message.to_string()))
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LanguageModelError> {
        self.prompts
            .lock()
            .expect("mock mutex poisoned")
            .push(request.prompt.clone());

        if request.response_format == ResponseFormat::JsonObject {
            let mut guard = self.outlines.lock().expect("mock mutex poisoned");
            return guard
                .pop_front()
                .ok_or_else(|| mock_error("mock language model has no remaining outlines"));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let title = request
            .prompt
            .lines()
            .find_map(|line| line.trim().strip_prefix("# "))
            .ok_or_else(|| mock_error("prompt names no chapter heading"))?
            .trim()
            .to_string();
        if self.fail_chapter == Some(title.as_str()) {
            return Err(mock_error("rate limit reached"));
        }
        if request.prompt.contains("table of contents") {
            return Ok(format!(
                "# {title}\n\n### O que é Python?\nPrimeiros passos.\n\n### Conclusão\nPróximos passos.\n"
            ));
        }
        Ok(format!(
            "# {title}\n\nConteúdo sobre {title}.\n\n```python\n# comentário\nprint('oi')\n```\n"
        ))
    }
}

fn outline_json(titles: &[&str]) -> String {
    let chapters: Vec<String> = titles
        .iter()
        .enumerate()
        .map(|(index, title)| {
            format!(
                r#"{{"title": "{title}", "description": "Parte {n} do livro", "topics": ["variáveis", "funções"], "expected_length": "curto"}}"#,
                n = index + 1
            )
        })
        .collect();
    format!(r#"{{"chapters": [{}]}}"#, chapters.join(", "))
}

fn request() -> BookRequest {
    BookRequest::new(
        "Python",
        "Ensinar programação básica",
        "Iniciantes em programação",
    )
    .expect("valid request")
}

#[tokio::test]
async fn full_generation_pipeline_produces_expected_artifacts(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let output_dir = temp.path().join("output");
    let backup_dir = output_dir.join("backup");
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new([outline_json(&TITLES)]);

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(&output_dir, &backup_dir, &sink),
        FlowOptions {
            max_concurrency: 2,
            export_pdf: true,
            export_epub: true,
            ..FlowOptions::default()
        },
    );
    let state = flow
        .run(&model, &request(), OutputLanguage::Portuguese)
        .await?;

    model.assert_empty();
    assert_eq!(flow.stage(), FlowStage::Done);
    assert!(model.peak.load(Ordering::SeqCst) <= 2);

    let titles: Vec<_> = state.book.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, TITLES);
    assert_eq!(state.book_outline.len(), 5);
    assert_eq!(state.time_metrics.chapter_generation_times().len(), 5);
    assert!(state.time_metrics.outline_generation_time().is_some());
    assert!(state.time_metrics.total_generation_time().is_some());
    assert!(state.time_metrics.estimated_completion_time().is_some());

    let book_path = output_dir.join("python.md");
    assert_eq!(state.output_path.as_deref(), Some(book_path.as_path()));
    let saved = fs::read_to_string(&book_path)?;
    assert_eq!(saved, render_book_markdown(&state));
    assert!(saved.starts_with("# Python\n\n# Capítulo 1\n\nConteúdo sobre Capítulo 1."));

    assert!(backup_dir.join("python_chapter_5.md").exists());
    let metadata = fs::read_to_string(backup_dir.join("python_metadata.txt"))?;
    assert!(metadata.contains("Language: pt-BR"));
    assert!(metadata.contains("Chapters: 5"));

    assert!(fs::read(output_dir.join("python.pdf"))?.starts_with(b"%PDF"));
    assert!(fs::read(output_dir.join("python.epub"))?.starts_with(b"PK"));

    let prompts_seen = model.prompts.lock().expect("mock mutex poisoned");
    assert!(prompts_seen[0].contains("Iniciantes em programação"));
    assert!(prompts_seen
        .iter()
        .any(|prompt| prompt.contains("Main topics: variáveis, funções")));

    assert!(sink.contains("Estimated total time"));
    assert!(sink.contains("Chapter finished (5/5)"));
    Ok(())
}

#[tokio::test]
async fn saved_book_reads_back_and_reexports_identically(
) -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new([outline_json(&PUNCTUATED_TITLES)]);

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(temp.path(), temp.path().join("backup"), &sink),
        FlowOptions::default(),
    );
    let state = flow
        .run(&model, &request(), OutputLanguage::Portuguese)
        .await?;
    let saved_path = state.output_path.clone().expect("output path recorded");
    let saved = fs::read(&saved_path)?;

    let (title, chapters) = parse_book_markdown(std::str::from_utf8(&saved)?);
    assert_eq!(title, "Python");
    let read_titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(read_titles, PUNCTUATED_TITLES);
    assert!(chapters[0].content.contains("### O que é Python?"));
    assert_eq!(chapters.len(), state.book.len());
    for (read, written) in chapters.iter().zip(&state.book) {
        assert_eq!(read.title, written.title);
        assert_eq!(read.content, written.content);
    }

    let reloaded = BookState::from_chapters(title, chapters, OutputLanguage::Portuguese);
    let reexport = temp.path().join("again.md");
    BookExporter::new(&reloaded)?.export_markdown(&reexport, None)?;
    assert_eq!(fs::read(&reexport)?, saved);
    Ok(())
}

#[tokio::test]
async fn chapter_failure_stops_the_flow_before_saving() {
    let temp = tempdir().expect("tempdir");
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let model = MockLanguageModel {
        fail_chapter: Some("Capítulo 3"),
        ..MockLanguageModel::new([outline_json(&TITLES)])
    };

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(temp.path(), temp.path().join("backup"), &sink),
        FlowOptions::default(),
    );
    let err = flow
        .run(&model, &request(), OutputLanguage::Portuguese)
        .await
        .unwrap_err();

    assert_eq!(err.stage, FlowStage::ChaptersWritten);
    assert!(matches!(err.source, FlowFailure::Chapters(_)));
    assert_eq!(flow.stage(), FlowStage::Failed);
    assert!(!temp.path().join("python.md").exists());
    assert!(sink.contains("Book generation failed"));
}

#[tokio::test]
async fn unusable_outline_fails_the_first_transition() {
    let temp = tempdir().expect("tempdir");
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new([r#"{"chapters": [{"title": "Só um", "description": "x"}]}"#]);

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(temp.path(), temp.path().join("backup"), &sink),
        FlowOptions::default(),
    );
    let err = flow
        .run(&model, &request(), OutputLanguage::English)
        .await
        .unwrap_err();

    assert_eq!(err.stage, FlowStage::OutlineGenerated);
    assert!(matches!(err.source, FlowFailure::Outline(_)));
    assert_eq!(flow.stage(), FlowStage::Failed);
}

#[tokio::test]
async fn punctuated_titles_are_written_in_full() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let prompts = PromptRegistry::new()?;
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new([outline_json(&PUNCTUATED_TITLES)]);

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(temp.path(), temp.path().join("backup"), &sink),
        FlowOptions::default(),
    );
    let state = flow
        .run(&model, &request(), OutputLanguage::Portuguese)
        .await?;

    assert_eq!(flow.stage(), FlowStage::Done);
    let titles: Vec<_> = state.book.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, PUNCTUATED_TITLES);
    assert!(state.book[1].content.starts_with("# O que é Python?"));
    Ok(())
}

#[tokio::test]
async fn unwritable_title_fails_before_any_chapter_request() {
    let temp = tempdir().expect("tempdir");
    let prompts = PromptRegistry::new().expect("built-in prompts");
    let sink = VecLogSink::new();
    let model = MockLanguageModel::new([outline_json(&[
        "Sumário",
        "Introdução",
        "Entrada/Saída",
        "Arquivos",
        "Conclusão",
    ])]);

    let mut flow = BookFlow::new(
        &prompts,
        &sink,
        BookSaver::new(temp.path(), temp.path().join("backup"), &sink),
        FlowOptions::default(),
    );
    let err = flow
        .run(&model, &request(), OutputLanguage::Portuguese)
        .await
        .unwrap_err();

    assert_eq!(err.stage, FlowStage::OutlineGenerated);
    assert!(matches!(err.source, FlowFailure::Outline(_)));
    assert!(err.to_string().contains("forbidden character"));
    assert_eq!(model.prompts.lock().expect("mock mutex poisoned").len(), 1);
}
