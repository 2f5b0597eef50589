//! End-to-end generation of one book: outline, chapters, files on disk.

use chrono::Local;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

use crate::book::{BookContext, BookRequest, BookState, ChapterOutline, OutputLanguage};
use crate::config::Settings;
use crate::export::{BookExporter, BookSaver, ExportError};
use crate::language_model::LanguageModel;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::outline::{OutlineError, OutlineService};
use crate::prompts::PromptRegistry;
use crate::research::ResearchSource;
use crate::review::ReviewService;
use crate::writer::{write_chapters_parallel, ChapterError, ChapterWriter, FanOutOptions};

/// Fixed allowance for the outline step in the time estimate.
pub const OUTLINE_ESTIMATE_SECONDS: f64 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowStage {
    Init,
    OutlineGenerated,
    ChaptersWritten,
    Saved,
    Done,
    Failed,
}

impl FlowStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::OutlineGenerated => "outline generated",
            Self::ChaptersWritten => "chapters written",
            Self::Saved => "saved",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum FlowFailure {
    #[error(transparent)]
    Outline(#[from] OutlineError),
    #[error(transparent)]
    Chapters(#[from] ChapterError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// `stage` is the transition that was being attempted.
#[derive(Debug, Error)]
#[error("book generation failed while reaching stage `{stage}`: {source}")]
pub struct FlowError {
    pub stage: FlowStage,
    #[source]
    pub source: FlowFailure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlowOptions {
    pub max_concurrency: usize,
    pub min_chapters: usize,
    pub max_chapters: usize,
    pub outline_max_tokens: u32,
    pub review_chapters: bool,
    pub export_pdf: bool,
    pub export_epub: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            min_chapters: 5,
            max_chapters: 11,
            outline_max_tokens: 3000,
            review_chapters: false,
            export_pdf: false,
            export_epub: false,
        }
    }
}

impl FlowOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrency: settings.max_concurrent_chapters,
            min_chapters: settings.min_chapters,
            max_chapters: settings.max_chapters,
            outline_max_tokens: settings.max_tokens,
            review_chapters: settings.review_chapters,
            export_pdf: settings.export_pdf,
            export_epub: settings.export_epub,
        }
    }
}

/// Keeps word characters, whitespace and `-`; whitespace runs become `_`.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Outline allowance plus the chapter estimates spread over the workers
/// that can actually run at once.
pub fn estimate_total_seconds(outlines: &[ChapterOutline], max_concurrency: usize) -> f64 {
    let chapters: f64 = outlines
        .iter()
        .map(|outline| outline.expected_length.estimated_duration().as_secs_f64())
        .sum();
    let parallel = outlines.len().min(max_concurrency).max(1);
    OUTLINE_ESTIMATE_SECONDS + chapters / parallel as f64
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub struct BookFlow<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    saver: BookSaver<'a>,
    research: Option<&'a dyn ResearchSource>,
    options: FlowOptions,
    stage: FlowStage,
}

impl<'a> BookFlow<'a> {
    pub fn new(
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
        saver: BookSaver<'a>,
        options: FlowOptions,
    ) -> Self {
        Self {
            prompts,
            sink,
            saver,
            research: None,
            options,
            stage: FlowStage::Init,
        }
    }

    pub fn with_research(mut self, research: &'a dyn ResearchSource) -> Self {
        self.research = Some(research);
        self
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    fn fail(&mut self, stage: FlowStage, source: impl Into<FlowFailure>) -> FlowError {
        let source = source.into();
        self.log(
            LogLevel::Error,
            format!("Book generation failed while reaching `{stage}`: {source}"),
        );
        self.stage = FlowStage::Failed;
        FlowError { stage, source }
    }

    /// Runs every stage once. There is no retry and no resume: a failure
    /// leaves the flow in [`FlowStage::Failed`].
    pub async fn run<M: LanguageModel + ?Sized>(
        &mut self,
        model: &M,
        request: &BookRequest,
        language: OutputLanguage,
    ) -> Result<BookState, FlowError> {
        let started = Instant::now();
        self.stage = FlowStage::Init;
        let mut state = BookState::new(request, language);
        self.log(LogLevel::Info, "=== Starting ebook generation ===");
        self.log(LogLevel::Info, format!("Topic: {}", request.topic()));
        self.log(
            LogLevel::Info,
            format!("Target audience: {}", request.target_audience()),
        );
        self.log(LogLevel::Info, format!("Type: {}", request.book_type()));

        self.log(LogLevel::Info, "=== Generating outline ===");
        let outline_started = Instant::now();
        let mut outline_service = OutlineService::new(self.prompts, self.sink)
            .with_chapter_bounds(self.options.min_chapters, self.options.max_chapters)
            .with_max_tokens(self.options.outline_max_tokens);
        if let Some(research) = self.research {
            outline_service = outline_service.with_research(research);
        }
        let outlines = match outline_service.generate(model, request, language).await {
            Ok(outlines) => outlines,
            Err(err) => return Err(self.fail(FlowStage::OutlineGenerated, err)),
        };
        let outline_seconds = outline_started.elapsed().as_secs_f64();
        state.time_metrics.set_outline_generation_time(outline_seconds);
        self.log(
            LogLevel::Info,
            format!(
                "Outline with {} chapters ready in {}",
                outlines.len(),
                format_duration(outline_seconds)
            ),
        );
        for (index, outline) in outlines.iter().enumerate() {
            self.log(
                LogLevel::Info,
                format!(
                    "Chapter {}: {} ({})",
                    index + 1,
                    outline.title,
                    outline.expected_length
                ),
            );
        }

        let estimate = estimate_total_seconds(&outlines, self.options.max_concurrency);
        let completion = Local::now() + chrono::Duration::milliseconds((estimate * 1000.0) as i64);
        state.time_metrics.set_estimated_completion_time(completion);
        self.log(
            LogLevel::Info,
            format!(
                "Estimated total time: {} (done around {})",
                format_duration(estimate),
                completion.format("%H:%M:%S")
            ),
        );
        state.book_outline = outlines;
        self.stage = FlowStage::OutlineGenerated;

        self.log(LogLevel::Info, "=== Writing chapters ===");
        let context = BookContext::from_request(request, language);
        let writer = ChapterWriter::new(self.prompts, self.sink);
        let reviewer = ReviewService::new(self.prompts, self.sink);
        let options = FanOutOptions {
            max_concurrency: self.options.max_concurrency,
            reviewer: self.options.review_chapters.then_some(&reviewer),
        };
        let chapters =
            match write_chapters_parallel(&writer, model, &state.book_outline, &context, options)
                .await
            {
                Ok(chapters) => chapters,
                Err(err) => return Err(self.fail(FlowStage::ChaptersWritten, err)),
            };
        for chapter in &chapters {
            if let Some(seconds) = chapter.generation_time {
                state.time_metrics.record_chapter_time(&chapter.title, seconds);
            }
        }
        state.book = chapters;
        let total = started.elapsed().as_secs_f64();
        state.time_metrics.set_total_generation_time(total);
        self.log(
            LogLevel::Info,
            format!("All chapters written in {}", format_duration(total)),
        );
        self.stage = FlowStage::ChaptersWritten;

        self.log(LogLevel::Info, "=== Saving ebook ===");
        let mut name = sanitize_filename(request.topic());
        if name.is_empty() {
            name = "book".to_string();
        }
        if let Err(err) = self.save(&mut state, &name) {
            return Err(self.fail(FlowStage::Saved, err));
        }
        self.stage = FlowStage::Saved;

        self.log(LogLevel::Info, "=== Summary ===");
        self.log(LogLevel::Info, format!("Title: {}", state.title));
        self.log(LogLevel::Info, format!("Chapters: {}", state.book.len()));
        self.log(
            LogLevel::Info,
            format!("Total time: {}", format_duration(total)),
        );
        if let Some(path) = &state.output_path {
            self.log(LogLevel::Info, format!("Saved to: {}", path.display()));
        }
        self.stage = FlowStage::Done;
        Ok(state)
    }

    fn save(&self, state: &mut BookState, name: &str) -> Result<(), ExportError> {
        self.saver.save_markdown(state, name)?;
        self.saver.save_backup(state, name)?;

        if self.options.export_pdf || self.options.export_epub {
            let exporter = BookExporter::new(state)?;
            if self.options.export_pdf {
                let path = self.sibling(name, "pdf");
                exporter.export_pdf(&path)?;
                self.log(LogLevel::Info, format!("PDF written to {}", path.display()));
            }
            if self.options.export_epub {
                let path = self.sibling(name, "epub");
                exporter.export_epub(&path)?;
                self.log(LogLevel::Info, format!("EPUB written to {}", path.display()));
            }
        }
        Ok(())
    }

    fn sibling(&self, name: &str, extension: &str) -> PathBuf {
        self.saver.output_dir().join(format!("{name}.{extension}"))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
