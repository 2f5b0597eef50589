mod parallel;

pub use parallel::{write_chapters_parallel, FanOutOptions};

use std::time::Instant;
use thiserror::Error;

use crate::book::{BookContext, Chapter, ChapterOutline, ChapterSpec, ValidationError};
use crate::language_model::{CompletionRequest, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{
    PromptError, PromptRegistry, CHAPTER, CHAPTER_DEFAULT_INSTRUCTIONS, CHAPTER_TOC_INSTRUCTIONS,
};
use crate::review::ReviewError;

#[derive(Debug, Error)]
pub enum ChapterError {
    #[error("invalid chapter request: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to render chapter prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model failed while writing `{title}`: {source}")]
    Model {
        title: String,
        #[source]
        source: LanguageModelError,
    },
    #[error("review of `{title}` failed: {source}")]
    Review {
        title: String,
        #[source]
        source: ReviewError,
    },
    #[error("chapter scheduler was shut down")]
    SchedulerClosed,
}

pub struct ChapterWriter<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ChapterWriter<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    pub fn build_prompt(
        &self,
        spec: &ChapterSpec,
        outline: &ChapterOutline,
    ) -> Result<String, ChapterError> {
        let instructions_key = if outline.is_table_of_contents() {
            CHAPTER_TOC_INSTRUCTIONS
        } else {
            CHAPTER_DEFAULT_INSTRUCTIONS
        };
        let instructions = self
            .prompts
            .format_with(instructions_key, [("title", spec.title())])?;
        let topics = spec.topics().join(", ");

        let prompt = self.prompts.format_with(
            CHAPTER,
            [
                ("language", spec.context().language.display_name()),
                ("title", spec.title()),
                ("description", spec.description()),
                ("topics", topics.as_str()),
                ("goal", spec.context().goal.as_str()),
                ("book_type", spec.context().book_type.as_str()),
                ("instructions", instructions.trim()),
            ],
        )?;
        Ok(prompt)
    }

    /// Validates the request, asks the model once and times the call.
    pub async fn write_chapter<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        outline: &ChapterOutline,
        context: &BookContext,
    ) -> Result<Chapter, ChapterError> {
        let spec = ChapterSpec::new(outline, context)?;
        let prompt = self.build_prompt(&spec, outline)?;

        self.log(
            LogLevel::Debug,
            format!(
                "Writing `{}` with a budget of {} tokens",
                spec.title(),
                outline.expected_length.max_tokens()
            ),
        );
        let started = Instant::now();
        let request =
            CompletionRequest::text(prompt).with_max_tokens(outline.expected_length.max_tokens());
        let content = model
            .complete(&request)
            .await
            .map_err(|source| ChapterError::Model {
                title: outline.title.clone(),
                source,
            })?;

        Ok(Chapter::new(outline.title.clone(), content)
            .with_generation_time(started.elapsed().as_secs_f64()))
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{BookRequest, ChapterLength, OutputLanguage};
    use crate::logging::NullLogSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoModel {
        calls: AtomicUsize,
        last: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<String, LanguageModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            Ok("\n# Intro\n\nHello there.\n\n".to_string())
        }
    }

    fn context() -> BookContext {
        let request = BookRequest::new("Python", "Teach basic programming", "Beginners").unwrap();
        BookContext::from_request(&request, OutputLanguage::English)
    }

    #[tokio::test]
    async fn writes_chapter_with_length_budget() {
        let prompts = PromptRegistry::new().unwrap();
        let writer = ChapterWriter::new(&prompts, &NullLogSink);
        let model = EchoModel::default();
        let outline = ChapterOutline::new("Intro", "Why Python")
            .with_topics(["History", "Setup"])
            .with_length(ChapterLength::Short);

        let chapter = writer.write_chapter(&model, &outline, &context()).await.unwrap();

        assert_eq!(chapter.title, "Intro");
        assert_eq!(chapter.content, "# Intro\n\nHello there.");
        assert!(chapter.generation_time.is_some());

        let request = model.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.max_tokens, Some(2000));
        assert!(request.prompt.contains("# Intro"));
        assert!(request.prompt.contains("Main topics: History, Setup"));
        assert!(request.prompt.contains("Goal: Teach basic programming"));
        assert!(request.prompt.contains("Book type: practical_guide"));
        assert!(request.prompt.contains("STRUCTURE AND DEPTH"));
    }

    #[test]
    fn table_of_contents_uses_its_own_instructions() {
        let prompts = PromptRegistry::new().unwrap();
        let writer = ChapterWriter::new(&prompts, &NullLogSink);
        let spec_outline = ChapterOutline::new("Sumário", "Chapter list");
        let spec = ChapterSpec::new(&spec_outline, &context()).unwrap();

        let prompt = writer.build_prompt(&spec, &spec_outline).unwrap();
        assert!(prompt.contains("clean and organised table of contents"));
        assert!(!prompt.contains("STRUCTURE AND DEPTH"));
        assert!(!prompt.contains("[Book Title]"));
        let headings: Vec<_> = prompt
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("# "))
            .collect();
        assert!(!headings.is_empty());
        assert!(headings.iter().all(|line| *line == "# Sumário"));
    }

    #[tokio::test]
    async fn invalid_title_never_reaches_the_model() {
        let prompts = PromptRegistry::new().unwrap();
        let writer = ChapterWriter::new(&prompts, &NullLogSink);
        let model = EchoModel::default();

        let err = writer
            .write_chapter(&model, &ChapterOutline::new("", "desc"), &context())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChapterError::Validation(ValidationError::Empty {
                field: "chapter_title"
            })
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
