use thiserror::Error;

use crate::book::{BookContext, ReviewRequest, ValidationError};
use crate::language_model::{CompletionRequest, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::parser::parse_chapter_output;
use crate::prompts::{PromptError, PromptRegistry, REVIEW_CHAPTER};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("invalid review request: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to render review prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model failed during review: {0}")]
    Model(#[source] LanguageModelError),
    #[error("review of `{0}` came back empty")]
    EmptyResponse(String),
}

/// Second pass over a finished chapter: grammar, clarity and fit to the
/// audience. Returns the revised Markdown.
pub struct ReviewService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ReviewService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self { prompts, sink }
    }

    pub async fn review<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &ReviewRequest,
        context: &BookContext,
    ) -> Result<String, ReviewError> {
        let prompt = self.prompts.format_with(
            REVIEW_CHAPTER,
            [
                ("title", request.title()),
                ("content", request.content()),
                ("description", request.description()),
                ("target_audience", context.target_audience.as_str()),
                ("goal", context.goal.as_str()),
                ("language", context.language.display_name()),
            ],
        )?;

        self.log(
            LogLevel::Debug,
            format!("Reviewing `{}`", request.title()),
        );
        let mut completion = CompletionRequest::text(prompt);
        completion.max_tokens = request.max_tokens();
        let revised = model
            .complete(&completion)
            .await
            .map_err(ReviewError::Model)?;

        let revised = revised.trim();
        if revised.is_empty() {
            return Err(ReviewError::EmptyResponse(request.title().to_string()));
        }
        let heading = parse_chapter_output(revised).title;
        if heading != request.title() {
            self.log(
                LogLevel::Warn,
                format!(
                    "Review of `{}` retitled it `{heading}`; the saved book may not read back with the same title",
                    request.title()
                ),
            );
        }
        Ok(revised.to_string())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
