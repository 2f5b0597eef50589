use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

use crate::book::{
    validate_outline_entry, BookRequest, ChapterOutline, OutputLanguage, ValidationError,
};
use crate::language_model::{CompletionRequest, LanguageModel, LanguageModelError};
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry, OUTLINE};
use crate::research::ResearchSource;

pub const NO_RESEARCH: &str = "(no research available)";
const RESEARCH_LIMIT: usize = 5;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid fence regex"));

#[derive(Debug, Error)]
pub enum OutlineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to render outline prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model failed while generating the outline: {0}")]
    Model(#[source] LanguageModelError),
    #[error("outline response is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("outline contains no chapters")]
    Empty,
    #[error("outline repeats the chapter title `{0}`")]
    DuplicateTitle(String),
    #[error("outline has {count} chapters, expected between {min} and {max}")]
    ChapterCount { count: usize, min: usize, max: usize },
}

#[derive(Deserialize)]
struct OutlineResponse {
    chapters: Vec<ChapterOutline>,
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str())
        .unwrap_or(trimmed)
}

/// Parses `{"chapters": [...]}` and checks every entry can be written:
/// titles valid and unique, descriptions within limits.
pub fn parse_outline(raw: &str) -> Result<Vec<ChapterOutline>, OutlineError> {
    let response: OutlineResponse =
        serde_json::from_str(strip_code_fences(raw)).map_err(OutlineError::Parse)?;
    if response.chapters.is_empty() {
        return Err(OutlineError::Empty);
    }

    let mut seen = HashSet::new();
    for chapter in &response.chapters {
        validate_outline_entry(chapter)?;
        if !seen.insert(chapter.title.trim()) {
            return Err(OutlineError::DuplicateTitle(chapter.title.trim().to_string()));
        }
    }
    Ok(response.chapters)
}

pub struct OutlineService<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    research: Option<&'a dyn ResearchSource>,
    min_chapters: usize,
    max_chapters: usize,
    max_tokens: u32,
}

impl<'a> OutlineService<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            research: None,
            min_chapters: 5,
            max_chapters: 11,
            max_tokens: 3000,
        }
    }

    pub fn with_research(mut self, research: &'a dyn ResearchSource) -> Self {
        self.research = Some(research);
        self
    }

    pub fn with_chapter_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_chapters = min.max(1);
        self.max_chapters = max.max(self.min_chapters);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        request: &BookRequest,
        language: OutputLanguage,
    ) -> Result<Vec<ChapterOutline>, OutlineError> {
        let research = self.gather_research(request).await;
        let prompt = self.prompts.format_with(
            OUTLINE,
            [
                ("topic", request.topic()),
                ("goal", request.goal()),
                ("target_audience", request.target_audience()),
                ("book_type", request.book_type().as_str()),
                ("language", language.display_name()),
                ("research", research.as_str()),
            ],
        )?;

        self.log(
            LogLevel::Debug,
            format!("Requesting outline for `{}`", request.topic()),
        );
        let completion = CompletionRequest::json(prompt).with_max_tokens(self.max_tokens);
        let raw = model
            .complete(&completion)
            .await
            .map_err(OutlineError::Model)?;

        let chapters = parse_outline(&raw)?;
        let count = chapters.len();
        if count < self.min_chapters || count > self.max_chapters {
            return Err(OutlineError::ChapterCount {
                count,
                min: self.min_chapters,
                max: self.max_chapters,
            });
        }

        self.log(
            LogLevel::Info,
            format!("Outline ready with {count} chapters"),
        );
        Ok(chapters)
    }

    async fn gather_research(&self, request: &BookRequest) -> String {
        let Some(research) = self.research else {
            return NO_RESEARCH.to_string();
        };

        let query = format!("{} {}", request.topic(), request.target_audience());
        match research.search(&query, RESEARCH_LIMIT).await {
            Ok(snippets) if !snippets.is_empty() => {
                self.log(
                    LogLevel::Debug,
                    format!("Research returned {} snippets", snippets.len()),
                );
                snippets
                    .iter()
                    .map(|snippet| format!("- {snippet}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Ok(_) => NO_RESEARCH.to_string(),
            Err(err) => {
                self.log(
                    LogLevel::Warn,
                    format!("Research unavailable, continuing without it: {err}"),
                );
                NO_RESEARCH.to_string()
            }
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
