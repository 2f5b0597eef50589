mod request;

pub use request::{
    validate_outline_entry, BookContext, BookRequest, BookType, ChapterSpec, ReviewRequest,
};

pub use crate::config::OutputLanguage;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },
    #[error("`{field}` must have at least {min} characters (got {actual})")]
    TooShort {
        field: &'static str,
        min: usize,
        actual: usize,
    },
    #[error("`{field}` must have at most {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    #[error("`{field}` contains the forbidden character `{character}`")]
    ForbiddenCharacter { field: &'static str, character: char },
    #[error("unknown book type `{0}`, expected technical, business, educational or practical_guide")]
    UnknownBookType(String),
    #[error("unknown chapter length `{0}`")]
    UnknownChapterLength(String),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChapterLength {
    Short,
    #[default]
    Medium,
    Long,
    VeryLong,
}

impl ChapterLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
            Self::VeryLong => "very_long",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::Short => 2000,
            Self::Medium => 3000,
            Self::Long | Self::VeryLong => 4000,
        }
    }

    pub fn estimated_duration(&self) -> Duration {
        let minutes = match self {
            Self::Short => 2,
            Self::Medium => 3,
            Self::Long => 4,
            Self::VeryLong => 5,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for ChapterLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterLength {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "short" | "curto" => Ok(Self::Short),
            "medium" | "médio" | "medio" => Ok(Self::Medium),
            "long" | "longo" => Ok(Self::Long),
            "very_long" | "very long" | "very-long" | "muito longo" | "muito_longo" => {
                Ok(Self::VeryLong)
            }
            _ => Err(ValidationError::UnknownChapterLength(value.to_string())),
        }
    }
}

impl TryFrom<String> for ChapterLength {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChapterLength> for String {
    fn from(value: ChapterLength) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterOutline {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub expected_length: ChapterLength,
}

impl ChapterOutline {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            topics: Vec::new(),
            expected_length: ChapterLength::Medium,
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_length(mut self, length: ChapterLength) -> Self {
        self.expected_length = length;
        self
    }

    /// Table-of-contents chapters get their own writing instructions.
    pub fn is_table_of_contents(&self) -> bool {
        matches!(
            self.title.trim().to_lowercase().as_str(),
            "summary" | "sumário" | "sumario" | "table of contents"
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub generation_time: Option<f64>,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self {
            title: title.into(),
            content: content.as_ref().trim().to_string(),
            generation_time: None,
        }
    }

    pub fn with_generation_time(mut self, seconds: f64) -> Self {
        if self.generation_time.is_none() {
            self.generation_time = Some(seconds);
        }
        self
    }
}

/// Timings of one run. Every value can be written once; later writes are
/// ignored and reported as `false`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeMetrics {
    start_time: DateTime<Local>,
    outline_generation_time: Option<f64>,
    chapter_generation_times: BTreeMap<String, f64>,
    total_generation_time: Option<f64>,
    estimated_completion_time: Option<DateTime<Local>>,
}

impl Default for TimeMetrics {
    fn default() -> Self {
        Self::starting_at(Local::now())
    }
}

impl TimeMetrics {
    pub fn starting_at(start_time: DateTime<Local>) -> Self {
        Self {
            start_time,
            outline_generation_time: None,
            chapter_generation_times: BTreeMap::new(),
            total_generation_time: None,
            estimated_completion_time: None,
        }
    }

    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    pub fn outline_generation_time(&self) -> Option<f64> {
        self.outline_generation_time
    }

    pub fn chapter_generation_times(&self) -> &BTreeMap<String, f64> {
        &self.chapter_generation_times
    }

    pub fn total_generation_time(&self) -> Option<f64> {
        self.total_generation_time
    }

    pub fn estimated_completion_time(&self) -> Option<DateTime<Local>> {
        self.estimated_completion_time
    }

    pub fn set_outline_generation_time(&mut self, seconds: f64) -> bool {
        set_once(&mut self.outline_generation_time, seconds)
    }

    pub fn set_total_generation_time(&mut self, seconds: f64) -> bool {
        set_once(&mut self.total_generation_time, seconds)
    }

    pub fn set_estimated_completion_time(&mut self, at: DateTime<Local>) -> bool {
        set_once(&mut self.estimated_completion_time, at)
    }

    pub fn record_chapter_time(&mut self, title: &str, seconds: f64) -> bool {
        if self.chapter_generation_times.contains_key(title) {
            return false;
        }
        self.chapter_generation_times
            .insert(title.to_string(), seconds);
        true
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

/// Everything one generation run knows about its book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookState {
    pub title: String,
    pub topic: String,
    pub goal: String,
    pub target_audience: String,
    pub language: OutputLanguage,
    pub book_outline: Vec<ChapterOutline>,
    pub book: Vec<Chapter>,
    pub output_path: Option<PathBuf>,
    pub time_metrics: TimeMetrics,
}

impl BookState {
    pub fn new(request: &BookRequest, language: OutputLanguage) -> Self {
        Self {
            title: request.topic().to_string(),
            topic: request.topic().to_string(),
            goal: request.goal().to_string(),
            target_audience: request.target_audience().to_string(),
            language,
            book_outline: Vec::new(),
            book: Vec::new(),
            output_path: None,
            time_metrics: TimeMetrics::default(),
        }
    }

    /// A state rebuilt from an already written book, used for re-exports.
    pub fn from_chapters(
        title: impl Into<String>,
        chapters: Vec<Chapter>,
        language: OutputLanguage,
    ) -> Self {
        let title = title.into();
        Self {
            topic: title.clone(),
            title,
            goal: String::new(),
            target_audience: String::new(),
            language,
            book_outline: Vec::new(),
            book: chapters,
            output_path: None,
            time_metrics: TimeMetrics::default(),
        }
    }
}
