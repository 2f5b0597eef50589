use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{ChapterOutline, OutputLanguage, ValidationError};

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const FORBIDDEN_TITLE_CHARS: [char; 6] = ['/', '\\', '<', '>', '"', '*'];

fn require_min(field: &'static str, value: &str, min: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let actual = trimmed.chars().count();
    if actual < min {
        return Err(ValidationError::TooShort { field, min, actual });
    }
    Ok(trimmed.to_string())
}

fn require_max(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let actual = value.trim().chars().count();
    if actual > max {
        return Err(ValidationError::TooLong { field, max, actual });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookType {
    Technical,
    Business,
    Educational,
    #[default]
    PracticalGuide,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Business => "business",
            Self::Educational => "educational",
            Self::PracticalGuide => "practical_guide",
        }
    }

    /// Maps the free text typed by a user to the closest type, falling back
    /// to a practical guide.
    pub fn infer(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if let Ok(exact) = lowered.parse() {
            return exact;
        }
        if lowered.contains("técnic") || lowered.contains("tecnic") || lowered.contains("technical") {
            Self::Technical
        } else if lowered.contains("business") || lowered.contains("negócio") || lowered.contains("negocio") {
            Self::Business
        } else if lowered.contains("educa") || lowered.contains("didátic") {
            Self::Educational
        } else {
            Self::PracticalGuide
        }
    }
}

impl fmt::Display for BookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "technical" => Ok(Self::Technical),
            "business" => Ok(Self::Business),
            "educational" => Ok(Self::Educational),
            "practical_guide" => Ok(Self::PracticalGuide),
            other => Err(ValidationError::UnknownBookType(other.to_string())),
        }
    }
}

/// Validated input of one generation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookRequest {
    topic: String,
    goal: String,
    target_audience: String,
    book_type: BookType,
}

impl BookRequest {
    pub fn new(topic: &str, goal: &str, target_audience: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            topic: require_min("topic", topic, 3)?,
            goal: require_min("goal", goal, 10)?,
            target_audience: require_min("target_audience", target_audience, 3)?,
            book_type: BookType::default(),
        })
    }

    /// Builds the request the way the interactive runner asks for it: topic,
    /// audience and a free-text book type.
    pub fn from_book_type(
        topic: &str,
        target_audience: &str,
        book_type: &str,
    ) -> Result<Self, ValidationError> {
        let goal = format!(
            "Create a {} about {} for {}",
            book_type.trim(),
            topic.trim(),
            target_audience.trim()
        );
        let mut request = Self::new(topic, &goal, target_audience)?;
        request.book_type = BookType::infer(book_type);
        Ok(request)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn target_audience(&self) -> &str {
        &self.target_audience
    }

    pub fn book_type(&self) -> BookType {
        self.book_type
    }
}

/// Book-wide facts every chapter prompt needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookContext {
    pub topic: String,
    pub goal: String,
    pub target_audience: String,
    pub language: OutputLanguage,
    pub book_type: BookType,
}

impl BookContext {
    pub fn from_request(request: &BookRequest, language: OutputLanguage) -> Self {
        Self {
            topic: request.topic().to_string(),
            goal: request.goal().to_string(),
            target_audience: request.target_audience().to_string(),
            language,
            book_type: request.book_type(),
        }
    }
}

/// Checks the title and description of one planned chapter. Runs while the
/// outline is parsed and again before each chapter request.
pub fn validate_outline_entry(outline: &ChapterOutline) -> Result<(), ValidationError> {
    let title = outline.title.trim();
    if title.is_empty() {
        return Err(ValidationError::Empty {
            field: "chapter_title",
        });
    }
    require_max("chapter_title", title, MAX_TITLE_CHARS)?;
    if let Some(character) = title.chars().find(|ch| FORBIDDEN_TITLE_CHARS.contains(ch)) {
        return Err(ValidationError::ForbiddenCharacter {
            field: "chapter_title",
            character,
        });
    }
    require_max("chapter_description", &outline.description, MAX_DESCRIPTION_CHARS)
}

/// A chapter request that passed every check, built before any model call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChapterSpec {
    title: String,
    description: String,
    topics: Vec<String>,
    context: BookContext,
}

impl ChapterSpec {
    pub fn new(outline: &ChapterOutline, context: &BookContext) -> Result<Self, ValidationError> {
        validate_outline_entry(outline)?;
        for (field, value) in [
            ("topic", &context.topic),
            ("target_audience", &context.target_audience),
            ("goal", &context.goal),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Empty { field });
            }
        }

        Ok(Self {
            title: outline.title.trim().to_string(),
            description: outline.description.trim().to_string(),
            topics: outline.topics.clone(),
            context: context.clone(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn context(&self) -> &BookContext {
        &self.context
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewRequest {
    title: String,
    content: String,
    description: String,
    max_tokens: Option<u32>,
}

impl ReviewRequest {
    pub fn new(title: &str, content: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            title: require_min("chapter_title", title, 3)?,
            content: require_min("chapter_content", content, 100)?,
            description: String::new(),
            max_tokens: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
}
