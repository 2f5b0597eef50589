//! Best-effort readers for Markdown produced by the model or by the saver.
//! Nothing here fails: unrecognised input falls back to defaults.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::book::{Chapter, ChapterOutline};

pub const UNTITLED: &str = "Untitled";
pub const NO_DESCRIPTION: &str = "No description";

static H1_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+(.+?)\s*$").unwrap());
static BOLD_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*(.+?)\*\*\s*$").unwrap());
static ANY_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());
static CHAPTER_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{2,3}\s+(.+?)\s*$").unwrap());
static CHAPTER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:chapter|cap[ií]tulo)\s+\d+\s*[:.\-–]\s*").unwrap()
});
static FIRST_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\*\*(.+?)\*\*|^#+\s*(.+?)\s*$").unwrap());

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParsedOutline {
    pub title: String,
    pub description: String,
    pub chapters: Vec<ChapterOutline>,
}

/// Reads a free-form Markdown outline. `##`/`###` headings with a body become
/// chapters; a conclusion heading is dropped.
pub fn parse_markdown_outline(text: &str) -> ParsedOutline {
    let normalized = text.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.trim().lines().collect();

    let title_at = lines.iter().position(|line| {
        let line = line.trim();
        H1_LINE.is_match(line) || BOLD_LINE.is_match(line)
    });

    let (title, description) = match title_at {
        Some(index) => {
            let line = lines[index].trim();
            let title = H1_LINE
                .captures(line)
                .or_else(|| BOLD_LINE.captures(line))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| UNTITLED.to_string());
            let description = first_paragraph(&lines[index + 1..])
                .unwrap_or_else(|| NO_DESCRIPTION.to_string());
            (title, description)
        }
        None => (UNTITLED.to_string(), NO_DESCRIPTION.to_string()),
    };

    let mut chapters = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for &line in &lines {
        if let Some(caps) = CHAPTER_HEADING.captures(line.trim()) {
            if let Some((heading, body)) = current.take() {
                push_outline_chapter(&mut chapters, &heading, &body);
            }
            current = Some((caps[1].to_string(), Vec::new()));
        } else if H1_LINE.is_match(line.trim()) {
            if let Some((heading, body)) = current.take() {
                push_outline_chapter(&mut chapters, &heading, &body);
            }
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((heading, body)) = current {
        push_outline_chapter(&mut chapters, &heading, &body);
    }

    if chapters.is_empty() {
        chapters.push(ChapterOutline::new(
            "Introduction",
            "Introductory chapter of the book.",
        ));
    }

    ParsedOutline {
        title,
        description,
        chapters,
    }
}

fn first_paragraph(lines: &[&str]) -> Option<String> {
    let paragraph: Vec<&str> = lines
        .iter()
        .map(|line| line.trim())
        .skip_while(|line| line.is_empty())
        .take_while(|line| !line.is_empty())
        .collect();
    let first = paragraph.first()?;
    if ANY_HEADING.is_match(first) || BOLD_LINE.is_match(first) {
        return None;
    }
    Some(paragraph.join(" "))
}

fn push_outline_chapter(chapters: &mut Vec<ChapterOutline>, heading: &str, body: &[&str]) {
    let title = CHAPTER_PREFIX.replace(heading.trim(), "").trim().to_string();
    let description = body
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() || description.is_empty() {
        return;
    }
    if matches!(title.to_lowercase().as_str(), "conclusion" | "conclusão" | "conclusao") {
        return;
    }
    chapters.push(ChapterOutline::new(title, description));
}

/// Splits raw model output into a chapter: the title is the first bold span
/// or heading, the content is the whole text.
pub fn parse_chapter_output(text: &str) -> Chapter {
    let title = FIRST_TITLE
        .captures(text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());
    Chapter::new(title, text)
}

/// Reads back a book written by the saver: the first H1 is the book title and
/// every further H1 outside a code fence starts a chapter. Text between the
/// title and the first chapter heading becomes a chapter named after the book.
pub fn parse_book_markdown(text: &str) -> (String, Vec<Chapter>) {
    let normalized = text.replace("\r\n", "\n");
    let mut title: Option<String> = None;
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in normalized.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence {
            None
        } else {
            H1_LINE.captures(line).map(|caps| caps[1].to_string())
        };

        match (heading, title.is_some()) {
            (Some(heading), false) => title = Some(heading),
            (Some(heading), true) => sections.push((heading, vec![line])),
            (None, _) => match sections.last_mut() {
                Some((_, body)) => body.push(line),
                None => preamble.push(line),
            },
        }
    }

    let title = title.unwrap_or_else(|| UNTITLED.to_string());
    let mut chapters = Vec::new();
    let preamble = preamble.join("\n");
    if !preamble.trim().is_empty() {
        chapters.push(Chapter::new(title.clone(), preamble));
    }
    chapters.extend(
        sections
            .into_iter()
            .map(|(heading, body)| Chapter::new(heading, body.join("\n"))),
    );
    (title, chapters)
}
