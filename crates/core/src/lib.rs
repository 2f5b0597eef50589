pub mod book;
pub mod config;
pub mod export;
pub mod flow;
pub mod language_model;
pub mod logging;
pub mod outline;
pub mod parser;
pub mod prompts;
pub mod research;
pub mod review;
pub mod writer;

pub use crate::book::{
    BookContext, BookRequest, BookState, BookType, Chapter, ChapterLength, ChapterOutline,
    ChapterSpec, ReviewRequest, TimeMetrics, ValidationError,
};
pub use crate::config::{ConfigError, OutputLanguage, Settings};
pub use crate::export::{
    html_document, markdown_to_html, render_book_markdown, render_markdown_pdf, BookExporter,
    BookSaver, ExportError,
};
pub use crate::flow::{
    estimate_total_seconds, format_duration, sanitize_filename, BookFlow, FlowError, FlowFailure,
    FlowOptions, FlowStage,
};
pub use crate::language_model::{
    CompletionRequest, LanguageModel, LanguageModelError, ResponseFormat,
};
pub use crate::logging::{
    LevelFilterSink, LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink,
    TeeLogSink, TracingLogSink, VecLogSink,
};
pub use crate::outline::{OutlineError, OutlineService};
pub use crate::parser::{
    parse_book_markdown, parse_chapter_output, parse_markdown_outline, ParsedOutline,
};
pub use crate::prompts::{PromptError, PromptRegistry, PromptSource, PromptTemplate};
pub use crate::research::{ResearchError, ResearchSource};
pub use crate::review::{ReviewError, ReviewService};
pub use crate::writer::{write_chapters_parallel, ChapterError, ChapterWriter, FanOutOptions};
