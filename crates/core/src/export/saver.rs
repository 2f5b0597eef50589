use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::{write_file, ExportError};
use crate::book::BookState;
use crate::config::Settings;
use crate::logging::{LogLevel, LogRecord, LogSink};

/// The book as one Markdown document: the title as H1, then every chapter.
pub fn render_book_markdown(state: &BookState) -> String {
    let body = state
        .book
        .iter()
        .map(|chapter| chapter.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("# {}\n\n{}\n", state.title, body)
}

/// Writes the final Markdown book and its per-chapter backup.
pub struct BookSaver<'a> {
    output_dir: PathBuf,
    backup_dir: PathBuf,
    sink: &'a dyn LogSink,
}

impl<'a> BookSaver<'a> {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            backup_dir: backup_dir.into(),
            sink,
        }
    }

    pub fn from_settings(settings: &Settings, sink: &'a dyn LogSink) -> Self {
        Self::new(settings.output_dir.clone(), settings.backup_dir(), sink)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn save_markdown(&self, state: &mut BookState, name: &str) -> Result<PathBuf, ExportError> {
        let path = self.output_dir.join(format!("{name}.md"));
        write_file(&path, render_book_markdown(state))?;
        self.log(LogLevel::Info, format!("Book saved to {}", path.display()));
        state.output_path = Some(path.clone());
        Ok(path)
    }

    /// One file per chapter plus a small metadata summary.
    pub fn save_backup(&self, state: &BookState, name: &str) -> Result<Vec<PathBuf>, ExportError> {
        let mut written = Vec::with_capacity(state.book.len() + 1);
        for (index, chapter) in state.book.iter().enumerate() {
            let path = self
                .backup_dir
                .join(format!("{name}_chapter_{}.md", index + 1));
            write_file(&path, &chapter.content)?;
            written.push(path);
        }

        let mut metadata = String::new();
        let _ = writeln!(metadata, "Title: {}", state.title);
        let _ = writeln!(metadata, "Language: {}", state.language.code());
        let _ = writeln!(metadata, "Topic: {}", state.topic);
        let _ = writeln!(metadata, "Chapters: {}", state.book.len());
        let path = self.backup_dir.join(format!("{name}_metadata.txt"));
        write_file(&path, metadata)?;
        written.push(path);

        self.log(
            LogLevel::Debug,
            format!(
                "Backup of {} chapters written to {}",
                state.book.len(),
                self.backup_dir.display()
            ),
        );
        Ok(written)
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
