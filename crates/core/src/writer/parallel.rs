use futures::future::try_join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;

use super::{ChapterError, ChapterWriter};
use crate::book::{BookContext, Chapter, ChapterOutline, ReviewRequest};
use crate::language_model::LanguageModel;
use crate::logging::LogLevel;
use crate::review::ReviewService;

pub struct FanOutOptions<'a> {
    pub max_concurrency: usize,
    pub reviewer: Option<&'a ReviewService<'a>>,
}

impl Default for FanOutOptions<'_> {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            reviewer: None,
        }
    }
}

/// Writes every outline entry concurrently, at most `max_concurrency` model
/// calls at a time. The first failure cancels the remaining chapters.
/// Chapters come back in outline order.
pub async fn write_chapters_parallel<M: LanguageModel + ?Sized>(
    writer: &ChapterWriter<'_>,
    model: &M,
    outlines: &[ChapterOutline],
    context: &BookContext,
    options: FanOutOptions<'_>,
) -> Result<Vec<Chapter>, ChapterError> {
    let permits = options.max_concurrency.max(1);
    let semaphore = Semaphore::new(permits);
    let completed = AtomicUsize::new(0);
    let total = outlines.len();
    writer.log(
        LogLevel::Info,
        format!("Writing {total} chapters, {permits} at a time"),
    );

    let tasks = outlines.iter().map(|outline| {
        let semaphore = &semaphore;
        let completed = &completed;
        let reviewer = options.reviewer;
        async move {
            // The semaphore is local and never closed.
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| ChapterError::SchedulerClosed)?;

            writer.log(LogLevel::Info, format!("Starting chapter: {}", outline.title));
            let started = Instant::now();
            let mut chapter = writer.write_chapter(model, outline, context).await?;

            if let Some(reviewer) = reviewer {
                let request = ReviewRequest::new(&chapter.title, &chapter.content)?
                    .with_description(outline.description.clone())
                    .with_max_tokens(outline.expected_length.max_tokens());
                let revised = reviewer
                    .review(model, &request, context)
                    .await
                    .map_err(|source| ChapterError::Review {
                        title: outline.title.clone(),
                        source,
                    })?;
                chapter = Chapter::new(outline.title.clone(), revised)
                    .with_generation_time(started.elapsed().as_secs_f64());
            }

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            writer.log(
                LogLevel::Info,
                format!(
                    "Chapter finished ({done}/{total}): {} in {:.1}s",
                    outline.title,
                    chapter.generation_time.unwrap_or_default()
                ),
            );
            Ok::<_, ChapterError>(chapter)
        }
    });

    // try_join_all yields results in input order, whatever order they finished in.
    try_join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{BookRequest, OutputLanguage};
    use crate::language_model::{CompletionRequest, LanguageModelError};
    use crate::logging::VecLogSink;
    use crate::prompts::PromptRegistry;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers after a delay that shrinks with the chapter number so later
    /// chapters finish first.
    #[derive(Default)]
    struct SlowModel {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<String, LanguageModelError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let number: u64 = request
                .prompt
                .lines()
                .find_map(|line| line.strip_prefix("# Part "))
                .and_then(|rest| rest.trim().parse().ok())
                .unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(60u64.saturating_sub(number * 10))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(marker) = self.fail_on {
                if request.prompt.contains(marker) {
                    return Err(LanguageModelError::msg("rate limited"));
                }
            }
            Ok(format!("# Part {number}\n\nBody {number}"))
        }
    }

    fn outlines(count: usize) -> Vec<ChapterOutline> {
        (1..=count)
            .map(|n| ChapterOutline::new(format!("Part {n}"), format!("Section {n}")))
            .collect()
    }

    fn context() -> BookContext {
        let request = BookRequest::new("Python", "Teach basic programming", "Beginners").unwrap();
        BookContext::from_request(&request, OutputLanguage::English)
    }

    #[tokio::test]
    async fn keeps_outline_order_and_bound() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let writer = ChapterWriter::new(&prompts, &sink);
        let model = SlowModel::default();
        let outlines = outlines(5);

        let chapters = write_chapters_parallel(
            &writer,
            &model,
            &outlines,
            &context(),
            FanOutOptions {
                max_concurrency: 2,
                reviewer: None,
            },
        )
        .await
        .unwrap();

        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Part 1", "Part 2", "Part 3", "Part 4", "Part 5"]);
        assert!(model.peak.load(Ordering::SeqCst) <= 2);
        assert!(sink.contains("Chapter finished (5/5)"));
    }

    #[tokio::test]
    async fn repeated_titles_keep_one_chapter_per_entry() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let writer = ChapterWriter::new(&prompts, &sink);
        let model = SlowModel::default();
        let outlines = vec![
            ChapterOutline::new("Part 1", "First pass"),
            ChapterOutline::new("Part 2", "Middle"),
            ChapterOutline::new("Part 1", "Second pass"),
        ];

        let chapters = write_chapters_parallel(
            &writer,
            &model,
            &outlines,
            &context(),
            FanOutOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(chapters.len(), outlines.len());
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Part 1", "Part 2", "Part 1"]);
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let writer = ChapterWriter::new(&prompts, &sink);
        let model = SlowModel::default();

        let chapters = write_chapters_parallel(
            &writer,
            &model,
            &outlines(3),
            &context(),
            FanOutOptions {
                max_concurrency: 0,
                reviewer: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(chapters.len(), 3);
        assert_eq!(model.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_failure_fails_the_batch() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let writer = ChapterWriter::new(&prompts, &sink);
        let model = SlowModel {
            fail_on: Some("# Part 2"),
            ..SlowModel::default()
        };

        let err = write_chapters_parallel(
            &writer,
            &model,
            &outlines(4),
            &context(),
            FanOutOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChapterError::Model { title, .. } if title == "Part 2"));
    }

    #[tokio::test]
    async fn short_chapters_fail_review_validation() {
        let prompts = PromptRegistry::new().unwrap();
        let sink = VecLogSink::new();
        let writer = ChapterWriter::new(&prompts, &sink);
        let reviewer = ReviewService::new(&prompts, &sink);
        let model = SlowModel::default();
        let outlines: Vec<_> = (1..=2)
            .map(|n| ChapterOutline::new(format!("Part {n}"), "Long enough section"))
            .collect();

        // Answers are shorter than a reviewable chapter.
        let err = write_chapters_parallel(
            &writer,
            &model,
            &outlines,
            &context(),
            FanOutOptions {
                max_concurrency: 1,
                reviewer: Some(&reviewer),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChapterError::Validation(_)));
    }
}
