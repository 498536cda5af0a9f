use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::ImportOptions;
use crate::db::{BatchSink, Namespace, SchemaWriter};
use crate::error::{ImportFailure, IngestError};
use crate::models::{Batch, ImportReport};
use crate::services::{
    batch::BatchAccumulator,
    decoder::StreamDecoder,
    filter::SubredditFilter,
    parsing::{KindPolicy, RecordParser},
};

/// Where an import run is.
///
/// Parsing, filtering and accumulating happen per line inside `Decoding` and are not separate
/// phases; a per-line rejection only moves a counter. `Flushing` is the end-of-stream drain of
/// partial batches, while full batches are written from within `Decoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Decoding,
    Flushing,
    Done,
    Errored,
}

/// What the caller wants imported, independent of where it lands.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub kind: KindPolicy,
    pub subreddits: Option<Vec<String>>,
    /// Original upload name, used to detect the record kind when the source path is a spool file.
    pub file_name: Option<String>,
}

/// Drives one source through decode → parse → filter → accumulate → write.
///
/// Runs are sequential and share nothing but the sink's connection pool, so several can run at
/// once against different namespaces. Delivery is at-least-once: a retried or repeated batch is
/// harmless because every write is an upsert on the natural id.
pub struct IngestionOrchestrator<'a, S> {
    sink: &'a S,
    options: ImportOptions,
    cancel: CancellationToken,
    phase: Phase,
    report: ImportReport,
}

impl<'a, S> IngestionOrchestrator<'a, S>
where
    S: BatchSink + Sync,
{
    #[must_use]
    pub fn new(sink: &'a S, options: ImportOptions, cancel: CancellationToken) -> Self {
        IngestionOrchestrator {
            sink,
            options,
            cancel,
            phase: Phase::Idle,
            report: ImportReport::default(),
        }
    }

    /// Names the source in the report, including on failure.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.report.source = source.into();
        self
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Consumes `decoder` to the end and returns the final counts.
    ///
    /// # Errors
    ///
    /// Returns [`ImportFailure::NothingWritten`] if the source could not be decoded at all or
    /// failed before the first batch landed, and [`ImportFailure::Partial`] with the counts so far
    /// once any batch has been committed.
    pub async fn run(
        &mut self,
        mut decoder: StreamDecoder,
        parser: RecordParser,
        filter: &SubredditFilter,
    ) -> Result<ImportReport, ImportFailure> {
        self.report.subreddit_filter = filter.names();
        let mut accumulator = BatchAccumulator::new(self.options.batch_size);
        self.enter(Phase::Decoding);

        let mut oversized = 0;
        loop {
            let next = decoder.next_line().await;

            // lines over the length limit never reach the parser but count as bad lines
            let skipped = decoder.oversized_lines() - oversized;
            oversized += skipped;
            self.report.lines_read += skipped;
            self.report.errors += skipped;

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };
            self.report.lines_read += 1;

            let record = match parser.parse(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(line = self.report.lines_read, "Skipping record: {e}");
                    self.report.errors += 1;
                    continue;
                }
            };

            if !filter.admits(record.subreddit()) {
                self.report.filtered_out += 1;
                continue;
            }

            if let Some(batch) = accumulator.push(record) {
                self.flush(batch).await.map_err(|e| self.fail(e))?;
            }
        }

        self.report.truncated = decoder.truncated();
        self.enter(Phase::Flushing);
        for batch in accumulator.drain() {
            self.flush(batch).await.map_err(|e| self.fail(e))?;
        }

        self.enter(Phase::Done);
        tracing::info!(
            submissions = self.report.submissions_imported,
            comments = self.report.comments_imported,
            errors = self.report.errors,
            filtered_out = self.report.filtered_out,
            "Import finished"
        );
        Ok(self.report.clone())
    }

    /// Writes one batch, retrying with backoff. Cancellation is only honoured before a write
    /// starts; a write already in flight is left to finish.
    async fn flush(&mut self, batch: Batch) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let mut attempt = 1;
        loop {
            match self.sink.write_batch(&batch).await {
                Ok(rows) => {
                    tracing::debug!(kind = %batch.kind(), rows, attempt, "Batch written");
                    self.report.add_written(batch.kind(), rows);
                    return Ok(());
                }
                Err(source) if attempt >= self.options.max_batch_attempts => {
                    return Err(IngestError::BatchWrite {
                        kind: batch.kind(),
                        size: batch.len(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.options.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        kind = %batch.kind(),
                        size = batch.len(),
                        attempt,
                        "Batch write failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Import phase");
        self.phase = phase;
    }

    fn fail(&mut self, err: IngestError) -> ImportFailure {
        self.enter(Phase::Errored);
        ImportFailure::from_progress(self.report.clone(), err)
    }
}

/// Opens `source` and decodes up to its first line, so an upload that is not a readable dump
/// can be turned away before anything is allocated for it.
///
/// # Errors
///
/// Returns [`IngestError::SourceOpen`] or [`IngestError::Decompression`], as a full import of the
/// same source would.
pub async fn check_source(source: &Path, window_log_max: u32) -> Result<(), IngestError> {
    let mut decoder = StreamDecoder::open(source, window_log_max).await?;
    decoder.next_line().await?;
    Ok(())
}

/// Imports one uploaded file into `namespace`: provisions the namespace, then streams the file
/// through an [`IngestionOrchestrator`].
///
/// # Errors
///
/// Returns [`ImportFailure::NothingWritten`] when the namespace cannot be provisioned or the
/// source cannot be opened, and otherwise whatever the orchestrator reports.
pub async fn import_file(
    writer: &SchemaWriter,
    source: &Path,
    namespace: &Namespace,
    request: &ImportRequest,
    options: ImportOptions,
    cancel: CancellationToken,
) -> Result<ImportReport, ImportFailure> {
    let nothing_written = |source| ImportFailure::NothingWritten { source };

    writer
        .ensure_namespace(namespace)
        .await
        .map_err(nothing_written)?;

    let decoder = StreamDecoder::open(source, options.window_log_max)
        .await
        .map_err(nothing_written)?;

    let name_hint = request
        .file_name
        .as_deref()
        .map_or(source, Path::new);
    let parser = RecordParser::new(request.kind.resolve_for(name_hint));
    let filter = request
        .subreddits
        .as_ref()
        .map_or_else(SubredditFilter::allow_all, SubredditFilter::new);

    tracing::info!(
        %namespace,
        source = %source.display(),
        format = ?decoder.format(),
        filter = ?filter.names(),
        "Starting import"
    );

    let sink = writer.sink(namespace);
    IngestionOrchestrator::new(&sink, options, cancel)
        .with_source(name_hint.display().to_string())
        .run(decoder, parser, &filter)
        .await
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::models::RecordKind;

    /// Records every batch it is handed; optionally fails the first `failures` writes.
    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Batch>>,
        failures: AtomicU32,
        cancel_after_write: Option<CancellationToken>,
    }

    impl RecordingSink {
        fn failing(times: u32) -> Self {
            RecordingSink {
                failures: AtomicU32::new(times),
                ..RecordingSink::default()
            }
        }

        fn sizes(&self) -> Vec<(RecordKind, usize)> {
            self.batches
                .lock()
                .expect("sink lock")
                .iter()
                .map(|b| (b.kind(), b.len()))
                .collect()
        }
    }

    impl BatchSink for RecordingSink {
        fn write_batch(
            &self,
            batch: &Batch,
        ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send {
            let result = if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                self.batches.lock().expect("sink lock").push(batch.clone());
                if let Some(token) = &self.cancel_after_write {
                    token.cancel();
                }
                Ok(batch.len() as u64)
            };
            std::future::ready(result)
        }
    }

    fn options(batch_size: usize) -> ImportOptions {
        ImportOptions {
            batch_size,
            max_batch_attempts: 3,
            retry_backoff: Duration::ZERO,
            window_log_max: 31,
        }
    }

    async fn decoder(text: &str) -> StreamDecoder {
        StreamDecoder::from_reader(Cursor::new(text.as_bytes().to_vec()), 31)
            .await
            .expect("in-memory source opens")
    }

    fn submissions(n: usize) -> String {
        (0..n)
            .map(|i| format!(r#"{{"id":"s{i}","subreddit":"foo","title":"t{i}"}}"#))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn partial_batch_is_flushed_at_end_of_stream() {
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(2), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(&submissions(3)).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect("import succeeds");

        assert_eq!(
            sink.sizes(),
            vec![(RecordKind::Submission, 2), (RecordKind::Submission, 1)]
        );
        assert_eq!(report.submissions_imported, 3);
        assert_eq!(orchestrator.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn source_check_rejects_undecodable_files() {
        let dir = tempfile::tempdir().expect("temp dir");

        let broken = dir.path().join("broken.zst");
        let mut bytes = vec![0x28, 0xB5, 0x2F, 0xFD];
        bytes.extend([0xFF; 64]);
        std::fs::write(&broken, bytes).expect("write fixture");
        assert!(matches!(
            check_source(&broken, 31).await,
            Err(IngestError::Decompression(_))
        ));

        let good = dir.path().join("good.zst");
        let compressed =
            zstd::encode_all(&br#"{"id":"a"}"#[..], 3).expect("compress fixture");
        std::fs::write(&good, compressed).expect("write fixture");
        assert!(check_source(&good, 31).await.is_ok());

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").expect("write fixture");
        assert!(check_source(&empty, 31).await.is_ok());
    }

    #[tokio::test]
    async fn overlong_lines_count_as_errors() {
        let input = format!(
            "{}\n{{\"id\":\"{}\"}}\n{}",
            r#"{"id":"a","subreddit":"foo"}"#,
            "x".repeat(200),
            r#"{"id":"b","subreddit":"foo"}"#,
        );
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(1000), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(&input).await.with_max_line_bytes(64),
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect("import succeeds");

        assert_eq!(report.submissions_imported, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.lines_read, 3);
    }

    #[tokio::test]
    async fn filtered_and_malformed_lines_only_move_counters() {
        let input = [
            r#"{"id":"a","subreddit":"foo","title":"t1","selftext":"s1"}"#,
            r#"{"id":"b","subreddit":"bar","title":"t2"}"#,
            "not-json",
        ]
        .join("\n");
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(1000), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(&input).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::new(["foo"]),
            )
            .await
            .expect("import succeeds");

        assert_eq!(report.submissions_imported, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.lines_read, 3);
        assert_eq!(report.subreddit_filter, Some(vec!["foo".to_string()]));
        let batches = sink.batches.lock().expect("sink lock");
        match batches.as_slice() {
            [Batch::Submissions(rows)] => assert_eq!(rows[0].id, "a"),
            other => panic!("unexpected batches {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_lines_are_counted_wherever_they_appear() {
        let input = "garbage\n{\"id\":\"a\"}\n{broken\n{\"id\":\"b\"}\n{\"no_id\":1}\n";
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(1), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(input).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect("import succeeds");

        assert_eq!(report.submissions_imported, 2);
        assert_eq!(report.errors, 3);
    }

    #[tokio::test]
    async fn mixed_kinds_batch_independently() {
        let input = [
            r#"{"id":"s1","title":"x"}"#,
            r#"{"id":"c1","body":"y","parent_id":"t3_s1","link_id":"t3_s1"}"#,
            r#"{"id":"c2","body":"z","parent_id":"t1_c1","link_id":"t3_s1"}"#,
        ]
        .join("\n");
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(2), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(&input).await,
                RecordParser::new(KindPolicy::Detect),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect("import succeeds");

        assert_eq!(
            sink.sizes(),
            vec![(RecordKind::Comment, 2), (RecordKind::Submission, 1)]
        );
        assert_eq!(report.comments_imported, 2);
        assert_eq!(report.submissions_imported, 1);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let sink = RecordingSink::failing(2);
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(10), CancellationToken::new());

        let report = orchestrator
            .run(
                decoder(&submissions(3)).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect("third attempt succeeds");

        assert_eq!(report.submissions_imported, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_before_any_write_is_nothing_written() {
        let sink = RecordingSink::failing(3);
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(10), CancellationToken::new());

        let failure = orchestrator
            .run(
                decoder(&submissions(3)).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect_err("all attempts fail");

        assert!(matches!(
            failure,
            ImportFailure::NothingWritten {
                source: IngestError::BatchWrite { attempts: 3, size: 3, .. }
            }
        ));
        assert_eq!(orchestrator.phase(), Phase::Errored);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_batch_and_keeps_counts() {
        let token = CancellationToken::new();
        let sink = RecordingSink {
            cancel_after_write: Some(token.clone()),
            ..RecordingSink::default()
        };
        let mut orchestrator = IngestionOrchestrator::new(&sink, options(2), token);

        let failure = orchestrator
            .run(
                decoder(&submissions(5)).await,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect_err("cancelled after first batch");

        match failure {
            ImportFailure::Partial {
                report,
                source: IngestError::Cancelled,
            } => assert_eq!(report.submissions_imported, 2),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(sink.sizes().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_source_is_errored_with_nothing_written() {
        let mut bytes = vec![0x28, 0xB5, 0x2F, 0xFD];
        bytes.extend([0xFF; 32]);
        let decoder = StreamDecoder::from_reader(Cursor::new(bytes), 31)
            .await
            .expect("sniffing succeeds");
        let sink = RecordingSink::default();
        let mut orchestrator =
            IngestionOrchestrator::new(&sink, options(2), CancellationToken::new());

        let failure = orchestrator
            .run(
                decoder,
                RecordParser::new(KindPolicy::Submissions),
                &SubredditFilter::allow_all(),
            )
            .await
            .expect_err("decompression cannot start");

        assert!(matches!(
            failure,
            ImportFailure::NothingWritten {
                source: IngestError::Decompression(_)
            }
        ));
        assert_eq!(orchestrator.phase(), Phase::Errored);
    }
}
