//! The batch-processing pipeline.
//!
//! One pipeline run handles one submitted batch: files strictly in
//! submission order, pages strictly ascending within a file, one lifecycle
//! event per state transition. Failures are absorbed at the smallest scope
//! that can carry them: page errors never abort the file, file errors never
//! abort the batch, and nothing here aborts the process.

use std::{sync::Arc, time::Instant};

use uuid::Uuid;

use crate::{
    backends::RecognitionBackend,
    config::AppConfig,
    pages::{ALLOWED_EXTENSIONS, PageSet, UploadedFile},
    prelude::*,
};

pub mod events;
pub mod repetition;

use self::events::{BatchEvent, EventSink, PageStatus};

/// Separator between pages in a joined multi-page result.
const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// The terminal outcome of one file.
enum FileOutcome {
    /// At least one page produced text.
    Succeeded,

    /// Rejected, failed to convert, or zero pages produced text.
    Failed,

    /// The caller disconnected while we were working on this file.
    Cancelled,
}

/// What happened to a batch, for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSummary {
    /// How many files were submitted.
    pub total_files: usize,

    /// How many files produced at least one page of text.
    pub successful: usize,

    /// How many files were rejected or produced nothing.
    pub failed: usize,

    /// Did the caller disconnect before the batch-done event was delivered?
    pub cancelled: bool,
}

/// Drives a batch of uploaded files through page resolution, recognition
/// and the output guard, emitting lifecycle events as it goes.
pub struct BatchPipeline {
    config: Arc<AppConfig>,
    backend: Arc<dyn RecognitionBackend>,
    temp_root: PathBuf,
}

impl BatchPipeline {
    /// Create a new pipeline. `temp_root` is the shared parent for all
    /// per-file working directories.
    pub fn new(
        config: Arc<AppConfig>,
        backend: Arc<dyn RecognitionBackend>,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            config,
            backend,
            temp_root,
        }
    }

    /// Process one batch, emitting events into `sink`.
    ///
    /// Always emits a terminal `batch-done` event unless the caller
    /// disconnects first; a closed sink is our cancellation signal, checked
    /// at every file and page boundary.
    #[instrument(level = "debug", skip_all, fields(files = files.len()))]
    pub async fn run(&self, files: Vec<UploadedFile>, sink: EventSink) -> BatchSummary {
        let total_files = files.len();
        let mut successful = 0;
        let mut failed = 0;
        info!(file_count = total_files, "OCR batch started");

        for file in &files {
            if sink.is_cancelled() {
                break;
            }
            match self.process_file(file, &sink).await {
                FileOutcome::Succeeded => successful += 1,
                FileOutcome::Failed => failed += 1,
                FileOutcome::Cancelled => break,
            }
        }

        info!(
            total = total_files,
            successful, failed, "OCR batch done"
        );
        let delivered = sink
            .send(BatchEvent::BatchDone {
                total_files,
                successful,
                failed,
            })
            .await;
        BatchSummary {
            total_files,
            successful,
            failed,
            cancelled: !delivered,
        }
    }

    /// Process one file. Never returns an error: anything unexpected is
    /// converted into a file-level error event here, so one corrupt file
    /// cannot abort the rest of the batch.
    #[instrument(level = "debug", skip_all, fields(name = %file.name))]
    async fn process_file(&self, file: &UploadedFile, sink: &EventSink) -> FileOutcome {
        let file_id = Uuid::new_v4();
        let started = Instant::now();

        // Validate before creating any working storage.
        if !file.has_allowed_extension() {
            warn!(%file_id, name = %file.name, extension = %file.extension(),
                "rejected file: unsupported type");
            sink.send(BatchEvent::Error {
                file_id,
                file_name: file.name.clone(),
                page: None,
                error: format!(
                    "Unsupported file type. Allowed: {}",
                    ALLOWED_EXTENSIONS.join(", ")
                ),
            })
            .await;
            return FileOutcome::Failed;
        }
        if file.data.len() as u64 > self.config.max_file_size_bytes() {
            warn!(%file_id, name = %file.name, size_bytes = file.data.len(),
                "rejected file: exceeds max size");
            sink.send(BatchEvent::Error {
                file_id,
                file_name: file.name.clone(),
                page: None,
                error: format!(
                    "File exceeds max size ({}MB)",
                    self.config.max_file_size_mib
                ),
            })
            .await;
            return FileOutcome::Failed;
        }

        match self.process_validated_file(file, file_id, started, sink).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%file_id, name = %file.name, "error processing file: {:?}", err);
                sink.send(BatchEvent::Error {
                    file_id,
                    file_name: file.name.clone(),
                    page: None,
                    error: format!("{err:#}"),
                })
                .await;
                FileOutcome::Failed
            }
        }
    }

    /// Resolve a validated file into pages and recognize them.
    ///
    /// The [`PageSet`] owns the file's working directory, so storage is
    /// reclaimed when this function returns, on every path out of it.
    async fn process_validated_file(
        &self,
        file: &UploadedFile,
        file_id: Uuid,
        started: Instant,
        sink: &EventSink,
    ) -> Result<FileOutcome> {
        let pages =
            PageSet::resolve(file, file_id, &self.temp_root, self.config.pdf_dpi).await?;
        self.recognize_pages(file_id, &file.name, pages.pages(), started, sink)
            .await
    }

    /// Steps 3-5 of the per-file algorithm: announce the page count, OCR
    /// each page in order, then emit the file's terminal event.
    async fn recognize_pages(
        &self,
        file_id: Uuid,
        file_name: &str,
        pages: &[PathBuf],
        started: Instant,
        sink: &EventSink,
    ) -> Result<FileOutcome> {
        let total_pages = pages.len();
        sink.send(BatchEvent::FileStart {
            file_id,
            file_name: file_name.to_owned(),
            pages: total_pages,
        })
        .await;

        let mut page_results = vec![];
        for (page_idx, page_path) in pages.iter().enumerate() {
            if sink.is_cancelled() {
                return Ok(FileOutcome::Cancelled);
            }
            let page = page_idx + 1;
            sink.send(BatchEvent::PageProgress {
                file_id,
                page,
                total_pages,
                status: PageStatus::Processing,
            })
            .await;

            match self.backend.recognize(page_path).await {
                Ok(markdown) => {
                    let markdown = repetition::guard_output(markdown);
                    sink.send(BatchEvent::PageDone {
                        file_id,
                        page,
                        markdown: markdown.clone(),
                    })
                    .await;
                    page_results.push(markdown);
                }
                Err(err) => {
                    // Page-level failure isolation: report and move on.
                    error!(%file_id, name = %file_name, page,
                        "OCR failed for page: {:?}", err);
                    sink.send(BatchEvent::Error {
                        file_id,
                        file_name: file_name.to_owned(),
                        page: Some(page),
                        error: format!("{err:#}"),
                    })
                    .await;
                }
            }
        }

        if page_results.is_empty() {
            warn!(%file_id, name = %file_name, "no pages processed successfully");
            sink.send(BatchEvent::Error {
                file_id,
                file_name: file_name.to_owned(),
                page: None,
                error: "No pages could be processed".to_string(),
            })
            .await;
            return Ok(FileOutcome::Failed);
        }

        sink.send(BatchEvent::FileDone {
            file_id,
            file_name: file_name.to_owned(),
            markdown: join_pages(&page_results),
            elapsed_ms: started.elapsed().as_millis(),
        })
        .await;
        Ok(FileOutcome::Succeeded)
    }
}

/// Join successful page texts into one document.
///
/// A single page passes through unmodified. Multiple pages each get an HTML
/// comment marker (invisible in rendered Markdown, kept for downstream
/// consumers of the original wire format) and a horizontal-rule separator.
fn join_pages(pages: &[String]) -> String {
    if pages.len() == 1 {
        return pages[0].clone();
    }
    pages
        .iter()
        .enumerate()
        .map(|(idx, text)| format!("<!-- Page {} -->\n\n{}", idx + 1, text))
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}
