//! The lifecycle event protocol.
//!
//! The pipeline produces a strictly ordered sequence of [`BatchEvent`]s; the
//! transport serializes each one as an SSE event as it arrives. Keeping the
//! two apart means the pipeline never knows about wire formats, and tests
//! can assert on event values directly.

use axum::response::sse;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::prelude::*;

/// Page status values carried by `page-progress`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// The page has been handed to the recognition backend.
    Processing,
}

/// One state transition visible to the caller.
///
/// Field names serialize in camelCase to match the wire protocol expected
/// by existing consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum BatchEvent {
    /// A file passed validation and its page count is known.
    FileStart {
        file_id: Uuid,
        file_name: String,
        pages: usize,
    },

    /// A page has started recognition.
    PageProgress {
        file_id: Uuid,
        page: usize,
        total_pages: usize,
        status: PageStatus,
    },

    /// A page finished recognition successfully.
    PageDone {
        file_id: Uuid,
        page: usize,
        markdown: String,
    },

    /// A file- or page-level failure. Carries enough identifiers to
    /// correlate with the item that failed; never aborts the batch.
    Error {
        file_id: Uuid,
        file_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<usize>,
        error: String,
    },

    /// A file finished with at least one successful page.
    FileDone {
        file_id: Uuid,
        file_name: String,
        markdown: String,
        elapsed_ms: u128,
    },

    /// Terminal batch summary. Always last, unless the caller disconnected.
    BatchDone {
        total_files: usize,
        successful: usize,
        failed: usize,
    },
}

impl BatchEvent {
    /// The SSE event name for this transition.
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::FileStart { .. } => "file-start",
            BatchEvent::PageProgress { .. } => "page-progress",
            BatchEvent::PageDone { .. } => "page-done",
            BatchEvent::Error { .. } => "error",
            BatchEvent::FileDone { .. } => "file-done",
            BatchEvent::BatchDone { .. } => "batch-done",
        }
    }

    /// Serialize for the SSE transport.
    pub fn to_sse(&self) -> Result<sse::Event, axum::Error> {
        sse::Event::default().event(self.name()).json_data(self)
    }
}

/// The pipeline's side of the event stream.
///
/// A thin wrapper over a bounded channel. When the caller disconnects, the
/// receiving half is dropped, sends start failing, and the pipeline treats
/// the closed sink as its cancellation signal. There is deliberately no
/// close operation: dropping the sink ends the stream, so a torn-down
/// transport can never be closed twice.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<BatchEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the transport will drain.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<BatchEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Send one event. Returns `false` if the caller has disconnected.
    pub async fn send(&self, event: BatchEvent) -> bool {
        if let Err(err) = self.tx.send(event).await {
            debug!(event = err.0.name(), "dropping event: caller disconnected");
            false
        } else {
            true
        }
    }

    /// Has the caller disconnected?
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = BatchEvent::BatchDone {
            total_files: 3,
            successful: 2,
            failed: 1,
        };
        assert_eq!(event.name(), "batch-done");
    }

    #[test]
    fn test_payloads_are_camel_case() {
        let file_id = Uuid::new_v4();
        let event = BatchEvent::FileDone {
            file_id,
            file_name: "scan.pdf".to_string(),
            markdown: "# Title".to_string(),
            elapsed_ms: 1234,
        };
        let payload = serde_json::to_value(&event).expect("serialize");
        assert_eq!(payload["fileId"], Value::String(file_id.to_string()));
        assert_eq!(payload["fileName"], "scan.pdf");
        assert_eq!(payload["elapsedMs"], 1234);
    }

    #[test]
    fn test_error_payload_omits_missing_page() {
        let event = BatchEvent::Error {
            file_id: Uuid::new_v4(),
            file_name: "scan.pdf".to_string(),
            page: None,
            error: "Unsupported file type".to_string(),
        };
        let payload = serde_json::to_value(&event).expect("serialize");
        assert!(payload.get("page").is_none());

        let event = BatchEvent::Error {
            file_id: Uuid::new_v4(),
            file_name: "scan.pdf".to_string(),
            page: Some(2),
            error: "OCR request timed out after 120000ms".to_string(),
        };
        let payload = serde_json::to_value(&event).expect("serialize");
        assert_eq!(payload["page"], 2);
    }

    #[test]
    fn test_page_status_serialization() {
        let event = BatchEvent::PageProgress {
            file_id: Uuid::new_v4(),
            page: 1,
            total_pages: 2,
            status: PageStatus::Processing,
        };
        let payload = serde_json::to_value(&event).expect("serialize");
        assert_eq!(payload["status"], "processing");
        assert_eq!(payload["totalPages"], 2);
    }

    #[tokio::test]
    async fn test_sink_reports_disconnect() {
        let (sink, rx) = EventSink::channel(4);
        assert!(!sink.is_cancelled());
        drop(rx);
        assert!(sink.is_cancelled());
        let sent = sink
            .send(BatchEvent::BatchDone {
                total_files: 0,
                successful: 0,
                failed: 0,
            })
            .await;
        assert!(!sent);
    }
}
