use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::FailureReason;

/// Coarse upload stage, emitted before the work of that stage starts.
/// Declaration order is the only order in which events are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    OpeningStream,
    CreatingRequest,
    AttachingPayload,
    Uploading,
    DownloadingResponse,
    ParsingResponse,
}

impl ProgressEvent {
    pub const ALL: [ProgressEvent; 6] = [
        ProgressEvent::OpeningStream,
        ProgressEvent::CreatingRequest,
        ProgressEvent::AttachingPayload,
        ProgressEvent::Uploading,
        ProgressEvent::DownloadingResponse,
        ProgressEvent::ParsingResponse,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProgressEvent::OpeningStream => "opening stream",
            ProgressEvent::CreatingRequest => "creating request",
            ProgressEvent::AttachingPayload => "attaching payload",
            ProgressEvent::Uploading => "uploading",
            ProgressEvent::DownloadingResponse => "downloading response",
            ProgressEvent::ParsingResponse => "parsing response",
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProgressEvent::OpeningStream => "Opening image stream . . . ",
            ProgressEvent::CreatingRequest => "Creating the post . . . ",
            ProgressEvent::AttachingPayload => "Adding image to post . . . ",
            ProgressEvent::Uploading => "Uploading . . . ",
            ProgressEvent::DownloadingResponse => "Downloading response . . . ",
            ProgressEvent::ParsingResponse => "Parsing response . . . ",
        };
        f.write_str(text)
    }
}

/// Receives stage notifications from inside the pipeline.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Guards the forward-only stage order for one upload. A stage that is not
/// strictly after the last emitted one is dropped with a warning.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    last: Mutex<Option<ProgressEvent>>,
    upload_id: String,
    cancel: CancellationToken,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink, upload_id: &str) -> Self {
        Self {
            sink,
            last: Mutex::new(None),
            upload_id: upload_id.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stage boundary: fails with `Cancelled` if the upload was cancelled,
    /// otherwise emits `event` and lets the stage run.
    pub fn enter(&self, event: ProgressEvent) -> Result<(), FailureReason> {
        if self.cancel.is_cancelled() {
            log::info!(
                "Upload {} cancelled before '{}'",
                self.upload_id,
                event.label()
            );
            return Err(FailureReason::Cancelled {
                stage: event.label().to_string(),
            });
        }
        self.advance(event);
        Ok(())
    }

    pub fn advance(&self, event: ProgressEvent) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(previous) = *last {
            if event <= previous {
                log::warn!(
                    "Upload {}: ignoring out-of-order stage '{}' after '{}'",
                    self.upload_id,
                    event.label(),
                    previous.label()
                );
                return false;
            }
        }

        *last = Some(event);
        log::debug!("Upload {}: {}", self.upload_id, event.label());
        self.sink.emit(event);
        true
    }

    /// Last stage entered, used to name the stage a failure happened in.
    pub fn current(&self) -> Option<ProgressEvent> {
        match self.last.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Sink that discards events.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}
