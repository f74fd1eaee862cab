use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_config, UploaderConfig};
use crate::errors::{safe_send_event, AppError, AppResult, FailureReason};

use super::imgur_client::ImgurClient;
use super::progress_tracker::{ProgressEvent, ProgressSink, ProgressTracker};
use super::response_parser::{ImgurResponseParser, ResponseParser};
use super::stream_source::{FileStreamSource, ResourceHandle, StreamSource};

/// Terminal result of one upload. Exactly one is produced per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success { link: String },
    Failure { reason: FailureReason },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }

    pub fn link(&self) -> Option<&str> {
        match self {
            UploadOutcome::Success { link } => Some(link),
            UploadOutcome::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            UploadOutcome::Success { .. } => None,
            UploadOutcome::Failure { reason } => Some(reason),
        }
    }
}

impl From<Result<String, FailureReason>> for UploadOutcome {
    fn from(result: Result<String, FailureReason>) -> Self {
        match result {
            Ok(link) => UploadOutcome::Success { link },
            Err(reason) => UploadOutcome::Failure { reason },
        }
    }
}

/// What the worker sends back to the caller's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Progress(ProgressEvent),
    Completed(UploadOutcome),
}

/// Caller-side receiver of progress and the final outcome. Both methods run
/// on whichever context drains the [`PendingUpload`].
pub trait UploadSink {
    fn on_progress(&mut self, event: ProgressEvent);
    fn on_complete(&mut self, outcome: &UploadOutcome);
}

struct ChannelProgressSink {
    tx: UnboundedSender<UploadEvent>,
    upload_id: String,
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        safe_send_event(&self.tx, &self.upload_id, UploadEvent::Progress(event));
    }
}

/// Runs uploads. Cheap to clone; clones share the same immutable
/// configuration and collaborators.
#[derive(Clone)]
pub struct Uploader {
    client: Arc<ImgurClient>,
    source: Arc<dyn StreamSource>,
    parser: Arc<dyn ResponseParser>,
    runtime: Option<Handle>,
}

impl Uploader {
    pub fn new(config: UploaderConfig) -> AppResult<Self> {
        validate_config(&config)?;
        let client = ImgurClient::new(Arc::new(config))?;

        Ok(Self {
            client: Arc::new(client),
            source: Arc::new(FileStreamSource::new()),
            parser: Arc::new(ImgurResponseParser::new()),
            runtime: None,
        })
    }

    pub fn with_stream_source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_response_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Run workers on `runtime` instead of the runtime `submit` is called
    /// from. Needed when the caller is a plain thread such as a UI loop.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        self.client.config()
    }

    /// Start uploading exactly one image. Anything other than a single
    /// handle is rejected here, before any event or network activity.
    pub fn submit<I, H>(&self, handles: I) -> AppResult<PendingUpload>
    where
        I: IntoIterator<Item = H>,
        H: Into<ResourceHandle>,
    {
        let mut handles: Vec<ResourceHandle> = handles.into_iter().map(Into::into).collect();
        if handles.len() != 1 {
            return Err(AppError::invalid_argument(&format!(
                "Can only upload a single image at a time (got {})",
                handles.len()
            )));
        }
        let handle = handles.remove(0);

        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| {
                AppError::Config("No Tokio runtime available to run the upload".to_string())
            })?,
        };

        let upload_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        log::info!("Starting upload {} for {}", upload_id, handle);

        let worker = UploadWorker {
            client: self.client.clone(),
            source: self.source.clone(),
            parser: self.parser.clone(),
            upload_id: upload_id.clone(),
            cancel: cancel.clone(),
            tx,
        };
        runtime.spawn(worker.run(handle));

        Ok(PendingUpload {
            upload_id,
            rx,
            cancel,
            outcome: None,
        })
    }

    /// Submit and wait for the outcome, dropping progress events.
    pub async fn upload<H: Into<ResourceHandle>>(&self, handle: H) -> AppResult<UploadOutcome> {
        let pending = self.submit([handle])?;
        Ok(pending.wait().await)
    }
}

struct UploadWorker {
    client: Arc<ImgurClient>,
    source: Arc<dyn StreamSource>,
    parser: Arc<dyn ResponseParser>,
    upload_id: String,
    cancel: CancellationToken,
    tx: UnboundedSender<UploadEvent>,
}

impl UploadWorker {
    async fn run(self, handle: ResourceHandle) {
        let sink = ChannelProgressSink {
            tx: self.tx.clone(),
            upload_id: self.upload_id.clone(),
        };
        let tracker =
            ProgressTracker::new(&sink, &self.upload_id).with_cancellation(self.cancel.clone());

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let stage = tracker
                    .current()
                    .map(|stage| stage.label())
                    .unwrap_or("starting");
                log::info!("Upload {} cancelled while {}", self.upload_id, stage);
                Err(FailureReason::Cancelled { stage: stage.to_string() })
            }
            result = self.execute(&handle, &tracker) => result,
        };

        let outcome = UploadOutcome::from(result);
        match &outcome {
            UploadOutcome::Success { link } => {
                log::info!("Upload {} completed: {}", self.upload_id, link)
            }
            UploadOutcome::Failure { reason } => {
                log::warn!("Upload {} failed: {}", self.upload_id, reason)
            }
        }
        safe_send_event(&self.tx, &self.upload_id, UploadEvent::Completed(outcome));
    }

    /// The stages in order. Any failure short-circuits the rest; the image
    /// stream is owned by this call and released on every path.
    async fn execute(
        &self,
        handle: &ResourceHandle,
        tracker: &ProgressTracker<'_>,
    ) -> Result<String, FailureReason> {
        tracker.enter(ProgressEvent::OpeningStream)?;
        let stream = self.source.open(handle).await?.with_handle(handle);

        let body = self.client.upload(stream, tracker).await?;

        tracker.enter(ProgressEvent::ParsingResponse)?;
        self.parser.parse(&body)
    }
}

/// Caller-side handle to a running upload. Events are only observed when
/// the caller drains them, so they are delivered on the caller's context.
pub struct PendingUpload {
    upload_id: String,
    rx: UnboundedReceiver<UploadEvent>,
    cancel: CancellationToken,
    outcome: Option<UploadOutcome>,
}

impl PendingUpload {
    pub fn id(&self) -> &str {
        &self.upload_id
    }

    /// Request cooperative cancellation. The upload still completes with a
    /// `Cancelled` failure unless it had already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// The outcome, once it has been drained from the worker.
    pub fn outcome(&self) -> Option<&UploadOutcome> {
        self.outcome.as_ref()
    }

    /// Next event, or `None` once the outcome has been delivered.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        if self.is_finished() {
            return None;
        }
        let event = self.rx.recv().await;
        Some(self.accept(event))
    }

    /// Non-blocking poll for UI loops.
    pub fn try_next_event(&mut self) -> Option<UploadEvent> {
        if self.is_finished() {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => Some(self.accept(Some(event))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.accept(None)),
        }
    }

    /// Blocking wait for callers outside any async runtime.
    pub fn blocking_next_event(&mut self) -> Option<UploadEvent> {
        if self.is_finished() {
            return None;
        }
        let event = self.rx.blocking_recv();
        Some(self.accept(event))
    }

    fn accept(&mut self, event: Option<UploadEvent>) -> UploadEvent {
        let outcome = match event {
            Some(UploadEvent::Completed(outcome)) => outcome,
            Some(progress) => return progress,
            None => {
                log::error!("Upload {} worker terminated without an outcome", self.upload_id);
                worker_lost()
            }
        };
        self.outcome = Some(outcome.clone());
        UploadEvent::Completed(outcome)
    }

    /// Drive `sink` with every event until the outcome arrives. If the
    /// outcome was already drained, it is returned without calling the
    /// sink again.
    pub async fn deliver_to<S: UploadSink + ?Sized>(mut self, sink: &mut S) -> UploadOutcome {
        while let Some(event) = self.next_event().await {
            dispatch(sink, event);
        }
        self.into_outcome()
    }

    /// Blocking form of [`PendingUpload::deliver_to`].
    pub fn blocking_deliver_to<S: UploadSink + ?Sized>(mut self, sink: &mut S) -> UploadOutcome {
        while let Some(event) = self.blocking_next_event() {
            dispatch(sink, event);
        }
        self.into_outcome()
    }

    /// Wait for the outcome, discarding progress.
    pub async fn wait(mut self) -> UploadOutcome {
        while self.next_event().await.is_some() {}
        self.into_outcome()
    }

    // Draining loops only stop once `accept` has stored an outcome
    fn into_outcome(self) -> UploadOutcome {
        self.outcome.unwrap_or_else(worker_lost)
    }
}

fn dispatch<S: UploadSink + ?Sized>(sink: &mut S, event: UploadEvent) {
    match event {
        UploadEvent::Progress(stage) => sink.on_progress(stage),
        UploadEvent::Completed(outcome) => sink.on_complete(&outcome),
    }
}

fn worker_lost() -> UploadOutcome {
    UploadOutcome::Failure {
        reason: FailureReason::network("upload worker terminated without a result"),
    }
}
