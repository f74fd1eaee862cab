//! Upload a local image to an image-hosting API and get back a shareable
//! link, with coarse progress reported along the way.

pub mod config;
pub mod errors;
pub mod security;
pub mod uploader;

pub use config::UploaderConfig;
pub use errors::{AppError, AppResult, FailureReason};
pub use uploader::{
    PendingUpload, ProgressEvent, ResourceHandle, UploadEvent, UploadOutcome, UploadSink, Uploader,
};
