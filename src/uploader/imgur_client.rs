use futures_util::StreamExt;
use reqwest::multipart::{self, Part};
use reqwest::{Body, Client, StatusCode};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::config::UploaderConfig;
use crate::errors::{map_reqwest_error, AppResult, FailureReason};
use crate::security::InputValidator;

use super::progress_tracker::{ProgressEvent, ProgressTracker};
use super::stream_source::ImageStream;

/// Multipart client for the image-hosting API. Holds only immutable
/// configuration, so one instance can serve any number of uploads.
pub struct ImgurClient {
    client: Client,
    config: Arc<UploaderConfig>,
}

impl ImgurClient {
    pub fn new(config: Arc<UploaderConfig>) -> AppResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Post `stream` and the API key as one multipart request and return the
    /// raw response text. Only a 200 response is read; anything else fails
    /// with `NonOkStatus` without touching the body.
    pub async fn upload(
        &self,
        stream: ImageStream,
        tracker: &ProgressTracker<'_>,
    ) -> Result<String, FailureReason> {
        tracker.enter(ProgressEvent::CreatingRequest)?;
        let request = self.client.post(&self.config.endpoint_url);

        tracker.enter(ProgressEvent::AttachingPayload)?;
        let mut payload = UploadPayload::new();
        payload.set_image(
            self.config.image_field_name.clone(),
            self.config.placeholder_filename.clone(),
            stream,
        );
        payload.add_text_field(self.config.key_field_name.clone(), self.config.api_key.clone());
        let form = payload.build_form()?;

        tracker.enter(ProgressEvent::Uploading)?;
        log::info!(
            "Posting image to {} (key {})",
            self.config.endpoint_url,
            InputValidator::mask_api_key(&self.config.api_key)
        );
        let response = request.multipart(form).send().await.map_err(|e| {
            log::error!("Upload request to {} failed: {}", self.config.endpoint_url, e);
            map_reqwest_error(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            log::warn!(
                "Upload to {} returned HTTP {}",
                self.config.endpoint_url,
                status
            );
            return Err(FailureReason::NonOkStatus(status.as_u16()));
        }

        tracker.enter(ProgressEvent::DownloadingResponse)?;
        let body = read_body(response, self.config.max_response_bytes).await?;
        log::debug!(
            "Upload response (first 300 chars): {}",
            &body.chars().take(300).collect::<String>()
        );
        Ok(body)
    }
}

/// Accumulate the response body chunk by chunk until the stream ends.
/// Without a cap the whole body is buffered, however large.
async fn read_body(response: reqwest::Response, max_bytes: Option<u64>) -> Result<String, FailureReason> {
    let mut body = Vec::new();
    let mut chunks = response.bytes_stream();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        if let Some(max) = max_bytes {
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > max {
                return Err(FailureReason::network(format!(
                    "response exceeded {} bytes",
                    max
                )));
            }
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// The parts of one upload: the image first, then the text fields, in the
/// order they were added.
#[derive(Debug, Default)]
pub struct UploadPayload {
    image: Option<(String, String, ImageStream)>, // (field_name, filename, stream)
    text_fields: Vec<(String, String)>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image(&mut self, field_name: String, filename: String, stream: ImageStream) {
        self.image = Some((field_name, filename, stream));
    }

    pub fn add_text_field(&mut self, key: String, value: String) {
        self.text_fields.push((key, value));
    }

    pub fn build_form(self) -> Result<multipart::Form, FailureReason> {
        let mut form = multipart::Form::new();

        if let Some((field_name, filename, stream)) = self.image {
            let mime_type = stream.mime_type().to_string();
            let handle = stream.handle().to_string();
            let length = stream.length();
            let body = Body::wrap_stream(ReaderStream::new(stream.into_reader()));

            let part = match length {
                Some(len) => Part::stream_with_length(body, len),
                None => Part::stream(body),
            };
            // A filename is mandatory: without it the part is read as a URL
            let part = part
                .file_name(filename)
                .mime_str(&mime_type)
                .map_err(|e| {
                    FailureReason::stream_unavailable(
                        &handle,
                        format!("unusable content type '{}': {}", mime_type, e),
                    )
                })?;

            form = form.part(field_name, part);
        }

        for (key, value) in self.text_fields {
            form = form.text(key, value);
        }

        Ok(form)
    }
}
