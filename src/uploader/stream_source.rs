use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

use crate::errors::FailureReason;
use crate::security::InputValidator;

/// Opaque reference to a local image: a filesystem path, a `file://` URI,
/// or any key a custom [`StreamSource`] understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceHandle {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for ResourceHandle {
    fn from(value: PathBuf) -> Self {
        Self::new(value.to_string_lossy().into_owned())
    }
}

pub type ImageReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// An opened image. Owned by the pipeline for exactly one run; moving it
/// into the request body hands the reader to the transfer, which drops it
/// once the body has been sent or the request has failed.
pub struct ImageStream {
    reader: ImageReader,
    length: Option<u64>,
    mime_type: String,
    handle: String,
}

impl ImageStream {
    pub fn new(reader: ImageReader, length: Option<u64>, mime_type: impl Into<String>) -> Self {
        Self {
            reader,
            length,
            mime_type: mime_type.into(),
            handle: String::new(),
        }
    }

    /// Record which handle this stream was opened from, for error reports.
    pub fn with_handle(mut self, handle: &ResourceHandle) -> Self {
        self.handle = handle.as_str().to_string();
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn from_bytes(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let length = bytes.len() as u64;
        Self::new(Box::new(Cursor::new(bytes)), Some(length), mime_type)
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn into_reader(self) -> ImageReader {
        self.reader
    }
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream")
            .field("length", &self.length)
            .field("mime_type", &self.mime_type)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Resolves a resource handle to a readable byte stream.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self, handle: &ResourceHandle) -> Result<ImageStream, FailureReason>;
}

/// Opens handles as local files.
#[derive(Debug, Default, Clone)]
pub struct FileStreamSource;

impl FileStreamSource {
    pub fn new() -> Self {
        Self
    }

    fn resolve_path(handle: &ResourceHandle) -> Result<PathBuf, FailureReason> {
        let raw = handle.as_str();
        InputValidator::validate_resource_handle(raw)
            .map_err(|e| FailureReason::stream_unavailable(raw, e.to_string()))?;

        if raw.starts_with("file://") {
            let url = reqwest::Url::parse(raw)
                .map_err(|e| FailureReason::stream_unavailable(raw, e.to_string()))?;
            return url
                .to_file_path()
                .map_err(|_| FailureReason::stream_unavailable(raw, "URI does not name a local file"));
        }

        Ok(PathBuf::from(raw))
    }
}

#[async_trait]
impl StreamSource for FileStreamSource {
    async fn open(&self, handle: &ResourceHandle) -> Result<ImageStream, FailureReason> {
        let path = Self::resolve_path(handle)?;

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            log::error!("Unable to open image {}: {}", path.display(), e);
            FailureReason::stream_unavailable(handle.as_str(), e.to_string())
        })?;

        let metadata = file
            .metadata()
            .await
            .map_err(|e| FailureReason::stream_unavailable(handle.as_str(), e.to_string()))?;
        if !metadata.is_file() {
            return Err(FailureReason::stream_unavailable(
                handle.as_str(),
                "Path is not a file",
            ));
        }

        log::debug!(
            "Opened image stream {} ({} bytes)",
            path.display(),
            metadata.len()
        );

        Ok(ImageStream::new(
            Box::new(file),
            Some(metadata.len()),
            guess_mime_type(&path),
        ))
    }
}

/// Serves handles from in-memory buffers, e.g. images already decoded
/// from a clipboard or a share intent.
#[derive(Debug, Default, Clone)]
pub struct MemoryStreamSource {
    resources: HashMap<ResourceHandle, (Vec<u8>, String)>,
}

impl MemoryStreamSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(
        mut self,
        handle: impl Into<ResourceHandle>,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Self {
        self.resources
            .insert(handle.into(), (bytes, mime_type.to_string()));
        self
    }
}

#[async_trait]
impl StreamSource for MemoryStreamSource {
    async fn open(&self, handle: &ResourceHandle) -> Result<ImageStream, FailureReason> {
        match self.resources.get(handle) {
            Some((bytes, mime_type)) => Ok(ImageStream::from_bytes(bytes.clone(), mime_type.clone())),
            None => Err(FailureReason::stream_unavailable(
                handle.as_str(),
                "No such in-memory resource",
            )),
        }
    }
}

/// Detect MIME type based on file extension
pub fn guess_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("a/b/cat.PNG")), "image/png");
        assert_eq!(guess_mime_type(Path::new("cat.jpeg")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("cat")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_file_source_opens_path_and_file_uri() {
        let mut file = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        file.write_all(b"GIF89a").unwrap();

        let source = FileStreamSource::new();
        let stream = source
            .open(&ResourceHandle::from(file.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(stream.length(), Some(6));
        assert_eq!(stream.mime_type(), "image/gif");

        let uri = reqwest::Url::from_file_path(file.path()).unwrap();
        let stream = source.open(&ResourceHandle::new(uri.as_str())).await.unwrap();
        let mut contents = Vec::new();
        stream.into_reader().read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"GIF89a");
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_stream_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("definitely_does_not_exist.png");

        let result = FileStreamSource::new()
            .open(&ResourceHandle::from(missing))
            .await;
        assert!(matches!(result, Err(FailureReason::StreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_file_source_rejects_directories_and_empty_handles() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileStreamSource::new();

        let result = source.open(&ResourceHandle::from(dir.path().to_path_buf())).await;
        assert!(matches!(result, Err(FailureReason::StreamUnavailable { .. })));

        let result = source.open(&ResourceHandle::new("")).await;
        assert!(matches!(result, Err(FailureReason::StreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_memory_source() {
        let source = MemoryStreamSource::new().with_resource("clip", vec![1, 2, 3], "image/png");

        let stream = source.open(&ResourceHandle::new("clip")).await.unwrap();
        assert_eq!(stream.length(), Some(3));

        let result = source.open(&ResourceHandle::new("other")).await;
        assert!(matches!(result, Err(FailureReason::StreamUnavailable { .. })));
    }
}
