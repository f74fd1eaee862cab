// Upload pipeline - opens the image, posts it, parses the reply
//
// One `Uploader` runs any number of independent uploads; each submission
// gets its own worker task and reports back over a channel.

pub mod imgur_client;
pub mod progress_tracker;
pub mod response_parser;
pub mod stream_source;
pub mod upload_task;

pub use imgur_client::{ImgurClient, UploadPayload};
pub use progress_tracker::{NullProgressSink, ProgressEvent, ProgressSink, ProgressTracker};
pub use response_parser::{ImgurResponseParser, RawApiResponse, ResponseParser};
pub use stream_source::{FileStreamSource, ImageStream, MemoryStreamSource, ResourceHandle, StreamSource};
pub use upload_task::{PendingUpload, UploadEvent, UploadOutcome, UploadSink, Uploader};
