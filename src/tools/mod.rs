//! Small utilities shared across the pipeline.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

pub mod retry;
pub mod system;
pub mod watch;

/// A pinned, boxed byte stream, used to feed file contents into multipart uploads.
pub type PinnedBytesStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Unpin + Send>>;
