//! In-memory chunk sources, handy for tests and for bodies that are already buffered.

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The `ByteStream` is a helper stream which yields a whole body as a single chunk
pub struct ByteStream {
    bytes: Option<Bytes>,
}

impl ByteStream {
    /// Create a new ByteStream based upon the byte slice (note: this will copy from the slice)
    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = BytesMut::new();

        buf.extend_from_slice(bytes);

        ByteStream {
            bytes: Some(buf.freeze()),
        }
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.as_mut().bytes.take().map(Ok))
    }
}

/// Yields a body in chunks of a fixed size, the last one possibly shorter
pub struct ChunkedStream {
    bytes: Bytes,
    chunk_size: usize,
}

impl ChunkedStream {
    pub fn new<I: Into<Bytes>>(bytes: I, chunk_size: usize) -> Self {
        ChunkedStream {
            bytes: bytes.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Stream for ChunkedStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let amt = self.chunk_size.min(self.bytes.len());

        if amt > 0 {
            let bytes = self.as_mut().bytes.split_to(amt);
            Poll::Ready(Some(Ok(bytes)))
        } else {
            Poll::Ready(None)
        }
    }
}
