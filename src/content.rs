//! Chunked byte payloads.
//!
//! [`Content`] is a finite stream of [`Bytes`] chunks with an optional
//! declared total size.  Zero chunks is an explicit empty value, which is
//! different from a key having no entry at all.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::errors::StorageError;

/// Upper bound on the buffer reserved up front from a declared size.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// Chunked byte payload.
pub struct Content {
    /// Declared total size, if known up front.
    size: Option<u64>,
    chunks: BoxStream<'static, anyhow::Result<Bytes>>,
}

impl Content {
    /// Content with zero chunks and a declared size of zero.
    pub fn empty() -> Self {
        Self {
            size: Some(0),
            chunks: stream::empty().boxed(),
        }
    }

    /// Single-chunk content of known size.  Empty input yields zero chunks.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            return Self::empty();
        }
        Self {
            size: Some(data.len() as u64),
            chunks: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    /// Content made of the given chunks; the size is their summed length.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let chunks: Vec<Bytes> = chunks.into_iter().collect();
        let size = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            size: Some(size),
            chunks: stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }

    /// Wrap an arbitrary chunk stream.  `size` is `None` when unknown; the
    /// content then ends when the stream ends.
    pub fn from_stream<S>(chunks: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self {
            size,
            chunks: chunks.boxed(),
        }
    }

    /// Declared total size, if known.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Drain every chunk into one contiguous buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes, StorageError> {
        // The declared size is advisory; never reserve more than a bounded hint.
        let capacity = self.size.unwrap_or(0).min(MAX_PREALLOCATION as u64) as usize;
        let mut buf = BytesMut::with_capacity(capacity);
        while let Some(chunk) = self.chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for Content {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.as_mut().poll_next(cx)
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Content {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for Content {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl From<String> for Content {
    fn from(data: String) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static str> for Content {
    fn from(data: &'static str) -> Self {
        Self::from_bytes(data)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
