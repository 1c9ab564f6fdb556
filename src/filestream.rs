use crate::error::{AnyStdError, FormError};
use crate::parser::{FormParser, Input};
use crate::store::FormData;
use crate::value::FileItem;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio_util::codec::{BytesCodec, FramedRead};

/// Convenience wrapper around streaming out uploaded files.  Requires tokio
pub struct FileStream {
    inner: Inner,
}

enum Inner {
    Memory(Option<Bytes>),
    File(FramedRead<File, BytesCodec>),
}

impl Stream for FileStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            Inner::Memory(bytes) => Poll::Ready(bytes.take().filter(|bytes| !bytes.is_empty()).map(Ok)),
            Inner::File(framed) => Pin::new(framed).poll_next(cx).map_ok(BytesMut::freeze),
        }
    }
}

impl FileItem {
    /// Stream the content of the upload, reading spool files without blocking
    pub async fn stream(&self) -> io::Result<FileStream> {
        let inner = match self {
            FileItem::Memory(bytes) => Inner::Memory(Some(bytes.clone())),
            FileItem::Spooled { path, .. } | FileItem::Persisted { path, .. } => {
                Inner::File(FramedRead::new(File::open(path).await?, BytesCodec::new()))
            }
        };

        Ok(FileStream { inner })
    }
}

impl FormData {
    /// Delete every spool file on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn delete_files_in_background(self) -> JoinHandle<()> {
        spawn_blocking(move || self.discard())
    }
}

impl FormParser {
    /// Parse the chunks of `stream`, running the parser on tokio's blocking pool.
    ///
    /// The parser moves to a blocking thread for every chunk and back once the chunk is consumed,
    /// so spool file writes never stall the runtime. Must be called from within a tokio runtime.
    pub async fn parse_offloaded<S, E>(self, mut stream: S) -> Result<FormData, FormError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<AnyStdError>,
    {
        let mut parser = self;

        while parser.is_parsing() {
            let next = match stream.next().await {
                Some(Ok(bytes)) => Some(Ok(bytes)),
                Some(Err(err)) => Some(Err(FormError::Stream(err.into()))),
                None => None,
            };

            let (returned, advanced) = spawn_blocking(move || {
                let advanced = match next {
                    Some(Ok(bytes)) => parser.advance(Input::Chunk(&bytes)),
                    Some(Err(err)) => parser.advance(Input::Failed(err)),
                    None => parser.advance(Input::End),
                };
                (parser, advanced)
            })
            .await
            .map_err(|err| FormError::Io(io::Error::other(err)))?;

            parser = returned;
            advanced?;
        }

        parser.into_form_data().ok_or(FormError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FormConfig, Spool};
    use crate::stream::ChunkedStream;
    use futures_util::TryStreamExt;

    const BODY: &[u8] = b"--XYZ\r\n\
            Content-Disposition: form-data; name=\"file1\"; filename=\"t.txt\"\r\n\
            \r\n\
            hello world\r\n\
            --XYZ--\r\n";

    async fn collect(item: &FileItem) -> Vec<u8> {
        item.stream()
            .await
            .unwrap()
            .try_fold(Vec::new(), |mut buf, bytes| async move {
                buf.extend_from_slice(&bytes);
                Ok(buf)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn offloaded_parse_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let form = parser
            .parse_offloaded(ChunkedStream::new(BODY, 4))
            .await
            .unwrap();

        let item = form.get_first("file1").unwrap().file_item().unwrap();
        assert!(!item.is_in_memory());
        assert_eq!(collect(item).await, b"hello world");

        form.delete_files_in_background().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn memory_item_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = FormConfig::new()
            .spool(Spool::Above(1024))
            .temp_dir(dir.path());

        let form = FormParser::multipart("XYZ", config)
            .parse_offloaded(ChunkedStream::new(BODY, 7))
            .await
            .unwrap();

        let item = form.get_first("file1").unwrap().file_item().unwrap();
        assert!(item.is_in_memory());
        assert_eq!(collect(item).await, b"hello world");
    }

    #[tokio::test]
    async fn offloaded_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let err = parser
            .parse_offloaded(ChunkedStream::new(&BODY[..BODY.len() - 12], 8))
            .await
            .unwrap_err();

        assert!(matches!(err, FormError::EOFWhileReadingBody));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
