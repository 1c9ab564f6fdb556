use crate::charset::Charset;
use crate::config::FormConfig;
use crate::error::{AnyStdError, FormError};
use crate::headers::get_dispo_param;
use crate::multipart::MultipartScanner;
use crate::store::FormData;
use crate::upload::UploadAssembler;
use crate::urlencoded::UrlEncodedScanner;
use bytes::Bytes;
use futures_core::{ready, Stream};
use log::debug;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io::{self, Read};
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// What the chunk source delivered next
#[derive(Debug)]
pub enum Input<'a> {
    /// The next bytes of the body
    Chunk(&'a [u8]),
    /// The body is complete
    End,
    /// The chunk source failed. The parse is aborted with this error
    Failed(FormError),
}

/// The result of [`FormParser::submit`]
#[derive(Debug)]
pub enum Submit<'a> {
    /// More input is needed
    Pending,
    /// The parse is over, either with the finished form or with the error which ended it
    Done(Result<&'a FormData, FormError>),
}

#[derive(Debug)]
enum Scanner {
    UrlEncoded {
        scanner: UrlEncodedScanner,
        store: FormData,
    },
    Multipart {
        scanner: MultipartScanner,
        assembler: UploadAssembler,
    },
}

impl Scanner {
    fn feed(&mut self, chunk: &[u8]) -> Result<(), FormError> {
        match self {
            Scanner::UrlEncoded { scanner, store } => scanner.feed(chunk, store),
            Scanner::Multipart { scanner, assembler } => scanner.feed(chunk, assembler),
        }
    }

    fn finish(&mut self) -> Result<(), FormError> {
        match self {
            Scanner::UrlEncoded { scanner, store } => scanner.finish(store),
            Scanner::Multipart { scanner, .. } => scanner.finish(),
        }
    }

    fn abort(&mut self) {
        if let Scanner::Multipart { assembler, .. } = self {
            assembler.abort();
        }
    }

    fn into_form_data(self) -> FormData {
        match self {
            Scanner::UrlEncoded { store, .. } => store,
            Scanner::Multipart { assembler, .. } => assembler.into_form_data(),
        }
    }
}

#[derive(Debug)]
enum State {
    Parsing(Scanner),
    Done(FormData),
    Failed,
    Cancelled,
}

/// Decodes one form submission into a [`FormData`]
///
/// The parser is driven in one of three ways:
/// * [`FormParser::submit`] hands it one [`Input`] at a time, for callers that receive chunks through callbacks
/// * [`FormParser::parse_blocking`] pulls the body from a [`Read`]
/// * [`FormParser::parse_stream`] polls a [`Stream`] of chunks
///
/// Once the body is parsed the result is cached: calling any of them again returns the same form without
/// reading anything. A parser which failed answers every later call with [`FormError::Aborted`].
///
/// Dropping the parser removes every spool file it created, unless the form was taken with
/// [`FormParser::into_form_data`].
///
/// ```
/// # use mpart_form::{FormConfig, FormParser};
/// let mut parser = FormParser::urlencoded(FormConfig::default());
///
/// let form = parser.parse_blocking(&b"a=1&b=hello%20world&a=2"[..])?;
///
/// assert_eq!(form.len(), 3);
/// assert_eq!(form.get_last("a").unwrap().value()?, "2");
/// # Ok::<(), mpart_form::FormError>(())
/// ```
#[derive(Debug)]
pub struct FormParser {
    state: State,
}

impl FormParser {
    /// Construct a parser for an `application/x-www-form-urlencoded` body
    pub fn urlencoded(config: FormConfig) -> Self {
        FormParser {
            state: State::Parsing(Scanner::UrlEncoded {
                scanner: UrlEncodedScanner::new(&config),
                store: FormData::new(config.get_max_values()),
            }),
        }
    }

    /// Construct a parser for a `multipart/form-data` body with the given boundary (without leading dashes)
    pub fn multipart<I: Into<Bytes>>(boundary: I, config: FormConfig) -> Self {
        let scanner =
            MultipartScanner::new(boundary).with_max_header_size(config.get_max_header_size());

        FormParser {
            state: State::Parsing(Scanner::Multipart {
                scanner,
                assembler: UploadAssembler::new(config),
            }),
        }
    }

    /// Construct a parser from a request's `Content-Type`.
    ///
    /// A `charset` parameter replaces the configured default charset. Returns `None` if the content type
    /// is not a form, or is multipart without a boundary.
    pub fn for_content_type(content_type: &str, config: FormConfig) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or_default().trim();

        let config = match get_dispo_param(content_type, "charset")
            .and_then(|label| Charset::from_label(&label))
        {
            Some(charset) => config.default_charset(charset),
            None => config,
        };

        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            return Some(FormParser::urlencoded(config));
        }

        if mime.eq_ignore_ascii_case("multipart/form-data") {
            let boundary = get_dispo_param(content_type, "boundary")?;
            return Some(FormParser::multipart(boundary.into_owned(), config));
        }

        None
    }

    /// Feed the next input to the parser
    pub fn submit(&mut self, input: Input<'_>) -> Submit<'_> {
        match self.advance(input) {
            Ok(false) => Submit::Pending,
            Ok(true) => Submit::Done(self.outcome()),
            Err(err) => Submit::Done(Err(err)),
        }
    }

    /// Read `reader` to the end and parse it
    pub fn parse_blocking<R: Read>(&mut self, mut reader: R) -> Result<&FormData, FormError> {
        let mut buffer = vec![0; READ_BUFFER_SIZE];

        while self.is_parsing() {
            let input = match reader.read(&mut buffer) {
                Ok(0) => Input::End,
                Ok(read) => Input::Chunk(&buffer[..read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => Input::Failed(FormError::Io(err)),
            };

            self.advance(input)?;
        }

        self.outcome()
    }

    /// Parse the chunks of `stream`.
    ///
    /// The returned future is pending whenever the stream is. If it is dropped early the parser stays
    /// unfinished and may be driven again, or dropped to clean up.
    pub fn parse_stream<S, E>(&mut self, stream: S) -> ParseStream<'_, S>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<AnyStdError>,
    {
        ParseStream {
            parser: Some(self),
            stream,
        }
    }

    /// Stop parsing and delete every spool file.
    ///
    /// The parser answers every later call with [`FormError::Cancelled`].
    pub fn cancel(&mut self) {
        match mem::replace(&mut self.state, State::Cancelled) {
            State::Parsing(mut scanner) => {
                debug!("Parse cancelled");
                scanner.abort();
            }
            State::Done(store) => store.discard(),
            State::Failed | State::Cancelled => {}
        }
    }

    /// The parsed form, once the body is complete
    pub fn form_data(&self) -> Option<&FormData> {
        match &self.state {
            State::Done(store) => Some(store),
            _ => None,
        }
    }

    /// Take the parsed form, including responsibility for deleting its spool files
    pub fn into_form_data(mut self) -> Option<FormData> {
        match mem::replace(&mut self.state, State::Cancelled) {
            State::Done(store) => Some(store),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub(crate) fn is_parsing(&self) -> bool {
        matches!(self.state, State::Parsing(_))
    }

    /// Run one input through the scanner. `Ok(true)` once the parse is over
    pub(crate) fn advance(&mut self, input: Input<'_>) -> Result<bool, FormError> {
        let State::Parsing(scanner) = &mut self.state else {
            return Ok(true);
        };

        let result = match input {
            Input::Chunk(chunk) => scanner.feed(chunk).map(|()| false),
            Input::End => scanner.finish().map(|()| true),
            Input::Failed(err) => Err(err),
        };

        match result {
            Ok(false) => Ok(false),
            Ok(true) => {
                if let State::Parsing(scanner) = mem::replace(&mut self.state, State::Failed) {
                    let store = scanner.into_form_data();
                    debug!("Parse finished with {} values", store.len());
                    self.state = State::Done(store);
                }
                Ok(true)
            }
            Err(err) => {
                debug!("Parse failed: {err}");
                if let State::Parsing(mut scanner) = mem::replace(&mut self.state, State::Failed) {
                    scanner.abort();
                }
                Err(err)
            }
        }
    }

    fn outcome(&self) -> Result<&FormData, FormError> {
        match &self.state {
            State::Done(store) => Ok(store),
            State::Cancelled => Err(FormError::Cancelled),
            State::Parsing(_) | State::Failed => Err(FormError::Aborted),
        }
    }
}

impl Drop for FormParser {
    fn drop(&mut self) {
        self.cancel();
    }
}

pin_project! {
    /// Future returned by [`FormParser::parse_stream`]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct ParseStream<'a, S> {
        parser: Option<&'a mut FormParser>,
        #[pin]
        stream: S,
    }
}

impl<'a, S, E> Future for ParseStream<'a, S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<AnyStdError>,
{
    type Output = Result<&'a FormData, FormError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            let Some(parser) = this.parser.as_deref_mut() else {
                // polled after completion
                return Poll::Ready(Err(FormError::Aborted));
            };

            if !parser.is_parsing() {
                break;
            }

            let advanced = match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => parser.advance(Input::Chunk(&bytes)),
                Some(Err(err)) => parser.advance(Input::Failed(FormError::Stream(err.into()))),
                None => parser.advance(Input::End),
            };

            if let Err(err) = advanced {
                *this.parser = None;
                return Poll::Ready(Err(err));
            }
        }

        match this.parser.take() {
            Some(parser) => {
                let parser: &'a FormParser = parser;
                Poll::Ready(parser.outcome())
            }
            None => Poll::Ready(Err(FormError::Aborted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Spool;
    use crate::error::{ErrorKind, LimitKind};
    use crate::stream::{ByteStream, ChunkedStream};
    use crate::value::FormValue;
    use std::fs;
    use std::path::Path;

    const EXAMPLE: &[u8] = b"--XYZ\r\n\
            Content-Disposition: form-data; name=\"field1\"\r\n\
            \r\n\
            abc\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"file1\"; filename=\"t.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            hi\r\n\
            --XYZ--\r\n";

    type Entry = (String, Option<String>, Vec<u8>);

    fn summary(store: &FormData) -> Vec<Entry> {
        store
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |value| match value {
                    FormValue::Text(text) => (name.to_string(), None, text.value().into()),
                    FormValue::File(file) => (
                        name.to_string(),
                        Some(file.file_name().to_string()),
                        file.item().bytes().unwrap().to_vec(),
                    ),
                })
            })
            .collect()
    }

    fn spool_count(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    fn submit_all(parser: &mut FormParser, chunks: &[&[u8]]) -> Result<Vec<Entry>, FormError> {
        for chunk in chunks {
            if let Submit::Done(result) = parser.submit(Input::Chunk(chunk)) {
                return result.map(summary);
            }
        }

        match parser.submit(Input::End) {
            Submit::Done(result) => result.map(summary),
            Submit::Pending => panic!("parser still pending after end of input"),
        }
    }

    #[test]
    fn parses_example() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let form = parser.parse_blocking(EXAMPLE).unwrap();

        assert_eq!(form.len(), 2);
        assert_eq!(form.get_first("field1").unwrap().value().unwrap(), "abc");

        let file = form.get_first("file1").unwrap().file_value().unwrap();
        assert_eq!(file.file_name(), "t.txt");
        assert_eq!(file.content_type(), "text/plain");
        assert_eq!(file.item().size(), 2);
        assert_eq!(file.item().bytes().unwrap(), &b"hi"[..]);
        assert_eq!(spool_count(dir.path()), 1);

        let form = parser.into_form_data().unwrap();
        assert_eq!(spool_count(dir.path()), 1);
        form.delete_files();
        assert_eq!(spool_count(dir.path()), 0);
    }

    #[test]
    fn chunking_invariance() {
        let dir = tempfile::tempdir().unwrap();
        let config = FormConfig::new()
            .spool(Spool::Above(1024))
            .temp_dir(dir.path());

        let expected = submit_all(&mut FormParser::multipart("XYZ", config.clone()), &[EXAMPLE])
            .unwrap();

        for split in 0..=EXAMPLE.len() {
            let mut parser = FormParser::multipart("XYZ", config.clone());
            let entries = submit_all(&mut parser, &[&EXAMPLE[..split], &EXAMPLE[split..]]);
            assert_eq!(entries.unwrap(), expected, "split at {split}");
        }

        for size in 1..8 {
            let chunks: Vec<&[u8]> = EXAMPLE.chunks(size).collect();
            let mut parser = FormParser::multipart("XYZ", config.clone());
            assert_eq!(submit_all(&mut parser, &chunks).unwrap(), expected);
        }

        assert_eq!(spool_count(dir.path()), 0);
    }

    #[test]
    fn spooled_parts_match_memory_parts() {
        let dir = tempfile::tempdir().unwrap();

        let in_memory = FormConfig::new()
            .spool(Spool::Above(1024))
            .temp_dir(dir.path());
        let expected = submit_all(&mut FormParser::multipart("XYZ", in_memory), &[EXAMPLE])
            .unwrap();

        for spool in [Spool::Immediately, Spool::Above(1)] {
            let config = FormConfig::new().spool(spool).temp_dir(dir.path());
            let chunks: Vec<&[u8]> = EXAMPLE.chunks(3).collect();

            let mut parser = FormParser::multipart("XYZ", config);
            assert_eq!(submit_all(&mut parser, &chunks).unwrap(), expected);

            // dropping a finished parser removes what it spooled
            drop(parser);
            assert_eq!(spool_count(dir.path()), 0);
        }
    }

    #[test]
    fn limits_leave_no_spool_files() {
        let dir = tempfile::tempdir().unwrap();

        let cases = [
            (FormConfig::new().max_file_size(1), LimitKind::File),
            (FormConfig::new().max_attribute_size(2), LimitKind::Attribute),
            (FormConfig::new().max_entity_size(4), LimitKind::Entity),
            (FormConfig::new().max_values(1), LimitKind::Values),
            (FormConfig::new().max_header_size(10), LimitKind::Headers),
        ];

        for (config, kind) in cases {
            let mut parser = FormParser::multipart("XYZ", config.temp_dir(dir.path()));

            let err = parser.parse_blocking(EXAMPLE).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Limit(kind));
            assert_eq!(spool_count(dir.path()), 0, "{kind} left spool files");

            assert!(matches!(parser.submit(Input::End), Submit::Done(Err(FormError::Aborted))));
        }
    }

    #[test]
    fn cancel_removes_spool_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let partial = &EXAMPLE[..EXAMPLE.len() - 12];
        assert!(matches!(parser.submit(Input::Chunk(partial)), Submit::Pending));
        assert_eq!(spool_count(dir.path()), 1);

        parser.cancel();
        assert_eq!(spool_count(dir.path()), 0);
        assert!(matches!(
            parser.submit(Input::Chunk(b"more")),
            Submit::Done(Err(FormError::Cancelled))
        ));
        assert!(parser.form_data().is_none());
    }

    #[test]
    fn drop_removes_spool_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let _ = parser.submit(Input::Chunk(&EXAMPLE[..EXAMPLE.len() - 12]));
        assert_eq!(spool_count(dir.path()), 1);

        drop(parser);
        assert_eq!(spool_count(dir.path()), 0);
    }

    #[test]
    fn source_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let _ = parser.submit(Input::Chunk(&EXAMPLE[..EXAMPLE.len() - 12]));
        let failure = FormError::Io(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));

        match parser.submit(Input::Failed(failure)) {
            Submit::Done(Err(err)) => assert_eq!(err.kind(), ErrorKind::Io),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(spool_count(dir.path()), 0);
    }

    #[test]
    fn finished_parse_is_cached() {
        struct FailingReader;

        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("read after completion"))
            }
        }

        let mut parser = FormParser::urlencoded(FormConfig::default());
        parser.parse_blocking(&b"a=1"[..]).unwrap();

        let form = parser.parse_blocking(FailingReader).unwrap();
        assert_eq!(form.get_first("a").unwrap().value().unwrap(), "1");
        assert!(matches!(parser.submit(Input::End), Submit::Done(Ok(_))));
    }

    #[test]
    fn truncated_body_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let err = parser
            .parse_blocking(&EXAMPLE[..EXAMPLE.len() - 12])
            .unwrap_err();

        assert!(matches!(err, FormError::EOFWhileReadingBody));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(spool_count(dir.path()), 0);
    }

    #[test]
    fn picks_parser_from_content_type() {
        let mut parser = FormParser::for_content_type(
            "application/x-www-form-urlencoded; charset=ISO-8859-1",
            FormConfig::default(),
        )
        .unwrap();
        let form = parser.parse_blocking(&b"caf%E9=1"[..]).unwrap();
        assert!(form.contains("café"));

        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::for_content_type(
            "multipart/form-data; boundary=\"XYZ\"",
            FormConfig::new().temp_dir(dir.path()),
        )
        .unwrap();
        assert_eq!(parser.parse_blocking(EXAMPLE).unwrap().len(), 2);

        assert!(FormParser::for_content_type("multipart/form-data", FormConfig::default()).is_none());
        assert!(FormParser::for_content_type("application/json", FormConfig::default()).is_none());
    }

    #[tokio::test]
    async fn parses_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = FormConfig::new()
            .spool(Spool::Above(1))
            .temp_dir(dir.path());

        let mut parser = FormParser::multipart("XYZ", config.clone());
        let form = parser
            .parse_stream(ChunkedStream::new(EXAMPLE, 5))
            .await
            .unwrap();
        let chunked = summary(form);

        let mut parser = FormParser::multipart("XYZ", config);
        let form = parser.parse_stream(ByteStream::new(EXAMPLE)).await.unwrap();
        assert_eq!(summary(form), chunked);

        // cached
        let form = parser.parse_stream(ByteStream::new(b"")).await.unwrap();
        assert_eq!(summary(form), chunked);
    }

    #[tokio::test]
    async fn stream_error_aborts() {
        use tokio_stream::StreamExt;

        let dir = tempfile::tempdir().unwrap();
        let mut parser = FormParser::multipart("XYZ", FormConfig::new().temp_dir(dir.path()));

        let chunks = tokio_stream::iter(vec![
            Ok(Bytes::from_static(&EXAMPLE[..EXAMPLE.len() - 12])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ])
        .chain(tokio_stream::iter(vec![Ok(Bytes::from_static(b"--XYZ--\r\n"))]));

        let err = parser.parse_stream(chunks).await.unwrap_err();

        assert!(matches!(err, FormError::Stream(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(spool_count(dir.path()), 0);
    }
}
