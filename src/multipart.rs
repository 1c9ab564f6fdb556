//! The `multipart/form-data` state machine.
//!
//! [`MultipartScanner`] is fed chunks of a request body and calls a [`PartHandler`] as it
//! recognises part headers, part bodies and boundaries. It never buffers a part body: body bytes
//! are decoded and handed over as soon as it is certain they are not the start of a boundary.

use crate::encoding::Decoder;
use crate::error::{FormError, LimitKind};
use crate::headers::header_str;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use log::debug;
use memchr::memchr;
use std::mem;

/// Receives the parts recognised by a [`MultipartScanner`]
///
/// Calls always arrive in the order `begin_part`, zero or more `data`, `end_part`, once per part.
/// Returning an error from any of them aborts the scan.
pub trait PartHandler {
    /// A part's header block was read
    fn begin_part(&mut self, headers: HeaderMap<HeaderValue>) -> Result<(), FormError>;

    /// Decoded body bytes of the current part
    fn data(&mut self, bytes: &[u8]) -> Result<(), FormError>;

    /// The current part's closing boundary was read
    fn end_part(&mut self) -> Result<(), FormError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Skipping everything up to the first boundary. `matched` bytes of the boundary were seen
    Preamble { matched: usize },
    /// Just after a boundary, deciding between another part and the end
    BoundaryTail(Tail),
    HeaderName,
    HeaderValue,
    /// A `\r` ended a header line
    HeaderLineEnd,
    /// A `\r` started an empty line
    HeadersEnd,
    /// Streaming a part body. `matched` bytes of the boundary are held back
    Body { matched: usize },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tail {
    Start,
    Dash,
    Cr,
}

/// An incremental `multipart/form-data` parser
///
/// ```
/// # use mpart_form::multipart::{MultipartScanner, PartHandler};
/// # use mpart_form::FormError;
/// # use http::header::{HeaderMap, HeaderValue};
/// #[derive(Default)]
/// struct Count(usize);
///
/// impl PartHandler for Count {
///     fn begin_part(&mut self, _headers: HeaderMap<HeaderValue>) -> Result<(), FormError> {
///         self.0 += 1;
///         Ok(())
///     }
///     fn data(&mut self, _bytes: &[u8]) -> Result<(), FormError> {
///         Ok(())
///     }
///     fn end_part(&mut self) -> Result<(), FormError> {
///         Ok(())
///     }
/// }
///
/// let mut scanner = MultipartScanner::new("XYZ");
/// let mut count = Count::default();
///
/// scanner.feed(b"--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--X", &mut count)?;
/// scanner.feed(b"YZ--\r\n", &mut count)?;
/// scanner.finish()?;
///
/// assert_eq!(count.0, 1);
/// # Ok::<(), FormError>(())
/// ```
#[derive(Debug)]
pub struct MultipartScanner {
    /// `\r\n--` followed by the boundary
    boundary: Bytes,
    phase: Phase,
    name: BytesMut,
    value: BytesMut,
    /// A complete header line waits in `name`/`value` in case the next line continues it
    line_pending: bool,
    headers: HeaderMap<HeaderValue>,
    header_size: usize,
    max_header_size: usize,
    decoder: Decoder,
}

impl MultipartScanner {
    /// Construct a scanner for the boundary given in the `Content-Type` header (without leading dashes)
    pub fn new<I: Into<Bytes>>(boundary: I) -> Self {
        let boundary = boundary.into();

        let mut token = BytesMut::with_capacity(boundary.len() + 4);
        token.extend_from_slice(b"\r\n--");
        token.extend_from_slice(&boundary);

        MultipartScanner {
            boundary: token.freeze(),
            // the body may open with the boundary directly, as if a line break preceded it
            phase: Phase::Preamble { matched: 2 },
            name: BytesMut::new(),
            value: BytesMut::new(),
            line_pending: false,
            headers: HeaderMap::new(),
            header_size: 0,
            max_header_size: crate::config::DEFAULT_MAX_HEADER_SIZE,
            decoder: Decoder::Identity,
        }
    }

    /// Limit the size of a single part's header block
    pub fn with_max_header_size(mut self, max: usize) -> Self {
        self.max_header_size = max;
        self
    }

    /// Whether the closing boundary has been read
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Scan the next chunk of the body
    pub fn feed<H: PartHandler>(&mut self, chunk: &[u8], handler: &mut H) -> Result<(), FormError> {
        let mut idx = 0;

        while idx < chunk.len() {
            match self.phase {
                Phase::Preamble { matched } => idx = self.scan_preamble(chunk, idx, matched),
                Phase::Body { matched } => idx = self.scan_body(chunk, idx, matched, handler)?,
                // anything after the closing boundary is epilogue
                Phase::Done => return Ok(()),
                _ => {
                    self.step(chunk[idx], handler)?;
                    idx += 1;
                }
            }
        }

        Ok(())
    }

    /// Signal the end of the body, failing if the closing boundary was never read
    pub fn finish(&mut self) -> Result<(), FormError> {
        match self.phase {
            Phase::Done => Ok(()),
            Phase::Preamble { .. } | Phase::BoundaryTail(_) => {
                Err(FormError::EOFWhileReadingBoundary)
            }
            Phase::Body { .. } => Err(FormError::EOFWhileReadingBody),
            Phase::HeaderName
            | Phase::HeaderValue
            | Phase::HeaderLineEnd
            | Phase::HeadersEnd => Err(FormError::EOFWhileReadingHeaders),
        }
    }

    fn scan_preamble(&mut self, chunk: &[u8], mut idx: usize, mut matched: usize) -> usize {
        while idx < chunk.len() {
            if chunk[idx] == self.boundary[matched] {
                matched += 1;
                idx += 1;

                if matched == self.boundary.len() {
                    debug!("Found first boundary");
                    self.phase = Phase::BoundaryTail(Tail::Start);
                    return idx;
                }
            } else if matched > 0 {
                // look at this byte again as a possible start of the boundary
                matched = 0;
            } else {
                idx = memchr(b'\r', &chunk[idx..]).map_or(chunk.len(), |off| idx + off);
            }
        }

        self.phase = Phase::Preamble { matched };
        idx
    }

    fn scan_body<H: PartHandler>(
        &mut self,
        chunk: &[u8],
        mut idx: usize,
        mut matched: usize,
        handler: &mut H,
    ) -> Result<usize, FormError> {
        // boundary bytes matched at the end of the previous chunk
        let mut carried = matched;
        // first byte of this chunk not yet handed to the decoder
        let start = idx;
        // where the partial match in this chunk began
        let mut match_start = idx;

        while idx < chunk.len() {
            if matched == 0 {
                match memchr(b'\r', &chunk[idx..]) {
                    Some(off) => {
                        idx += off + 1;
                        match_start = idx - 1;
                        matched = 1;
                    }
                    None => idx = chunk.len(),
                }
                continue;
            }

            if chunk[idx] == self.boundary[matched] {
                matched += 1;
                idx += 1;

                if matched == self.boundary.len() {
                    self.decoder.decode(&chunk[start..match_start], handler)?;
                    self.decoder.finish(handler)?;
                    handler.end_part()?;

                    debug!("Found boundary, part finished");
                    self.phase = Phase::BoundaryTail(Tail::Start);
                    return Ok(idx);
                }
            } else {
                if carried > 0 {
                    // the partial match held back from the previous chunk was body data
                    self.decoder.decode(&self.boundary[..carried], handler)?;
                    carried = 0;
                }
                matched = 0;
            }
        }

        let flush_end = if matched == 0 {
            chunk.len()
        } else if carried > 0 {
            // the whole chunk is still a candidate boundary
            start
        } else {
            match_start
        };
        self.decoder.decode(&chunk[start..flush_end], handler)?;

        self.phase = Phase::Body { matched };
        Ok(idx)
    }

    fn step<H: PartHandler>(&mut self, byte: u8, handler: &mut H) -> Result<(), FormError> {
        if let Phase::BoundaryTail(tail) = self.phase {
            self.phase = match (tail, byte) {
                (Tail::Start, b'-') => Phase::BoundaryTail(Tail::Dash),
                (Tail::Start, b'\r') => Phase::BoundaryTail(Tail::Cr),
                // transport padding
                (Tail::Start, b' ' | b'\t') => Phase::BoundaryTail(Tail::Start),
                (Tail::Dash, b'-') => {
                    debug!("Found closing boundary");
                    Phase::Done
                }
                (Tail::Cr, b'\n') => {
                    self.headers = HeaderMap::new();
                    self.header_size = 0;
                    Phase::HeaderName
                }
                _ => return Err(FormError::GarbageAfterBoundary(byte)),
            };
            return Ok(());
        }

        self.header_size += 1;
        if self.header_size > self.max_header_size {
            return Err(FormError::limit(LimitKind::Headers, self.max_header_size));
        }

        match self.phase {
            Phase::HeaderName => {
                // the previous line still sits in `name`/`value`
                if self.line_pending {
                    if byte == b' ' || byte == b'\t' {
                        // folded line, continues the previous value
                        self.value.extend_from_slice(&[byte]);
                        self.phase = Phase::HeaderValue;
                        return Ok(());
                    }
                    self.commit_header()?;
                }

                match byte {
                    b'\r' if self.name.is_empty() => self.phase = Phase::HeadersEnd,
                    b':' if self.name.is_empty() => {
                        return Err(FormError::MalformedHeader("empty header name"))
                    }
                    b':' => self.phase = Phase::HeaderValue,
                    b'\r' | b'\n' => {
                        return Err(FormError::MalformedHeader("header line without a colon"))
                    }
                    _ => self.name.extend_from_slice(&[byte]),
                }
            }
            Phase::HeaderValue => match byte {
                b'\r' => self.phase = Phase::HeaderLineEnd,
                b'\n' => return Err(FormError::MalformedHeader("bare line feed in header")),
                b' ' | b'\t' if self.value.is_empty() => {}
                _ => self.value.extend_from_slice(&[byte]),
            },
            Phase::HeaderLineEnd => {
                if byte != b'\n' {
                    return Err(FormError::MalformedHeader("carriage return without line feed"));
                }
                self.line_pending = true;
                self.phase = Phase::HeaderName;
            }
            Phase::HeadersEnd => {
                if byte != b'\n' {
                    return Err(FormError::MalformedHeader("carriage return without line feed"));
                }
                if self.line_pending {
                    self.commit_header()?;
                }

                let headers = mem::take(&mut self.headers);
                self.decoder =
                    Decoder::for_encoding(header_str(&headers, "content-transfer-encoding"));

                debug!("Part headers read, streaming body with {:?}", self.decoder);
                handler.begin_part(headers)?;
                self.phase = Phase::Body { matched: 0 };
            }
            _ => {}
        }

        Ok(())
    }

    fn commit_header(&mut self) -> Result<(), FormError> {
        let name = HeaderName::from_bytes(&self.name).map_err(|_| FormError::InvalidHeader)?;

        let trimmed_len = self
            .value
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |pos| pos + 1);
        let value = HeaderValue::from_bytes(&self.value[..trimmed_len])
            .map_err(|_| FormError::InvalidHeader)?;

        self.headers.append(name, value);
        self.name.clear();
        self.value.clear();
        self.line_pending = false;

        Ok(())
    }
}
