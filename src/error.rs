use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub(crate) type AnyStdError = Box<dyn StdError + Send + Sync + 'static>;

/// Which configured limit a [`FormError::LimitExceeded`] tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// A single text value (or url-encoded name/value) grew beyond `max_attribute_size`
    Attribute,
    /// A single file part grew beyond `max_file_size`
    File,
    /// The whole request body grew beyond `max_entity_size`
    Entity,
    /// More than `max_values` values were added to the store
    Values,
    /// A part's header block grew beyond `max_header_size`
    Headers,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LimitKind::Attribute => "attribute size",
            LimitKind::File => "file size",
            LimitKind::Entity => "entity size",
            LimitKind::Values => "value count",
            LimitKind::Headers => "header size",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`FormError`]
///
/// Lets callers map a failure onto a response without matching every variant,
/// i.e, `Limit(_)` becomes `413 Payload Too Large` and `Protocol` becomes `400 Bad Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The body is not valid for its declared format
    Protocol,
    /// A configured limit was crossed
    Limit(LimitKind),
    /// Spool storage or the chunk source failed
    Io,
    /// The API was used incorrectly (wrong value variant, parser re-used after failure)
    Usage,
}

#[derive(Error, Debug)]
/// The Standard Error Type
pub enum FormError {
    /// Given if a part header line cannot be parsed
    #[error("Malformed header: {0}")]
    MalformedHeader(&'static str),
    /// Given if a header name or value contains invalid bytes
    #[error("Invalid Header Value")]
    InvalidHeader,
    /// Given if there is garbage after the boundary
    #[error("Garbage following boundary: {0:02x?}")]
    GarbageAfterBoundary(u8),
    /// Given if a base64 encoded part is not valid base64
    #[error(transparent)]
    InvalidBase64(#[from] base64::DecodeError),
    /// Given if the stream ends before the first boundary
    #[error("EOF while reading boundary")]
    EOFWhileReadingBoundary,
    /// Given if the stream ends when reading headers
    #[error("EOF while reading headers")]
    EOFWhileReadingHeaders,
    /// Given if the stream ends when reading the body and there is no end boundary
    #[error("EOF while reading body")]
    EOFWhileReadingBody,
    /// Given if one of the configured limits is crossed
    #[error("Request exceeds the configured {kind} limit of {limit}")]
    LimitExceeded {
        /// The limit which was crossed
        kind: LimitKind,
        /// The configured maximum
        limit: u64,
    },
    /// Given if a spool file could not be created or written
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Given if there is an error in the underlying stream
    #[error(transparent)]
    Stream(AnyStdError),
    /// Given if the parse was cancelled before it completed
    #[error("Parse was cancelled")]
    Cancelled,
    /// Given if a parser is used again after it failed
    #[error("Parser was aborted by an earlier error")]
    Aborted,
    /// Given if a file value is read as text
    #[error("Form value is a file, not text")]
    NotText,
    /// Given if a text value is read as a file
    #[error("Form value is text, not a file")]
    NotAFile,
}

impl FormError {
    pub(crate) fn limit(kind: LimitKind, limit: impl TryInto<u64>) -> Self {
        FormError::LimitExceeded {
            kind,
            limit: limit.try_into().unwrap_or(u64::MAX),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormError::MalformedHeader(_)
            | FormError::InvalidHeader
            | FormError::GarbageAfterBoundary(_)
            | FormError::InvalidBase64(_)
            | FormError::EOFWhileReadingBoundary
            | FormError::EOFWhileReadingHeaders
            | FormError::EOFWhileReadingBody => ErrorKind::Protocol,
            FormError::LimitExceeded { kind, .. } => ErrorKind::Limit(*kind),
            FormError::Io(_) | FormError::Stream(_) | FormError::Cancelled => ErrorKind::Io,
            FormError::Aborted | FormError::NotText | FormError::NotAFile => ErrorKind::Usage,
        }
    }

    /// The limit which was crossed, if this is a limit error
    pub fn limit_kind(&self) -> Option<LimitKind> {
        match self {
            FormError::LimitExceeded { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
