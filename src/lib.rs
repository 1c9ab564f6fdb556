//! # Streaming form decoding
//!
//! This crate decodes `multipart/form-data` and `application/x-www-form-urlencoded` request bodies into a
//! [`FormData`] as the body arrives, chunk by chunk. Chunks may be split anywhere, including in the
//! middle of a boundary or an escape sequence.
//!
//! Multipart file parts are kept in memory or written to spool files in a temporary directory,
//! depending on [`FormConfig::spool`]. Limits on value count, value size, file size and body size are
//! enforced while parsing, and a failed or cancelled parse removes every spool file it created.
//!
//! ```no_run
//! # use mpart_form::{FormConfig, FormParser, Spool};
//! # fn main() -> Result<(), mpart_form::FormError> {
//! let config = FormConfig::new()
//!     .max_file_size(10 * 1024 * 1024)
//!     .spool(Spool::Above(64 * 1024));
//!
//! let mut parser = FormParser::multipart("AaB03x", config);
//! let form = parser.parse_blocking(std::io::stdin())?;
//!
//! for (name, values) in form.iter() {
//!     for value in values {
//!         match value.file_value() {
//!             Ok(file) => println!("{name}: {} ({} bytes)", file.file_name(), file.item().size()),
//!             Err(_) => println!("{name}: {}", value.value()?),
//!         }
//!     }
//! }
//!
//! // the caller decides when uploads are no longer needed
//! if let Some(form) = parser.into_form_data() {
//!     form.delete_files();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! With the `filestream` feature (on by default) the parser can also be driven on tokio's blocking pool with
//! [`FormParser::parse_offloaded`], and spooled uploads can be streamed back out with `FileItem::stream`.

mod charset;
mod config;
mod encoding;
mod error;
mod headers;
pub mod multipart;
mod parser;
mod store;
mod stream;
mod upload;
mod urlencoded;
mod value;

#[cfg(feature = "filestream")]
pub mod filestream;

pub use charset::Charset;
pub use config::{
    FormConfig, Spool, DEFAULT_MAX_ATTRIBUTE_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_VALUES,
};
pub use error::{ErrorKind, FormError, LimitKind};
pub use parser::{FormParser, Input, ParseStream, Submit};
pub use store::FormData;
pub use stream::{ByteStream, ChunkedStream};
pub use upload::UploadAssembler;
pub use urlencoded::UrlEncodedScanner;
pub use value::{FileItem, FileValue, FormValue, TextValue};
