use crate::charset::Charset;
use crate::error::FormError;
use crate::headers::header_str;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use log::{debug, warn};
use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A single decoded form value
///
/// This is either a simple text value or an uploaded file. Asking a value for the wrong variant is
/// an error rather than a conversion: a file is never read as text.
#[derive(Debug)]
pub enum FormValue {
    /// A text value, from a url-encoded pair or a multipart part without a file name
    Text(TextValue),
    /// A multipart part with a file name
    File(FileValue),
}

/// A text form value
#[derive(Debug, Clone)]
pub struct TextValue {
    value: String,
    charset: Option<Charset>,
    headers: Option<HeaderMap<HeaderValue>>,
}

/// An uploaded file form value
#[derive(Debug)]
pub struct FileValue {
    item: FileItem,
    file_name: String,
    headers: HeaderMap<HeaderValue>,
}

/// Where the content of an uploaded file lives
#[derive(Debug)]
pub enum FileItem {
    /// Small uploads kept in memory
    Memory(Bytes),
    /// Uploads spooled to a temporary file
    Spooled {
        /// The spool file
        path: PathBuf,
        /// Number of bytes written to the spool file
        size: u64,
    },
    /// An upload moved out of temporary storage with [`FileItem::write_to`]
    Persisted {
        /// Where the upload now lives
        path: PathBuf,
        /// Size of the upload
        size: u64,
    },
}

impl FormValue {
    /// Construct a text value
    pub fn text<I: Into<String>>(value: I) -> Self {
        FormValue::Text(TextValue {
            value: value.into(),
            charset: None,
            headers: None,
        })
    }

    pub(crate) fn decoded_text(
        value: String,
        charset: Charset,
        headers: Option<HeaderMap<HeaderValue>>,
    ) -> Self {
        FormValue::Text(TextValue {
            value,
            charset: Some(charset),
            headers,
        })
    }

    /// Construct a file value
    pub fn file<I: Into<String>>(item: FileItem, file_name: I, headers: HeaderMap<HeaderValue>) -> Self {
        FormValue::File(FileValue {
            item,
            file_name: file_name.into(),
            headers,
        })
    }

    /// Whether this is an uploaded file
    pub fn is_file(&self) -> bool {
        matches!(self, FormValue::File(_))
    }

    /// The text of this value, or [`FormError::NotText`] if it is a file
    pub fn value(&self) -> Result<&str, FormError> {
        match self {
            FormValue::Text(text) => Ok(&text.value),
            FormValue::File(_) => Err(FormError::NotText),
        }
    }

    /// The uploaded file, or [`FormError::NotAFile`] if this is text
    pub fn file_value(&self) -> Result<&FileValue, FormError> {
        match self {
            FormValue::File(file) => Ok(file),
            FormValue::Text(_) => Err(FormError::NotAFile),
        }
    }

    /// The file content, or [`FormError::NotAFile`] if this is text
    pub fn file_item(&self) -> Result<&FileItem, FormError> {
        self.file_value().map(FileValue::item)
    }

    /// The original file name of an upload
    pub fn file_name(&self) -> Option<&str> {
        match self {
            FormValue::File(file) => Some(&file.file_name),
            FormValue::Text(_) => None,
        }
    }

    /// The charset the text was decoded with, if it was decoded from the request
    pub fn charset(&self) -> Option<Charset> {
        match self {
            FormValue::Text(text) => text.charset,
            FormValue::File(_) => None,
        }
    }

    /// The part headers this value was read from, if it came from a multipart body
    pub fn headers(&self) -> Option<&HeaderMap<HeaderValue>> {
        match self {
            FormValue::Text(text) => text.headers.as_ref(),
            FormValue::File(file) => Some(&file.headers),
        }
    }
}

impl TextValue {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn into_value(self) -> String {
        self.value
    }
}

impl FileValue {
    /// The content of the upload
    pub fn item(&self) -> &FileItem {
        &self.item
    }

    /// Mutable access to the content, i.e, to move it with [`FileItem::write_to`]
    pub fn item_mut(&mut self) -> &mut FileItem {
        &mut self.item
    }

    /// The file name the client sent
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The part headers
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// The content type of the upload.
    ///
    /// Taken from the part's `Content-Type` header, or guessed from the file name when the header is missing
    pub fn content_type(&self) -> Cow<'_, str> {
        if let Some(content_type) = header_str(&self.headers, CONTENT_TYPE.as_str()) {
            return Cow::Borrowed(content_type);
        }

        #[cfg(feature = "filestream")]
        {
            Cow::Owned(
                mime_guess::from_path(&self.file_name)
                    .first_or_octet_stream()
                    .to_string(),
            )
        }

        #[cfg(not(feature = "filestream"))]
        {
            Cow::Borrowed("application/octet-stream")
        }
    }
}

impl FileItem {
    /// Size of the content in bytes
    pub fn size(&self) -> u64 {
        match self {
            FileItem::Memory(bytes) => bytes.len() as u64,
            FileItem::Spooled { size, .. } | FileItem::Persisted { size, .. } => *size,
        }
    }

    /// Whether the content is held in memory
    pub fn is_in_memory(&self) -> bool {
        matches!(self, FileItem::Memory(_))
    }

    /// The spool file, if the content was written to disk
    pub fn path(&self) -> Option<&Path> {
        match self {
            FileItem::Memory(_) => None,
            FileItem::Spooled { path, .. } | FileItem::Persisted { path, .. } => Some(path),
        }
    }

    /// Read the whole content
    pub fn bytes(&self) -> io::Result<Bytes> {
        match self {
            FileItem::Memory(bytes) => Ok(bytes.clone()),
            FileItem::Spooled { path, .. } | FileItem::Persisted { path, .. } => {
                fs::read(path).map(Bytes::from)
            }
        }
    }

    /// Persist the content at `target`.
    ///
    /// A spool file is renamed (or copied and removed if it lives on another file system), after
    /// which this item refers to `target` and [`FileItem::delete`] leaves it alone.
    pub fn write_to<P: AsRef<Path>>(&mut self, target: P) -> io::Result<()> {
        let target = target.as_ref();

        let size = match self {
            FileItem::Memory(bytes) => {
                fs::write(target, &bytes[..])?;
                bytes.len() as u64
            }
            FileItem::Spooled { path, size } | FileItem::Persisted { path, size } => {
                if fs::rename(&*path, target).is_err() {
                    fs::copy(&*path, target)?;
                    fs::remove_file(&*path)?;
                }
                debug!("Moved upload {path:?} to {target:?}");
                *size
            }
        };

        *self = FileItem::Persisted {
            path: target.to_path_buf(),
            size,
        };
        Ok(())
    }

    /// Remove the spool file, if any. Missing files are not an error
    pub fn delete(&self) -> io::Result<()> {
        match self {
            FileItem::Memory(_) | FileItem::Persisted { .. } => Ok(()),
            FileItem::Spooled { path, .. } => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    /// [`FileItem::delete`], logging instead of failing
    pub(crate) fn delete_logged(&self) {
        if let Err(err) = self.delete() {
            warn!("Could not delete spool file {:?}: {err}", self.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn wrong_variant_fails() {
        let text = FormValue::text("abc");
        assert_eq!(text.value().unwrap(), "abc");
        assert!(matches!(text.file_value(), Err(FormError::NotAFile)));
        assert!(!text.is_file());
        assert_eq!(text.file_name(), None);

        let file = FormValue::file(
            FileItem::Memory(Bytes::from_static(b"hi")),
            "t.txt",
            HeaderMap::new(),
        );
        assert!(matches!(file.value(), Err(FormError::NotText)));
        assert_eq!(file.file_name(), Some("t.txt"));
        assert_eq!(file.file_item().unwrap().size(), 2);
    }

    #[test]
    fn content_type_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-custom"));

        let file = FormValue::file(FileItem::Memory(Bytes::new()), "photo.jpg", headers);
        assert_eq!(file.file_value().unwrap().content_type(), "application/x-custom");
    }

    #[cfg(feature = "filestream")]
    #[test]
    fn content_type_guessed() {
        let file = FormValue::file(FileItem::Memory(Bytes::new()), "photo.jpg", HeaderMap::new());
        assert_eq!(file.file_value().unwrap().content_type(), "image/jpeg");
    }

    #[test]
    fn spooled_item_reads_and_moves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.tmp");
        fs::File::create(&path).unwrap().write_all(b"content").unwrap();

        let mut item = FileItem::Spooled {
            path: path.clone(),
            size: 7,
        };
        assert!(!item.is_in_memory());
        assert_eq!(item.bytes().unwrap(), Bytes::from_static(b"content"));

        let target = dir.path().join("kept.txt");
        item.write_to(&target).unwrap();

        assert!(!path.exists());
        assert_eq!(fs::read(&target).unwrap(), b"content");
        // the moved file is no longer ours to delete
        item.delete().unwrap();
        assert!(target.exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.tmp");
        fs::write(&path, b"x").unwrap();

        let item = FileItem::Spooled { path: path.clone(), size: 1 };
        item.delete().unwrap();
        item.delete().unwrap();
        assert!(!path.exists());
    }
}
