//! Collects the parts of a multipart body into a [`FormData`].
//!
//! Text parts are buffered in memory. File parts are buffered until the configured [`Spool`]
//! threshold is crossed and then continue into a temporary file.

use crate::charset::Charset;
use crate::config::{FormConfig, Spool};
use crate::error::{FormError, LimitKind};
use crate::headers::{parse_disposition, part_charset, Disposition};
use crate::multipart::PartHandler;
use crate::store::FormData;
use crate::value::{FileItem, FormValue};
use bytes::BytesMut;
use http::header::{HeaderMap, HeaderValue};
use log::{debug, warn};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

const SPOOL_NAME_ATTEMPTS: usize = 32;

/// An open spool file for one part
#[derive(Debug)]
struct SpoolFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SpoolFile {
    /// Create a uniquely named file in `dir`, recording its path in `created` before anything is written
    fn create(dir: &Path, created: &mut Vec<PathBuf>) -> io::Result<Self> {
        for _ in 0..SPOOL_NAME_ATTEMPTS {
            let suffix: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            let path = dir.join(format!("mpart-upload-{suffix}.tmp"));

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!("Created spool file {path:?}");
                    created.push(path.clone());
                    return Ok(SpoolFile {
                        path,
                        writer: BufWriter::new(file),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "failed to allocate a unique spool file",
        ))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    /// Flush and close the file, returning where it lives
    fn close(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

#[derive(Debug)]
struct Part {
    /// `None` for parts without a `form-data` name, whose content is dropped
    name: Option<String>,
    file_name: Option<String>,
    headers: HeaderMap<HeaderValue>,
    charset: Charset,
    size: u64,
    buffer: BytesMut,
    spool: Option<SpoolFile>,
}

/// A [`PartHandler`] which stores every part as a [`FormValue`]
///
/// Every spool file created during the parse is tracked. Unless the parse completes with
/// [`UploadAssembler::into_form_data`], they are all deleted on [`UploadAssembler::abort`] or drop.
#[derive(Debug)]
pub struct UploadAssembler {
    config: FormConfig,
    store: FormData,
    entity_size: u64,
    part: Option<Part>,
    spool_files: Vec<PathBuf>,
}

impl UploadAssembler {
    pub fn new(config: FormConfig) -> Self {
        UploadAssembler {
            store: FormData::new(config.get_max_values()),
            config,
            entity_size: 0,
            part: None,
            spool_files: Vec::new(),
        }
    }

    /// Hand over the store, along with responsibility for its spool files
    pub fn into_form_data(mut self) -> FormData {
        self.spool_files.clear();
        mem::replace(&mut self.store, FormData::new(0))
    }

    /// Close any open spool file and delete every spool file created so far
    pub fn abort(&mut self) {
        // drop the open handle before deleting
        self.part = None;

        for path in self.spool_files.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Deleted spool file {path:?}"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Could not delete spool file {path:?}: {err}"),
            }
        }
    }

    fn check_entity_size(&mut self, len: u64) -> Result<(), FormError> {
        self.entity_size += len;

        match self.config.get_max_entity_size() {
            Some(max) if self.entity_size > max => Err(FormError::limit(LimitKind::Entity, max)),
            _ => Ok(()),
        }
    }
}

impl PartHandler for UploadAssembler {
    fn begin_part(&mut self, headers: HeaderMap<HeaderValue>) -> Result<(), FormError> {
        let Disposition { name, file_name } =
            parse_disposition(&headers, self.config.get_default_charset());

        if name.is_none() {
            debug!("Part has no form-data name, discarding it");
        } else if self.store.len() >= self.store.max_values() {
            return Err(FormError::limit(LimitKind::Values, self.store.max_values()));
        }

        let charset = part_charset(&headers).unwrap_or(self.config.get_default_charset());

        let spool = match (&name, &file_name, self.config.get_spool()) {
            (Some(_), Some(_), Spool::Immediately) => Some(SpoolFile::create(
                self.config.get_temp_dir(),
                &mut self.spool_files,
            )?),
            _ => None,
        };

        debug!("Beginning part {name:?} (file: {file_name:?})");

        self.part = Some(Part {
            name,
            file_name,
            headers,
            charset,
            size: 0,
            buffer: BytesMut::new(),
            spool,
        });

        Ok(())
    }

    fn data(&mut self, bytes: &[u8]) -> Result<(), FormError> {
        let len = bytes.len() as u64;
        self.check_entity_size(len)?;

        let Some(part) = self.part.as_mut() else {
            return Ok(());
        };

        part.size += len;

        if part.file_name.is_some() {
            if let Some(max) = self.config.get_max_file_size() {
                if part.size > max {
                    return Err(FormError::limit(LimitKind::File, max));
                }
            }
        }

        if part.name.is_none() {
            return Ok(());
        }

        if let Some(spool) = part.spool.as_mut() {
            spool.write(bytes)?;
            return Ok(());
        }

        if part.file_name.is_none() {
            let max = self.config.get_max_attribute_size();
            if part.buffer.len() + bytes.len() > max {
                return Err(FormError::limit(LimitKind::Attribute, max));
            }
            part.buffer.extend_from_slice(bytes);
            return Ok(());
        }

        match self.config.get_spool() {
            Spool::Above(threshold) if part.buffer.len() + bytes.len() > threshold => {
                let mut spool =
                    SpoolFile::create(self.config.get_temp_dir(), &mut self.spool_files)?;

                debug!(
                    "Part crossed the {threshold} byte threshold, moving {} buffered bytes to {:?}",
                    part.buffer.len(),
                    spool.path
                );

                spool.write(&mem::take(&mut part.buffer))?;
                spool.write(bytes)?;
                part.spool = Some(spool);
            }
            _ => part.buffer.extend_from_slice(bytes),
        }

        Ok(())
    }

    fn end_part(&mut self) -> Result<(), FormError> {
        let Some(part) = self.part.take() else {
            return Ok(());
        };
        let Some(name) = part.name else {
            return Ok(());
        };

        let value = match part.file_name {
            Some(file_name) => {
                let item = match part.spool {
                    Some(spool) => FileItem::Spooled {
                        path: spool.close()?,
                        size: part.size,
                    },
                    None => FileItem::Memory(part.buffer.freeze()),
                };
                FormValue::file(item, file_name, part.headers)
            }
            None => FormValue::decoded_text(
                part.charset.decode(&part.buffer).into_owned(),
                part.charset,
                Some(part.headers),
            ),
        };

        debug!("Finished part `{name}` ({} bytes)", part.size);
        self.store.add(name, value)
    }
}

impl Drop for UploadAssembler {
    fn drop(&mut self) {
        if !self.spool_files.is_empty() {
            self.abort();
        }
    }
}
