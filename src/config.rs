use crate::charset::Charset;
use std::path::PathBuf;

/// Default maximum number of values a form may hold
pub const DEFAULT_MAX_VALUES: usize = 1000;
/// Default maximum size of a single text value
pub const DEFAULT_MAX_ATTRIBUTE_SIZE: usize = 2048;
/// Default maximum size of a part's header block
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8 * 1024;

/// When file parts are moved from memory to a spool file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Spool {
    /// Every file part is written to disk as soon as its headers are read
    #[default]
    Immediately,
    /// File parts stay in memory until they grow beyond the given number of bytes
    Above(usize),
}

/// Limits and storage settings for a single parse
///
/// The defaults accept up to 1000 values of at most 2KiB each with no limit on file or entity size:
/// ```
/// # use mpart_form::{FormConfig, Spool};
/// let config = FormConfig::new()
///     .max_file_size(10 * 1024 * 1024)
///     .max_entity_size(50 * 1024 * 1024)
///     .spool(Spool::Above(64 * 1024));
///
/// assert_eq!(config.get_max_values(), 1000);
/// ```
#[derive(Debug, Clone)]
pub struct FormConfig {
    max_values: usize,
    max_attribute_size: usize,
    max_file_size: Option<u64>,
    max_entity_size: Option<u64>,
    max_header_size: usize,
    spool: Spool,
    temp_dir: PathBuf,
    default_charset: Charset,
}

impl Default for FormConfig {
    fn default() -> Self {
        FormConfig {
            max_values: DEFAULT_MAX_VALUES,
            max_attribute_size: DEFAULT_MAX_ATTRIBUTE_SIZE,
            max_file_size: None,
            max_entity_size: None,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            spool: Spool::default(),
            temp_dir: std::env::temp_dir(),
            default_charset: Charset::default(),
        }
    }
}

impl FormConfig {
    /// Construct a config with the default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of values across all names
    pub fn max_values(mut self, max: usize) -> Self {
        self.max_values = max;
        self
    }

    /// Set the maximum decoded size of a single text value
    pub fn max_attribute_size(mut self, max: usize) -> Self {
        self.max_attribute_size = max;
        self
    }

    /// Set the maximum decoded size of a single file part
    pub fn max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }

    /// Set the maximum decoded size of the whole body
    pub fn max_entity_size(mut self, max: u64) -> Self {
        self.max_entity_size = Some(max);
        self
    }

    /// Set the maximum size of a part's header block
    pub fn max_header_size(mut self, max: usize) -> Self {
        self.max_header_size = max;
        self
    }

    /// Set when file parts move to disk
    pub fn spool(mut self, spool: Spool) -> Self {
        self.spool = spool;
        self
    }

    /// Set the directory spool files are created in
    pub fn temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Set the charset used when neither the part nor the request declares one
    pub fn default_charset(mut self, charset: Charset) -> Self {
        self.default_charset = charset;
        self
    }

    pub fn get_max_values(&self) -> usize {
        self.max_values
    }

    pub fn get_max_attribute_size(&self) -> usize {
        self.max_attribute_size
    }

    pub fn get_max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn get_max_entity_size(&self) -> Option<u64> {
        self.max_entity_size
    }

    pub fn get_max_header_size(&self) -> usize {
        self.max_header_size
    }

    pub fn get_spool(&self) -> Spool {
        self.spool
    }

    pub fn get_temp_dir(&self) -> &PathBuf {
        &self.temp_dir
    }

    pub fn get_default_charset(&self) -> Charset {
        self.default_charset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = FormConfig::default();
        assert_eq!(config.get_max_values(), DEFAULT_MAX_VALUES);
        assert_eq!(config.get_max_attribute_size(), DEFAULT_MAX_ATTRIBUTE_SIZE);
        assert_eq!(config.get_max_file_size(), None);
        assert_eq!(config.get_max_entity_size(), None);
        assert_eq!(config.get_spool(), Spool::Immediately);
        assert_eq!(config.get_default_charset(), Charset::Utf8);
    }

    #[test]
    fn builder_overrides() {
        let config = FormConfig::new()
            .max_values(3)
            .max_file_size(10)
            .spool(Spool::Above(4))
            .temp_dir("/var/tmp/uploads");

        assert_eq!(config.get_max_values(), 3);
        assert_eq!(config.get_max_file_size(), Some(10));
        assert_eq!(config.get_spool(), Spool::Above(4));
        assert_eq!(config.get_temp_dir(), &PathBuf::from("/var/tmp/uploads"));
    }
}
