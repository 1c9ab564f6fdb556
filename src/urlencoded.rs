//! The `application/x-www-form-urlencoded` state machine.

use crate::charset::Charset;
use crate::config::FormConfig;
use crate::encoding::hex_value;
use crate::error::{FormError, LimitKind};
use crate::store::FormData;
use crate::value::FormValue;
use bytes::BytesMut;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Name,
    NameEscaped(Percent),
    Value,
    ValueEscaped(Percent),
    Done,
}

/// How far into a `%XX` escape the scanner is
#[derive(Debug, Clone, Copy, PartialEq)]
enum Percent {
    Start,
    /// First hex digit seen (decoded value, raw byte)
    Digit(u8, u8),
}

/// An incremental parser for url-encoded bodies
///
/// Pairs are added to the given [`FormData`] as soon as their closing `&` is read.
#[derive(Debug)]
pub struct UrlEncodedScanner {
    phase: Phase,
    name: BytesMut,
    value: BytesMut,
    charset: Charset,
    max_attribute_size: usize,
    max_entity_size: Option<u64>,
    entity_size: u64,
}

impl UrlEncodedScanner {
    pub fn new(config: &FormConfig) -> Self {
        UrlEncodedScanner {
            phase: Phase::Name,
            name: BytesMut::new(),
            value: BytesMut::new(),
            charset: config.get_default_charset(),
            max_attribute_size: config.get_max_attribute_size(),
            max_entity_size: config.get_max_entity_size(),
            entity_size: 0,
        }
    }

    /// Whether [`UrlEncodedScanner::finish`] has run
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Scan the next chunk of the body
    pub fn feed(&mut self, chunk: &[u8], store: &mut FormData) -> Result<(), FormError> {
        self.entity_size += chunk.len() as u64;
        if let Some(max) = self.max_entity_size {
            if self.entity_size > max {
                return Err(FormError::limit(LimitKind::Entity, max));
            }
        }

        let mut idx = 0;

        while idx < chunk.len() {
            let byte = chunk[idx];

            match self.phase {
                Phase::Name => match byte {
                    b'=' => self.phase = Phase::Value,
                    b'&' => self.emit(store)?,
                    b'%' => self.phase = Phase::NameEscaped(Percent::Start),
                    b'+' => self.push(b' ')?,
                    _ => self.push(byte)?,
                },
                Phase::Value => match byte {
                    b'&' => {
                        self.emit(store)?;
                        self.phase = Phase::Name;
                    }
                    b'%' => self.phase = Phase::ValueEscaped(Percent::Start),
                    b'+' => self.push(b' ')?,
                    _ => self.push(byte)?,
                },
                Phase::NameEscaped(percent) | Phase::ValueEscaped(percent) => {
                    let next = self.unescaped_phase();

                    match (percent, hex_value(byte)) {
                        (Percent::Start, Some(high)) => {
                            self.phase = self.escaped_phase(Percent::Digit(high, byte));
                        }
                        (Percent::Digit(high, _), Some(low)) => {
                            self.phase = next;
                            self.push((high << 4) | low)?;
                        }
                        // not an escape, keep what was seen and read this byte again
                        (Percent::Start, None) => {
                            self.phase = next;
                            self.push(b'%')?;
                            continue;
                        }
                        (Percent::Digit(_, raw), None) => {
                            self.phase = next;
                            self.push(b'%')?;
                            self.push(raw)?;
                            continue;
                        }
                    }
                }
                Phase::Done => return Ok(()),
            }

            idx += 1;
        }

        Ok(())
    }

    /// Signal the end of the body, adding whatever pair is still open
    pub fn finish(&mut self, store: &mut FormData) -> Result<(), FormError> {
        match self.phase {
            Phase::Done => return Ok(()),
            Phase::NameEscaped(percent) | Phase::ValueEscaped(percent) => {
                self.phase = self.unescaped_phase();
                self.push(b'%')?;
                if let Percent::Digit(_, raw) = percent {
                    self.push(raw)?;
                }
            }
            Phase::Name | Phase::Value => {}
        }

        self.emit(store)?;
        self.phase = Phase::Done;

        debug!("Finished url-encoded body, {} values", store.len());
        Ok(())
    }

    fn unescaped_phase(&self) -> Phase {
        match self.phase {
            Phase::NameEscaped(_) => Phase::Name,
            Phase::ValueEscaped(_) => Phase::Value,
            phase => phase,
        }
    }

    fn escaped_phase(&self, percent: Percent) -> Phase {
        match self.phase {
            Phase::Name | Phase::NameEscaped(_) => Phase::NameEscaped(percent),
            _ => Phase::ValueEscaped(percent),
        }
    }

    /// Append a decoded byte to the name or value being read
    fn push(&mut self, byte: u8) -> Result<(), FormError> {
        let target = match self.phase {
            Phase::Name | Phase::NameEscaped(_) => &mut self.name,
            _ => &mut self.value,
        };

        if target.len() >= self.max_attribute_size {
            return Err(FormError::limit(
                LimitKind::Attribute,
                self.max_attribute_size,
            ));
        }

        target.extend_from_slice(&[byte]);
        Ok(())
    }

    /// Add the pair read so far. Pairs without a name are skipped
    fn emit(&mut self, store: &mut FormData) -> Result<(), FormError> {
        if self.name.is_empty() {
            self.value.clear();
            return Ok(());
        }

        let name = self.charset.decode(&self.name).into_owned();
        let value = self.charset.decode(&self.value).into_owned();
        self.name.clear();
        self.value.clear();

        debug!("Read url-encoded pair `{name}`");
        store.add(name, FormValue::decoded_text(value, self.charset, None))
    }
}
