//! Line-oriented text mesh format.
//!
//! ```text
//! # comment
//! ! 2 2 1        <- subdivision: nx ny nz
//! 0.5 1e-3       <- leaf: one value per field column
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use smallvec::SmallVec;

use super::RecordSource;
use crate::error::{GridError, Result};

#[derive(Debug, Clone, PartialEq)]
enum TextRecord {
  None,
  Subdivision([i64; 3]),
  Leaf(SmallVec<[f64; 8]>),
}

/// Record source reading the text format from any buffered reader.
pub struct TextRecordSource<R> {
  reader: Option<R>,
  line: String,
  line_number: usize,
  record: TextRecord,
}

impl TextRecordSource<BufReader<File>> {
  /// Open a text mesh file.
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
    let file = File::open(path.as_ref())?;
    Ok(Self::new(BufReader::new(file)))
  }
}

impl<R: BufRead> TextRecordSource<R> {
  pub fn new(reader: R) -> Self {
    Self {
      reader: Some(reader),
      line: String::new(),
      line_number: 0,
      record: TextRecord::None,
    }
  }

  /// Read lines until one carries a record. Returns `false` at end of input.
  fn next_record_line(&mut self) -> Result<bool> {
    let reader = self
      .reader
      .as_mut()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "text mesh source is closed"))?;
    loop {
      self.line.clear();
      if reader.read_line(&mut self.line)? == 0 {
        return Ok(false);
      }
      self.line_number += 1;
      let trimmed = self.line.trim();
      if !trimmed.is_empty() && !trimmed.starts_with('#') {
        return Ok(true);
      }
    }
  }

  fn parse_line(&self) -> Result<TextRecord> {
    let trimmed = self.line.trim();
    if let Some(rest) = trimmed.strip_prefix('!') {
      let mut counts = [0i64; 3];
      let mut tokens = rest.split_whitespace();
      for count in counts.iter_mut() {
        let token = tokens.next().ok_or_else(|| {
          GridError::malformed(format!(
            "line {}: subdivision needs three counts",
            self.line_number
          ))
        })?;
        *count = token.parse().map_err(|_| {
          GridError::malformed(format!(
            "line {}: invalid subdivision count '{}'",
            self.line_number, token
          ))
        })?;
      }
      return Ok(TextRecord::Subdivision(counts));
    }

    let values = trimmed
      .split_whitespace()
      .map(|token| {
        token.parse::<f64>().map_err(|_| {
          GridError::malformed(format!(
            "line {}: invalid field value '{}'",
            self.line_number, token
          ))
        })
      })
      .collect::<Result<SmallVec<[f64; 8]>>>()?;
    Ok(TextRecord::Leaf(values))
  }
}

impl<R: BufRead> RecordSource for TextRecordSource<R> {
  fn open(&mut self) -> Result<()> {
    if self.reader.is_none() {
      return Err(io::Error::new(io::ErrorKind::NotConnected, "text mesh source is closed").into());
    }
    self.line_number = 0;
    self.record = TextRecord::None;
    Ok(())
  }

  fn close(&mut self) {
    self.reader = None;
    self.record = TextRecord::None;
  }

  fn advance(&mut self) -> Result<bool> {
    if !self.next_record_line()? {
      self.record = TextRecord::None;
      return Ok(false);
    }
    self.record = self.parse_line()?;
    Ok(true)
  }

  fn is_subdivision(&self) -> bool {
    matches!(self.record, TextRecord::Subdivision(_))
  }

  fn subdivision_counts(&self) -> [i64; 3] {
    match self.record {
      TextRecord::Subdivision(counts) => counts,
      _ => [0; 3],
    }
  }

  fn field_value(&self, index: usize) -> Result<f64> {
    match &self.record {
      TextRecord::Leaf(values) => values.get(index).copied().ok_or_else(|| {
        GridError::malformed(format!(
          "line {}: insufficient number of values ({} present, column {} requested)",
          self.line_number,
          values.len(),
          index
        ))
      }),
      _ => Err(GridError::malformed("field value requested outside a leaf record")),
    }
  }
}

#[cfg(test)]
#[path = "text_test.rs"]
mod text_test;
