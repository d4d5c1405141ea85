//! Seekable binary block format with an embedded refinement forest.
//!
//! The domain is covered by a coarse grid of blocks. Each block is either
//! refined into 2×2×2 child blocks or is a leaf block holding a fixed
//! `block_nx` grid of cells. The file stores the refinement structure as a
//! depth-first boolean forest and the leaf payloads as contiguous `f64`
//! blocks, so payloads are fetched by seeking.
//!
//! # Layout (little-endian)
//!
//! ```text
//! header   : i32 version (=1), offset_tree, offset_blocks, nw,
//!            nleafs, nparents, block_nx[3]
//! tree     : (nleafs + nparents) × i32   1 = leaf block, 0 = refined
//! blocks   : nleafs × (nw × cells) × f64  cell index x fastest, variable slowest
//! ```
//!
//! The coarse cell resolution is not stored and must be supplied by the
//! caller. The stream produced from it is:
//!
//! ```text
//! Subdivision(coarse / block_nx)
//!   per forest entry: refined -> Subdivision(2, 2, 2)
//!                     leaf    -> Subdivision(block_nx), Leaf × cells
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use smallvec::SmallVec;

use super::RecordSource;
use crate::error::{GridError, Result};

/// Only supported layout version.
pub const BLOCK_FORMAT_VERSION: i32 = 1;

/// Size in bytes of the fixed header.
pub const HEADER_BYTES: usize = 9 * 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BlockHeader {
  offset_tree: u64,
  offset_blocks: u64,
  nw: usize,
  nleafs: usize,
  nparents: usize,
  block_nx: [usize; 3],
  cells_per_block: usize,
  /// Payload size of one leaf block in bytes.
  block_bytes: u64,
}

impl BlockHeader {
  fn forest_len(&self) -> Result<usize> {
    self
      .nleafs
      .checked_add(self.nparents)
      .ok_or_else(|| GridError::malformed("forest size in block header overflows"))
  }

  /// Check that the forest and every payload lie inside a stream of
  /// `stream_len` bytes.
  fn check_extent(&self, stream_len: u64) -> Result<()> {
    let forest_end = (self.forest_len()? as u64)
      .checked_mul(4)
      .and_then(|bytes| bytes.checked_add(self.offset_tree));
    let blocks_end = (self.nleafs as u64)
      .checked_mul(self.block_bytes)
      .and_then(|bytes| bytes.checked_add(self.offset_blocks));
    for (what, end) in [("refinement forest", forest_end), ("block payload", blocks_end)] {
      match end {
        Some(end) if end <= stream_len => {}
        Some(end) => {
          return Err(GridError::malformed(format!(
            "{what} ends at byte {end} but the file holds {stream_len} bytes"
          )))
        }
        None => return Err(GridError::malformed(format!("{what} size in block header overflows"))),
      }
    }
    Ok(())
  }
}

/// Position of the reader within the record stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
  /// Opened; the coarse subdivision has not been emitted yet.
  BeforeStream,
  /// Between blocks; the next record comes from the forest.
  NonLeaf,
  /// Inside leaf block `block`; `offset` is the next cell to emit.
  InBlock { block: usize, offset: usize },
  AfterStream,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BlockRecord {
  None,
  Subdivision([i64; 3]),
  Leaf { offset: usize },
}

/// Record source reading the binary block format.
pub struct BlockRecordSource<R> {
  reader: Option<R>,
  coarse_resolution: [usize; 3],
  header: Option<BlockHeader>,
  forest: Vec<bool>,
  forest_pos: usize,
  /// Remaining child subtrees for each open non-leaf level.
  levels: SmallVec<[usize; 16]>,
  next_block: usize,
  block_values: Vec<f64>,
  state: StreamState,
  record: BlockRecord,
}

impl BlockRecordSource<BufReader<File>> {
  /// Open a block mesh file. `coarse_resolution` is the number of cells of
  /// the unrefined grid along each axis.
  pub fn from_path(path: impl AsRef<Path>, coarse_resolution: [usize; 3]) -> Result<Self> {
    let file = File::open(path.as_ref())?;
    Ok(Self::new(BufReader::new(file), coarse_resolution))
  }
}

impl<R: Read + Seek> BlockRecordSource<R> {
  pub fn new(reader: R, coarse_resolution: [usize; 3]) -> Self {
    Self {
      reader: Some(reader),
      coarse_resolution,
      header: None,
      forest: Vec::new(),
      forest_pos: 0,
      levels: SmallVec::new(),
      next_block: 0,
      block_values: Vec::new(),
      state: StreamState::AfterStream,
      record: BlockRecord::None,
    }
  }

  fn reader(&mut self) -> Result<&mut R> {
    self
      .reader
      .as_mut()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "block mesh source is closed").into())
  }

  fn header(&self) -> Result<&BlockHeader> {
    self
      .header
      .as_ref()
      .ok_or_else(|| GridError::malformed("block mesh source has not been opened"))
  }

  fn read_header(&mut self) -> Result<BlockHeader> {
    let reader = self.reader()?;
    reader.seek(SeekFrom::Start(0))?;
    let mut raw = [0i32; 9];
    for value in raw.iter_mut() {
      *value = read_i32(reader)?;
    }
    let [version, offset_tree, offset_blocks, nw, nleafs, nparents, bx, by, bz] = raw;

    if version != BLOCK_FORMAT_VERSION {
      return Err(GridError::malformed(format!(
        "unsupported block format version {version}"
      )));
    }
    let non_negative = |name: &str, value: i32| {
      usize::try_from(value)
        .map_err(|_| GridError::malformed(format!("negative {name} ({value}) in block header")))
    };
    let offset_tree = non_negative("tree offset", offset_tree)? as u64;
    let offset_blocks = non_negative("block offset", offset_blocks)? as u64;
    let nw = non_negative("variable count", nw)?;
    let nleafs = non_negative("leaf count", nleafs)?;
    let nparents = non_negative("parent count", nparents)?;
    let block_nx = [
      non_negative("block size", bx)?,
      non_negative("block size", by)?,
      non_negative("block size", bz)?,
    ];
    if block_nx.contains(&0) {
      return Err(GridError::malformed("block size must be positive on all axes"));
    }
    let cells_per_block = checked_product(block_nx)
      .ok_or_else(|| GridError::malformed(format!("block size {block_nx:?} overflows")))?;
    let block_bytes = cells_per_block
      .checked_mul(nw)
      .and_then(|values| values.checked_mul(8))
      .ok_or_else(|| GridError::malformed("block payload size overflows"))? as u64;

    Ok(BlockHeader {
      offset_tree,
      offset_blocks,
      nw,
      nleafs,
      nparents,
      block_nx,
      cells_per_block,
      block_bytes,
    })
  }

  fn read_forest(&mut self, header: &BlockHeader) -> Result<Vec<bool>> {
    let reader = self.reader()?;
    reader.seek(SeekFrom::Start(header.offset_tree))?;
    (0..header.forest_len()?)
      .map(|_| match read_i32(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(GridError::malformed(format!(
          "invalid forest entry {other}, expected 0 or 1"
        ))),
      })
      .collect()
  }

  fn coarse_blocks(&self, header: &BlockHeader) -> Result<[usize; 3]> {
    let mut blocks = [0usize; 3];
    for axis in 0..3 {
      let cells = self.coarse_resolution[axis];
      let nx = header.block_nx[axis];
      if cells == 0 || cells % nx != 0 {
        return Err(GridError::malformed(format!(
          "coarse resolution {cells} is not a positive multiple of block size {nx} on axis {axis}"
        )));
      }
      blocks[axis] = cells / nx;
    }
    if checked_product(blocks).is_none() {
      return Err(GridError::malformed(format!("coarse block grid {blocks:?} overflows")));
    }
    Ok(blocks)
  }

  /// Seek to a leaf block and load its payload.
  fn load_block(&mut self, block: usize) -> Result<()> {
    let header = *self.header()?;
    if block >= header.nleafs {
      return Err(GridError::malformed(format!(
        "forest references leaf block {block} but header declares {}",
        header.nleafs
      )));
    }
    // In bounds of the stream: checked when the source was opened.
    let start = header.offset_blocks + block as u64 * header.block_bytes;
    let mut bytes = vec![0u8; header.block_bytes as usize];
    let reader = self.reader()?;
    reader.seek(SeekFrom::Start(start))?;
    reader.read_exact(&mut bytes).map_err(short_read)?;
    self.block_values = bytes
      .chunks_exact(8)
      .map(|chunk| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        f64::from_le_bytes(raw)
      })
      .collect();
    Ok(())
  }
}

impl<R: Read + Seek> RecordSource for BlockRecordSource<R> {
  fn open(&mut self) -> Result<()> {
    let header = self.read_header()?;
    let stream_len = self.reader()?.seek(SeekFrom::End(0))?;
    header.check_extent(stream_len)?;
    self.forest = self.read_forest(&header)?;
    self.coarse_blocks(&header)?;
    self.header = Some(header);
    self.forest_pos = 0;
    self.levels.clear();
    self.next_block = 0;
    self.block_values.clear();
    self.state = StreamState::BeforeStream;
    self.record = BlockRecord::None;
    Ok(())
  }

  fn close(&mut self) {
    self.reader = None;
    self.block_values = Vec::new();
    self.state = StreamState::AfterStream;
    self.record = BlockRecord::None;
  }

  fn advance(&mut self) -> Result<bool> {
    loop {
      match self.state {
        StreamState::BeforeStream => {
          let header = *self.header()?;
          let blocks = self.coarse_blocks(&header)?;
          self.levels.push(blocks.iter().product());
          self.record = BlockRecord::Subdivision(blocks.map(|n| n as i64));
          self.state = StreamState::NonLeaf;
          return Ok(true);
        }
        StreamState::NonLeaf => {
          while self.levels.last() == Some(&0) {
            self.levels.pop();
          }
          let Some(remaining) = self.levels.last_mut() else {
            self.state = StreamState::AfterStream;
            if self.forest_pos != self.forest.len() {
              return Err(GridError::malformed(format!(
                "forest has {} superfluous entries",
                self.forest.len() - self.forest_pos
              )));
            }
            continue;
          };
          *remaining -= 1;

          let is_leaf = *self
            .forest
            .get(self.forest_pos)
            .ok_or_else(|| GridError::malformed("refinement forest ends prematurely"))?;
          self.forest_pos += 1;

          if is_leaf {
            let block = self.next_block;
            self.next_block += 1;
            self.load_block(block)?;
            let block_nx = self.header()?.block_nx;
            self.record = BlockRecord::Subdivision(block_nx.map(|n| n as i64));
            self.state = StreamState::InBlock { block, offset: 0 };
          } else {
            self.levels.push(8);
            self.record = BlockRecord::Subdivision([2, 2, 2]);
          }
          return Ok(true);
        }
        StreamState::InBlock { block, offset } => {
          if offset < self.header()?.cells_per_block {
            self.record = BlockRecord::Leaf { offset };
            self.state = StreamState::InBlock {
              block,
              offset: offset + 1,
            };
            return Ok(true);
          }
          self.state = StreamState::NonLeaf;
        }
        StreamState::AfterStream => {
          self.record = BlockRecord::None;
          return Ok(false);
        }
      }
    }
  }

  fn is_subdivision(&self) -> bool {
    matches!(self.record, BlockRecord::Subdivision(_))
  }

  fn subdivision_counts(&self) -> [i64; 3] {
    match self.record {
      BlockRecord::Subdivision(counts) => counts,
      _ => [0; 3],
    }
  }

  fn field_value(&self, index: usize) -> Result<f64> {
    let BlockRecord::Leaf { offset } = self.record else {
      return Err(GridError::malformed("field value requested outside a leaf record"));
    };
    let header = self.header()?;
    if index >= header.nw {
      return Err(GridError::malformed(format!(
        "block file has {} variables, column {} requested",
        header.nw, index
      )));
    }
    Ok(self.block_values[index * header.cells_per_block + offset])
  }
}

fn checked_product(values: [usize; 3]) -> Option<usize> {
  values.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

fn read_i32(reader: &mut impl Read) -> Result<i32> {
  let mut raw = [0u8; 4];
  reader.read_exact(&mut raw).map_err(short_read)?;
  Ok(i32::from_le_bytes(raw))
}

fn short_read(err: io::Error) -> GridError {
  if err.kind() == io::ErrorKind::UnexpectedEof {
    GridError::malformed("block file is truncated")
  } else {
    err.into()
  }
}

#[cfg(test)]
#[path = "block_test.rs"]
mod block_test;
