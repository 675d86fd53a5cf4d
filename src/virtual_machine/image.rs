//! Image memory: the flat, bounds-checked array of cells holding both code and
//! data for one run, plus decoders for boot image files.
//!
//! Addresses are plain cells. Every access goes through [`Image::read`] and
//! [`Image::write`], which reject addresses outside `[0, capacity)`.

use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::VMError;

/// Default image capacity, in cells.
pub const DEFAULT_IMAGE_SIZE: usize = 50_000;

/// Size of one cell in an image file.
pub const CELL_BYTES: usize = size_of::<Cell>();

/// Fixed-capacity cell memory.
#[derive(Clone, Debug)]
pub struct Image {
    cells: Box<[Cell]>,
}

impl Image {
    /// Builds an image of `capacity` cells with `boot` copied into the low
    /// addresses and every remaining cell zeroed.
    pub fn load(boot: &[Cell], capacity: usize) -> Result<Self, VMError> {
        if capacity > Cell::MAX as usize {
            return Err(VMError::InvalidCapacity { capacity });
        }
        if boot.len() > capacity {
            return Err(VMError::ImageTooLarge {
                len: boot.len(),
                capacity,
            });
        }
        let mut cells = vec![0; capacity].into_boxed_slice();
        cells[..boot.len()].copy_from_slice(boot);
        Ok(Self { cells })
    }

    /// Number of addressable cells.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Reads the cell at `addr`.
    #[inline(always)]
    pub fn read(&self, addr: Cell) -> Result<Cell, VMError> {
        let idx = self.index(addr)?;
        Ok(self.cells[idx])
    }

    /// Writes `value` to the cell at `addr`.
    #[inline(always)]
    pub fn write(&mut self, addr: Cell, value: Cell) -> Result<(), VMError> {
        let idx = self.index(addr)?;
        self.cells[idx] = value;
        Ok(())
    }

    /// Fails with [`VMError::OutOfBounds`] unless `addr` is inside the image.
    #[inline(always)]
    pub fn check(&self, addr: Cell) -> Result<(), VMError> {
        self.index(addr).map(|_| ())
    }

    #[inline(always)]
    fn index(&self, addr: Cell) -> Result<usize, VMError> {
        usize::try_from(addr)
            .ok()
            .filter(|&idx| idx < self.cells.len())
            .ok_or(VMError::OutOfBounds {
                addr: i64::from(addr),
                capacity: self.cells.len(),
            })
    }

    /// Reads the null-terminated string starting at `addr`.
    ///
    /// Each cell holds one character code. Codes that are not Unicode scalar
    /// values are replaced with U+FFFD.
    pub fn read_string(&self, addr: Cell) -> Result<String, VMError> {
        let mut out = String::new();
        let mut at = addr;
        loop {
            let code = self.read(at)?;
            if code == 0 {
                return Ok(out);
            }
            out.push(u32::try_from(code).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}'));
            at = at.checked_add(1).ok_or(VMError::OutOfBounds {
                addr: i64::from(at) + 1,
                capacity: self.cells.len(),
            })?;
        }
    }

    /// Full contents, address order.
    pub fn as_slice(&self) -> &[Cell] {
        &self.cells
    }
}

/// Byte order of cells in an image file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Decodes a raw image file: consecutive 32-bit cells in `endian` order.
pub fn decode_cells(bytes: &[u8], endian: Endian) -> Result<Vec<Cell>, VMError> {
    if bytes.len() % CELL_BYTES != 0 {
        return Err(VMError::MalformedImage {
            reason: format!(
                "{} bytes is not a whole number of {}-byte cells",
                bytes.len(),
                CELL_BYTES
            ),
        });
    }
    Ok(bytes
        .chunks_exact(CELL_BYTES)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            match endian {
                Endian::Little => Cell::from_le_bytes(raw),
                Endian::Big => Cell::from_be_bytes(raw),
            }
        })
        .collect())
}

/// Reverses the byte order of every cell in place.
///
/// Fixes up images saved on a host of the opposite endianness.
pub fn swap_endian(cells: &mut [Cell]) {
    for cell in cells {
        *cell = cell.swap_bytes();
    }
}

/// Parses an image written as signed integers separated by commas and/or
/// whitespace, e.g. `8, 1774, 2692, -1`.
pub fn parse_cells(text: &str) -> Result<Vec<Cell>, VMError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .enumerate()
        .map(|(idx, tok)| {
            tok.parse::<Cell>().map_err(|e| VMError::MalformedImage {
                reason: format!("cell {idx}: {tok:?}: {e}"),
            })
        })
        .collect()
}
