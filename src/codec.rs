//! Layout of the data inside one calibration cell.
//!
//! ```text
//! +---------+-------------------------+-------+-----------------+-------+-----
//! | version | pointer[0..R] (u16, BE) | count | count * 16 byte | count | ...
//! +---------+-------------------------+-------+-----------------+-------+-----
//! ```
//!
//! Pointers are absolute NVMEM addresses, the cell's start address has to be subtracted to get
//! the position inside the blob.

use crate::error::{Error, LayoutFault};
use crate::range::RangeTable;
use crate::raw::{COUNT_SIZE, ERASED, RANGE_POINTER_SIZE, RawUnit, SAVE_MARK, UNIT_SIZE, VERSION_SIZE};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

/// One linear segment of a calibration curve, applied to values below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationUnit {
    pub gain: f32,
    pub offset: f32,
    pub threshold: f32,
    pub is_use: bool,
}

impl CalibrationUnit {
    pub const fn new(gain: f32, offset: f32, threshold: f32) -> Self {
        Self {
            gain,
            offset,
            threshold,
            is_use: true,
        }
    }

    /// What every unit without the save mark reads as: identity, not in use.
    pub const fn unused() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
            threshold: 0.0,
            is_use: false,
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        self.gain as f64 * value + self.offset as f64
    }

    pub(crate) fn to_raw(self) -> RawUnit {
        if self.is_use {
            RawUnit::populated(self.gain, self.offset, self.threshold)
        } else {
            RawUnit::unused()
        }
    }
}

impl From<RawUnit> for CalibrationUnit {
    fn from(raw: RawUnit) -> Self {
        if raw.flag() == SAVE_MARK {
            CalibrationUnit::new(raw.gain(), raw.offset(), raw.threshold())
        } else {
            CalibrationUnit::unused()
        }
    }
}

/// Calibration units per range name.
pub type RangeUnits = BTreeMap<String, Vec<CalibrationUnit>>;

/// Result of decoding a cell. Every range of the table is present, ranges with an inconsistent
/// layout carry their error instead of units.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCell {
    pub version: u8,
    pub ranges: BTreeMap<String, Result<Vec<CalibrationUnit>, Error>>,
}

/// Size of the version byte plus the pointer table.
pub(crate) const fn min_header_size(range_count: usize) -> usize {
    VERSION_SIZE + range_count * RANGE_POINTER_SIZE
}

pub(crate) const fn pointer_position(slot: u8) -> usize {
    VERSION_SIZE + slot as usize * RANGE_POINTER_SIZE
}

/// Converts a range pointer into the position of the range's count byte inside the blob.
pub(crate) fn count_position(
    pointer: u16,
    start_address: u32,
    data_size: usize,
    range_count: usize,
) -> Result<usize, Error> {
    let position = pointer as i64 - start_address as i64;
    if position < min_header_size(range_count) as i64 || position >= data_size as i64 {
        return Err(Error::InvalidRangeLayout(LayoutFault::PointerOutOfBounds));
    }
    Ok(position as usize)
}

pub fn decode(blob: &[u8], start_address: u32, table: &RangeTable) -> DecodedCell {
    let ranges = table
        .iter()
        .map(|(name, slot)| {
            (
                name.to_string(),
                decode_range(blob, start_address, table.len(), slot),
            )
        })
        .collect();

    DecodedCell {
        version: blob.first().copied().unwrap_or(ERASED),
        ranges,
    }
}

/// Decodes the units of one range. Errors only concern this range.
pub fn decode_range(
    blob: &[u8],
    start_address: u32,
    range_count: usize,
    slot: u8,
) -> Result<Vec<CalibrationUnit>, Error> {
    let data_size = blob.len();
    let pointer_pos = pointer_position(slot);
    if pointer_pos + RANGE_POINTER_SIZE > data_size {
        return Err(Error::InvalidRangeLayout(LayoutFault::SlotOutOfBounds));
    }

    let pointer = u16::from_be_bytes([blob[pointer_pos], blob[pointer_pos + 1]]);
    let count_pos = count_position(pointer, start_address, data_size, range_count)?;
    let count = blob[count_pos] as usize;
    let units_pos = count_pos + COUNT_SIZE;
    let units_end = units_pos + count * UNIT_SIZE;
    if units_end > data_size {
        return Err(Error::InvalidRangeLayout(LayoutFault::UnitsOutOfBounds));
    }

    Ok(blob[units_pos..units_end]
        .chunks_exact(UNIT_SIZE)
        .map(|raw| RawUnit::from_slice(raw).into())
        .collect())
}

/// Lays out a complete cell of `data_size` bytes for a cell starting at `start_address`.
///
/// Ranges are placed in slot order right after the pointer table, ranges of the table without
/// units get a count of zero. Bytes behind the last range stay erased.
pub fn encode(
    table: &RangeTable,
    units: &RangeUnits,
    version: u8,
    start_address: u32,
    data_size: usize,
) -> Result<Vec<u8>, Error> {
    if units.keys().any(|name| !table.contains(name)) {
        return Err(Error::UnknownRange);
    }

    let mut offset = min_header_size(table.len());
    if offset > data_size {
        return Err(Error::CellOverflow);
    }

    let mut blob = vec![ERASED; data_size];
    blob[0] = version;

    for (name, slot) in table.iter() {
        let range_units = units.get(name).map(Vec::as_slice).unwrap_or(&[]);
        let count = u8::try_from(range_units.len()).map_err(|_| Error::CellOverflow)?;
        let end = offset + COUNT_SIZE + range_units.len() * UNIT_SIZE;
        if end > data_size {
            return Err(Error::CellOverflow);
        }
        let address = u16::try_from(start_address as usize + offset)
            .map_err(|_| Error::CellOverflow)?;

        let pointer_pos = pointer_position(slot);
        blob[pointer_pos..pointer_pos + RANGE_POINTER_SIZE].copy_from_slice(&address.to_be_bytes());
        blob[offset] = count;
        for (i, unit) in range_units.iter().enumerate() {
            let unit_pos = offset + COUNT_SIZE + i * UNIT_SIZE;
            blob[unit_pos..unit_pos + UNIT_SIZE].copy_from_slice(&unit.to_raw().0);
        }

        offset = end;
    }

    Ok(blob)
}
