//! Field map of module NVMEM.
//!
//! The first 0x40 bytes hold read-only identity data protected by a SHA-1 at 0x2C. They are
//! followed by one header slot per calibration cell holding the cell's date, checksum and, for map
//! version 2, its start address and size. The cell data itself lives further up, the user area
//! starts after the last cell.

use crate::error::Error;
use crate::raw::CHECKSUM_SIZE;
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::{ReadStorage, Storage};
use sha1::{Digest, Sha1};

pub(crate) const MAP_VERSION_ADDR: u32 = 0x00;
pub(crate) const FIRST_CAL_HEADER_ADDR: u32 = 0x40;
const V3_SHARED_DATA_SIZE_ADDR: u32 = 0x19;

/// Layout revision of the NVMEM, stored in its first byte.
#[derive(strum::FromRepr, strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MapVersion {
    /// Every cell header carries its own start address and size.
    V2 = 2,
    /// Cells share one size and are laid out back to back after the headers.
    V3 = 3,
}

/// Logical fields of the NVMEM. The `Cal*` fields exist once per calibration cell.
#[derive(strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmemField {
    StorageSize,
    ModuleSn,
    Vendor,
    ProductionDate,
    SequenceCount,
    Quade,
    Revision,
    ErsVersion,
    Config,
    NumCals,
    RoChecksum,
    CalDate,
    CalChecksum,
    CalDataStartAddr,
    CalDataSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FieldLocation {
    pub offset: u32,
    pub width: u32,
}

const fn at(offset: u32, width: u32) -> Option<FieldLocation> {
    Some(FieldLocation { offset, width })
}

impl MapVersion {
    /// Size of one calibration cell header slot.
    pub const fn header_size(self) -> u32 {
        match self {
            MapVersion::V2 => 0x25,
            MapVersion::V3 => 0x1D,
        }
    }

    /// Whether cells can be placed freely, i.e. start address and size are stored per cell.
    pub const fn has_cell_addresses(self) -> bool {
        matches!(self, MapVersion::V2)
    }

    /// Resolves a field to its location. Per-cell fields are resolved for `index`, all others
    /// ignore it. Returns `None` for fields this map version derives instead of storing them.
    pub const fn locate(self, field: NvmemField, index: usize) -> Option<FieldLocation> {
        let slot = FIRST_CAL_HEADER_ADDR + index as u32 * self.header_size();
        match (field, self) {
            (NvmemField::StorageSize, _) => at(0x01, 2),
            (NvmemField::ModuleSn, _) => at(0x03, 17),
            (NvmemField::Vendor, _) => at(0x03, 3),
            (NvmemField::ProductionDate, _) => at(0x06, 4),
            (NvmemField::SequenceCount, _) => at(0x0A, 4),
            (NvmemField::Quade, _) => at(0x0E, 4),
            (NvmemField::Revision, _) => at(0x12, 1),
            (NvmemField::ErsVersion, _) => at(0x14, 1),
            (NvmemField::Config, _) => at(0x15, 3),
            (NvmemField::NumCals, _) => at(0x18, 1),
            (NvmemField::RoChecksum, _) => at(0x2C, CHECKSUM_SIZE as u32),
            (NvmemField::CalDate, _) => at(slot, 9),
            (NvmemField::CalDataStartAddr, MapVersion::V2) => at(slot + 0x09, 4),
            (NvmemField::CalDataStartAddr, MapVersion::V3) => None,
            (NvmemField::CalDataSize, MapVersion::V2) => at(slot + 0x0D, 4),
            (NvmemField::CalDataSize, MapVersion::V3) => at(V3_SHARED_DATA_SIZE_ADDR, 4),
            (NvmemField::CalChecksum, MapVersion::V2) => at(slot + 0x11, CHECKSUM_SIZE as u32),
            (NvmemField::CalChecksum, MapVersion::V3) => at(slot + 0x09, CHECKSUM_SIZE as u32),
        }
    }

    /// The part of a cell's header slot that is hashed together with the cell data: everything in
    /// front of the checksum.
    pub const fn header_prefix(self, index: usize) -> FieldLocation {
        FieldLocation {
            offset: FIRST_CAL_HEADER_ADDR + index as u32 * self.header_size(),
            width: self.header_size() - CHECKSUM_SIZE as u32,
        }
    }
}

/// Location of one calibration cell's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellHeader {
    pub start_address: u32,
    pub data_size: u32,
}

impl CellHeader {
    pub const fn end_address(&self) -> u32 {
        self.start_address.saturating_add(self.data_size)
    }
}

/// Cached view of the NVMEM header: map version, number of calibration cells and where each cell
/// lives. Rebuilt with [`NvmemLayout::load`] whenever the header is rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmemLayout {
    version: MapVersion,
    cells: Vec<CellHeader>,
}

impl NvmemLayout {
    pub(crate) fn load<T: ReadStorage>(hal: &mut T) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("NvmemLayout::load");

        let [raw_version] = read_array::<T, 1>(hal, MAP_VERSION_ADDR)?;
        let version =
            MapVersion::from_repr(raw_version).ok_or(Error::UnsupportedMapVersion(raw_version))?;
        let [num_cals] = read_array::<T, 1>(hal, field(version, NvmemField::NumCals, 0).offset)?;
        let num_cals = num_cals as usize;

        let cells = match version {
            MapVersion::V2 => (0..num_cals)
                .map(|index| {
                    let start = field(version, NvmemField::CalDataStartAddr, index).offset;
                    let size = field(version, NvmemField::CalDataSize, index).offset;
                    Ok(CellHeader {
                        start_address: u32::from_le_bytes(read_array(hal, start)?),
                        data_size: u32::from_le_bytes(read_array(hal, size)?),
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?,
            MapVersion::V3 => {
                let size = field(version, NvmemField::CalDataSize, 0).offset;
                let data_size = u32::from_le_bytes(read_array(hal, size)?);
                let first = FIRST_CAL_HEADER_ADDR + num_cals as u32 * version.header_size();
                (0..num_cals)
                    .map(|index| CellHeader {
                        start_address: first + data_size * index as u32,
                        data_size,
                    })
                    .collect()
            }
        };

        Ok(Self { version, cells })
    }

    pub fn version(&self) -> MapVersion {
        self.version
    }

    /// Number of calibration cells (`NUM_CALS`).
    pub fn num_cals(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Result<&CellHeader, Error> {
        self.cells
            .get(index)
            .ok_or(Error::InvalidCalibrationIndex(index as i32))
    }

    pub fn cells(&self) -> &[CellHeader] {
        &self.cells
    }

    /// Resolves a field for this layout's map version.
    pub fn locate(&self, field: NvmemField, index: usize) -> Option<FieldLocation> {
        self.version.locate(field, index)
    }

    /// First byte after the calibration cells.
    pub fn user_start_address(&self) -> u32 {
        match self.version {
            MapVersion::V2 => self
                .cells
                .iter()
                .max_by_key(|cell| cell.start_address)
                .map(CellHeader::end_address),
            MapVersion::V3 => self
                .cells
                .first()
                .map(|first| first.start_address + first.data_size * self.cells.len() as u32),
        }
        .unwrap_or(FIRST_CAL_HEADER_ADDR)
    }
}

/// Location of a field that every map version stores.
pub(crate) fn field(version: MapVersion, field: NvmemField, index: usize) -> FieldLocation {
    match version.locate(field, index) {
        Some(location) => location,
        None => unreachable!("{} is derived for map version {}", field, version),
    }
}

pub(crate) fn sha1_digest(parts: &[&[u8]]) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash over everything in front of the read-only checksum.
pub(crate) fn read_only_digest<T: ReadStorage>(
    hal: &mut T,
    version: MapVersion,
) -> Result<[u8; CHECKSUM_SIZE], Error> {
    let location = field(version, NvmemField::RoChecksum, 0);
    let data = read_vec(hal, 0, location.offset as usize)?;
    Ok(sha1_digest(&[&data]))
}

pub(crate) fn verify_read_only<T: ReadStorage>(hal: &mut T, version: MapVersion) -> Result<(), Error> {
    let location = field(version, NvmemField::RoChecksum, 0);
    let stored = read_vec(hal, location.offset, location.width as usize)?;
    if read_only_digest(hal, version)?[..] != stored[..] {
        return Err(Error::ReadOnlyChecksumMismatch);
    }
    Ok(())
}

pub(crate) fn read_vec<T: ReadStorage>(
    hal: &mut T,
    address: u32,
    count: usize,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; count];
    if count > 0 {
        hal.read(address, &mut buf).map_err(|_| Error::StorageError)?;
    }
    Ok(buf)
}

pub(crate) fn read_array<T: ReadStorage, const N: usize>(
    hal: &mut T,
    address: u32,
) -> Result<[u8; N], Error> {
    let mut buf = [0u8; N];
    hal.read(address, &mut buf).map_err(|_| Error::StorageError)?;
    Ok(buf)
}

pub(crate) fn write_slice<T: Storage>(hal: &mut T, address: u32, bytes: &[u8]) -> Result<(), Error> {
    if bytes.is_empty() {
        return Ok(());
    }
    hal.write(address, bytes).map_err(|_| Error::StorageError)
}
