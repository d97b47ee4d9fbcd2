//! Reading, writing and invalidating calibration cells.
//!
//! A cell is valid when its date decodes and the SHA-1 over its header prefix followed by the
//! cell data matches the stored checksum. Erasing only clears date and checksum, the data stays.

use crate::codec::{self, CalibrationUnit};
use crate::date::{self, CAL_DATE_LENGTH};
use crate::error::{Error, LayoutFault};
use crate::nvmem::{self, CellHeader, FieldLocation, NvmemField, field, read_vec, write_slice};
use crate::platform::Platform;
use crate::raw::{CHECKSUM_SIZE, COUNT_SIZE, ERASED, RawUnit, UNIT_SIZE};
use crate::Module;
use alloc::vec;
use alloc::vec::Vec;
use chrono::NaiveDateTime;
#[cfg(feature = "defmt")]
use defmt::trace;

impl<T: Platform> Module<T> {
    /// Number of calibration cells the module provides (`NUM_CALS`).
    pub fn read_number_supported_calibrations(&self) -> usize {
        self.layout.num_cals()
    }

    /// Date the cell was written, `None` if it never was or has been erased.
    pub fn read_calibration_date(&mut self, index: usize) -> Result<Option<NaiveDateTime>, Error> {
        self.layout.cell(index)?;
        let location = field(self.layout.version(), NvmemField::CalDate, index);
        let raw: [u8; CAL_DATE_LENGTH] = nvmem::read_array(&mut self.hal, location.offset)?;
        Ok(date::decode_cal_date(&raw))
    }

    pub(crate) fn read_date_list(&mut self) -> Result<Vec<Option<NaiveDateTime>>, Error> {
        (0..self.layout.num_cals())
            .map(|index| self.read_calibration_date(index))
            .collect()
    }

    /// Index of the most recently written cell. Of several cells written within the same minute
    /// the one with the highest index wins.
    pub fn read_latest_calibration_index(&mut self) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!("read_latest_calibration_index");

        if self.layout.num_cals() == 0 {
            return Err(Error::NoSupportedCalibrations);
        }

        let dates = self.read_date_list()?;
        let latest = dates
            .iter()
            .flatten()
            .max()
            .copied()
            .ok_or(Error::NoValidCalibrationCell)?;

        dates
            .iter()
            .rposition(|date| *date == Some(latest))
            .ok_or(Error::NoValidCalibrationCell)
    }

    /// Reads the data of cell `index` and verifies it against the stored checksum.
    pub fn read_calibration_cell(&mut self, index: usize) -> Result<Vec<u8>, Error> {
        #[cfg(feature = "defmt")]
        trace!("read_calibration_cell: {}", index);

        let cell = *self.layout.cell(index)?;
        if self.read_calibration_date(index)?.is_none() {
            return Err(Error::CorruptCell(index));
        }

        let location = field(self.layout.version(), NvmemField::CalChecksum, index);
        let stored: [u8; CHECKSUM_SIZE] = nvmem::read_array(&mut self.hal, location.offset)?;
        let data = read_vec(&mut self.hal, cell.start_address, cell.data_size as usize)?;

        if self.cell_checksum(index, &data)? != stored {
            return Err(Error::CorruptCell(index));
        }
        Ok(data)
    }

    /// Writes `data` to cell `index` and makes it valid, dated with the current time.
    ///
    /// `data` must have exactly the cell's size.
    pub fn write_calibration_cell(&mut self, index: usize, data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_calibration_cell: {}", index);

        let cell = *self.layout.cell(index)?;
        if data.len() != cell.data_size as usize {
            return Err(Error::CellSizeMismatch {
                expected: cell.data_size,
                actual: data.len() as u32,
            });
        }

        write_slice(&mut self.hal, cell.start_address, data)?;
        self.write_cell_header(index, cell, data)
    }

    /// Invalidates cell `index` by erasing its date and checksum. The cell data is not touched.
    pub fn erase_calibration_cell(&mut self, index: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_calibration_cell: {}", index);

        self.layout.cell(index)?;
        let version = self.layout.version();
        for name in [NvmemField::CalDate, NvmemField::CalChecksum] {
            let location = field(version, name, index);
            write_slice(
                &mut self.hal,
                location.offset,
                &vec![ERASED; location.width as usize],
            )?;
        }
        Ok(())
    }

    /// Reads a single unit of `range` straight from cell `index`, without verifying the cell.
    pub fn read_calibration_item(
        &mut self,
        index: usize,
        range: &str,
        item: usize,
    ) -> Result<CalibrationUnit, Error> {
        let cell = *self.layout.cell(index)?;
        let slot = self.ranges.slot(range).ok_or(Error::UnknownRange)?;

        let pointer_address = cell.start_address + codec::pointer_position(slot) as u32;
        let pointer = u16::from_be_bytes(nvmem::read_array(&mut self.hal, pointer_address)?);
        let count_pos = codec::count_position(
            pointer,
            cell.start_address,
            cell.data_size as usize,
            self.ranges.len(),
        )?;
        let [count] = nvmem::read_array::<T, 1>(&mut self.hal, pointer as u32)?;
        if item >= count as usize {
            return Err(Error::ItemOutOfRange);
        }

        let unit_pos = count_pos + COUNT_SIZE + item * UNIT_SIZE;
        if unit_pos + UNIT_SIZE > cell.data_size as usize {
            return Err(Error::InvalidRangeLayout(LayoutFault::UnitsOutOfBounds));
        }
        let raw = nvmem::read_array::<T, UNIT_SIZE>(&mut self.hal, cell.start_address + unit_pos as u32)?;
        Ok(RawUnit(raw).into())
    }

    /// Writes the complete header slot of cell `index` in one access: the current time, the
    /// location of `cell` where the map stores it and the checksum over the new header prefix and
    /// `data`. This is what makes the cell visible to readers.
    pub(crate) fn write_cell_header(
        &mut self,
        index: usize,
        cell: CellHeader,
        data: &[u8],
    ) -> Result<(), Error> {
        let version = self.layout.version();
        let prefix = version.header_prefix(index);
        let mut header = vec![ERASED; version.header_size() as usize];
        let now = date::truncate_to_minute(self.hal.now());

        splice(
            &mut header,
            prefix.offset,
            field(version, NvmemField::CalDate, index),
            &date::encode_cal_date(now),
        );
        if version.has_cell_addresses() {
            splice(
                &mut header,
                prefix.offset,
                field(version, NvmemField::CalDataStartAddr, index),
                &cell.start_address.to_le_bytes(),
            );
            splice(
                &mut header,
                prefix.offset,
                field(version, NvmemField::CalDataSize, index),
                &cell.data_size.to_le_bytes(),
            );
        }

        let prefix_len = prefix.width as usize;
        let checksum = nvmem::sha1_digest(&[&header[..prefix_len], data]);
        header[prefix_len..].copy_from_slice(&checksum);

        write_slice(&mut self.hal, prefix.offset, &header)
    }

    fn cell_checksum(&mut self, index: usize, data: &[u8]) -> Result<[u8; CHECKSUM_SIZE], Error> {
        let prefix = self.layout.version().header_prefix(index);
        let header = read_vec(&mut self.hal, prefix.offset, prefix.width as usize)?;
        Ok(nvmem::sha1_digest(&[&header, data]))
    }
}

/// Copies `bytes` to the position of `location` inside a header slot starting at `slot`.
fn splice(header: &mut [u8], slot: u32, location: FieldLocation, bytes: &[u8]) {
    let at = (location.offset - slot) as usize;
    header[at..at + bytes.len()].copy_from_slice(bytes);
}
