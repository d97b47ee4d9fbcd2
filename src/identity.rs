//! Read-only identity data written at manufacture and the free user area behind the cells.

use crate::date;
use crate::error::Error;
use crate::nvmem::{NvmemField, field, read_array, read_vec, write_slice};
use crate::platform::Platform;
use crate::Module;
use alloc::string::String;
use alloc::vec::Vec;
use chrono::NaiveDate;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Digits of the production count, `0-9A-Z` without `I` and `O`.
const COUNT_DIGITS: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

impl<T: Platform> Module<T> {
    fn read_field(&mut self, name: NvmemField) -> Result<Vec<u8>, Error> {
        let location = field(self.layout.version(), name, 0);
        read_vec(&mut self.hal, location.offset, location.width as usize)
    }

    fn read_field_string(&mut self, name: NvmemField) -> Result<String, Error> {
        Ok(printable(&self.read_field(name)?))
    }

    pub fn read_vendor(&mut self) -> Result<String, Error> {
        self.read_field_string(NvmemField::Vendor)
    }

    pub fn read_serial_number(&mut self) -> Result<String, Error> {
        self.read_field_string(NvmemField::ModuleSn)
    }

    /// Four character code identifying the module type.
    pub fn read_eeee_code(&mut self) -> Result<String, Error> {
        self.read_field_string(NvmemField::Quade)
    }

    pub fn read_hardware_version(&mut self) -> Result<String, Error> {
        self.read_field_string(NvmemField::Revision)
    }

    pub fn read_ers_version(&mut self) -> Result<u8, Error> {
        let location = field(self.layout.version(), NvmemField::ErsVersion, 0);
        let [version] = read_array::<T, 1>(&mut self.hal, location.offset)?;
        Ok(version)
    }

    pub fn read_hardware_config(&mut self) -> Result<String, Error> {
        self.read_field_string(NvmemField::Config)
    }

    /// NVMEM size in Kbit.
    pub fn read_nvmem_size(&mut self) -> Result<u16, Error> {
        let location = field(self.layout.version(), NvmemField::StorageSize, 0);
        Ok(u16::from_le_bytes(read_array(&mut self.hal, location.offset)?))
    }

    /// Day of manufacture. The decade is inferred from the current date.
    pub fn read_production_date(&mut self) -> Result<NaiveDate, Error> {
        let raw = self.read_field(NvmemField::ProductionDate)?;
        date::decode_production_date(&raw, self.hal.now()).ok_or(Error::InvalidField)
    }

    /// Production sequence number of the module.
    pub fn read_production_count(&mut self) -> Result<u32, Error> {
        decode_production_count(&self.read_field(NvmemField::SequenceCount)?)
    }

    /// Reads `count` bytes at `offset` relative to the start of the user area.
    pub fn read_user_area(&mut self, offset: u32, count: usize) -> Result<Vec<u8>, Error> {
        let address = self.layout.user_start_address() + offset;
        read_vec(&mut self.hal, address, count)
    }

    /// Writes `data` at `offset` relative to the start of the user area.
    ///
    /// The user area moves when a calibration generation is appended behind the last cell.
    pub fn write_user_area(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_user_area: {} bytes at {}", data.len(), offset);

        let address = self.layout.user_start_address() + offset;
        write_slice(&mut self.hal, address, data)
    }
}

/// Printable ASCII up to the first NUL, every other byte shows as `?`.
fn printable(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&c| c != 0)
        .map(|&c| if (b' '..=b'~').contains(&c) { c as char } else { '?' })
        .collect()
}

/// Decodes a base 34 production count, most significant digit first.
pub fn decode_production_count(raw: &[u8]) -> Result<u32, Error> {
    raw.iter().try_fold(0u32, |acc, c| {
        let digit = COUNT_DIGITS
            .iter()
            .position(|d| d == c)
            .ok_or(Error::InvalidField)?;
        acc.checked_mul(COUNT_DIGITS.len() as u32)
            .and_then(|acc| acc.checked_add(digit as u32))
            .ok_or(Error::InvalidField)
    })
}
