#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod codec;
pub mod date;
pub mod error;
pub mod nvmem;
pub mod platform;

mod calibrator;
mod identity;
mod range;
mod raw;
mod repository;
mod writer;

pub use calibrator::{CalibrationMode, CalibrationState, select_level};
pub use codec::{CalibrationUnit, RangeUnits};
pub use identity::decode_production_count;
pub use range::{CalibrationRange, RangeTable, VersionedRangeTable};
pub use raw::{MAJOR_VERSION, MAX_CALIBRATION_CELLS, SAVE_MARK};
pub use writer::least_squares;

extern crate alloc;

use crate::error::Error;
use crate::nvmem::{NvmemLayout, read_vec, write_slice};
use crate::platform::Platform;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// One instrument module's view of its NVMEM: the cached header layout, the module's range table
/// and the calibration data currently in use.
pub struct Module<T: Platform> {
    pub(crate) hal: T,
    pub(crate) layout: NvmemLayout,
    pub(crate) ranges: RangeTable,
    pub(crate) mode: CalibrationMode,
    pub(crate) state: CalibrationState,
}

impl<T: Platform> Module<T> {
    /// Reads the NVMEM header, verifies the read-only checksum and loads the latest calibration.
    ///
    /// Problems with the calibration data do not fail construction. They are reported by
    /// [`Module::calibrate`] once an affected range is used, so a module without valid calibration
    /// can still be operated in raw mode.
    pub fn new(mut hal: T, ranges: RangeTable) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("Module::new");

        let layout = NvmemLayout::load(&mut hal)?;
        nvmem::verify_read_only(&mut hal, layout.version())?;

        let mut module = Self {
            hal,
            layout,
            ranges,
            mode: CalibrationMode::Cal,
            state: CalibrationState::default(),
        };
        module.load_calibration(None);
        Ok(module)
    }

    /// Like [`Module::new`] for modules whose range table depends on the minor version of the
    /// calibration data. The version byte of the latest cell selects the table.
    pub fn with_versioned_ranges(mut hal: T, tables: &[VersionedRangeTable]) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("Module::with_versioned_ranges");

        let layout = NvmemLayout::load(&mut hal)?;
        nvmem::verify_read_only(&mut hal, layout.version())?;

        let mut module = Self {
            hal,
            layout,
            ranges: RangeTable::default(),
            mode: CalibrationMode::Cal,
            state: CalibrationState::default(),
        };
        let latest = module.read_latest_calibration_index()?;
        let start = module.layout.cell(latest)?.start_address;
        let [version] = nvmem::read_array::<T, 1>(&mut module.hal, start)?;

        module.ranges = RangeTable::select(tables, version)?.clone();
        module.load_calibration(None);
        Ok(module)
    }

    /// Replaces the calibration state with the content of cell `index`, or of the latest valid
    /// cell for `None`. Failures are kept in the new state and surface in [`Module::calibrate`].
    pub fn load_calibration(&mut self, index: Option<usize>) {
        #[cfg(feature = "defmt")]
        trace!("load_calibration");

        self.state = self.read_state(index);
    }

    fn read_state(&mut self, index: Option<usize>) -> CalibrationState {
        let index = match index {
            Some(index) => index,
            None => match self.read_latest_calibration_index() {
                Ok(index) => index,
                Err(e) => return CalibrationState::failed(e),
            },
        };

        let blob = match self.read_calibration_cell(index) {
            Ok(blob) => blob,
            Err(e) => {
                #[cfg(feature = "defmt")]
                warn!("calibration cell {} unusable: {}", index, e);
                return CalibrationState::failed(e);
            }
        };

        // read_calibration_cell validated the index
        let start_address = match self.layout.cell(index) {
            Ok(cell) => cell.start_address,
            Err(e) => return CalibrationState::failed(e),
        };
        let cell = codec::decode(&blob, start_address, &self.ranges);

        #[cfg(feature = "defmt")]
        for (name, units) in &cell.ranges {
            if let Err(e) = units {
                warn!("range {} of cell {} unusable: {}", name.as_str(), index, e);
            }
        }

        CalibrationState::from_cell(index, cell)
    }

    /// Applies the calibration of `range` to `value`. Returns `value` unchanged in raw mode and
    /// for ranges without calibration units.
    pub fn calibrate(&self, range: &str, value: f64) -> Result<f64, Error> {
        self.state.calibrate(self.mode, range, value)
    }

    pub fn set_calibration_mode(&mut self, mode: CalibrationMode) {
        self.mode = mode;
    }

    pub fn calibration_mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Switches to calibrated mode using cell `index`, `-1` selects the latest cell.
    ///
    /// Unlike [`Module::load_calibration`] this reports a cell that can not be used right away.
    pub fn enable_calibration(&mut self, index: i32) -> Result<(), Error> {
        let index = match index {
            -1 => None,
            i if i >= 0 && (i as usize) < self.layout.num_cals() => Some(i as usize),
            i => return Err(Error::InvalidCalibrationIndex(i)),
        };

        self.set_calibration_mode(CalibrationMode::Cal);
        self.load_calibration(index);

        match self.state.error() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn disable_calibration(&mut self) {
        self.set_calibration_mode(CalibrationMode::Raw);
    }

    /// Index of the cell the current calibration data was loaded from.
    pub fn active_calibration_index(&self) -> Option<usize> {
        self.state.cell_index()
    }

    pub fn calibration_state(&self) -> &CalibrationState {
        &self.state
    }

    pub fn range_names(&self) -> impl Iterator<Item = &str> {
        self.ranges.names()
    }

    pub fn range_table(&self) -> &RangeTable {
        &self.ranges
    }

    pub fn layout(&self) -> &NvmemLayout {
        &self.layout
    }

    pub fn read_nvmem(&mut self, address: u32, count: usize) -> Result<Vec<u8>, Error> {
        read_vec(&mut self.hal, address, count)
    }

    pub fn write_nvmem(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        write_slice(&mut self.hal, address, data)
    }

    pub fn platform(&self) -> &T {
        &self.hal
    }

    pub fn platform_mut(&mut self) -> &mut T {
        &mut self.hal
    }

    pub fn into_inner(self) -> T {
        self.hal
    }
}
