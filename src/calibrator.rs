use crate::codec::{CalibrationUnit, DecodedCell, RangeUnits};
use crate::error::Error;
use crate::range::RangeTable;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Whether `calibrate()` applies calibration data or passes values through untouched.
#[derive(strum::EnumString, strum::Display, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationMode {
    #[default]
    #[strum(serialize = "cal")]
    Cal,
    #[strum(serialize = "raw")]
    Raw,
}

/// Calibration data of one loaded cell, including the errors found while loading it.
///
/// A state is built once per load and replaced as a whole on the next one. Errors are not
/// returned by the load itself but by [`CalibrationState::calibrate`] for the ranges they affect.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalibrationState {
    cell_index: Option<usize>,
    version: Option<u8>,
    common_error: Option<Error>,
    ranges: BTreeMap<String, Result<Vec<CalibrationUnit>, Error>>,
}

impl CalibrationState {
    /// No cell could be read. Every calibration fails with `error`.
    pub fn failed(error: Error) -> Self {
        Self {
            common_error: Some(error),
            ..Default::default()
        }
    }

    pub fn from_cell(cell_index: usize, cell: DecodedCell) -> Self {
        Self {
            cell_index: Some(cell_index),
            version: Some(cell.version),
            common_error: None,
            ranges: cell.ranges,
        }
    }

    /// Index of the cell this state was loaded from.
    pub fn cell_index(&self) -> Option<usize> {
        self.cell_index
    }

    /// Version byte of the loaded cell.
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// The error that prevented loading any cell.
    pub fn error(&self) -> Option<&Error> {
        self.common_error.as_ref()
    }

    /// Units of a range, `None` for unknown ranges and ranges that failed to decode.
    pub fn units(&self, range: &str) -> Option<&[CalibrationUnit]> {
        match self.ranges.get(range) {
            Some(Ok(units)) => Some(units),
            _ => None,
        }
    }

    pub fn range_error(&self, range: &str) -> Option<&Error> {
        match self.ranges.get(range) {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    /// Working copy of all ranges of `table`. Ranges that failed to decode start out empty.
    pub(crate) fn range_units(&self, table: &RangeTable) -> RangeUnits {
        table
            .names()
            .map(|name| {
                let units = self.units(name).map(<[_]>::to_vec).unwrap_or_default();
                (name.to_string(), units)
            })
            .collect()
    }

    pub fn calibrate(&self, mode: CalibrationMode, range: &str, value: f64) -> Result<f64, Error> {
        if mode == CalibrationMode::Raw {
            return Ok(value);
        }

        if let Some(error) = &self.common_error {
            return Err(error.clone());
        }

        let units = match self.ranges.get(range) {
            None => return Err(Error::UnknownRange),
            Some(Err(error)) => return Err(error.clone()),
            Some(Ok(units)) => units,
        };

        if units.is_empty() {
            return Ok(value);
        }

        Ok(units[select_level(units, value)].apply(value))
    }
}

/// Picks the unit responsible for `value`: the first one whose threshold lies above it. The scan
/// stops at the first unit not in use, in which case the last usable unit before it is taken.
/// Values above all thresholds use the last unit of the usable run.
///
/// `units` must not be empty.
pub fn select_level(units: &[CalibrationUnit], value: f64) -> usize {
    let mut level = 0;
    for (i, unit) in units.iter().enumerate() {
        if value < unit.threshold as f64 {
            return i;
        }
        if !unit.is_use {
            break;
        }
        level = i;
    }
    level
}
