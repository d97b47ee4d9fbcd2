use crate::calibrator::select_level;
use crate::codec::{self, CalibrationUnit, RangeUnits};
use crate::date::{self, calendar_week};
use crate::error::Error;
use crate::nvmem::{
    self, CellHeader, FIRST_CAL_HEADER_ADDR, NvmemField, NvmemLayout, field, read_vec, write_slice,
};
use crate::platform::Platform;
use crate::raw::MAX_CALIBRATION_CELLS;
use crate::Module;
use alloc::vec;
use alloc::vec::Vec;
use chrono::NaiveDateTime;
#[cfg(feature = "defmt")]
use defmt::trace;

impl<T: Platform> Module<T> {
    /// Fits the units of `range` to pairs of `(raw reading, benchmark)` and stores the result as
    /// the module's latest calibration.
    ///
    /// Within the calendar week of the latest calibration its cell is rewritten in place. A new
    /// week starts a new generation in another cell, with gain and offset of every range reset
    /// to identity. Samples are assigned to the unit [`select_level`] picks for them, units with
    /// fewer than two distinct raw values keep their coefficients.
    pub fn write_module_calibration(
        &mut self,
        range: &str,
        samples: &[(f64, f64)],
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_module_calibration: {}", range);

        if !self.ranges.contains(range) {
            return Err(Error::UnknownRange);
        }

        let now = date::truncate_to_minute(self.hal.now());
        let latest_index = self.read_latest_calibration_index()?;
        let dates = self.read_date_list()?;
        let latest_date = dates[latest_index].ok_or(Error::NoValidCalibrationCell)?;
        let latest_cell = *self.layout.cell(latest_index)?;

        let latest = self.read_state(Some(latest_index));
        if let Some(error) = latest.error() {
            return Err(error.clone());
        }
        let version = latest.version().ok_or(Error::NoValidCalibrationCell)?;
        let mut units = latest.range_units(&self.ranges);

        let same_week = match calendar_week(latest_date).cmp(&calendar_week(now)) {
            core::cmp::Ordering::Greater => return Err(Error::ClockBehindCalibration),
            core::cmp::Ordering::Equal => true,
            core::cmp::Ordering::Less => false,
        };

        let index = if same_week {
            latest_index
        } else {
            reset_to_identity(&mut units);
            self.select_new_index(&dates)
        };

        if let Some(range_units) = units.get_mut(range) {
            fit_range(range_units, samples);
        }

        let relocate = self.layout.version().has_cell_addresses()
            && dates.get(index).copied().flatten().is_none();
        let cell = if relocate {
            let start_address = self.next_free_address(&dates);
            let cell = CellHeader {
                start_address,
                data_size: latest_cell.data_size,
            };
            if cell.end_address() as usize > self.hal.capacity() {
                return Err(Error::CellOverflow);
            }
            cell
        } else {
            *self.layout.cell(index)?
        };

        let blob = codec::encode(
            &self.ranges,
            &units,
            version,
            cell.start_address,
            cell.data_size as usize,
        )?;

        if relocate {
            write_slice(&mut self.hal, cell.start_address, &blob)?;
            self.write_cell_header(index, cell, &blob)?;
            if index >= self.layout.num_cals() {
                self.commit_cell_count(index + 1)?;
            }
            self.layout = NvmemLayout::load(&mut self.hal)?;
        } else {
            self.write_calibration_cell(index, &blob)?;
        }

        self.load_calibration(None);
        Ok(())
    }

    /// Cell for a new generation: the first one never written, a newly appended one while the
    /// module may still grow and its header slot stays clear of cell data, otherwise the one
    /// holding the oldest calibration.
    fn select_new_index(&self, dates: &[Option<NaiveDateTime>]) -> usize {
        if let Some(empty) = dates.iter().position(Option::is_none) {
            return empty;
        }

        let num_cals = self.layout.num_cals();
        if self.layout.version().has_cell_addresses()
            && num_cals < MAX_CALIBRATION_CELLS
            && self.header_slots_fit(num_cals + 1)
        {
            return num_cals;
        }

        dates
            .iter()
            .enumerate()
            .min_by_key(|(_, date)| **date)
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Whether `num_cals` header slots end before the data of every cell.
    fn header_slots_fit(&self, num_cals: usize) -> bool {
        let headers_end =
            FIRST_CAL_HEADER_ADDR as usize + num_cals * self.layout.version().header_size() as usize;
        self.layout
            .cells()
            .iter()
            .all(|cell| headers_end <= cell.start_address as usize)
    }

    /// First address behind the written cell placed highest in NVMEM.
    fn next_free_address(&self, dates: &[Option<NaiveDateTime>]) -> u32 {
        let cells = self.layout.cells();
        cells
            .iter()
            .zip(dates)
            .filter(|(_, date)| date.is_some())
            .map(|(cell, _)| cell)
            .chain(cells.first())
            .max_by_key(|cell| cell.start_address)
            .map(CellHeader::end_address)
            .unwrap_or_else(|| self.layout.user_start_address())
    }

    /// Sets `NUM_CALS` and reseals the read-only area with a single write, so a cut off write
    /// leaves either the old or the new cell count with a valid checksum.
    fn commit_cell_count(&mut self, num_cals: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("commit_cell_count: {}", num_cals);

        let version = self.layout.version();
        let count = field(version, NvmemField::NumCals, 0);
        let checksum = field(version, NvmemField::RoChecksum, 0);
        let checksum_range = checksum.offset as usize..(checksum.offset + checksum.width) as usize;

        let mut head = read_vec(&mut self.hal, 0, checksum_range.end)?;
        head[count.offset as usize] = u8::try_from(num_cals).map_err(|_| Error::CellOverflow)?;
        let digest = nvmem::sha1_digest(&[&head[..checksum_range.start]]);
        head[checksum_range].copy_from_slice(&digest);

        write_slice(&mut self.hal, count.offset, &head[count.offset as usize..])
    }
}

fn reset_to_identity(units: &mut RangeUnits) {
    for unit in units.values_mut().flatten() {
        unit.gain = 1.0;
        unit.offset = 0.0;
    }
}

/// Refits every usable unit of a range that received at least two samples with distinct raw
/// values.
fn fit_range(units: &mut [CalibrationUnit], samples: &[(f64, f64)]) {
    if units.is_empty() {
        return;
    }

    let mut buckets: Vec<Vec<(f64, f64)>> = vec![Vec::new(); units.len()];
    for &(raw, benchmark) in samples {
        let level = select_level(units, raw);
        if units[level].is_use {
            buckets[level].push((raw, benchmark));
        }
    }

    for (unit, bucket) in units.iter_mut().zip(&buckets) {
        if let Some((gain, offset)) = least_squares(bucket) {
            unit.gain = gain as f32;
            unit.offset = offset as f32;
            unit.is_use = true;
        }
    }
}

/// Ordinary least squares line through `points`, as `(gain, offset)`.
///
/// Returns `None` for fewer than two points or when all points share one x value.
pub fn least_squares(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (sxy + dx * (y - mean_y), sxx + dx * dx)
    });
    if sxx == 0.0 {
        return None;
    }

    let gain = sxy / sxx;
    Some((gain, mean_y - gain * mean_x))
}
