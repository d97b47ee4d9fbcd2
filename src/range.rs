use crate::error::Error;
use crate::raw::MAJOR_VERSION;
use alloc::string::String;
use alloc::vec::Vec;
use strum::IntoEnumIterator;

/// A module's closed set of calibration ranges.
///
/// Implement it on an enum deriving `strum::EnumIter` and `strum::AsRefStr`:
///
/// ```
/// use nvmem_cal::{CalibrationRange, RangeTable};
///
/// #[derive(Clone, Copy, strum::EnumIter, strum::AsRefStr)]
/// enum Dmm {
///     #[strum(serialize = "DCV_5V")]
///     Dcv5V,
///     #[strum(serialize = "DCI_1A")]
///     Dci1A,
/// }
///
/// impl CalibrationRange for Dmm {
///     fn slot(self) -> u8 {
///         self as u8
///     }
/// }
///
/// let table = RangeTable::of::<Dmm>().unwrap();
/// assert_eq!(table.slot("DCI_1A"), Some(1));
/// ```
pub trait CalibrationRange: Copy + IntoEnumIterator + AsRef<str> {
    /// Position of the range in the pointer table of a calibration cell.
    fn slot(self) -> u8;
}

/// Validated mapping from range name to pointer table slot. Slots are dense: a table with `n`
/// ranges uses exactly the slots `0..n`. Names are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeTable {
    // sorted by slot
    entries: Vec<(String, u8)>,
}

/// A range table valid for blobs with the given minor version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRangeTable {
    pub minor_version: u8,
    pub table: RangeTable,
}

impl RangeTable {
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, u8)>) -> Result<Self, Error> {
        let mut entries: Vec<(String, u8)> = entries
            .into_iter()
            .map(|(name, slot)| (name.into(), slot))
            .collect();
        entries.sort_by_key(|(_, slot)| *slot);

        let dense = entries
            .iter()
            .enumerate()
            .all(|(i, (_, slot))| i == *slot as usize);
        let unique_names = entries
            .iter()
            .enumerate()
            .all(|(i, (name, _))| entries[..i].iter().all(|(other, _)| other != name));
        if !dense || !unique_names {
            return Err(Error::InvalidRangeTable);
        }

        Ok(Self { entries })
    }

    pub fn of<R: CalibrationRange>() -> Result<Self, Error> {
        Self::new(R::iter().map(|range| (String::from(range.as_ref()), range.slot())))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, slot)| *slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_some()
    }

    /// Ranges in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.entries.iter().map(|(name, slot)| (name.as_str(), *slot))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(name, _)| name)
    }

    /// Picks the table matching a blob version byte (`major << 4 | minor`).
    pub fn select(tables: &[VersionedRangeTable], version: u8) -> Result<&RangeTable, Error> {
        let major = version >> 4;
        let minor = version & 0x0F;
        if major != MAJOR_VERSION {
            return Err(Error::MajorVersionMismatch(major));
        }

        tables
            .iter()
            .find(|candidate| candidate.minor_version == minor)
            .map(|candidate| &candidate.table)
            .ok_or(Error::NoMatchingRangeTable(minor))
    }
}
