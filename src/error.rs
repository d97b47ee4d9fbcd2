use thiserror::Error;

/// Names the bound a range violated while its calibration data was located inside a cell.
#[derive(strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutFault {
    /// The range's pointer slot lies beyond the end of the cell
    #[strum(to_string = "pointer slot outside cell")]
    SlotOutOfBounds,

    /// The pointer does not point between the pointer table and the end of the cell
    #[strum(to_string = "pointer outside cell data")]
    PointerOutOfBounds,

    /// `count` unit records do not fit into the remaining cell bytes
    #[strum(to_string = "unit records exceed cell")]
    UnitsOutOfBounds,
}

/// Errors that can occur while reading, applying or writing calibration data. Errors raised while
/// loading a cell are kept and handed out again by `calibrate()`, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The internal error value is returned from the provided storage
    #[error("internal storage error")]
    StorageError,

    /// The byte at NVMEM offset 0 selects a field map this crate does not know
    #[error("unsupported nvmem map version {0}")]
    UnsupportedMapVersion(u8),

    /// The SHA-1 over the read-only header region does not match the stored one
    #[error("read-only area checksum mismatch")]
    ReadOnlyChecksumMismatch,

    /// `NUM_CALS` is zero, there is nothing to scan
    #[error("module supports no calibrations")]
    NoSupportedCalibrations,

    /// Every calibration cell is empty, erased or carries an unreadable date
    #[error("no valid calibration cell")]
    NoValidCalibrationCell,

    /// The cell's date is erased or its checksum does not match the stored data
    #[error("calibration cell {0} is corrupt")]
    CorruptCell(usize),

    /// The index is outside of the supported calibration cells
    #[error("invalid calibration index {0}")]
    InvalidCalibrationIndex(i32),

    /// The pointer table or unit list of a single range is inconsistent. Only this range is affected.
    #[error("invalid range layout: {0}")]
    InvalidRangeLayout(LayoutFault),

    /// The range name is not part of the module's range table
    #[error("unknown range")]
    UnknownRange,

    /// A range table with duplicate names or slots, or slots beyond the table size
    #[error("invalid range table")]
    InvalidRangeTable,

    /// The calibration blob was written with an incompatible major version
    #[error("calibration major version mismatch: {0:#x}")]
    MajorVersionMismatch(u8),

    /// None of the versioned range tables matches the blob's minor version
    #[error("no range table for minor version {0:#x}")]
    NoMatchingRangeTable(u8),

    /// Data handed to a cell must have exactly the size allocated for the cell
    #[error("cell size mismatch: expected {expected}, got {actual}")]
    CellSizeMismatch { expected: u32, actual: u32 },

    /// The encoded calibration data does not fit into the cell or its address space
    #[error("calibration data exceeds cell")]
    CellOverflow,

    /// The latest calibration is dated after the current time
    #[error("clock is behind the latest calibration")]
    ClockBehindCalibration,

    /// An identity field holds bytes that do not decode
    #[error("invalid field content")]
    InvalidField,

    /// The requested unit index is beyond the range's unit count
    #[error("calibration item out of range")]
    ItemOutOfRange,
}
