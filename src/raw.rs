use core::mem::size_of;

/// Marks a populated calibration unit. Any other flag value reads as an unused unit.
pub const SAVE_MARK: u8 = 0x5A;

/// Only blobs of this major version can be interpreted with the range tables of this crate.
pub const MAJOR_VERSION: u8 = 0x01;

/// Upper bound of calibration generations a module with per-cell addresses may grow to.
pub const MAX_CALIBRATION_CELLS: usize = 3;

pub(crate) const VERSION_SIZE: usize = 1;
pub(crate) const RANGE_POINTER_SIZE: usize = 2;
pub(crate) const COUNT_SIZE: usize = 1;
pub(crate) const UNIT_SIZE: usize = 16;
pub(crate) const CHECKSUM_SIZE: usize = 20;
pub(crate) const ERASED: u8 = 0xFF;

const GAIN_OFFSET: usize = 0;
const OFFSET_OFFSET: usize = 4;
const THRESHOLD_OFFSET: usize = 8;
const FLAG_OFFSET: usize = 12;
const PADDING_OFFSET: usize = 13;

const _: () = assert!(
    size_of::<RawUnit>() == UNIT_SIZE,
    "Calibration unit record must be 16 bytes"
);

/// One calibration unit as stored in NVMEM: three little endian `f32` (gain, offset, threshold),
/// the flag byte and three bytes of `0xFF` padding.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct RawUnit(pub(crate) [u8; UNIT_SIZE]);

impl RawUnit {
    pub(crate) fn from_slice(raw: &[u8]) -> Self {
        let mut buf = [ERASED; UNIT_SIZE];
        buf.copy_from_slice(&raw[..UNIT_SIZE]);
        Self(buf)
    }

    pub(crate) fn populated(gain: f32, offset: f32, threshold: f32) -> Self {
        let mut buf = [ERASED; UNIT_SIZE];
        buf[GAIN_OFFSET..OFFSET_OFFSET].copy_from_slice(&gain.to_le_bytes());
        buf[OFFSET_OFFSET..THRESHOLD_OFFSET].copy_from_slice(&offset.to_le_bytes());
        buf[THRESHOLD_OFFSET..FLAG_OFFSET].copy_from_slice(&threshold.to_le_bytes());
        buf[FLAG_OFFSET] = SAVE_MARK;
        Self(buf)
    }

    pub(crate) const fn unused() -> Self {
        Self([ERASED; UNIT_SIZE])
    }

    fn f32_at(&self, offset: usize) -> f32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.0[offset..offset + 4]);
        f32::from_le_bytes(buf)
    }

    pub(crate) fn gain(&self) -> f32 {
        self.f32_at(GAIN_OFFSET)
    }

    pub(crate) fn offset(&self) -> f32 {
        self.f32_at(OFFSET_OFFSET)
    }

    pub(crate) fn threshold(&self) -> f32 {
        self.f32_at(THRESHOLD_OFFSET)
    }

    pub(crate) fn flag(&self) -> u8 {
        self.0[FLAG_OFFSET]
    }

    pub(crate) fn padding(&self) -> &[u8] {
        &self.0[PADDING_OFFSET..]
    }
}
