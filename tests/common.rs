#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use chrono::{NaiveDate, NaiveDateTime};
use embedded_storage::{ReadStorage, Storage};
use nvmem_cal::codec::{self, RangeUnits};
use nvmem_cal::platform::Clock;
use nvmem_cal::{CalibrationUnit, RangeTable};
use sha1::{Digest, Sha1};

pub const CAPACITY: usize = 0x800;
pub const RO_CHECKSUM_ADDR: usize = 0x2C;
pub const NUM_CALS_ADDR: usize = 0x18;
pub const FIRST_HEADER_ADDR: usize = 0x40;
pub const V2_HEADER_SIZE: usize = 0x25;
pub const V3_HEADER_SIZE: usize = 0x1D;
pub const CHECKSUM_SIZE: usize = 20;

pub const SERIAL_NUMBER: &[u8; 17] = b"SGT5112001AJ9K3A1";
pub const CONFIG: &[u8; 3] = b"P1A";
pub const ERS_VERSION: u8 = 0x05;
pub const STORAGE_SIZE_KBIT: u16 = 16;

pub fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(hh, mm, 0)
        .unwrap()
}

/// Byte addressable EEPROM with an operation log, fault injection and a settable clock.
pub struct Eeprom {
    pub buf: Vec<u8>,
    pub now: NaiveDateTime,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
}

impl Eeprom {
    pub fn new(image: Vec<u8>, now: NaiveDateTime) -> Self {
        Self {
            buf: image,
            now,
            fail_after_operation: usize::MAX,
            operations: Vec::new(),
        }
    }

    /// Fails every access after `n` further operations.
    pub fn fail_after(&mut self, n: usize) {
        self.fail_after_operation = self.operations.len() + n;
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct EepromError;

impl ReadStorage for Eeprom {
    type Error = EepromError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        println!(
            "    eeprom: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    eeprom: FAULT");
            return Err(EepromError);
        }
        let offset = offset as usize;
        if offset + bytes.len() > self.buf.len() {
            return Err(EepromError);
        }
        self.operations.push(Operation::Read {
            offset: offset as u32,
            len: bytes.len(),
        });

        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Storage for Eeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        println!(
            "    eeprom: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    eeprom: FAULT");
            return Err(EepromError);
        }
        assert!(!bytes.is_empty());
        let offset = offset as usize;
        if offset + bytes.len() > self.buf.len() {
            return Err(EepromError);
        }
        self.operations.push(Operation::Write {
            offset: offset as u32,
            len: bytes.len(),
        });

        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Clock for Eeprom {
    fn now(&self) -> NaiveDateTime {
        self.now
    }
}

/// Builds NVMEM images with valid identity data and read-only checksum. Offsets are written out
/// by hand here so the field map of the crate is checked against them.
pub struct ImageBuilder {
    buf: Vec<u8>,
    version: u8,
    cells: Vec<(u32, u32)>,
}

impl ImageBuilder {
    /// Map version 2 with the given `(start address, size)` per cell.
    pub fn v2(cells: &[(u32, u32)]) -> Self {
        let mut builder = Self::blank(2, cells.to_vec());
        for (index, (start, size)) in cells.iter().enumerate() {
            let slot = FIRST_HEADER_ADDR + index * V2_HEADER_SIZE;
            builder.buf[slot + 0x09..slot + 0x0D].copy_from_slice(&start.to_le_bytes());
            builder.buf[slot + 0x0D..slot + 0x11].copy_from_slice(&size.to_le_bytes());
        }
        builder
    }

    /// Map version 3 with `num_cals` cells of `size` bytes behind the headers.
    pub fn v3(num_cals: usize, size: u32) -> Self {
        let first = (FIRST_HEADER_ADDR + num_cals * V3_HEADER_SIZE) as u32;
        let cells = (0..num_cals as u32)
            .map(|index| (first + index * size, size))
            .collect();
        let mut builder = Self::blank(3, cells);
        builder.buf[0x19..0x1D].copy_from_slice(&size.to_le_bytes());
        builder
    }

    fn blank(version: u8, cells: Vec<(u32, u32)>) -> Self {
        let mut buf = vec![0xFF; CAPACITY];
        buf[0] = version;
        buf[0x01..0x03].copy_from_slice(&STORAGE_SIZE_KBIT.to_le_bytes());
        buf[0x03..0x14].copy_from_slice(SERIAL_NUMBER);
        buf[0x14] = ERS_VERSION;
        buf[0x15..0x18].copy_from_slice(CONFIG);
        buf[NUM_CALS_ADDR] = cells.len() as u8;
        Self {
            buf,
            version,
            cells,
        }
    }

    fn header_size(&self) -> usize {
        match self.version {
            2 => V2_HEADER_SIZE,
            _ => V3_HEADER_SIZE,
        }
    }

    pub fn start(&self, index: usize) -> u32 {
        self.cells[index].0
    }

    pub fn size(&self, index: usize) -> u32 {
        self.cells[index].1
    }

    /// Writes `data` as content of cell `index`, dated `date`, with a matching checksum.
    pub fn cell(mut self, index: usize, date: NaiveDateTime, data: &[u8]) -> Self {
        let (start, size) = self.cells[index];
        assert_eq!(data.len(), size as usize);
        let start = start as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);

        let slot = FIRST_HEADER_ADDR + index * self.header_size();
        self.buf[slot..slot + 9].copy_from_slice(&nvmem_cal::date::encode_cal_date(date));

        let prefix_len = self.header_size() - CHECKSUM_SIZE;
        let mut hasher = Sha1::new();
        hasher.update(&self.buf[slot..slot + prefix_len]);
        hasher.update(data);
        let digest: [u8; CHECKSUM_SIZE] = hasher.finalize().into();
        self.buf[slot + prefix_len..slot + prefix_len + CHECKSUM_SIZE].copy_from_slice(&digest);
        self
    }

    /// Encodes `units` for cell `index` and stores it like [`ImageBuilder::cell`].
    pub fn units(
        self,
        index: usize,
        date: NaiveDateTime,
        table: &RangeTable,
        units: &RangeUnits,
    ) -> Self {
        let data = codec::encode(
            table,
            units,
            0x10,
            self.start(index),
            self.size(index) as usize,
        )
        .unwrap();
        self.cell(index, date, &data)
    }

    pub fn build(mut self) -> Vec<u8> {
        seal(&mut self.buf);
        self.buf
    }
}

/// Recomputes the read-only checksum.
pub fn seal(buf: &mut [u8]) {
    let digest: [u8; CHECKSUM_SIZE] = Sha1::digest(&buf[..RO_CHECKSUM_ADDR]).into();
    buf[RO_CHECKSUM_ADDR..RO_CHECKSUM_ADDR + CHECKSUM_SIZE].copy_from_slice(&digest);
}

pub fn psu_table() -> RangeTable {
    RangeTable::new([("CH1_VOLT", 0), ("CH1_CURR", 1), ("CH2_VOLT", 2)]).unwrap()
}

/// Two segments on CH1_VOLT, one on CH1_CURR and nothing on CH2_VOLT.
pub fn psu_units() -> RangeUnits {
    let mut units = RangeUnits::new();
    units.insert(
        "CH1_VOLT".to_string(),
        vec![
            CalibrationUnit::new(1.5, 0.5, 10.0),
            CalibrationUnit::new(2.0, -1.0, 100.0),
        ],
    );
    units.insert(
        "CH1_CURR".to_string(),
        vec![CalibrationUnit::new(0.5, 0.25, 1000.0)],
    );
    units
}
