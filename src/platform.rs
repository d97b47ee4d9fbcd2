use chrono::NaiveDateTime;
use embedded_storage::Storage;

/// Everything a module needs from its board: byte addressable NVMEM and a wall clock.
///
/// NVMEM offsets are relative to the start of the device. Both traits are expected to block
/// until the underlying transport completed.
pub trait Platform: Storage + Clock {}

impl<T: Storage + Clock> Platform for T {}

/// Wall clock used to date calibration cells. Only minutes are persisted, finer parts are dropped.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

impl<T: Clock> Clock for &T {
    fn now(&self) -> NaiveDateTime {
        T::now(self)
    }
}

impl<T: Clock> Clock for &mut T {
    fn now(&self) -> NaiveDateTime {
        T::now(self)
    }
}

/// Local time of the host, for targets with an operating system.
#[cfg(feature = "clock")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "clock")]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}
