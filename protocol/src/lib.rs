//! Data model of the IcAPI instrument server: state enumerations, timing
//! information, spectra, traces and metadata, plus the return-code and Latin-1
//! conventions of the vendor interface.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub mod cycle;
pub mod error;
pub mod latin1;
pub mod metadata;
pub mod state;

pub use crate::cycle::{
    AddDataEntry, Automation, CalibrationParameters, FullCycle, FullCycleCapacity, Spectrum,
    TraceSet,
};
pub use crate::error::{DecodeError, EncodeError, ReturnCode, UnknownValue};
pub use crate::latin1::Latin1;
pub use crate::metadata::{PrimaryIon, Transmission, Version};
pub use crate::state::{MeasureState, ServerAction, ServerState, TraceType};

/// Seconds between the server's epoch (1904-01-01 UTC) and the POSIX epoch.
pub const EPOCH_OFFSET_S: f64 = 2_082_844_800.0;

/// Associates a data payload with a point in acquisition time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub cycle: i32,
    pub cycle_overall: i32,
    /// Seconds since 1904-01-01 UTC.
    pub abs_time: f64,
    /// Seconds since the start of the measurement.
    pub rel_time: f64,
}

impl TimingInfo {
    /// Rebuilds the timing information from the legacy layout, where both
    /// timestamps travel as four single floats holding the big-endian bytes of
    /// two doubles.
    pub fn from_packed(cycle: i32, cycle_overall: i32, packed: [f32; 4]) -> Self {
        let mut buf = Vec::with_capacity(16);
        for x in packed.iter() {
            // writing into a Vec cannot fail
            let _ = buf.write_f32::<BigEndian>(*x);
        }
        let mut rdr = Cursor::new(buf);
        let abs_time = rdr.read_f64::<BigEndian>().unwrap_or(f64::NAN);
        let rel_time = rdr.read_f64::<BigEndian>().unwrap_or(f64::NAN);
        Self {
            cycle,
            cycle_overall,
            abs_time,
            rel_time,
        }
    }

    pub fn posix_time(&self) -> f64 {
        self.abs_time - EPOCH_OFFSET_S
    }

    /// `None` if the absolute time is not finite or out of range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let posix = self.posix_time();
        if !posix.is_finite() {
            return None;
        }
        let secs = posix.floor();
        let nanos = (((posix - secs) * 1e9).round() as u32).min(999_999_999);
        Utc.timestamp_opt(secs as i64, nanos).single()
    }

    /// True if `self` belongs to a later acquisition cycle than `other`.
    pub fn is_newer_than(&self, other: &TimingInfo) -> bool {
        self.cycle_overall > other.cycle_overall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn posix_conversion() {
        let timing = TimingInfo {
            cycle: 1,
            cycle_overall: 1,
            abs_time: EPOCH_OFFSET_S + 1_600_000_000.5,
            rel_time: 0.0,
        };
        assert_eq!(timing.posix_time(), 1_600_000_000.5);
        let dt = timing.datetime().unwrap();
        assert_eq!(dt.year(), 2020);
        assert_eq!(dt.month(), 9);
        assert_eq!(dt.second(), 40);
        assert_eq!(dt.nanosecond(), 500_000_000);
    }

    #[test]
    fn epoch_1904() {
        let timing = TimingInfo::default();
        let dt = timing.datetime().unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (1904, 1, 1));
    }

    #[test]
    fn packed_timestamps() {
        let abs = 3_700_000_000.25_f64;
        let rel = 12.5_f64;
        let mut bytes = Vec::new();
        bytes.write_f64::<BigEndian>(abs).unwrap();
        bytes.write_f64::<BigEndian>(rel).unwrap();
        let mut rdr = Cursor::new(bytes);
        let mut packed = [0.0_f32; 4];
        for x in packed.iter_mut() {
            *x = rdr.read_f32::<BigEndian>().unwrap();
        }
        let timing = TimingInfo::from_packed(7, 42, packed);
        assert_eq!(timing.cycle, 7);
        assert_eq!(timing.cycle_overall, 42);
        assert_eq!(timing.abs_time, abs);
        assert_eq!(timing.rel_time, rel);
    }

    #[test]
    fn newer() {
        let a = TimingInfo {
            cycle_overall: 3,
            ..Default::default()
        };
        let b = TimingInfo {
            cycle_overall: 4,
            ..Default::default()
        };
        assert!(b.is_newer_than(&a));
        assert!(!a.is_newer_than(&a));
    }
}
