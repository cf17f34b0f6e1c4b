use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::latin1::Latin1;
use crate::state::TraceType;
use crate::TimingInfo;

/// One intensity value per timebin.
pub type Spectrum = Vec<f32>;

/// Raw, corrected and concentration traces, one value per peak of the peak table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSet {
    pub raw: Vec<f32>,
    pub corrected: Vec<f32>,
    pub concentration: Vec<f32>,
}

impl TraceSet {
    pub fn zeroed(n_peaks: usize) -> Self {
        Self {
            raw: vec![0.0; n_peaks],
            corrected: vec![0.0; n_peaks],
            concentration: vec![0.0; n_peaks],
        }
    }

    pub fn get(&self, trace_type: TraceType) -> &[f32] {
        match trace_type {
            TraceType::Raw => &self.raw,
            TraceType::Corrected => &self.corrected,
            TraceType::Concentration => &self.concentration,
        }
    }

    /// Number of peaks, provided all three traces agree.
    pub fn len(&self) -> Option<usize> {
        let n = self.raw.len();
        if self.corrected.len() == n && self.concentration.len() == n {
            Some(n)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.corrected.is_empty() && self.concentration.is_empty()
    }
}

/// Step and run counters of the automation sequencer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Automation {
    pub auto_step_number: i32,
    pub auto_run_number: i32,
    pub auto_use_mean: i32,
    pub auto_start_cycle_mean: i32,
    pub auto_stop_cycle_mean: i32,
    pub ame_action_number: i32,
    pub ame_user_number: i32,
    pub ame_step_number: i32,
    pub ame_run_number: i32,
}

/// Mass calibration of the time-of-flight axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters(pub [f64; CalibrationParameters::LEN]);

impl CalibrationParameters {
    pub const LEN: usize = 2;

    /// Takes the leading parameters from `values`. Returns `None` if there are too few.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() < Self::LEN {
            return None;
        }
        let mut ret = [0.0; Self::LEN];
        ret.copy_from_slice(&values[..Self::LEN]);
        Some(Self(ret))
    }
}

/// An auxiliary instrument channel reported alongside a cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddDataEntry<S = String> {
    pub name: S,
    pub group: S,
    pub value: f32,
}

impl AddDataEntry<Latin1> {
    pub fn decode(self) -> Result<AddDataEntry, DecodeError> {
        Ok(AddDataEntry {
            name: self.name.decode()?,
            group: self.group.decode()?,
            value: self.value,
        })
    }
}

/// Buffer sizes used to pre-allocate the reply of a full-cycle poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullCycleCapacity {
    pub timebins: usize,
    pub add_data: usize,
}

impl Default for FullCycleCapacity {
    fn default() -> Self {
        Self {
            timebins: 100_000,
            add_data: 256,
        }
    }
}

/// Everything the server publishes for one acquisition cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FullCycle<S = String> {
    pub timing: TimingInfo,
    pub automation: Automation,
    pub spectrum: Spectrum,
    pub calibration: CalibrationParameters,
    pub add_data: Vec<AddDataEntry<S>>,
}

impl FullCycle<Latin1> {
    pub fn decode(self) -> Result<FullCycle, DecodeError> {
        let add_data = self
            .add_data
            .into_iter()
            .map(AddDataEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FullCycle {
            timing: self.timing,
            automation: self.automation,
            spectrum: self.spectrum,
            calibration: self.calibration,
            add_data,
        })
    }
}

impl<S> FullCycle<S> {
    /// True if the reply does not fit the buffers it was pre-allocated with.
    pub fn exceeds(&self, capacity: &FullCycleCapacity) -> bool {
        self.spectrum.len() > capacity.timebins || self.add_data.len() > capacity.add_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_set_lengths() {
        let mut traces = TraceSet::zeroed(4);
        assert_eq!(traces.len(), Some(4));
        traces.corrected.push(1.0);
        assert_eq!(traces.len(), None);
        assert_eq!(traces.get(TraceType::Corrected)[4], 1.0);
    }

    #[test]
    fn calibration_from_slices() {
        let cal = CalibrationParameters::from_slice(&[1.5, -2.0, 9.0]).unwrap();
        assert_eq!(cal.0, [1.5, -2.0]);
        assert!(CalibrationParameters::from_slice(&[1.0]).is_none());
    }

    #[test]
    fn decode_full_cycle() {
        let cycle = FullCycle::<Latin1> {
            add_data: vec![AddDataEntry {
                name: Latin1::new(b"T-Drift".to_vec()),
                group: Latin1::new(vec![0xB0, b'C']),
                value: 60.0,
            }],
            ..Default::default()
        };
        let decoded = cycle.decode().unwrap();
        assert_eq!(decoded.add_data[0].name, "T-Drift");
        assert_eq!(decoded.add_data[0].group, "\u{b0}C");

        let broken = FullCycle::<Latin1> {
            add_data: vec![AddDataEntry {
                name: Latin1::new(vec![0x90]),
                group: Latin1::default(),
                value: 0.0,
            }],
            ..Default::default()
        };
        assert!(broken.decode().is_err());
    }

    #[test]
    fn capacity_check() {
        let cycle = FullCycle::<String> {
            spectrum: vec![0.0; 10],
            ..Default::default()
        };
        let cap = FullCycleCapacity {
            timebins: 8,
            add_data: 4,
        };
        assert!(cycle.exceeds(&cap));
        assert!(!cycle.exceeds(&FullCycleCapacity::default()));
    }

    #[test]
    fn serializes_to_json() {
        let timing = TimingInfo {
            cycle: 2,
            cycle_overall: 5,
            abs_time: 1.0,
            rel_time: 0.5,
        };
        let json = serde_json::to_value(&timing).unwrap();
        assert_eq!(json["cycle_overall"], 5);
        let back: TimingInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, timing);
    }
}
