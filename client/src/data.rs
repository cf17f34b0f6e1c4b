//! Peak table, spectra and trace data.
//!
//! Array-typed calls query the element count first and then fetch into a buffer of
//! that size. Both steps are separate server calls, so the peak table or the timebin
//! count may change in between. The fetched data then reflects the buffer size, which
//! is the count returned by the first call.

use std::convert::TryFrom;
use std::time::Duration;

use log::{debug, trace};

use crate::protocol::{Spectrum, TimingInfo, TraceSet, TraceType};
use crate::{buffer_len, timeout_ms, Error, Result, Transport};

pub fn get_number_of_peaks<T: Transport>(t: &mut T, addr: &str) -> Result<usize> {
    debug!("GetNumberOfPeaks on {}", addr);
    t.number_of_peaks(addr)
}

pub fn get_number_of_timebins<T: Transport>(t: &mut T, addr: &str) -> Result<usize> {
    debug!("GetNumberOfTimebins on {}", addr);
    t.number_of_timebins(addr)
}

/// The masses of the current peak table.
pub fn get_trace_masses<T: Transport>(t: &mut T, addr: &str) -> Result<Vec<f32>> {
    let n = get_number_of_peaks(t, addr)?;
    buffer_len(n, "GetTraceMasses", addr)?;
    trace!("GetTraceMasses: {} peaks", n);
    let mut ret = vec![0.0; n];
    debug!("GetTraceMasses on {}", addr);
    t.read_trace_masses(addr, &mut ret)?;
    Ok(ret)
}

/// Replaces the peak table of the server.
pub fn set_trace_masses<T: Transport>(t: &mut T, addr: &str, masses: &[f32]) -> Result<()> {
    if let Some((idx, x)) = masses.iter().enumerate().find(|(_, x)| !x.is_finite()) {
        return Err(Error::invalid(
            "SetTraceMasses",
            addr,
            format!("mass at index {} is not finite: {}", idx, x),
        ));
    }
    buffer_len(masses.len(), "SetTraceMasses", addr)?;
    debug!("SetTraceMasses({} masses) on {}", masses.len(), addr);
    t.write_trace_masses(addr, masses)
}

/// The spectrum currently displayed by the server, one value per timebin.
///
/// The call also fills a single precision copy of the mass calibration, which is only
/// logged. [`get_next_full_cycle`](crate::poll::get_next_full_cycle) carries the
/// calibration in full precision.
pub fn get_current_spectrum<T: Transport>(t: &mut T, addr: &str) -> Result<(TimingInfo, Spectrum)> {
    let n = get_number_of_timebins(t, addr)?;
    buffer_len(n, "GetCurrentSpec", addr)?;
    trace!("GetCurrentSpec: {} timebins", n);
    let mut spectrum = vec![0.0; n];
    let mut calibration = [0.0_f32; 2];
    debug!("GetCurrentSpec on {}", addr);
    let timing = t.read_current_spectrum(addr, &mut spectrum, &mut calibration)?;
    trace!("GetCurrentSpec: calibration {:?}", calibration);
    Ok((timing, spectrum))
}

/// Waits for the traces of the next cycle and returns the selected kind.
pub fn get_trace_data<T: Transport>(
    t: &mut T,
    addr: &str,
    timeout: Duration,
    trace_type: TraceType,
) -> Result<(TimingInfo, Vec<f32>)> {
    timeout_ms(timeout, "GetTraceDataWithTimingInfo", addr)?;
    let n = get_number_of_peaks(t, addr)?;
    buffer_len(n, "GetTraceDataWithTimingInfo", addr)?;
    let mut ret = vec![0.0; n];
    debug!("GetTraceDataWithTimingInfo({}) on {}", trace_type, addr);
    let timing = t.read_trace(addr, timeout, trace_type, &mut ret)?;
    Ok((timing, ret))
}

/// Like [`get_trace_data`], selecting the trace kind with its integer encoding.
pub fn get_trace_data_by_index<T: Transport>(
    t: &mut T,
    addr: &str,
    timeout: Duration,
    index: i32,
) -> Result<(TimingInfo, Vec<f32>)> {
    let trace_type = TraceType::try_from(index).map_err(|_| {
        Error::invalid(
            "GetTraceDataWithTimingInfo",
            addr,
            format!(
                "trace type must be 0 (raw), 1 (corrected) or 2 (concentration), got {}",
                index
            ),
        )
    })?;
    get_trace_data(t, addr, timeout, trace_type)
}

/// All three trace kinds of the current cycle.
pub fn get_traces<T: Transport>(t: &mut T, addr: &str, timeout: Duration) -> Result<TraceSet> {
    timeout_ms(timeout, "GetTraceData", addr)?;
    let n = get_number_of_peaks(t, addr)?;
    buffer_len(n, "GetTraceData", addr)?;
    let mut ret = TraceSet::zeroed(n);
    debug!("GetTraceData on {}", addr);
    t.read_traces(
        addr,
        timeout,
        &mut ret.raw,
        &mut ret.corrected,
        &mut ret.concentration,
    )?;
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackServer;

    const ADDR: &str = "localhost";

    #[test]
    fn trace_lengths_follow_peak_table() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        set_trace_masses(&mut t, ADDR, &[21.0, 33.0, 59.0, 69.0, 137.0]).unwrap();
        for index in 0..3 {
            server.push_cycle();
            let (timing, data) =
                get_trace_data_by_index(&mut t, ADDR, Duration::from_millis(100), index).unwrap();
            assert_eq!(data.len(), 5);
            assert_eq!(timing.cycle_overall, index + 1);
        }
    }

    #[test]
    fn invalid_trace_index_never_reaches_transport() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        for index in &[-1, 3, 42] {
            let err = get_trace_data_by_index(&mut t, ADDR, Duration::from_millis(100), *index)
                .unwrap_err();
            match err {
                Error::InvalidArgument { op, addr, .. } => {
                    assert_eq!(op, "GetTraceDataWithTimingInfo");
                    assert_eq!(addr, ADDR);
                }
                err => panic!("unexpected error: {}", err),
            }
        }
        assert_eq!(server.calls(), 0);
    }

    #[test]
    fn trace_masses_round_trip() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let masses = vec![21.022, 42.034, 59.049];
        set_trace_masses(&mut t, ADDR, &masses).unwrap();
        assert_eq!(get_trace_masses(&mut t, ADDR).unwrap(), masses);
        assert_eq!(get_number_of_peaks(&mut t, ADDR).unwrap(), 3);
    }

    #[test]
    fn non_finite_masses_are_rejected() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        assert!(set_trace_masses(&mut t, ADDR, &[1.0, f32::NAN]).is_err());
        assert!(set_trace_masses(&mut t, ADDR, &[f32::INFINITY]).is_err());
        assert_eq!(server.calls(), 0);
    }

    #[test]
    fn spectrum_has_one_value_per_timebin() {
        let server = LoopbackServer::new();
        server.set_timebins(1000);
        let mut t = server.transport();
        let (_, spectrum) = get_current_spectrum(&mut t, ADDR).unwrap();
        assert_eq!(spectrum.len(), 1000);
    }

    #[test]
    fn all_traces() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let traces = get_traces(&mut t, ADDR, Duration::from_millis(100)).unwrap();
        assert_eq!(traces.len(), Some(4));
        assert!(traces.concentration[0] < traces.raw[0]);
    }

    #[test]
    fn trace_data_timeout_discards_buffer() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let err = get_trace_data(&mut t, ADDR, Duration::from_millis(1), TraceType::Corrected)
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.return_code(), Some(2));
        // last seen is registered by the count, so one cycle later the poll succeeds
        server.push_cycle();
        let (timing, data) =
            get_trace_data(&mut t, ADDR, Duration::from_millis(100), TraceType::Corrected).unwrap();
        assert_eq!(timing.cycle_overall, 1);
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn fetch_is_sized_by_the_count() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let grown = vec![21.0, 33.0, 42.0, 59.0, 69.0, 137.0];
        server.resize_after_count(grown.clone());
        assert_eq!(get_trace_masses(&mut t, ADDR).unwrap(), grown[..4].to_vec());
        assert_eq!(get_trace_masses(&mut t, ADDR).unwrap(), grown);

        server.resize_after_count(vec![21.0, 33.0]);
        let masses = get_trace_masses(&mut t, ADDR).unwrap();
        assert_eq!(masses, vec![21.0, 33.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(get_number_of_peaks(&mut t, ADDR).unwrap(), 2);
    }

    #[test]
    fn oversized_timeout_is_rejected_locally() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let timeout = Duration::from_secs(u32::MAX as u64);
        assert!(get_trace_data(&mut t, ADDR, timeout, TraceType::Raw).is_err());
        assert_eq!(server.calls(), 0);
    }
}
