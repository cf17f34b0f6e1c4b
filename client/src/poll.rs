//! Blocking polls for the next acquisition cycle.
//!
//! Each poll returns as soon as the server publishes a cycle newer than the last one
//! seen on this connection, or fails with [`Error::Timeout`] once `timeout` elapsed.
//! A timeout is not fatal, a caller typically polls in a loop:
//!
//! ```ignore
//! loop {
//!     match poll::get_next_timecycle(&mut t, addr, Duration::from_millis(500)) {
//!         Ok(timing) => handle(timing),
//!         Err(err) if err.is_timeout() => continue,
//!         Err(err) => return Err(err),
//!     }
//! }
//! ```
//!
//! There is no cancellation, a poll always runs until it gets data or times out.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::protocol::{FullCycle, FullCycleCapacity, Spectrum, TimingInfo};
use crate::{buffer_len, timeout_ms, Error, Result, Transport};

/// Timing of the next cycle.
pub fn get_next_timecycle<T: Transport>(
    t: &mut T,
    addr: &str,
    timeout: Duration,
) -> Result<TimingInfo> {
    timeout_ms(timeout, "GetNextTimecycle", addr)?;
    debug!("GetNextTimecycle on {}", addr);
    t.next_timecycle(addr, timeout)
}

pub fn get_next_spectrum<T: Transport>(
    t: &mut T,
    addr: &str,
    timeout: Duration,
) -> Result<(TimingInfo, Spectrum)> {
    timeout_ms(timeout, "GetNextSpec", addr)?;
    debug!("GetNumberOfTimebins on {}", addr);
    let n = t.number_of_timebins(addr)?;
    buffer_len(n, "GetNextSpec", addr)?;
    trace!("GetNextSpec: {} timebins", n);
    let mut spectrum = vec![0.0; n];
    let mut calibration = [0.0_f64; 2];
    debug!("GetNextSpec on {}", addr);
    let (timing, _) = t.read_next_spectrum(addr, timeout, &mut calibration, &mut spectrum)?;
    Ok((timing, spectrum))
}

/// Everything published for the next cycle.
///
/// `capacity` pre-sizes the reply buffers. A cycle exceeding it is still returned in
/// full, the overrun is logged.
pub fn get_next_full_cycle<T: Transport>(
    t: &mut T,
    addr: &str,
    timeout: Duration,
    capacity: FullCycleCapacity,
) -> Result<FullCycle> {
    timeout_ms(timeout, "GetNextFullCycle", addr)?;
    buffer_len(capacity.timebins, "GetNextFullCycle", addr)?;
    buffer_len(capacity.add_data, "GetNextFullCycle", addr)?;
    debug!("GetNextFullCycle on {}", addr);
    let ret = t.next_full_cycle(addr, timeout, capacity)?;
    if ret.exceeds(&capacity) {
        warn!(
            "Full cycle on {} exceeds capacity hint: {} timebins / {} add-data for {:?}",
            addr,
            ret.spectrum.len(),
            ret.add_data.len(),
            capacity
        );
    }
    ret.decode()
        .map_err(|x| Error::decoding("GetNextFullCycle", addr, x))
}

/// Derives a full-cycle capacity from the current timebin and add-data counts.
pub fn query_full_cycle_capacity<T: Transport>(t: &mut T, addr: &str) -> Result<FullCycleCapacity> {
    debug!("GetNumberOfTimebins on {}", addr);
    let timebins = t.number_of_timebins(addr)?;
    debug!("GetNumberOfAddData on {}", addr);
    let add_data = t.number_of_add_data(addr)?;
    Ok(FullCycleCapacity { timebins, add_data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::loopback::LoopbackServer;

    const ADDR: &str = "localhost";

    #[test]
    fn zero_timeout_returns_promptly() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let start = Instant::now();
        let err = get_next_timecycle(&mut t, ADDR, Duration::from_millis(0)).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn idle_server_times_out() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let err = get_next_spectrum(&mut t, ADDR, Duration::from_millis(1)).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn next_spectrum_after_cycle() {
        let server = LoopbackServer::new();
        server.set_timebins(250);
        let mut t = server.transport();
        get_next_timecycle(&mut t, ADDR, Duration::from_millis(0)).unwrap_err();

        let pusher = server.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            pusher.push_cycle();
        });
        let (timing, spectrum) = get_next_spectrum(&mut t, ADDR, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(timing.cycle_overall, 1);
        assert_eq!(spectrum.len(), 250);
    }

    #[test]
    fn full_cycle_beyond_capacity_is_complete() {
        let server = LoopbackServer::new();
        server.set_timebins(64);
        let mut t = server.transport();
        let capacity = query_full_cycle_capacity(&mut t, ADDR).unwrap();
        assert_eq!(capacity.timebins, 64);
        assert_eq!(capacity.add_data, 2);

        server.push_cycle();
        let small = FullCycleCapacity {
            timebins: 8,
            add_data: 1,
        };
        let cycle = get_next_full_cycle(&mut t, ADDR, Duration::from_millis(100), small).unwrap();
        assert_eq!(cycle.spectrum.len(), 64);
        assert_eq!(cycle.add_data.len(), 2);
        assert_eq!(cycle.add_data[1].name, "T-Drift");
    }

    #[test]
    fn next_timecycle_carries_cycle_times() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        get_next_timecycle(&mut t, ADDR, Duration::from_millis(0)).unwrap_err();
        let pushed = server.push_cycle();
        let timing = get_next_timecycle(&mut t, ADDR, Duration::from_millis(100)).unwrap();
        assert_eq!(timing, pushed);
        assert_eq!(timing.posix_time(), 1.0);
        assert_eq!(timing.rel_time, 1.0);
    }

    #[test]
    fn full_cycle_timeout() {
        let server = LoopbackServer::new();
        server.set_timebins(16);
        let mut t = server.transport();
        let capacity = query_full_cycle_capacity(&mut t, ADDR).unwrap();
        let err = get_next_full_cycle(&mut t, ADDR, Duration::from_millis(1), capacity).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_recoverable());

        let pushed = server.push_cycle();
        let cycle = get_next_full_cycle(&mut t, ADDR, Duration::from_millis(100), capacity).unwrap();
        assert_eq!(cycle.timing, pushed);
        assert_eq!(cycle.spectrum.len(), 16);
    }

    #[test]
    fn full_cycle_fault() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        let capacity = query_full_cycle_capacity(&mut t, ADDR).unwrap();
        server.push_cycle();
        server.inject_fault(crate::protocol::ReturnCode::Error);
        let err = get_next_full_cycle(&mut t, ADDR, Duration::from_millis(100), capacity).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(err.return_code(), Some(1));
        match err {
            Error::Communication { op, addr, .. } => {
                assert_eq!(op, "GetNextFullCycle");
                assert_eq!(addr, ADDR);
            }
            err => panic!("unexpected error: {}", err),
        }
    }

    #[test]
    fn fault_during_poll() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        server.inject_fault(crate::protocol::ReturnCode::Error);
        let err = get_next_timecycle(&mut t, ADDR, Duration::from_millis(10)).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(err.return_code(), Some(1));
    }
}
