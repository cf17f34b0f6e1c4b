//! # Client Library for the IcAPI Instrument Server
//!
//! This library provides typed, error-checked access to the instrument server of a
//! PTR mass spectrometer. It's a slim layer on top of an [`Transport`], which abstracts
//! over the interface actually talking to the server. There are 2 implementations:
//!
//!  * `icapi::IcApiTransport` - Forwards to the vendor's `IcAPI` library, loaded at runtime.
//!  * [`loopback::LoopbackTransport`] - An in-process simulated server for tests and dry runs.
//!
//! Every operation exists as a free function taking the transport and the server address,
//! mirroring the stateless vendor interface. [`Session`] binds the address once.
//!
//! All calls are blocking. The `get_next_*` family of [`poll`] blocks for up to the given
//! timeout waiting for a new acquisition cycle. Only one poll per session should be in
//! flight at a time, as the server tracks the last seen cycle per connection. Use
//! [`asynced::AsyncSession`] to run a session on a dedicated thread from async code.
//!
//! Errors are captured in the [`enum@Error`] type. The library never retries: a
//! [`Error::Timeout`] is recoverable and the caller is expected to poll again, whereas a
//! [`Error::Communication`] is considered fatal for the current session.
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use protocol::{
    Automation, DecodeError, FullCycle, FullCycleCapacity, Latin1, MeasureState, PrimaryIon,
    ReturnCode, ServerAction, ServerState, TimingInfo, TraceType, Transmission, UnknownValue,
    Version,
};

pub mod asynced;
pub mod data;
pub mod loopback;
pub mod metadata;
pub mod poll;
pub mod session;
pub mod state;

pub use icapi_protocol as protocol;
pub use session::{Session, SessionOptions};

/// The default timeout for calls taking one. Polls accept a custom timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Error type unifying local argument validation and failures reported by the server.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid argument in `{op}` on {addr}: {msg}")]
    InvalidArgument {
        op: &'static str,
        addr: String,
        msg: String,
    },
    #[error("Communication error in `{op}` on {addr} (return code {code})")]
    Communication {
        op: &'static str,
        addr: String,
        code: u16,
    },
    #[error("Timeout in `{op}` on {addr}")]
    Timeout { op: &'static str, addr: String },
    #[error("Decoding error in `{op}` on {addr}: {source}")]
    Decoding {
        op: &'static str,
        addr: String,
        source: DecodeError,
    },
    #[error("Unexpected value in `{op}` on {addr}: {source}")]
    UnexpectedValue {
        op: &'static str,
        addr: String,
        source: UnknownValue,
    },
    #[error("Library Error: {0}")]
    Library(Arc<anyhow::Error>),
    #[error("Session thread hung up")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Translates a raw return code of the vendor interface.
    pub fn check(code: u16, op: &'static str, addr: &str) -> Result<()> {
        match ReturnCode::from_raw(code) {
            Some(ReturnCode::Ok) => Ok(()),
            Some(ReturnCode::Timeout) => Err(Error::Timeout {
                op,
                addr: addr.to_string(),
            }),
            Some(ReturnCode::Error) | None => Err(Error::Communication {
                op,
                addr: addr.to_string(),
                code,
            }),
        }
    }

    /// An argument rejected before the call reached the server.
    pub fn invalid<T: Into<String>>(op: &'static str, addr: &str, msg: T) -> Self {
        Error::InvalidArgument {
            op,
            addr: addr.to_string(),
            msg: msg.into(),
        }
    }

    pub fn library<T: Into<anyhow::Error>>(err: T) -> Self {
        Error::Library(Arc::new(err.into()))
    }

    pub fn decoding(op: &'static str, addr: &str, source: DecodeError) -> Self {
        Error::Decoding {
            op,
            addr: addr.to_string(),
            source,
        }
    }

    pub fn unexpected(op: &'static str, addr: &str, source: UnknownValue) -> Self {
        Error::UnexpectedValue {
            op,
            addr: addr.to_string(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Timeouts and locally rejected arguments leave the session usable. After anything
    /// else the caller should re-establish the session, e.g. with a fresh state query.
    pub fn is_recoverable(&self) -> bool {
        self.is_timeout() || matches!(self, Error::InvalidArgument { .. })
    }

    /// The raw return code, if the error was reported by the server.
    pub fn return_code(&self) -> Option<u16> {
        match self {
            Error::Communication { code, .. } => Some(*code),
            Error::Timeout { .. } => Some(ReturnCode::Timeout.raw()),
            _ => None,
        }
    }
}

/// Converts a timeout into the milliseconds taken by the vendor interface.
pub fn timeout_ms(timeout: Duration, op: &'static str, addr: &str) -> Result<i32> {
    i32::try_from(timeout.as_millis()).map_err(|_| {
        Error::invalid(op, addr, format!("timeout of {:?} exceeds the supported range", timeout))
    })
}

/// Converts a buffer length into the `int32_t` length of the vendor interface.
pub fn buffer_len(len: usize, op: &'static str, addr: &str) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| Error::invalid(op, addr, format!("buffer length {} exceeds i32", len)))
}

/// A blocking request-response interface to the instrument server.
///
/// Methods map onto single calls of the vendor interface. Array-typed calls take
/// caller-owned buffers, sized by the caller, which must not be retained beyond the call.
/// Sizing the buffers (count-then-fetch) and decoding strings is left to the free
/// functions of this crate.
pub trait Transport: Send {
    fn version(&mut self, addr: &str) -> Result<Version<Latin1>>;

    fn measure_state(&mut self, addr: &str) -> Result<MeasureState>;

    fn server_state(&mut self, addr: &str) -> Result<ServerState>;

    fn set_server_action(&mut self, addr: &str, action: ServerAction) -> Result<()>;

    fn number_of_peaks(&mut self, addr: &str) -> Result<usize>;

    fn number_of_timebins(&mut self, addr: &str) -> Result<usize>;

    fn number_of_add_data(&mut self, addr: &str) -> Result<usize>;

    fn read_trace_masses(&mut self, addr: &str, masses: &mut [f32]) -> Result<()>;

    fn write_trace_masses(&mut self, addr: &str, masses: &[f32]) -> Result<()>;

    fn read_current_spectrum(
        &mut self,
        addr: &str,
        spectrum: &mut [f32],
        calibration: &mut [f32],
    ) -> Result<TimingInfo>;

    fn read_traces(
        &mut self,
        addr: &str,
        timeout: Duration,
        raw: &mut [f32],
        corrected: &mut [f32],
        concentration: &mut [f32],
    ) -> Result<()>;

    /// Waits for the trace data of a new cycle.
    fn read_trace(
        &mut self,
        addr: &str,
        timeout: Duration,
        trace_type: TraceType,
        data: &mut [f32],
    ) -> Result<TimingInfo>;

    fn next_timecycle(&mut self, addr: &str, timeout: Duration) -> Result<TimingInfo>;

    fn read_next_spectrum(
        &mut self,
        addr: &str,
        timeout: Duration,
        calibration: &mut [f64],
        spectrum: &mut [f32],
    ) -> Result<(TimingInfo, Automation)>;

    /// `capacity` pre-sizes the reply buffers. A transport may return more data.
    fn next_full_cycle(
        &mut self,
        addr: &str,
        timeout: Duration,
        capacity: FullCycleCapacity,
    ) -> Result<FullCycle<Latin1>>;

    fn current_primary_ion(&mut self, addr: &str, capacity: usize) -> Result<PrimaryIon<Latin1>>;

    fn current_transmission(
        &mut self,
        addr: &str,
        capacity: usize,
    ) -> Result<Transmission<Latin1>>;

    fn current_data_filename(&mut self, addr: &str) -> Result<Latin1>;

    fn set_auto_data_filename(&mut self, addr: &str, name: &[u8]) -> Result<()>;

    fn add_data_names(&mut self, addr: &str) -> Result<Vec<Latin1>>;

    /// Fills `values` and returns the absolute time of the values.
    fn read_add_data_values(&mut self, addr: &str, values: &mut [f32]) -> Result<f64>;

    fn parameter(&mut self, addr: &str, name: &[u8]) -> Result<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_translation() {
        assert!(Error::check(0, "GetMeasureState", "localhost").is_ok());

        let err = Error::check(2, "GetNextTimecycle", "localhost").unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
        assert_eq!(err.return_code(), Some(2));

        let err = Error::check(1, "GetMeasureState", "10.0.0.1").unwrap_err();
        assert!(!err.is_recoverable());
        let msg = err.to_string();
        assert!(msg.contains("GetMeasureState"));
        assert!(msg.contains("10.0.0.1"));
        assert!(msg.contains("return code 1"));
    }

    #[test]
    fn unknown_return_code_is_a_fault() {
        let err = Error::check(7, "GetServerState", "localhost").unwrap_err();
        assert_eq!(err.return_code(), Some(7));
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_range() {
        let op = "GetNextSpec";
        assert_eq!(timeout_ms(Duration::from_millis(0), op, "localhost").unwrap(), 0);
        assert_eq!(timeout_ms(Duration::from_secs(2), op, "localhost").unwrap(), 2000);
        let err = timeout_ms(Duration::from_secs(u64::MAX / 4), op, "10.0.0.1").unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.return_code(), None);
        let msg = err.to_string();
        assert!(msg.contains("GetNextSpec"));
        assert!(msg.contains("10.0.0.1"));
    }
}
