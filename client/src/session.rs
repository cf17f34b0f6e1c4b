use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    FullCycle, FullCycleCapacity, MeasureState, PrimaryIon, ServerAction, ServerState, Spectrum,
    TimingInfo, TraceSet, TraceType, Transmission, Version,
};
use crate::{data, metadata, poll, state, Error, Result, Transport};

/// Tunables of a [`Session`]. Can be loaded from a JSON config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Timeout in milliseconds for calls taking one.
    pub timeout_ms: u32,
    pub primary_ion_capacity: usize,
    pub transmission_capacity: usize,
    /// Fixed capacity for full-cycle polls. Queried from the server if not given.
    pub full_cycle: Option<FullCycleCapacity>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: crate::DEFAULT_TIMEOUT.as_millis() as u32,
            primary_ion_capacity: 10,
            transmission_capacity: 10,
            full_cycle: None,
        }
    }
}

impl SessionOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}

/// Binds a transport to the address of one instrument server.
///
/// Methods take `&mut self`, so at most one call, and in particular one poll, is in
/// flight per session.
pub struct Session<T: Transport> {
    transport: T,
    address: String,
    pub options: SessionOptions,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    pub fn new<A: Into<String>>(transport: T, address: A) -> Result<Self> {
        Self::with_options(transport, address, SessionOptions::default())
    }

    pub fn with_options<A: Into<String>>(
        transport: T,
        address: A,
        options: SessionOptions,
    ) -> Result<Self> {
        let address = address.into();
        if address.is_empty() || address.contains('\0') {
            return Err(Error::invalid(
                "Session",
                &address,
                format!("invalid address: {:?}", address),
            ));
        }
        Ok(Self {
            transport,
            address,
            options,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn measure_state(&mut self) -> Result<MeasureState> {
        state::get_measure_state(&mut self.transport, &self.address)
    }

    pub fn server_state(&mut self) -> Result<ServerState> {
        state::get_server_state(&mut self.transport, &self.address)
    }

    pub fn version(&mut self) -> Result<Version> {
        state::get_version(&mut self.transport, &self.address)
    }

    pub fn set_server_action(&mut self, action: ServerAction) -> Result<()> {
        state::set_server_action(&mut self.transport, &self.address, action)
    }

    pub fn number_of_peaks(&mut self) -> Result<usize> {
        data::get_number_of_peaks(&mut self.transport, &self.address)
    }

    pub fn number_of_timebins(&mut self) -> Result<usize> {
        data::get_number_of_timebins(&mut self.transport, &self.address)
    }

    pub fn trace_masses(&mut self) -> Result<Vec<f32>> {
        data::get_trace_masses(&mut self.transport, &self.address)
    }

    pub fn set_trace_masses(&mut self, masses: &[f32]) -> Result<()> {
        data::set_trace_masses(&mut self.transport, &self.address, masses)
    }

    pub fn current_spectrum(&mut self) -> Result<(TimingInfo, Spectrum)> {
        data::get_current_spectrum(&mut self.transport, &self.address)
    }

    pub fn trace_data(
        &mut self,
        timeout: Duration,
        trace_type: TraceType,
    ) -> Result<(TimingInfo, Vec<f32>)> {
        data::get_trace_data(&mut self.transport, &self.address, timeout, trace_type)
    }

    pub fn traces(&mut self, timeout: Duration) -> Result<TraceSet> {
        data::get_traces(&mut self.transport, &self.address, timeout)
    }

    pub fn next_timecycle(&mut self, timeout: Duration) -> Result<TimingInfo> {
        poll::get_next_timecycle(&mut self.transport, &self.address, timeout)
    }

    pub fn next_spectrum(&mut self, timeout: Duration) -> Result<(TimingInfo, Spectrum)> {
        poll::get_next_spectrum(&mut self.transport, &self.address, timeout)
    }

    /// Uses the configured capacity or derives one from the server's current counts.
    pub fn full_cycle_capacity(&mut self) -> Result<FullCycleCapacity> {
        match self.options.full_cycle {
            Some(x) => Ok(x),
            None => poll::query_full_cycle_capacity(&mut self.transport, &self.address),
        }
    }

    pub fn next_full_cycle(&mut self, timeout: Duration) -> Result<FullCycle> {
        let capacity = self.full_cycle_capacity()?;
        poll::get_next_full_cycle(&mut self.transport, &self.address, timeout, capacity)
    }

    pub fn current_primary_ion(&mut self) -> Result<PrimaryIon> {
        let capacity = self.options.primary_ion_capacity;
        metadata::get_current_primary_ion(&mut self.transport, &self.address, capacity)
    }

    pub fn current_transmission(&mut self) -> Result<Transmission> {
        let capacity = self.options.transmission_capacity;
        metadata::get_current_transmission(&mut self.transport, &self.address, capacity)
    }

    pub fn current_data_filename(&mut self) -> Result<String> {
        metadata::get_current_data_filename(&mut self.transport, &self.address)
    }

    pub fn set_auto_data_filename(&mut self, name: &str) -> Result<()> {
        metadata::set_auto_data_filename(&mut self.transport, &self.address, name)
    }

    pub fn number_of_add_data(&mut self) -> Result<usize> {
        metadata::get_number_of_add_data(&mut self.transport, &self.address)
    }

    pub fn add_data_names(&mut self) -> Result<Vec<String>> {
        metadata::get_add_data_names(&mut self.transport, &self.address)
    }

    pub fn add_data_values(&mut self) -> Result<(f64, Vec<f32>)> {
        metadata::get_add_data_values(&mut self.transport, &self.address)
    }

    pub fn parameter(&mut self, name: &str) -> Result<f32> {
        metadata::get_parameter(&mut self.transport, &self.address, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackServer;

    #[test]
    fn options_from_json() {
        let opts: SessionOptions =
            serde_json::from_str(r#"{"timeout_ms": 250, "full_cycle": {"timebins": 10, "add_data": 2}}"#)
                .unwrap();
        assert_eq!(opts.timeout(), Duration::from_millis(250));
        assert_eq!(opts.primary_ion_capacity, 10);
        assert_eq!(opts.full_cycle.unwrap().timebins, 10);

        let opts: SessionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, SessionOptions::default());
        assert_eq!(opts.timeout(), crate::DEFAULT_TIMEOUT);
    }

    #[test]
    fn rejects_bad_address() {
        let server = LoopbackServer::new();
        let err = Session::new(server.transport(), "").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { op: "Session", .. }));
        assert!(Session::new(server.transport(), "local\0host").is_err());
    }

    #[test]
    fn session_binds_address() {
        let server = LoopbackServer::new();
        let mut session = Session::new(server.transport(), "192.168.0.10").unwrap();
        assert_eq!(session.address(), "192.168.0.10");
        assert_eq!(session.measure_state().unwrap(), MeasureState::ReadyIdle);
        assert_eq!(session.number_of_peaks().unwrap(), 4);

        server.push_cycle();
        let cycle = session.next_full_cycle(Duration::from_millis(100)).unwrap();
        assert_eq!(cycle.timing.cycle_overall, 1);
        assert_eq!(cycle.spectrum.len(), session.number_of_timebins().unwrap());
        assert_eq!(session.into_inner().server().calls(), server.calls());
    }

    #[test]
    fn configured_capacity_skips_query() {
        let server = LoopbackServer::new();
        let options = SessionOptions {
            full_cycle: Some(FullCycleCapacity {
                timebins: 5,
                add_data: 1,
            }),
            ..Default::default()
        };
        let mut session = Session::with_options(server.transport(), "localhost", options).unwrap();
        assert_eq!(session.full_cycle_capacity().unwrap().timebins, 5);
        assert_eq!(server.calls(), 0);
    }
}
