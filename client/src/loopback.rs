//! An in-process simulation of the instrument server.
//!
//! A [`LoopbackServer`] holds the simulated instrument. Any number of
//! [`LoopbackTransport`]s can be attached to it, polls block until the server
//! publishes a new cycle with [`LoopbackServer::push_cycle`].
//!
//! The server keeps the last seen cycle per address. An address is registered with
//! the current cycle on its first call, so its first poll waits for a new cycle.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::protocol::{
    AddDataEntry, Automation, FullCycle, FullCycleCapacity, Latin1, MeasureState, PrimaryIon,
    ReturnCode, ServerAction, ServerState, Spectrum, TimingInfo, TraceSet, TraceType, Transmission,
    Version, EPOCH_OFFSET_S,
};
use crate::{Error, Result, Transport};

const DEFAULT_TIMEBINS: usize = 1000;
const DEFAULT_MASSES: [f32; 4] = [21.022, 30.994, 33.033, 59.049];

struct Instrument {
    measure_state: MeasureState,
    server_state: ServerState,
    timebins: usize,
    masses: Vec<f32>,
    resized_masses: Option<Vec<f32>>,
    timing: TimingInfo,
    automation: Automation,
    calibration: [f64; 2],
    spectrum: Spectrum,
    traces: TraceSet,
    add_data: Vec<AddDataEntry<Latin1>>,
    primary_ion: PrimaryIon<Latin1>,
    transmission: Transmission<Latin1>,
    data_filename: Latin1,
    auto_data_filename: Option<Vec<u8>>,
    parameters: HashMap<Vec<u8>, f32>,
    actions: Vec<ServerAction>,
    last_seen: HashMap<String, TimingInfo>,
    fault: Option<ReturnCode>,
    calls: usize,
}

impl Instrument {
    fn new() -> Self {
        let mut ret = Self {
            measure_state: MeasureState::ReadyIdle,
            server_state: ServerState::OK,
            timebins: DEFAULT_TIMEBINS,
            masses: DEFAULT_MASSES.to_vec(),
            resized_masses: None,
            timing: TimingInfo {
                cycle: 0,
                cycle_overall: 0,
                abs_time: EPOCH_OFFSET_S,
                rel_time: 0.0,
            },
            automation: Automation::default(),
            calibration: [9210.0, 3088.0],
            spectrum: Vec::new(),
            traces: TraceSet::default(),
            add_data: vec![
                AddDataEntry {
                    name: Latin1::new(b"p-Drift".to_vec()),
                    group: Latin1::new(b"PTR".to_vec()),
                    value: 2.3,
                },
                AddDataEntry {
                    name: Latin1::new(b"T-Drift".to_vec()),
                    group: Latin1::new(b"PTR".to_vec()),
                    value: 60.0,
                },
            ],
            primary_ion: PrimaryIon {
                name: Latin1::new(b"H3O+".to_vec()),
                masses: vec![21.022, 38.033],
                multipliers: vec![487.0, 1.0],
            },
            transmission: Transmission {
                name: Latin1::new(b"default".to_vec()),
                voltage: 600.0,
                masses: vec![21.022, 59.049, 137.133],
                transmissions: vec![0.1, 0.5, 1.0],
            },
            data_filename: Latin1::new(b"D:\\Data\\2020-09-13_12-26-40.h5".to_vec()),
            auto_data_filename: None,
            parameters: HashMap::new(),
            actions: Vec::new(),
            last_seen: HashMap::new(),
            fault: None,
            calls: 0,
        };
        ret.regenerate();
        ret
    }

    /// Accounts for a transport call and applies an injected fault.
    fn enter(&mut self, op: &'static str, addr: &str) -> Result<()> {
        self.calls += 1;
        let timing = self.timing;
        self.last_seen.entry(addr.to_string()).or_insert(timing);
        log::trace!("loopback: `{}` from {}", op, addr);
        match self.fault.take() {
            Some(code) if code != ReturnCode::Ok => Error::check(code.raw(), op, addr),
            _ => Ok(()),
        }
    }

    fn has_new_cycle(&self, addr: &str) -> bool {
        match self.last_seen.get(addr) {
            Some(last) => self.timing.is_newer_than(last),
            None => true,
        }
    }

    fn mark_seen(&mut self, addr: &str) {
        let timing = self.timing;
        self.last_seen.insert(addr.to_string(), timing);
    }

    fn regenerate(&mut self) {
        let cycle = self.timing.cycle_overall as f32;
        self.spectrum = (0..self.timebins)
            .map(|i| ((i + self.timing.cycle_overall as usize) % 97) as f32)
            .collect();
        let raw: Vec<f32> = self
            .masses
            .iter()
            .enumerate()
            .map(|(i, m)| m * (i as f32 + 1.0) + cycle)
            .collect();
        self.traces = TraceSet {
            corrected: raw.iter().map(|x| x * 0.9).collect(),
            concentration: raw.iter().map(|x| x * 0.01).collect(),
            raw,
        };
    }

    fn advance(&mut self) -> TimingInfo {
        self.timing.cycle += 1;
        self.timing.cycle_overall += 1;
        self.timing.abs_time += 1.0;
        self.timing.rel_time += 1.0;
        self.automation.auto_step_number = self.timing.cycle;
        self.regenerate();
        self.timing
    }
}

fn fill<T: Copy>(dst: &mut [T], src: &[T]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// The simulated server. Cloning yields another handle to the same instrument.
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<(Mutex<Instrument>, Condvar)>,
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(Instrument::new()), Condvar::new())),
        }
    }

    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            server: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Instrument> {
        self.inner.0.lock().unwrap_or_else(|x| x.into_inner())
    }

    /// Publishes a new acquisition cycle and wakes up all waiting polls.
    pub fn push_cycle(&self) -> TimingInfo {
        let ret = self.lock().advance();
        self.inner.1.notify_all();
        ret
    }

    /// Lets the next transport call fail with the given return code.
    pub fn inject_fault(&self, code: ReturnCode) {
        self.lock().fault = Some(code);
    }

    /// Replaces the peak table right after the next peak count was served, as if it
    /// changed between a count and the subsequent fetch.
    pub fn resize_after_count(&self, masses: Vec<f32>) {
        self.lock().resized_masses = Some(masses);
    }

    /// Number of transport calls served so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    pub fn set_timebins(&self, timebins: usize) {
        let mut instr = self.lock();
        instr.timebins = timebins;
        instr.regenerate();
    }

    pub fn set_measure_state(&self, state: MeasureState) {
        self.lock().measure_state = state;
    }

    pub fn set_server_state(&self, state: ServerState) {
        self.lock().server_state = state;
    }

    pub fn set_data_filename<T: Into<Latin1>>(&self, name: T) {
        self.lock().data_filename = name.into();
    }

    pub fn set_add_data(&self, add_data: Vec<AddDataEntry<Latin1>>) {
        self.lock().add_data = add_data;
    }

    pub fn set_primary_ion(&self, primary_ion: PrimaryIon<Latin1>) {
        self.lock().primary_ion = primary_ion;
    }

    pub fn set_parameter(&self, name: &str, value: f32) {
        self.lock().parameters.insert(name.as_bytes().to_vec(), value);
    }

    pub fn auto_data_filename(&self) -> Option<Vec<u8>> {
        self.lock().auto_data_filename.clone()
    }

    pub fn actions(&self) -> Vec<ServerAction> {
        self.lock().actions.clone()
    }

    /// Blocks until `addr` has not yet seen the current cycle or the timeout elapses.
    fn wait_next(
        &self,
        op: &'static str,
        addr: &str,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, Instrument>> {
        let (lock, cvar) = &*self.inner;
        let mut instr = lock.lock().unwrap_or_else(|x| x.into_inner());
        instr.enter(op, addr)?;
        let deadline = Instant::now() + timeout;
        loop {
            if instr.has_new_cycle(addr) {
                instr.mark_seen(addr);
                return Ok(instr);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    op,
                    addr: addr.to_string(),
                });
            }
            let (guard, _) = cvar
                .wait_timeout(instr, deadline - now)
                .unwrap_or_else(|x| x.into_inner());
            instr = guard;
        }
    }
}

pub struct LoopbackTransport {
    server: LoopbackServer,
}

impl LoopbackTransport {
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }

    fn enter(&self, op: &'static str, addr: &str) -> Result<MutexGuard<'_, Instrument>> {
        let mut instr = self.server.lock();
        instr.enter(op, addr)?;
        Ok(instr)
    }
}

impl Transport for LoopbackTransport {
    fn version(&mut self, addr: &str) -> Result<Version<Latin1>> {
        self.enter("GetVersion", addr)?;
        Ok(Version {
            number: 1.0,
            text: Latin1::new(b"loopback 1.0".to_vec()),
        })
    }

    fn measure_state(&mut self, addr: &str) -> Result<MeasureState> {
        Ok(self.enter("GetMeasureState", addr)?.measure_state)
    }

    fn server_state(&mut self, addr: &str) -> Result<ServerState> {
        Ok(self.enter("GetServerState", addr)?.server_state)
    }

    fn set_server_action(&mut self, addr: &str, action: ServerAction) -> Result<()> {
        let mut instr = self.enter("SetServerAction", addr)?;
        instr.actions.push(action);
        match action {
            ServerAction::StartMeasQuick
            | ServerAction::StartMeasRecord
            | ServerAction::StartMeasAuto
            | ServerAction::StartRepeatedMeasurement => {
                instr.measure_state = MeasureState::MeasurementActive
            }
            ServerAction::StopMeasurement => instr.measure_state = MeasureState::ReadyIdle,
            _ => {}
        }
        Ok(())
    }

    fn number_of_peaks(&mut self, addr: &str) -> Result<usize> {
        let mut instr = self.enter("GetNumberOfPeaks", addr)?;
        let n = instr.masses.len();
        if let Some(masses) = instr.resized_masses.take() {
            instr.masses = masses;
            instr.regenerate();
        }
        Ok(n)
    }

    fn number_of_timebins(&mut self, addr: &str) -> Result<usize> {
        Ok(self.enter("GetNumberOfTimebins", addr)?.timebins)
    }

    fn number_of_add_data(&mut self, addr: &str) -> Result<usize> {
        Ok(self.enter("GetNumberOfAddData", addr)?.add_data.len())
    }

    fn read_trace_masses(&mut self, addr: &str, masses: &mut [f32]) -> Result<()> {
        let instr = self.enter("GetTraceMasses", addr)?;
        fill(masses, &instr.masses);
        Ok(())
    }

    fn write_trace_masses(&mut self, addr: &str, masses: &[f32]) -> Result<()> {
        let mut instr = self.enter("SetTraceMasses", addr)?;
        instr.masses = masses.to_vec();
        instr.regenerate();
        Ok(())
    }

    fn read_current_spectrum(
        &mut self,
        addr: &str,
        spectrum: &mut [f32],
        calibration: &mut [f32],
    ) -> Result<TimingInfo> {
        let instr = self.enter("GetCurrentSpec", addr)?;
        fill(spectrum, &instr.spectrum);
        let cal: Vec<f32> = instr.calibration.iter().map(|x| *x as f32).collect();
        fill(calibration, &cal);
        Ok(instr.timing)
    }

    fn read_traces(
        &mut self,
        addr: &str,
        _timeout: Duration,
        raw: &mut [f32],
        corrected: &mut [f32],
        concentration: &mut [f32],
    ) -> Result<()> {
        let instr = self.enter("GetTraceData", addr)?;
        fill(raw, &instr.traces.raw);
        fill(corrected, &instr.traces.corrected);
        fill(concentration, &instr.traces.concentration);
        Ok(())
    }

    fn read_trace(
        &mut self,
        addr: &str,
        timeout: Duration,
        trace_type: TraceType,
        data: &mut [f32],
    ) -> Result<TimingInfo> {
        let op = "GetTraceDataWithTimingInfo";
        match self.server.wait_next(op, addr, timeout) {
            Ok(instr) => {
                fill(data, instr.traces.get(trace_type));
                Ok(instr.timing)
            }
            Err(err) => {
                // the last data is still delivered alongside a timeout
                if err.is_timeout() {
                    let instr = self.server.lock();
                    fill(data, instr.traces.get(trace_type));
                }
                Err(err)
            }
        }
    }

    fn next_timecycle(&mut self, addr: &str, timeout: Duration) -> Result<TimingInfo> {
        Ok(self.server.wait_next("GetNextTimecycle", addr, timeout)?.timing)
    }

    fn read_next_spectrum(
        &mut self,
        addr: &str,
        timeout: Duration,
        calibration: &mut [f64],
        spectrum: &mut [f32],
    ) -> Result<(TimingInfo, Automation)> {
        let instr = self.server.wait_next("GetNextSpec", addr, timeout)?;
        fill(calibration, &instr.calibration);
        fill(spectrum, &instr.spectrum);
        Ok((instr.timing, instr.automation))
    }

    fn next_full_cycle(
        &mut self,
        addr: &str,
        timeout: Duration,
        _capacity: FullCycleCapacity,
    ) -> Result<FullCycle<Latin1>> {
        let instr = self.server.wait_next("GetNextFullCycle", addr, timeout)?;
        Ok(FullCycle {
            timing: instr.timing,
            automation: instr.automation,
            spectrum: instr.spectrum.clone(),
            calibration: crate::protocol::CalibrationParameters(instr.calibration),
            add_data: instr.add_data.clone(),
        })
    }

    fn current_primary_ion(&mut self, addr: &str, _capacity: usize) -> Result<PrimaryIon<Latin1>> {
        Ok(self.enter("GetCurrentPrimaryIon", addr)?.primary_ion.clone())
    }

    fn current_transmission(
        &mut self,
        addr: &str,
        _capacity: usize,
    ) -> Result<Transmission<Latin1>> {
        Ok(self.enter("GetCurrentTransmission", addr)?.transmission.clone())
    }

    fn current_data_filename(&mut self, addr: &str) -> Result<Latin1> {
        Ok(self.enter("GetCurrentDataFileName", addr)?.data_filename.clone())
    }

    fn set_auto_data_filename(&mut self, addr: &str, name: &[u8]) -> Result<()> {
        let mut instr = self.enter("SetAutoDataFileName", addr)?;
        instr.auto_data_filename = Some(name.to_vec());
        Ok(())
    }

    fn add_data_names(&mut self, addr: &str) -> Result<Vec<Latin1>> {
        let instr = self.enter("GetAddDataNames", addr)?;
        Ok(instr.add_data.iter().map(|x| x.name.clone()).collect())
    }

    fn read_add_data_values(&mut self, addr: &str, values: &mut [f32]) -> Result<f64> {
        let instr = self.enter("GetAddDataValues", addr)?;
        let data: Vec<f32> = instr.add_data.iter().map(|x| x.value).collect();
        fill(values, &data);
        Ok(instr.timing.abs_time)
    }

    fn parameter(&mut self, addr: &str, name: &[u8]) -> Result<f32> {
        let op = "GetParamter";
        let instr = self.enter(op, addr)?;
        match instr.parameters.get(name) {
            Some(value) => Ok(*value),
            None => Err(Error::Communication {
                op,
                addr: addr.to_string(),
                code: ReturnCode::Error.raw(),
            }),
        }
    }
}
