use std::convert::TryFrom;
use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::Arc;
use std::time::Duration;

use icapi_client::protocol::{
    AddDataEntry, Automation, CalibrationParameters, FullCycle, FullCycleCapacity, Latin1,
    MeasureState, PrimaryIon, ServerAction, ServerState, TimingInfo, TraceType, Transmission,
    UnknownValue, Version,
};
use icapi_client::{buffer_len, timeout_ms, Error, Result, Transport, DEFAULT_TIMEOUT};

use crate::icapi_sys::{
    IcAutomation, IcFullcycle, IcPrimaryIon, IcTimingInfo, IcTransmission, Library,
    LibraryOptions, LStrHandleArray, Owned,
};
use crate::lv;

/// Buffer size for paths, as used by the server.
const MAX_PATH_LEN: usize = 260;
const VERSION_LEN: usize = 256;

fn c_string(op: &'static str, addr: &str, what: &str, data: Vec<u8>) -> Result<CString> {
    CString::new(data)
        .map_err(|_| Error::invalid(op, addr, format!("{} contains a NUL byte", what)))
}

fn pairs(names: Vec<Vec<u8>>, groups: Vec<Vec<u8>>, values: Vec<f32>) -> Vec<AddDataEntry<Latin1>> {
    if names.len() != values.len() || groups.len() != values.len() {
        log::warn!(
            "Add-data of uneven length: {} names, {} groups, {} values",
            names.len(),
            groups.len(),
            values.len()
        );
    }
    let mut names = names.into_iter();
    let mut groups = groups.into_iter();
    values
        .into_iter()
        .map(|value| AddDataEntry {
            name: Latin1::new(names.next().unwrap_or_default()),
            group: Latin1::new(groups.next().unwrap_or_default()),
            value,
        })
        .collect()
}

/// Talks to instrument servers through the vendor's interface library.
///
/// The library is stateless with respect to its callers, so the transport may be
/// cloned freely. All clones share the loaded library.
#[derive(Clone)]
pub struct IcApiTransport {
    lib: Arc<Library>,
}

impl IcApiTransport {
    pub fn new(lib: Arc<Library>) -> Self {
        Self { lib }
    }

    pub fn open(options: &LibraryOptions) -> Result<Self> {
        let lib = Library::open(options).map_err(Error::library)?;
        Ok(Self::new(Arc::new(lib)))
    }

    fn ip(op: &'static str, addr: &str) -> Result<CString> {
        c_string(op, addr, "address", addr.as_bytes().to_vec())
    }
}

impl Transport for IcApiTransport {
    fn version(&mut self, _addr: &str) -> Result<Version<Latin1>> {
        let mut number = 0.0_f64;
        let mut text = [0_u8; VERSION_LEN];
        unsafe {
            self.lib.api.IcAPI_GetVersion(
                &mut number,
                text.as_mut_ptr() as *mut c_char,
                VERSION_LEN as i32,
            )
        };
        Ok(Version {
            number,
            text: Latin1::from_c_buffer(&text),
        })
    }

    fn measure_state(&mut self, addr: &str) -> Result<MeasureState> {
        let op = "GetMeasureState";
        let ip = Self::ip(op, addr)?;
        let mut raw = 0_u16;
        let code = unsafe { self.lib.api.IcAPI_GetMeasureState(ip.as_ptr(), &mut raw) };
        Error::check(code, op, addr)?;
        MeasureState::try_from(raw).map_err(|x| Error::unexpected(op, addr, x))
    }

    fn server_state(&mut self, addr: &str) -> Result<ServerState> {
        let op = "GetServerState";
        let ip = Self::ip(op, addr)?;
        let mut raw = 0_u16;
        let code = unsafe { self.lib.api.IcAPI_GetServerState(ip.as_ptr(), &mut raw) };
        Error::check(code, op, addr)?;
        ServerState::try_from(raw).map_err(|x| Error::unexpected(op, addr, x))
    }

    fn set_server_action(&mut self, addr: &str, action: ServerAction) -> Result<()> {
        let ip = Self::ip("SetServerAction", addr)?;
        let code = unsafe { self.lib.api.IcAPI_SetServerAction(ip.as_ptr(), action.raw()) };
        Error::check(code, "SetServerAction", addr)
    }

    fn number_of_peaks(&mut self, addr: &str) -> Result<usize> {
        let ip = Self::ip("GetNumberOfPeaks", addr)?;
        let mut n = 0_u32;
        // the timeout argument is ignored by the server
        let tmo = timeout_ms(DEFAULT_TIMEOUT, "GetNumberOfPeaks", addr)?;
        let code = unsafe { self.lib.api.IcAPI_GetNumberOfPeaks(ip.as_ptr(), tmo, &mut n) };
        Error::check(code, "GetNumberOfPeaks", addr)?;
        Ok(n as usize)
    }

    fn number_of_timebins(&mut self, addr: &str) -> Result<usize> {
        let op = "GetNumberOfTimebins";
        let ip = Self::ip(op, addr)?;
        let mut n = 0_i32;
        let code = unsafe { self.lib.api.IcAPI_GetNumberOfTimebins(ip.as_ptr(), &mut n) };
        Error::check(code, op, addr)?;
        usize::try_from(n).map_err(|_| Error::unexpected(op, addr, UnknownValue::new("timebin count", n)))
    }

    fn number_of_add_data(&mut self, addr: &str) -> Result<usize> {
        let ip = Self::ip("GetNumberOfAddData", addr)?;
        let mut n = 0_u32;
        let tmo = timeout_ms(DEFAULT_TIMEOUT, "GetNumberOfAddData", addr)?;
        let code = unsafe { self.lib.api.IcAPI_GetNumberOfAddData(ip.as_ptr(), tmo, &mut n) };
        Error::check(code, "GetNumberOfAddData", addr)?;
        Ok(n as usize)
    }

    fn read_trace_masses(&mut self, addr: &str, masses: &mut [f32]) -> Result<()> {
        let ip = Self::ip("GetTraceMasses", addr)?;
        let len = buffer_len(masses.len(), "GetTraceMasses", addr)?;
        let code =
            unsafe { self.lib.api.IcAPI_GetTraceMasses(ip.as_ptr(), masses.as_mut_ptr(), len) };
        Error::check(code, "GetTraceMasses", addr)
    }

    fn write_trace_masses(&mut self, addr: &str, masses: &[f32]) -> Result<()> {
        let ip = Self::ip("SetTraceMasses", addr)?;
        let len = buffer_len(masses.len(), "SetTraceMasses", addr)?;
        let code = unsafe { self.lib.api.IcAPI_SetTraceMasses(ip.as_ptr(), masses.as_ptr(), len) };
        Error::check(code, "SetTraceMasses", addr)
    }

    fn read_current_spectrum(
        &mut self,
        addr: &str,
        spectrum: &mut [f32],
        calibration: &mut [f32],
    ) -> Result<TimingInfo> {
        let ip = Self::ip("GetCurrentSpec", addr)?;
        let len_spec = buffer_len(spectrum.len(), "GetCurrentSpec", addr)?;
        let len_cal = buffer_len(calibration.len(), "GetCurrentSpec", addr)?;
        let mut timing = IcTimingInfo::default();
        let code = unsafe {
            self.lib.api.IcAPI_GetCurrentSpec(
                ip.as_ptr(),
                spectrum.as_mut_ptr(),
                &mut timing,
                calibration.as_mut_ptr(),
                len_spec,
                len_cal,
            )
        };
        Error::check(code, "GetCurrentSpec", addr)?;
        Ok(timing.into())
    }

    fn read_traces(
        &mut self,
        addr: &str,
        timeout: Duration,
        raw: &mut [f32],
        corrected: &mut [f32],
        concentration: &mut [f32],
    ) -> Result<()> {
        let ip = Self::ip("GetTraceData", addr)?;
        let tmo = timeout_ms(timeout, "GetTraceData", addr)?;
        let code = unsafe {
            self.lib.api.IcAPI_GetTraceData(
                ip.as_ptr(),
                tmo,
                raw.as_mut_ptr(),
                corrected.as_mut_ptr(),
                concentration.as_mut_ptr(),
                buffer_len(raw.len(), "GetTraceData", addr)?,
                buffer_len(corrected.len(), "GetTraceData", addr)?,
                buffer_len(concentration.len(), "GetTraceData", addr)?,
            )
        };
        Error::check(code, "GetTraceData", addr)
    }

    fn read_trace(
        &mut self,
        addr: &str,
        timeout: Duration,
        trace_type: TraceType,
        data: &mut [f32],
    ) -> Result<TimingInfo> {
        let ip = Self::ip("GetTraceDataWithTimingInfo", addr)?;
        let tmo = timeout_ms(timeout, "GetTraceDataWithTimingInfo", addr)?;
        let len = buffer_len(data.len(), "GetTraceDataWithTimingInfo", addr)?;
        let mut timing = IcTimingInfo::default();
        let code = unsafe {
            self.lib.api.IcAPI_GetTraceDataWithTimingInfo(
                ip.as_ptr(),
                tmo,
                &mut timing,
                trace_type.raw(),
                data.as_mut_ptr(),
                len,
            )
        };
        Error::check(code, "GetTraceDataWithTimingInfo", addr)?;
        Ok(timing.into())
    }

    fn next_timecycle(&mut self, addr: &str, timeout: Duration) -> Result<TimingInfo> {
        let ip = Self::ip("GetNextTimecycle", addr)?;
        let tmo = timeout_ms(timeout, "GetNextTimecycle", addr)?;
        let mut timing = IcTimingInfo::default();
        let code = unsafe { self.lib.api.IcAPI_GetNextTimecycle(ip.as_ptr(), tmo, &mut timing) };
        Error::check(code, "GetNextTimecycle", addr)?;
        Ok(timing.into())
    }

    fn read_next_spectrum(
        &mut self,
        addr: &str,
        timeout: Duration,
        calibration: &mut [f64],
        spectrum: &mut [f32],
    ) -> Result<(TimingInfo, Automation)> {
        let ip = Self::ip("GetNextSpec", addr)?;
        let tmo = timeout_ms(timeout, "GetNextSpec", addr)?;
        let len_cal = buffer_len(calibration.len(), "GetNextSpec", addr)?;
        let len_spec = buffer_len(spectrum.len(), "GetNextSpec", addr)?;
        let mut timing = IcTimingInfo::default();
        let mut automation = IcAutomation::default();
        let code = unsafe {
            self.lib.api.IcAPI_GetNextSpec(
                ip.as_ptr(),
                tmo,
                &mut automation,
                &mut timing,
                calibration.as_mut_ptr(),
                spectrum.as_mut_ptr(),
                len_cal,
                len_spec,
            )
        };
        Error::check(code, "GetNextSpec", addr)?;
        Ok((timing.into(), automation.into()))
    }

    fn next_full_cycle(
        &mut self,
        addr: &str,
        timeout: Duration,
        capacity: FullCycleCapacity,
    ) -> Result<FullCycle<Latin1>> {
        let op = "GetNextFullCycle";
        let ip = Self::ip(op, addr)?;
        let tmo = timeout_ms(timeout, op, addr)?;
        let timebins = buffer_len(capacity.timebins, op, addr)?;
        let n_add = buffer_len(capacity.add_data, op, addr)?;

        let lib = &*self.lib;
        let mut buf = Owned::new(lib, IcFullcycle::default());
        buf.raw.spectrum = lib.alloc_floats(timebins).map_err(Error::library)?;
        buf.raw.add_data.desc = lib.alloc_strings(n_add).map_err(Error::library)?;
        buf.raw.add_data.data = lib.alloc_floats(n_add).map_err(Error::library)?;
        buf.raw.add_data.group = lib.alloc_strings(n_add).map_err(Error::library)?;
        buf.raw.cal_para = lib
            .alloc_doubles(CalibrationParameters::LEN as i32)
            .map_err(Error::library)?;

        let code = unsafe { lib.api.IcAPI_GetNextFullCycle(ip.as_ptr(), tmo, &mut buf.raw) };
        Error::check(code, op, addr)?;

        let raw = &buf.raw;
        let (spectrum, cal, names, groups, values) = unsafe {
            (
                lv::read_floats(raw.spectrum),
                lv::read_doubles(raw.cal_para),
                lv::read_strings(raw.add_data.desc),
                lv::read_strings(raw.add_data.group),
                lv::read_floats(raw.add_data.data),
            )
        };
        let calibration = CalibrationParameters::from_slice(&cal).ok_or_else(|| {
            Error::unexpected(op, addr, UnknownValue::new("calibration length", cal.len() as i64))
        })?;
        Ok(FullCycle {
            timing: raw.timing_info.into(),
            automation: raw.automation.into(),
            spectrum,
            calibration,
            add_data: pairs(names, groups, values),
        })
    }

    fn current_primary_ion(&mut self, addr: &str, capacity: usize) -> Result<PrimaryIon<Latin1>> {
        let ip = Self::ip("GetCurrentPrimaryIon", addr)?;
        let n = buffer_len(capacity, "GetCurrentPrimaryIon", addr)?;
        let lib = &*self.lib;
        let mut buf = Owned::new(lib, IcPrimaryIon::default());
        buf.raw.masses = lib.alloc_floats(n).map_err(Error::library)?;
        buf.raw.multiplier = lib.alloc_floats(n).map_err(Error::library)?;
        let code = unsafe { lib.api.IcAPI_GetCurrentPrimaryIon(ip.as_ptr(), &mut buf.raw) };
        Error::check(code, "GetCurrentPrimaryIon", addr)?;
        let raw = &buf.raw;
        unsafe {
            Ok(PrimaryIon {
                name: Latin1::new(lv::read_string(raw.setting_name)),
                masses: lv::read_floats(raw.masses),
                multipliers: lv::read_floats(raw.multiplier),
            })
        }
    }

    fn current_transmission(
        &mut self,
        addr: &str,
        capacity: usize,
    ) -> Result<Transmission<Latin1>> {
        let ip = Self::ip("GetCurrentTransmission", addr)?;
        let n = buffer_len(capacity, "GetCurrentTransmission", addr)?;
        let lib = &*self.lib;
        let mut buf = Owned::new(lib, IcTransmission::default());
        buf.raw.mass = lib.alloc_floats(n).map_err(Error::library)?;
        buf.raw.trans = lib.alloc_floats(n).map_err(Error::library)?;
        let code = unsafe { lib.api.IcAPI_GetCurrentTransmission(ip.as_ptr(), &mut buf.raw) };
        Error::check(code, "GetCurrentTransmission", addr)?;
        let raw = &buf.raw;
        unsafe {
            Ok(Transmission {
                name: Latin1::new(lv::read_string(raw.name)),
                voltage: raw.voltage,
                masses: lv::read_floats(raw.mass),
                transmissions: lv::read_floats(raw.trans),
            })
        }
    }

    fn current_data_filename(&mut self, addr: &str) -> Result<Latin1> {
        let ip = Self::ip("GetCurrentDataFileName", addr)?;
        let mut buf = [0_u8; MAX_PATH_LEN];
        let code = unsafe {
            self.lib.api.IcAPI_GetCurrentDataFileName(
                ip.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                MAX_PATH_LEN as i32,
            )
        };
        Error::check(code, "GetCurrentDataFileName", addr)?;
        Ok(Latin1::from_c_buffer(&buf))
    }

    fn set_auto_data_filename(&mut self, addr: &str, name: &[u8]) -> Result<()> {
        let ip = Self::ip("SetAutoDataFileName", addr)?;
        let name = c_string("SetAutoDataFileName", addr, "file name", name.to_vec())?;
        let code = unsafe { self.lib.api.IcAPI_SetAutoDataFileName(ip.as_ptr(), name.as_ptr()) };
        Error::check(code, "SetAutoDataFileName", addr)
    }

    fn add_data_names(&mut self, addr: &str) -> Result<Vec<Latin1>> {
        let ip = Self::ip("GetAddDataNames", addr)?;
        let lib = &*self.lib;
        let handle: LStrHandleArray = lib.alloc_strings(0).map_err(Error::library)?;
        let mut buf = Owned::new(lib, handle);
        let code = unsafe { lib.api.IcAPI_GetAddDataNames(ip.as_ptr(), &mut buf.raw) };
        Error::check(code, "GetAddDataNames", addr)?;
        let names = unsafe { lv::read_strings(buf.raw) };
        Ok(names.into_iter().map(Latin1::new).collect())
    }

    fn read_add_data_values(&mut self, addr: &str, values: &mut [f32]) -> Result<f64> {
        let ip = Self::ip("GetAddDataValues", addr)?;
        let len = buffer_len(values.len(), "GetAddDataValues", addr)?;
        let mut time = 0.0_f64;
        let code = unsafe {
            self.lib
                .api
                .IcAPI_GetAddDataValues(ip.as_ptr(), values.as_mut_ptr(), &mut time, len)
        };
        Error::check(code, "GetAddDataValues", addr)?;
        Ok(time)
    }

    fn parameter(&mut self, addr: &str, name: &[u8]) -> Result<f32> {
        let ip = Self::ip("GetParamter", addr)?;
        let name = c_string("GetParamter", addr, "parameter name", name.to_vec())?;
        let mut value = 0.0_f32;
        let code =
            unsafe { self.lib.api.IcAPI_GetParamter(ip.as_ptr(), name.as_ptr(), &mut value) };
        Error::check(code, "GetParamter", addr)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_with_nul() {
        assert!(matches!(
            IcApiTransport::ip("GetMeasureState", "local\0host"),
            Err(Error::InvalidArgument { op: "GetMeasureState", .. })
        ));
        let ip = IcApiTransport::ip("GetMeasureState", "10.0.0.1").unwrap();
        assert_eq!(ip.as_bytes(), b"10.0.0.1");
    }

    #[test]
    fn add_data_pairs() {
        let entries = pairs(
            vec![b"p-Drift".to_vec(), b"T-Drift".to_vec()],
            vec![b"PTR".to_vec()],
            vec![2.3, 60.0],
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name.as_bytes(), b"T-Drift");
        assert!(entries[1].group.as_bytes().is_empty());
    }

    #[test]
    fn open_missing_library() {
        let options = LibraryOptions {
            path: "/nonexistent/libIcAPI.so".into(),
            runtime: None,
        };
        assert!(matches!(
            IcApiTransport::open(&options),
            Err(Error::Library(_))
        ));
    }
}
