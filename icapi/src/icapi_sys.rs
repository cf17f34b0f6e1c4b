//! Raw binding to the vendor's `IcAPI` library, loaded at runtime.
//!
//! Besides plain C types the interface passes LabVIEW data handles. A handle is a
//! pointer to a pointer to a length-prefixed block, allocated by the LabVIEW memory
//! manager. Handles must be released with the matching `DeAllocate*` export of the
//! library, which [`Owned`] takes care of. Single string handles have no such export,
//! they are released through the LabVIEW runtime if one was loaded.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;

use anyhow::Context;
use dlopen::wrapper::{Container, WrapperApi};
use serde::{Deserialize, Serialize};

use icapi_client::protocol::{Automation, TimingInfo};

cfg_if::cfg_if! {
    if #[cfg(all(windows, target_pointer_width = "64"))] {
        const DEFAULT_LIBRARY: &str = "IcAPI_c_x64.dll";
    } else if #[cfg(windows)] {
        const DEFAULT_LIBRARY: &str = "IcAPI_c_x86.dll";
    } else {
        const DEFAULT_LIBRARY: &str = "libIcAPI.so";
    }
}

pub type IcReturnType = u16;
pub type MgErr = i32;

#[repr(C)]
pub struct LStr {
    pub cnt: i32,
    pub bytes: [u8; 1],
}

pub type LStrHandle = *mut *mut LStr;

#[repr(C)]
pub struct LStrHandleArrayBase {
    pub dim_size: i32,
    pub string: [LStrHandle; 1],
}

pub type LStrHandleArray = *mut *mut LStrHandleArrayBase;

#[repr(C)]
pub struct FloatArrayBase {
    pub dim_size: i32,
    pub numeric: [f32; 1],
}

pub type FloatArray = *mut *mut FloatArrayBase;

#[repr(C)]
pub struct DoubleArrayBase {
    pub dim_size: i32,
    pub numeric: [f64; 1],
}

pub type DoubleArray = *mut *mut DoubleArrayBase;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct IcTimingInfo {
    pub cycle: i32,
    pub cycle_overall: i32,
    pub abs_time: f64,
    pub rel_time: f64,
}

impl From<IcTimingInfo> for TimingInfo {
    fn from(x: IcTimingInfo) -> Self {
        TimingInfo {
            cycle: x.cycle,
            cycle_overall: x.cycle_overall,
            abs_time: x.abs_time,
            rel_time: x.rel_time,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct IcAutomation {
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

impl From<IcAutomation> for Automation {
    fn from(x: IcAutomation) -> Self {
        Automation {
            auto_step_number: x.auto_step_number,
            auto_run_number: x.auto_run_number,
            auto_use_mean: x.auto_use_mean,
            auto_start_cycle_mean: x.auto_start_cycle_mean,
            auto_stop_cycle_mean: x.auto_stop_cycle_mean,
            ame_action_number: x.ame_action_number,
            ame_user_number: x.ame_user_number,
            ame_step_number: x.ame_step_number,
            ame_run_number: x.ame_run_number,
        }
    }
}

#[repr(C)]
pub struct IcAddData {
    pub desc: LStrHandleArray,
    pub data: FloatArray,
    pub group: LStrHandleArray,
}

#[repr(C)]
pub struct IcFullcycle {
    pub spectrum: FloatArray,
    pub add_data: IcAddData,
    pub automation: IcAutomation,
    pub cal_para: DoubleArray,
    pub timing_info: IcTimingInfo,
}

#[repr(C)]
pub struct IcPrimaryIon {
    pub setting_name: LStrHandle,
    pub masses: FloatArray,
    pub multiplier: FloatArray,
}

#[repr(C)]
pub struct IcTransmission {
    pub name: LStrHandle,
    pub voltage: f32,
    pub mass: FloatArray,
    pub trans: FloatArray,
}

/// Handle-bearing buffers without any handle allocated.
impl Default for IcFullcycle {
    fn default() -> Self {
        Self {
            spectrum: ptr::null_mut(),
            add_data: IcAddData {
                desc: ptr::null_mut(),
                data: ptr::null_mut(),
                group: ptr::null_mut(),
            },
            automation: IcAutomation::default(),
            cal_para: ptr::null_mut(),
            timing_info: IcTimingInfo::default(),
        }
    }
}

impl Default for IcPrimaryIon {
    fn default() -> Self {
        Self {
            setting_name: ptr::null_mut(),
            masses: ptr::null_mut(),
            multiplier: ptr::null_mut(),
        }
    }
}

impl Default for IcTransmission {
    fn default() -> Self {
        Self {
            name: ptr::null_mut(),
            voltage: 0.0,
            mass: ptr::null_mut(),
            trans: ptr::null_mut(),
        }
    }
}

#[derive(WrapperApi)]
pub struct Api {
    IcAPI_GetVersion: unsafe extern "C" fn(version: *mut f64, text: *mut c_char, len: i32),
    IcAPI_GetMeasureState: unsafe extern "C" fn(ip: *const c_char, state: *mut u16) -> IcReturnType,
    IcAPI_GetServerState: unsafe extern "C" fn(ip: *const c_char, state: *mut u16) -> IcReturnType,
    IcAPI_SetServerAction: unsafe extern "C" fn(ip: *const c_char, action: u16) -> IcReturnType,
    IcAPI_GetNumberOfPeaks:
        unsafe extern "C" fn(ip: *const c_char, timeout_ms: i32, n: *mut u32) -> IcReturnType,
    IcAPI_GetNumberOfTimebins: unsafe extern "C" fn(ip: *const c_char, n: *mut i32) -> IcReturnType,
    IcAPI_GetNumberOfAddData:
        unsafe extern "C" fn(ip: *const c_char, timeout_ms: i32, n: *mut u32) -> IcReturnType,
    IcAPI_GetTraceMasses:
        unsafe extern "C" fn(ip: *const c_char, masses: *mut f32, len: i32) -> IcReturnType,
    IcAPI_SetTraceMasses:
        unsafe extern "C" fn(ip: *const c_char, masses: *const f32, len: i32) -> IcReturnType,
    IcAPI_GetCurrentSpec: unsafe extern "C" fn(
        ip: *const c_char,
        spec: *mut f32,
        timing: *mut IcTimingInfo,
        cal_para: *mut f32,
        len_spec: i32,
        len_cal_para: i32,
    ) -> IcReturnType,
    IcAPI_GetTraceData: unsafe extern "C" fn(
        ip: *const c_char,
        timeout_ms: i32,
        raw: *mut f32,
        corr: *mut f32,
        conc: *mut f32,
        len: i32,
        len2: i32,
        len3: i32,
    ) -> IcReturnType,
    IcAPI_GetTraceDataWithTimingInfo: unsafe extern "C" fn(
        ip: *const c_char,
        timeout_ms: i32,
        timing: *mut IcTimingInfo,
        trace_type: i32,
        data: *mut f32,
        len: i32,
    ) -> IcReturnType,
    IcAPI_GetNextTimecycle: unsafe extern "C" fn(
        ip: *const c_char,
        timeout_ms: i32,
        timing: *mut IcTimingInfo,
    ) -> IcReturnType,
    IcAPI_GetNextSpec: unsafe extern "C" fn(
        ip: *const c_char,
        timeout_ms: i32,
        automation: *mut IcAutomation,
        timing: *mut IcTimingInfo,
        cal_para: *mut f64,
        spectrum: *mut f32,
        len: i32,
        len2: i32,
    ) -> IcReturnType,
    IcAPI_GetNextFullCycle: unsafe extern "C" fn(
        ip: *const c_char,
        timeout_ms: i32,
        cycle: *mut IcFullcycle,
    ) -> IcReturnType,
    IcAPI_GetCurrentPrimaryIon:
        unsafe extern "C" fn(ip: *const c_char, pion: *mut IcPrimaryIon) -> IcReturnType,
    IcAPI_GetCurrentTransmission:
        unsafe extern "C" fn(ip: *const c_char, transm: *mut IcTransmission) -> IcReturnType,
    IcAPI_GetCurrentDataFileName:
        unsafe extern "C" fn(ip: *const c_char, file: *mut c_char, len: i32) -> IcReturnType,
    IcAPI_SetAutoDataFileName:
        unsafe extern "C" fn(ip: *const c_char, file: *const c_char) -> IcReturnType,
    IcAPI_GetAddDataNames:
        unsafe extern "C" fn(ip: *const c_char, names: *mut LStrHandleArray) -> IcReturnType,
    IcAPI_GetAddDataValues: unsafe extern "C" fn(
        ip: *const c_char,
        values: *mut f32,
        time: *mut f64,
        len: i32,
    ) -> IcReturnType,
    IcAPI_GetParamter:
        unsafe extern "C" fn(ip: *const c_char, name: *const c_char, value: *mut f32) -> IcReturnType,
    AllocateFloatArray: unsafe extern "C" fn(count: i32) -> FloatArray,
    DeAllocateFloatArray: unsafe extern "C" fn(handle: *mut FloatArray) -> MgErr,
    AllocateDoubleArray: unsafe extern "C" fn(count: i32) -> DoubleArray,
    DeAllocateDoubleArray: unsafe extern "C" fn(handle: *mut DoubleArray) -> MgErr,
    AllocateLStrHandleArray: unsafe extern "C" fn(count: i32) -> LStrHandleArray,
    DeAllocateLStrHandleArray: unsafe extern "C" fn(handle: *mut LStrHandleArray) -> MgErr,
}

/// The part of the LabVIEW runtime needed to release single string handles.
#[derive(WrapperApi)]
pub struct RuntimeApi {
    DSDisposeHandle: unsafe extern "C" fn(handle: *mut c_void) -> MgErr,
}

/// Where to find the interface library and, optionally, the LabVIEW runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryOptions {
    pub path: PathBuf,
    pub runtime: Option<PathBuf>,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LIBRARY),
            runtime: None,
        }
    }
}

pub struct Library {
    pub(crate) api: Container<Api>,
    runtime: Option<Container<RuntimeApi>>,
}

impl Library {
    pub fn open(options: &LibraryOptions) -> anyhow::Result<Self> {
        let api = load::<Api>(&options.path)?;
        let runtime = match &options.runtime {
            Some(path) => Some(load::<RuntimeApi>(path)?),
            None => None,
        };
        log::debug!("Loaded {}", options.path.display());
        Ok(Self { api, runtime })
    }

    pub(crate) fn dispose_string(&self, handle: LStrHandle) {
        if handle.is_null() {
            return;
        }
        match &self.runtime {
            Some(rt) => {
                let err = unsafe { rt.DSDisposeHandle(handle as *mut c_void) };
                if err != 0 {
                    log::warn!("DSDisposeHandle failed with error {}", err);
                }
            }
            None => log::debug!("No LabVIEW runtime loaded, leaking string handle"),
        }
    }
}

fn load<T: WrapperApi>(path: &Path) -> anyhow::Result<Container<T>> {
    unsafe { Container::<T>::load(path) }
        .with_context(|| format!("Cannot load `{}`", path.display()))
}

/// A buffer holding LabVIEW handles that must be handed back to the library.
pub trait Dispose {
    /// Releases all non-null handles and resets them to null.
    fn dispose(&mut self, lib: &Library);
}

fn dealloc_float(lib: &Library, handle: &mut FloatArray) {
    if !handle.is_null() {
        let err = unsafe { lib.api.DeAllocateFloatArray(handle) };
        if err != 0 {
            log::warn!("DeAllocateFloatArray failed with error {}", err);
        }
        *handle = ptr::null_mut();
    }
}

fn dealloc_double(lib: &Library, handle: &mut DoubleArray) {
    if !handle.is_null() {
        let err = unsafe { lib.api.DeAllocateDoubleArray(handle) };
        if err != 0 {
            log::warn!("DeAllocateDoubleArray failed with error {}", err);
        }
        *handle = ptr::null_mut();
    }
}

fn dealloc_strings(lib: &Library, handle: &mut LStrHandleArray) {
    if !handle.is_null() {
        let err = unsafe { lib.api.DeAllocateLStrHandleArray(handle) };
        if err != 0 {
            log::warn!("DeAllocateLStrHandleArray failed with error {}", err);
        }
        *handle = ptr::null_mut();
    }
}

impl Dispose for FloatArray {
    fn dispose(&mut self, lib: &Library) {
        dealloc_float(lib, self)
    }
}

impl Dispose for LStrHandleArray {
    fn dispose(&mut self, lib: &Library) {
        dealloc_strings(lib, self)
    }
}

impl Dispose for IcFullcycle {
    fn dispose(&mut self, lib: &Library) {
        dealloc_float(lib, &mut self.spectrum);
        dealloc_strings(lib, &mut self.add_data.desc);
        dealloc_float(lib, &mut self.add_data.data);
        dealloc_strings(lib, &mut self.add_data.group);
        dealloc_double(lib, &mut self.cal_para);
    }
}

impl Dispose for IcPrimaryIon {
    fn dispose(&mut self, lib: &Library) {
        lib.dispose_string(self.setting_name);
        self.setting_name = ptr::null_mut();
        dealloc_float(lib, &mut self.masses);
        dealloc_float(lib, &mut self.multiplier);
    }
}

impl Dispose for IcTransmission {
    fn dispose(&mut self, lib: &Library) {
        lib.dispose_string(self.name);
        self.name = ptr::null_mut();
        dealloc_float(lib, &mut self.mass);
        dealloc_float(lib, &mut self.trans);
    }
}

/// Owns a handle-bearing buffer and disposes it when dropped.
pub struct Owned<'a, T: Dispose> {
    lib: &'a Library,
    pub raw: T,
}

impl<'a, T: Dispose> Owned<'a, T> {
    pub fn new(lib: &'a Library, raw: T) -> Self {
        Self { lib, raw }
    }
}

impl<'a, T: Dispose> Drop for Owned<'a, T> {
    fn drop(&mut self) {
        self.raw.dispose(self.lib);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layout() {
        assert_eq!(std::mem::size_of::<IcTimingInfo>(), 24);
        assert_eq!(std::mem::size_of::<IcAutomation>(), 36);
    }

    #[test]
    fn library_not_found() {
        let options = LibraryOptions {
            path: PathBuf::from("/nonexistent/libIcAPI.so"),
            runtime: None,
        };
        let err = Library::open(&options).err().unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent/libIcAPI.so"));
    }

    #[test]
    fn options_from_json() {
        let opts: LibraryOptions = serde_json::from_str(r#"{"runtime": "lvrt.dll"}"#).unwrap();
        assert_eq!(opts.path, PathBuf::from(DEFAULT_LIBRARY));
        assert_eq!(opts.runtime, Some(PathBuf::from("lvrt.dll")));
    }
}
