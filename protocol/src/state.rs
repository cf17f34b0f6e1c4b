use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::UnknownValue;

/// Declares a `u16`-encoded enumeration of the vendor header together with its
/// name table and the fallible conversion from the raw value.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $kind:literal {
            $($variant:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u16)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn raw(self) -> u16 {
                self as u16
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|x| x.name() == name)
            }
        }

        impl TryFrom<u16> for $name {
            type Error = UnknownValue;

            fn try_from(raw: u16) -> Result<Self, UnknownValue> {
                match raw {
                    $($value => Ok($name::$variant),)+
                    _ => Err(UnknownValue::new($kind, raw)),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

wire_enum! {
    /// State of the measurement as polled from the server.
    pub enum MeasureState: "MeasureState" {
        ReadyIdle = 0,
        MeasurementActive = 1,
        TofDaqRecNotRunning = 2,
        WriteNewParametersInProgress = 3,
        LoadCalibration = 4,
        StartTofDaqRec = 5,
        ShowTofDaqDialog = 6,
        WriteCalibration = 7,
        CloseServer = 8,
        NotReady = 9,
    }
}

wire_enum! {
    pub enum ServerState: "ServerState" {
        Unknown = 0,
        OK = 1,
        Error = 2,
        Warning = 3,
        StartUp = 4,
        Busy = 5,
        Closed = 6,
        NotInitialized = 7,
        Disconnected = 8,
    }
}

wire_enum! {
    /// Actions the server can be asked to perform.
    #[allow(non_camel_case_types)]
    pub enum ServerAction: "ServerAction" {
        Idle = 0,
        StartMeasQuick = 1,
        StopMeasurement = 2,
        LoadPeaktable = 3,
        LoadCalibration = 4,
        ShowSettings = 5,
        WriteCalibration = 6,
        ShowFP = 7,
        HideFP = 8,
        Reconnect = 9,
        Close_No_Prompt = 10,
        ITOF_TDC_Settings = 11,
        ITOF_DI_DO_Dialog = 12,
        Disconnect = 13,
        InitTPS = 14,
        ShutDownTPS = 15,
        Close_With_Prompt = 16,
        StartMeasRecord = 17,
        StartMeasAuto = 18,
        EditPeakTable = 19,
        ShowMeasureView = 20,
        HideMeasureView = 21,
        ConnectPTR = 22,
        DisconnectPTR = 23,
        ConnectDetector = 24,
        DisconnectDetector = 25,
        ChangeMeasureView = 26,
        TOF_CoarseCal = 27,
        iTOF_Reset_avg_View = 28,
        Load_iTofSupply_Set_File = 29,
        Load_And_Set_iTofsupply_Set_File = 30,
        StartRepeatedMeasurement = 31,
        StopAfterCurrentRun = 32,
        SC_TDC_Restart = 33,
        SC_TDC_Reboot = 34,
        ChangeTransmission = 35,
        ChangeDataSaveSet = 36,
        ChangeAutoCALset = 37,
    }
}

impl MeasureState {
    pub fn is_active(self) -> bool {
        self == MeasureState::MeasurementActive
    }
}

impl ServerState {
    pub fn is_ok(self) -> bool {
        self == ServerState::OK
    }
}

/// Selects one of the three trace kinds computed per peak.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TraceType {
    Raw = 0,
    Corrected = 1,
    Concentration = 2,
}

impl TraceType {
    pub const ALL: [TraceType; 3] = [TraceType::Raw, TraceType::Corrected, TraceType::Concentration];

    pub fn raw(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for TraceType {
    type Error = UnknownValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TraceType::Raw),
            1 => Ok(TraceType::Corrected),
            2 => Ok(TraceType::Concentration),
            _ => Err(UnknownValue::new("TraceType", value)),
        }
    }
}

impl Display for TraceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceType::Raw => "raw",
            TraceType::Corrected => "corrected",
            TraceType::Concentration => "concentration",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_state_codes() {
        assert_eq!(MeasureState::try_from(0).unwrap(), MeasureState::ReadyIdle);
        assert_eq!(MeasureState::try_from(9).unwrap(), MeasureState::NotReady);
        let err = MeasureState::try_from(999).unwrap_err();
        assert_eq!(err.value, 999);
        assert_eq!(err.kind, "MeasureState");
    }

    #[test]
    fn server_state_names() {
        assert_eq!(ServerState::OK.name(), "OK");
        assert_eq!(ServerState::from_name("Disconnected"), Some(ServerState::Disconnected));
        assert_eq!(ServerState::ALL.len(), 9);
    }

    #[test]
    fn server_state_codes() {
        // `Error` is a variant here, the conversion error is still `UnknownValue`
        assert_eq!(ServerState::try_from(2).unwrap(), ServerState::Error);
        assert_eq!(ServerState::try_from(8).unwrap(), ServerState::Disconnected);
        let err: UnknownValue = ServerState::try_from(9).unwrap_err();
        assert_eq!(err.kind, "ServerState");
        assert_eq!(err.value, 9);
    }

    #[test]
    fn server_actions_are_dense() {
        for (idx, action) in ServerAction::ALL.iter().enumerate() {
            assert_eq!(action.raw() as usize, idx);
            assert_eq!(ServerAction::try_from(idx as u16).unwrap(), *action);
        }
        assert_eq!(ServerAction::from_name("SC_TDC_Reboot").map(|x| x.raw()), Some(34));
    }

    #[test]
    fn trace_type_range() {
        for idx in 0..3 {
            assert_eq!(TraceType::try_from(idx).unwrap().raw(), idx);
        }
        assert!(TraceType::try_from(3).is_err());
        assert!(TraceType::try_from(-1).is_err());
    }
}
