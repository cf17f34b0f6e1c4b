//! Connection and state queries. None of these calls take a timeout.

use log::debug;

use crate::protocol::{MeasureState, ServerAction, ServerState, Version};
use crate::{Error, Result, Transport};

pub fn get_measure_state<T: Transport>(t: &mut T, addr: &str) -> Result<MeasureState> {
    debug!("GetMeasureState on {}", addr);
    t.measure_state(addr)
}

pub fn get_server_state<T: Transport>(t: &mut T, addr: &str) -> Result<ServerState> {
    debug!("GetServerState on {}", addr);
    t.server_state(addr)
}

/// Version of the interface library. The address is only used for error reporting.
pub fn get_version<T: Transport>(t: &mut T, addr: &str) -> Result<Version> {
    debug!("GetVersion on {}", addr);
    t.version(addr)?
        .decode()
        .map_err(|x| Error::decoding("GetVersion", addr, x))
}

pub fn set_server_action<T: Transport>(t: &mut T, addr: &str, action: ServerAction) -> Result<()> {
    debug!("SetServerAction({}) on {}", action, addr);
    t.set_server_action(addr, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackServer;
    use crate::protocol::ReturnCode;

    #[test]
    fn query_states() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        assert_eq!(get_measure_state(&mut t, "localhost").unwrap(), MeasureState::ReadyIdle);
        server.set_server_state(ServerState::Busy);
        assert_eq!(get_server_state(&mut t, "localhost").unwrap(), ServerState::Busy);
        assert_eq!(get_version(&mut t, "localhost").unwrap().to_string(), "loopback 1.0");
    }

    #[test]
    fn fault_is_a_communication_error() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        server.inject_fault(ReturnCode::Error);
        match get_server_state(&mut t, "10.0.0.3") {
            Err(Error::Communication { op, addr, code }) => {
                assert_eq!(op, "GetServerState");
                assert_eq!(addr, "10.0.0.3");
                assert_eq!(code, 1);
            }
            x => panic!("unexpected result: {:?}", x),
        }
    }

    #[test]
    fn start_measurement() {
        let server = LoopbackServer::new();
        let mut t = server.transport();
        set_server_action(&mut t, "localhost", ServerAction::StartMeasRecord).unwrap();
        assert!(get_measure_state(&mut t, "localhost").unwrap().is_active());
        assert_eq!(server.actions(), vec![ServerAction::StartMeasRecord]);
    }
}
