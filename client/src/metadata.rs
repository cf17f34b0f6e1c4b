//! Primary ion, transmission, data file and add-data queries.
//!
//! Strings are exchanged as strict Latin-1. Unassigned and control bytes in a reply
//! fail with [`Error::Decoding`]. Strings passed to the server must be encodable,
//! otherwise the call is rejected before reaching it.

use log::{debug, trace};

use crate::protocol::latin1::encode_strict;
use crate::protocol::{PrimaryIon, Transmission};
use crate::{buffer_len, Error, Result, Transport};

/// `capacity` is the number of table entries pre-allocated for the reply.
pub fn get_current_primary_ion<T: Transport>(
    t: &mut T,
    addr: &str,
    capacity: usize,
) -> Result<PrimaryIon> {
    buffer_len(capacity, "GetCurrentPrimaryIon", addr)?;
    debug!("GetCurrentPrimaryIon on {}", addr);
    t.current_primary_ion(addr, capacity)?
        .decode()
        .map_err(|x| Error::decoding("GetCurrentPrimaryIon", addr, x))
}

pub fn get_current_transmission<T: Transport>(
    t: &mut T,
    addr: &str,
    capacity: usize,
) -> Result<Transmission> {
    buffer_len(capacity, "GetCurrentTransmission", addr)?;
    debug!("GetCurrentTransmission on {}", addr);
    t.current_transmission(addr, capacity)?
        .decode()
        .map_err(|x| Error::decoding("GetCurrentTransmission", addr, x))
}

/// Path of the file the server currently records to.
pub fn get_current_data_filename<T: Transport>(t: &mut T, addr: &str) -> Result<String> {
    debug!("GetCurrentDataFileName on {}", addr);
    t.current_data_filename(addr)?
        .decode()
        .map_err(|x| Error::decoding("GetCurrentDataFileName", addr, x))
}

/// Sets the file name used by the next automatically named recording.
pub fn set_auto_data_filename<T: Transport>(t: &mut T, addr: &str, name: &str) -> Result<()> {
    let encoded = encode_strict(name)
        .map_err(|x| Error::invalid("SetAutoDataFileName", addr, x.to_string()))?;
    debug!("SetAutoDataFileName({}) on {}", name, addr);
    t.set_auto_data_filename(addr, &encoded)
}

pub fn get_number_of_add_data<T: Transport>(t: &mut T, addr: &str) -> Result<usize> {
    debug!("GetNumberOfAddData on {}", addr);
    t.number_of_add_data(addr)
}

pub fn get_add_data_names<T: Transport>(t: &mut T, addr: &str) -> Result<Vec<String>> {
    debug!("GetAddDataNames on {}", addr);
    t.add_data_names(addr)?
        .iter()
        .map(|x| x.decode())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|x| Error::decoding("GetAddDataNames", addr, x))
}

/// Current add-data values and their absolute time (seconds since 1904).
pub fn get_add_data_values<T: Transport>(t: &mut T, addr: &str) -> Result<(f64, Vec<f32>)> {
    let n = get_number_of_add_data(t, addr)?;
    buffer_len(n, "GetAddDataValues", addr)?;
    trace!("GetAddDataValues: {} values", n);
    let mut values = vec![0.0; n];
    debug!("GetAddDataValues on {}", addr);
    let abs_time = t.read_add_data_values(addr, &mut values)?;
    Ok((abs_time, values))
}

/// Reads a named instrument parameter.
pub fn get_parameter<T: Transport>(t: &mut T, addr: &str, name: &str) -> Result<f32> {
    let op = "GetParamter";
    let encoded = encode_strict(name).map_err(|x| Error::invalid(op, addr, x.to_string()))?;
    if encoded.is_empty() {
        return Err(Error::invalid(op, addr, "parameter name is empty"));
    }
    debug!("{}({}) on {}", op, name, addr);
    t.parameter(addr, &encoded)
}
