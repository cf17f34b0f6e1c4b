use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::latin1::Latin1;

/// The active primary-ion setting used for concentration calculation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimaryIon<S = String> {
    pub name: S,
    pub masses: Vec<f32>,
    pub multipliers: Vec<f32>,
}

impl PrimaryIon<Latin1> {
    pub fn decode(self) -> Result<PrimaryIon, DecodeError> {
        Ok(PrimaryIon {
            name: self.name.decode()?,
            masses: self.masses,
            multipliers: self.multipliers,
        })
    }
}

/// The active transmission curve.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transmission<S = String> {
    pub name: S,
    pub voltage: f32,
    pub masses: Vec<f32>,
    pub transmissions: Vec<f32>,
}

impl Transmission<Latin1> {
    pub fn decode(self) -> Result<Transmission, DecodeError> {
        Ok(Transmission {
            name: self.name.decode()?,
            voltage: self.voltage,
            masses: self.masses,
            transmissions: self.transmissions,
        })
    }
}

/// Version of the interface library.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Version<S = String> {
    pub number: f64,
    pub text: S,
}

impl Version<Latin1> {
    pub fn decode(self) -> Result<Version, DecodeError> {
        Ok(Version {
            number: self.number,
            text: self.text.decode()?,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.number)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_primary_ion() {
        let pi = PrimaryIon {
            name: Latin1::new(b"H3O+".to_vec()),
            masses: vec![21.022, 39.033],
            multipliers: vec![487.0, 1.0],
        };
        let pi = pi.decode().unwrap();
        assert_eq!(pi.name, "H3O+");
        assert_eq!(pi.masses.len(), 2);
    }

    #[test]
    fn version_display() {
        let v = Version {
            number: 1.5,
            text: String::new(),
        };
        assert_eq!(v.to_string(), "1.5");
        let v = Version {
            number: 1.5,
            text: "1.5.0 (x64)".to_string(),
        };
        assert_eq!(v.to_string(), "1.5.0 (x64)");
    }
}
