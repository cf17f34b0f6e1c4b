//! Binding of the IcAPI client to the vendor's interface library, plus the
//! configuration used by the `icapi` command line tool.
#![allow(non_snake_case)]

#[macro_use]
extern crate dlopen_derive;

pub mod config;
pub mod icapi_sys;
mod lv;
mod transport;

pub use config::Config;
pub use icapi_sys::{Library, LibraryOptions};
pub use transport::IcApiTransport;
