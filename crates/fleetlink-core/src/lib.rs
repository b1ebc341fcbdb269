pub mod config;
pub mod distribute;
pub mod error;
pub mod health;
pub mod io;
pub mod listener;
pub mod readiness;
pub mod remote;
pub mod snapshot;
pub mod volumes;

pub use error::{FleetError, Result};
