pub mod config;
pub mod distribute;
pub mod health;
pub mod tunnel;
pub mod volumes;
