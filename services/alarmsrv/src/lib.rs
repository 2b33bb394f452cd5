//! AlarmSrv - alarm rule evaluation service
//!
//! The binary wires a Redis pub/sub transport and the SQLite alarm store into
//! a `voltage_alarm::AlarmEngine`. Configuration loading lives here so it can
//! be tested without starting the service.

pub mod config;

pub use config::AlarmSrvConfig;
