//! Vessel safety tracking and hazard alerting

pub mod audio;
pub mod config;
pub mod emitter;
pub mod errors;
pub mod fleet;
pub mod geo;
pub mod identity;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod radar;
pub mod services;
pub mod simulator;
pub mod store;
pub mod trail;
