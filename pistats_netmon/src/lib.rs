//! pistats_netmon: polls interface connectivity and keeps the stats
//! broadcaster running exactly when the host is online.

pub mod config;
pub mod probe;
pub mod supervise;
