//! Session reconstruction.
//! Route decoded protocol records into sessions by identity, direction and timeouts.
pub mod containers;
pub mod core;
pub mod session;
pub mod utils;
