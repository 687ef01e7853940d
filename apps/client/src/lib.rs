pub mod backoff;
pub mod config;
pub mod driver;
pub mod error;
pub mod observability;
pub mod session;
pub mod signaling;
