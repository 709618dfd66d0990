//! Core types shared by the sweep, probe and orchestration crates.

pub mod address;
pub mod cancel;
pub mod config;
pub mod error;
pub mod outcome;
pub mod pool;
pub mod ports;
pub mod ratelimiter;
pub mod report;

pub use address::{Address, AddressRange, Target};
pub use cancel::CancelToken;
pub use config::{ScanConfig, SweepMethod};
pub use error::{Result, ScanError};
pub use outcome::{PortState, ProbeError, Reachability};
pub use pool::WorkerPool;
pub use ports::PortSpec;
pub use report::ScanReport;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
