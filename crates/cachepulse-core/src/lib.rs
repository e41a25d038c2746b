//! Core library for cachepulse.
//!
//! Cachepulse watches the transfer records of a LAN-cache appliance and
//! keeps them honest: a periodic reaper finalizes transfers that have gone
//! quiet, a consistency guardian removes records for services that no
//! longer exist in the log corpus and normalizes datasource attribution,
//! and a supervisor runs the external speed probe, consuming its telemetry
//! stream and broadcasting throughput snapshots to observers.
//!
//! The crate split follows the usual rule: everything with behavior lives
//! here; `cachepulse` (the binary) is a thin CLI wrapper.

pub mod config;
pub mod daemon;
pub mod error;
pub mod guardian;
pub mod inventory;
pub mod logging;
pub mod notify;
pub mod probe;
pub mod reaper;
pub mod shutdown;
pub mod speed;
pub mod storage;

pub use config::{Config, Datasource};
pub use error::{Error, Result};
pub use shutdown::Shutdown;
pub use speed::SpeedSnapshot;
pub use storage::TransferStore;
