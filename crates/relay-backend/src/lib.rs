//! The backend control loop: wire codec for the update exchange, the HTTP
//! and system-usage capability traits, and the retry/drain state machine.

pub mod http;
pub mod loop_;
pub mod sysinfo;
pub mod wire;

pub use http::{HttpTransport, ReqwestHttpTransport, TransportError};
pub use loop_::{
    BackendLoop, BackendState, CLEAN_SHUTDOWN_GRACE_SECS, CLEAN_SHUTDOWN_TIMEOUT_SECS, MAX_UPDATE_ATTEMPTS,
    UPDATE_ENDPOINT, UPDATE_INTERVAL_SECS, UPDATE_TIMEOUT_SECS,
};
pub use sysinfo::{default_probe, NullProbe, SystemUsageProbe};
pub use wire::{NeighborPingStat, RelayRosterEntry, UpdateRequest, UpdateResponse, MAX_RELAYS, UPDATE_REQUEST_VERSION, UPDATE_RESPONSE_VERSION};
