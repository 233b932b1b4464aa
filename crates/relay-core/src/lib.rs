//! Session state, neighbor tracking, and the hot-path packet router that
//! ties them together with the wire formats from `relay-proto`.

pub mod accel;
pub mod neighbor;
pub mod router;
pub mod router_info;
pub mod session;
pub mod throughput;

pub use accel::{AccelOutcome, AccelShim, NoopAccelShim};
pub use neighbor::{RelayDescriptor, RelayManager};
pub use router::{Outbound, PacketRouter, SESSION_CLOSE_MARKER};
pub use router_info::RouterInfo;
pub use session::{Session, SessionDirection, SessionMap, SessionSnapshot};
pub use throughput::{ThroughputRecorder, ThroughputSnapshot};
