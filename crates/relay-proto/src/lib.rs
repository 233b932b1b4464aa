//! Wire formats for every relay packet type: the session packet header, the
//! signed and unsigned ping packets, the route token, and the shared
//! little-endian primitive codec they're all built from.

pub mod address;
pub mod packet;
pub mod token;
pub mod wire;

pub use address::Address;
pub use packet::{Direction, PacketType, SessionHeader, SignedPing, UnsignedPing};
pub use token::{RouteTokenFields, TokenError, SESSION_TOKEN_SIZE};
pub use wire::{Reader, WireError, Writer};
