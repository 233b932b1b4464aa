//! The optional kernel/XDP acceleration seam. A shim gets first look at a
//! datagram and may fully handle a subset of packet types itself; anything
//! it declines falls through to [`crate::router::PacketRouter`], which is
//! the reference semantics for every packet type.

use relay_proto::Address;

use crate::router::Outbound;

pub enum AccelOutcome {
    /// The shim does not handle this packet; the userspace router should.
    NotHandled,
    /// The shim fully handled the packet; these datagrams should be sent.
    Handled(Vec<Outbound>),
}

pub trait AccelShim: Send + Sync {
    fn try_handle(&self, src: Address, bytes: &[u8]) -> AccelOutcome;
}

/// The only shim this codebase ships: declines everything, so the
/// userspace router handles every packet. A kernel/XDP shim would implement
/// the same trait for a subset of packet types.
pub struct NoopAccelShim;

impl AccelShim for NoopAccelShim {
    fn try_handle(&self, _src: Address, _bytes: &[u8]) -> AccelOutcome {
        AccelOutcome::NotHandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn noop_shim_always_declines() {
        let shim = NoopAccelShim;
        let outcome = shim.try_handle(Address::V4(Ipv4Addr::new(1, 2, 3, 4), 1), &[1, 2, 3]);
        assert!(matches!(outcome, AccelOutcome::NotHandled));
    }
}
