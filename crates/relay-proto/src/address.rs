use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::wire::{Reader, Writer};

/// Fixed-width address encoding used inside route tokens and wherever an
/// address needs to sit at a predictable offset: a 1-byte tag, 16 bytes of
/// address material (zero-padded for IPv4), and a 2-byte port.
pub const ENCODED_SIZE: usize = 1 + 16 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr, u16),
    V6(Ipv6Addr, u16),
}

impl Address {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::V4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Address::normalize(Address::V6(*v6.ip(), v6.port())),
        }
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        match self {
            Address::V4(ip, port) => SocketAddr::V4(SocketAddrV4::new(ip, port)),
            Address::V6(ip, port) => SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)),
        }
    }

    /// Collapses an IPv4-in-IPv6 address down to its IPv4 form so lookups by
    /// address always hit the same key regardless of which family the
    /// packet arrived over.
    pub fn normalize(self) -> Self {
        match self {
            Address::V6(ip, port) => match ip.to_ipv4_mapped().or_else(|| ip.to_ipv4()) {
                Some(v4) => Address::V4(v4, port),
                None => Address::V6(ip, port),
            },
            other => other,
        }
    }

    pub fn encode(self, w: &mut Writer) {
        match self.normalize() {
            Address::V4(ip, port) => {
                w.u8(0);
                let mut bytes = [0u8; 16];
                bytes[..4].copy_from_slice(&ip.octets());
                w.bytes(&bytes);
                w.u16(port);
            }
            Address::V6(ip, port) => {
                w.u8(1);
                w.bytes(&ip.octets());
                w.u16(port);
            }
        }
    }

    pub fn decode(r: &mut Reader) -> Result<Self, crate::wire::WireError> {
        let tag = r.u8()?;
        let bytes: [u8; 16] = r.array()?;
        let port = r.u16()?;
        Ok(match tag {
            0 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&bytes[..4]);
                Address::V4(Ipv4Addr::from(octets), port)
            }
            _ => Address::V6(Ipv6Addr::from(bytes), port).normalize(),
        })
    }
}
