//! Packet type table and the wire layouts built on top of the primitives in
//! [`crate::wire`]. Every layout is bit-exact and little-endian; nothing here
//! allocates on the failure path.

use crate::wire::{Reader, WireError, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    RouteRequest,
    RouteResponse,
    ClientToServer,
    ServerToClient,
    SessionPing,
    SessionPong,
    ContinueRequest,
    ContinueResponse,
    NearPing,
    Pong,
    InboundPing,
    OutboundPing,
}

/// Which next-hop a session packet travels toward: upstream packets move
/// from client toward server (`next_address`), downstream packets move back
/// (`prev_address`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

impl PacketType {
    pub const fn wire_value(self) -> u8 {
        match self {
            PacketType::RouteRequest => 1,
            PacketType::RouteResponse => 2,
            PacketType::ClientToServer => 3,
            PacketType::ServerToClient => 4,
            PacketType::SessionPing => 5,
            PacketType::SessionPong => 6,
            PacketType::ContinueRequest => 7,
            PacketType::ContinueResponse => 8,
            PacketType::NearPing => 9,
            PacketType::Pong => 10,
            PacketType::InboundPing => 11,
            PacketType::OutboundPing => 12,
        }
    }

    pub fn from_wire_value(value: u8) -> Option<Self> {
        Some(match value {
            1 => PacketType::RouteRequest,
            2 => PacketType::RouteResponse,
            3 => PacketType::ClientToServer,
            4 => PacketType::ServerToClient,
            5 => PacketType::SessionPing,
            6 => PacketType::SessionPong,
            7 => PacketType::ContinueRequest,
            8 => PacketType::ContinueResponse,
            9 => PacketType::NearPing,
            10 => PacketType::Pong,
            11 => PacketType::InboundPing,
            12 => PacketType::OutboundPing,
            _ => return None,
        })
    }

    /// Forwarding direction for session packet types; `None` for the
    /// stateless ping types, which never consult the session map.
    pub const fn direction(self) -> Option<Direction> {
        use PacketType::*;
        match self {
            RouteRequest | ClientToServer | SessionPing | ContinueRequest => Some(Direction::Upstream),
            RouteResponse | ServerToClient | SessionPong | ContinueResponse => Some(Direction::Downstream),
            NearPing | Pong | InboundPing | OutboundPing => None,
        }
    }

    pub const fn is_session_packet(self) -> bool {
        self.direction().is_some()
    }
}

/// Reads the leading type byte without consuming anything else.
/// Returns `None` on an empty buffer or an unrecognized type value.
pub fn peek_type(bytes: &[u8]) -> Option<PacketType> {
    PacketType::from_wire_value(*bytes.first()?)
}

/// Header shared by every session packet (types 2-8): `[type][session_id][sequence]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHeader {
    pub packet_type: PacketType,
    pub session_id: u64,
    pub sequence: u64,
}

pub const SESSION_HEADER_SIZE: usize = 1 + 8 + 8;

impl SessionHeader {
    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.packet_type.wire_value());
        w.u64(self.session_id);
        w.u64(self.sequence);
    }

    /// Returns the header and the byte range that was consumed, so callers
    /// can reuse it verbatim as additional authenticated data.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(bytes);
        let raw_type = r.u8()?;
        let packet_type = PacketType::from_wire_value(raw_type).ok_or(WireError::Truncated)?;
        let session_id = r.u64()?;
        let sequence = r.u64()?;
        Ok((
            SessionHeader {
                packet_type,
                session_id,
                sequence,
            },
            r.position(),
        ))
    }
}

/// Header for RouteRequest (type 1): `[type][sequence][token][payload]`.
/// The token is fixed-size; see [`crate::token`].
pub struct RouteRequestHeader {
    pub sequence: u64,
}

pub const ROUTE_REQUEST_HEADER_SIZE: usize = 1 + 8;

impl RouteRequestHeader {
    pub fn encode(&self, w: &mut Writer) {
        w.u8(PacketType::RouteRequest.wire_value());
        w.u64(self.sequence);
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(bytes);
        let raw_type = r.u8()?;
        if PacketType::from_wire_value(raw_type) != Some(PacketType::RouteRequest) {
            return Err(WireError::Truncated);
        }
        let sequence = r.u64()?;
        Ok((RouteRequestHeader { sequence }, r.position()))
    }
}

/// Signed ping packet (NearPing / Pong, types 9-10):
/// `[type][sequence][sender_pubkey:32][signature:64]`.
/// Self-certifying: the embedded public key is what the signature is
/// checked against, so the packet carries everything a receiver needs to
/// authenticate it without a prior key-exchange step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedPing {
    pub packet_type: PacketType,
    pub sequence: u64,
    pub sender_public_key: [u8; relay_crypto::PUBLIC_KEY_SIZE],
    pub signature: [u8; relay_crypto::SIGNATURE_SIZE],
}

pub const SIGNED_PING_SIZE: usize = 1 + 8 + relay_crypto::PUBLIC_KEY_SIZE + relay_crypto::SIGNATURE_SIZE;

impl SignedPing {
    /// The bytes the signature is computed over: type byte followed by the
    /// little-endian sequence number.
    pub fn signed_message(packet_type: PacketType, sequence: u64) -> [u8; 9] {
        let mut msg = [0u8; 9];
        msg[0] = packet_type.wire_value();
        msg[1..9].copy_from_slice(&sequence.to_le_bytes());
        msg
    }

    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.packet_type.wire_value());
        w.u64(self.sequence);
        w.bytes(&self.sender_public_key);
        w.bytes(&self.signature);
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(bytes);
        let raw_type = r.u8()?;
        let packet_type = PacketType::from_wire_value(raw_type).ok_or(WireError::Truncated)?;
        if !matches!(packet_type, PacketType::NearPing | PacketType::Pong) {
            return Err(WireError::Truncated);
        }
        let sequence = r.u64()?;
        let sender_public_key = r.array()?;
        let signature = r.array()?;
        Ok((
            SignedPing {
                packet_type,
                sequence,
                sender_public_key,
                signature,
            },
            r.position(),
        ))
    }

    pub fn is_authentic(&self) -> bool {
        let msg = Self::signed_message(self.packet_type, self.sequence);
        relay_crypto::verify(&self.sender_public_key, &msg, &self.signature)
    }
}

/// Unsigned ping packet (InboundPing / OutboundPing, types 11-12):
/// `[type][sequence]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsignedPing {
    pub packet_type: PacketType,
    pub sequence: u64,
}

pub const UNSIGNED_PING_SIZE: usize = 1 + 8;

impl UnsignedPing {
    pub fn encode(&self, w: &mut Writer) {
        w.u8(self.packet_type.wire_value());
        w.u64(self.sequence);
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(bytes);
        let raw_type = r.u8()?;
        let packet_type = PacketType::from_wire_value(raw_type).ok_or(WireError::Truncated)?;
        if !matches!(packet_type, PacketType::InboundPing | PacketType::OutboundPing) {
            return Err(WireError::Truncated);
        }
        let sequence = r.u64()?;
        Ok((UnsignedPing { packet_type, sequence }, r.position()))
    }
}
