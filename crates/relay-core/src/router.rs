//! The hot path: classifies each received datagram, authenticates it, and
//! decides where (if anywhere) it gets forwarded. Driven entirely by the
//! receive thread; the session map is this router's exclusive property.

use std::sync::Arc;
use std::sync::Mutex;

use relay_crypto::xchacha20poly1305_decrypt;
use relay_proto::packet::{
    RouteRequestHeader, SessionHeader, SignedPing, UnsignedPing, ROUTE_REQUEST_HEADER_SIZE, SESSION_HEADER_SIZE,
};
use relay_proto::{Address, Direction, PacketType, RouteTokenFields, SESSION_TOKEN_SIZE};

use crate::neighbor::RelayManager;
use crate::router_info::RouterInfo;
use crate::session::{Session, SessionDirection, SessionMap, SessionSnapshot};
use crate::throughput::ThroughputRecorder;

/// First plaintext byte of a session payload that tells this relay to tear
/// the session down immediately after forwarding it onward.
pub const SESSION_CLOSE_MARKER: u8 = 0xFF;

pub struct PacketRouter {
    sessions: SessionMap,
    throughput: Arc<ThroughputRecorder>,
    relay_manager: Arc<Mutex<RelayManager>>,
    router_info: Arc<RouterInfo>,
    relay_shared_key: [u8; 32],
    backend_public_key: [u8; 32],
    max_sessions: usize,
}

/// One outbound datagram the caller's socket loop should send.
pub struct Outbound {
    pub to: Address,
    pub bytes: Vec<u8>,
}

impl PacketRouter {
    pub fn new(
        throughput: Arc<ThroughputRecorder>,
        relay_manager: Arc<Mutex<RelayManager>>,
        router_info: Arc<RouterInfo>,
        relay_shared_key: [u8; 32],
        backend_public_key: [u8; 32],
        max_sessions: usize,
    ) -> Self {
        PacketRouter {
            sessions: SessionMap::new(),
            throughput,
            relay_manager,
            router_info,
            relay_shared_key,
            backend_public_key,
            max_sessions,
        }
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    pub fn throughput(&self) -> &ThroughputRecorder {
        &self.throughput
    }

    pub fn purge_expired(&mut self, now_unix: u64) {
        self.sessions.purge(now_unix);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.sessions.snapshot()
    }

    /// Processes one received datagram. Returns the (possibly empty) list of
    /// datagrams the caller should now send.
    pub fn handle_datagram(&mut self, src: Address, bytes: &[u8], now_unix: u64, now_millis: u64) -> Vec<Outbound> {
        let Some(packet_type) = relay_proto::packet::peek_type(bytes) else {
            ThroughputRecorder::add(&self.throughput.unknown_rx, 1);
            return Vec::new();
        };

        match packet_type {
            PacketType::NearPing => self.handle_near_ping(src, bytes),
            PacketType::Pong => self.handle_pong(src, bytes, now_millis),
            PacketType::InboundPing => self.handle_inbound_ping(src, bytes),
            PacketType::OutboundPing => {
                // We never receive our own echo reply type; treat as unknown traffic.
                ThroughputRecorder::add(&self.throughput.unknown_rx, 1);
                Vec::new()
            }
            PacketType::RouteRequest => self.handle_route_request(bytes, now_unix, now_millis),
            _ => self.handle_session_packet(packet_type, bytes, now_unix, now_millis),
        }
    }

    fn handle_near_ping(&self, src: Address, bytes: &[u8]) -> Vec<Outbound> {
        ThroughputRecorder::add(&self.throughput.near_ping_rx, 1);
        let Ok((ping, _)) = SignedPing::decode(bytes) else {
            return Vec::new();
        };
        if !ping.is_authentic() {
            return Vec::new();
        }
        let reply = SignedPing {
            packet_type: PacketType::Pong,
            sequence: ping.sequence,
            sender_public_key: self.router_info.keypair.public_key(),
            signature: self
                .router_info
                .keypair
                .sign(&SignedPing::signed_message(PacketType::Pong, ping.sequence)),
        };
        let mut w = relay_proto::Writer::new();
        reply.encode(&mut w);
        vec![Outbound { to: src, bytes: w.into_bytes() }]
    }

    fn handle_pong(&self, src: Address, bytes: &[u8], now_millis: u64) -> Vec<Outbound> {
        ThroughputRecorder::add(&self.throughput.pong_rx, 1);
        let Ok((pong, _)) = SignedPing::decode(bytes) else {
            return Vec::new();
        };
        if !pong.is_authentic() {
            return Vec::new();
        }
        let mut manager = self.relay_manager.lock().unwrap();
        if let Some(relay_id) = manager.get_stats().iter().find(|d| d.address == src).map(|d| d.relay_id) {
            manager.record_pong(relay_id, pong.sequence, now_millis);
        }
        Vec::new()
    }

    fn handle_inbound_ping(&self, src: Address, bytes: &[u8]) -> Vec<Outbound> {
        ThroughputRecorder::add(&self.throughput.inbound_ping_rx, 1);
        let Ok((ping, _)) = UnsignedPing::decode(bytes) else {
            return Vec::new();
        };
        let reply = UnsignedPing {
            packet_type: PacketType::OutboundPing,
            sequence: ping.sequence,
        };
        ThroughputRecorder::add(&self.throughput.outbound_ping_tx, 1);
        let mut w = relay_proto::Writer::new();
        reply.encode(&mut w);
        vec![Outbound { to: src, bytes: w.into_bytes() }]
    }

    fn handle_route_request(&mut self, bytes: &[u8], now_unix: u64, now_millis: u64) -> Vec<Outbound> {
        ThroughputRecorder::add(&self.throughput.route_request_rx, 1);

        let Ok((header, header_len)) = RouteRequestHeader::decode(bytes) else {
            return Vec::new();
        };
        let token_end = header_len + SESSION_TOKEN_SIZE;
        let Some(token_bytes) = bytes.get(header_len..token_end) else {
            return Vec::new();
        };
        let Ok(fields) = RouteTokenFields::open(token_bytes, &self.relay_shared_key, &self.backend_public_key, now_unix)
        else {
            return Vec::new();
        };

        if self.sessions.size() >= self.max_sessions && self.sessions.get(fields.session_id).is_none() {
            return Vec::new();
        }

        self.sessions.insert_or_refresh(Session::new(
            fields.session_id,
            fields.next_address,
            fields.prev_address,
            fields.session_private_key,
            fields.expire_timestamp,
            fields.envelope_up_kbps,
            fields.envelope_down_kbps,
            now_millis,
        ));

        let remaining = &bytes[token_end..];
        let forwarded = RouteRequestHeader { sequence: header.sequence };
        let mut w = relay_proto::Writer::new();
        forwarded.encode(&mut w);
        w.bytes(remaining);

        ThroughputRecorder::add(&self.throughput.route_request_tx, 1);
        vec![Outbound {
            to: fields.next_address,
            bytes: w.into_bytes(),
        }]
    }

    fn handle_session_packet(&mut self, packet_type: PacketType, bytes: &[u8], _now_unix: u64, now_millis: u64) -> Vec<Outbound> {
        self.count_rx(packet_type);

        let Ok((header, _)) = SessionHeader::decode(bytes) else {
            return Vec::new();
        };
        let Some(session) = self.sessions.get_mut(header.session_id) else {
            return Vec::new();
        };

        let direction = match packet_type.direction() {
            Some(Direction::Upstream) => SessionDirection::Up,
            Some(Direction::Downstream) => SessionDirection::Down,
            None => return Vec::new(),
        };

        if !session.is_fresh_sequence(direction, header.sequence) {
            return Vec::new();
        }

        let ad = &bytes[..SESSION_HEADER_SIZE];
        let ciphertext = &bytes[SESSION_HEADER_SIZE..];
        let mut nonce = [0u8; 24];
        nonce[0..8].copy_from_slice(&header.session_id.to_le_bytes());
        nonce[8..16].copy_from_slice(&header.sequence.to_le_bytes());

        let Ok(plaintext) = xchacha20poly1305_decrypt(&session.session_private_key, &nonce, ad, ciphertext) else {
            return Vec::new();
        };

        if !session.admit(direction, header.sequence, bytes.len(), now_millis) {
            return Vec::new();
        }

        let next_hop = match direction {
            SessionDirection::Up => session.next_address,
            SessionDirection::Down => session.prev_address,
        };
        let should_close = plaintext.first() == Some(&SESSION_CLOSE_MARKER);
        let session_id = header.session_id;

        self.count_tx(packet_type);

        if should_close {
            self.sessions.remove(session_id);
        }

        vec![Outbound {
            to: next_hop,
            bytes: bytes.to_vec(),
        }]
    }

    fn count_rx(&self, packet_type: PacketType) {
        use PacketType::*;
        let counter = match packet_type {
            RouteResponse => &self.throughput.route_response_rx,
            ClientToServer => &self.throughput.client_to_server_rx,
            ServerToClient => &self.throughput.server_to_client_rx,
            SessionPing => &self.throughput.session_ping_rx,
            SessionPong => &self.throughput.session_pong_rx,
            ContinueRequest => &self.throughput.continue_request_rx,
            ContinueResponse => &self.throughput.continue_response_rx,
            _ => return,
        };
        ThroughputRecorder::add(counter, 1);
    }

    fn count_tx(&self, packet_type: PacketType) {
        use PacketType::*;
        let counter = match packet_type {
            RouteResponse => &self.throughput.route_response_tx,
            ClientToServer => &self.throughput.client_to_server_tx,
            ServerToClient => &self.throughput.server_to_client_tx,
            SessionPing => &self.throughput.session_ping_tx,
            SessionPong => &self.throughput.session_pong_tx,
            ContinueRequest => &self.throughput.continue_request_tx,
            ContinueResponse => &self.throughput.continue_response_tx,
            _ => return,
        };
        ThroughputRecorder::add(counter, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_crypto::{xchacha20poly1305_encrypt, Keypair, NONCE_SIZE};
    use std::net::Ipv4Addr;

    fn new_router(relay_shared_key: [u8; 32], backend_public_key: [u8; 32]) -> PacketRouter {
        PacketRouter::new(
            Arc::new(ThroughputRecorder::new()),
            Arc::new(Mutex::new(RelayManager::new())),
            Arc::new(RouterInfo::new(1, Keypair::generate(), 0)),
            relay_shared_key,
            backend_public_key,
            1_000_000,
        )
    }

    fn addr(b4: u8, port: u16) -> Address {
        Address::V4(Ipv4Addr::new(10, 0, 0, b4), port)
    }

    #[test]
    fn unknown_type_increments_unknown_rx_only() {
        let mut router = new_router([0u8; 32], [0u8; 32]);
        let out = router.handle_datagram(addr(9, 1), &[250, 1, 2, 3], 0, 0);
        assert!(out.is_empty());
        assert_eq!(router.throughput.drain().unknown_rx, 1);
    }

    #[test]
    fn empty_and_one_byte_packets_do_not_crash() {
        let mut router = new_router([0u8; 32], [0u8; 32]);
        assert!(router.handle_datagram(addr(9, 1), &[], 0, 0).is_empty());
        assert!(router.handle_datagram(addr(9, 1), &[3], 0, 0).is_empty());
    }

    #[test]
    fn near_ping_gets_signed_pong_reply() {
        let mut router = new_router([0u8; 32], [0u8; 32]);
        let probe_keypair = Keypair::generate();
        let msg = SignedPing::signed_message(PacketType::NearPing, 42);
        let ping = SignedPing {
            packet_type: PacketType::NearPing,
            sequence: 42,
            sender_public_key: probe_keypair.public_key(),
            signature: probe_keypair.sign(&msg),
        };
        let mut w = relay_proto::Writer::new();
        ping.encode(&mut w);

        let out = router.handle_datagram(addr(9, 1), &w.into_bytes(), 0, 0);
        assert_eq!(out.len(), 1);
        let (reply, _) = SignedPing::decode(&out[0].bytes).unwrap();
        assert_eq!(reply.packet_type, PacketType::Pong);
        assert_eq!(reply.sequence, 42);
        assert!(reply.is_authentic());
    }

    #[test]
    fn inbound_ping_echoed_as_outbound_ping() {
        let mut router = new_router([0u8; 32], [0u8; 32]);
        let ping = UnsignedPing {
            packet_type: PacketType::InboundPing,
            sequence: 7,
        };
        let mut w = relay_proto::Writer::new();
        ping.encode(&mut w);
        let out = router.handle_datagram(addr(9, 1), &w.into_bytes(), 0, 0);
        assert_eq!(out.len(), 1);
        let (reply, _) = UnsignedPing::decode(&out[0].bytes).unwrap();
        assert_eq!(reply.packet_type, PacketType::OutboundPing);
        assert_eq!(reply.sequence, 7);
    }

    fn route_request_bytes(
        shared_key: &[u8; 32],
        backend: &Keypair,
        session_id: u64,
        expire: u64,
        next: Address,
        prev: Address,
        key: [u8; 32],
    ) -> Vec<u8> {
        let fields = RouteTokenFields {
            session_id,
            expire_timestamp: expire,
            next_address: next,
            prev_address: prev,
            session_private_key: key,
            envelope_up_kbps: 0,
            envelope_down_kbps: 0,
        };
        let token = fields.seal(shared_key, backend, [5u8; NONCE_SIZE]);
        let mut w = relay_proto::Writer::new();
        RouteRequestHeader { sequence: 1 }.encode(&mut w);
        w.bytes(&token);
        w.into_bytes()
    }

    #[test]
    fn route_request_installs_session_and_forwards() {
        let shared_key = [1u8; 32];
        let backend = Keypair::generate();
        let mut router = new_router(shared_key, backend.public_key());

        assert_eq!(router.sessions().size(), 0);
        let bytes = route_request_bytes(&shared_key, &backend, 0xAABB, 1000, addr(2, 7777), addr(1, 5555), [9u8; 32]);
        let out = router.handle_datagram(addr(1, 5555), &bytes, 0, 0);
        assert_eq!(router.sessions().size(), 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, addr(2, 7777));
    }

    fn session_packet(packet_type: PacketType, session_id: u64, sequence: u64, key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        let header = SessionHeader {
            packet_type,
            session_id,
            sequence,
        };
        let mut w = relay_proto::Writer::new();
        header.encode(&mut w);
        let ad = w.into_bytes();
        let mut nonce = [0u8; 24];
        nonce[0..8].copy_from_slice(&session_id.to_le_bytes());
        nonce[8..16].copy_from_slice(&sequence.to_le_bytes());
        let ciphertext = xchacha20poly1305_encrypt(key, &nonce, &ad, plaintext);
        let mut full = ad;
        full.extend_from_slice(&ciphertext);
        full
    }

    #[test]
    fn replay_is_dropped_second_time() {
        let shared_key = [1u8; 32];
        let backend = Keypair::generate();
        let mut router = new_router(shared_key, backend.public_key());
        let key = [9u8; 32];
        let route_bytes = route_request_bytes(&shared_key, &backend, 1, 1000, addr(2, 1), addr(1, 1), key);
        router.handle_datagram(addr(1, 1), &route_bytes, 0, 0);

        let packet = session_packet(PacketType::ClientToServer, 1, 5, &key, b"hello");
        let out1 = router.handle_datagram(addr(1, 1), &packet, 0, 0);
        let out2 = router.handle_datagram(addr(1, 1), &packet, 0, 0);
        assert_eq!(out1.len(), 1);
        assert_eq!(out2.len(), 0);

        let snapshot = router.throughput.drain();
        assert_eq!(snapshot.client_to_server_rx, 2);
        assert_eq!(snapshot.client_to_server_tx, 1);
    }

    #[test]
    fn missing_session_drops() {
        let mut router = new_router([1u8; 32], [2u8; 32]);
        let packet = session_packet(PacketType::ClientToServer, 999, 1, &[0u8; 32], b"x");
        let out = router.handle_datagram(addr(1, 1), &packet, 0, 0);
        assert!(out.is_empty());
        assert_eq!(router.throughput.drain().client_to_server_rx, 1);
    }

    #[test]
    fn sequence_at_max_rejects_next_legitimate_packet() {
        let shared_key = [1u8; 32];
        let backend = Keypair::generate();
        let mut router = new_router(shared_key, backend.public_key());
        let key = [9u8; 32];
        let route_bytes = route_request_bytes(&shared_key, &backend, 1, 1000, addr(2, 1), addr(1, 1), key);
        router.handle_datagram(addr(1, 1), &route_bytes, 0, 0);

        let max_packet = session_packet(PacketType::ClientToServer, 1, u64::MAX, &key, b"last");
        let out = router.handle_datagram(addr(1, 1), &max_packet, 0, 0);
        assert_eq!(out.len(), 1);

        let next_packet = session_packet(PacketType::ClientToServer, 1, u64::MAX, &key, b"never");
        let out2 = router.handle_datagram(addr(1, 1), &next_packet, 0, 0);
        assert!(out2.is_empty());
    }

    #[test]
    fn close_marker_removes_session_after_forwarding() {
        let shared_key = [1u8; 32];
        let backend = Keypair::generate();
        let mut router = new_router(shared_key, backend.public_key());
        let key = [9u8; 32];
        let route_bytes = route_request_bytes(&shared_key, &backend, 1, 1000, addr(2, 1), addr(1, 1), key);
        router.handle_datagram(addr(1, 1), &route_bytes, 0, 0);
        assert_eq!(router.sessions().size(), 1);

        let mut plaintext = vec![SESSION_CLOSE_MARKER];
        plaintext.extend_from_slice(b"bye");
        let packet = session_packet(PacketType::ClientToServer, 1, 1, &key, &plaintext);
        let out = router.handle_datagram(addr(1, 1), &packet, 0, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(router.sessions().size(), 0);
    }
}
