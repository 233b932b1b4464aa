//! The session map: per-flow cryptographic and accounting state installed by
//! route requests and mutated only by the router on the receive thread.

use std::collections::HashMap;

use relay_proto::Address;

/// A direction's leaky-bucket envelope: `capacity` bytes refill over one
/// second at `kbps * 1000 / 8` bytes/sec, capped at `capacity`. A `kbps` of
/// zero disables enforcement for that direction entirely.
#[derive(Debug, Clone, Copy)]
struct Envelope {
    kbps: u32,
    available: f64,
    last_refill_millis: u64,
}

impl Envelope {
    fn new(kbps: u32, now_millis: u64) -> Self {
        let capacity = Self::capacity_bytes(kbps);
        Envelope {
            kbps,
            available: capacity,
            last_refill_millis: now_millis,
        }
    }

    fn capacity_bytes(kbps: u32) -> f64 {
        kbps as f64 * 1000.0 / 8.0
    }

    /// Refills for elapsed time, then tries to debit `len` bytes. Returns
    /// `true` if the packet fits in budget and should be forwarded.
    fn try_debit(&mut self, len: usize, now_millis: u64) -> bool {
        if self.kbps == 0 {
            return true;
        }
        let elapsed_secs = now_millis.saturating_sub(self.last_refill_millis) as f64 / 1000.0;
        self.last_refill_millis = now_millis;
        let capacity = Self::capacity_bytes(self.kbps);
        self.available = (self.available + capacity * elapsed_secs).min(capacity);

        if self.available < len as f64 {
            false
        } else {
            self.available -= len as f64;
            true
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirection {
    Up,
    Down,
}

pub struct Session {
    pub session_id: u64,
    pub next_address: Address,
    pub prev_address: Address,
    pub session_private_key: [u8; 32],
    pub expire_timestamp: u64,
    expected_client_to_server_sequence: u64,
    expected_server_to_client_sequence: u64,
    envelope_up: Envelope,
    envelope_down: Envelope,
    pub bytes_up: u64,
    pub bytes_down: u64,
}

impl Session {
    pub fn new(
        session_id: u64,
        next_address: Address,
        prev_address: Address,
        session_private_key: [u8; 32],
        expire_timestamp: u64,
        envelope_up_kbps: u32,
        envelope_down_kbps: u32,
        now_millis: u64,
    ) -> Self {
        Session {
            session_id,
            next_address,
            prev_address,
            session_private_key,
            expire_timestamp,
            expected_client_to_server_sequence: 0,
            expected_server_to_client_sequence: 0,
            envelope_up: Envelope::new(envelope_up_kbps, now_millis),
            envelope_down: Envelope::new(envelope_down_kbps, now_millis),
            bytes_up: 0,
            bytes_down: 0,
        }
    }

    fn expected_sequence(&self, direction: SessionDirection) -> u64 {
        match direction {
            SessionDirection::Up => self.expected_client_to_server_sequence,
            SessionDirection::Down => self.expected_server_to_client_sequence,
        }
    }

    /// `true` iff `sequence` is strictly greater than the last accepted one
    /// for this direction. A stored expected value of `u64::MAX` rejects
    /// everything afterward, since sequence numbers never wrap.
    pub fn is_fresh_sequence(&self, direction: SessionDirection, sequence: u64) -> bool {
        sequence > self.expected_sequence(direction)
    }

    fn accept_sequence(&mut self, direction: SessionDirection, sequence: u64) {
        match direction {
            SessionDirection::Up => self.expected_client_to_server_sequence = sequence,
            SessionDirection::Down => self.expected_server_to_client_sequence = sequence,
        }
    }

    /// Attempts to admit a datagram of `len` bytes travelling `direction`
    /// with `sequence`. On success, advances the expected sequence, debits
    /// the envelope bucket, and accounts the bytes.
    pub fn admit(&mut self, direction: SessionDirection, sequence: u64, len: usize, now_millis: u64) -> bool {
        if !self.is_fresh_sequence(direction, sequence) {
            return false;
        }
        let envelope = match direction {
            SessionDirection::Up => &mut self.envelope_up,
            SessionDirection::Down => &mut self.envelope_down,
        };
        if !envelope.try_debit(len, now_millis) {
            return false;
        }
        self.accept_sequence(direction, sequence);
        match direction {
            SessionDirection::Up => self.bytes_up += len as u64,
            SessionDirection::Down => self.bytes_down += len as u64,
        }
        true
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        now_unix > self.expire_timestamp
    }
}

#[derive(Default)]
pub struct SessionMap {
    sessions: HashMap<u64, Session>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_or_refresh(&mut self, session: Session) {
        self.sessions.insert(session.session_id, session);
    }

    pub fn get(&self, session_id: u64) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn get_mut(&mut self, session_id: u64) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn remove(&mut self, session_id: u64) -> Option<Session> {
        self.sessions.remove(&session_id)
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    pub fn purge(&mut self, now_unix: u64) {
        self.sessions.retain(|_, session| !session.is_expired(now_unix));
    }

    pub fn envelope_up_total(&self) -> u64 {
        self.sessions.values().map(|s| s.bytes_up).sum()
    }

    pub fn envelope_down_total(&self) -> u64 {
        self.sessions.values().map(|s| s.bytes_down).sum()
    }
}

/// A read-only point-in-time view of the session map's aggregate counters,
/// published by the router thread for the backend thread to read without
/// taking a lock on the map itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionSnapshot {
    pub count: usize,
    pub envelope_up_total: u64,
    pub envelope_down_total: u64,
}

impl SessionMap {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            count: self.size(),
            envelope_up_total: self.envelope_up_total(),
            envelope_down_total: self.envelope_down_total(),
        }
    }
}
