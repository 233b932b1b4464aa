//! The neighbor roster: RTT/jitter/loss tracking for peer relays, driven by
//! periodic signed pings. EWMA smoothing and the sliding loss window are
//! adapted from this workspace's delay-based rate controller.

use std::collections::{HashMap, VecDeque};

use relay_proto::Address;

/// Same smoothing factor the workspace's congestion controller uses for its
/// RTT EWMA.
const RTT_SMOOTHING: f64 = 0.125;
const LOSS_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayDescriptor {
    pub relay_id: u64,
    pub address: Address,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_fraction: f64,
    pub last_pong_time: u64,
}

struct NeighborState {
    descriptor: RelayDescriptor,
    rtt_initialized: bool,
    next_sequence: u64,
    pending: HashMap<u64, u64>, // sequence -> sent_time_millis
    loss_window: VecDeque<bool>,
}

impl NeighborState {
    fn new(relay_id: u64, address: Address) -> Self {
        NeighborState {
            descriptor: RelayDescriptor {
                relay_id,
                address,
                rtt_ms: 0.0,
                jitter_ms: 0.0,
                packet_loss_fraction: 1.0,
                last_pong_time: 0,
            },
            rtt_initialized: false,
            next_sequence: 0,
            pending: HashMap::new(),
            loss_window: VecDeque::with_capacity(LOSS_WINDOW),
        }
    }

    fn record_outcome(&mut self, hit: bool) {
        if self.loss_window.len() == LOSS_WINDOW {
            self.loss_window.pop_front();
        }
        self.loss_window.push_back(hit);
        let misses = self.loss_window.iter().filter(|hit| !**hit).count();
        self.descriptor.packet_loss_fraction = misses as f64 / self.loss_window.len() as f64;
    }

    fn record_rtt_sample(&mut self, rtt_ms: f64, now_millis: u64) {
        if !self.rtt_initialized {
            self.descriptor.rtt_ms = rtt_ms;
            self.descriptor.jitter_ms = 0.0;
            self.rtt_initialized = true;
        } else {
            let jitter_sample = (rtt_ms - self.descriptor.rtt_ms).abs();
            self.descriptor.jitter_ms = (1.0 - RTT_SMOOTHING) * self.descriptor.jitter_ms + RTT_SMOOTHING * jitter_sample;
            self.descriptor.rtt_ms = (1.0 - RTT_SMOOTHING) * self.descriptor.rtt_ms + RTT_SMOOTHING * rtt_ms;
        }
        self.descriptor.last_pong_time = now_millis;
        self.record_outcome(true);
    }
}

#[derive(Default)]
pub struct RelayManager {
    neighbors: HashMap<u64, NeighborState>,
}

impl RelayManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the roster atomically: relays absent from `roster` lose all
    /// tracked state; relays present in both keep their history; relays new
    /// to the roster start at `rtt=0, jitter=0, loss=1.0`.
    pub fn update(&mut self, roster: &[(u64, Address)]) {
        let mut next = HashMap::with_capacity(roster.len());
        for &(relay_id, address) in roster {
            let mut state = self
                .neighbors
                .remove(&relay_id)
                .unwrap_or_else(|| NeighborState::new(relay_id, address));
            state.descriptor.address = address;
            next.insert(relay_id, state);
        }
        self.neighbors = next;
    }

    pub fn get_stats(&self) -> Vec<RelayDescriptor> {
        self.neighbors.values().map(|s| s.descriptor).collect()
    }

    pub fn contains(&self, relay_id: u64) -> bool {
        self.neighbors.contains_key(&relay_id)
    }

    /// Allocates the next outbound ping sequence for `relay_id` and records
    /// the send time so a later [`RelayManager::record_pong`] can compute RTT.
    pub fn record_ping_sent(&mut self, relay_id: u64, now_millis: u64) -> Option<u64> {
        let state = self.neighbors.get_mut(&relay_id)?;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.pending.insert(sequence, now_millis);
        Some(sequence)
    }

    /// Matches a received Pong against a pending ping and feeds the RTT/jitter
    /// EWMA and the loss window. Returns the computed RTT in milliseconds.
    pub fn record_pong(&mut self, relay_id: u64, sequence: u64, now_millis: u64) -> Option<f64> {
        let state = self.neighbors.get_mut(&relay_id)?;
        let sent_at = state.pending.remove(&sequence)?;
        let rtt_ms = now_millis.saturating_sub(sent_at) as f64;
        state.record_rtt_sample(rtt_ms, now_millis);
        Some(rtt_ms)
    }

    /// Ages out pending pings older than `timeout_millis`, counting each as
    /// a loss for the sliding window.
    pub fn sweep_missing(&mut self, now_millis: u64, timeout_millis: u64) {
        for state in self.neighbors.values_mut() {
            let stale: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, &sent_at)| now_millis.saturating_sub(sent_at) > timeout_millis)
                .map(|(&seq, _)| seq)
                .collect();
            for seq in stale {
                state.pending.remove(&seq);
                state.record_outcome(false);
            }
        }
    }
}
