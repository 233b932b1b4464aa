//! The backend control loop: builds an `UpdateRequest` from the relay's
//! current state every cycle, posts it, and applies the roster/time it gets
//! back. Runs on its own thread; every suspension point is either an HTTP
//! call or a sleep.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_core::{RelayManager, RouterInfo, SessionSnapshot, ThroughputRecorder};
use relay_proto::Address;

use crate::http::HttpTransport;
use crate::sysinfo::SystemUsageProbe;
use crate::wire::{NeighborPingStat, UpdateRequest, UpdateResponse, UPDATE_REQUEST_VERSION};

pub const UPDATE_ENDPOINT: &str = "/relay_update";
pub const MAX_UPDATE_ATTEMPTS: u32 = 5;
pub const UPDATE_TIMEOUT_SECS: u64 = 30;
pub const CLEAN_SHUTDOWN_TIMEOUT_SECS: u64 = 60;
pub const CLEAN_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const UPDATE_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Starting,
    Running,
    Draining,
    Stopped,
}

pub struct BackendLoop {
    pub transport: Box<dyn HttpTransport>,
    pub probe: Box<dyn SystemUsageProbe>,
    pub backend_url: String,
    pub relay_address: Address,
    pub update_token: [u8; 32],
    pub router_info: Arc<RouterInfo>,
    pub relay_manager: Arc<Mutex<RelayManager>>,
    pub throughput: Arc<ThroughputRecorder>,
    pub session_snapshot: Arc<Mutex<SessionSnapshot>>,
}

impl BackendLoop {
    fn build_request(&self, shutting_down: bool) -> UpdateRequest {
        let neighbor_stats = {
            let manager = self.relay_manager.lock().unwrap();
            manager
                .get_stats()
                .into_iter()
                .map(|d| NeighborPingStat {
                    relay_id: d.relay_id,
                    rtt_ms: d.rtt_ms as f32,
                    jitter_ms: d.jitter_ms as f32,
                    packet_loss: d.packet_loss_fraction as f32,
                })
                .collect()
        };
        let snapshot = *self.session_snapshot.lock().unwrap();
        let counters = self.throughput.drain();
        let (cpu_usage, memory_usage) = self.probe.sample();

        UpdateRequest {
            version: UPDATE_REQUEST_VERSION,
            relay_address: self.relay_address,
            update_token: self.update_token,
            neighbor_stats,
            session_count: snapshot.count as u32,
            envelope_up_total: snapshot.envelope_up_total,
            envelope_down_total: snapshot.envelope_down_total,
            counters,
            shutting_down,
            cpu_usage,
            memory_usage,
        }
    }

    fn apply_response(&self, response: &UpdateResponse) {
        self.router_info.set_authoritative_time(response.authoritative_timestamp);
        let roster: Vec<(u64, Address)> = response
            .relays
            .iter()
            .filter_map(|entry| {
                let socket_addr: SocketAddr = entry.address.parse().ok()?;
                Some((entry.relay_id, Address::from_socket_addr(socket_addr)))
            })
            .collect();
        self.relay_manager.lock().unwrap().update(&roster);
    }

    fn try_update_once(&self, shutting_down: bool) -> bool {
        let request = self.build_request(shutting_down);
        let url = format!("{}{}", self.backend_url, UPDATE_ENDPOINT);
        match self.transport.post(&url, &request.encode()) {
            Ok(body) => match UpdateResponse::decode(&body) {
                Ok(response) => {
                    self.apply_response(&response);
                    true
                }
                Err(_) => {
                    tracing::warn!("backend update response failed to decode");
                    false
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "backend update request failed");
                false
            }
        }
    }

    /// Retries one update cycle up to `MAX_UPDATE_ATTEMPTS` times, spaced one
    /// second apart, bounded overall by `UPDATE_TIMEOUT_SECS`. `sleep` is
    /// injected so tests can run this without real wall-clock delay.
    pub fn run_cycle_with_retries(&self, shutting_down: bool, mut sleep: impl FnMut(Duration)) -> bool {
        let deadline = Instant::now() + Duration::from_secs(UPDATE_TIMEOUT_SECS);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            if self.try_update_once(shutting_down) {
                return true;
            }
            if attempt < MAX_UPDATE_ATTEMPTS && Instant::now() < deadline {
                sleep(Duration::from_secs(1));
            }
        }
        false
    }

    /// Runs the full Starting -> Running -> (Draining) -> Stopped state
    /// machine. Returns the process exit code the caller should use. `sleep`
    /// is injected the same way `run_cycle_with_retries` takes one, so the
    /// Draining grace/drain windows can be driven in tests without real
    /// multi-second waits.
    pub fn run(&self, should_clean_shutdown: &AtomicBool, mut sleep: impl FnMut(Duration)) -> i32 {
        let mut state = BackendState::Starting;
        let mut consecutive_failures = 0u32;

        loop {
            match state {
                BackendState::Starting | BackendState::Running => {
                    if should_clean_shutdown.load(Ordering::Relaxed) {
                        state = BackendState::Draining;
                        continue;
                    }
                    let success = self.run_cycle_with_retries(false, &mut sleep);
                    if success {
                        consecutive_failures = 0;
                        state = BackendState::Running;
                        sleep(Duration::from_secs(UPDATE_INTERVAL_SECS));
                    } else {
                        consecutive_failures += 1;
                        tracing::error!(consecutive_failures, "backend update cycle failed");
                        if consecutive_failures >= MAX_UPDATE_ATTEMPTS {
                            return 2;
                        }
                    }
                }
                BackendState::Draining => {
                    let drain_deadline = Instant::now() + Duration::from_secs(CLEAN_SHUTDOWN_TIMEOUT_SECS);
                    let mut final_success = false;
                    while Instant::now() < drain_deadline {
                        if self.run_cycle_with_retries(true, &mut sleep) {
                            final_success = true;
                            break;
                        }
                    }
                    if final_success {
                        sleep(Duration::from_secs(CLEAN_SHUTDOWN_GRACE_SECS));
                    }
                    state = BackendState::Stopped;
                }
                BackendState::Stopped => return 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TransportError;
    use relay_core::{RouterInfo, ThroughputRecorder};
    use relay_crypto::Keypair;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    struct ScriptedTransport {
        responses: StdMutex<Vec<Result<Vec<u8>, TransportError>>>,
    }

    impl HttpTransport for ScriptedTransport {
        fn post(&self, _url: &str, _body: &[u8]) -> Result<Vec<u8>, TransportError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(TransportError::Request("exhausted".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    struct ZeroProbe;
    impl SystemUsageProbe for ZeroProbe {
        fn sample(&self) -> (f64, f64) {
            (0.0, 0.0)
        }
    }

    fn sample_response_bytes() -> Vec<u8> {
        UpdateResponse {
            version: 1,
            authoritative_timestamp: 123,
            relays: vec![],
        }
        .encode()
    }

    fn new_loop(responses: Vec<Result<Vec<u8>, TransportError>>) -> BackendLoop {
        BackendLoop {
            transport: Box::new(ScriptedTransport {
                responses: StdMutex::new(responses),
            }),
            probe: Box::new(ZeroProbe),
            backend_url: "http://backend.example".to_string(),
            relay_address: Address::V4(Ipv4Addr::new(203, 0, 113, 9), 40000),
            update_token: [0u8; 32],
            router_info: Arc::new(RouterInfo::new(1, Keypair::generate(), 0)),
            relay_manager: Arc::new(Mutex::new(RelayManager::new())),
            throughput: Arc::new(ThroughputRecorder::new()),
            session_snapshot: Arc::new(Mutex::new(SessionSnapshot::default())),
        }
    }

    #[test]
    fn successful_cycle_needs_no_retry_or_sleep() {
        let backend_loop = new_loop(vec![Ok(sample_response_bytes())]);
        let mut slept = 0;
        let ok = backend_loop.run_cycle_with_retries(false, |_| slept += 1);
        assert!(ok);
        assert_eq!(slept, 0);
        assert_eq!(backend_loop.router_info.now_unix(), 123);
    }

    #[test]
    fn retries_until_success_within_attempt_budget() {
        let backend_loop = new_loop(vec![
            Err(TransportError::ShortResponse),
            Err(TransportError::ShortResponse),
            Ok(sample_response_bytes()),
        ]);
        let mut slept = 0;
        let ok = backend_loop.run_cycle_with_retries(false, |_| slept += 1);
        assert!(ok);
        assert_eq!(slept, 2);
    }

    #[test]
    fn exhausting_all_attempts_fails_the_cycle() {
        let backend_loop = new_loop(vec![
            Err(TransportError::ShortResponse),
            Err(TransportError::ShortResponse),
            Err(TransportError::ShortResponse),
            Err(TransportError::ShortResponse),
            Err(TransportError::ShortResponse),
        ]);
        let mut slept = 0;
        let ok = backend_loop.run_cycle_with_retries(false, |_| slept += 1);
        assert!(!ok);
        assert_eq!(slept, 4); // sleeps between attempts, not after the last
    }

    #[test]
    fn draining_state_runs_to_stopped_with_grace_sleep() {
        let backend_loop = new_loop(vec![Ok(sample_response_bytes())]);
        let should_clean_shutdown = AtomicBool::new(true);
        let mut sleeps = Vec::new();
        let exit_code = backend_loop.run(&should_clean_shutdown, |d| sleeps.push(d));
        assert_eq!(exit_code, 0);
        assert_eq!(sleeps, vec![Duration::from_secs(CLEAN_SHUTDOWN_GRACE_SECS)]);
    }

    #[test]
    fn roster_applied_from_response() {
        let backend_loop = new_loop(vec![Ok(UpdateResponse {
            version: 1,
            authoritative_timestamp: 55,
            relays: vec![crate::wire::RelayRosterEntry {
                relay_id: 7,
                address: "10.0.0.1:5000".to_string(),
            }],
        }
        .encode())]);
        backend_loop.run_cycle_with_retries(false, |_| {});
        let stats = backend_loop.relay_manager.lock().unwrap().get_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].relay_id, 7);
    }
}
