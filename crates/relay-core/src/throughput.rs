//! Flat atomic byte counters, one per packet type per direction, accumulated
//! by the router on the receive thread and drained by the backend loop.
//! The field order here is the canonical wire order of the backend update's
//! per-packet-type counter block.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($field:ident),+ $(,)?) => {
        #[derive(Default)]
        pub struct ThroughputRecorder {
            $(pub $field: AtomicU64,)+
        }

        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct ThroughputSnapshot {
            $(pub $field: u64,)+
        }

        impl ThroughputRecorder {
            pub fn new() -> Self {
                Self::default()
            }

            /// Atomically swaps every counter to zero and returns what it held.
            pub fn drain(&self) -> ThroughputSnapshot {
                ThroughputSnapshot {
                    $($field: self.$field.swap(0, Ordering::Relaxed),)+
                }
            }
        }
    };
}

counters!(
    outbound_ping_tx,
    route_request_rx,
    route_request_tx,
    route_response_rx,
    route_response_tx,
    client_to_server_rx,
    client_to_server_tx,
    server_to_client_rx,
    server_to_client_tx,
    inbound_ping_rx,
    inbound_ping_tx,
    pong_rx,
    session_ping_rx,
    session_ping_tx,
    session_pong_rx,
    session_pong_tx,
    continue_request_rx,
    continue_request_tx,
    continue_response_rx,
    continue_response_tx,
    near_ping_rx,
    near_ping_tx,
    unknown_rx,
);

impl ThroughputRecorder {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_resets_to_zero() {
        let recorder = ThroughputRecorder::new();
        ThroughputRecorder::add(&recorder.route_request_rx, 5);
        ThroughputRecorder::add(&recorder.unknown_rx, 2);

        let first = recorder.drain();
        assert_eq!(first.route_request_rx, 5);
        assert_eq!(first.unknown_rx, 2);
        assert_eq!(first.client_to_server_rx, 0);

        let second = recorder.drain();
        assert_eq!(second, ThroughputSnapshot::default());
    }
}
