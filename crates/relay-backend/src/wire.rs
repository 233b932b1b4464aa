//! `UpdateRequest`/`UpdateResponse`: the binary control-plane exchange the
//! backend loop POSTs to `/relay_update` every cycle.

use relay_core::ThroughputSnapshot;
use relay_proto::wire::{Reader, Writer};
use relay_proto::{Address, WireError};

pub const UPDATE_REQUEST_VERSION: u32 = 1;
pub const UPDATE_RESPONSE_VERSION: u32 = 1;
pub const MAX_RELAYS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborPingStat {
    pub relay_id: u64,
    pub rtt_ms: f32,
    pub jitter_ms: f32,
    pub packet_loss: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub version: u32,
    pub relay_address: Address,
    pub update_token: [u8; 32],
    pub neighbor_stats: Vec<NeighborPingStat>,
    pub session_count: u32,
    pub envelope_up_total: u64,
    pub envelope_down_total: u64,
    pub counters: ThroughputSnapshot,
    pub shutting_down: bool,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

fn address_to_string(address: Address) -> String {
    address.to_socket_addr().to_string()
}

impl UpdateRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.version);
        w.length_prefixed(address_to_string(self.relay_address).as_bytes());
        w.bytes(&self.update_token);

        w.u32(self.neighbor_stats.len() as u32);
        for stat in &self.neighbor_stats {
            w.u64(stat.relay_id);
            w.f32(stat.rtt_ms);
            w.f32(stat.jitter_ms);
            w.f32(stat.packet_loss);
        }

        w.u32(self.session_count);
        w.u64(self.envelope_up_total);
        w.u64(self.envelope_down_total);

        let c = &self.counters;
        for value in [
            c.outbound_ping_tx,
            c.route_request_rx,
            c.route_request_tx,
            c.route_response_rx,
            c.route_response_tx,
            c.client_to_server_rx,
            c.client_to_server_tx,
            c.server_to_client_rx,
            c.server_to_client_tx,
            c.inbound_ping_rx,
            c.inbound_ping_tx,
            c.pong_rx,
            c.session_ping_rx,
            c.session_ping_tx,
            c.session_pong_rx,
            c.session_pong_tx,
            c.continue_request_rx,
            c.continue_request_tx,
            c.continue_response_rx,
            c.continue_response_tx,
            c.near_ping_rx,
            c.near_ping_tx,
            c.unknown_rx,
        ] {
            w.u64(value);
        }

        w.u8(self.shutting_down as u8);
        w.f64(self.cpu_usage);
        w.f64(self.memory_usage);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let version = r.u32()?;
        let address_str = std::str::from_utf8(r.length_prefixed()?).map_err(|_| WireError::Truncated)?;
        let relay_address = Address::from_socket_addr(address_str.parse().map_err(|_| WireError::Truncated)?);
        let update_token = r.array()?;

        let neighbor_count = r.u32()? as usize;
        let mut neighbor_stats = Vec::with_capacity(neighbor_count);
        for _ in 0..neighbor_count {
            neighbor_stats.push(NeighborPingStat {
                relay_id: r.u64()?,
                rtt_ms: r.f32()?,
                jitter_ms: r.f32()?,
                packet_loss: r.f32()?,
            });
        }

        let session_count = r.u32()?;
        let envelope_up_total = r.u64()?;
        let envelope_down_total = r.u64()?;

        macro_rules! next { () => { r.u64()? } }
        let counters = ThroughputSnapshot {
            outbound_ping_tx: next!(),
            route_request_rx: next!(),
            route_request_tx: next!(),
            route_response_rx: next!(),
            route_response_tx: next!(),
            client_to_server_rx: next!(),
            client_to_server_tx: next!(),
            server_to_client_rx: next!(),
            server_to_client_tx: next!(),
            inbound_ping_rx: next!(),
            inbound_ping_tx: next!(),
            pong_rx: next!(),
            session_ping_rx: next!(),
            session_ping_tx: next!(),
            session_pong_rx: next!(),
            session_pong_tx: next!(),
            continue_request_rx: next!(),
            continue_request_tx: next!(),
            continue_response_rx: next!(),
            continue_response_tx: next!(),
            near_ping_rx: next!(),
            near_ping_tx: next!(),
            unknown_rx: next!(),
        };

        let shutting_down = r.u8()? != 0;
        let cpu_usage = r.f64()?;
        let memory_usage = r.f64()?;

        Ok(UpdateRequest {
            version,
            relay_address,
            update_token,
            neighbor_stats,
            session_count,
            envelope_up_total,
            envelope_down_total,
            counters,
            shutting_down,
            cpu_usage,
            memory_usage,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayRosterEntry {
    pub relay_id: u64,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResponse {
    pub version: u32,
    pub authoritative_timestamp: u64,
    pub relays: Vec<RelayRosterEntry>,
}

impl UpdateResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.version);
        w.u64(self.authoritative_timestamp);
        w.u32(self.relays.len() as u32);
        for relay in &self.relays {
            w.u64(relay.relay_id);
            w.length_prefixed(relay.address.as_bytes());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 16 {
            return Err(WireError::Truncated);
        }
        let mut r = Reader::new(bytes);
        let version = r.u32()?;
        let authoritative_timestamp = r.u64()?;
        let count = r.u32()? as usize;
        let mut relays = Vec::with_capacity(count);
        for _ in 0..count {
            let relay_id = r.u64()?;
            let address = std::str::from_utf8(r.length_prefixed()?)
                .map_err(|_| WireError::Truncated)?
                .to_string();
            relays.push(RelayRosterEntry { relay_id, address });
        }
        Ok(UpdateResponse {
            version,
            authoritative_timestamp,
            relays,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn update_request_roundtrip() {
        let request = UpdateRequest {
            version: UPDATE_REQUEST_VERSION,
            relay_address: Address::V4(Ipv4Addr::new(203, 0, 113, 5), 40000),
            update_token: [7u8; 32],
            neighbor_stats: vec![NeighborPingStat {
                relay_id: 1,
                rtt_ms: 12.5,
                jitter_ms: 1.5,
                packet_loss: 0.01,
            }],
            session_count: 42,
            envelope_up_total: 1000,
            envelope_down_total: 2000,
            counters: ThroughputSnapshot {
                route_request_rx: 3,
                unknown_rx: 9,
                ..Default::default()
            },
            shutting_down: false,
            cpu_usage: 0.42,
            memory_usage: 0.77,
        };
        let bytes = request.encode();
        let decoded = UpdateRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn update_response_roundtrip() {
        let response = UpdateResponse {
            version: UPDATE_RESPONSE_VERSION,
            authoritative_timestamp: 1_700_000_000,
            relays: vec![
                RelayRosterEntry {
                    relay_id: 1,
                    address: "10.0.0.1:40000".to_string(),
                },
                RelayRosterEntry {
                    relay_id: 2,
                    address: "10.0.0.2:40000".to_string(),
                },
            ],
        };
        let bytes = response.encode();
        let decoded = UpdateResponse::decode(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn update_response_short_body_is_protocol_failure() {
        assert!(UpdateResponse::decode(&[0u8; 10]).is_err());
    }
}
