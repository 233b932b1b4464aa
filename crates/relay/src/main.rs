//! Relay process entry point: validates configuration, runs the crypto
//! self-test, binds the UDP socket, and runs the three long-lived threads
//! (receive/router, ping, backend) until shutdown.

mod config;

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, Socket, Type};
use tracing_subscriber::EnvFilter;

use relay_backend::{BackendLoop, ReqwestHttpTransport};
use relay_core::{AccelOutcome, AccelShim, NoopAccelShim, PacketRouter, RelayManager, RouterInfo, SessionSnapshot, ThroughputRecorder};
use relay_crypto::Keypair;
use relay_proto::Address;

use config::Config;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn bind_dual_stack(address: std::net::SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(address), Type::DGRAM, Some(Protocol::UDP))?;
    if address.is_ipv6() {
        // Accept both families on the one socket where the platform allows it.
        let _ = socket.set_only_v6(false);
    }
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(socket.into())
}

fn run_receive_loop(
    socket: UdpSocket,
    router: Arc<Mutex<PacketRouter>>,
    accel: Arc<dyn AccelShim>,
    should_loop: Arc<AtomicBool>,
    session_snapshot: Arc<Mutex<SessionSnapshot>>,
) {
    let mut buf = [0u8; 2048];
    let mut last_purge = Instant::now();

    while should_loop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                let src_addr = Address::from_socket_addr(src);
                let outcome = accel.try_handle(src_addr, &buf[..len]);
                let outbound = match outcome {
                    AccelOutcome::Handled(outbound) => outbound,
                    AccelOutcome::NotHandled => {
                        let mut router = router.lock().unwrap();
                        router.handle_datagram(src_addr, &buf[..len], now_unix(), now_millis())
                    }
                };
                for packet in outbound {
                    if let Err(err) = socket.send_to(&packet.bytes, packet.to.to_socket_addr()) {
                        tracing::debug!(error = %err, "send failed");
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => tracing::warn!(error = %err, "receive error"),
        }

        if last_purge.elapsed() >= Duration::from_secs(1) {
            let mut router = router.lock().unwrap();
            router.purge_expired(now_unix());
            *session_snapshot.lock().unwrap() = router.snapshot();
            last_purge = Instant::now();
        }
    }
}

fn run_ping_loop(
    router_info: Arc<RouterInfo>,
    relay_manager: Arc<Mutex<RelayManager>>,
    socket: UdpSocket,
    ping_interval: Duration,
    should_loop: Arc<AtomicBool>,
) {
    const PING_TIMEOUT_MILLIS: u64 = 2_000;

    while should_loop.load(Ordering::Relaxed) {
        let neighbors: Vec<(u64, Address)> = {
            let manager = relay_manager.lock().unwrap();
            manager.get_stats().into_iter().map(|d| (d.relay_id, d.address)).collect()
        };

        let now = now_millis();
        for (relay_id, address) in neighbors {
            let sequence = {
                let mut manager = relay_manager.lock().unwrap();
                manager.record_ping_sent(relay_id, now)
            };
            let Some(sequence) = sequence else { continue };
            let msg = relay_proto::packet::SignedPing::signed_message(relay_proto::PacketType::NearPing, sequence);
            let ping = relay_proto::packet::SignedPing {
                packet_type: relay_proto::PacketType::NearPing,
                sequence,
                sender_public_key: router_info.keypair.public_key(),
                signature: router_info.keypair.sign(&msg),
            };
            let mut w = relay_proto::Writer::new();
            ping.encode(&mut w);
            if let Err(err) = socket.send_to(&w.into_bytes(), address.to_socket_addr()) {
                tracing::debug!(error = %err, "near-ping send failed");
            }
        }

        {
            let mut manager = relay_manager.lock().unwrap();
            manager.sweep_missing(now_millis(), PING_TIMEOUT_MILLIS);
        }

        std::thread::sleep(ping_interval);
    }
}

fn main() -> std::process::ExitCode {
    let config = match Config::parse(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return std::process::ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config::log_level_filter(config.log_level).into()),
        )
        .init();

    if let Err(err) = relay_crypto::self_test() {
        tracing::error!(error = %err, "crypto self-test failed");
        return std::process::ExitCode::from(3);
    }
    tracing::info!("crypto self-test passed");

    let socket = match bind_dual_stack(config.address) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind UDP socket");
            return std::process::ExitCode::from(1);
        }
    };
    tracing::info!(address = %config.address, "relay listening");

    let keypair = Keypair::from_seed(&config.private_key);
    let relay_id = u64::from_le_bytes(config.private_key[0..8].try_into().unwrap());
    let router_info = Arc::new(RouterInfo::new(relay_id, keypair, now_unix()));
    let relay_manager = Arc::new(Mutex::new(RelayManager::new()));
    let throughput = Arc::new(ThroughputRecorder::new());
    let session_snapshot = Arc::new(Mutex::new(SessionSnapshot::default()));

    let router = Arc::new(Mutex::new(PacketRouter::new(
        throughput.clone(),
        relay_manager.clone(),
        router_info.clone(),
        config.private_key,
        config.backend_public_key,
        config.max_sessions,
    )));

    let should_loop = Arc::new(AtomicBool::new(true));
    let should_clean_shutdown = Arc::new(AtomicBool::new(false));

    let receive_socket = match socket.try_clone() {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(error = %err, "failed to clone socket for receive thread");
            return std::process::ExitCode::from(1);
        }
    };
    let ping_socket = match socket.try_clone() {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(error = %err, "failed to clone socket for ping thread");
            return std::process::ExitCode::from(1);
        }
    };

    let receive_handle = {
        let router = router.clone();
        let accel: Arc<dyn AccelShim> = Arc::new(NoopAccelShim);
        let should_loop = should_loop.clone();
        let session_snapshot = session_snapshot.clone();
        std::thread::spawn(move || run_receive_loop(receive_socket, router, accel, should_loop, session_snapshot))
    };

    let ping_handle = {
        let router_info = router_info.clone();
        let relay_manager = relay_manager.clone();
        let should_loop = should_loop.clone();
        let ping_interval = Duration::from_millis(config.ping_interval_ms);
        std::thread::spawn(move || run_ping_loop(router_info, relay_manager, ping_socket, ping_interval, should_loop))
    };

    let backend_loop = BackendLoop {
        transport: Box::new(ReqwestHttpTransport::new(Duration::from_secs(30))),
        probe: relay_backend::default_probe(),
        backend_url: config.backend_url.clone(),
        relay_address: Address::from_socket_addr(config.address),
        update_token: relay_crypto::sha256(&config.private_key),
        router_info: router_info.clone(),
        relay_manager: relay_manager.clone(),
        throughput: throughput.clone(),
        session_snapshot: session_snapshot.clone(),
    };

    install_sigterm_handler(should_clean_shutdown.clone());

    let exit_code = backend_loop.run(&should_clean_shutdown, std::thread::sleep);

    should_loop.store(false, Ordering::Relaxed);
    let _ = receive_handle.join();
    let _ = ping_handle.join();

    tracing::info!(exit_code, "relay shutting down");
    std::process::ExitCode::from(exit_code as u8)
}

fn install_sigterm_handler(should_clean_shutdown: Arc<AtomicBool>) {
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, should_clean_shutdown) {
        tracing::warn!(error = %err, "failed to install SIGTERM handler");
    }
}
