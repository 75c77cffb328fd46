//! E1.31 socket and receive thread.

use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::{ListenerError, Shared};
use crate::config;

/// Largest E1.31 datagram we care about.
const MAX_PACKET_SIZE: usize = 1144;

/// How often fixture liveness is re-evaluated.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// The multicast group a universe is sent to: 239.255.<hi>.<lo>.
pub fn universe_group(universe: u16) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

/// A running receive thread and the socket it reads.
pub(super) struct Worker {
    socket: Arc<UdpSocket>,
    handle: JoinHandle<()>,
    /// Set to make this worker's thread leave its loop.
    stop: Arc<AtomicBool>,
    /// Signalled when the thread leaves its loop.
    done: channel::Receiver<()>,
    /// Interface for multicast membership, if joining at all.
    interface: Option<Ipv4Addr>,
    joined: BTreeSet<Ipv4Addr>,
}

impl Worker {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Join a universe's multicast group if not already a member.
    pub fn join_universe(&mut self, universe: u16) {
        let interface = match self.interface {
            Some(interface) => interface,
            None => return,
        };
        let group = universe_group(universe);
        if self.joined.contains(&group) {
            return;
        }
        match self.socket.join_multicast_v4(&group, &interface) {
            Ok(()) => {
                debug!("[sacn] Joined {}", group);
                self.joined.insert(group);
            }
            Err(err) => warn!("[sacn] Unable to join {}: {}", group, err),
        }
    }

    /// Stop the thread and wait up to `timeout` for it to finish. A thread
    /// that does not finish in time is detached; it exits and releases the
    /// socket after its current read, even if a new worker was started.
    pub fn shutdown(self, timeout: Duration) {
        self.stop.store(true, Ordering::SeqCst);
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("[sacn] Receive thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("[sacn] Receive thread did not stop within {:?}", timeout);
            }
        }
    }
}

/// Bind the E1.31 socket and join the base group plus each universe's group.
pub(super) fn bind(
    config: &config::Receiver,
    universes: &BTreeSet<u16>,
) -> Result<(UdpSocket, Option<Ipv4Addr>, BTreeSet<Ipv4Addr>), ListenerError> {
    let bind_error = |target: &str| {
        let target = target.to_string();
        move |source| ListenerError::Bind { target, source }
    };

    let socket =
        UdpSocket::bind(&config.bind_addr).map_err(bind_error(config.bind_addr.as_str()))?;
    socket
        .set_read_timeout(Some(config.read_timeout()))
        .map_err(bind_error(config.bind_addr.as_str()))?;

    let mut joined = BTreeSet::new();
    if !config.join_multicast {
        return Ok((socket, None, joined));
    }

    let interface: Ipv4Addr = config.interface.parse().map_err(|_| ListenerError::Bind {
        target: config.interface.clone(),
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;

    let groups = std::iter::once(universe_group(0))
        .chain(universes.iter().map(|u| universe_group(*u)));
    for group in groups {
        if joined.contains(&group) {
            continue;
        }
        socket
            .join_multicast_v4(&group, &interface)
            .map_err(bind_error(group.to_string().as_str()))?;
        joined.insert(group);
    }

    Ok((socket, Some(interface), joined))
}

/// Start a thread that reads datagrams and feeds them to the shared state
/// until the worker is shut down.
pub(super) fn start_udp_thread(
    socket: UdpSocket,
    interface: Option<Ipv4Addr>,
    joined: BTreeSet<Ipv4Addr>,
    shared: Arc<Shared>,
    config: &config::Receiver,
) -> Result<Worker, ListenerError> {
    let socket = Arc::new(socket);
    let (done_tx, done) = channel::bounded::<()>(1);
    let stop = Arc::new(AtomicBool::new(false));
    let fixture_timeout = config.fixture_timeout();
    let read_timeout = config.read_timeout();

    if let Ok(addr) = socket.local_addr() {
        info!("[sacn] Listening for E1.31 at {}", addr);
    }

    let thread_socket = socket.clone();
    let thread_stop = stop.clone();
    let handle = thread::Builder::new()
        .name("sacn-receiver".to_string())
        .spawn(move || {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            let mut last_housekeeping = Instant::now();

            while !thread_stop.load(Ordering::SeqCst) {
                match thread_socket.recv_from(&mut buf) {
                    Ok((len, _source)) => {
                        shared.process(&buf[..len], Utc::now());
                    }
                    Err(err)
                        if err.kind() == io::ErrorKind::WouldBlock
                            || err.kind() == io::ErrorKind::TimedOut => {}
                    Err(err) => {
                        if !thread_stop.load(Ordering::SeqCst) {
                            warn!("[sacn] Receive error: {}", err);
                            thread::sleep(read_timeout);
                        }
                    }
                }

                if last_housekeeping.elapsed() >= HOUSEKEEPING_INTERVAL {
                    shared.expire_stale(Utc::now(), fixture_timeout);
                    last_housekeeping = Instant::now();
                }
            }

            debug!("[sacn] Receive thread exiting");
            let _ = done_tx.send(());
        })
        .map_err(ListenerError::Spawn)?;

    Ok(Worker {
        socket,
        handle,
        stop,
        done,
        interface,
        joined,
    })
}
