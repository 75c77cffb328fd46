//! Accepts E1.31 frames from the network and drives the mapper.
//!
//! [`Receiver`] owns all runtime state: the fixture registry, the universe
//! cache and the counters. The receive thread is the only writer of the
//! cache and of the fixtures' last-sent values; registry changes from
//! elsewhere go through the same lock.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::config;
use crate::fixture::{Fixture, FixtureSpec};
use crate::host::CommandDispatcher;
use crate::mapper::{Mapper, UniverseCache};
use crate::parser;
use crate::registry::{AddressConflict, FixtureRegistry};

mod udp;
pub use udp::universe_group;

#[derive(Error, Debug)]
pub enum ListenerError {
    /// The port could not be bound or a multicast group could not be joined.
    #[error("unable to bind {target}: {source}")]
    Bind { target: String, source: io::Error },
    #[error("unable to start receive thread: {0}")]
    Spawn(io::Error),
}

/// Counters for observability only.
#[derive(Debug, Default)]
struct Stats {
    packets_received: u64,
    packets_processed: u64,
    packets_dropped: u64,
    last_packet_time: Option<DateTime<Utc>>,
    last_source: Option<String>,
}

/// Receiver status snapshot.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub running: bool,
    pub fixtures: Vec<Fixture>,
    pub fixtures_online: usize,
    pub fixtures_offline: usize,
    pub address_conflicts: usize,
    pub universes_in_use: Vec<u16>,
    /// Every datagram seen, valid or not.
    pub packets_received: u64,
    /// Datagrams that caused at least one dispatch.
    pub packets_processed: u64,
    /// Datagrams that were not valid data frames.
    pub packets_dropped: u64,
    /// Processed over received, in percent.
    pub processing_efficiency: f64,
    pub universes_seen: Vec<u16>,
    pub last_packet_time: Option<DateTime<Utc>>,
    /// Source name of the last valid frame.
    pub last_source: Option<String>,
}

/// State shared between the receiver handle and its thread.
pub(crate) struct Shared {
    running: AtomicBool,
    registry: RwLock<FixtureRegistry>,
    cache: Mutex<UniverseCache>,
    stats: Mutex<Stats>,
    mapper: Mapper,
}

impl Shared {
    fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Shared {
        Shared {
            running: AtomicBool::new(false),
            registry: RwLock::new(FixtureRegistry::new()),
            cache: Mutex::new(UniverseCache::new()),
            stats: Mutex::new(Stats::default()),
            mapper: Mapper::new(dispatcher),
        }
    }

    /// Handle one datagram. Returns the number of fixtures commanded.
    fn process(&self, data: &[u8], now: DateTime<Utc>) -> usize {
        let frame = {
            let mut stats = self.stats.lock();
            stats.packets_received += 1;
            stats.last_packet_time = Some(now);
            match parser::decode(data) {
                Ok(frame) => {
                    if stats.last_source.as_deref() != Some(frame.source_name.as_str()) {
                        stats.last_source = Some(frame.source_name.clone());
                    }
                    frame
                }
                Err(err) => {
                    stats.packets_dropped += 1;
                    trace!("[sacn] Dropped datagram: {}", err);
                    return 0;
                }
            }
        };

        let changed = self
            .cache
            .lock()
            .update(frame.universe, frame.channels, now);
        if !changed {
            // A held look still counts as data reaching the fixtures.
            self.registry.write().touch_universe(frame.universe, now);
            return 0;
        }

        let dispatched = {
            let mut registry = self.registry.write();
            self.mapper
                .on_universe_changed(&mut registry, frame.universe, frame.channels, now)
        };
        if dispatched > 0 {
            self.stats.lock().packets_processed += 1;
        }
        dispatched
    }

    fn expire_stale(&self, now: DateTime<Utc>, timeout: Duration) {
        let timeout = match chrono::Duration::from_std(timeout) {
            Ok(timeout) => timeout,
            Err(_) => return,
        };
        for id in self.registry.write().expire_stale(now, timeout) {
            info!("[sacn] {} went offline", id);
        }
    }
}

/// The E1.31 receiver and its fixture registry.
pub struct Receiver {
    config: config::Receiver,
    shared: Arc<Shared>,
    worker: Mutex<Option<udp::Worker>>,
}

impl Receiver {
    /// Build a stopped receiver. Commands go to `dispatcher`.
    pub fn new(config: config::Receiver, dispatcher: Arc<dyn CommandDispatcher>) -> Receiver {
        Receiver {
            config,
            shared: Arc::new(Shared::new(dispatcher)),
            worker: Mutex::new(None),
        }
    }

    /// Bind the socket, join the multicast groups and start receiving.
    /// Does nothing if already running.
    pub fn start(&self) -> Result<(), ListenerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let mut universes: BTreeSet<u16> = self.config.universes.iter().copied().collect();
        universes.extend(self.shared.registry.read().universes());

        let (socket, interface, joined) = udp::bind(&self.config, &universes)?;

        self.shared.running.store(true, Ordering::SeqCst);
        match udp::start_udp_thread(socket, interface, joined, self.shared.clone(), &self.config)
        {
            Ok(started) => {
                *worker = Some(started);
                info!("[sacn] Receiver started");
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Stop receiving and close the socket. Safe to call repeatedly.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = worker {
            worker.shutdown(self.config.stop_timeout());
            info!("[sacn] Receiver stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Address the socket is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.lock().as_ref().and_then(|w| w.local_addr())
    }

    /// Feed one raw datagram through the receive path, as the receive thread
    /// does. Returns the number of fixtures commanded.
    pub fn process_datagram(&self, data: &[u8]) -> usize {
        self.shared.process(data, Utc::now())
    }

    /// Register a fixture, replacing one with the same id.
    pub fn add_fixture(&self, spec: FixtureSpec) -> bool {
        let universe = spec.universe;
        let fixture = Fixture::from_spec(spec);
        let (start, end) = fixture.channel_range();
        info!(
            "[sacn] Added {} at {} (universe {}, channels {}-{})",
            fixture.id, fixture.address, universe, start, end
        );
        let added = self.shared.registry.write().add(fixture);

        if let Some(worker) = self.worker.lock().as_mut() {
            worker.join_universe(universe);
        }
        added
    }

    pub fn remove_fixture(&self, id: &str) -> bool {
        let removed = self.shared.registry.write().remove(id);
        if removed {
            info!("[sacn] Removed {}", id);
        }
        removed
    }

    /// Snapshot of all fixtures, ordered by id.
    pub fn fixtures(&self) -> Vec<Fixture> {
        self.shared.registry.read().iter().cloned().collect()
    }

    pub fn find_conflicts(&self) -> Vec<AddressConflict> {
        let conflicts = self.shared.registry.read().find_conflicts();
        for conflict in &conflicts {
            warn!(
                "[sacn] Address conflict in universe {}: {} vs {}",
                conflict.universe, conflict.first.id, conflict.second.id
            );
        }
        conflicts
    }

    pub fn suggest_address(&self, universe: u16, led_count: u16) -> u16 {
        self.shared
            .registry
            .read()
            .suggest_address(universe, led_count)
    }

    /// Last stored channel data for a universe.
    pub fn universe_data(&self, universe: u16) -> Option<Vec<u8>> {
        self.shared
            .cache
            .lock()
            .get(universe)
            .map(|entry| entry.channels.clone())
    }

    pub fn status(&self) -> Status {
        let (fixtures, fixtures_online, address_conflicts, universes_in_use) = {
            let registry = self.shared.registry.read();
            (
                registry.iter().cloned().collect::<Vec<_>>(),
                registry.online_count(),
                registry.find_conflicts().len(),
                registry.universes().into_iter().collect(),
            )
        };
        let universes_seen = self.shared.cache.lock().universes();
        let stats = self.shared.stats.lock();

        let processing_efficiency = if stats.packets_received > 0 {
            stats.packets_processed as f64 / stats.packets_received as f64 * 100.0
        } else {
            0.0
        };

        Status {
            running: self.is_running(),
            fixtures_offline: fixtures.len() - fixtures_online,
            fixtures,
            fixtures_online,
            address_conflicts,
            universes_in_use,
            packets_received: stats.packets_received,
            packets_processed: stats.packets_processed,
            packets_dropped: stats.packets_dropped,
            processing_efficiency,
            universes_seen,
            last_packet_time: stats.last_packet_time,
            last_source: stats.last_source.clone(),
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}
