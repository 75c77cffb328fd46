//! Last frame seen per universe, for change detection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Only this many leading channels are compared between frames. Consoles
/// resend unchanged frames at 30-44 Hz; comparing a prefix keeps that cheap.
/// Fixtures addressed entirely past this point are not redriven while the
/// prefix holds still.
pub const COMPARE_CHANNELS: usize = 50;

#[derive(Debug, Clone)]
pub struct UniverseEntry {
    /// Channel data as last stored, DMX channel 1 at index 0.
    pub channels: Vec<u8>,
    /// Last time any frame arrived for this universe.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct UniverseCache {
    entries: HashMap<u16, UniverseEntry>,
}

impl UniverseCache {
    pub fn new() -> UniverseCache {
        UniverseCache::default()
    }

    /// Store a frame and report whether it differs from the last one.
    ///
    /// A frame whose first 50 channels match the stored ones is treated as
    /// unchanged and its trailing channels are not stored.
    pub fn update(&mut self, universe: u16, channels: &[u8], now: DateTime<Utc>) -> bool {
        if let Some(entry) = self.entries.get_mut(&universe) {
            entry.updated_at = now;
            if prefix(&entry.channels) == prefix(channels) {
                return false;
            }
            entry.channels.clear();
            entry.channels.extend_from_slice(channels);
            return true;
        }

        self.entries.insert(
            universe,
            UniverseEntry {
                channels: channels.to_vec(),
                updated_at: now,
            },
        );
        true
    }

    pub fn get(&self, universe: u16) -> Option<&UniverseEntry> {
        self.entries.get(&universe)
    }

    /// Universes seen so far, ascending.
    pub fn universes(&self) -> Vec<u16> {
        let mut universes: Vec<u16> = self.entries.keys().copied().collect();
        universes.sort_unstable();
        universes
    }
}

fn prefix(channels: &[u8]) -> &[u8] {
    &channels[..channels.len().min(COMPARE_CHANNELS)]
}
