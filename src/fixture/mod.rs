//! Fixtures driven by the mapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of DMX channels in a universe.
pub const UNIVERSE_SIZE: usize = 512;

/// One RGB triplet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// True if any component is lit.
    pub fn is_lit(&self) -> bool {
        self.r > 0 || self.g > 0 || self.b > 0
    }

    /// Read a triplet at a 0-based channel offset. A triplet not fully
    /// inside `channels` reads as black.
    pub fn read(channels: &[u8], offset: usize) -> Rgb {
        match channels.get(offset..offset + 3) {
            Some(&[r, g, b]) => Rgb::new(r, g, b),
            _ => Rgb::BLACK,
        }
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Rgb {
        Rgb::new(r, g, b)
    }
}

/// The two fixture classes, as named in configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FixtureKind {
    /// One RGB value shared by the onboard indicator and the accessory strip.
    Simple,
    /// Independently addressed RGB LEDs.
    Array,
}

/// Everything needed to register a fixture.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSpec {
    /// Stable unique identifier.
    pub id: String,
    /// IP address or hostname for point-to-point commands.
    pub address: String,
    pub kind: FixtureKind,
    /// Universe the fixture listens on, 1 or higher.
    pub universe: u16,
    /// 1-based DMX channel where the fixture's data begins.
    pub start_channel: u16,
    /// Number of RGB triplets occupied.
    pub led_count: u16,
}

/// Per-kind state: what this engine last dispatched.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Layout {
    Simple {
        #[serde(rename = "lastSent")]
        last_sent: Option<Rgb>,
    },
    Array {
        #[serde(rename = "lastSent")]
        last_sent: Option<Vec<Rgb>>,
    },
}

/// A registered fixture and its runtime state.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub id: String,
    pub address: String,
    pub universe: u16,
    pub start_channel: u16,
    pub led_count: u16,
    /// Set whenever protocol data is routed to the fixture.
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub layout: Layout,
}

impl Fixture {
    pub fn from_spec(spec: FixtureSpec) -> Fixture {
        let layout = match spec.kind {
            FixtureKind::Simple => Layout::Simple { last_sent: None },
            FixtureKind::Array => Layout::Array { last_sent: None },
        };
        Fixture {
            id: spec.id,
            address: spec.address,
            universe: spec.universe,
            start_channel: spec.start_channel,
            led_count: spec.led_count,
            online: false,
            last_seen_at: None,
            layout,
        }
    }

    pub fn kind(&self) -> FixtureKind {
        match self.layout {
            Layout::Simple { .. } => FixtureKind::Simple,
            Layout::Array { .. } => FixtureKind::Array,
        }
    }

    /// 0-based channel offset of the fixture's first byte.
    pub fn offset(&self) -> usize {
        (self.start_channel as usize).saturating_sub(1)
    }

    /// Inclusive 1-based channel range `[start, end]` occupied by the fixture.
    pub fn channel_range(&self) -> (usize, usize) {
        let start = self.start_channel as usize;
        let span = self.led_count as usize * 3;
        (start, (start + span).saturating_sub(1))
    }

    /// True if both fixtures share a universe and at least one channel.
    pub fn overlaps(&self, other: &Fixture) -> bool {
        if self.universe != other.universe {
            return false;
        }
        let (a_start, a_end) = self.channel_range();
        let (b_start, b_end) = other.channel_range();
        !(a_end < b_start || b_end < a_start)
    }

    /// Record that protocol data was routed here.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.online = true;
        self.last_seen_at = Some(now);
    }
}
