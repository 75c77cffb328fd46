//! The Mapper turns universe frames into fixture commands.
//!
//! A fixture is only driven when its slice of the universe changed and the
//! change is meaningful: something is lit now, or something was lit before
//! and is being switched off. An idle console streams all-zero frames
//! forever; those must not fight commands sent to the fixture directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::fixture::{Fixture, Layout, Rgb};
use crate::host::{CommandDispatcher, Target};
use crate::registry::FixtureRegistry;

pub mod universe;
pub use universe::UniverseCache;

/// A command the mapper decided to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureCommand {
    /// Indicator and strip set to the same color.
    Uniform(Rgb),
    /// One color per LED.
    Array(Vec<Rgb>),
}

/// Maps universe frames onto fixtures and issues commands to a dispatcher.
pub struct Mapper {
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl Mapper {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Mapper {
        Mapper { dispatcher }
    }

    /// Drive every fixture on `universe` from a changed frame. Returns the
    /// number of fixtures that were sent a command.
    pub fn on_universe_changed(
        &self,
        registry: &mut FixtureRegistry,
        universe: u16,
        channels: &[u8],
        now: DateTime<Utc>,
    ) -> usize {
        let mut dispatched = 0;
        for fixture in registry.by_universe_mut(universe) {
            fixture.touch(now);
            if let Some(cmd) = map_fixture(fixture, channels) {
                self.dispatch(fixture, &cmd);
                dispatched += 1;
            }
        }
        dispatched
    }

    fn dispatch(&self, fixture: &Fixture, cmd: &FixtureCommand) {
        let target = Target {
            id: &fixture.id,
            address: &fixture.address,
        };
        match cmd {
            FixtureCommand::Uniform(color) => {
                debug!(
                    "[mapper] {} <- R:{} G:{} B:{}",
                    fixture.id, color.r, color.g, color.b
                );
                self.dispatcher.set_indicator_color(target, *color);
                self.dispatcher.set_strip_color(target, *color);
            }
            FixtureCommand::Array(leds) => {
                debug!("[mapper] {} <- {} LEDs", fixture.id, leds.len());
                self.dispatcher.set_led_array(target, leds);
            }
        }
    }
}

/// Compute the fixture's new values from a frame and update its last-sent
/// state. Returns the command to send, if any.
///
/// The last-sent state is updated even when nothing is sent, so that a
/// repeated frame never triggers later.
pub fn map_fixture(fixture: &mut Fixture, channels: &[u8]) -> Option<FixtureCommand> {
    let offset = fixture.offset();
    let led_count = fixture.led_count as usize;

    let cmd = match &mut fixture.layout {
        Layout::Simple { last_sent } => {
            let current = Rgb::read(channels, offset);
            let had_active = last_sent.map_or(false, |c| c.is_lit());
            let meaningful = current.is_lit() || had_active;
            let changed = *last_sent != Some(current);
            *last_sent = Some(current);

            if meaningful && changed {
                Some(FixtureCommand::Uniform(current))
            } else {
                None
            }
        }
        Layout::Array { last_sent } => {
            let current: Vec<Rgb> = (0..led_count)
                .map(|i| Rgb::read(channels, offset + i * 3))
                .collect();
            let has_active = current.iter().any(Rgb::is_lit);
            let had_active = last_sent
                .as_ref()
                .map_or(false, |leds| leds.iter().any(Rgb::is_lit));
            let meaningful = has_active || had_active;
            let changed = last_sent.as_ref() != Some(&current);

            let cmd = if meaningful && changed {
                Some(FixtureCommand::Array(current.clone()))
            } else {
                None
            };
            *last_sent = Some(current);
            cmd
        }
    };

    if cmd.is_none() {
        trace!("[mapper] {} skipped", fixture.id);
    }
    cmd
}
