//! Registered fixtures and their DMX addressing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::fixture::{Fixture, UNIVERSE_SIZE};

/// Gap in channels left between the last fixture and a suggested address.
const ADDRESS_GAP: usize = 4;

/// Two fixtures in one universe whose channel ranges overlap.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressConflict {
    pub universe: u16,
    pub first: Fixture,
    pub second: Fixture,
}

/// Fixtures keyed by id.
#[derive(Debug, Default)]
pub struct FixtureRegistry {
    fixtures: BTreeMap<String, Fixture>,
}

impl FixtureRegistry {
    pub fn new() -> FixtureRegistry {
        FixtureRegistry::default()
    }

    /// Insert a fixture, replacing any fixture with the same id. Always
    /// succeeds.
    pub fn add(&mut self, fixture: Fixture) -> bool {
        self.fixtures.insert(fixture.id.clone(), fixture);
        true
    }

    /// Returns true if the fixture was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.fixtures.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&Fixture> {
        self.fixtures.get(id)
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    /// All fixtures, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.values()
    }

    pub fn by_universe(&self, universe: u16) -> Vec<&Fixture> {
        self.iter().filter(|f| f.universe == universe).collect()
    }

    pub fn by_universe_mut(&mut self, universe: u16) -> impl Iterator<Item = &mut Fixture> {
        self.fixtures
            .values_mut()
            .filter(move |f| f.universe == universe)
    }

    /// Stamp every fixture on `universe` as having received data. Returns the
    /// number of fixtures touched.
    pub fn touch_universe(&mut self, universe: u16, now: DateTime<Utc>) -> usize {
        let mut touched = 0;
        for fixture in self.by_universe_mut(universe) {
            fixture.touch(now);
            touched += 1;
        }
        touched
    }

    /// Distinct universes with at least one fixture, ascending.
    pub fn universes(&self) -> BTreeSet<u16> {
        self.iter().map(|f| f.universe).collect()
    }

    /// Every pair of fixtures sharing channels within a universe. Conflicts
    /// are reported, never resolved.
    pub fn find_conflicts(&self) -> Vec<AddressConflict> {
        let mut conflicts = vec![];
        for universe in self.universes() {
            let fixtures = self.by_universe(universe);
            for (i, first) in fixtures.iter().enumerate() {
                for second in &fixtures[i + 1..] {
                    if first.overlaps(second) {
                        conflicts.push(AddressConflict {
                            universe,
                            first: (*first).clone(),
                            second: (*second).clone(),
                        });
                    }
                }
            }
        }
        conflicts
    }

    /// Suggest a start channel for a new fixture of `led_count` LEDs.
    ///
    /// Returns 1 for an empty universe, and also when the fixture would not
    /// fit after the last one; the caller should then use a new universe.
    pub fn suggest_address(&self, universe: u16, led_count: u16) -> u16 {
        let last_end = self
            .by_universe(universe)
            .iter()
            .map(|f| f.channel_range().1)
            .max();

        let last_end = match last_end {
            Some(end) => end,
            None => return 1,
        };

        let suggested = last_end + ADDRESS_GAP;
        if suggested + led_count as usize * 3 - 1 <= UNIVERSE_SIZE {
            suggested as u16
        } else {
            1
        }
    }

    /// Mark fixtures that have not received protocol data within `timeout`
    /// as offline. Returns the ids that went offline.
    pub fn expire_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let mut expired = vec![];
        for fixture in self.fixtures.values_mut() {
            if !fixture.online {
                continue;
            }
            let stale = match fixture.last_seen_at {
                Some(seen) => now - seen > timeout,
                None => true,
            };
            if stale {
                fixture.online = false;
                expired.push(fixture.id.clone());
            }
        }
        expired
    }

    pub fn online_count(&self) -> usize {
        self.iter().filter(|f| f.online).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureKind, FixtureSpec};

    fn fixture(id: &str, universe: u16, start_channel: u16, led_count: u16) -> Fixture {
        Fixture::from_spec(FixtureSpec {
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            kind: FixtureKind::Array,
            universe,
            start_channel,
            led_count,
        })
    }

    #[test]
    fn add_replaces_by_id() {
        let mut registry = FixtureRegistry::new();
        assert!(registry.add(fixture("a", 1, 1, 3)));
        assert!(registry.add(fixture("a", 2, 40, 3)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().universe, 2);
    }

    #[test]
    fn remove_reports_presence() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3));
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn by_universe_filters() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3));
        registry.add(fixture("b", 2, 1, 3));
        registry.add(fixture("c", 1, 20, 3));
        let ids: Vec<&str> = registry.by_universe(1).iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn overlapping_ranges_conflict() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3)); // [1, 9]
        registry.add(fixture("b", 1, 7, 3)); // [7, 15]
        let conflicts = registry.find_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].universe, 1);
        assert_eq!(conflicts[0].first.id, "a");
        assert_eq!(conflicts[0].second.id, "b");
    }

    #[test]
    fn adjacent_ranges_do_not_conflict() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3)); // [1, 9]
        registry.add(fixture("b", 1, 10, 3)); // [10, 18]
        assert!(registry.find_conflicts().is_empty());
    }

    #[test]
    fn same_channels_in_other_universe_do_not_conflict() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3));
        registry.add(fixture("b", 2, 1, 3));
        assert!(registry.find_conflicts().is_empty());
    }

    #[test]
    fn suggests_first_channel_for_empty_universe() {
        let registry = FixtureRegistry::new();
        assert_eq!(registry.suggest_address(1, 3), 1);
    }

    #[test]
    fn suggests_after_last_fixture_with_gap() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 1, 3)); // [1, 9]
        assert_eq!(registry.suggest_address(1, 3), 13);
        // Other universes are untouched.
        assert_eq!(registry.suggest_address(2, 3), 1);
    }

    #[test]
    fn suggests_new_universe_when_full() {
        let mut registry = FixtureRegistry::new();
        registry.add(fixture("a", 1, 490, 3)); // [490, 498]
        // 502 + 15 - 1 > 512
        assert_eq!(registry.suggest_address(1, 5), 1);
        // 502 + 9 - 1 fits exactly under the limit
        assert_eq!(registry.suggest_address(1, 3), 502);
    }

    #[test]
    fn expire_stale_marks_offline() {
        let mut registry = FixtureRegistry::new();
        let now = Utc::now();
        let mut fresh = fixture("fresh", 1, 1, 1);
        fresh.touch(now);
        let mut old = fixture("old", 1, 4, 1);
        old.touch(now - Duration::seconds(60));
        registry.add(fresh);
        registry.add(old);

        let expired = registry.expire_stale(now, Duration::seconds(30));
        assert_eq!(expired, vec!["old".to_string()]);
        assert_eq!(registry.online_count(), 1);
        assert!(!registry.get("old").unwrap().online);
    }

    #[test]
    fn touch_universe_keeps_fixtures_online() {
        let mut registry = FixtureRegistry::new();
        let start = Utc::now();
        registry.add(fixture("mine", 1, 1, 1));
        registry.add(fixture("other", 2, 1, 1));

        for secs in 0..=40 {
            assert_eq!(registry.touch_universe(1, start + Duration::seconds(secs)), 1);
        }
        let expired = registry.expire_stale(start + Duration::seconds(40), Duration::seconds(30));
        assert!(expired.is_empty());
        assert!(registry.get("mine").unwrap().online);
        assert!(!registry.get("other").unwrap().online);
    }
}
