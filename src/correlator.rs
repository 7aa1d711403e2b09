//! Short-lived attribution cache.
//!
//! Some world mutations arrive without an actor (a block changed by a
//! mechanism a player just touched). The call site records the player's
//! intent when it happens, and when the mutation follows it looks the
//! position up here to find whom to hold responsible.
//!
//! Entries live for [`INTERACTION_TTL_MS`]. Expired entries are swept on
//! every insert and are never returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cell::BlockPos;
use crate::ids::PlayerId;
use crate::services::Clock;

/// How long an interaction stays attributable, in milliseconds.
pub const INTERACTION_TTL_MS: i64 = 5000;

/// Largest Chebyshev distance, in blocks, for the neighbour fallback.
const NEIGHBOUR_RADIUS: u64 = 1;

/// One recorded intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedInteraction {
    /// Who acted.
    pub actor: PlayerId,
    /// World of the interaction.
    pub world: String,
    /// Block interacted with.
    pub pos: BlockPos,
    /// When, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl CorrelatedInteraction {
    fn expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.timestamp_ms > ttl_ms
    }
}

type PositionKey = (String, BlockPos);

/// TTL cache keyed by exact position, with a per-actor side map for the
/// neighbour fallback.
pub struct InteractionCorrelator {
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
    by_position: Mutex<HashMap<PositionKey, CorrelatedInteraction>>,
    by_actor: Mutex<HashMap<PlayerId, CorrelatedInteraction>>,
}

impl std::fmt::Debug for InteractionCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionCorrelator")
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InteractionCorrelator {
    /// A correlator with the standard TTL.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, INTERACTION_TTL_MS)
    }

    /// A correlator with a custom TTL.
    #[must_use]
    pub fn with_ttl(clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            clock,
            by_position: Mutex::new(HashMap::new()),
            by_actor: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `actor` just interacted with `pos`.
    ///
    /// Replaces any earlier entry for the same position and the actor's
    /// previous entry.
    pub fn record(&self, actor: PlayerId, world: &str, pos: BlockPos) {
        let now = self.clock.now_millis();
        let ttl = self.ttl_ms;
        let entry = CorrelatedInteraction {
            actor,
            world: world.to_string(),
            pos,
            timestamp_ms: now,
        };
        {
            let mut by_position = lock(&self.by_position);
            by_position.retain(|_, e| !e.expired(now, ttl));
            by_position.insert((world.to_string(), pos), entry.clone());
        }
        let mut by_actor = lock(&self.by_actor);
        by_actor.retain(|_, e| !e.expired(now, ttl));
        by_actor.insert(actor, entry);
    }

    /// Who most recently interacted with `pos`, or failing that with a
    /// block next to it.
    #[must_use]
    pub fn lookup(&self, world: &str, pos: BlockPos) -> Option<CorrelatedInteraction> {
        let now = self.clock.now_millis();
        let exact = lock(&self.by_position)
            .get(&(world.to_string(), pos))
            .filter(|e| !e.expired(now, self.ttl_ms))
            .cloned();
        if exact.is_some() {
            return exact;
        }
        lock(&self.by_actor)
            .values()
            .filter(|e| {
                !e.expired(now, self.ttl_ms)
                    && e.world == world
                    && e.pos.chebyshev_distance(pos) <= NEIGHBOUR_RADIUS
            })
            .max_by_key(|e| e.timestamp_ms)
            .cloned()
    }

    /// Take the entry for `pos` so it cannot be attributed twice.
    ///
    /// Actor entries recorded at the same position go too, otherwise the
    /// neighbour fallback would hand the intent straight back.
    pub fn consume(&self, world: &str, pos: BlockPos) -> Option<CorrelatedInteraction> {
        let now = self.clock.now_millis();
        let taken = lock(&self.by_position).remove(&(world.to_string(), pos));
        lock(&self.by_actor).retain(|_, e| !(e.world == world && e.pos == pos));
        taken.filter(|e| !e.expired(now, self.ttl_ms))
    }

    /// Number of live position entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        lock(&self.by_position)
            .values()
            .filter(|e| !e.expired(now, self.ttl_ms))
            .count()
    }

    /// Whether nothing is attributable right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ManualClock;
    use chrono::{NaiveDate, TimeDelta};
    use uuid::Uuid;

    fn correlator() -> (Arc<ManualClock>, InteractionCorrelator) {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        (clock.clone(), InteractionCorrelator::new(clock))
    }

    #[test]
    fn test_ttl_boundary() {
        let (clock, c) = correlator();
        let actor = Uuid::new_v4();
        let pos = BlockPos::new(1, 64, 1);
        c.record(actor, "w", pos);

        clock.advance(TimeDelta::milliseconds(4999));
        assert_eq!(c.lookup("w", pos).unwrap().actor, actor);
        clock.advance(TimeDelta::milliseconds(1));
        assert!(c.lookup("w", pos).is_some());
        clock.advance(TimeDelta::milliseconds(1));
        assert!(c.lookup("w", pos).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_neighbour_fallback_prefers_latest() {
        let (clock, c) = correlator();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        c.record(first, "w", BlockPos::new(0, 64, 0));
        clock.advance(TimeDelta::milliseconds(10));
        c.record(second, "w", BlockPos::new(2, 64, 0));

        let hit = c.lookup("w", BlockPos::new(1, 64, 0)).unwrap();
        assert_eq!(hit.actor, second);
        assert!(c.lookup("w", BlockPos::new(1, 66, 0)).is_none());
        assert!(c.lookup("nether", BlockPos::new(1, 64, 0)).is_none());
    }

    #[test]
    fn test_record_overwrites_and_sweeps() {
        let (clock, c) = correlator();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let pos = BlockPos::new(0, 0, 0);
        c.record(a, "w", pos);
        c.record(b, "w", pos);
        assert_eq!(c.lookup("w", pos).unwrap().actor, b);

        clock.advance(TimeDelta::milliseconds(6000));
        c.record(a, "w", BlockPos::new(50, 0, 50));
        assert_eq!(lock(&c.by_position).len(), 1);
        assert_eq!(lock(&c.by_actor).len(), 1);
    }

    #[test]
    fn test_consume_removes_exact_entry() {
        let (_clock, c) = correlator();
        let actor = Uuid::new_v4();
        let pos = BlockPos::new(3, 3, 3);
        c.record(actor, "w", pos);
        assert_eq!(c.consume("w", pos).unwrap().actor, actor);
        assert!(c.consume("w", pos).is_none());
        assert!(c.lookup("w", pos).is_none());
        assert!(c.lookup("w", BlockPos::new(4, 3, 3)).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_consume_keeps_other_actors() {
        let (clock, c) = correlator();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        c.record(near, "w", BlockPos::new(0, 64, 0));
        clock.advance(TimeDelta::milliseconds(5));
        c.record(far, "w", BlockPos::new(2, 64, 0));

        c.consume("w", BlockPos::new(2, 64, 0));
        let hit = c.lookup("w", BlockPos::new(1, 64, 0)).unwrap();
        assert_eq!(hit.actor, near);
    }
}
