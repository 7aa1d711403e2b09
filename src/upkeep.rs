//! Daily upkeep collection.
//!
//! Once a day, at the configured hour, every town is charged
//! `townUpkeepBase + townUpkeepPerClaim × cells`. A town that cannot pay
//! goes into debt and accumulates missed days; after [`GRACE_PERIOD`]
//! consecutive misses it is dissolved and its land released.
//!
//! The scheduler is driven by [`UpkeepScheduler::tick`], which the host can
//! call from its own timer or leave to [`UpkeepScheduler::spawn`].

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::claims::ClaimIndex;
use crate::config::Config;
use crate::error::{StorageError, TownError};
use crate::ids::{ClaimOwner, TownId};
use crate::services::{Clock, Notifier};
use crate::storage::{Storage, UPKEEP_FILE};
use crate::town::{Town, TownRegistry, UpkeepCharge};

/// Consecutive unpaid days after which a town is dissolved.
pub const GRACE_PERIOD: u32 = 15;

/// How often the background thread checks whether upkeep is due.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Where a town stands with its upkeep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpkeepState {
    /// Nothing owed.
    Current,
    /// This many consecutive days unpaid.
    Overdue(u32),
    /// Dissolved for non-payment.
    Dissolved,
}

impl UpkeepState {
    /// State for a missed-day counter.
    #[must_use]
    pub const fn from_missed(days: u32) -> Self {
        match days {
            0 => UpkeepState::Current,
            d if d >= GRACE_PERIOD => UpkeepState::Dissolved,
            d => UpkeepState::Overdue(d),
        }
    }

    /// State of a live town.
    #[must_use]
    pub const fn of(town: &Town) -> Self {
        Self::from_missed(town.missed_upkeep_days)
    }
}

/// What happened to one town during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct UpkeepOutcome {
    /// The town.
    pub town: TownId,
    /// Its name at the time.
    pub name: String,
    /// Amount charged.
    pub owed: f64,
    /// Balance afterwards.
    pub balance: f64,
    /// Resulting state.
    pub state: UpkeepState,
}

/// Summary of one upkeep run.
#[derive(Debug, Clone, PartialEq)]
pub struct UpkeepReport {
    /// Calendar day the run counts for.
    pub date: NaiveDate,
    /// Snapshot taken before charging.
    pub snapshot: PathBuf,
    /// Per-town results, in town id order.
    pub outcomes: Vec<UpkeepOutcome>,
}

impl UpkeepReport {
    /// Names of the towns dissolved in this run.
    #[must_use]
    pub fn dissolved(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.state == UpkeepState::Dissolved)
            .map(|o| o.name.as_str())
            .collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpkeepRecord {
    last_run: Option<NaiveDate>,
}

/// The daily upkeep process.
pub struct UpkeepScheduler {
    config: Config,
    storage: Storage,
    towns: Arc<TownRegistry>,
    claims: Arc<ClaimIndex>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    territory_gate: Arc<Mutex<()>>,
    last_run: Mutex<Option<NaiveDate>>,
}

impl std::fmt::Debug for UpkeepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpkeepScheduler")
            .field("last_run", &self.last_run())
            .finish_non_exhaustive()
    }
}

impl UpkeepScheduler {
    /// Create a scheduler, restoring the last run date from `upkeep.json`.
    ///
    /// `territory_gate` is the lock that serializes territory changes
    /// across the registry and the claim index; dissolution holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if `upkeep.json` exists but cannot be read.
    pub fn new(
        config: Config,
        storage: Storage,
        towns: Arc<TownRegistry>,
        claims: Arc<ClaimIndex>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        territory_gate: Arc<Mutex<()>>,
    ) -> Result<Self, StorageError> {
        let record: UpkeepRecord = storage.load_document(UPKEEP_FILE)?;
        Ok(Self {
            config,
            storage,
            towns,
            claims,
            notifier,
            clock,
            territory_gate,
            last_run: Mutex::new(record.last_run),
        })
    }

    /// Day of the last completed run.
    #[must_use]
    pub fn last_run(&self) -> Option<NaiveDate> {
        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run upkeep if it is due: at or past the upkeep hour, and not yet run
    /// today.
    ///
    /// A run starts with a snapshot. If the snapshot cannot be written
    /// nothing is charged and the day stays open for the next tick.
    pub fn tick(&self) -> Option<UpkeepReport> {
        let now = self.clock.now();
        if now.hour() < self.config.town_upkeep_hour {
            return None;
        }
        let today = now.date();
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(today) {
            return None;
        }
        let snapshot = match self.storage.snapshot(today) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(%today, "upkeep postponed, snapshot failed: {e}");
                return None;
            }
        };
        *last = Some(today);
        drop(last);
        self.persist_last_run(today);
        Some(self.collect(today, snapshot))
    }

    /// Run upkeep now, whatever the hour and whether it already ran today.
    ///
    /// # Errors
    ///
    /// Returns an error, and charges nothing, if the snapshot fails.
    pub fn run_now(&self) -> Result<UpkeepReport, StorageError> {
        let today = self.clock.now().date();
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.storage.snapshot(today)?;
        *last = Some(today);
        drop(last);
        self.persist_last_run(today);
        Ok(self.collect(today, snapshot))
    }

    fn persist_last_run(&self, date: NaiveDate) {
        let record = UpkeepRecord {
            last_run: Some(date),
        };
        if let Err(e) = self.storage.save_document(UPKEEP_FILE, &record) {
            tracing::error!("cannot persist upkeep run date: {e}");
        }
    }

    fn collect(&self, date: NaiveDate, snapshot: PathBuf) -> UpkeepReport {
        tracing::info!(%date, towns = self.towns.len(), "collecting town upkeep");
        let mut outcomes = Vec::new();
        for id in self.towns.ids() {
            let charge = match self.towns.apply_upkeep(id, &self.config) {
                Ok(charge) => charge,
                Err(TownError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::error!(town = %id, "upkeep not applied: {e}");
                    continue;
                }
            };
            let state = self.settle(&charge);
            outcomes.push(UpkeepOutcome {
                town: charge.town,
                name: charge.name,
                owed: charge.owed,
                balance: charge.balance,
                state,
            });
        }

        let report = UpkeepReport {
            date,
            snapshot,
            outcomes,
        };
        tracing::info!(
            %date,
            charged = report.outcomes.len(),
            dissolved = report.dissolved().len(),
            "upkeep finished"
        );
        report
    }

    /// Notify and, past the grace period, dissolve.
    fn settle(&self, charge: &UpkeepCharge) -> UpkeepState {
        if charge.paid {
            self.notifier.notify(
                charge.leader,
                &format!(
                    "{} paid {:.2} in upkeep. Balance: {:.2}",
                    charge.name, charge.owed, charge.balance
                ),
            );
            return UpkeepState::Current;
        }

        if charge.missed_days < GRACE_PERIOD {
            let left = GRACE_PERIOD - charge.missed_days;
            let message = format!(
                "{} could not pay {:.2} in upkeep (balance {:.2}). \
                 {left} day(s) until the town is dissolved.",
                charge.name, charge.owed, charge.balance
            );
            for member in &charge.members {
                if *member == charge.leader || self.notifier.is_online(*member) {
                    self.notifier.notify(*member, &message);
                }
            }
            tracing::warn!(town = %charge.name, missed = charge.missed_days, "upkeep unpaid");
            return UpkeepState::Overdue(charge.missed_days);
        }

        let message = format!(
            "{} has been dissolved after {} days of unpaid upkeep.",
            charge.name, charge.missed_days
        );
        for member in &charge.members {
            self.notifier.notify(*member, &message);
        }
        let _gate = self
            .territory_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.towns.dissolve(charge.town) {
            Ok(_) => {
                let released = self.claims.release_owner(ClaimOwner::Town(charge.town));
                tracing::info!(
                    town = %charge.name,
                    cells = released.len(),
                    "town dissolved for unpaid upkeep"
                );
                UpkeepState::Dissolved
            }
            Err(e) => {
                tracing::error!(town = %charge.name, "dissolution failed, will retry: {e}");
                UpkeepState::Overdue(charge.missed_days)
            }
        }
    }

    /// Run [`UpkeepScheduler::tick`] every `interval` on a background
    /// thread until the handle is shut down or dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> std::io::Result<UpkeepHandle> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("landclaim-upkeep".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.tick();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("upkeep thread stopped");
            })?;
        Ok(UpkeepHandle {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

/// Handle on the background upkeep thread.
#[derive(Debug)]
pub struct UpkeepHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl UpkeepHandle {
    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop) = self.stop.take() {
            // A closed channel means the thread already exited.
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("upkeep thread panicked");
            }
        }
    }
}

impl Drop for UpkeepHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKey;
    use crate::services::{ManualClock, RecordingMapSink, RecordingNotifier};
    use chrono::{NaiveDateTime, TimeDelta};
    use tempfile::{TempDir, tempdir};
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<ManualClock>,
        towns: Arc<TownRegistry>,
        claims: Arc<ClaimIndex>,
        notifier: Arc<RecordingNotifier>,
        sink: Arc<RecordingMapSink>,
        storage: Storage,
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let clock = Arc::new(ManualClock::new(at(1, 8)));
        let sink = Arc::new(RecordingMapSink::new());
        Fixture {
            towns: Arc::new(TownRegistry::open(storage.clone(), clock.clone()).unwrap()),
            claims: Arc::new(ClaimIndex::in_memory(sink.clone())),
            notifier: Arc::new(RecordingNotifier::new()),
            sink,
            clock,
            storage,
            _dir: dir,
        }
    }

    fn scheduler(f: &Fixture) -> UpkeepScheduler {
        UpkeepScheduler::new(
            Config::default(),
            f.storage.clone(),
            f.towns.clone(),
            f.claims.clone(),
            f.notifier.clone(),
            f.clock.clone(),
            Arc::new(Mutex::new(())),
        )
        .unwrap()
    }

    /// A town with three cells mirrored into the claim index.
    fn three_cell_town(f: &Fixture) -> (TownId, Uuid) {
        let leader = Uuid::new_v4();
        let town = f.towns.create("Alpha", leader, "Ann").unwrap();
        for x in 0..3 {
            let cell = CellKey::new("w", x, 0);
            f.towns.claim_cell("Alpha", leader, &cell, 10, 0.0).unwrap();
            f.claims.assign_town_cell(town.id, &cell, 0).unwrap();
        }
        (town.id, leader)
    }

    #[test]
    fn test_state_from_missed() {
        assert_eq!(UpkeepState::from_missed(0), UpkeepState::Current);
        assert_eq!(UpkeepState::from_missed(14), UpkeepState::Overdue(14));
        assert_eq!(UpkeepState::from_missed(15), UpkeepState::Dissolved);
    }

    #[test]
    fn test_tick_waits_for_hour_and_runs_once() {
        let f = fixture();
        let (_, leader) = three_cell_town(&f);
        f.towns.deposit("Alpha", leader, 1000.0).unwrap();
        let s = scheduler(&f);

        assert!(s.tick().is_none());
        f.clock.set(at(1, 12));
        let report = s.tick().unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert!((report.outcomes[0].owed - 250.0).abs() < f64::EPSILON);
        assert!((report.outcomes[0].balance - 750.0).abs() < f64::EPSILON);
        assert_eq!(report.outcomes[0].state, UpkeepState::Current);
        assert!(report.snapshot.join("towns").join("alpha.json").exists());
        assert_eq!(f.notifier.messages_for(leader).len(), 1);

        f.clock.set(at(1, 23));
        assert!(s.tick().is_none());

        // A restart on the same day stays quiet.
        let restarted = scheduler(&f);
        assert!(restarted.tick().is_none());

        f.clock.set(at(2, 13));
        assert!(restarted.tick().is_some());
    }

    #[test]
    fn test_failed_snapshot_postpones_charging() {
        let f = fixture();
        let (_, leader) = three_cell_town(&f);
        f.towns.deposit("Alpha", leader, 1000.0).unwrap();
        let s = scheduler(&f);
        // A file where today's snapshot directory should go.
        let blocker = f.storage.root().join("backups").join("2024-03-01");
        std::fs::write(&blocker, b"").unwrap();

        f.clock.set(at(1, 12));
        assert!(s.tick().is_none());
        assert!(s.run_now().is_err());
        assert_eq!(s.last_run(), None);
        let town = f.towns.get("Alpha").unwrap();
        assert!((town.balance - 1000.0).abs() < f64::EPSILON);
        assert!(town.last_upkeep_at.is_none());

        std::fs::remove_file(&blocker).unwrap();
        let report = s.tick().unwrap();
        assert!((report.outcomes[0].balance - 750.0).abs() < f64::EPSILON);
        assert_eq!(s.last_run(), Some(at(1, 12).date()));
    }

    #[test]
    fn test_unpaid_notifies_online_members() {
        let f = fixture();
        let (_, leader) = three_cell_town(&f);
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        for (p, n) in [(online, "On"), (offline, "Off")] {
            f.towns.invite("Alpha", leader, p).unwrap();
            f.towns.join("Alpha", p, n).unwrap();
        }
        f.notifier.set_online(online, true);
        let s = scheduler(&f);

        let report = s.run_now().unwrap();
        assert_eq!(report.outcomes[0].state, UpkeepState::Overdue(1));
        assert!((report.outcomes[0].balance + 250.0).abs() < f64::EPSILON);
        assert!(f.notifier.messages_for(leader)[0].contains("14 day(s)"));
        assert_eq!(f.notifier.messages_for(online).len(), 1);
        assert!(f.notifier.messages_for(offline).is_empty());
    }

    #[test]
    fn test_fifteen_missed_days_dissolve() {
        let f = fixture();
        let (id, leader) = three_cell_town(&f);
        let s = scheduler(&f);
        f.clock.set(at(1, 12));
        for day in 1..=14 {
            f.clock.set(at(day, 12));
            let report = s.tick().unwrap();
            assert_eq!(report.outcomes[0].state, UpkeepState::Overdue(day));
        }
        f.clock.set(at(15, 12));
        let report = s.tick().unwrap();
        assert_eq!(report.dissolved(), vec!["Alpha"]);
        assert!(f.towns.get_by_id(id).is_none());
        assert_eq!(f.towns.town_of(leader), None);
        assert!(f.claims.is_empty());
        assert_eq!(f.sink.changed().len(), 6);
        assert!(
            f.notifier
                .messages_for(leader)
                .last()
                .unwrap()
                .contains("dissolved")
        );

        f.clock.advance(TimeDelta::days(1));
        assert!(s.tick().unwrap().outcomes.is_empty());
    }

    #[test]
    fn test_spawned_thread_stops() {
        let f = fixture();
        let s = Arc::new(scheduler(&f));
        let handle = s.clone().spawn(Duration::from_millis(5)).unwrap();
        f.clock.set(at(1, 12));
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown();
        assert_eq!(s.last_run(), Some(at(1, 12).date()));
    }
}
