//! End-to-end town lifecycle through the land context.
//!
//! Founding, territory growth, settings inheritance, container locks and a
//! full save/reload of the data directory.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use landclaim::services::{
    FixedPlaytime, MemoryBank, NoBypass, NoMapSink, RecordingNotifier, SystemClock,
};
use landclaim::town::{LEDGER_CAPACITY, LedgerKind, Toggle, TriState};
use landclaim::{
    Action, BlockPos, CellKey, ClaimError, ClaimOwner, Config, Decision, DenyReason, LandContext,
    PlayerId, Services, TownError,
};
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

struct Server {
    dir: TempDir,
    bank: Arc<MemoryBank>,
    ctx: LandContext,
}

fn services(bank: &Arc<MemoryBank>) -> Services {
    Services {
        currency: bank.clone(),
        playtime: Arc::new(FixedPlaytime::new()),
        notifier: Arc::new(RecordingNotifier::new()),
        map: Arc::new(NoMapSink),
        bypass: Arc::new(NoBypass),
        clock: Arc::new(SystemClock),
    }
}

fn server() -> Server {
    let dir = tempdir().unwrap();
    let bank = Arc::new(MemoryBank::new());
    let ctx = LandContext::open(dir.path(), Config::default(), services(&bank)).unwrap();
    Server { dir, bank, ctx }
}

/// Found "Valid_Town-1" with a funded bank and one cell at (w,0,0).
fn founded(s: &Server) -> PlayerId {
    let leader = Uuid::new_v4();
    s.bank.set_balance(leader, 2000.0);
    s.ctx.found_town(leader, "Ann", "Valid_Town-1").unwrap();
    s.ctx.deposit_to_town(leader, "Valid_Town-1", 500.0).unwrap();
    s.ctx
        .claim_for_town(leader, "Valid_Town-1", &CellKey::new("w", 0, 0))
        .unwrap();
    leader
}

fn block_in(x: i32, z: i32) -> BlockPos {
    BlockPos::new(x * 16 + 3, 64, z * 16 + 3)
}

#[test]
fn test_founding_validates_name_and_charges_fee() {
    let s = server();
    let founder = Uuid::new_v4();
    s.bank.set_balance(founder, 1200.0);

    let err = s.ctx.found_town(founder, "Ann", "Ab").unwrap_err();
    assert!(matches!(err, TownError::InvalidName(_)));
    assert!((s.bank.balance(founder) - 1200.0).abs() < f64::EPSILON);

    let town = s.ctx.found_town(founder, "Ann", "Valid_Town-1").unwrap();
    assert!((s.bank.balance(founder) - 200.0).abs() < f64::EPSILON);
    assert_eq!(town.leader, founder);
    assert_eq!(s.ctx.towns().town_of(founder), Some(town.id));

    // Names are unique regardless of case.
    let other = Uuid::new_v4();
    s.bank.set_balance(other, 5000.0);
    assert!(matches!(
        s.ctx.found_town(other, "Bo", "valid_town-1"),
        Err(TownError::NameTaken(_))
    ));
    assert!((s.bank.balance(other) - 5000.0).abs() < f64::EPSILON);
}

#[test]
fn test_territory_grows_edge_to_edge() {
    let s = server();
    let leader = founded(&s);

    let diagonal = s
        .ctx
        .claim_for_town(leader, "Valid_Town-1", &CellKey::new("w", 1, 1))
        .unwrap_err();
    assert!(matches!(diagonal, TownError::Claim(ClaimError::NotAdjacent)));

    let id = s
        .ctx
        .claim_for_town(leader, "Valid_Town-1", &CellKey::new("w", 1, 0))
        .unwrap();
    assert_eq!(
        s.ctx.claims().holder_at(&CellKey::new("w", 1, 0)),
        Some(ClaimOwner::Town(id))
    );
    let town = s.ctx.towns().get("Valid_Town-1").unwrap();
    assert_eq!(town.territory.len(), 2);
    // 500 deposited, two claims at 50 each.
    assert!((town.balance - 400.0).abs() < f64::EPSILON);
}

#[test]
fn test_town_cell_is_closed_to_player_claims() {
    let s = server();
    founded(&s);
    let player = Uuid::new_v4();
    assert!(matches!(
        s.ctx.claim_for_player(player, &CellKey::new("w", 0, 0)),
        Err(ClaimError::OwnedByOther)
    ));
}

#[test]
fn test_pvp_follows_plot_override() {
    let s = server();
    let leader = founded(&s);
    s.ctx
        .claim_for_town(leader, "Valid_Town-1", &CellKey::new("w", 1, 0))
        .unwrap();
    let visitor = Uuid::new_v4();

    assert_eq!(
        s.ctx.check(visitor, "w", block_in(0, 0), Action::Pvp),
        Decision::Deny(DenyReason::PvpDisabled)
    );

    s.ctx
        .towns()
        .set_toggle("Valid_Town-1", leader, Toggle::Pvp, true)
        .unwrap();
    s.ctx
        .towns()
        .set_plot_toggle(
            "Valid_Town-1",
            leader,
            &CellKey::new("w", 1, 0),
            Toggle::Pvp,
            TriState::Off,
        )
        .unwrap();

    assert!(s.ctx.check(visitor, "w", block_in(0, 0), Action::Pvp).is_allowed());
    assert!(!s.ctx.check(visitor, "w", block_in(1, 0), Action::Pvp).is_allowed());
    assert!(s.ctx.check_environment("w", block_in(0, 0), Toggle::Pvp));
    assert!(!s.ctx.check_environment("w", block_in(1, 0), Toggle::Pvp));
}

#[test]
fn test_outsiders_are_locked_out() {
    let s = server();
    let leader = founded(&s);
    let id = s.ctx.towns().town_of(leader).unwrap();
    let outsider = Uuid::new_v4();

    assert_eq!(
        s.ctx.check(outsider, "w", block_in(0, 0), Action::Container),
        Decision::Deny(DenyReason::ContainerLocked(id))
    );
    assert_eq!(
        s.ctx.check(outsider, "w", block_in(0, 0), Action::Build),
        Decision::Deny(DenyReason::TownOutsider(id))
    );
    assert!(s.ctx.check(leader, "w", block_in(0, 0), Action::Container).is_allowed());
}

#[test]
fn test_indirect_change_is_attributed() {
    let s = server();
    let leader = founded(&s);
    let outsider = Uuid::new_v4();
    let piston = block_in(0, 0);

    assert!(s.ctx.attribute_and_check("w", piston, Action::Build).is_none());

    s.ctx.record_intent(outsider, "w", piston);
    let (actor, decision) = s.ctx.attribute_and_check("w", piston, Action::Build).unwrap();
    assert_eq!(actor, outsider);
    assert!(!decision.is_allowed());
    // One interaction answers for one change.
    assert!(s.ctx.attribute_and_check("w", piston, Action::Build).is_none());

    s.ctx.record_intent(leader, "w", piston);
    let (actor, decision) = s.ctx.attribute_and_check("w", piston, Action::Build).unwrap();
    assert_eq!(actor, leader);
    assert!(decision.is_allowed());
}

#[test]
fn test_delete_releases_every_cell() {
    let s = server();
    let leader = founded(&s);
    s.ctx
        .claim_for_town(leader, "Valid_Town-1", &CellKey::new("w", 0, 1))
        .unwrap();

    let removed = s.ctx.delete_town(leader, "Valid_Town-1").unwrap();
    assert_eq!(removed.territory.len(), 2);
    assert!(s.ctx.claims().is_empty());
    assert!(s.ctx.towns().is_empty());
    assert!(
        s.ctx
            .check(Uuid::new_v4(), "w", BlockPos::new(3, -10, 3), Action::Switch)
            .is_allowed()
    );
}

#[test]
fn test_state_survives_reload() {
    let s = server();
    let leader = founded(&s);
    let member = Uuid::new_v4();
    s.ctx.towns().invite("Valid_Town-1", leader, member).unwrap();
    s.ctx.towns().join("Valid_Town-1", member, "Mo").unwrap();
    s.ctx
        .towns()
        .set_plot_owner("Valid_Town-1", leader, &CellKey::new("w", 0, 0), Some(member))
        .unwrap();

    // Push the ledger well past capacity.
    s.bank.set_balance(leader, 1000.0);
    for _ in 0..LEDGER_CAPACITY {
        s.ctx.deposit_to_town(leader, "Valid_Town-1", 1.0).unwrap();
    }
    let before = s.ctx.towns().get("Valid_Town-1").unwrap();
    assert_eq!(before.ledger.len(), LEDGER_CAPACITY);
    assert!(before.ledger.iter().all(|e| e.kind != LedgerKind::Founded));

    let Server { dir, bank, ctx } = s;
    ctx.shutdown();
    let reopened = LandContext::open(dir.path(), Config::default(), services(&bank)).unwrap();

    let after = reopened.towns().get("VALID_TOWN-1").unwrap();
    assert_eq!(after, before);
    assert_eq!(reopened.towns().town_of(member), Some(after.id));
    assert_eq!(
        reopened.claims().holder_at(&CellKey::new("w", 0, 0)),
        Some(ClaimOwner::Town(after.id))
    );
    assert!(
        landclaim::invariants::check_invariants(reopened.claims(), reopened.towns()).is_empty()
    );
}
