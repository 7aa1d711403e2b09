//! Output formatting utilities for CLI.

use std::fmt::Write as _;

use landclaim::town::{LedgerEntry, Toggle};
use landclaim::upkeep::UpkeepState;
use landclaim::{Config, Town};
use serde::Serialize;

/// JSON-serializable town summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JsonTown {
    /// Stable id.
    pub(super) id: String,
    /// Display name.
    pub(super) name: String,
    /// Leader display name.
    pub(super) leader: String,
    /// Member count, leader included.
    pub(super) members: usize,
    /// Claimed chunks.
    pub(super) cells: usize,
    /// Bank balance.
    pub(super) balance: f64,
    /// Daily upkeep at current size.
    pub(super) daily_upkeep: f64,
    /// Consecutive unpaid days.
    pub(super) missed_upkeep_days: u32,
}

impl JsonTown {
    /// Create from a town record.
    pub(super) fn from_town(town: &Town, config: &Config) -> Self {
        Self {
            id: town.id.to_string(),
            name: town.name.clone(),
            leader: town.display_name(town.leader),
            members: town.members.len(),
            cells: town.territory.len(),
            balance: town.balance,
            daily_upkeep: config.upkeep_for(town.territory.len()),
            missed_upkeep_days: town.missed_upkeep_days,
        }
    }
}

/// One line per town.
pub(super) fn format_town_table(towns: &[Town], config: &Config) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<24} {:>7} {:>6} {:>12} {:>10}  {}",
        "Town", "Members", "Chunks", "Balance", "Upkeep", "State"
    );
    let _ = writeln!(
        output,
        "{:-<24} {:->7} {:->6} {:->12} {:->10}  {:-<12}",
        "", "", "", "", "", ""
    );
    for town in towns {
        let _ = writeln!(
            output,
            "{:<24} {:>7} {:>6} {:>12.2} {:>10.2}  {}",
            town.name,
            town.members.len(),
            town.territory.len(),
            town.balance,
            config.upkeep_for(town.territory.len()),
            state_label(UpkeepState::of(town)),
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Total: {} town(s)", towns.len());
    output
}

/// Full detail for one town.
pub(super) fn format_town_detail(town: &Town, config: &Config) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{} ({})", town.name, town.id);
    let _ = writeln!(output, "  Leader:   {}", town.display_name(town.leader));
    let officers: Vec<String> = town.officers.iter().map(|o| town.display_name(*o)).collect();
    let _ = writeln!(output, "  Officers: {}", list_or_none(&officers));
    let members: Vec<&str> = town.members.values().map(String::as_str).collect();
    let _ = writeln!(output, "  Members:  {} ({})", members.join(", "), members.len());
    let _ = writeln!(output, "  Balance:  {:.2}", town.balance);
    let _ = writeln!(
        output,
        "  Upkeep:   {:.2}/day, {}",
        config.upkeep_for(town.territory.len()),
        state_label(UpkeepState::of(town))
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "Settings:");
    for toggle in Toggle::ALL {
        let _ = writeln!(
            output,
            "  {:<13} {}",
            format!("{toggle:?}"),
            on_off(town.settings.toggle(toggle))
        );
    }
    let _ = writeln!(output, "  Outsiders     {:?}", town.settings.outsider);
    let _ = writeln!(output, "  Members       {:?}", town.settings.member);
    let _ = writeln!(output);

    let _ = writeln!(output, "Territory ({} chunk(s)):", town.territory.len());
    for cell in &town.territory {
        let plot = town.plots.get(cell);
        let owner = plot
            .and_then(|p| p.owner)
            .map(|o| format!(" plot of {}", town.display_name(o)))
            .unwrap_or_default();
        let protected = if plot.is_some_and(landclaim::town::Plot::is_protected) {
            " [protected]"
        } else {
            ""
        };
        let _ = writeln!(output, "  {cell}{owner}{protected}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "Recent ledger:");
    for entry in town.ledger.recent(10) {
        let _ = writeln!(output, "  {}", format_entry(entry));
    }
    output
}

fn format_entry(entry: &LedgerEntry) -> String {
    let when = chrono::DateTime::from_timestamp_millis(entry.timestamp)
        .map_or_else(|| entry.timestamp.to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
    let mut line = format!("{when}  {:<9} {:<16}", format!("{:?}", entry.kind), entry.actor_name);
    if entry.amount.abs() > f64::EPSILON {
        let _ = write!(line, " {:>10.2}", entry.amount);
    }
    if !entry.detail.is_empty() {
        let _ = write!(line, "  {}", entry.detail);
    }
    line
}

pub(super) fn state_label(state: UpkeepState) -> String {
    match state {
        UpkeepState::Current => "current".to_string(),
        UpkeepState::Overdue(days) => format!("overdue {days}d"),
        UpkeepState::Dissolved => "dissolved".to_string(),
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
