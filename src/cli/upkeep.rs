//! Upkeep collection command implementation.

use super::CliError;
use super::output::state_label;
use landclaim::LandContext;

/// Execute the upkeep command.
///
/// # Errors
///
/// A forced run fails when its snapshot cannot be written. Per-town
/// failures are logged and the town is left out of the report.
pub(crate) fn execute(ctx: &LandContext, force: bool) -> Result<(), CliError> {
    let scheduler = ctx.upkeep();
    let report = if force {
        Some(scheduler.run_now()?)
    } else {
        scheduler.tick()
    };
    let Some(report) = report else {
        match scheduler.last_run() {
            Some(date) => println!(
                "Upkeep not due (last run {date}, hour {}). Use --force to run anyway.",
                ctx.config().town_upkeep_hour
            ),
            None => println!(
                "Upkeep not due before {}:00. Use --force to run anyway.",
                ctx.config().town_upkeep_hour
            ),
        }
        return Ok(());
    };

    println!("Upkeep for {}", report.date);
    println!("  Snapshot: {}", report.snapshot.display());
    println!();
    for outcome in &report.outcomes {
        println!(
            "  {:<24} owed {:>10.2}  balance {:>12.2}  {}",
            outcome.name,
            outcome.owed,
            outcome.balance,
            state_label(outcome.state)
        );
    }
    println!();
    println!(
        "{} town(s) charged, {} dissolved",
        report.outcomes.len(),
        report.dissolved().len()
    );
    Ok(())
}
