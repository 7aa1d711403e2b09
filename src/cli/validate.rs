//! Consistency validation command implementation.

use super::CliError;
use landclaim::LandContext;
use landclaim::invariants::check_invariants;

/// Execute the validate command.
///
/// # Errors
///
/// Returns an error if any invariant is violated.
pub(crate) fn execute(ctx: &LandContext) -> Result<(), CliError> {
    println!("Validating: {}", ctx.storage().root().display());
    println!();
    println!("  Towns:  {}", ctx.towns().len());
    println!("  Claims: {}", ctx.claims().len());
    println!();

    let violations = check_invariants(ctx.claims(), ctx.towns());
    print_check("Invariants", violations.is_empty());
    if violations.is_empty() {
        println!();
        println!("Validation successful!");
        return Ok(());
    }

    println!();
    for violation in &violations {
        println!("  {}", violation.message);
    }
    Err(CliError::new(format!("{} violation(s) found", violations.len())))
}

fn print_check(name: &str, ok: bool) {
    let status = if ok { "OK" } else { "FAILED" };
    let symbol = if ok { "✓" } else { "✗" };
    println!("  {symbol} {name}: {status}");
}
