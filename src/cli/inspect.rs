//! Town inspection command implementation.

use super::output::{JsonTown, format_town_detail, format_town_table};
use super::{CliError, OutputFormat};
use landclaim::LandContext;

/// Execute the inspect command.
///
/// # Errors
///
/// Returns an error if the named town does not exist or JSON encoding fails.
pub(crate) fn execute(
    ctx: &LandContext,
    town: Option<&str>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let config = ctx.config();
    match (town, format) {
        (Some(name), OutputFormat::Text) => {
            let town = ctx
                .towns()
                .get(name)
                .ok_or_else(|| CliError::new(format!("No town named {name:?}")))?;
            print!("{}", format_town_detail(&town, config));
        }
        (Some(name), OutputFormat::Json) => {
            let town = ctx
                .towns()
                .get(name)
                .ok_or_else(|| CliError::new(format!("No town named {name:?}")))?;
            println!("{}", serde_json::to_string_pretty(&town)?);
        }
        (None, OutputFormat::Text) => {
            let towns = ctx.towns().list();
            if towns.is_empty() {
                println!("No towns in {}", ctx.storage().root().display());
                return Ok(());
            }
            print!("{}", format_town_table(&towns, config));
            println!("Individual claims: {}", ctx.claims().len().saturating_sub(town_cells(ctx)));
        }
        (None, OutputFormat::Json) => {
            let towns: Vec<JsonTown> = ctx
                .towns()
                .list()
                .iter()
                .map(|t| JsonTown::from_town(t, config))
                .collect();
            println!("{}", serde_json::to_string_pretty(&towns)?);
        }
    }
    Ok(())
}

fn town_cells(ctx: &LandContext) -> usize {
    ctx.towns().list().iter().map(|t| t.territory.len()).sum()
}
