//! Chunk ownership lookup command implementation.

use super::CliError;
use landclaim::{CellKey, ClaimOwner, LandContext};

/// Execute the owner command.
///
/// # Errors
///
/// Never fails once the data directory is open.
pub(crate) fn execute(ctx: &LandContext, world: &str, x: i32, z: i32) -> Result<(), CliError> {
    let cell = CellKey::from_block(world, x, z);
    println!("Block {x},{z} in {world} is chunk {cell}");
    match ctx.claims().claim_at(&cell) {
        None => {
            if ctx.towns().town_at(&cell).is_some() {
                println!("  Claim index is missing this town cell; run 'landclaim validate'");
            } else {
                println!("  Wilderness");
            }
        }
        Some(claim) => {
            let since = chrono::DateTime::from_timestamp_millis(claim.claimed_at)
                .map_or_else(|| claim.claimed_at.to_string(), |t| t.format("%Y-%m-%d").to_string());
            match claim.owner {
                ClaimOwner::Player(player) => {
                    println!("  Claimed by player {player} since {since}");
                    for (trustee, tier) in ctx.claims().trusted_by(player) {
                        println!("    trusts {trustee} ({tier})");
                    }
                }
                ClaimOwner::Town(id) => match ctx.towns().get_by_id(id) {
                    Some(town) => {
                        println!("  Territory of {} since {since}", town.name);
                        if let Some(owner) = town.plots.get(&cell).and_then(|p| p.owner) {
                            println!("    plot of {}", town.display_name(owner));
                        }
                    }
                    None => println!("  Held by unknown town {id}; run 'landclaim validate'"),
                },
            }
        }
    }
    Ok(())
}
