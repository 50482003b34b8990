use anyhow::{bail, Result};
use tabwarden_core::matcher;
use tabwarden_storage::{BlockTier, Store};

use crate::BlockAction;

/// The CLI edits the lists directly in the store; the daemon reads
/// them on every navigation, so no daemon round-trip is needed.
pub fn run(action: BlockAction) -> Result<()> {
    let store = Store::new(None)?;
    match action {
        BlockAction::Add { pattern, hard } => add(&store, &pattern, tier_for(hard)),
        BlockAction::Remove { pattern, hard } => remove(&store, &pattern, tier_for(hard)),
        BlockAction::List => list(&store),
    }
}

const fn tier_for(hard: bool) -> BlockTier {
    if hard {
        BlockTier::Hard
    } else {
        BlockTier::Soft
    }
}

fn add(store: &Store, pattern: &str, tier: BlockTier) -> Result<()> {
    let normalized = matcher::normalize(pattern);
    if normalized.is_empty() {
        bail!("pattern is empty after normalization");
    }

    let mut patterns = store.block_patterns(tier)?;
    if patterns
        .iter()
        .any(|p| matcher::normalize(p) == normalized)
    {
        println!("{normalized} is already on the {tier} blocklist");
        return Ok(());
    }

    patterns.push(normalized.clone());
    store.set_block_patterns(tier, &patterns)?;
    println!("Added {normalized} to the {tier} blocklist");
    Ok(())
}

fn remove(store: &Store, pattern: &str, tier: BlockTier) -> Result<()> {
    let normalized = matcher::normalize(pattern);
    let mut patterns = store.block_patterns(tier)?;
    let before = patterns.len();
    patterns.retain(|p| matcher::normalize(p) != normalized);

    if patterns.len() == before {
        println!("{normalized} is not on the {tier} blocklist");
        return Ok(());
    }

    store.set_block_patterns(tier, &patterns)?;
    println!("Removed {normalized} from the {tier} blocklist");
    Ok(())
}

fn list(store: &Store) -> Result<()> {
    for tier in [BlockTier::Soft, BlockTier::Hard] {
        let patterns = store.block_patterns(tier)?;
        println!("{tier} blocklist ({} entries):", patterns.len());
        if patterns.is_empty() {
            println!("  (empty)");
        }
        for pattern in patterns {
            println!("  {pattern}");
        }
    }
    Ok(())
}
