use anyhow::{Context, Result};
use tabwarden_storage::Store;
use url::Url;

use crate::ConfigAction;

pub fn run(action: ConfigAction) -> Result<()> {
    let store = Store::new(None)?;
    match action {
        ConfigAction::Show => show(&store),
        ConfigAction::SetApiKey { key } => {
            store.set_api_key(&key)?;
            println!("API key updated");
            Ok(())
        }
        ConfigAction::SetIdleThreshold { seconds } => {
            let mut settings = store.settings()?;
            settings.idle_threshold_seconds = seconds;
            store.save_settings(&settings)?;
            println!("Idle threshold set to {seconds}s (applies when the shim reconnects)");
            Ok(())
        }
        ConfigAction::SetBlockPages { soft, hard } => {
            Url::parse(&soft).context("soft block page is not a valid URL")?;
            Url::parse(&hard).context("hard block page is not a valid URL")?;
            let mut settings = store.settings()?;
            settings.soft_block_page = soft;
            settings.hard_block_page = hard;
            store.save_settings(&settings)?;
            println!("Block pages updated");
            Ok(())
        }
    }
}

fn show(store: &Store) -> Result<()> {
    let settings = store.settings()?;
    println!("Idle threshold: {}s", settings.idle_threshold_seconds);
    println!("Soft block page: {}", settings.soft_block_page);
    println!("Hard block page: {}", settings.hard_block_page);

    let api_key = store.api_key()?;
    println!(
        "API key: {}",
        if api_key.is_some_and(|k| !k.is_empty()) {
            "set"
        } else {
            "not set"
        }
    );
    Ok(())
}
