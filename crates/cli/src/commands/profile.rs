//! `chatrelay profile`: Map profile names to messaging accounts.
//!
//! Profiles only touch the local store, so no credentials are needed.

use std::path::Path;

use chatrelay_config::AppConfig;

pub async fn add(
    config_path: Option<&Path>,
    name: &str,
    owner_id: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Profile name must not be empty".into());
    }

    let config = AppConfig::load_without_credentials(config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    let store = chatrelay_store::open(&config.database.url).await?;

    store.save_profile(name, owner_id).await?;
    println!("Profile '{name}' → account {owner_id}");
    Ok(())
}

pub async fn show(
    config_path: Option<&Path>,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_without_credentials(config_path)
        .map_err(|e| format!("Failed to load config: {e}"))?;
    let store = chatrelay_store::open(&config.database.url).await?;

    let Some(owner_id) = store.get_owner_by_profile(name).await? else {
        return Err(format!("Unknown profile: {name}").into());
    };

    match store.get_assistant(owner_id).await? {
        Some(assistant_id) => {
            println!("Profile '{name}' → account {owner_id} (assistant {assistant_id})")
        }
        None => println!("Profile '{name}' → account {owner_id} (no assistant yet)"),
    }
    Ok(())
}
