//! `chatrelay upload`: Upload a knowledge file from disk.

use std::path::Path;
use std::sync::Arc;

use chatrelay_agent::KnowledgeUploader;
use chatrelay_config::AppConfig;

use crate::shutdown::install_signal_handler;

pub async fn run(
    config_path: Option<&Path>,
    profile: &str,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("Not a file: {}", file.display()))?
        .to_string();
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;

    let store = chatrelay_store::open(&config.database.url).await?;
    let api = Arc::new(chatrelay_providers::assistant_client(&config)?);
    let uploader = KnowledgeUploader::from_config(api, store, &config);

    let cancel = install_signal_handler();
    let file_id = uploader.upload(profile, &file_name, bytes, &cancel).await?;

    println!("Uploaded {file_name} for profile '{profile}': {file_id}");
    Ok(())
}
