//! `chatrelay serve`: Start the webhook gateway.

use std::path::Path;

use chatrelay_config::AppConfig;

use crate::shutdown::install_signal_handler;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.webhook.port = port;
    }

    println!("chatrelay gateway");
    println!("   Listening: {}", config.webhook.bind_address());
    println!("   Reply mode: {:?}", config.assistant.mode);
    println!("   Deliver replies: {}", config.messenger.deliver_replies);

    let shutdown = install_signal_handler();
    chatrelay_gateway::start(config, shutdown).await?;

    Ok(())
}
