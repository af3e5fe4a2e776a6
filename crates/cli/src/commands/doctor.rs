//! `chatrelay doctor`: Diagnose configuration and storage.

use std::path::Path;

use chatrelay_config::{AppConfig, DEFAULT_CONFIG_FILE};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("chatrelay doctor");
    println!("================\n");

    let mut issues = 0;

    let file = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    if file.exists() {
        println!("  ✅ Config file found: {}", file.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults and environment", file.display());
    }

    let config = match AppConfig::load_without_credentials(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  1 issue found. Fix the configuration and run again.");
            return Ok(());
        }
    };

    if config.assistant.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
        println!("  ✅ Assistant API key configured");
    } else {
        println!("  ❌ No assistant API key: set OPENAI_API_KEY");
        issues += 1;
    }

    if config.messenger.token.as_deref().is_some_and(|t| !t.is_empty()) {
        println!("  ✅ Messenger token configured");
    } else {
        println!("  ❌ No messenger token: set AVITO_TOKEN");
        issues += 1;
    }

    match chatrelay_store::open(&config.database.url).await {
        Ok(store) => println!("  ✅ Database reachable ({})", store.name()),
        Err(e) => {
            println!("  ❌ Database unavailable: {e}");
            issues += 1;
        }
    }

    println!("  ℹ️  Reply mode: {:?}", config.assistant.mode);

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
