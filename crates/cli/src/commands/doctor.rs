//! `threadline doctor`: diagnose configuration and storage.

use threadline_bridge::SchedulerHandle;
use threadline_config::AppConfig;
use threadline_core::checkpoint::CheckpointStore;
use threadline_core::error::CheckpointError;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Threadline doctor");
    println!("=================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ok    Config file found at {}", config_path.display());
    } else {
        println!("  warn  No config file, using defaults (run `threadline onboard`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Config valid");
            config
        }
        Err(e) => {
            println!("  FAIL  Config invalid: {e}");
            return Ok(());
        }
    };

    if config.has_api_key() || config.default_provider == "ollama" {
        println!("  ok    Provider `{}` configured", config.default_provider);
    } else {
        println!("  FAIL  No API key for `{}`", config.default_provider);
        issues += 1;
    }

    let router = threadline_providers::router::build_from_config(&config);
    if router.default().is_none() {
        println!("  FAIL  Provider `{}` is not available", config.default_provider);
        issues += 1;
    }

    let bridge = match SchedulerHandle::start("threadline-doctor") {
        Ok(bridge) => {
            println!("  ok    Background scheduler starts");
            bridge
        }
        Err(e) => {
            println!("  FAIL  Background scheduler: {e}");
            return Ok(());
        }
    };

    let checkpoint = config.checkpoint.clone();
    let store = bridge.submit_blocking(async move {
        let store = threadline_checkpoint::open_store(&checkpoint).await?;
        let threads = store.list_threads().await?;
        Ok::<_, CheckpointError>(threads.len())
    })?;
    match store {
        Ok(count) => println!(
            "  ok    Checkpoint store `{}` opened ({count} threads)",
            config.checkpoint.backend
        ),
        Err(e) => {
            println!("  FAIL  Checkpoint store: {e}");
            issues += 1;
        }
    }
    bridge.shutdown();

    let tools = &config.tools;
    println!(
        "  info  Tools: calculator {}, web search {}, stock price {}",
        on_off(tools.calculator.enabled),
        on_off(tools.web_search.enabled),
        on_off(tools.stock_price.enabled),
    );

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
