//! Cache Health Demo Application
//!
//! Boots the cache runtime, fetches a component through the cache and drives
//! every `cache_health` action.
//!
//! Usage:
//!   cargo run --example cache_health_demo
//!
//! Environment variables:
//!   MATERIAL3_CACHE_DIR     - cache directory (default: <config dir>/material3-mcp/cache)
//!   MATERIAL3_CACHE_ENABLED - set to false to bypass the cache
//!   GITHUB_TOKEN            - optional token for the GitHub API
//!   RUST_LOG                - log filter (default: material3_cache=info)

use material3_cache::{CacheHealthTool, CacheRuntime};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "material3_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Material 3 Cache Health Demo ===");

    let mut runtime = CacheRuntime::from_env().await?;
    info!("Cache directory: {}", runtime.config().cache_dir.display());
    info!("Startup check: {:?}", runtime.startup_check());

    info!("\n--- Component fetch (cold, then warm) ---");
    for attempt in 1..=2 {
        let source = runtime.provider().get_component("button", "web").await?;
        info!(
            "Attempt {}: {} bytes, live: {}",
            attempt,
            source.code.len(),
            source.live
        );
    }

    let tool = runtime.cache_health_tool();
    let definition = CacheHealthTool::definition();
    info!("\n--- Tool definition ---");
    info!("{}", serde_json::to_string_pretty(&definition)?);

    for args in [
        json!({"action": "status"}),
        json!({"action": "check_updates"}),
        json!({"action": "invalidate_component", "componentName": "button", "framework": "web"}),
        json!({"action": "invalidate_component", "componentName": "button"}),
        json!({"action": "invalidate_all"}),
    ] {
        info!("\n--- cache_health {} ---", args);
        let result = tool.handle(args).await;
        info!("isError: {}", result["isError"]);
        if let Some(text) = result["content"][0]["text"].as_str() {
            info!("{}", text);
        }
    }

    runtime.shutdown();
    info!("\n=== Demo Complete ===");
    Ok(())
}
