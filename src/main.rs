use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kingsrss::app::AppContext;
use kingsrss::config::Config;
use kingsrss::pipeline;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Failures are logged; the process itself always exits cleanly.
    if let Err(e) = collect().await {
        tracing::error!("{:#}", e);
    }

    Ok(())
}

async fn collect() -> anyhow::Result<()> {
    let path = Config::default_config_path();
    let config = Config::load(&path)?;

    if config.urls.is_empty() {
        tracing::info!("No feeds configured in {}", path.display());
        return Ok(());
    }

    let ctx = AppContext::new(&config)?;
    pipeline::run(&ctx, &config.urls).await;

    Ok(())
}
