use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songlake_etl::{pipeline, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Songlake ETL v0.1.0");

    let config_path =
        std::env::var("SONGLAKE_CONFIG").unwrap_or_else(|_| "songlake.yaml".to_string());
    let config = PipelineConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load pipeline config from {}", config_path))?;

    info!("Configuration loaded from {}", config_path);
    info!("  Input root: {}", config.input_root);
    info!("  Output root: {}", config.output_root);

    pipeline::run(&config).await?;

    Ok(())
}
