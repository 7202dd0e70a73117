use anyhow::Context;
use lca_worker::{app_context::AppContext, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let log_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults().context("Failed to load configuration")?;
    let context = AppContext::new(&config)
        .await
        .context("Failed to initialize app context")?;

    context.event_consumer().run(shutdown_signal()).await;

    context.close().await;
    info!("Shut down cleanly");
    Ok(())
}
