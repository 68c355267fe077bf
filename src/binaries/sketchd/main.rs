use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Parser)]
#[clap(about, version, author)]
struct Config {
    /// Address to bind the request surface to.
    #[clap(long, env = "SKETCHD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the request surface to.
    #[clap(long, env = "SKETCHD_PORT", default_value_t = 3596)]
    pub port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchd=info,sketchd_sketch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    // Constructs the storage manager and rehydrates the catalog; any
    // failure here aborts with a non-zero exit.
    let manager = sketchd_sketch::manager::get().await?;
    let app = sketchd_server::router(manager);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("sketchd listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
