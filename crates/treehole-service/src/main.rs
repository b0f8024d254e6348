use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};
use treehole_service::config::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = ServiceConfig::from_env()?;
    treehole_service::serve(config).await
}
