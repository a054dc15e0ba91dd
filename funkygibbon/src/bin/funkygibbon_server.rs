use funkygibbon::{routes, AppState, Config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!("starting funkygibbon sync server");

    let state = AppState::new(config.clone()).await?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.server_address()).await?;
    info!(address = %config.server_address(), "listening");

    axum::serve(listener, app).await?;

    Ok(())
}
