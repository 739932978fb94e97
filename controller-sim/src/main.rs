use common::ControllerKind;
use controller_sim::Simulator;
use tracing::info;

/// Usage: controller-sim [firework|lights] [port]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("controller_sim=debug,tower_http=debug")
        .init();

    let mut args = std::env::args().skip(1);
    let kind = match args.next().as_deref() {
        Some("lights") => ControllerKind::Lights,
        Some("firework") | None => ControllerKind::Firework,
        Some(other) => anyhow::bail!("unknown controller kind '{}'", other),
    };
    let port: u16 = match args.next() {
        Some(port) => port.parse()?,
        None => 8080,
    };

    let app = Simulator::new(kind).router();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    info!("Simulated {:?} controller listening on http://0.0.0.0:{}", kind, port);

    axum::serve(listener, app).await?;
    Ok(())
}
