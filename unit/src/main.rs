use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use evostim_protocol::types::UnitId;
use evostim_unit::device::SimCasu;
use evostim_unit::serve::serve;
use evostim_unit::session::Session;

#[derive(Parser)]
#[command(name = "evostim-unit", about = "evostim unit daemon: drives one CASU on behalf of the controller")]
struct Cli {
    /// Operator-assigned unit number
    #[arg(long, env = "EVOSTIM_UNIT_ID")]
    unit_id: UnitId,

    /// Address to listen on for controller connections
    #[arg(long, default_value = "0.0.0.0:6910", env = "EVOSTIM_LISTEN")]
    listen: String,

    /// Peltier reference temperature in °C
    #[arg(long, default_value = "28.0")]
    temperature_target: f64,

    /// Simulated wax temperature reading in °C
    #[arg(long, default_value = "28.0")]
    sim_temperature: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    tracing::info!(unit_id = cli.unit_id, listen = %cli.listen, "Starting evostim unit");

    let listener = TcpListener::bind(&cli.listen).await?;
    let device = SimCasu::new(cli.sim_temperature);
    let mut session = Session::new(cli.unit_id, device, cli.temperature_target);

    let terminated = tokio::select! {
        result = serve(&listener, &mut session) => { result?; true }
        _ = shutdown_signal() => false,
    };
    if !terminated {
        tracing::info!(unit_id = cli.unit_id, "Quiescing on signal");
        session.quiesce().await;
    }

    tracing::info!(unit_id = cli.unit_id, "Unit shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
