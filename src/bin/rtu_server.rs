/// Voltage Modbus RTU Server
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Listens on every serial port named in a YAML/JSON config file and logs
/// the validated requests arriving on them until Ctrl+C.
///
/// Usage: rtu_server <config.yaml>
/// Set RUST_LOG=debug to see dropped frames and address mismatches.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voltage_rtu_server::{ModbusRtuServer, RtuServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: rtu_server <config.yaml|config.json>")?;
    let config = RtuServerConfig::from_file(&path)
        .with_context(|| format!("loading configuration from {}", path))?;

    info!("🚀 {}", voltage_rtu_server::info());
    info!(
        "Serving {} port(s), slave filter {}",
        config.ports.len(),
        if config.slave_id == 0 { "off".to_string() } else { config.slave_id.to_string() }
    );

    let mut server = ModbusRtuServer::with_config(config)?;
    let mut requests = server
        .take_requests()
        .context("request queue already taken")?;

    let consumer = tokio::spawn(async move {
        let mut handled = 0u64;
        while let Some(request) = requests.recv().await {
            handled += 1;
            info!("📥 {} from {}", request.frame, request.port.name());
        }
        handled
    });

    server.listen_all()?;
    info!("✅ Listening, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("⏹️  Ctrl+C received, waiting for listeners to release their ports");

    for report in server.shutdown().await {
        info!("{}: {}", report.port, report.exit);
    }

    match consumer.await {
        Ok(handled) => info!("📊 {} request(s) received", handled),
        Err(e) => warn!("request consumer failed: {}", e),
    }

    let stats = server.get_stats();
    info!(
        "📊 frames received {}, dispatched {}, filtered {}, rejected {}, bytes {}",
        stats.frames_received,
        stats.frames_dispatched,
        stats.frames_filtered,
        stats.frames_rejected,
        stats.bytes_received
    );
    Ok(())
}
