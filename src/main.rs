//! Binary entry point

use clap::Parser;
use epos_bridge::cli::Cli;
use epos_bridge::config::{self, TerminalConfig, TerminalDriver};
use epos_bridge::device::DeviceAdapter;
use epos_bridge::error::GatewayError;
use epos_bridge::terminal::sim::SimulatedTerminal;
use epos_bridge::terminal::{DeviceError, TerminalSession};
use epos_bridge::{logging, server};
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let mut config = config::load(&cli.config)?;
    if let Some(port) = cli.listen_port {
        config.server.listen_port = port;
    }

    let session = open_terminal(&config.terminal)?;
    info!(
        "terminal link up at {}:{}",
        config.terminal.ip, config.terminal.port
    );

    let adapter = Arc::new(DeviceAdapter::new(session, config.callbacks.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| GatewayError::Runtime { source })?;

    runtime.block_on(async {
        tokio::select! {
            result = server::run(config.server.listen_port, adapter) => {
                result.map_err(anyhow::Error::from)
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    })
}

/// Build the configured terminal driver and bring its link up
///
/// The terminal link is a startup requirement; without it every
/// operation would fail anyway.
fn open_terminal(
    config: &TerminalConfig,
) -> epos_bridge::error::Result<Box<dyn TerminalSession>> {
    let mut session: Box<dyn TerminalSession> = match config.driver {
        TerminalDriver::Simulated => Box::new(SimulatedTerminal::new()),
    };

    let status = session.open_link(&config.ip, config.port, config.timeout());
    if !status.is_ok() {
        return Err(DeviceError::Sdk {
            status,
            stage: "terminal link open",
        }
        .into());
    }
    let status = session.configure(&config.cash_register_id);
    if !status.is_ok() {
        return Err(DeviceError::Sdk {
            status,
            stage: "terminal configuration",
        }
        .into());
    }
    Ok(session)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
