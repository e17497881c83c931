use std::process::ExitCode;

use clap::Parser;
use simviz::config::Config;
use simviz::net::{Command, Connection, ConnectionState};
use simviz::viewer::Viewer;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = Config::parse();
    let connection = Connection::new(config.connection_config());
    let mut viewer = Viewer::attach(&connection);

    if let Err(e) = connection.connect(&config.host, config.port).await {
        error!(error = %e, host = %config.host, port = config.port, "could not reach simulation server");
        return ExitCode::FAILURE;
    }
    if let Err(e) = connection.send_command(Command::Start).await {
        error!(error = %e, "failed to start the simulation");
        connection.disconnect().await;
        return ExitCode::FAILURE;
    }

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = connection.watch_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                viewer.tick();
                tick += 1;
                if config.steps_on(tick) {
                    if let Err(e) = connection.send_command(Command::Step).await {
                        warn!(error = %e, "step request failed");
                    }
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "could not listen for ctrl-c");
                }
                info!("shutting down");
                break;
            }
            _ = state.wait_for(|s| *s == ConnectionState::Disconnected) => {
                warn!("simulation server went away");
                break;
            }
        }
    }

    // Apply anything that arrived before the link went down.
    viewer.tick();
    connection.disconnect().await;

    let scene = viewer.scene();
    info!(snapshots = scene.snapshots(), agents = scene.len(), "viewer stopped");
    ExitCode::SUCCESS
}
