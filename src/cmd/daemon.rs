//! Daemon commands: `shipyard daemon start|status|stop`.

use anyhow::Result;
use console::style;
use shipyard::config::ShipyardConfig;
use shipyard::daemon::{self, DaemonState};
use shipyard::process::send_sigterm;

pub async fn cmd_daemon_start(config: &ShipyardConfig, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.toml.daemon.port);
    daemon::start(config, port).await
}

pub fn cmd_daemon_status(config: &ShipyardConfig) -> Result<()> {
    match DaemonState::current(&config.daemon_state_path())? {
        Some(state) => println!(
            "{} (pid {}, port {}, since {})",
            style("Daemon running").green().bold(),
            state.pid,
            state.port,
            state.started_at
        ),
        None => println!("Daemon not running"),
    }
    Ok(())
}

pub fn cmd_daemon_stop(config: &ShipyardConfig) -> Result<()> {
    let Some(state) = DaemonState::current(&config.daemon_state_path())? else {
        println!("Daemon not running");
        return Ok(());
    };
    send_sigterm(state.pid)?;
    println!(
        "{} to daemon (pid {})",
        style("Sent SIGTERM").yellow().bold(),
        state.pid
    );
    Ok(())
}
