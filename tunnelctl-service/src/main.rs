//! TunnelCtl privileged service
//!
//! Applies VPN lifecycle events to the host network stack: split tunnel
//! filters, routes and interface policy. Events arrive as JSON lines on stdin.

mod app;
mod events;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{select, Receiver};
use std::io::BufReader;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tunnelctl_core::config::data_dir;
use tunnelctl_core::{LifecycleDispatcher, ServiceConfig, VpnProtocol, VpnState};

use app::{NetworkMonitors, Platform};

#[derive(Parser)]
#[command(name = "tunnelctl-service")]
#[command(about = "TunnelCtl network control plane service", long_about = None)]
struct Cli {
    /// Service config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply lifecycle events read from stdin until EOF or Ctrl+C
    Run,
    /// Delete server routes left behind by a previous crash
    CleanupRoutes,
    /// Control the tunnel data plane service
    Tunnel {
        #[command(subcommand)]
        action: TunnelAction,
    },
}

#[derive(Subcommand)]
enum TunnelAction {
    /// Create or update the tunnel service and start it
    Start {
        #[arg(short, long, value_enum, default_value_t = Transport::Udp)]
        transport: Transport,
    },
    /// Stop the tunnel service
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Udp,
    Tcp,
    Tls,
}

impl From<Transport> for VpnProtocol {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Udp => VpnProtocol::WireGuardUdp,
            Transport::Tcp => VpnProtocol::WireGuardTcp,
            Transport::Tls => VpnProtocol::WireGuardTls,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(ServiceConfig::default_path);

    let config = ServiceConfig::load(&config_path);
    let log_dir = data_dir().join("logs");
    logging::setup_panic_hook(log_dir.clone());
    let log_file = logging::init(&log_dir, &config.log_level);

    log::info!("TunnelCtl service v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("Config: {}, log: {}", config_path.display(), log_file.display());

    let result = match cli.command {
        Command::Run => run(&config),
        Command::CleanupRoutes => cleanup_routes(&config),
        Command::Tunnel { action } => tunnel(&config, action),
    };

    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    result
}

fn run(config: &ServiceConfig) -> Result<()> {
    let platform = Platform::native()?;
    let control_plane = app::build_control_plane(&platform, config)?;
    control_plane.cleanup_persisted_routes();

    let mut monitors = NetworkMonitors::start(&platform)?;
    let dispatcher = LifecycleDispatcher::start(control_plane)?;

    let interrupt = ctrl_c_channel()?;
    let events = stdin_events()?;
    let delivered = forward_events(&events, &interrupt, |state| dispatcher.dispatch(state));
    log::info!("Stopped reading events after {} events", delivered);

    match dispatcher.shutdown() {
        Some(mut control_plane) => control_plane.release(),
        None => log::warn!("Control plane did not shut down cleanly"),
    }
    monitors.stop();
    Ok(())
}

/// Fires once on Ctrl+C
fn ctrl_c_channel() -> Result<Receiver<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let (sender, receiver) = crossbeam_channel::bounded(1);

    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                log::info!("Ctrl+C received, shutting down");
                let _ = sender.send(());
            }
        })
        .context("Failed to spawn the Ctrl+C thread")?;

    Ok(receiver)
}

/// Events parsed from stdin. The channel closes at EOF.
fn stdin_events() -> Result<Receiver<VpnState>> {
    let (sender, receiver) = crossbeam_channel::unbounded();

    // Left blocked in read on interrupt; the process exit ends it
    std::thread::Builder::new()
        .name("stdin-events".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            if let Err(e) = events::read_events(BufReader::new(stdin.lock()), |state| sender.send(state).is_ok()) {
                log::error!("Failed to read events: {}", e);
            }
        })
        .context("Failed to spawn the event reader thread")?;

    Ok(receiver)
}

/// Hand events to `deliver` until the stream ends, `deliver` refuses one or
/// `interrupt` fires. Returns the number delivered.
fn forward_events<F>(events: &Receiver<VpnState>, interrupt: &Receiver<()>, mut deliver: F) -> usize
where
    F: FnMut(VpnState) -> bool,
{
    let mut delivered = 0;
    loop {
        select! {
            recv(events) -> state => match state {
                Ok(state) => {
                    if !deliver(state) {
                        break;
                    }
                    delivered += 1;
                }
                Err(_) => break,
            },
            recv(interrupt) -> _ => break,
        }
    }
    delivered
}

fn cleanup_routes(config: &ServiceConfig) -> Result<()> {
    let platform = Platform::native()?;
    app::server_route_manager(&platform, config).cleanup_persisted_routes();
    Ok(())
}

fn tunnel(config: &ServiceConfig, action: TunnelAction) -> Result<()> {
    let platform = Platform::native()?;
    let launcher = app::tunnel_launcher(&platform, config);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl+C received, cancelling");
                ctrl_c_cancel.cancel();
            }
        });

        let ok = match action {
            TunnelAction::Start { transport } => launcher.start(&cancel, transport.into()).await,
            TunnelAction::Stop => launcher.stop(&cancel).await,
        };

        if ok {
            log::info!("Tunnel service '{}' done", launcher.name());
            Ok(())
        } else {
            anyhow::bail!("Tunnel service '{}' operation failed", launcher.name())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tunnelctl_core::{VpnErrorKind, VpnStatus};

    #[test]
    fn test_transport_protocol() {
        assert_eq!(VpnProtocol::from(Transport::Udp), VpnProtocol::WireGuardUdp);
        assert_eq!(VpnProtocol::from(Transport::Tls), VpnProtocol::WireGuardTls);
    }

    #[test]
    fn test_cli_parses_tunnel_start() {
        let cli = Cli::try_parse_from(["tunnelctl-service", "--config", "svc.json", "tunnel", "start", "-t", "tcp"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("svc.json")));
        match cli.command {
            Command::Tunnel {
                action: TunnelAction::Start { transport },
            } => assert_eq!(transport, Transport::Tcp),
            _ => panic!("expected tunnel start"),
        }
    }

    fn state(status: VpnStatus) -> VpnState {
        VpnState::new(status, VpnErrorKind::None, "10.2.0.2", "185.159.1.1", 51820, VpnProtocol::WireGuardUdp)
    }

    #[test]
    fn test_interrupt_stops_forwarding_while_reader_is_open() {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (interrupt_tx, interrupt) = crossbeam_channel::bounded(1);
        events_tx.send(state(VpnStatus::Connecting)).unwrap();

        let forwarder = std::thread::spawn(move || {
            let mut seen = Vec::new();
            let delivered = forward_events(&events, &interrupt, |state| {
                seen.push(state.status);
                true
            });
            (delivered, seen)
        });

        std::thread::sleep(Duration::from_millis(50));
        interrupt_tx.send(()).unwrap();
        let (delivered, seen) = forwarder.join().unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(seen, vec![VpnStatus::Connecting]);
        // Held open all along, like a reader blocked on stdin
        drop(events_tx);
    }

    #[test]
    fn test_forwarding_ends_at_end_of_stream() {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (_interrupt_tx, interrupt) = crossbeam_channel::bounded::<()>(1);
        events_tx.send(state(VpnStatus::Connecting)).unwrap();
        events_tx.send(state(VpnStatus::Connected)).unwrap();
        drop(events_tx);

        assert_eq!(forward_events(&events, &interrupt, |_| true), 2);
    }

    #[test]
    fn test_forwarding_stops_when_delivery_is_refused() {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let (_interrupt_tx, interrupt) = crossbeam_channel::bounded::<()>(1);
        events_tx.send(state(VpnStatus::Connecting)).unwrap();
        events_tx.send(state(VpnStatus::Connected)).unwrap();

        assert_eq!(forward_events(&events, &interrupt, |_| false), 0);
    }
}
