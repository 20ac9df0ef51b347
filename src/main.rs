use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use clap::Parser;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{error, info, warn};

use reactive_ofp::config::{BarrierMode, Config};
use reactive_ofp::connection::{self, Event};
use reactive_ofp::nat::NatPolicy;
use reactive_ofp::ofp_controller::{Controller, ControllerSettings, OperatorAlert};
use reactive_ofp::policy::ReactivePolicy;
use reactive_ofp::registry::Registry;
use reactive_ofp::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "reactive_ofp_controller", version, about = "Reactive OpenFlow 1.0 controller")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Address to accept switches on, overriding the configuration.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, value_enum)]
    barrier_mode: Option<BarrierMode>,
}

fn spawn_controller<P: ReactivePolicy + Send + 'static>(
    policy: P,
    registry: Registry,
    settings: ControllerSettings,
    events: Receiver<Event>,
    shutdown: Receiver<()>,
    alerts: Sender<OperatorAlert>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new().name("ofp-controller".to_string()).spawn(move || {
        Controller::new(policy, registry, settings, events, shutdown)
            .with_alerts(alerts)
            .run()
    })?;
    Ok(handle)
}

fn run(args: Args) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => {
            info!("Using config: {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.controller.listen = listen;
    }
    if let Some(mode) = args.barrier_mode {
        config.controller.barrier_mode = mode;
    }
    config.validate()?;

    let listener = TcpListener::bind(&config.controller.listen)
        .map_err(|e| Error::Other(format!("Failed to bind to {}: {}", config.controller.listen, e)))?;

    let registry = Registry::new();
    let (events_tx, events_rx) = unbounded();
    let (shutdown_tx, shutdown_rx) = bounded(1);
    let (alerts_tx, alerts_rx) = unbounded::<OperatorAlert>();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    thread::Builder::new()
        .name("operator-alerts".to_string())
        .spawn(move || {
            for alert in alerts_rx.iter() {
                warn!("operator alert from switch {:#x}: {}", alert.switch_id, alert.error);
            }
        })?;

    let settings = ControllerSettings {
        barrier_mode: config.controller.barrier_mode,
        tick: config.controller.tick(),
    };
    let base = config.static_policy();
    let controller = match config.nat {
        Some(ref nat) => {
            info!(
                "NAT {}:{}..={} for switch {:#x} port {}",
                nat.public_ip, nat.min_port, nat.max_port, nat.inside.switch, nat.inside.port
            );
            let policy = NatPolicy::new(nat, base)?;
            spawn_controller(policy, registry.clone(), settings, events_rx, shutdown_rx, alerts_tx)?
        }
        None => spawn_controller(base, registry.clone(), settings, events_rx, shutdown_rx, alerts_tx)?,
    };

    connection::listen(
        listener,
        config.controller.connection_settings(),
        registry,
        events_tx,
        running,
    )?;

    controller
        .join()
        .map_err(|_| Error::Other("controller thread panicked".to_string()))?;
    info!("Stopped");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
