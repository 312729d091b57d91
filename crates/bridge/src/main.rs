//! spi-bridge
//!
//! Keeps a connection to a USB-to-SPI bridge across plug, unplug and
//! permission prompts, and optionally runs one transfer each time the
//! bridge connects.

use anyhow::{Context, Result, ensure};
use async_channel::Receiver;
use bridge::usb::{HotplugWatcher, ProbePermissionBroker, UsbEnumerator};
use bridge::{
    BridgeConfig, ChannelObserver, DeviceSession, EventDispatcher, SessionEvent, spawn_dispatcher,
};
use clap::Parser;
use common::{ConnectionState, DeviceIdentity, TransferJob, create_event_bridge, setup_logging};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

type BridgeSession = DeviceSession<UsbEnumerator, ProbePermissionBroker>;

#[derive(Parser, Debug)]
#[command(name = "spi-bridge")]
#[command(
    author,
    version,
    about = "USB-to-SPI bridge connection manager"
)]
#[command(long_about = "
Connects to an MCP2210 (or configured) USB-to-SPI bridge, follows it
through hot-plug and permission changes, and reports the connection state.

EXAMPLES:
    # Watch for the bridge and report connection changes
    spi-bridge

    # List USB devices and exit
    spi-bridge --list-devices

    # Send a request every time the bridge connects
    spi-bridge --send 4200 --response-len 64

    # Run with debug logging
    spi-bridge --log-level debug

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/spi-bridge/bridge.toml
    3. /etc/spi-bridge/bridge.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Hex-encoded request to transfer whenever the bridge connects
    #[arg(long, value_name = "HEX")]
    send: Option<String>,

    /// Response buffer size for --send
    #[arg(long, value_name = "N", default_value_t = 64)]
    response_len: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.bridge.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("spi-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    ensure!(
        args.response_len <= config.transfer.buffer_size,
        "--response-len {} exceeds the {}-byte transfer buffer",
        args.response_len,
        config.transfer.buffer_size
    );

    let job = args
        .send
        .as_deref()
        .map(|payload| {
            hex::decode(payload.trim())
                .map(|request| TransferJob::new(request, args.response_len))
                .with_context(|| format!("Invalid hex payload: {}", payload))
        })
        .transpose()?;

    let target = config.identity()?;
    let context = rusb::Context::new().context("Failed to initialize libusb")?;
    let enumerator = UsbEnumerator::new(context.clone(), config.usb_settings());

    if args.list_devices {
        return list_devices_mode(&enumerator, target);
    }

    let (sink, source) = create_event_bridge();
    let broker = ProbePermissionBroker::new(
        context.clone(),
        sink.clone(),
        config.permission_probe_delay(),
    );
    let (observer, session_events) = ChannelObserver::channel();

    let session: Arc<BridgeSession> = Arc::new(
        DeviceSession::new(target, enumerator, broker)
            .with_observer(Arc::new(observer))
            .with_buffer_size(config.transfer.buffer_size),
    );

    let reporter = tokio::spawn(report_session_events(
        session_events,
        Arc::clone(&session),
        job,
    ));

    // Dispatching opens devices, so libusb work stays off the runtime threads
    let dispatcher = EventDispatcher::new(Arc::clone(&session));
    let dispatcher_thread = spawn_dispatcher(dispatcher.clone(), source)
        .context("Failed to spawn event dispatcher thread")?;
    let shutdown_sink = sink.clone();

    let watcher = match HotplugWatcher::spawn(context, target, sink) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(
                "Hot-plug notifications unavailable ({}), only the startup scan will connect",
                e
            );
            None
        }
    };

    let initial = tokio::task::spawn_blocking(move || dispatcher.start())
        .await
        .context("Initial device scan panicked")?;
    info!(model = %target, state = %initial, "Watching for bridge device");

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    shutdown_sink.close();
    if let Err(e) = dispatcher_thread.join() {
        error!("Event dispatcher thread panicked: {:?}", e);
    }
    session.on_detach();
    reporter.abort();

    Ok(())
}

/// List USB devices and exit
fn list_devices_mode(enumerator: &UsbEnumerator, target: DeviceIdentity) -> Result<()> {
    info!("Listing USB devices...");

    let devices = enumerator
        .list_detailed()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let marker = if device.instance.matches(target) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {} - {} {}",
            marker,
            device.instance.identity,
            device
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03}",
            device.instance.bus, device.instance.address
        );
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
        println!();
    }

    Ok(())
}

/// Print session status and run the configured transfer on each connect
async fn report_session_events(
    events: Receiver<SessionEvent>,
    session: Arc<BridgeSession>,
    job: Option<TransferJob>,
) {
    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged { to, .. } => {
                println!("Bridge {}", to);
                if to == ConnectionState::Connected
                    && let Some(job) = &job
                {
                    run_transfer(Arc::clone(&session), job.clone()).await;
                }
            }
            SessionEvent::PermissionRequested(request) => {
                println!("Waiting for USB permission on {}", request.device);
            }
            SessionEvent::PermissionDiscarded(_) | SessionEvent::TransferFailed(_) => {}
        }
    }
}

async fn run_transfer(session: Arc<BridgeSession>, job: TransferJob) {
    // Transfers block on USB I/O
    match tokio::task::spawn_blocking(move || session.transfer(&job)).await {
        Ok(Ok(response)) => println!("Response: {}", hex::encode(response)),
        Ok(Err(e)) => error!("Transfer failed: {}", e),
        Err(e) => error!("Transfer task panicked: {:?}", e),
    }
}
