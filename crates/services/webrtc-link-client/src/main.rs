//! Ground-control link client entry point
//!
//! Connects to a signaling server, pairs with one remote module and bridges
//! the control channel to stdin/stdout.
//!
//! # Usage
//!
//! ```bash
//! # Pair with drone-7 through a local signaling server
//! cargo run -p gcs-webrtc-link-client -- \
//!   --signaling-url ws://localhost:3000 \
//!   --target drone-7
//!
//! # Load settings from a TOML file, override the target
//! cargo run -p gcs-webrtc-link-client -- \
//!   --config ./link.toml \
//!   --target drone-9
//!
//! # Lossy uplink with a TURN relay
//! cargo run -p gcs-webrtc-link-client -- \
//!   --cellular \
//!   --turn turn:relay.example.net:3478,gcs,secret \
//!   --target drone-7
//! ```
//!
//! Lines typed on stdin are written to the control channel. A line starting
//! with `/custom ` goes to the secondary channel instead.

use bytes::Bytes;
use clap::Parser;
use gcs_webrtc_link::{
    LinkConfig, LinkEvent, SignalingChannel, TurnServerConfig, WebRtcLink,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC ground-control link client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "WEBRTC_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling server URL
    #[arg(long, env = "WEBRTC_LINK_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Remote module to pair with
    #[arg(short, long, env = "WEBRTC_LINK_TARGET")]
    target: Option<String>,

    /// Local id (generated when omitted)
    #[arg(long, env = "WEBRTC_LINK_GCS_ID")]
    gcs_id: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Vec<String>,

    /// TURN server as url,username,credential (repeatable)
    #[arg(long = "turn")]
    turn_servers: Vec<String>,

    /// Start from the cellular preset
    #[arg(long, default_value_t = false)]
    cellular: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, disconnecting...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("webrtc-link-client")
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args, shutdown_flag));
    // stdin reads run on a blocking thread that may never return
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = build_config(&args)?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gcs_id = %config.identity.gcs_id,
        target = %config.identity.target_drone_id,
        signaling_url = %config.signaling_url,
        "WebRTC link client starting"
    );

    let signaling = SignalingChannel::new(config.signaling.clone());
    signaling.connect(&config.signaling_url);

    let link = Arc::new(WebRtcLink::new(config, Arc::new(signaling.clone()))?);
    let mut events = link
        .take_event_receiver()
        .ok_or("link event stream already taken")?;
    link.connect_link();

    let stdin_task = tokio::spawn(forward_stdin(link.clone()));

    let mut stdout = std::io::stdout();
    let mut shutdown_poll = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::BytesReceived(data)) => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                Some(LinkEvent::StatusChanged(text)) => info!("{}", text),
                Some(LinkEvent::Connected) => info!("Link up"),
                Some(LinkEvent::VideoTrackReceived(id)) => info!("Remote video track {}", id),
                Some(LinkEvent::Disconnected) => warn!("Link down"),
                Some(LinkEvent::StatsUpdated(stats)) => info!("{}", stats),
                Some(LinkEvent::SystemInfo(system)) => info!("Remote system: {}", system),
                Some(LinkEvent::VideoMetrics(metrics)) => info!("Remote video: {}", metrics),
                Some(LinkEvent::VersionInfo(version)) if version.update_available => {
                    info!(
                        "Remote update available: {} -> {}",
                        version.current_version, version.latest_version
                    );
                }
                Some(LinkEvent::ChannelError { label, error }) => {
                    warn!("Channel {} error: {}", label, error);
                }
                Some(LinkEvent::Error(message)) => {
                    error!("{}", message);
                    break;
                }
                Some(_) => {}
                None => break,
            },
            _ = shutdown_poll.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    link.disconnect();
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    stdin_task.abort();
    let _ = stdin_task.await;
    drop(link);
    signaling.shutdown();

    info!("WebRTC link client stopped");
    Ok(())
}

/// File (or preset) first, then command-line overrides
fn build_config(args: &Args) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let mut config = match (&args.config, args.cellular) {
        (Some(path), _) => LinkConfig::from_file(path)?,
        (None, true) => LinkConfig::cellular_preset("", ""),
        (None, false) => LinkConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if let Some(target) = &args.target {
        config.identity.target_drone_id = target.clone();
    }
    if let Some(gcs_id) = &args.gcs_id {
        config.identity.gcs_id = gcs_id.clone();
    }
    if !args.stun_servers.is_empty() {
        config.identity.stun_servers = args.stun_servers.clone();
    }
    if !args.turn_servers.is_empty() {
        let turn_servers = args
            .turn_servers
            .iter()
            .map(|value| parse_turn(value))
            .collect::<Result<Vec<_>, _>>()?;
        config = config.with_turn_servers(turn_servers);
    }

    Ok(config)
}

fn parse_turn(value: &str) -> Result<TurnServerConfig, String> {
    let mut parts = value.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(url), Some(username), Some(credential)) => Ok(TurnServerConfig {
            url: url.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        }),
        _ => Err(format!(
            "TURN server must be url,username,credential, got {}",
            value
        )),
    }
}

async fn forward_stdin(link: Arc<WebRtcLink>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.strip_prefix("/custom ") {
                Some(message) => link.send_custom_message(message),
                None => link.write_bytes(Bytes::from(format!("{}\n", line))),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
