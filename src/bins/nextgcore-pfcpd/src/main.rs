//! NextGCore PFCP agent
//!
//! Runs one PFCP endpoint, as control plane or user plane, on a UDP socket:
//! associates with the configured peers, keeps the associations alive with
//! heartbeats and, on the user plane side, serves session requests.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ogs_app::OgsAppConfig;
use ogs_core::{ogs_log_init, ogs_log_level_from_str};
use ogs_pfcp::{ntp_time_now, PfcpContext, PfcpEvent, PfcpSelfConf, UdpTransport};

/// Upper bound on one wait, so the shutdown flag is seen promptly
const MAX_POLL_WAIT: Duration = Duration::from_millis(200);

const MAX_DATAGRAM: usize = 8192;

/// NextGCore PFCP agent
#[derive(Parser, Debug)]
#[command(name = "nextgcore-pfcpd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PFCP association and session engine", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "/etc/nextgcore/pfcpd.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides logger.level
    #[arg(short = 'e', long)]
    log_level: Option<String>,

    /// Disable color output
    #[arg(short = 'm', long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = OgsAppConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logger.level);
    ogs_log_init(ogs_log_level_from_str(level), !args.no_color);

    log::info!("NextGCore PFCP agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let conf = PfcpSelfConf::from_app_config(&config, ntp_time_now());
    let bind_addr = conf
        .addr4
        .or(conf.addr6)
        .context("No PFCP server address")?;
    log::info!("PFCP role {:?}", conf.role);

    let transport = UdpTransport::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind PFCP socket {}", bind_addr))?;
    let mut ctx = PfcpContext::new(conf, transport, Instant::now());

    for client in &config.pfcp.client {
        let addr = client.socket_addr();
        let node = ctx
            .node_add(addr, true)
            .with_context(|| format!("Failed to add PFCP peer {}", addr))?;
        ctx.node_start(node);
        log::info!("PFCP peer {} added", addr);
    }

    log::info!("NextGCore PFCP agent ready");

    run_event_loop(&mut ctx, shutdown).await?;

    log::info!("NextGCore PFCP agent terminated");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    Ok(())
}

async fn run_event_loop(
    ctx: &mut PfcpContext<UdpTransport>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let socket = ctx.transport().socket();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    log::debug!("Entering event loop");
    ctx.transport_mut().flush().await;

    while !shutdown.load(Ordering::SeqCst) {
        let wait = ctx
            .next_timeout(Instant::now())
            .map_or(MAX_POLL_WAIT, |d| d.min(MAX_POLL_WAIT));

        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => ctx.receive(Instant::now(), from, &buf[..len]),
                Err(e) => log::warn!("PFCP recv failed: {}", e),
            },
            _ = tokio::time::sleep(wait) => {}
        }

        ctx.tick(Instant::now());
        ctx.transport_mut().flush().await;

        while let Some(event) = ctx.poll_event() {
            log_event(&event);
        }
    }

    Ok(())
}

fn log_event(event: &PfcpEvent) {
    match event {
        PfcpEvent::NodeAssociated { addr, .. } => log::info!("PFCP associated [{}]", addr),
        PfcpEvent::NodeException { addr, .. } => log::warn!("PFCP association lost [{}]", addr),
        PfcpEvent::NodeRestoration { addr, .. } => log::warn!("PFCP peer restarted [{}]", addr),
        PfcpEvent::SessionEstablished { local_seid, cause, .. }
        | PfcpEvent::SessionModified { local_seid, cause, .. } => log::info!(
            "{} SEID[0x{:x}] [{}]",
            event.name(),
            local_seid,
            cause.name()
        ),
        PfcpEvent::SessionDeleted { local_seid, cause, usage_reports } => log::info!(
            "{} SEID[0x{:x}] [{}] {} usage report(s)",
            event.name(),
            local_seid,
            cause.name(),
            usage_reports.len()
        ),
        PfcpEvent::SessionReport { local_seid, report, .. } => log::info!(
            "{} SEID[0x{:x}] type 0x{:x}",
            event.name(),
            local_seid,
            report.report_type.0
        ),
        PfcpEvent::XactTimeout { message_type, .. } => {
            log::warn!("{} [{}]", event.name(), message_type)
        }
    }
}
