use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use lenscap::api::feed::{run_drain, LiveFeed};
use lenscap::api::routes;
use lenscap::api::state::AppState;
use lenscap::capture::controller::CaptureController;
use lenscap::capture::delivery::PacketStore;
use lenscap::capture::drain::DrainScheduler;
use lenscap::capture::local::LocalAddresses;
use lenscap::capture::pipeline::FramePipeline;
use lenscap::capture::queue::IngestQueue;
use lenscap::capture::source::PcapOpener;
use lenscap::models::config::{
    AppConfig, CaptureOptions, QueuePolicy, DEFAULT_DRAIN_CAP, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_SNAPLEN, DEFAULT_TICK_MS,
};
use lenscap::models::interface::list_interfaces;
use lenscap::models::stats::CaptureStats;
use lenscap::storage::sink::{JsonlSink, NullSink, PersistenceSink};
use lenscap::utils::clock::SystemClock;
use lenscap::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Live packet capture with ownership tagging and anomaly flagging")]
struct Args {
    /// Network interface to capture from
    #[clap(short, long)]
    interface: Option<String>,

    /// Port for the REST API server
    #[clap(short, long, default_value = "3000")]
    port: u16,

    /// Disable promiscuous mode
    #[clap(long)]
    no_promisc: bool,

    /// Bytes captured per frame
    #[clap(long, default_value_t = DEFAULT_SNAPLEN)]
    snaplen: i32,

    /// Read timeout in milliseconds
    #[clap(long, default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    timeout: i32,

    /// BPF filter expression
    #[clap(long)]
    filter: Option<String>,

    /// Most records delivered per drain tick
    #[clap(long, default_value_t = DEFAULT_DRAIN_CAP)]
    drain_cap: usize,

    /// Drain tick interval in milliseconds
    #[clap(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// Queued records kept before the oldest are dropped (0 for unbounded)
    #[clap(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Delivered packets kept for the API before the oldest go (0 keeps all)
    #[clap(long, default_value_t = 0)]
    retain: usize,

    /// Append suspicious packets to this JSON lines file
    #[clap(long)]
    anomaly_log: Option<PathBuf>,

    /// Start capturing as soon as the server is up
    #[clap(long)]
    autostart: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Print the available interfaces and exit
    #[clap(long)]
    list_interfaces: bool,
}

impl Args {
    fn to_config(&self) -> AppConfig {
        AppConfig {
            interface: self.interface.clone(),
            port: self.port,
            capture: CaptureOptions {
                snaplen: self.snaplen,
                promiscuous: !self.no_promisc,
                timeout_ms: self.timeout,
                bpf_filter: self.filter.clone(),
            },
            drain_cap: self.drain_cap,
            tick_ms: self.tick_ms,
            queue_policy: match self.queue_capacity {
                0 => QueuePolicy::Unbounded,
                capacity => QueuePolicy::DropOldest(capacity),
            },
            anomaly_log: self.anomaly_log.clone(),
            retain: match self.retain {
                0 => None,
                limit => Some(limit),
            },
        }
    }
}

fn open_sink(config: &AppConfig) -> Result<Arc<dyn PersistenceSink>> {
    match &config.anomaly_log {
        Some(path) => {
            let sink = JsonlSink::open(path)
                .with_context(|| format!("cannot open anomaly log {}", path.display()))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(NullSink)),
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_logger(logging::get_log_level(&args.log_level));

    if args.list_interfaces {
        for iface in list_interfaces() {
            println!(
                "{}\t{}\t{}",
                iface.device_name,
                iface.ipv4_address.as_deref().unwrap_or("-"),
                iface.display_name()
            );
        }
        return Ok(());
    }

    info!("Starting lenscap v{}", env!("CARGO_PKG_VERSION"));
    let config = args.to_config();

    let local = Arc::new(LocalAddresses::from_system());
    info!(
        "Local address snapshot: {} addresses, {} MACs",
        local.ip_count(),
        local.mac_count()
    );

    let stats = Arc::new(CaptureStats::new());
    let pipeline = Arc::new(FramePipeline::new(local, open_sink(&config)?, stats));
    let queue = Arc::new(IngestQueue::new(config.queue_policy));
    let controller = Arc::new(CaptureController::new(
        Arc::new(PcapOpener),
        config.capture.clone(),
        pipeline,
        queue.clone(),
    ));

    let store = match config.retain {
        Some(limit) => PacketStore::with_retention(limit),
        None => PacketStore::new(),
    };
    let store = Arc::new(RwLock::new(store));
    let feed = LiveFeed::new(store.clone());
    let batches = feed.sender();
    let scheduler = DrainScheduler::new(queue, config.drain_cap, Arc::new(SystemClock));
    let drain_task = actix_web::rt::spawn(run_drain(scheduler, feed, config.tick_interval()));

    let app_state = web::Data::new(AppState {
        controller: controller.clone(),
        store,
        batches,
        interface: config.interface.clone(),
    });

    if args.autostart {
        match app_state.resolve_interface(None) {
            Some(interface) => {
                if let Err(e) = controller.start(&interface) {
                    error!("Autostart failed: {}", e);
                }
            }
            None => warn!("Autostart requested but no interface is available"),
        }
    }

    info!("Starting lenscap API server on port {}", config.port);

    let server_state = app_state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .configure(routes::configure)
    })
    .bind(format!("127.0.0.1:{}", config.port))?
    .run()
    .await?;

    info!("Shutting down");
    controller.stop();
    drain_task.abort();
    let controller_for_join = controller.clone();
    if let Err(e) = web::block(move || controller_for_join.join_worker()).await {
        warn!("Failed to join capture worker: {}", e);
    }

    Ok(())
}
