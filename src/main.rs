use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use ferrokv::config::{Config, ServerArgs};
use ferrokv::metrics::Metrics;
use ferrokv::replication::{Master, Slave, SlaveConfig};
use ferrokv::server::{MetricsServer, TcpServer, TcpServerConfig};
use ferrokv::storage::{Orchestrator, Role};
use ferrokv::store::Engine;
use ferrokv::wal::{read_buffer_for, SegmentFsys, WalCoordinator, WalCoordinatorConfig};
use ferrokv::Result;

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &config.logging.output {
        Some(path) => {
            let path = path.clone();
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| panic!("could not open log output {path}: {e}"));
            BoxMakeWriter::new(move || file.try_clone().expect("clone log file handle"))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let config = Config::load(&args)?;

    init_logging(&config);
    info!("starting ferrokv v{}", ferrokv::VERSION);
    info!(address = %config.network.address, role = ?config.replication.replica_type, "configuration loaded");

    let engine = Arc::new(Engine::new(config.engine.num_partitions));
    let metrics = Arc::new(Metrics::new()?);

    let max_batch_bytes = config.wal.batch_bytes()?;
    let max_segment_bytes = config.wal.max_segment_bytes()?;
    let wal_config = WalCoordinatorConfig {
        dir: config.wal.directory.clone().into(),
        prefix: config.wal.file_name_prefix.clone(),
        batch_timeout: config.wal.batch_timeout(),
        max_batch_bytes,
        // Derived from the configured batch/segment thresholds, not the
        // struct default: a flush's actual segment size tracks whichever of
        // those is larger, and the read cap must clear it with headroom.
        read_buffer: read_buffer_for(max_batch_bytes.max(max_segment_bytes)),
        ack_mode: Default::default(),
    };

    let (wal, recovered) = if config.wal.enabled {
        let recovered = WalCoordinator::recover(&wal_config)?;
        let wal = Arc::new(WalCoordinator::start_with_metrics(
            wal_config,
            Some(Arc::clone(&metrics)),
        )?);
        info!(recovered = recovered.len(), "WAL recovered and coordinator started");
        (Some(wal), Some(recovered))
    } else {
        (None, None)
    };

    let role = config.replication.replica_type.map(|t| match t {
        ferrokv::config::ReplicaType::Master => Role::Master,
        ferrokv::config::ReplicaType::Slave => Role::Slave,
    });

    let replay_rx = match role {
        Some(Role::Slave) => {
            let master_addr = config
                .replication
                .master_address
                .clone()
                .expect("slave role requires replication.master_address");
            let slave = Slave::start_with_metrics(
                SlaveConfig {
                    dir: config.wal.directory.clone().into(),
                    prefix: config.wal.file_name_prefix.clone(),
                    master_addr,
                    interval: config.replication.sync_interval(),
                    max_message_size: config.network.max_message_bytes()?,
                    max_batch_bytes: config.wal.batch_bytes()?,
                },
                Some(Arc::clone(&metrics)),
            )?;
            Some(slave.into_receiver())
        }
        _ => None,
    };

    let orchestrator = Orchestrator::new(Arc::clone(&engine), wal.clone(), role, replay_rx, recovered)?;

    if role == Some(Role::Master) {
        let fsys = SegmentFsys::new(config.wal.directory.as_str(), config.wal.file_name_prefix.as_str())?;
        let master = Arc::new(Master::new(fsys, config.network.max_message_bytes()?));
        let listen_address = config.replication.listen_address.clone();
        tokio::spawn(async move {
            if let Err(e) = master.serve(&listen_address).await {
                error!("replication master stopped: {e}");
            }
        });
    }

    let tcp_config = TcpServerConfig {
        address: config.network.address.clone(),
        max_connections: config.network.max_connections,
        max_message_size: config.network.max_message_bytes()?,
        idle_timeout: config.network.idle_timeout(),
    };
    let tcp_server = Arc::new(TcpServer::new(tcp_config, orchestrator, Arc::clone(&metrics)));

    let server_handle = tokio::spawn(async move {
        if let Err(e) = tcp_server.serve().await {
            error!("connection server stopped: {e}");
        }
    });

    let metrics_handle = tokio::spawn(async move {
        let metrics_server = MetricsServer::new(metrics, "127.0.0.1:9090");
        if let Err(e) = metrics_server.serve().await {
            warn!("metrics server stopped: {e}");
        }
    });

    info!("ferrokv ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = server_handle => {
            error!("connection server task exited unexpectedly");
        }
    }

    metrics_handle.abort();
    info!("ferrokv shutting down");
    Ok(())
}
