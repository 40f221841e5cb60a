//! chunkrep command line

use chunkrep::common::{
    ChunkId, ChunkKind, HealthConfig, IdentityFile, Override, PeerEntry, RepairConfig,
    ReplicationAuditLog, SigningIdentity,
};
use chunkrep::peer::{HttpPeerClient, PeerHealthTracker, StaticPeerDirectory};
use chunkrep::replication::{ReplicaLocator, Replicator, RunContext, RunSettings, StopSignal};
use chunkrep::storage::FsChunkStore;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chunkrep")]
#[command(about = "Replication repair for a content-addressed chunk store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct RepairArgs {
    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the local chunk store
    #[arg(long)]
    chunk_root: Option<PathBuf>,

    /// Identity file used to sign pushes
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Passphrase for the identity file
    #[arg(long)]
    passphrase: Option<String>,

    /// Progress snapshot (JSON)
    #[arg(long)]
    progress_file: Option<PathBuf>,

    /// Per-peer push failures (CSV, must not exist)
    #[arg(long)]
    exception_file: Option<PathBuf>,

    /// Chunks left under-replicated (CSV, must not exist)
    #[arg(long)]
    failure_file: Option<PathBuf>,

    /// Known peer
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Only use this peer (repeatable; target becomes the set size)
    #[arg(long = "use")]
    use_peers: Vec<String>,

    /// Never use this peer
    #[arg(long = "ban")]
    ban_peers: Vec<String>,

    /// Additional data chunk directory
    #[arg(long = "extra-data-dir")]
    extra_data_dirs: Vec<PathBuf>,

    /// Overrides of the form use:<peer>, ban:<peer> or data:<dir>
    overrides: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the local store and repair under-replicated chunks
    Repair(RepairArgs),

    /// Show which peers hold a chunk
    Locate {
        /// Chunk hash (hex)
        #[arg(long)]
        hash: String,

        /// Look up a meta chunk instead of a data chunk
        #[arg(long)]
        meta: bool,

        /// Peer to ask
        #[arg(long = "peer", required = true)]
        peers: Vec<String>,

        /// Per-query timeout
        #[arg(long, default_value = "10s")]
        timeout: String,
    },

    /// Create an identity file
    Identity {
        #[arg(long)]
        user: String,

        #[arg(long)]
        passphrase: String,

        /// Output path (must not exist)
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Print the error and the subcommand usage, then exit 1
fn startup_failure(subcommand: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("error: {}", error);
    eprintln!();
    let mut cmd = Cli::command();
    if let Some(sub) = cmd.find_subcommand_mut(subcommand) {
        let _ = sub.print_help();
    }
    std::process::exit(1);
}

fn resolve_config(args: RepairArgs) -> chunkrep::Result<RepairConfig> {
    let mut config = RepairConfig::load(args.config.as_deref())?;

    if let Some(root) = args.chunk_root {
        config.chunk_root = root;
    }
    if args.identity.is_some() {
        config.identity_file = args.identity;
    }
    if args.passphrase.is_some() {
        config.passphrase = args.passphrase;
    }
    if args.progress_file.is_some() {
        config.progress_file = args.progress_file;
    }
    if args.exception_file.is_some() {
        config.exception_file = args.exception_file;
    }
    if args.failure_file.is_some() {
        config.failure_file = args.failure_file;
    }
    config.peers.extend(args.peers.into_iter().map(PeerEntry::new));
    config.use_peers.extend(args.use_peers);
    config.ban_peers.extend(args.ban_peers);
    config.extra_data_dirs.extend(args.extra_data_dirs);
    for raw in &args.overrides {
        config.apply_override(Override::parse(raw)?);
    }

    config.validate()?;
    Ok(config)
}

struct Prepared {
    ctx: Arc<RunContext>,
    client: Arc<HttpPeerClient>,
    directory: Arc<StaticPeerDirectory>,
    probe_timeout: Duration,
    probe_interval: Duration,
}

async fn prepare(config: &RepairConfig) -> chunkrep::Result<Prepared> {
    let missing = |what: &str| chunkrep::Error::InvalidConfig(format!("{} is required", what));

    let identity_path = config.identity_file.as_ref().ok_or_else(|| missing("identity file"))?;
    let passphrase = config.passphrase.as_deref().ok_or_else(|| missing("passphrase"))?;
    let identity = SigningIdentity::open(identity_path, passphrase)?;

    let store = FsChunkStore::open(&config.chunk_root, &config.extra_data_dirs)?;

    let exception_file = config.exception_file.as_ref().ok_or_else(|| missing("exception file"))?;
    let failure_file = config.failure_file.as_ref().ok_or_else(|| missing("failure file"))?;
    let audit = ReplicationAuditLog::create(exception_file, failure_file)?;

    let replication = &config.replication;
    let client = Arc::new(HttpPeerClient::new(replication.push_timeout())?);
    let directory = Arc::new(StaticPeerDirectory::new(&config.effective_peers()));

    let online = directory.probe(client.as_ref(), replication.query_timeout()).await;
    tracing::info!(
        "{} of {} peers online",
        online,
        config.effective_peers().len()
    );

    let ctx = RunContext::new(
        Arc::new(store),
        client.clone(),
        directory.clone(),
        identity,
        audit,
        RunSettings::from_config(config),
    );

    Ok(Prepared {
        ctx: Arc::new(ctx),
        client,
        directory,
        probe_timeout: replication.query_timeout(),
        probe_interval: replication.progress_interval() * 3,
    })
}

async fn repair(args: RepairArgs) -> anyhow::Result<()> {
    let config = match resolve_config(args) {
        Ok(config) => config,
        Err(e) if e.is_startup() => startup_failure("repair", e),
        Err(e) => return Err(e.into()),
    };
    init_tracing(&config.log_level);
    tracing::info!("chunkrep {} starting", chunkrep::VERSION);

    let prepared = match prepare(&config).await {
        Ok(prepared) => prepared,
        Err(e) if e.is_startup() => startup_failure("repair", e),
        Err(e) => return Err(e.into()),
    };
    let ctx = prepared.ctx;

    let stop = ctx.stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing queued work");
            stop.stop();
        }
    });

    let probe_done = StopSignal::new();
    let prober = {
        let done = probe_done.clone();
        let client = prepared.client;
        let directory = prepared.directory;
        let (interval, timeout) = (prepared.probe_interval, prepared.probe_timeout);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        directory.probe(client.as_ref(), timeout).await;
                    }
                    _ = done.stopped() => break,
                }
            }
        })
    };

    let report = Replicator::new().run(ctx).await?;
    probe_done.stop();
    let _ = prober.await;

    let stats = &report.stats;
    println!("Replication report:");
    println!("  Data chunks processed: {}/{}", stats.data_processed, stats.data_total);
    println!("  Meta chunks processed: {}/{}", stats.meta_processed, stats.meta_total);
    println!("  Zero replicas: {}", stats.zero_replicas);
    println!("  Under-replicated: {}", stats.under_replicated);
    println!("  Chunks injected: {}", stats.chunks_injected);
    println!(
        "  Bytes injected: {}",
        chunkrep::common::format_bytes(stats.bytes_injected)
    );
    println!("  Push failures: {}", stats.push_failures);
    println!("  Still under-replicated: {}", stats.still_under_replicated);
    println!("  Local read anomalies: {}", stats.local_read_anomalies);
    if report.stopped {
        println!("  Stopped before the scan completed");
    }
    Ok(())
}

async fn locate(hash: &str, meta: bool, peers: Vec<String>, timeout: &str) -> anyhow::Result<()> {
    init_tracing("warn");

    let id = match ChunkId::from_hex(hash, 0) {
        Ok(id) => id,
        Err(e) => startup_failure("locate", e),
    };
    let timeout = match chunkrep::common::parse_duration(timeout) {
        Ok(t) => t,
        Err(e) => startup_failure("locate", e),
    };
    let kind = if meta { ChunkKind::Meta } else { ChunkKind::Data };

    let client = Arc::new(HttpPeerClient::new(timeout)?);
    let health = Arc::new(PeerHealthTracker::new(HealthConfig::default()));
    let locator = ReplicaLocator::new(client, health.clone(), peers.len(), timeout);
    let mut located = locator.locate(&id, kind, &peers).await;
    located.have.sort();
    located.lack.sort();

    println!("{} chunk {}:", kind, id);
    for peer in &located.have {
        println!("  has:     {}", peer);
    }
    for peer in &located.lack {
        println!("  missing: {}", peer);
    }
    for peer in &peers {
        if !located.have.contains(peer) && !located.lack.contains(peer) {
            println!("  error:   {}", peer);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Repair(args) => repair(args).await?,

        Commands::Locate {
            hash,
            meta,
            peers,
            timeout,
        } => locate(&hash, meta, peers, &timeout).await?,

        Commands::Identity {
            user,
            passphrase,
            out,
        } => {
            init_tracing("info");
            let identity = match IdentityFile::generate(&user, &passphrase) {
                Ok(identity) => identity,
                Err(e) => startup_failure("identity", e),
            };
            if let Err(e) = identity.save(&out) {
                startup_failure("identity", e);
            }
            println!("Wrote identity for {} to {}", user, out.display());
        }
    }

    Ok(())
}
