use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use brikke_config::BrikkeConfig;
use brikke_identity::allocator::AllocatorConfig;
use brikke_identity::checkpoint::CheckpointStore;
use brikke_identity::model::{IdentityMap, LabelSet, NumericIdentity};
use brikke_identity::owner::{
    AllocatorOwner, IdentityAllocatorOwner, IdentityChangeHandler, PolicyTrigger,
};
use brikke_identity::sync::CompletionGuard;
use brikke_identity::IdentityAllocator;
use brikke_telemetry::metrics::MetricsRecorder;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive randomized allocate/release traffic through a wired allocator
    Soak(SoakArgs),
    /// Decode and print an identity checkpoint file
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SoakArgs {
    /// Optional configuration file; defaults to the standard hierarchy.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Number of allocate/release operations to drive
    #[arg(long, default_value_t = 1000)]
    pub events: usize,
    /// Number of distinct label sets in the workload
    #[arg(long, default_value_t = 32)]
    pub cardinality: u32,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Path to the checkpoint file
    pub path: PathBuf,
}

/// Stand-in consumer logging each batch it observes.
struct LoggingHandler {
    name: &'static str,
}

impl IdentityChangeHandler for LoggingHandler {
    fn update_identities(&self, added: &IdentityMap, deleted: &IdentityMap, done: CompletionGuard) {
        debug!(
            "{} observed batch: {} added, {} deleted",
            self.name,
            added.len(),
            deleted.len()
        );
        done.complete();
    }
}

/// Stand-in policy subsystem counting recomputation requests.
#[derive(Default)]
struct CountingTrigger {
    requests: AtomicUsize,
}

impl PolicyTrigger for CountingTrigger {
    fn trigger_policy_updates(&self, force: bool, reason: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        debug!("Policy recomputation requested (force={force}): {reason}");
    }
}

pub async fn run_soak_mode(args: SoakArgs, metrics: MetricsRecorder) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => BrikkeConfig::load_from_path(path)?,
        None => BrikkeConfig::load()?,
    };
    info!(
        "Starting soak: {} events over {} label sets (seed {})",
        args.events, args.cardinality, args.seed
    );

    let trigger = Arc::new(CountingTrigger::default());
    let owner: Arc<dyn AllocatorOwner> = Arc::new(IdentityAllocatorOwner::new(
        vec![
            Arc::new(LoggingHandler {
                name: "endpoint-updater",
            }),
            Arc::new(LoggingHandler {
                name: "node-manager",
            }),
        ],
        Arc::new(LoggingHandler {
            name: "selector-cache",
        }),
        trigger.clone(),
        config.identity.cluster.node_address,
    ));

    let metrics = Arc::new(metrics);
    let allocator = IdentityAllocator::new(
        config.identity.network_policy_enabled,
        owner,
        AllocatorConfig {
            cluster_allocation: config.identity.cluster.enabled,
            operator_manages_identities: config.identity.operator_manages_identities,
            local_identity_capacity: config.identity.local_identity_capacity,
            save_on_change: config.identity.checkpoint.save_on_change,
        },
        metrics.clone(),
    );
    allocator.enable_checkpointing(CheckpointStore::new(&config.identity.checkpoint.directory));

    // Agent startup order: restore holds, let consumers re-allocate, then
    // drop the holds. The soak has no long-lived consumers, so the holds
    // drop immediately.
    match allocator.restore_local_identities() {
        Ok(restored) => info!("Restored {} identities", restored.len()),
        Err(e) => warn!("Identity restoration degraded: {e}"),
    }
    allocator.release_restored_identities();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut live: Vec<NumericIdentity> = Vec::new();
    for _ in 0..args.events {
        if live.is_empty() || rng.random_bool(0.6) {
            let labels = LabelSet::new([format!(
                "app=svc-{}",
                rng.random_range(0..args.cardinality)
            )]);
            match allocator.allocate(&labels) {
                Ok(identity) => live.push(identity.numeric),
                Err(e) => warn!("Allocation failed for {labels}: {e}"),
            }
        } else {
            let numeric = live.swap_remove(rng.random_range(0..live.len()));
            if let Err(e) = allocator.release(numeric) {
                warn!("Release failed for {numeric}: {e}");
            }
        }
    }
    for numeric in live.drain(..) {
        if let Err(e) = allocator.release(numeric) {
            warn!("Release failed for {numeric}: {e}");
        }
    }
    allocator.close();

    info!(
        "Soak complete: {} policy recomputation requests",
        trigger.requests.load(Ordering::Relaxed)
    );
    println!("{}", metrics.gather_metrics()?);
    Ok(())
}

pub fn run_inspect_mode(args: InspectArgs) -> anyhow::Result<()> {
    let records = CheckpointStore::read_records(&args.path)?;
    println!("{} identities in {}", records.len(), args.path.display());
    for record in records {
        println!("{:>10}  {}", record.numeric, record.labels.join(","));
    }
    Ok(())
}
