//! Reservoir simulator - runs a randomized order workload against the
//! in-memory cache and store, then checks that nothing was oversold.
//!
//! Each simulated order picks a resource and a quantity and then follows one
//! lifecycle:
//!
//! - pay directly (available → consumed)
//! - reserve, then pay (available → pre-locked → consumed)
//! - reserve, then cancel (available → pre-locked → available)
//! - reserve, then abandon the transaction (rolled back)
//! - restock (→ available)
//!
//! # Usage
//!
//! ```bash
//! reservoir-sim --resources 4 --workers 16 --orders 200
//! RUST_LOG=reservoir=debug reservoir-sim --config reservoir.toml
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reservoir::DurableRecord;
use reservoir::InMemoryResourceStore;
use reservoir::ReservationUpdater;
use reservoir::ReservoirConfig;
use reservoir::ResourceError;
use reservoir::UpdateResourceParam;
use reservoir_core::DeterministicKeyValueStore;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

type Updater = ReservationUpdater<DeterministicKeyValueStore, InMemoryResourceStore>;

#[derive(Parser, Debug)]
#[command(name = "reservoir-sim")]
#[command(about = "Randomized order workload with an oversell check")]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "RESERVOIR_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Number of resources to seed.
    #[arg(long, default_value_t = 4)]
    resources: u32,

    /// Initial available units per resource.
    #[arg(long, default_value_t = 100)]
    stock: u64,

    /// Concurrent workers.
    #[arg(long, default_value_t = 16)]
    workers: u32,

    /// Orders per worker.
    #[arg(long, default_value_t = 100)]
    orders: u32,

    /// Largest quantity in one order.
    #[arg(long, default_value_t = 5)]
    max_quantity: u32,

    /// Seed for the workload generator.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// Outcome counters and per-resource unit flows.
#[derive(Debug, Default)]
struct Tally {
    committed: u64,
    retryable: u64,
    fatal: u64,
    consumed: BTreeMap<String, u64>,
    restocked: BTreeMap<String, u64>,
}

impl Tally {
    fn record(&mut self, outcome: Result<Flow, ResourceError>) {
        match outcome {
            Ok(flow) => {
                self.committed += 1;
                match flow {
                    Flow::Consumed(id, num) => *self.consumed.entry(id).or_default() += u64::from(num),
                    Flow::Restocked(id, num) => *self.restocked.entry(id).or_default() += u64::from(num),
                    Flow::Neutral => {}
                }
            }
            Err(e) if e.is_retryable() => self.retryable += 1,
            Err(e) => {
                warn!(error = %e, "order failed");
                self.fatal += 1;
            }
        }
    }
}

/// Net effect of one committed order on the units in the system.
enum Flow {
    Consumed(String, u32),
    Restocked(String, u32),
    Neutral,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = ReservoirConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    info!(?config, "configuration loaded");

    let store = InMemoryResourceStore::new();
    let resource_ids: Vec<String> = (0..args.resources).map(|i| format!("sku-{i}")).collect();
    for id in &resource_ids {
        store.insert(DurableRecord::new(id.clone(), args.stock, 0));
    }

    let updater: Updater = ReservationUpdater::with_stores(DeterministicKeyValueStore::new(), Arc::clone(&store), config);
    let tally = Arc::new(Mutex::new(Tally::default()));

    let mut workers = JoinSet::new();
    for worker in 0..args.workers {
        let updater = updater.clone();
        let tally = Arc::clone(&tally);
        let resource_ids = resource_ids.clone();
        let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(u64::from(worker)));
        let orders = args.orders;
        let max_quantity = args.max_quantity.max(1);

        workers.spawn(async move {
            for _ in 0..orders {
                let id = resource_ids[rng.random_range(0..resource_ids.len())].clone();
                let num = rng.random_range(1..=max_quantity);
                let lifecycle = rng.random_range(0..10u8);
                let outcome = run_order(&updater, lifecycle, id, num).await;
                tally.lock().record(outcome);
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        joined.context("worker panicked")?;
    }

    let tally = std::mem::take(&mut *tally.lock());
    info!(
        committed = tally.committed,
        retryable = tally.retryable,
        fatal = tally.fatal,
        "workload finished"
    );

    let mut violations = 0;
    for id in &resource_ids {
        let record = store.get(id).with_context(|| format!("resource {id} vanished from store"))?;
        let consumed = tally.consumed.get(id).copied().unwrap_or(0);
        let restocked = tally.restocked.get(id).copied().unwrap_or(0);
        let cached = updater.basic().read_cached(id).await?;

        println!(
            "{id}: available={} pre_locked={} consumed={consumed} restocked={restocked} cached={:?}/{:?}",
            record.available, record.pre_locked, cached.available, cached.pre_locked
        );

        if record.available + record.pre_locked + consumed != args.stock + restocked {
            warn!(resource_id = %id, "unit balance does not add up");
            violations += 1;
        }
    }

    if violations > 0 {
        bail!("{violations} resources violated the unit balance");
    }
    println!("no oversell: every unit is accounted for");
    Ok(())
}

async fn run_order(updater: &Updater, lifecycle: u8, id: String, num: u32) -> Result<Flow, ResourceError> {
    let params = || vec![UpdateResourceParam::new(id.clone(), num)];
    let mut scope = updater.begin().await?;

    let result = match lifecycle {
        // Pay directly.
        0..=2 => updater.basic().try_subtract_available(&mut scope, params()).await.map(|()| Flow::Consumed(id.clone(), num)),
        // Reserve then pay.
        3..=5 => async {
            updater.try_subtract_available_add_pre_lock(&mut scope, params()).await?;
            updater.try_subtract_pre_lock(&mut scope, params()).await?;
            Ok::<_, ResourceError>(Flow::Consumed(id.clone(), num))
        }
        .await,
        // Reserve then cancel.
        6 | 7 => async {
            updater.try_subtract_available_add_pre_lock(&mut scope, params()).await?;
            updater.try_subtract_pre_lock_add_available(&mut scope, params()).await?;
            Ok::<_, ResourceError>(Flow::Neutral)
        }
        .await,
        // Reserve then abandon.
        8 => {
            let reserved = updater.try_subtract_available_add_pre_lock(&mut scope, params()).await;
            scope.rollback().await;
            return reserved.map(|()| Flow::Neutral);
        }
        _ => updater.basic().add_available(&mut scope, params()).await.map(|()| Flow::Restocked(id.clone(), num)),
    };

    match result {
        Ok(flow) => {
            scope.commit().await?;
            Ok(flow)
        }
        Err(e) => {
            scope.rollback().await;
            Err(e)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reservoir=info,reservoir_sim=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}
