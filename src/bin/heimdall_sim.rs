//! heimdall-sim: drive an executor against a simulated flaky endpoint.
//!
//! Useful for eyeballing how breaker, retry, rate-limit and cache settings
//! interact before putting them in front of a real service. Prints a JSON
//! report with outcome counts, the final circuit state and cache stats.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::info;

use heimdall::{
    CacheStats, Call, CircuitState, Config, Executor, ExecutorConfig, HeimdallError,
    UpstreamError, fingerprint,
};

/// Simulate traffic through a Heimdall executor.
#[derive(Parser)]
#[command(name = "heimdall-sim")]
#[command(version)]
#[command(about = "Run simulated traffic through a resilient executor")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "HEIMDALL_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Endpoint key to call.
    #[arg(long, default_value = "sim")]
    key: String,

    /// Total number of calls.
    #[arg(long, default_value_t = 200)]
    calls: usize,

    /// Concurrent callers.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Probability that one upstream attempt fails (0.0..=1.0).
    #[arg(long, default_value_t = 0.3)]
    failure_rate: f64,

    /// Upstream latency per attempt in milliseconds.
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Distinct resources requested; calls cycle through them. 0 disables caching.
    #[arg(long, default_value_t = 10)]
    distinct: usize,
}

#[derive(Serialize)]
struct Report {
    outcomes: BTreeMap<&'static str, usize>,
    circuit: CircuitState,
    failure_count: u32,
    cache: CacheStats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(HeimdallError::Configuration(format!(
            "failure rate must be within 0.0..=1.0, got {}",
            args.failure_rate
        ))
        .into());
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?.into_executor_config()?,
        None => ExecutorConfig::default(),
    };
    let executor: Executor<u64> = Executor::new(config)?;

    info!(
        key = %args.key,
        calls = args.calls,
        concurrency = args.concurrency,
        failure_rate = args.failure_rate,
        "simulation starting"
    );

    let args = Arc::new(args);
    let mut workers = JoinSet::new();
    for worker in 0..args.concurrency.max(1) {
        let executor = executor.clone();
        let args = Arc::clone(&args);
        workers.spawn(async move {
            let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
            let stride = args.concurrency.max(1);
            for n in (worker..args.calls).step_by(stride) {
                let outcome = match executor.execute(&call_for(&args, n), flaky(&args, n)).await {
                    Ok(_) => "ok",
                    Err(e) => e.label(),
                };
                *outcomes.entry(outcome).or_default() += 1;
            }
            outcomes
        });
    }

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    while let Some(joined) = workers.join_next().await {
        for (outcome, count) in joined? {
            *outcomes.entry(outcome).or_default() += count;
        }
    }

    let circuit = executor.circuit(&args.key);
    let report = Report {
        outcomes,
        circuit: circuit.state,
        failure_count: circuit.failure_count,
        cache: executor.cache_stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn call_for(args: &Args, n: usize) -> Call {
    let call = Call::new(args.key.clone());
    if args.distinct == 0 {
        return call;
    }
    let resource = format!("/resources/{}", n % args.distinct);
    call.fingerprint(fingerprint("GET", &resource, &[], None))
}

/// Upstream stand-in: fails with a 503 at the configured rate.
fn flaky(
    args: &Args,
    n: usize,
) -> impl Fn() -> BoxFuture<'static, Result<u64, UpstreamError>> + Send + Sync + 'static {
    let failure_rate = args.failure_rate;
    let latency = Duration::from_millis(args.latency_ms);
    let value = n as u64;
    move || {
        let fail = rand::thread_rng().gen_bool(failure_rate);
        async move {
            tokio::time::sleep(latency).await;
            if fail {
                Err(UpstreamError::status(503, "simulated outage"))
            } else {
                Ok(value)
            }
        }
        .boxed()
    }
}
