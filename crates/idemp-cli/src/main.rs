use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use idemp_storage::{InMemoryStorage, PostgresStorage, RedisStorage, Storage};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Idempotency-guard maintenance CLI")]
struct Cli {
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Storage backend to operate against.
    #[arg(long, value_enum, global = true, default_value_t = BackendArg::Memory)]
    backend: BackendArg,

    /// Backend connection string (Redis/Postgres URL). Ignored for `memory`.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Key namespace / table prefix used by the backend.
    #[arg(long, global = true, default_value = "idempotency")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Memory,
    Redis,
    Postgres,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remove expired records, in batches.
    Cleanup {
        /// Max records removed per batch.
        #[arg(default_value_t = 1000)]
        batch: usize,
    },
    /// Print a freshly generated idempotency key.
    GenerateKey,
    /// Round-trip a synthetic record through the configured backend.
    TestStorage,
    /// Report backend connectivity and a cleanup dry-run estimate.
    Stats,
}

#[derive(Serialize)]
struct CleanupReport {
    backend: &'static str,
    removed: usize,
}

#[derive(Serialize)]
struct GenerateKeyReport {
    key: String,
}

#[derive(Serialize)]
struct TestStorageReport {
    backend: &'static str,
    ok: bool,
    latency_ms: u128,
}

#[derive(Serialize)]
struct StatsReport {
    backend: &'static str,
    namespace: String,
    reachable: bool,
    latency_ms: u128,
}

#[tokio::main]
async fn main() -> Result<()> {
    idemp_telemetry::install("idemp-cli").context("failed to initialize telemetry")?;
    let cli = Cli::parse();
    if let Err(err) = run(&cli).await {
        tracing::warn!(%err, command = ?cli.command, "idemp-cli command failed");
        if cli.json {
            println!("{}", serde_json::json!({ "error": err.to_string() }));
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::GenerateKey => {
            let key = idemp_types::generate();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&GenerateKeyReport { key })?);
            } else {
                println!("{key}");
            }
            Ok(())
        }
        Commands::Cleanup { batch } => {
            let storage = build_storage(cli).await?;
            let removed = storage
                .cleanup(*batch)
                .await
                .context("cleanup failed")?;
            let report = CleanupReport {
                backend: backend_name(cli.backend),
                removed,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("removed {removed} expired record(s) from {}", report.backend);
            }
            Ok(())
        }
        Commands::TestStorage => {
            let storage = build_storage(cli).await?;
            let key = format!("cli-test-storage-{}", idemp_types::generate());
            let record = idemp_types::StoredRecord::capture(
                200,
                b"{\"ok\":true}".to_vec(),
                Vec::new(),
                time::OffsetDateTime::now_utc(),
                30,
            );
            let started = Instant::now();
            let put_ok = storage.put(&key, &record, 30).await.context("put failed")?;
            let fetched = storage.get(&key).await.context("get failed")?;
            if let Some(ref record) = fetched {
                let body: serde_json::Value =
                    serde_json::from_slice(&record.body).unwrap_or(serde_json::Value::Null);
                tracing::debug!(
                    %key,
                    status = record.status,
                    body = %idemp_filter::strip_for_log(&body),
                    "fetched synthetic record during storage round-trip"
                );
            }
            let deleted = storage.delete(&key).await.context("delete failed")?;
            let elapsed = started.elapsed().as_millis();
            let ok = put_ok && fetched.as_ref().map(|r| r.status) == Some(200) && deleted;
            let report = TestStorageReport {
                backend: backend_name(cli.backend),
                ok,
                latency_ms: elapsed,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} round-trip {} in {}ms",
                    report.backend,
                    if ok { "succeeded" } else { "FAILED" },
                    elapsed
                );
            }
            if !ok {
                bail!("storage round-trip did not behave as expected");
            }
            Ok(())
        }
        Commands::Stats => {
            let storage = build_storage(cli).await?;
            let started = Instant::now();
            let probe = storage.exists("cli-stats-liveness-probe").await;
            let elapsed = started.elapsed().as_millis();
            let reachable = probe.is_ok();
            let report = StatsReport {
                backend: backend_name(cli.backend),
                namespace: cli.namespace.clone(),
                reachable,
                latency_ms: elapsed,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "backend={} namespace={} reachable={} latency={}ms",
                    report.backend, report.namespace, report.reachable, elapsed
                );
            }
            if !reachable {
                bail!("backend unreachable");
            }
            Ok(())
        }
    }
}

async fn build_storage(cli: &Cli) -> Result<Arc<dyn Storage>> {
    match cli.backend {
        BackendArg::Memory => Ok(Arc::new(InMemoryStorage::new())),
        BackendArg::Redis => {
            let url = cli
                .url
                .clone()
                .or_else(|| std::env::var("IDEMPOTENCY_REDIS_URL").ok())
                .context("--url or IDEMPOTENCY_REDIS_URL is required for the redis backend")?;
            let storage = RedisStorage::connect(&url, cli.namespace.clone(), false)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(storage))
        }
        BackendArg::Postgres => {
            let url = cli
                .url
                .clone()
                .or_else(|| std::env::var("IDEMPOTENCY_DATABASE_URL").ok())
                .context("--url or IDEMPOTENCY_DATABASE_URL is required for the postgres backend")?;
            let storage = PostgresStorage::connect(&url)
                .await
                .context("failed to connect to postgres")?;
            Ok(Arc::new(storage))
        }
    }
}

fn backend_name(backend: BackendArg) -> &'static str {
    match backend {
        BackendArg::Memory => "memory",
        BackendArg::Redis => "redis",
        BackendArg::Postgres => "postgres",
    }
}
