//! Subcommand implementations

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Args;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use pinpool_connection::{Pool, PoolError, PoolStats, Row, Value};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// SQL query to run
    sql: String,

    /// Positional parameter; repeat for each `?` placeholder
    #[arg(long = "param", short = 'p')]
    params: Vec<String>,

    /// Print rows as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// SQL statement to run
    sql: String,

    /// Positional parameter; repeat for each `?` placeholder
    #[arg(long = "param", short = 'p')]
    params: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Number of tasks issuing statements at the same time
    #[arg(long, short = 'c', default_value_t = 16)]
    concurrency: usize,

    /// Statements issued by each task
    #[arg(long, short = 'n', default_value_t = 100)]
    iterations: usize,

    /// Statement every task runs
    #[arg(long, default_value = "SELECT 1")]
    sql: String,
}

pub async fn query(pool: &Pool, args: &QueryArgs) -> Result<()> {
    let params = parse_params(&args.params);
    let rows = pool.all(&args.sql, &params).await?;

    if args.json {
        let json: Vec<serde_json::Value> = rows.iter().map(row_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else if rows.is_empty() {
        println!("(no rows)");
    } else {
        println!("{}", rows_table(&rows));
        println!("{} row(s)", rows.len());
    }
    Ok(())
}

pub async fn exec(pool: &Pool, args: &ExecArgs) -> Result<()> {
    let params = parse_params(&args.params);
    let result = pool.run(&args.sql, &params).await?;

    println!("changes: {}", result.changes);
    match result.last_insert_id {
        Some(id) => println!("last insert id: {}", id),
        None => println!("last insert id: -"),
    }
    Ok(())
}

pub async fn stats(pool: &Pool, args: &StatsArgs) -> Result<()> {
    // Open one connection so the counts reflect a live pool.
    pool.get("SELECT 1", &[]).await?;
    let stats = pool.stats();

    if args.json {
        let json = serde_json::json!({
            "database": pool.location(),
            "config": pool.config(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    let config = pool.config();
    let mut table = new_table();
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["database".to_string(), pool.location().to_string()]);
    table.add_row(vec!["max connections".to_string(), config.max_connections().to_string()]);
    table.add_row(vec!["min connections".to_string(), config.min_connections().to_string()]);
    table.add_row(vec!["acquire timeout".to_string(), format!("{:?}", config.acquire_timeout())]);
    table.add_row(vec!["idle timeout".to_string(), format!("{:?}", config.idle_timeout())]);
    table.add_row(vec!["reap interval".to_string(), format!("{:?}", config.reap_interval())]);
    table.add_row(vec![
        "max lifetime".to_string(),
        config
            .max_lifetime()
            .map(|d| format!("{:?}", d))
            .unwrap_or_else(|| "-".to_string()),
    ]);
    println!("{}", table);
    println!("{}", stats_table(&stats));
    Ok(())
}

/// Per-task tally of a load run
#[derive(Debug, Default)]
struct LoadTally {
    ok: usize,
    timed_out: usize,
    failed: usize,
    total_latency: Duration,
    max_latency: Duration,
}

impl LoadTally {
    fn merge(&mut self, other: LoadTally) {
        self.ok += other.ok;
        self.timed_out += other.timed_out;
        self.failed += other.failed;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
    }

    fn issued(&self) -> usize {
        self.ok + self.timed_out + self.failed
    }
}

pub async fn load(pool: &Pool, args: &LoadArgs) -> Result<()> {
    if args.concurrency == 0 || args.iterations == 0 {
        bail!("--concurrency and --iterations must both be greater than 0");
    }

    tracing::info!(
        concurrency = args.concurrency,
        iterations = args.iterations,
        max_connections = pool.config().max_connections(),
        "starting load"
    );

    let started = Instant::now();
    let tasks: Vec<_> = (0..args.concurrency)
        .map(|_| {
            let pool = pool.clone();
            let sql = args.sql.clone();
            let iterations = args.iterations;
            tokio::spawn(async move {
                let mut tally = LoadTally::default();
                for _ in 0..iterations {
                    let issued = Instant::now();
                    let outcome = pool.all(&sql, &[]).await;
                    let latency = issued.elapsed();
                    tally.total_latency += latency;
                    tally.max_latency = tally.max_latency.max(latency);

                    match outcome {
                        Ok(_) => tally.ok += 1,
                        Err(e) if e.is_transient() => tally.timed_out += 1,
                        Err(PoolError::PoolClosing) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "statement failed under load");
                            tally.failed += 1;
                        }
                    }
                }
                tally
            })
        })
        .collect();

    let mut tally = LoadTally::default();
    for task in tasks {
        tally.merge(task.await?);
    }
    let elapsed = started.elapsed();

    let issued = tally.issued().max(1);
    let mut table = new_table();
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["statements".to_string(), tally.issued().to_string()]);
    table.add_row(vec!["succeeded".to_string(), tally.ok.to_string()]);
    table.add_row(vec!["acquire timeouts".to_string(), tally.timed_out.to_string()]);
    table.add_row(vec!["failed".to_string(), tally.failed.to_string()]);
    table.add_row(vec!["elapsed".to_string(), format!("{:?}", elapsed)]);
    table.add_row(vec![
        "throughput".to_string(),
        format!("{:.1}/s", tally.issued() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)),
    ]);
    table.add_row(vec![
        "mean latency".to_string(),
        format!("{:?}", tally.total_latency / issued as u32),
    ]);
    table.add_row(vec!["max latency".to_string(), format!("{:?}", tally.max_latency)]);
    println!("{}", table);
    println!("{}", stats_table(&pool.stats()));

    if tally.failed > 0 {
        bail!("{} statement(s) failed", tally.failed);
    }
    Ok(())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn rows_table(rows: &[Row]) -> Table {
    let mut table = new_table();
    if let Some(first) = rows.first() {
        table.set_header(first.columns().to_vec());
    }
    for row in rows {
        table.add_row(row.values.iter().map(|v| v.to_string()).collect::<Vec<_>>());
    }
    table
}

fn stats_table(stats: &PoolStats) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Active", "Idle", "Total", "Max", "Queued", "Utilization"]);
    table.add_row(vec![
        stats.active().to_string(),
        stats.idle().to_string(),
        stats.total().to_string(),
        stats.max().to_string(),
        stats.queued().to_string(),
        format!("{:.0}%", stats.utilization() * 100.0),
    ]);
    table
}

fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|p| parse_param(p)).collect()
}

/// Interpret a command-line parameter: `null`, integers and floats are typed;
/// anything else binds as text.
fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int64(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float64(f)
    } else {
        Value::String(raw.to_string())
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int64(i) => serde_json::Value::from(*i),
        Value::Float64(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
        Value::Uuid(u) => serde_json::Value::String(u.to_string()),
        Value::DateTimeUtc(dt) => serde_json::Value::String(dt.to_rfc3339()),
        Value::Json(j) => j.clone(),
    }
}

fn row_to_json(row: &Row) -> serde_json::Value {
    let object = row
        .columns()
        .iter()
        .zip(row.values.iter())
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(object)
}
