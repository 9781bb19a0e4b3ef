use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edge_registry_engine::{ModelRegistry, RegisterRequest, RegistryConfig};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "edge-registry", about = "Local model metadata and artifact registry")]
struct Cli {
    /// Registry root; defaults to $EDGE_REGISTRY_HOME or ./data.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    no_journal: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Register(RegisterArgs),
    Load(PairArgs),
    List,
    Show(ShowArgs),
    Latest(NameArgs),
    Verify(PairArgs),
}

#[derive(Debug, Parser)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    version: String,
    #[arg(long)]
    path: PathBuf,
    #[arg(long = "metric", value_parser = parse_metric)]
    metrics: Vec<(String, f64)>,
    #[arg(long = "meta", value_parser = parse_meta)]
    metadata: Vec<(String, String)>,
    /// Replace an orphaned artifact directory from an interrupted run.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Parser)]
struct PairArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    version: String,
}

#[derive(Debug, Parser)]
struct ShowArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    version: Option<String>,
}

#[derive(Debug, Parser)]
struct NameArgs {
    #[arg(long)]
    name: String,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("edge-registry error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edge_registry=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match cli.base_dir {
        Some(base_dir) => RegistryConfig::new(base_dir),
        None => RegistryConfig::from_env(),
    };
    if cli.no_journal {
        config = config.with_journal(false);
    }
    let registry = ModelRegistry::open(config.clone())
        .with_context(|| format!("failed to open registry at {}", config.base_dir.display()))?;

    match cli.command {
        Command::Register(args) => run_register(&registry, args),
        Command::Load(args) => run_load(&registry, args),
        Command::List => print_json(&registry.list_models()),
        Command::Show(args) => match args.version {
            Some(version) => print_json(&registry.get_version(&args.name, &version)?),
            None => print_json(&registry.get_model(&args.name)?),
        },
        Command::Latest(args) => print_json(&registry.latest_version(&args.name)?),
        Command::Verify(args) => {
            let record = registry.verify(&args.name, &args.version)?;
            print_json(&json!({
                "name": args.name,
                "version": record.version,
                "sha256": record.sha256,
                "status": "ok",
            }))
        }
    }
}

fn run_register(registry: &ModelRegistry, args: RegisterArgs) -> Result<()> {
    let mut request = RegisterRequest::new(&args.name, &args.version, &args.path)
        .overwrite_artifact(args.overwrite);
    for (key, value) in args.metrics {
        request = request.metric(key, value);
    }
    for (key, value) in args.metadata {
        request = request.metadata(key, value);
    }
    let started = Instant::now();
    let record = registry
        .register(request)
        .with_context(|| format!("failed to register {} {}", args.name, args.version))?;
    let mut payload = serde_json::to_value(&record)?;
    if let Value::Object(map) = &mut payload {
        map.insert("name".to_string(), json!(args.name));
        map.insert(
            "elapsed_ms".to_string(),
            json!(started.elapsed().as_secs_f64() * 1000.0),
        );
    }
    print_json(&payload)
}

/// Loads the pair twice to show the cold and warm paths.
fn run_load(registry: &ModelRegistry, args: PairArgs) -> Result<()> {
    let cold_started = Instant::now();
    let cold = registry.load_model(&args.name, &args.version)?;
    let cold_ms = cold_started.elapsed().as_secs_f64() * 1000.0;

    let warm_started = Instant::now();
    let warm = registry.load_model(&args.name, &args.version)?;
    let warm_ms = warm_started.elapsed().as_secs_f64() * 1000.0;

    let stats = registry.cache().stats();
    print_json(&json!({
        "name": cold.name,
        "version": cold.version,
        "path": cold.path.to_string_lossy(),
        "bytes": cold.bytes.len(),
        "cold_start_ms": cold_ms,
        "warm_start_ms": warm_ms,
        "same_handle": Arc::ptr_eq(&cold, &warm),
        "cache": {
            "hits": stats.hits,
            "loads": stats.loads,
            "entries": stats.entries,
        },
    }))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_metric(raw: &str) -> Result<(String, f64), String> {
    let (key, value) = split_pair(raw)?;
    let value = value
        .parse::<f64>()
        .map_err(|_| format!("metric value '{value}' is not a number"))?;
    Ok((key, value))
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    let (key, value) = split_pair(raw)?;
    Ok((key, value.to_string()))
}

fn split_pair(raw: &str) -> Result<(String, &str), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim()))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{parse_meta, parse_metric, Cli, Command};

    #[test]
    fn metric_pairs_parse() {
        assert_eq!(parse_metric("acc=0.925"), Ok(("acc".to_string(), 0.925)));
        assert!(parse_metric("acc").is_err());
        assert!(parse_metric("acc=high").is_err());
        assert!(parse_metric("=1").is_err());
        assert_eq!(
            parse_meta("target_device = Jetson Nano"),
            Ok(("target_device".to_string(), "Jetson Nano".to_string()))
        );
    }

    #[test]
    fn register_command_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "edge-registry",
            "--base-dir",
            "/tmp/reg",
            "register",
            "--name",
            "MobileNetV2_Quantized",
            "--version",
            "v1.2.0",
            "--path",
            "model.pt",
            "--metric",
            "accuracy=0.925",
            "--metric",
            "inference_time_ms=4.5",
            "--meta",
            "author=Subin Seo",
        ]);
        let Ok(cli) = cli else {
            panic!("register arguments should parse");
        };
        let Command::Register(args) = cli.command else {
            panic!("expected register command");
        };
        assert_eq!(args.metrics.len(), 2);
        assert_eq!(args.metadata[0].1, "Subin Seo");
        assert!(!args.overwrite);
    }
}
