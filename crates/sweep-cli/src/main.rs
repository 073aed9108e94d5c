use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sweep_runner::persist;
use sweep_runner::{
    ComponentRegistry, ComponentSpec, Experiment, ExperimentConfig, FieldValue, PropertyPath,
    SweepReport, TabularJsonlLoader,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Benchmark sweep runner")]
struct Cli {
    /// Log level for the runner when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template experiment file.
    Init {
        #[arg(default_value = "experiment.yaml")]
        out: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Create an experiment file from options.
    New {
        out: PathBuf,
        #[arg(long, default_value_t = 1)]
        lower: u32,
        #[arg(long, default_value_t = 10)]
        upper: u32,
        #[arg(long = "dataset", required = true)]
        datasets: Vec<PathBuf>,
        #[arg(long)]
        producer: Option<String>,
        #[arg(long)]
        producer_settings: Option<String>,
        #[arg(long)]
        listener: Option<String>,
        #[arg(long)]
        listener_settings: Option<String>,
        /// `Owner::field/Owner::field`; enables the custom property iterator.
        #[arg(long)]
        property_path: Option<String>,
        /// Comma-separated property values, e.g. `0.1,0.5,1`.
        #[arg(long, value_delimiter = ',')]
        values: Vec<String>,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        json: bool,
    },
    Describe {
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Re-save an experiment in the format implied by the output extension.
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Run {
        experiment: PathBuf,
        /// Per-iteration deadline handed to the producer.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Save the loaded experiment here before running.
        #[arg(long)]
        save: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sweep_runner={level},sweep={level}")));
    // stdout carries --json payloads
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Init { out, force } => {
            if out.exists() && !force {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    out.display()
                ));
            }
            persist::save(&out, &template_config())?;
            println!("wrote: {}", out.display());
            println!("next: sweep describe {}", out.display());
        }
        Commands::New {
            out,
            lower,
            upper,
            datasets,
            producer,
            producer_settings,
            listener,
            listener_settings,
            property_path,
            values,
            notes,
            json,
        } => {
            let mut cfg = ExperimentConfig {
                run_lower: lower,
                run_upper: upper,
                notes,
                ..ExperimentConfig::default()
            };
            for dataset in &datasets {
                let added = cfg.add_datasets_from(dataset)?;
                if added == 0 {
                    return Err(anyhow!("no *.jsonl datasets under {}", dataset.display()));
                }
            }
            cfg.producer = component_spec(producer, producer_settings.as_deref())?;
            cfg.listener = component_spec(listener, listener_settings.as_deref())?;
            if let Some(path) = property_path {
                cfg.use_property_iterator = true;
                cfg.property_path = Some(PropertyPath::parse(&path)?);
                cfg.property_values = Some(values.iter().map(|v| parse_value(v)).collect());
            } else if !values.is_empty() {
                return Err(anyhow!("--values requires --property-path"));
            }
            cfg.validate()?;
            persist::save(&out, &cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "new",
                    "path": out.display().to_string(),
                    "summary": summary_to_json(&cfg)
                })));
            }
            print!("{}", cfg);
            println!("wrote: {}", out.display());
        }
        Commands::Describe { experiment, json } => {
            let cfg = persist::load(&experiment)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&cfg)
                })));
            }
            print!("{}", cfg);
            println!("Total iterations: {}", cfg.total_iterations());
            println!("Digest: {}", cfg.digest());
        }
        Commands::Convert {
            input,
            output,
            json,
        } => {
            let cfg = persist::load(&input)?;
            persist::save(&output, &cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "convert",
                    "input": input.display().to_string(),
                    "output": output.display().to_string(),
                    "digest": cfg.digest()
                })));
            }
            println!("wrote: {}", output.display());
        }
        Commands::Run {
            experiment,
            timeout_secs,
            save,
            json,
        } => {
            let cfg = persist::load(&experiment)?;
            if let Some(path) = &save {
                persist::save(path, &cfg)?;
                info!(path = %path.display(), "experiment saved");
            }
            let summary = summary_to_json(&cfg);
            let report = run_sweep(&experiment, cfg.clone(), timeout_secs)?;
            if json {
                return Ok(Some(json!({
                    "ok": report.is_clean(),
                    "command": "run",
                    "summary": summary,
                    "report": report_to_json(&report)
                })));
            }
            print!("{}", cfg);
            print_report(&report);
            if !report.is_clean() {
                return Err(anyhow!(
                    "{} of {} iterations failed{}",
                    report.errors.len(),
                    cfg.total_iterations(),
                    if report.cancelled { " (cancelled)" } else { "" }
                ));
            }
        }
    }
    Ok(None)
}

/// initialize, run every cell, post-process.
fn run_sweep(
    experiment_path: &Path,
    cfg: ExperimentConfig,
    timeout_secs: Option<u64>,
) -> Result<SweepReport> {
    let base_dir = experiment_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let registry = ComponentRegistry::default();
    let loader = Box::new(TabularJsonlLoader::with_base_dir(base_dir));
    let mut exp = Experiment::from_config(cfg, &registry, loader)?;
    if let Some(secs) = timeout_secs {
        exp = exp.with_iteration_timeout(Duration::from_secs(secs));
    }
    exp.initialize()?;
    let report = exp.run_experiment();
    exp.post_process()?;
    Ok(report)
}

fn component_spec(kind: Option<String>, settings: Option<&str>) -> Result<Option<ComponentSpec>> {
    match (kind, settings) {
        (Some(kind), Some(raw)) => {
            let settings: Value = serde_json::from_str(raw)
                .map_err(|e| anyhow!("invalid settings for '{}': {}", kind, e))?;
            Ok(Some(ComponentSpec::new(kind, settings)))
        }
        (Some(kind), None) => Ok(Some(ComponentSpec::kind_only(kind))),
        (None, Some(_)) => Err(anyhow!("component settings given without a component kind")),
        (None, None) => Ok(None),
    }
}

/// JSON scalars keep their type; anything else is taken as text.
fn parse_value(raw: &str) -> FieldValue {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .and_then(|v| FieldValue::from_json(&v))
        .unwrap_or_else(|| FieldValue::Text(raw.trim().to_string()))
}

fn template_config() -> ExperimentConfig {
    ExperimentConfig {
        run_lower: 1,
        run_upper: 10,
        datasets: vec!["data/example.jsonl".into()],
        use_property_iterator: true,
        property_path: PropertyPath::parse("CommandProducer::params/ParamSet::learning_rate").ok(),
        property_values: Some(vec![
            FieldValue::Float(0.01),
            FieldValue::Float(0.1),
            FieldValue::Float(1.0),
        ]),
        notes: "template experiment".to_string(),
        producer: Some(ComponentSpec::new(
            "command",
            json!({
                "command": ["python3", "eval.py"],
                "timeout_secs": 300,
                "params": {"learning_rate": 0.1}
            }),
        )),
        listener: Some(ComponentSpec::new(
            "jsonl",
            json!({"path": "results/results.jsonl"}),
        )),
    }
}

fn summary_to_json(cfg: &ExperimentConfig) -> Value {
    json!({
        "run_lower": cfg.run_lower,
        "run_upper": cfg.run_upper,
        "datasets": cfg.datasets.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "use_property_iterator": cfg.use_property_iterator,
        "property_path": cfg.property_path.as_ref().map(|p| p.to_string()),
        "property_values": cfg.active_property_values().iter().map(FieldValue::to_json).collect::<Vec<_>>(),
        "producer": cfg.producer.as_ref().map(|p| p.kind.clone()),
        "listener": cfg.listener.as_ref().map(|l| l.kind.clone()),
        "total_iterations": cfg.total_iterations(),
        "digest": cfg.digest(),
    })
}

fn report_to_json(report: &SweepReport) -> Value {
    json!({
        "config_digest": report.config_digest,
        "started_at": report.started_at.to_rfc3339(),
        "finished_at": report.finished_at.to_rfc3339(),
        "completed": report.completed.len(),
        "cancelled": report.cancelled,
        "errors": report.errors.iter().map(|e| json!({
            "run": e.run,
            "dataset_index": e.dataset_index,
            "custom_index": e.custom_index,
            "message": e.cause.to_string(),
        })).collect::<Vec<_>>(),
    })
}

fn print_report(report: &SweepReport) {
    println!("completed: {}", report.completed.len());
    println!("failed: {}", report.errors.len());
    for err in &report.errors {
        println!("  {}", err);
    }
    if report.cancelled {
        println!("cancelled: true");
    }
    let elapsed = report.finished_at - report.started_at;
    println!("elapsed_ms: {}", elapsed.num_milliseconds());
    println!("digest: {}", report.config_digest);
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::New { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Convert { json, .. }
        | Commands::Run { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_keep_scalar_types() {
        assert_eq!(parse_value("3"), FieldValue::Int(3));
        assert_eq!(parse_value(" 0.5"), FieldValue::Float(0.5));
        assert_eq!(parse_value("true"), FieldValue::Bool(true));
        assert_eq!(parse_value("rbf"), FieldValue::Text("rbf".to_string()));
        assert_eq!(parse_value("\"7\""), FieldValue::Text("7".to_string()));
    }

    #[test]
    fn component_settings_need_a_kind() {
        assert!(component_spec(None, Some("{}")).is_err());
        assert!(component_spec(Some("jsonl".to_string()), Some("not json")).is_err());
        let spec = component_spec(Some("jsonl".to_string()), Some(r#"{"path":"r.jsonl"}"#))
            .expect("spec")
            .expect("some");
        assert_eq!(spec.settings, json!({"path": "r.jsonl"}));
        assert_eq!(component_spec(None, None).expect("none"), None);
    }

    #[test]
    fn template_is_a_valid_experiment() {
        let cfg = template_config();
        cfg.validate().expect("valid");
        assert_eq!(cfg.total_iterations(), 30);
        ComponentRegistry::default()
            .build_producer(cfg.producer.as_ref().expect("producer"))
            .expect("buildable producer");
    }

    #[test]
    fn cli_parses_new_with_values() {
        let cli = Cli::parse_from([
            "sweep",
            "new",
            "exp.yaml",
            "--dataset",
            "a.jsonl",
            "--dataset",
            "b.jsonl",
            "--property-path",
            "CommandProducer::params/ParamSet::depth",
            "--values",
            "1,2,4",
        ]);
        match cli.command {
            Commands::New {
                datasets, values, lower, upper, ..
            } => {
                assert_eq!(datasets.len(), 2);
                assert_eq!(values, vec!["1", "2", "4"]);
                assert_eq!((lower, upper), (1, 10));
            }
            _ => panic!("expected new"),
        }
    }
}
