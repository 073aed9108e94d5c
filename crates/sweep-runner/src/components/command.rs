use crate::dataset::Dataset;
use crate::error::ProducerError;
use crate::fields::{Configurable, FieldRegistry, ParamSet, Reflect};
use crate::protocol::{IterationContext, ResultListener, ResultProducer, ResultRow};
use crate::value::{FieldValue, ValueKind};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

pub const INPUT_SCHEMA_VERSION: &str = "iteration_input_v1";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Knobs exposed to property paths as `CommandProducer::params/ParamSet::<name>`.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// Runs an external command once per sweep cell.
///
/// The command receives an `iteration_input_v1` document on stdin and
/// reports results as JSON objects, one per stdout line. Lines that are not
/// JSON objects are ignored.
pub struct CommandProducer {
    command: Vec<String>,
    timeout_secs: Option<u64>,
    working_dir: Option<PathBuf>,
    params: ParamSet,
    dataset: Option<Arc<Dataset>>,
}

impl CommandProducer {
    pub fn from_settings(settings: CommandSettings) -> Result<Self, String> {
        if settings.command.is_empty() {
            return Err("command must not be empty".to_string());
        }
        let mut params = ParamSet::new();
        for (name, raw) in &settings.params {
            let value = FieldValue::from_json(raw)
                .ok_or_else(|| format!("param '{}' must be a boolean, number or string", name))?;
            params.declare(name.clone(), value);
        }
        Ok(Self {
            command: settings.command,
            timeout_secs: settings.timeout_secs,
            working_dir: settings.working_dir,
            params,
            dataset: None,
        })
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    fn params_json(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    fn iteration_input(&self, ctx: &IterationContext, dataset: &Dataset) -> Value {
        json!({
            "schema_version": INPUT_SCHEMA_VERSION,
            "ids": {
                "run": ctx.run,
                "dataset_index": ctx.dataset_index,
                "custom_index": ctx.custom_index,
            },
            "dataset": {
                "relation": dataset.relation(),
                "source": dataset.source().map(|p| p.display().to_string()),
                "class_index": dataset.class_index(),
                "attributes": dataset.attributes(),
                "num_instances": dataset.num_instances(),
            },
            "params": Value::Object(self.params_json()),
        })
    }

    /// The earlier of the context deadline and the configured timeout.
    fn deadline(&self, ctx: &IterationContext, started: Instant) -> Option<Instant> {
        let own = self
            .timeout_secs
            .map(|secs| started + Duration::from_secs(secs));
        match (ctx.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn spawn(&self, ctx: &IterationContext) -> Result<Child, ProducerError> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.env("SWEEP_RUN", ctx.run.to_string());
        cmd.env("SWEEP_DATASET_INDEX", ctx.dataset_index.to_string());
        cmd.env("SWEEP_CUSTOM_INDEX", ctx.custom_index.to_string());
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Ok(cmd.spawn()?)
    }

    fn row_key(&self, ctx: &IterationContext, dataset: &Dataset) -> BTreeMap<String, Value> {
        let mut key: BTreeMap<String, Value> = self.params_json().into_iter().collect();
        key.insert("run".to_string(), json!(ctx.run));
        key.insert("dataset".to_string(), json!(dataset.relation()));
        key.insert("dataset_index".to_string(), json!(ctx.dataset_index));
        key.insert("custom_index".to_string(), json!(ctx.custom_index));
        key
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    })
}

/// Writes `input` and closes the pipe off the polling thread, so a command
/// that never reads stdin cannot hold up the deadline.
fn feed<W: Write + Send + 'static>(pipe: Option<W>, input: Vec<u8>) {
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            // the command may exit without reading its input
            let _ = pipe.write_all(&input);
        });
    }
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn stop(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

impl Reflect for CommandProducer {
    fn registry() -> FieldRegistry<Self> {
        FieldRegistry::<Self>::new("CommandProducer")
            .value(
                "timeout_secs",
                ValueKind::Int,
                |p| FieldValue::Int(p.timeout_secs.map(|s| s as i64).unwrap_or(0)),
                |p, v| {
                    let secs = v.as_int().unwrap_or_default();
                    if secs < 0 {
                        return Err("timeout_secs must not be negative".to_string());
                    }
                    // 0 disables the timeout
                    p.timeout_secs = (secs > 0).then_some(secs as u64);
                    Ok(())
                },
            )
            .value(
                "working_dir",
                ValueKind::Text,
                |p| {
                    FieldValue::Text(
                        p.working_dir
                            .as_ref()
                            .map(|d| d.display().to_string())
                            .unwrap_or_default(),
                    )
                },
                |p, v| {
                    let dir = v.as_text().unwrap_or_default();
                    p.working_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
                    Ok(())
                },
            )
            .nested(
                "params",
                |p| &p.params as &dyn Configurable,
                |p| &mut p.params as &mut dyn Configurable,
            )
    }
}

impl ResultProducer for CommandProducer {
    fn pre_process(&mut self, _listener: &mut dyn ResultListener) -> Result<(), ProducerError> {
        debug!(command = ?self.command, "command producer ready");
        Ok(())
    }

    fn set_dataset(&mut self, dataset: Arc<Dataset>) {
        self.dataset = Some(dataset);
    }

    fn run_iteration(
        &mut self,
        ctx: &IterationContext,
        listener: &mut dyn ResultListener,
    ) -> Result<(), ProducerError> {
        let dataset = self.dataset.clone().ok_or(ProducerError::NoDataset)?;
        if ctx.cancel.is_cancelled() {
            return Err(ProducerError::Cancelled);
        }
        let started = Instant::now();
        let deadline = self.deadline(ctx, started);

        let mut input = serde_json::to_vec(&self.iteration_input(ctx, &dataset))?;
        input.push(b'\n');
        let mut child = self.spawn(ctx)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        feed(child.stdin.take(), input);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if ctx.cancel.is_cancelled() {
                stop(&mut child);
                return Err(ProducerError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    stop(&mut child);
                    return Err(ProducerError::DeadlineExceeded(
                        deadline.saturating_duration_since(started),
                    ));
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        let out = collect(stdout);
        let err = collect(stderr);
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let tail = last_line(&err).unwrap_or("no stderr output");
            return Err(ProducerError::Failed(format!(
                "command exited with {}: {}",
                code, tail
            )));
        }

        let key = self.row_key(ctx, &dataset);
        let mut rows = 0usize;
        for line in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let result = match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(map)) => map,
                _ => continue,
            };
            listener.accept_result_row(ResultRow {
                key: key.clone(),
                result: result.into_iter().collect(),
            })?;
            rows += 1;
        }
        if rows == 0 {
            return Err(ProducerError::Failed(
                "command exited without writing a result row".to_string(),
            ));
        }
        debug!(rows, elapsed_ms = started.elapsed().as_millis() as u64, "command finished");
        Ok(())
    }

    fn post_process(&mut self, _listener: &mut dyn ResultListener) -> Result<(), ProducerError> {
        self.dataset = None;
        Ok(())
    }
}
