use crate::dataset::Dataset;
use crate::error::{ListenerError, ProducerError};
use crate::fields::Configurable;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One structured result pushed from a producer to a listener. `key` names
/// the cell (run, dataset, settings), `result` holds the measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub key: BTreeMap<String, Value>,
    pub result: BTreeMap<String, Value>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.key.insert(name.into(), value.into());
        self
    }

    pub fn with_result(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.result.insert(name.into(), value.into());
        self
    }
}

/// Shared flag checked at the top of every iteration. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a producer learns about the cell it is asked to run.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub run: u32,
    pub dataset_index: usize,
    pub custom_index: usize,
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl IterationContext {
    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

pub trait ResultListener {
    fn pre_process(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn accept_result_row(&mut self, row: ResultRow) -> Result<(), ListenerError>;

    fn post_process(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// The unit of work driven by the sweep. The listener is owned by the
/// controller and lent to every call that may produce rows.
pub trait ResultProducer: Configurable {
    /// Called once from `initialize()`, before `pre_process`.
    fn bind_listener(&mut self) {}

    fn pre_process(&mut self, listener: &mut dyn ResultListener) -> Result<(), ProducerError>;

    fn set_dataset(&mut self, dataset: Arc<Dataset>);

    fn run_iteration(
        &mut self,
        ctx: &IterationContext,
        listener: &mut dyn ResultListener,
    ) -> Result<(), ProducerError>;

    fn post_process(&mut self, listener: &mut dyn ResultListener) -> Result<(), ProducerError>;
}
