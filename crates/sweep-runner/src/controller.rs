use crate::config::ExperimentConfig;
use crate::dataset::{Dataset, DatasetLoader};
use crate::error::{ConfigError, IterationError, IterationFailure, SweepError};
use crate::protocol::{CancelToken, IterationContext, ResultListener, ResultProducer};
use crate::registry::ComponentRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transient position of a sweep. Created by `initialize()`, advanced by
/// `next_iteration()`/`advance_counters()`, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    pub current_run: u32,
    pub dataset_index: usize,
    pub custom_index: usize,
    /// Custom index whose property value was last written to the producer.
    pub applied_custom_index: Option<usize>,
    pub loaded_dataset: Option<Arc<Dataset>>,
    pub finished: bool,
}

impl IterationState {
    fn idle() -> Self {
        Self {
            current_run: 0,
            dataset_index: 0,
            custom_index: 0,
            applied_custom_index: None,
            loaded_dataset: None,
            finished: true,
        }
    }

    fn start(run_lower: u32) -> Self {
        Self {
            current_run: run_lower,
            finished: false,
            ..Self::idle()
        }
    }

    fn cell(&self) -> SweepCell {
        SweepCell {
            run: self.current_run,
            dataset_index: self.dataset_index,
            custom_index: self.custom_index,
        }
    }
}

/// Coordinates of one executed sweep cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCell {
    pub run: u32,
    pub dataset_index: usize,
    pub custom_index: usize,
}

/// Outcome of `run_experiment()`. A cell missing from `completed` was either
/// attempted and failed (see `errors`) or never reached because of cancellation.
#[derive(Debug)]
pub struct SweepReport {
    pub config_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<SweepCell>,
    pub errors: Vec<IterationError>,
    pub cancelled: bool,
}

impl SweepReport {
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Drives a producer over runs × datasets × custom property values.
pub struct Experiment {
    config: ExperimentConfig,
    producer: Option<Box<dyn ResultProducer>>,
    listener: Option<Box<dyn ResultListener>>,
    loader: Box<dyn DatasetLoader>,
    state: IterationState,
    cancel: CancelToken,
    iteration_timeout: Option<Duration>,
}

impl Experiment {
    pub fn new(config: ExperimentConfig, loader: Box<dyn DatasetLoader>) -> Self {
        Self {
            config,
            producer: None,
            listener: None,
            loader,
            state: IterationState::idle(),
            cancel: CancelToken::new(),
            iteration_timeout: None,
        }
    }

    /// Builds the producer and listener named in the config through `registry`.
    /// Unset components stay unset and are reported by `initialize()`.
    pub fn from_config(
        config: ExperimentConfig,
        registry: &ComponentRegistry,
        loader: Box<dyn DatasetLoader>,
    ) -> Result<Self, ConfigError> {
        let producer = match &config.producer {
            Some(spec) => Some(registry.build_producer(spec)?),
            None => None,
        };
        let listener = match &config.listener {
            Some(spec) => Some(registry.build_listener(spec)?),
            None => None,
        };
        let mut experiment = Self::new(config, loader);
        experiment.producer = producer;
        experiment.listener = listener;
        Ok(experiment)
    }

    pub fn with_producer(mut self, producer: Box<dyn ResultProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn ResultListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Each `run_iteration()` call receives a deadline this far in the future.
    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn current_run(&self) -> u32 {
        self.state.current_run
    }

    pub fn current_dataset_index(&self) -> usize {
        self.state.dataset_index
    }

    pub fn current_custom_index(&self) -> usize {
        self.state.custom_index
    }

    pub fn initialize(&mut self) -> Result<(), SweepError> {
        self.state = IterationState::idle();
        self.config.validate()?;
        let producer = self.producer.as_mut().ok_or(ConfigError::MissingProducer)?;
        let listener = self.listener.as_mut().ok_or(ConfigError::MissingListener)?;
        if self.config.use_property_iterator {
            if let Some(path) = &self.config.property_path {
                path.validate(&**producer, self.config.active_property_values())?;
            }
        }

        producer.bind_listener();
        listener.pre_process()?;
        if let Err(err) = producer.pre_process(&mut **listener) {
            if let Err(teardown) = listener.post_process() {
                warn!(error = %teardown, "listener teardown after failed pre-process");
            }
            return Err(SweepError::PreProcess(err));
        }

        self.state = IterationState::start(self.config.run_lower);
        info!(
            runs = self.config.runs_per_dataset(),
            datasets = self.config.datasets.len(),
            custom_values = self.config.custom_count(),
            total = self.config.total_iterations(),
            "experiment initialized"
        );
        Ok(())
    }

    pub fn has_more_iterations(&self) -> bool {
        !self.state.finished
    }

    /// Executes exactly one sweep cell and advances the counters. On failure
    /// the counters are left where they were; the caller decides whether to
    /// `advance_counters()` and carry on.
    pub fn next_iteration(&mut self) -> Result<SweepCell, IterationError> {
        let cell = self.state.cell();
        let fail = |cause| IterationError {
            run: cell.run,
            dataset_index: cell.dataset_index,
            custom_index: cell.custom_index,
            cause,
        };
        if self.cancel.is_cancelled() {
            return Err(fail(IterationFailure::Cancelled));
        }
        if self.state.finished {
            return Err(fail(IterationFailure::Finished));
        }
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| fail(IterationFailure::NoProducer))?;
        let listener = self
            .listener
            .as_mut()
            .ok_or_else(|| fail(IterationFailure::NoListener))?;

        // Property first, then the dataset: both can be pending after the
        // dataset and custom counters roll over together.
        if self.config.use_property_iterator
            && self.state.applied_custom_index != Some(cell.custom_index)
        {
            let path = self
                .config
                .property_path
                .as_ref()
                .ok_or_else(|| fail(IterationFailure::Property(ConfigError::MissingPropertyPath)))?;
            let value = self
                .config
                .active_property_values()
                .get(cell.custom_index)
                .cloned()
                .ok_or_else(|| {
                    fail(IterationFailure::Property(ConfigError::MissingPropertyValues))
                })?;
            debug!(custom_index = cell.custom_index, %path, %value, "applying property value");
            path.apply(&mut **producer, value)
                .map_err(|e| fail(IterationFailure::Property(e)))?;
            self.state.applied_custom_index = Some(cell.custom_index);
        }

        if self.state.loaded_dataset.is_none() {
            let reference = &self.config.datasets[cell.dataset_index];
            debug!(dataset = %reference, "loading dataset");
            let mut dataset = self.loader.load(reference).map_err(|source| {
                fail(IterationFailure::DatasetLoad {
                    reference: reference.to_string(),
                    source,
                })
            })?;
            dataset.ensure_class_index().map_err(|source| {
                fail(IterationFailure::DatasetLoad {
                    reference: reference.to_string(),
                    source,
                })
            })?;
            let dataset = Arc::new(dataset);
            producer.set_dataset(Arc::clone(&dataset));
            self.state.loaded_dataset = Some(dataset);
        }

        let ctx = IterationContext {
            run: cell.run,
            dataset_index: cell.dataset_index,
            custom_index: cell.custom_index,
            deadline: self.iteration_timeout.map(|t| Instant::now() + t),
            cancel: self.cancel.clone(),
        };
        debug!(
            run = cell.run,
            dataset_index = cell.dataset_index,
            custom_index = cell.custom_index,
            "running iteration"
        );
        producer
            .run_iteration(&ctx, &mut **listener)
            .map_err(|e| fail(IterationFailure::Producer(e)))?;

        self.advance_counters();
        Ok(cell)
    }

    /// Run innermost, dataset next, custom property outermost.
    pub fn advance_counters(&mut self) {
        let state = &mut self.state;
        // compare before incrementing: run_upper may be u32::MAX
        if state.current_run < self.config.run_upper {
            state.current_run += 1;
        } else {
            state.current_run = self.config.run_lower;
            state.dataset_index += 1;
            state.loaded_dataset = None;
            if state.dataset_index >= self.config.datasets.len() {
                state.dataset_index = 0;
                if self.config.use_property_iterator {
                    state.custom_index += 1;
                    if state.custom_index >= self.config.active_property_values().len() {
                        state.finished = true;
                    }
                } else {
                    state.finished = true;
                }
            }
        }
    }

    /// Runs every remaining cell. A failed cell is recorded and skipped; a
    /// cancellation stops the sweep where it is.
    pub fn run_experiment(&mut self) -> SweepReport {
        let started_at = Utc::now();
        let mut completed = Vec::new();
        let mut errors = Vec::new();
        let mut cancelled = false;
        while self.has_more_iterations() {
            match self.next_iteration() {
                Ok(cell) => completed.push(cell),
                Err(err) if err.is_cancelled() => {
                    warn!(run = err.run, "sweep cancelled");
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "iteration failed; continuing");
                    errors.push(err);
                    self.advance_counters();
                }
            }
        }
        info!(
            completed = completed.len(),
            failed = errors.len(),
            cancelled,
            "sweep finished"
        );
        SweepReport {
            config_digest: self.config.digest(),
            started_at,
            finished_at: Utc::now(),
            completed,
            errors,
            cancelled,
        }
    }

    pub fn post_process(&mut self) -> Result<(), SweepError> {
        let producer = self.producer.as_mut().ok_or(ConfigError::MissingProducer)?;
        let listener = self.listener.as_mut().ok_or(ConfigError::MissingListener)?;
        producer
            .post_process(&mut **listener)
            .map_err(SweepError::PostProcess)?;
        listener.post_process()?;
        Ok(())
    }
}
