//! Fakes shared by the unit tests: a producer with a nested learner, a
//! journaling listener and an in-memory dataset loader.

use crate::dataset::{Dataset, DatasetLoader, DatasetRef};
use crate::error::{DatasetError, ListenerError, ProducerError};
use crate::fields::{Configurable, FieldRegistry, Reflect};
use crate::protocol::{IterationContext, ResultListener, ResultProducer, ResultRow};
use crate::value::{FieldValue, ValueKind};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub const FAKE_PRODUCER: &str = "FakeProducer";
pub const FAKE_LEARNER: &str = "FakeLearner";

#[derive(Debug, Default)]
pub struct Journal {
    pub events: Vec<String>,
    /// (run, dataset relation, learner depth) per executed iteration.
    pub cells: Vec<(u32, String, i64)>,
    pub depth_writes: Vec<i64>,
    pub loads: Vec<String>,
    pub rows: Vec<ResultRow>,
}

pub type SharedJournal = Rc<RefCell<Journal>>;

pub fn journal() -> SharedJournal {
    Rc::new(RefCell::new(Journal::default()))
}

#[derive(Debug, Default)]
pub struct FakeLearner {
    pub depth: i64,
    pub journal: SharedJournal,
}

impl Reflect for FakeLearner {
    fn registry() -> FieldRegistry<Self> {
        FieldRegistry::<Self>::new(FAKE_LEARNER).value(
            "depth",
            ValueKind::Int,
            |l| FieldValue::Int(l.depth),
            |l, v| {
                let depth = v.as_int().unwrap_or_default();
                if depth < 0 {
                    return Err("depth must not be negative".to_string());
                }
                l.depth = depth;
                l.journal.borrow_mut().depth_writes.push(depth);
                Ok(())
            },
        )
    }
}

#[derive(Debug)]
pub struct FakeProducer {
    pub learner: FakeLearner,
    pub label: String,
    pub fail_on_runs: Vec<u32>,
    pub fail_pre_process: bool,
    pub dataset: Option<Arc<Dataset>>,
    pub journal: SharedJournal,
}

impl Default for FakeProducer {
    fn default() -> Self {
        Self::with_journal(journal())
    }
}

impl FakeProducer {
    pub fn with_journal(journal: SharedJournal) -> Self {
        Self {
            learner: FakeLearner {
                depth: 1,
                journal: journal.clone(),
            },
            label: "baseline".to_string(),
            fail_on_runs: Vec::new(),
            fail_pre_process: false,
            dataset: None,
            journal,
        }
    }

    fn log(&self, event: impl Into<String>) {
        self.journal.borrow_mut().events.push(event.into());
    }
}

impl Reflect for FakeProducer {
    fn registry() -> FieldRegistry<Self> {
        FieldRegistry::<Self>::new(FAKE_PRODUCER)
            .nested(
                "learner",
                |p| &p.learner as &dyn Configurable,
                |p| &mut p.learner as &mut dyn Configurable,
            )
            .value(
                "label",
                ValueKind::Text,
                |p| FieldValue::Text(p.label.clone()),
                |p, v| {
                    p.label = v.as_text().unwrap_or_default().to_string();
                    Ok(())
                },
            )
    }
}

impl ResultProducer for FakeProducer {
    fn bind_listener(&mut self) {
        self.log("bind");
    }

    fn pre_process(&mut self, _listener: &mut dyn ResultListener) -> Result<(), ProducerError> {
        self.log("pre_process");
        if self.fail_pre_process {
            return Err(ProducerError::Failed("model file missing".to_string()));
        }
        Ok(())
    }

    fn set_dataset(&mut self, dataset: Arc<Dataset>) {
        self.log(format!("set_dataset:{}", dataset.relation()));
        self.dataset = Some(dataset);
    }

    fn run_iteration(
        &mut self,
        ctx: &IterationContext,
        listener: &mut dyn ResultListener,
    ) -> Result<(), ProducerError> {
        let dataset = self.dataset.clone().ok_or(ProducerError::NoDataset)?;
        if self.fail_on_runs.contains(&ctx.run) {
            return Err(ProducerError::Failed(format!("run {} exploded", ctx.run)));
        }
        self.journal.borrow_mut().cells.push((
            ctx.run,
            dataset.relation().to_string(),
            self.learner.depth,
        ));
        listener.accept_result_row(
            ResultRow::new()
                .with_key("run", ctx.run)
                .with_key("dataset", dataset.relation())
                .with_result("depth", self.learner.depth),
        )?;
        Ok(())
    }

    fn post_process(&mut self, _listener: &mut dyn ResultListener) -> Result<(), ProducerError> {
        self.log("post_process");
        Ok(())
    }
}

pub struct FakeListener {
    pub journal: SharedJournal,
}

impl ResultListener for FakeListener {
    fn pre_process(&mut self) -> Result<(), ListenerError> {
        self.journal.borrow_mut().events.push("listener_pre".to_string());
        Ok(())
    }

    fn accept_result_row(&mut self, row: ResultRow) -> Result<(), ListenerError> {
        self.journal.borrow_mut().rows.push(row);
        Ok(())
    }

    fn post_process(&mut self) -> Result<(), ListenerError> {
        self.journal.borrow_mut().events.push("listener_post".to_string());
        Ok(())
    }
}

/// Serves every reference as a three-attribute table named after its file
/// stem; references containing "missing" fail to load.
pub struct FakeLoader {
    pub journal: SharedJournal,
}

impl DatasetLoader for FakeLoader {
    fn load(&mut self, reference: &DatasetRef) -> Result<Dataset, DatasetError> {
        let name = reference.to_string();
        self.journal.borrow_mut().loads.push(name.clone());
        if name.contains("missing") {
            return Err(DatasetError::MissingHeader(reference.path().to_path_buf()));
        }
        let relation = reference
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();
        Ok(Dataset::new(
            relation,
            vec!["x".to_string(), "y".to_string(), "class".to_string()],
        ))
    }
}
