//! Benchmark sweep engine: runs a result producer over every combination of
//! run number, dataset and (optionally) one custom property value, pushing
//! result rows to a listener.

pub mod components;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod fields;
pub mod persist;
pub mod property;
pub mod protocol;
pub mod registry;
pub mod value;

#[cfg(test)]
mod testutil;

pub use config::{ComponentSpec, ExperimentConfig};
pub use controller::{Experiment, IterationState, SweepCell, SweepReport};
pub use dataset::{Dataset, DatasetLoader, DatasetRef, TabularJsonlLoader};
pub use error::{
    ConfigError, DatasetError, IterationError, IterationFailure, ListenerError, PersistError,
    ProducerError, SweepError,
};
pub use fields::{Configurable, FieldRegistry, ParamSet, Reflect};
pub use property::{PropertyNode, PropertyPath};
pub use protocol::{CancelToken, IterationContext, ResultListener, ResultProducer, ResultRow};
pub use registry::ComponentRegistry;
pub use value::{FieldValue, ValueKind};
