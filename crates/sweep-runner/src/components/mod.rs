//! Producers and listeners shipped with the runner, registered by
//! `ComponentRegistry::default()`.

mod command;
mod listeners;

pub use command::{CommandProducer, CommandSettings};
pub use listeners::{JsonlResultListener, JsonlSettings, StdoutListener};

use crate::protocol::{ResultListener, ResultProducer};
use serde::de::DeserializeOwned;
use serde_json::Value;

fn parse_settings<T: DeserializeOwned>(settings: &Value) -> Result<T, String> {
    serde_json::from_value(settings.clone()).map_err(|e| e.to_string())
}

pub(crate) fn command_producer(settings: &Value) -> Result<Box<dyn ResultProducer>, String> {
    let settings: CommandSettings = parse_settings(settings)?;
    Ok(Box::new(CommandProducer::from_settings(settings)?))
}

pub(crate) fn jsonl_listener(settings: &Value) -> Result<Box<dyn ResultListener>, String> {
    let settings: JsonlSettings = parse_settings(settings)?;
    Ok(Box::new(JsonlResultListener::new(settings)))
}

pub(crate) fn stdout_listener(_settings: &Value) -> Result<Box<dyn ResultListener>, String> {
    Ok(Box::new(StdoutListener::new()))
}
