//! Injectable progress log for pipeline stages.
//!
//! Stage code reports through a `&dyn PipelineLog` handed to it by the caller
//! instead of a process-wide logger. [`FacadeLog`] forwards to the `log` crate;
//! [`MemoryLog`] keeps events so tests can assert on them.

use std::fmt;

use log::Level;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Extract,
    Clean,
    SchemaSync,
    Load,
    Orchestrator,
    ControlApi,
}

impl Stage {
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::Extract => "EXTRACT",
            Stage::Clean => "CLEAN",
            Stage::SchemaSync => "SCHEMA_SYNC",
            Stage::Load => "LOAD",
            Stage::Orchestrator => "ORCHESTRATOR",
            Stage::ControlApi => "CONTROL_API",
        }
    }

    /// `log` target; kept under the crate prefix so the default filter applies.
    pub fn target(&self) -> &'static str {
        match self {
            Stage::Extract => "cloudpipe::EXTRACT",
            Stage::Clean => "cloudpipe::CLEAN",
            Stage::SchemaSync => "cloudpipe::SCHEMA_SYNC",
            Stage::Load => "cloudpipe::LOAD",
            Stage::Orchestrator => "cloudpipe::ORCHESTRATOR",
            Stage::ControlApi => "cloudpipe::CONTROL_API",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub trait PipelineLog: Send + Sync {
    fn record(&self, level: Level, stage: Stage, message: &str);

    fn info(&self, stage: Stage, message: &str) {
        self.record(Level::Info, stage, message);
    }

    fn warn(&self, stage: Stage, message: &str) {
        self.record(Level::Warn, stage, message);
    }

    fn error(&self, stage: Stage, message: &str) {
        self.record(Level::Error, stage, message);
    }

    fn debug(&self, stage: Stage, message: &str) {
        self.record(Level::Debug, stage, message);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeLog;

impl PipelineLog for FacadeLog {
    fn record(&self, level: Level, stage: Stage, message: &str) {
        log::log!(target: stage.target(), level, "{message}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: Level,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Messages logged at `level` for `stage`, in order.
    pub fn messages(&self, stage: Stage, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.stage == stage && event.level == level)
            .map(|event| event.message.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| event.message.contains(needle))
    }
}

impl PipelineLog for MemoryLog {
    fn record(&self, level: Level, stage: Stage, message: &str) {
        self.events.lock().push(LogEvent {
            level,
            stage,
            message: message.to_string(),
        });
    }
}
