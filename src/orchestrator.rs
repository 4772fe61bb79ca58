//! Runs the pipeline stages as independent subprocesses of the `cloudpipe`
//! executable, one after another.
//!
//! A failing stage is recorded and the next stage still runs; the stages share
//! nothing but the configuration directory and the object store.

use std::{
    env,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::journal::{PipelineLog, Stage};

/// Stage subcommands in run order.
pub const DEFAULT_STAGES: [&str; 3] = ["extract", "clean", "sync"];

/// Overrides the executable used for stage subprocesses.
pub const EXECUTABLE_OVERRIDE_ENV: &str = "CLOUDPIPE_STAGE_EXE";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines the stage wrote to stderr, or the spawn error.
    pub stderr_tail: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    program: PathBuf,
    config_dir: PathBuf,
    stages: Vec<String>,
    sync_args: Vec<String>,
}

impl Orchestrator {
    pub fn new(program: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_dir: config_dir.into(),
            stages: DEFAULT_STAGES.iter().map(|s| s.to_string()).collect(),
            sync_args: Vec::new(),
        }
    }

    /// Uses the running executable, or `CLOUDPIPE_STAGE_EXE` when set.
    pub fn for_current_exe(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let program = match env::var_os(EXECUTABLE_OVERRIDE_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => env::current_exe().context("Resolving the cloudpipe executable")?,
        };
        Ok(Self::new(program, config_dir))
    }

    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Extra arguments passed to the `sync` stage only.
    pub fn with_sync_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn run(&self, log: &dyn PipelineLog) -> Vec<StageResult> {
        log.info(
            Stage::Orchestrator,
            &format!(
                "Running stage(s) {} with config {:?}",
                self.stages.join(", "),
                self.config_dir
            ),
        );
        let results: Vec<StageResult> = self
            .stages
            .iter()
            .map(|stage| self.run_stage(stage, log))
            .collect();
        let failed = results.iter().filter(|r| !r.success).count();
        if failed == 0 {
            log.info(Stage::Orchestrator, "All stages completed");
        } else {
            log.warn(
                Stage::Orchestrator,
                &format!("{failed} of {} stage(s) failed", results.len()),
            );
        }
        results
    }

    fn run_stage(&self, stage: &str, log: &dyn PipelineLog) -> StageResult {
        let mut command = Command::new(&self.program);
        command
            .arg(stage)
            .arg("--config-dir")
            .arg(&self.config_dir)
            .stdin(Stdio::null());
        if stage == "sync" {
            command.args(&self.sync_args);
        }
        log.info(Stage::Orchestrator, &format!("Starting stage {stage}"));
        let started = Instant::now();
        let output = command.output();
        let duration_ms = started.elapsed().as_millis() as u64;

        match output {
            Ok(output) => {
                let success = output.status.success();
                let stderr_tail = tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES);
                if success {
                    log.info(
                        Stage::Orchestrator,
                        &format!("Stage {stage} finished in {duration_ms} ms"),
                    );
                } else {
                    log.error(
                        Stage::Orchestrator,
                        &format!("Stage {stage} failed with {}: {stderr_tail}", output.status),
                    );
                }
                StageResult {
                    stage: stage.to_string(),
                    success,
                    exit_code: output.status.code(),
                    stderr_tail,
                    duration_ms,
                }
            }
            Err(err) => {
                let message = format!("cannot start {:?}: {err}", self.program);
                log.error(Stage::Orchestrator, &format!("Stage {stage}: {message}"));
                StageResult {
                    stage: stage.to_string(),
                    success: false,
                    exit_code: None,
                    stderr_tail: message,
                    duration_ms,
                }
            }
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryLog;
    use tempfile::tempdir;

    #[test]
    fn tail_keeps_last_non_blank_lines() {
        assert_eq!(tail("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 3), "");
    }

    #[test]
    fn missing_program_fails_every_stage_without_stopping() {
        let dir = tempdir().expect("temp dir");
        let log = MemoryLog::new();
        let results = Orchestrator::new(dir.path().join("no-such-binary"), dir.path()).run(&log);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.success && r.exit_code.is_none()));
        assert_eq!(
            results.iter().map(|r| r.stage.as_str()).collect::<Vec<_>>(),
            DEFAULT_STAGES
        );
        assert!(log.contains("3 of 3 stage(s) failed"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_stage_does_not_stop_later_stages() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("temp dir");
        let script = dir.path().join("stage.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = clean ]; then echo 'clean broke' >&2; exit 3; fi\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let log = MemoryLog::new();
        let results = Orchestrator::new(&script, dir.path()).run(&log);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].exit_code, Some(3));
        assert_eq!(results[1].stderr_tail, "clean broke");
        assert!(results[2].success);
    }
}
