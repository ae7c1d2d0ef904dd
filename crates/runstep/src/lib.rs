//! runstep - custom run-step execution engine
//!
//! Runs user-supplied shell commands for a Terraform/OpenTofu project:
//! ensures the tool version, builds the step environment, executes the
//! command with live output, and normalizes failures.

pub mod error;
pub mod executor;
pub mod output;
pub mod postprocess;
pub mod resolver;

use chrono::Utc;
use executor::{OutputTarget, ShellSpec};
use output::OutputSink;
use resolver::VersionEnsurer;
use runstep_core::env::build_env;
use runstep_core::{EngineConfig, ExecutionContext, Id, PostProcessMode};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use error::{ExitReason, FailureKind, Result, RunStepError};

/// One command to run for a project.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Shell command text, passed to the shell unmodified.
    pub command: String,
    /// Working directory; must already exist.
    pub dir: PathBuf,
    /// Extra environment variables; derived variables win on conflict.
    pub env: BTreeMap<String, String>,
    /// Forward output lines to the output sink.
    pub stream_output: bool,
    pub post_process: PostProcessMode,
    /// Overrides the engine's configured shell.
    pub shell: Option<ShellSpec>,
}

impl RunRequest {
    pub fn new(command: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            dir: dir.into(),
            env: BTreeMap::new(),
            stream_output: true,
            post_process: PostProcessMode::Show,
            shell: None,
        }
    }
}

/// Executes custom run steps.
pub struct RunStepRunner {
    config: EngineConfig,
    ensurer: Arc<dyn VersionEnsurer>,
    sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for RunStepRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStepRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RunStepRunner {
    pub fn new(
        config: EngineConfig,
        ensurer: Arc<dyn VersionEnsurer>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            config,
            ensurer,
            sink,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one step and return its (post-processed) output.
    ///
    /// The tool version is ensured first, even for an empty command; if that
    /// fails nothing is spawned.
    pub async fn run(&self, ctx: &ExecutionContext, request: &RunRequest) -> Result<String> {
        let tool = resolver::resolve(self.ensurer.as_ref(), ctx, &self.config).await?;

        if request.command.trim().is_empty() {
            debug!(dir = %request.dir.display(), "empty run step command");
            return Ok(String::new());
        }

        let inherited_path = std::env::var("PATH").unwrap_or_default();
        let env = build_env(ctx, &request.dir, &tool, &inherited_path, &request.env);

        let shell = request
            .shell
            .clone()
            .unwrap_or_else(|| ShellSpec::from_config(&self.config));
        let invocation = Id::new();
        let run_key = ctx.run_key();
        let target = request.stream_output.then(|| OutputTarget {
            sink: self.sink.as_ref(),
            invocation: &invocation,
            run: &run_key,
        });

        info!(
            invocation = %invocation,
            run = %run_key,
            command = %request.command,
            dir = %request.dir.display(),
            distribution = %tool.distribution,
            version = %tool.version,
            "running custom step"
        );

        let start = Utc::now();
        let result = executor::execute(&shell, &request.command, &request.dir, &env, target).await;
        let duration_ms = (Utc::now() - start).num_milliseconds();

        match result {
            Ok(output) => {
                info!(
                    invocation = %invocation,
                    duration_ms,
                    output_bytes = output.len(),
                    "custom step complete"
                );
                Ok(postprocess::apply(request.post_process, output, &tool))
            }
            Err(err) => {
                // Policy check failures are expected and reported by the caller.
                if !ctx.custom_policy_check {
                    warn!(
                        invocation = %invocation,
                        duration_ms,
                        exit_code = err.exit_code(),
                        error = %err,
                        "custom step failed"
                    );
                }
                Err(err)
            }
        }
    }
}
