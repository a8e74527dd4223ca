use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::runner::{ProcessRunner, RunFault};
use super::toolchain::{Registry, ToolchainDescriptor, normalize};
use super::workspace::Workspace;
use super::{ExecError, ExecutionOutcome, ExecutionRequest};

pub const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(10);
pub const RUN_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Independent wall-clock ceilings for the two stages
#[derive(Debug, Clone, Copy)]
pub struct StageLimits {
    pub compile: Duration,
    pub run: Duration,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            compile: COMPILE_TIME_LIMIT,
            run: RUN_TIME_LIMIT,
        }
    }
}

/// Stage → Compile (optional) → Run → Clean, for one request at a time per call
///
/// A `Pipeline` holds no per-request state, so one instance serves any number of
/// concurrent `execute` calls.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<Registry>,
    root: PathBuf,
    runner: ProcessRunner,
    limits: StageLimits,
}

impl Pipeline {
    pub fn new(registry: Arc<Registry>, root: PathBuf, runner: ProcessRunner) -> Self {
        Self {
            registry,
            root,
            runner,
            limits: StageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: StageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs a request to a terminal outcome. Never fails; every fault becomes an outcome.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let start = Instant::now();

        let descriptor = match self.registry.lookup(&request.language) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::info!("Rejected request from {}: {e}", request.caller);
                return ExecutionOutcome::failed(
                    normalize(&request.language),
                    e,
                    Duration::ZERO,
                    None,
                );
            }
        };
        let language = descriptor.name.clone();

        let mut workspace = match Workspace::acquire(
            &self.root,
            descriptor,
            &request.code,
            request.input.as_deref(),
        ) {
            Ok(workspace) => workspace,
            Err(e) => {
                log::error!("Failed to allocate workspace for {language}: {e}");
                return ExecutionOutcome::failed(language, e, start.elapsed(), None);
            }
        };
        let workspace_id = workspace.id();

        let result = self.drive(descriptor, &workspace).await;
        workspace.release();
        let elapsed = start.elapsed();

        match result {
            Ok(stdout) => {
                log::info!("Workspace {workspace_id} ({language}) succeeded in {elapsed:?}");
                ExecutionOutcome::succeeded(language, stdout, elapsed, workspace_id)
            }
            Err(e) => {
                log::info!(
                    "Workspace {workspace_id} ({language}) ended in {}",
                    e.kind().as_str()
                );
                let elapsed = match &e {
                    ExecError::TimedOut(limit) => *limit,
                    _ => elapsed,
                };
                ExecutionOutcome::failed(language, e, elapsed, Some(workspace_id))
            }
        }
    }

    /// Drives a staged workspace through compilation and execution, returning stdout
    async fn drive(
        &self,
        descriptor: &ToolchainDescriptor,
        workspace: &Workspace,
    ) -> Result<String, ExecError> {
        let substitutions = workspace.substitutions();

        if let Some(compile) = &descriptor.compile {
            log::debug!("Workspace {}: Staged -> Compiling", workspace.id());
            let command = compile.render(&substitutions);
            let output = self
                .runner
                .run(&command, workspace.dir(), None, self.limits.compile)
                .await
                .map_err(|fault| match fault {
                    RunFault::Spawn { program, .. } => ExecError::SpawnFailed(program),
                    RunFault::TimedOut { limit } => ExecError::CompileFailed(format!(
                        "compiler did not finish within {} seconds",
                        limit.as_secs()
                    )),
                    fault @ RunFault::Wait(_) => ExecError::CompileFailed(fault.to_string()),
                })?;

            if !output.success() {
                let stderr = output.stderr_text();
                let stdout = output.stdout_text();
                // Some compilers report on stdout only
                let diagnostic = if stderr.trim().is_empty() && !stdout.trim().is_empty() {
                    stdout
                } else {
                    output.diagnostic()
                };
                return Err(ExecError::CompileFailed(diagnostic));
            }
            log::debug!("Workspace {}: Compiling -> Running", workspace.id());
        } else {
            log::debug!("Workspace {}: Staged -> Running", workspace.id());
        }

        let stdin = workspace.read_input()?;
        let command = descriptor.run.render(&substitutions);
        let output = self
            .runner
            .run(&command, workspace.dir(), stdin, self.limits.run)
            .await
            .map_err(|fault| match fault {
                RunFault::Spawn { program, .. } => ExecError::SpawnFailed(program),
                RunFault::TimedOut { limit } => ExecError::TimedOut(limit),
                fault @ RunFault::Wait(_) => ExecError::RuntimeFailed {
                    stdout: String::new(),
                    message: fault.to_string(),
                },
            })?;

        if output.success() {
            Ok(output.stdout_text())
        } else {
            Err(ExecError::RuntimeFailed {
                stdout: output.stdout_text(),
                message: output.diagnostic(),
            })
        }
    }
}
