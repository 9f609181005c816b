//! External tool invocation (`security`, `envman`)

use crate::error::{ProvisionError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Convert a non-zero exit into `error`, built from the command's stderr
    pub fn check(self, error: impl FnOnce(&str) -> ProvisionError) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(error(self.stderr.trim()))
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

impl<R: CommandRunner> CommandRunner for &R {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        crate::debug!("running {program} {}", args.first().copied().unwrap_or_default());

        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProvisionError::MissingDependency(format!("{program} command not found"))
                } else {
                    ProvisionError::CommandExecution(format!("failed to execute {program}: {e}"))
                }
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
