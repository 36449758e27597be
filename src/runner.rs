use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, UpmuxError};
use crate::media::MediaCommand;

/// Exit status of an external tool, reduced to what the pipeline acts on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Process exit code; `-1` when killed by a signal
    pub code: i32,
    /// `ERROR ..`, `Warning: ..` or empty
    pub message: String,
    pub stdout: Vec<u8>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Build an outcome from raw process output
    pub fn classify(code: i32, stdout: Vec<u8>, stderr: &[u8]) -> Self {
        let message = if code != 0 {
            let mut combined = stdout.clone();
            combined.extend_from_slice(stderr);
            format!("ERROR {}: {}", code, first_line(&combined))
        } else if !stderr.is_empty() {
            format!("Warning: {}", first_line(stderr))
        } else {
            String::new()
        };

        Self { code, message, stdout }
    }
}

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .split('\n')
        .next()
        .unwrap_or_default()
        .trim_end_matches('\r')
        .to_string()
}

/// Runs external tools
///
/// A tool that runs and fails is not an error; only a tool that cannot be
/// started is.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &MediaCommand) -> Result<CommandOutcome>;
}

/// Runs commands as child processes and waits for them
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &MediaCommand) -> Result<CommandOutcome> {
        debug!("Executing {}: {}", command.description, command.shell_line());

        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|source| UpmuxError::Spawn {
                tool: command.binary_path.clone(),
                source,
            })?;

        let code = output.status.code().unwrap_or(-1);
        Ok(CommandOutcome::classify(code, output.stdout, &output.stderr))
    }
}
