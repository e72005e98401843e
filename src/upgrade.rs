//! The modernization oracle.
//!
//! The rules that rewrite Python syntax live outside this crate. [`Upgrader`]
//! is the seam: the production implementation shells out to ruff, tests plug
//! in closures.

use crate::error::UpgradeError;
use crate::version::PythonVersion;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Rewrites source code so that it uses syntax available from `target` on.
///
/// Implementations must be deterministic and free of side effects: the same
/// input always produces the same output, which is what makes caching sound.
pub trait Upgrader: Send + Sync {
    fn upgrade(&self, source: &str, target: PythonVersion) -> Result<String, UpgradeError>;
}

impl<F> Upgrader for F
where
    F: Fn(&str, PythonVersion) -> Result<String, UpgradeError> + Send + Sync,
{
    fn upgrade(&self, source: &str, target: PythonVersion) -> Result<String, UpgradeError> {
        self(source, target)
    }
}

/// Runs `ruff check --fix` with the pyupgrade (`UP`) and unused-import
/// (`F401`) rules against a single fragment read from stdin.
#[derive(Debug, Clone)]
pub struct RuffUpgrader {
    command: String,
    timeout: Option<Duration>,
}

impl RuffUpgrader {
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    fn args(target: PythonVersion) -> Vec<String> {
        [
            "check",
            "--no-cache",
            "--fix",
            "--exit-zero",
            "--quiet",
            "--isolated",
            "--select",
            "UP",
            "--select",
            "F401",
            "--target-version",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([target.ruff_target(), "-".to_string()])
        .collect()
    }

    async fn run(&self, source: &str, target: PythonVersion) -> Result<String, UpgradeError> {
        let fault = |message: String| UpgradeError::Fault { target, message };

        let mut child = tokio::process::Command::new(&self.command)
            .args(Self::args(target))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| fault(format!("failed to run '{}': {}", self.command, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| fault("stdin not captured".to_string()))?;
        stdin
            .write_all(source.as_bytes())
            .await
            .map_err(|e| fault(format!("failed to write source: {}", e)))?;
        drop(stdin);

        let output = match self.timeout {
            Some(after) => tokio::time::timeout(after, child.wait_with_output())
                .await
                .map_err(|_| UpgradeError::Timeout { target, after })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| fault(format!("failed to collect output: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("SyntaxError") || stderr.contains("Failed to parse") {
            return Err(UpgradeError::Unparseable {
                target,
                message: stderr.trim().to_string(),
            });
        }
        if !output.status.success() {
            return Err(fault(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let upgraded = String::from_utf8(output.stdout)
            .map_err(|_| fault("output is not valid UTF-8".to_string()))?;
        Ok(restore_trailing_newline(source, upgraded))
    }
}

impl Upgrader for RuffUpgrader {
    fn upgrade(&self, source: &str, target: PythonVersion) -> Result<String, UpgradeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| UpgradeError::Fault {
                target,
                message: format!("failed to start runtime: {}", e),
            })?;
        runtime.block_on(self.run(source, target))
    }
}

/// ruff always terminates its output with a newline; fragments usually don't.
fn restore_trailing_newline(source: &str, mut upgraded: String) -> String {
    if !source.ends_with('\n') && upgraded.ends_with('\n') {
        upgraded.pop();
    }
    upgraded
}
