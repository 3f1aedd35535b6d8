//! Execution wrapper for host binaries.
//!
//! Keeps shell integration isolated so provider logic stays testable
//! (deterministic stdout parsing, no ad-hoc `Command` calls scattered about).

use diskvault_core::error::{VaultError, VaultResult};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct HostCommand {
    binary: PathBuf,
    timeout: Duration,
}

#[derive(Debug)]
pub(crate) struct Output {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

impl Output {
    /// Prefer stderr over stdout as the human-facing diagnostic.
    pub(crate) fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            "no additional output".to_string()
        }
    }
}

impl HostCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Run with piped stdio and the configured timeout, feeding `input` to
    /// stdin when given.
    pub(crate) fn run(&self, args: &[&str], input: Option<&[u8]>) -> VaultResult<Output> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command.spawn()?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload)?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(child, stdout_pipe, stderr_pipe)
    }

    /// Run and require exit code zero, mapping failures to `Operation`.
    pub(crate) fn run_checked(&self, args: &[&str], input: Option<&[u8]>) -> VaultResult<Output> {
        let out = self.run(args, input)?;
        if out.status != 0 {
            return Err(VaultError::Operation(format!(
                "{} {} failed (exit code {}): {}",
                self.binary.display(),
                args.first().copied().unwrap_or(""),
                out.status,
                out.diagnostic()
            )));
        }
        Ok(out)
    }

    /// Run with inherited stdio and no timeout. Used for operations where the
    /// binary prompts the operator directly (passphrase entry).
    pub(crate) fn run_interactive(&self, args: &[&str]) -> VaultResult<()> {
        let status = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        if !status.success() {
            return Err(VaultError::Operation(format!(
                "{} {} failed (exit code {})",
                self.binary.display(),
                args.first().copied().unwrap_or(""),
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }

    fn wait_with_timeout(
        &self,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> VaultResult<Output> {
        let start = Instant::now();
        let stdout_handle = spawn_output_reader(stdout_pipe);
        let stderr_handle = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        if exit_status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VaultError::Operation(format!(
                "{} timed out after {:?}",
                self.binary.display(),
                self.timeout
            )));
        }

        let stdout = stdout_handle
            .join()
            .map_err(|_| VaultError::Operation("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| VaultError::Operation("stderr reader thread panicked".into()))??;

        let status = exit_status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);

        Ok(Output {
            stdout,
            stderr,
            status,
        })
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<VaultResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> VaultResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}
