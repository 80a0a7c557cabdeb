use crate::error::ShimError;
use crate::proxy;
use crate::{EXIT_CODE_PATH, STDERR_PATH, STDIN_PATH, STDOUT_PATH};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

/// Where the supervisor sources the child's stdin and sinks its captured
/// stdout/stderr and exit code. Defaults to the fixed meta mount layout,
/// with the capture destinations overridable through the one-shot redirect
/// variables.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub stdin_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub exit_code_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stdin_path: PathBuf::from(STDIN_PATH),
            stdout_path: PathBuf::from(STDOUT_PATH),
            stderr_path: PathBuf::from(STDERR_PATH),
            exit_code_path: PathBuf::from(EXIT_CODE_PATH),
        }
    }
}

/// Immutable per-run configuration, built once at startup from the process
/// environment. Holds the capture layout and the exact environment the
/// child will inherit.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub capture: CaptureConfig,
    pub env: Vec<(String, String)>,
}

impl SupervisorConfig {
    /// Snapshot the environment for the child. The redirect variables are
    /// consumed into the capture config here and never reach the child; a
    /// `unix://` control-plane address is rewritten to a proxied `http://`
    /// address before the child can inherit it.
    pub async fn from_env() -> Result<Self, ShimError> {
        let mut config = Self::from_vars(std::env::vars());
        config.resolve_control_plane().await?;
        Ok(config)
    }

    /// Rewrite a `unix://` `DAGGER_HOST` in the snapshot to a proxied
    /// `http://localhost:<port>` address the child can reach over TCP.
    /// Addresses with any other scheme pass through untouched.
    pub async fn resolve_control_plane(&mut self) -> Result<(), ShimError> {
        for (key, val) in self.env.iter_mut() {
            if key.as_str() == "DAGGER_HOST" && val.starts_with("unix://") {
                let rewritten = proxy::proxy_api(val).await?;
                *val = rewritten;
            }
        }
        Ok(())
    }

    /// Split an environment snapshot into the child environment and the
    /// capture overrides. Reading a redirect variable removes it: a child
    /// inspecting its own environment never observes it.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut capture = CaptureConfig::default();
        let mut env = Vec::new();
        for (key, val) in vars {
            match key.as_str() {
                "_DAGGER_REDIRECT_STDOUT" => capture.stdout_path = PathBuf::from(val),
                "_DAGGER_REDIRECT_STDERR" => capture.stderr_path = PathBuf::from(val),
                _ => env.push((key, val)),
            }
        }
        Self { capture, env }
    }
}

/// Run the user command as this container's sole child, mirroring its
/// stdout/stderr both to the real streams and to the capture files, and
/// record its exit status. Returns the status the shim process itself
/// should exit with.
///
/// An empty argument list is rejected as [`ShimError::EmptyCommand`].
/// Capture-file creation failures are fatal; failures of the child to start
/// or exit cleanly fold into the returned status instead (1 when no numeric
/// code is available).
pub async fn run(args: &[String], config: SupervisorConfig) -> Result<i32, ShimError> {
    let Some((name, rest)) = args.split_first() else {
        return Err(ShimError::EmptyCommand);
    };

    let mut cmd = Command::new(name);
    cmd.args(rest);
    cmd.env_clear();
    cmd.envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    match std::fs::File::open(&config.capture.stdin_path) {
        Ok(stdin_file) => {
            cmd.stdin(Stdio::from(stdin_file));
        }
        Err(_) => {
            cmd.stdin(Stdio::null());
        }
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // Create the capture files up front so they exist, empty, even when the
    // child never starts.
    let stdout_file = tokio::fs::File::create(&config.capture.stdout_path).await?;
    let stderr_file = tokio::fs::File::create(&config.capture.stderr_path).await?;

    let exit_code = match cmd.spawn() {
        Ok(mut child) => {
            let stdout_task = child
                .stdout
                .take()
                .map(|src| tokio::spawn(tee(src, stdout_file, tokio::io::stdout())));
            let stderr_task = child
                .stderr
                .take()
                .map(|src| tokio::spawn(tee(src, stderr_file, tokio::io::stderr())));

            let status = child.wait().await;

            // The tees finish at pipe EOF; join them before recording the
            // exit code so the capture files are complete.
            for (name, task) in [("stdout", stdout_task), ("stderr", stderr_task)] {
                let Some(task) = task else { continue };
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("{} capture ended early: {}", name, e),
                    Err(e) => tracing::warn!("{} capture task failed: {}", name, e),
                }
            }

            match status {
                Ok(status) => status.code().unwrap_or(1),
                Err(e) => {
                    tracing::warn!("waiting for {} failed: {}", name, e);
                    1
                }
            }
        }
        Err(e) => {
            tracing::warn!("failed to start {}: {}", name, e);
            1
        }
    };

    write_exit_code(&config.capture.exit_code_path, exit_code);
    Ok(exit_code)
}

/// Copy every chunk read from `src` into both `file` and `mirror`,
/// preserving the stream's byte order.
async fn tee<R, F, M>(mut src: R, mut file: F, mut mirror: M) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: AsyncWrite + Unpin,
    M: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 4096];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        mirror.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    mirror.flush().await?;
    Ok(())
}

// Downstream consumers poll for this file to learn that the command
// finished, so not writing it would hang the whole build.
fn write_exit_code(path: &Path, code: i32) {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let result = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .and_then(|mut f| f.write_all(code.to_string().as_bytes()));
    if let Err(e) = result {
        panic!("write exit code to {}: {}", path.display(), e);
    }
}
