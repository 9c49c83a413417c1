//! Runs the 4GB patch installer and answers its "press any key" prompt.

use crate::error::SanityError;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use futures::future::join_all;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    task::JoinHandle,
    time::Instant,
};
use tracing::{info, warn};

const LOG_PREFIX: &str = "[4GB Patch Installer]";
const PROMPT: &str = "any key";

/// Finds the first known installer executable inside `install_dir`.
pub fn find_installer(install_dir: &Path, names: &[&str]) -> Option<PathBuf> {
    let entries = std::fs::read_dir(install_dir).ok()?;
    let present: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names
        .iter()
        .find(|name| present.iter().any(|file| file.as_str() == **name))
        .map(|name| install_dir.join(name))
}

pub async fn run_installer(
    executable: &Path,
    game_root: &Path,
    timeout: Option<Duration>,
) -> Result<(), SanityError> {
    let mut command = Command::new(executable);
    command.current_dir(game_root);
    drive(command, timeout).await
}

/// Spawns `command` with piped stdio and waits for a zero exit code.
///
/// The timeout bounds both the exit and the output drain. Without one an
/// installer that never exits blocks forever.
pub async fn drive(mut command: Command, timeout: Option<Duration>) -> Result<(), SanityError> {
    let program = PathBuf::from(command.as_std().get_program());
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|err| SanityError::io(&program, err))?;
    let stdin = child.stdin.take();
    let mut pumps: Vec<JoinHandle<()>> = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(pump_stdout(stdout, stdin)))
        .into_iter()
        .chain(child.stderr.take().map(|stderr| tokio::spawn(pump_stderr(stderr))))
        .collect();

    let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
    let waited = match deadline {
        Some((limit, at)) => match tokio::time::timeout_at(at, child.wait()).await {
            Ok(waited) => waited,
            Err(_) => {
                let _ = child.kill().await;
                abort_all(&pumps);
                return Err(SanityError::InstallerTimeout(limit));
            }
        },
        None => child.wait().await,
    };
    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            abort_all(&pumps);
            return Err(SanityError::io(&program, err));
        }
    };

    // A helper spawned by the installer can hold the pipes open after it exits.
    match deadline {
        Some((_, at)) => {
            let joined = tokio::time::timeout_at(at, join_all(pumps.iter_mut())).await;
            if joined.is_err() {
                warn!("{LOG_PREFIX} output still open after exit, detaching");
                abort_all(&pumps);
            }
        }
        None => {
            join_all(pumps.iter_mut()).await;
        }
    }

    if status.success() {
        Ok(())
    } else {
        Err(SanityError::InstallerExit(status.code()))
    }
}

fn abort_all(pumps: &[JoinHandle<()>]) {
    for pump in pumps {
        pump.abort();
    }
}

async fn pump_stdout<R>(mut stdout: R, mut stdin: Option<ChildStdin>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 4096];
    let mut pending = String::new();
    loop {
        let read = match stdout.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        pending.push_str(&String::from_utf8_lossy(&buffer[..read]));

        let mut prompted = false;
        while let Some(index) = pending.find('\n') {
            let line: String = pending.drain(..=index).collect();
            prompted |= log_line(&line);
        }
        // Prompts are usually printed without a trailing newline.
        if is_prompt(&pending) {
            prompted |= log_line(&pending);
            pending.clear();
        }

        if prompted {
            if let Some(stdin) = stdin.as_mut() {
                if let Err(err) = answer_prompt(stdin).await {
                    warn!("{LOG_PREFIX} failed to answer prompt: {err}");
                }
            }
        }
    }
    if !pending.trim().is_empty() {
        log_line(&pending);
    }
}

async fn answer_prompt(stdin: &mut ChildStdin) -> std::io::Result<()> {
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

fn is_prompt(text: &str) -> bool {
    text.to_lowercase().contains(PROMPT)
}

/// Logs a non-empty line and reports whether it is a key prompt.
fn log_line(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    info!("{LOG_PREFIX} {line}");
    is_prompt(line)
}

async fn pump_stderr<R>(mut stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 4096];
    loop {
        match stderr.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                let text = String::from_utf8_lossy(&buffer[..read]);
                let text = text.trim();
                if !text.is_empty() {
                    warn!("{LOG_PREFIX} {text}");
                }
            }
        }
    }
}
