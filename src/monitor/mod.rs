pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod memory;
pub mod network;
pub mod temperature;

use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

fn timeout_ms(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

/// Reads a whole kernel pseudo-file, bounded by `timeout`.
pub async fn read_source(path: &Path, timeout: Duration) -> Result<String> {
    match tokio::time::timeout(timeout, tokio::fs::read_to_string(path)).await {
        Err(_) => Err(Error::Timeout(timeout_ms(timeout))),
        Ok(Ok(raw)) => Ok(raw),
        Ok(Err(e)) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            Err(Error::Unavailable(format!("{}: {}", path.display(), e)))
        }
        Ok(Err(e)) => Err(e.into()),
    }
}

/// Runs `argv` and returns its stdout. The child is killed if the timeout
/// fires first.
pub async fn run_command(argv: &[String], timeout: Duration) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Command("empty command line".into()))?;
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => return Err(Error::Timeout(timeout_ms(timeout))),
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::Unavailable(format!("{}: {}", program, e)))
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(output)) => output,
    };

    // df exits non-zero when a single mount is unreadable but still reports the rest
    if !output.status.success() && output.stdout.is_empty() {
        return Err(Error::Command(format!("{} exited with {}", program, output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub(crate) fn parse_u64(field: &str, what: &str) -> Result<u64> {
    field
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("{}: invalid number {:?}", what, field)))
}
