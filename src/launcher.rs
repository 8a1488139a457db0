//! Recorder process launcher
//!
//! Opaque collaborator: once wiring is complete the core hands over an
//! argument vector, blocks until the child exits, and relays its status as
//! this program's own exit code. The child's output streams are inherited.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to start {command:?}: {source}")]
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },
}

/// Command path plus the pass-through arguments, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub command: PathBuf,
    pub args: Vec<String>,
}

impl Launch {
    /// The full argument vector as printed in the status output.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.command.display().to_string()];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Spawn the command, wait for it, and return the code to exit with.
///
/// A child killed by a signal has no exit code; it is mapped to the shell
/// convention of 128 plus the signal number.
pub fn run_command(launch: &Launch) -> Result<i32, LaunchError> {
    info!(command = %launch.command.display(), args = ?launch.args, "launching recorder");

    let status = Command::new(&launch.command)
        .args(&launch.args)
        .status()
        .map_err(|source| LaunchError::Spawn {
            command: launch.command.clone(),
            source,
        })?;

    let code = status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            return 128 + status.signal().unwrap_or(0);
        }
        #[cfg(not(unix))]
        1
    });

    debug!(code, "recorder exited");
    Ok(code)
}
