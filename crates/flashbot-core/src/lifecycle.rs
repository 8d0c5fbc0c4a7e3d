use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

#[cfg(unix)]
use std::process::Command;

use crate::{errors::Error, Result};

const TAKEOVER_WAIT: Duration = Duration::from_millis(100);
const TAKEOVER_ATTEMPTS: u32 = 50;

/// Pidfile-based takeover of a previous instance.
///
/// Deploys restart the bot in place; a stale instance would keep the webhook
/// port bound. `acquire` terminates a live previous instance (the manual
/// `pkill` step of the deployment transcript), then records our own pid.
/// The pidfile is removed again on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = read_pid(path) {
            if pid != std::process::id() && process_alive(pid) {
                tracing::info!("terminating previous instance (pid {pid})");
                terminate(pid);

                let mut attempts = 0;
                while process_alive(pid) {
                    attempts += 1;
                    if attempts > TAKEOVER_ATTEMPTS {
                        return Err(Error::Config(format!(
                            "previous instance (pid {pid}) did not exit; stop it manually"
                        )));
                    }
                    thread::sleep(TAKEOVER_WAIT);
                }
            }
        }

        fs::write(path, std::process::id().to_string())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if read_pid(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse::<u32>().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn terminate(pid: u32) {
    let _ = Command::new("kill").arg(pid.to_string()).status();
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
