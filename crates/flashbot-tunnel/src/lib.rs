//! Reverse tunnel supervisor.
//!
//! The tunnel client (an `ssh -R` invocation or similar) is an external,
//! opaque process. This crate starts it, mirrors its output into the tunnel
//! log, watches for the forwarding confirmation line, and kills it on
//! shutdown. There is no automatic restart; recovery is operator-driven.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{watch, Mutex},
};

use flashbot_core::{errors::Error, Result};

#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// Full command line for the tunnel client,
    /// e.g. `ssh -R 80:localhost:8443 serveo.net`.
    pub command: String,
    pub log_path: PathBuf,
}

#[derive(Debug)]
pub struct Tunnel {
    child: Arc<Mutex<Option<tokio::process::Child>>>,
    forwarded: watch::Receiver<Option<String>>,
    log_path: PathBuf,
}

impl Tunnel {
    pub async fn start(cfg: TunnelConfig) -> Result<Self> {
        let words = split_command(&cfg.command);
        let Some((program, args)) = words.split_first() else {
            return Err(Error::Tunnel("tunnel command is empty".to_string()));
        };

        // Truncate the log first: a failed start leaves an empty file, which
        // is how the operator diagnoses tunnel failures.
        let log_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&cfg.log_path)?;
        let log = Arc::new(StdMutex::new(log_file));

        tracing::info!("starting tunnel: {}", cfg.command);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Tunnel(format!("failed to spawn `{}`: {e}", cfg.command)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Tunnel("tunnel stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Tunnel("tunnel stderr was not captured".to_string()))?;

        let (tx, rx) = watch::channel::<Option<String>>(None);

        // Mirror both output streams into the log until EOF. Dropping `tx`
        // at the end tells waiters the tunnel went away.
        tokio::spawn(async move {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let mut out_done = false;
            let mut err_done = false;

            while !(out_done && err_done) {
                tokio::select! {
                    line = out.next_line(), if !out_done => match line {
                        Ok(Some(l)) => observe_line(&log, &tx, &l),
                        _ => out_done = true,
                    },
                    line = err.next_line(), if !err_done => match line {
                        Ok(Some(l)) => observe_line(&log, &tx, &l),
                        _ => err_done = true,
                    },
                }
            }
        });

        Ok(Self {
            child: Arc::new(Mutex::new(Some(child))),
            forwarded: rx,
            log_path: cfg.log_path,
        })
    }

    /// Wait until the tunnel confirms forwarding and return the public URL.
    pub async fn wait_for_forwarding(&self, timeout: Duration) -> Result<String> {
        let mut rx = self.forwarded.clone();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(url) = current {
                    return Ok(url);
                }
                if rx.changed().await.is_err() {
                    return Err(self.no_confirmation_error("tunnel exited"));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(res) => res,
            Err(_) => Err(self.no_confirmation_error(&format!(
                "no forwarding confirmation within {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn no_confirmation_error(&self, what: &str) -> Error {
        let log_is_empty = std::fs::metadata(&self.log_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        if log_is_empty {
            Error::Tunnel(format!(
                "{what} and the tunnel log {} is empty; the tunnel likely failed to start",
                self.log_path.display()
            ))
        } else {
            Error::Tunnel(format!(
                "{what} before a forwarding confirmation; check {}",
                self.log_path.display()
            ))
        }
    }

    /// Kill and reap the tunnel process. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        let child = {
            let mut guard = self.child.lock().await;
            guard.take()
        };

        let Some(mut child) = child else {
            return Ok(());
        };

        // If it's already exited, `try_wait` reaps it.
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        match child.kill().await {
            Ok(()) => {
                let _ = child.wait().await?;
                tracing::info!("tunnel stopped");
            }
            Err(e) => {
                // If it exited between `try_wait` and `kill`, `wait` reaps it.
                if child.try_wait()?.is_none() {
                    let mut guard = self.child.lock().await;
                    *guard = Some(child);
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(())
    }
}

fn observe_line(log: &Arc<StdMutex<File>>, tx: &watch::Sender<Option<String>>, line: &str) {
    if let Ok(mut f) = log.lock() {
        let _ = writeln!(f, "{line}");
        let _ = f.flush();
    }

    // First confirmation wins.
    if tx.borrow().is_none() {
        if let Some(url) = find_public_url(line) {
            tracing::info!("tunnel forwarding confirmed: {url}");
            let _ = tx.send(Some(url));
        }
    }
}

/// Extract the public URL from a forwarding confirmation line.
///
/// Matches serveo-style lines (`Forwarding HTTP traffic from https://…`) and
/// clients that print the bare URL on a line of its own.
fn find_public_url(line: &str) -> Option<String> {
    let re = Regex::new(r"https?://[^\s'\x22]+").expect("valid regex");
    let url = re
        .find(line)?
        .as_str()
        .trim_end_matches(['.', ','])
        .to_string();

    let lower = line.to_lowercase();
    if lower.contains("forward") || line.trim() == url {
        return Some(url);
    }
    None
}

/// Split a command line into words, honoring quotes and basic escapes.
fn split_command(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = s.chars();

    let mut in_single = false;
    let mut in_double = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    cur.push(next);
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if !cur.is_empty() {
                    out.push(cur);
                    cur = String::new();
                }
            }
            other => {
                cur.push(other);
            }
        }
    }

    if !cur.is_empty() {
        out.push(cur);
    }

    out
}
