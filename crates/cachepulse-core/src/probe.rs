//! Speed-probe supervision.
//!
//! The probe is an external process that scans datasource log directories
//! and streams throughput telemetry over stdout, one JSON object per
//! line. The supervisor owns the child for its whole life: spawn, consume
//! stdout, broadcast, restart after a crash, kill on shutdown. Lifecycle
//! state lives in one authoritative enum and is only ever transitioned by
//! the run loop.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use crate::config::{Datasource, ProbeConfig};
use crate::error::ProbeError;
use crate::notify::{Notification, NotificationChannel};
use crate::shutdown::Shutdown;
use crate::speed::{broadcast_decision, decode_line, SpeedSnapshot};

/// Probe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// No enabled datasource, or the executable is missing. Terminal.
    Disabled,
    /// Constructed, not yet running.
    Idle,
    Running,
    /// The child exited on its own.
    Crashed,
    /// Waiting out the restart backoff.
    BackoffWait,
    /// Shutdown requested; killing the child.
    Stopping,
    /// Terminal.
    Stopped,
}

/// Supervises the external speed probe and owns the latest snapshot.
pub struct SpeedProbeSupervisor {
    config: ProbeConfig,
    store_path: PathBuf,
    log_dirs: Vec<PathBuf>,
    channel: Arc<dyn NotificationChannel>,
    snapshot: Mutex<SpeedSnapshot>,
    state: Mutex<ProbeState>,
}

impl SpeedProbeSupervisor {
    #[must_use]
    pub fn new(
        config: ProbeConfig,
        store_path: PathBuf,
        datasources: &[Datasource],
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        let log_dirs = datasources
            .iter()
            .filter(|ds| ds.enabled)
            .map(|ds| ds.log_dir.clone())
            .collect();
        let idle = SpeedSnapshot::idle(config.window_seconds);
        Self {
            config,
            store_path,
            log_dirs,
            channel,
            snapshot: Mutex::new(idle),
            state: Mutex::new(ProbeState::Idle),
        }
    }

    /// Latest decoded snapshot, or the idle default before the probe has
    /// produced anything. Always a copy; the mutex is held only for the
    /// clone.
    #[must_use]
    pub fn current_snapshot(&self) -> SpeedSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn state(&self) -> ProbeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProbeState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn spawn_probe(&self) -> Result<(Child, ChildStdout, ChildStderr), ProbeError> {
        if !self.config.executable.is_file() {
            return Err(ProbeError::ExecutableMissing(self.config.executable.clone()));
        }

        let mut command = Command::new(&self.config.executable);
        command
            .arg(&self.store_path)
            .args(&self.log_dirs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(tz) = std::env::var("TZ") {
            command.env("TZ", tz);
        }

        let mut child = command.spawn().map_err(ProbeError::Spawn)?;
        let stdout = child.stdout.take().ok_or(ProbeError::StdioMissing)?;
        let stderr = child.stderr.take().ok_or(ProbeError::StdioMissing)?;
        Ok((child, stdout, stderr))
    }

    /// Run the supervision loop until `shutdown` is signalled.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Shutdown>) {
        if self.log_dirs.is_empty() {
            warn!("No enabled datasource; speed probe disabled");
            self.set_state(ProbeState::Disabled);
            return;
        }
        if !self.config.executable.is_file() {
            warn!(
                executable = %self.config.executable.display(),
                "Probe executable not found; speed probe disabled"
            );
            self.set_state(ProbeState::Disabled);
            return;
        }

        info!(
            executable = %self.config.executable.display(),
            log_dirs = self.log_dirs.len(),
            "Speed-probe supervisor started"
        );

        let backoff = Duration::from_secs(self.config.restart_backoff_secs);
        let mut previous_had_activity = false;

        loop {
            // The command line is captured per outer iteration; a restart
            // reuses it as-is.
            let (mut child, stdout, stderr) = match self.spawn_probe() {
                Ok(spawned) => spawned,
                Err(e) => {
                    error!(error = %e, "Failed to spawn speed probe");
                    self.set_state(ProbeState::Crashed);
                    if self.backoff_or_shutdown(backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };
            self.set_state(ProbeState::Running);
            debug!("Speed probe spawned");

            tokio::spawn(drain_stderr(stderr));

            let stopping = self
                .consume_stdout(stdout, &shutdown, &mut previous_had_activity)
                .await;
            if stopping {
                self.set_state(ProbeState::Stopping);
                kill_and_wait(&mut child).await;
                break;
            }

            // EOF or read error: the child is gone or useless. Reap it,
            // then back off before restarting.
            kill_and_wait(&mut child).await;
            self.set_state(ProbeState::Crashed);
            warn!(
                backoff_secs = self.config.restart_backoff_secs,
                "Speed probe exited; restarting after backoff"
            );
            if self.backoff_or_shutdown(backoff, &shutdown).await {
                break;
            }
        }

        self.set_state(ProbeState::Stopped);
        info!("Speed-probe supervisor shutting down");
    }

    /// Read telemetry lines until shutdown (returns true) or the stream
    /// ends (returns false).
    async fn consume_stdout(
        &self,
        stdout: ChildStdout,
        shutdown: &Shutdown,
        previous_had_activity: &mut bool,
    ) -> bool {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                () = shutdown.wait() => return true,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let Some(snapshot) = decode_line(line, self.config.window_seconds) else {
                        warn!(line, "Skipping malformed telemetry line");
                        continue;
                    };
                    self.publish(snapshot, previous_had_activity).await;
                }
                Ok(None) => return false,
                Err(e) => {
                    error!(error = %e, "Failed reading probe stdout");
                    return false;
                }
            }
        }
    }

    async fn publish(&self, snapshot: SpeedSnapshot, previous_had_activity: &mut bool) {
        {
            let mut guard = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            *guard = snapshot.clone();
        }

        let has_activity = snapshot.has_activity();
        let decision = broadcast_decision(*previous_had_activity, has_activity);
        *previous_had_activity = has_activity;

        if decision.speed_update {
            self.dispatch(&Notification::speed_update(snapshot.payload()))
                .await;
        }
        if decision.refresh_transfers {
            self.dispatch(&Notification::refresh_transfers()).await;
        }
    }

    async fn dispatch(&self, notification: &Notification) {
        let delivery = self.channel.send(notification).await;
        if !delivery.success {
            warn!(
                channel = delivery.channel,
                event = notification.event,
                error = delivery.error.as_deref().unwrap_or("unknown"),
                "Notification delivery failed"
            );
        }
    }

    /// Sleep out the restart backoff; returns true when shutdown arrived
    /// first.
    async fn backoff_or_shutdown(&self, backoff: Duration, shutdown: &Shutdown) -> bool {
        self.set_state(ProbeState::BackoffWait);
        tokio::select! {
            () = shutdown.wait() => true,
            () = tokio::time::sleep(backoff) => shutdown.is_triggered(),
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(line, "probe stderr");
    }
}

async fn kill_and_wait(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // Already dead is the common case here.
        debug!(error = %e, "Probe kill signal not delivered");
    }
    match child.wait().await {
        Ok(status) => debug!(%status, "Speed probe reaped"),
        Err(e) => error!(error = %e, "Failed to reap speed probe"),
    }
}
