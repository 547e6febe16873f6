use crate::commands::{run_checked, Cmd, CommandRunner};
use std::fmt;
use std::time::{Duration, Instant};
use tikvpn_core::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Active,
    Failed,
}

impl ServiceState {
    /// Map `systemctl is-active` output onto the states we track.
    pub fn from_is_active(output: &str) -> Self {
        match output.trim() {
            "active" => ServiceState::Active,
            "activating" | "reloading" => ServiceState::Starting,
            "failed" => ServiceState::Failed,
            _ => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Active => "active",
            ServiceState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub enabled: bool,
}

pub struct ServiceController<'a> {
    runner: &'a dyn CommandRunner,
    unit: String,
    timeout: Duration,
    poll: Duration,
}

impl<'a> ServiceController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        unit: impl Into<String>,
        timeout: Duration,
        poll: Duration,
    ) -> Self {
        Self {
            runner,
            unit: unit.into(),
            timeout,
            poll,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Where to look when the daemon will not come up.
    pub fn log_hint(&self) -> String {
        format!("journalctl -xeu {}", self.unit)
    }

    pub async fn state(&self) -> Result<ServiceState, AppError> {
        // is-active exits non-zero for anything but active; stdout still
        // carries the state name.
        let out = self
            .runner
            .exec(&Cmd::new("systemctl").args(["is-active", self.unit.as_str()]))
            .await?;
        Ok(ServiceState::from_is_active(&out.stdout))
    }

    pub async fn is_enabled(&self) -> Result<bool, AppError> {
        let out = self
            .runner
            .exec(&Cmd::new("systemctl").args(["is-enabled", self.unit.as_str()]))
            .await?;
        Ok(out.success() && out.stdout.trim() == "enabled")
    }

    pub async fn status(&self) -> Result<ServiceStatus, AppError> {
        Ok(ServiceStatus {
            state: self.state().await?,
            enabled: self.is_enabled().await?,
        })
    }

    /// Enable and (re)start the unit, then poll until it is active.
    ///
    /// `stopped -> starting -> active`, or `failed` when systemd reports it
    /// or the timeout runs out first. The restart is queued with
    /// `--no-block` so only `timeout` bounds the wait.
    pub async fn start(&self) -> Result<ServiceStatus, AppError> {
        run_checked(self.runner, &Cmd::new("systemctl").args(["enable", self.unit.as_str()]))
            .await?;
        run_checked(
            self.runner,
            &Cmd::new("systemctl").args(["restart", "--no-block", self.unit.as_str()]),
        )
        .await?;

        let started = Instant::now();
        loop {
            match self.state().await? {
                ServiceState::Active => break,
                ServiceState::Failed => {
                    return Err(AppError::ServiceFailed {
                        unit: self.unit.clone(),
                    })
                }
                state => {
                    tracing::debug!(unit = %self.unit, %state, "waiting for unit");
                }
            }
            if started.elapsed() >= self.timeout {
                return Err(AppError::ServiceStartTimeout {
                    unit: self.unit.clone(),
                    waited_secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll).await;
        }

        Ok(ServiceStatus {
            state: ServiceState::Active,
            enabled: self.is_enabled().await?,
        })
    }
}
