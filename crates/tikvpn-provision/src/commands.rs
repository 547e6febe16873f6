use async_trait::async_trait;
use tikvpn_core::AppError;

/// An external command: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Shell-like rendering for logs and error messages.
    pub fn line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands on the host being provisioned.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `cmd` and wait for it. A non-zero exit is not an error here;
    /// only failing to spawn is.
    async fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, AppError>;
}

/// Runs commands on the local machine with tokio.
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, AppError> {
        tracing::debug!(command = %cmd.line(), "exec");
        let output = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(cmd.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            // Dropping the future (Ctrl-C) must not leave e.g. openssl running.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Command {
                command: cmd.line(),
                status: -1,
                stderr: format!("failed to spawn: {e}"),
            })?;

        let out = CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(command = %cmd.line(), code = ?out.code, "exited");
        Ok(out)
    }
}

/// Execute `cmd` and turn a non-zero exit into `AppError::Command`.
pub async fn run_checked(runner: &dyn CommandRunner, cmd: &Cmd) -> Result<String, AppError> {
    let out = runner.exec(cmd).await?;
    if !out.success() {
        return Err(AppError::Command {
            command: cmd.line(),
            status: out.code.unwrap_or(-1),
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Execute a query-style command where exit 0 means "yes" and exit 1 means
/// "no". Anything else is an error.
pub async fn run_query(runner: &dyn CommandRunner, cmd: &Cmd) -> Result<bool, AppError> {
    let out = runner.exec(cmd).await?;
    match out.code {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        other => Err(AppError::Command {
            command: cmd.line(),
            status: other.unwrap_or(-1),
            stderr: out.stderr.trim().to_string(),
        }),
    }
}
