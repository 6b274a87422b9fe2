// src/exec/command.rs

//! Shell-command unit actions.
//!
//! Each unit of the ingestion pipeline shells out to an external program
//! (scraper, loader, dbt, detector). A [`CommandAction`] runs:
//!
//! 1. every `setup` command, each of which must succeed,
//! 2. the main `cmd`, which must succeed,
//! 3. an optional `check` command whose result is recorded under the
//!    unit's check key (`check_passed` unless configured) but never fails
//!    the unit,
//! 4. the unit's metadata probes.
//!
//! Stdout lines of the form `::metadata key=value` become metadata entries.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::dag::{ActionFuture, UnitAction};
use crate::exec::probe::{self, Probe};
use crate::types::{Metadata, MetadataValue, UnitName};

/// Metadata key for the `check` result when a unit does not name one.
pub const DEFAULT_CHECK_KEY: &str = "check_passed";

/// Metadata key holding the main command's exit code.
pub const EXIT_CODE_KEY: &str = "exit_code";

/// How many trailing stderr lines are kept for failure messages.
const STDERR_TAIL_LINES: usize = 20;

static METADATA_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^::metadata\s+([A-Za-z_][A-Za-z0-9_.-]*)=(.*)$")
        .expect("metadata line pattern is a valid regex")
});

/// Everything needed to run a unit as shell commands.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub cmd: String,
    pub setup: Vec<String>,
    pub check: Option<String>,
    /// Metadata key for the check result; [`DEFAULT_CHECK_KEY`] if unset.
    pub check_key: Option<String>,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub probes: Vec<Probe>,
}

/// [`UnitAction`] that runs a [`CommandSpec`].
#[derive(Debug, Clone)]
pub struct CommandAction {
    unit: UnitName,
    spec: CommandSpec,
}

impl CommandAction {
    pub fn new(unit: impl Into<UnitName>, spec: CommandSpec) -> Self {
        Self {
            unit: unit.into(),
            spec,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

impl CommandSpec {
    pub fn check_key(&self) -> &str {
        self.check_key.as_deref().unwrap_or(DEFAULT_CHECK_KEY)
    }
}

impl UnitAction for CommandAction {
    fn run(&self) -> ActionFuture {
        let unit = self.unit.clone();
        let spec = self.spec.clone();
        Box::pin(async move { run_spec(&unit, spec).await })
    }
}

/// Captured result of one shell command.
#[derive(Debug)]
struct ShellOutput {
    code: i32,
    success: bool,
    metadata: Metadata,
    stderr_tail: Vec<String>,
}

impl ShellOutput {
    fn failure_message(&self, what: &str, command: &str) -> String {
        let mut msg = format!("{what} `{command}` exited with code {}", self.code);
        if !self.stderr_tail.is_empty() {
            msg.push_str(": ");
            msg.push_str(&self.stderr_tail.join("\n"));
        }
        msg
    }
}

async fn run_spec(unit: &str, spec: CommandSpec) -> Result<Metadata> {
    for setup in &spec.setup {
        let out = run_shell(unit, setup, &spec).await?;
        if !out.success {
            bail!(out.failure_message("setup command", setup));
        }
    }

    let out = run_shell(unit, &spec.cmd, &spec).await?;
    if !out.success {
        bail!(out.failure_message("command", &spec.cmd));
    }

    let mut metadata = out.metadata;
    metadata.insert(EXIT_CODE_KEY.to_string(), MetadataValue::Int(i64::from(out.code)));

    if let Some(check) = &spec.check {
        let check_out = run_shell(unit, check, &spec).await?;
        if !check_out.success {
            debug!(
                unit = %unit,
                exit_code = check_out.code,
                check_key = %spec.check_key(),
                "check command failed; recording false"
            );
        }
        metadata.insert(spec.check_key().to_string(), check_out.success.into());
    }

    let probed = probe::evaluate(spec.workdir.clone(), spec.probes.clone()).await?;
    metadata.extend(probed);

    Ok(metadata)
}

/// Run one command through the platform shell and wait for it.
async fn run_shell(unit: &str, command: &str, spec: &CommandSpec) -> Result<ShellOutput> {
    debug!(unit = %unit, cmd = %command, "spawning command");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    if !spec.workdir.as_os_str().is_empty() {
        cmd.current_dir(&spec.workdir);
    }

    cmd.envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // The shell leads its own process group so everything it forks can be
    // killed together.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for unit '{unit}'"))?;
    let mut group = ProcessGroupGuard::new(unit, child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, metadata, stderr_tail) = tokio::join!(
        child.wait(),
        read_stdout(unit, stdout),
        read_stderr(unit, stderr),
    );

    let status = status.with_context(|| format!("waiting for process of unit '{unit}'"))?;
    group.disarm();

    Ok(ShellOutput {
        code: status.code().unwrap_or(-1),
        success: status.success(),
        metadata,
        stderr_tail,
    })
}

/// Kills a command's whole process group unless disarmed.
///
/// The runner enforces timeouts by dropping the action future. `kill_on_drop`
/// only reaches the shell itself, so this guard takes down whatever the
/// shell started (`cd dir && dbt run`, pipelines, subshells) with it.
struct ProcessGroupGuard<'a> {
    unit: &'a str,
    pgid: Option<u32>,
}

impl<'a> ProcessGroupGuard<'a> {
    fn new(unit: &'a str, pgid: Option<u32>) -> Self {
        Self { unit, pgid }
    }

    /// The shell exited on its own; leave the group alone.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard<'_> {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        debug!(unit = %self.unit, pgid, "killing process group of abandoned command");
        kill_process_group(pgid);
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an already-empty group yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Log stdout at debug and collect `::metadata` lines.
async fn read_stdout<R: AsyncRead + Unpin>(unit: &str, stdout: Option<R>) -> Metadata {
    let mut metadata = Metadata::new();
    let Some(stdout) = stdout else {
        return metadata;
    };

    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(unit = %unit, "stdout: {}", line);
        if let Some((key, value)) = parse_metadata_line(&line) {
            metadata.insert(key, value);
        }
    }

    metadata
}

/// Log stderr at debug and keep the last few lines.
async fn read_stderr<R: AsyncRead + Unpin>(unit: &str, stderr: Option<R>) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let Some(stderr) = stderr else {
        return Vec::new();
    };

    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(unit = %unit, "stderr: {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect()
}

/// Parse `::metadata key=value` into a typed entry.
pub fn parse_metadata_line(line: &str) -> Option<(String, MetadataValue)> {
    let caps = METADATA_LINE.captures(line.trim_end())?;
    let key = caps.get(1)?.as_str().to_string();
    let value = MetadataValue::parse(caps.get(2)?.as_str());
    Some((key, value))
}
