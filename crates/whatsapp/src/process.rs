//! Launching and stopping the whatsapp-web.js sidecar.
//!
//! The sidecar drives a headless Chromium. On unix it runs in its own process
//! group, so stopping it takes the browser down with it instead of leaving
//! an orphan holding the session profile open.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    serde::Deserialize,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{Level, debug, error, info, warn},
};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

/// Environment variable naming the sidecar directory.
pub const SIDECAR_DIR_ENV: &str = "RUKUN_WA_SIDECAR_DIR";

/// Checkout layout, relative to the working directory.
const SIDECAR_REL: &str = "sidecar/whatsapp-web";
/// Install layout, relative to the directory holding the `rukun` binary.
const SIDECAR_SHARE_REL: &str = "../share/rukun/whatsapp-web";

/// Chromium needs a moment to flush the session profile on SIGTERM.
const STOP_GRACE: Duration = Duration::from_secs(10);
/// A sidecar that dies on bad config usually does so within this window.
const STARTUP_PROBE: Duration = Duration::from_millis(500);

/// A running sidecar.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the sidecar and its browser, killing them after
    /// [`STOP_GRACE`].
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            debug!("WhatsApp sidecar already exited");
            return Ok(());
        }
        info!(port = self.port, "stopping WhatsApp sidecar");
        self.terminate();

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "WhatsApp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "could not collect sidecar exit status"),
            Err(_) => {
                warn!(
                    grace_secs = STOP_GRACE.as_secs(),
                    "sidecar still running, killing it and its browser"
                );
                self.kill_group();
                self.child
                    .kill()
                    .await
                    .context("failed to kill WhatsApp sidecar")?;
            },
        }
        Ok(())
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    #[cfg(unix)]
    fn kill_group(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) {}

    /// The child leads its own group, so its pid is the group id.
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::{sys::signal::killpg, unistd::Pid};

        if let Some(pid) = self.child.id()
            && let Ok(pid) = i32::try_from(pid)
            && let Err(e) = killpg(Pid::from_raw(pid), signal)
        {
            debug!(%signal, error = %e, "signalling sidecar process group failed");
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory with the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
    pub auth_dir: PathBuf,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: PathBuf::new(),
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: PathBuf::from(".wa_auth"),
        }
    }
}

impl SidecarConfig {
    /// Variables the sidecar reads at startup.
    pub(crate) fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("RUKUN_WA_PORT", self.port.to_string()),
            ("RUKUN_WA_AUTH_DIR", self.auth_dir.display().to_string()),
            ("NODE_ENV", "production".into()),
        ]
    }
}

/// Locate the sidecar directory.
///
/// Order: `explicit` (from `channel.whatsapp.sidecar_dir`),
/// `$RUKUN_WA_SIDECAR_DIR`, `./sidecar/whatsapp-web`, then
/// `<bin>/../share/rukun/whatsapp-web`.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if has_package_json(path) {
            return Ok(path.to_path_buf());
        }
        bail!(
            "channel.whatsapp.sidecar_dir has no package.json: {}",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package_json(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found, searching further");
    }

    let mut candidates = vec![PathBuf::from(SIDECAR_REL)];
    if let Ok(exe) = std::env::current_exe()
        && let Some(bin_dir) = exe.parent()
    {
        candidates.push(bin_dir.join(SIDECAR_SHARE_REL));
    }
    candidates
        .into_iter()
        .find(|path| has_package_json(path))
        .map(|path| path.canonicalize().unwrap_or(path))
        .with_context(|| {
            format!(
                "WhatsApp sidecar not found in ./{SIDECAR_REL} or next to the binary; \
                 set {SIDECAR_DIR_ENV} or channel.whatsapp.sidecar_dir"
            )
        })
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// The parts of `package.json` that decide how to run the sidecar.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PackageManifest {
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    scripts: HashMap<String, String>,
}

impl PackageManifest {
    pub(crate) fn read(dir: &Path) -> Result<Self> {
        let path = dir.join("package.json");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid {}", path.display()))
    }

    /// Script `node` runs: `main`, or `index.js` like npm assumes.
    pub(crate) fn entry(&self) -> &str {
        self.main.as_deref().unwrap_or("index.js")
    }
}

/// npm invocations needed before the entry script can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NpmStep {
    /// Reproducible install from `package-lock.json`.
    Ci,
    Install,
    Build,
}

impl NpmStep {
    fn args(self) -> &'static [&'static str] {
        match self {
            Self::Ci => &["ci", "--omit=dev"],
            Self::Install => &["install"],
            Self::Build => &["run", "build"],
        }
    }
}

/// Dependencies are installed once; a build runs only when the entry script
/// is missing and the package declares a `build` script.
pub(crate) fn setup_plan(dir: &Path, manifest: &PackageManifest) -> Vec<NpmStep> {
    let mut steps = Vec::new();
    if !dir.join("node_modules").is_dir() {
        steps.push(if dir.join("package-lock.json").is_file() {
            NpmStep::Ci
        } else {
            NpmStep::Install
        });
    }
    if !dir.join(manifest.entry()).is_file() && manifest.scripts.contains_key("build") {
        steps.push(NpmStep::Build);
    }
    steps
}

async fn run_npm(dir: &Path, step: NpmStep) -> Result<()> {
    let label = step.args().join(" ");
    info!(path = %dir.display(), "npm {label}");
    let output = Command::new("npm")
        .args(step.args())
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {label}; is Node.js installed?"))?;
    if !output.status.success() {
        bail!(
            "npm {label} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Prepare and spawn the sidecar, forwarding its output to tracing under
/// the `whatsapp_sidecar` target.
pub async fn start_sidecar(config: &SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !has_package_json(dir) {
        bail!("WhatsApp sidecar not found at {}", dir.display());
    }
    let manifest = PackageManifest::read(dir)?;
    for step in setup_plan(dir, &manifest) {
        run_npm(dir, step).await?;
    }
    let entry = manifest.entry();
    if !dir.join(entry).is_file() {
        bail!("sidecar entry script {entry} missing in {}", dir.display());
    }

    info!(path = %dir.display(), entry, port = config.port, "starting WhatsApp sidecar");
    let mut command = Command::new("node");
    command
        .arg(entry)
        .current_dir(dir)
        .envs(config.env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    let mut child = command
        .spawn()
        .context("failed to spawn node for the WhatsApp sidecar")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, Level::INFO));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, Level::WARN));
    }

    tokio::time::sleep(STARTUP_PROBE).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to check sidecar status")?
    {
        bail!("WhatsApp sidecar exited during startup ({status}); see whatsapp_sidecar logs");
    }

    info!(port = config.port, "WhatsApp sidecar started");
    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, fallback: Level) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let log = parse_log_line(&line, fallback);
        let session = log.session.as_deref().unwrap_or("-");
        if log.level == Level::ERROR {
            error!(target: "whatsapp_sidecar", session, "{}", log.msg);
        } else if log.level == Level::WARN {
            warn!(target: "whatsapp_sidecar", session, "{}", log.msg);
        } else if log.level == Level::INFO {
            info!(target: "whatsapp_sidecar", session, "{}", log.msg);
        } else {
            debug!(target: "whatsapp_sidecar", session, "{}", log.msg);
        }
    }
}

/// One line of sidecar output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SidecarLog {
    pub level: Level,
    pub msg: String,
    pub session: Option<String>,
}

/// Classify a line of sidecar output.
///
/// The sidecar logs pino JSON (numeric `level`, `msg`, optional `session`
/// binding). Chromium writes `[pid:tid:date:LEVEL:file(line)] msg` lines on
/// stderr. Anything else keeps `fallback`.
pub(crate) fn parse_log_line(line: &str, fallback: Level) -> SidecarLog {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = match log.get("level").and_then(serde_json::Value::as_u64) {
            Some(0..=20) => Level::DEBUG,
            Some(21..=30) => Level::INFO,
            Some(31..=40) => Level::WARN,
            Some(_) => Level::ERROR,
            None => fallback,
        };
        return SidecarLog {
            level,
            msg: log
                .get("msg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(line)
                .to_string(),
            session: log
                .get("session")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        };
    }

    if let Some(rest) = line.strip_prefix('[')
        && let Some((header, msg)) = rest.split_once("] ")
        && let Some(severity) = header.split(':').nth(3)
    {
        let level = match severity {
            "VERBOSE1" | "VERBOSE2" | "INFO" => Level::DEBUG,
            "WARNING" => Level::WARN,
            "ERROR" | "FATAL" => Level::ERROR,
            _ => fallback,
        };
        return SidecarLog {
            level,
            msg: format!("chromium: {msg}"),
            session: None,
        };
    }

    SidecarLog {
        level: fallback,
        msg: line.to_string(),
        session: None,
    }
}
