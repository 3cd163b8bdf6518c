use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Terminal geometry used when a session is spawned and when a viewer
/// sends a resize without usable dimensions.
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

/// Package-manager install locations appended to the shell's `PATH` when
/// they are not already present.
pub const DEFAULT_EXTRA_PATH: &[&str] = &[
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "~/.cargo/bin",
    "~/.local/bin",
];

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn command: {0}")]
    SpawnCommand(#[source] anyhow::Error),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),
}

/// How to launch the interactive shell that backs a session.
#[derive(Debug, Clone)]
pub struct ShellSpec {
    /// Shell binary. `None` means `$SHELL`, falling back to `/bin/sh`.
    pub shell: Option<String>,
    /// Start the shell as a login shell (`-l`) so user profiles are sourced.
    pub login: bool,
    pub cwd: PathBuf,
    /// Entries appended to `PATH`; a leading `~` expands to the home directory.
    pub extra_path: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ShellSpec {
    fn default() -> Self {
        Self {
            shell: None,
            login: true,
            cwd: std::env::current_dir().unwrap_or_else(|_| fallback_dir()),
            extra_path: DEFAULT_EXTRA_PATH.iter().map(|s| s.to_string()).collect(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl ShellSpec {
    /// The shell binary that will actually be executed.
    pub fn resolved_shell(&self) -> String {
        self.shell.clone().unwrap_or_else(|| {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
        })
    }

    pub fn build_command(&self) -> CommandBuilder {
        let shell = self.resolved_shell();
        let mut cmd = CommandBuilder::new(&shell);
        if self.login {
            cmd.arg("-l");
        }
        cmd.cwd(&self.cwd);
        cmd.env_remove("npm_config_prefix");
        cmd.env("TERM", "xterm-256color");
        cmd.env("FORCE_COLOR", "1");
        cmd.env("SHELL", &shell);
        let current = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", augment_path(&current, &self.extra_path));
        cmd
    }
}

/// Append `extra` entries to a `PATH` value, skipping empty entries and
/// entries that are already present.
pub fn augment_path(current: &str, extra: &[String]) -> String {
    let mut entries: Vec<String> = current
        .split(':')
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();
    for entry in extra {
        let expanded = expand_home(entry);
        if expanded.is_empty() || entries.iter().any(|e| *e == expanded) {
            continue;
        }
        entries.push(expanded);
    }
    entries.join(":")
}

fn expand_home(entry: &str) -> String {
    match entry.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest).to_string_lossy().into_owned(),
            None => entry.to_string(),
        },
        None => entry.to_string(),
    }
}

/// Directory used when a requested working directory does not exist.
pub fn fallback_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Return `requested` if it names an existing directory, otherwise the
/// fallback directory.
pub fn resolve_cwd(requested: Option<&str>) -> PathBuf {
    let candidate = match requested {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::current_dir().unwrap_or_else(|_| fallback_dir()),
    };
    if Path::new(&candidate).is_dir() {
        candidate
    } else {
        tracing::warn!(cwd = %candidate.display(), "cwd does not exist, using home directory");
        fallback_dir()
    }
}

pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
}

impl Pty {
    pub fn spawn(spec: &ShellSpec) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(PtyError::OpenPty)?;
        let child = pair
            .slave
            .spawn_command(spec.build_command())
            .map_err(PtyError::SpawnCommand)?;
        let pid = child.process_id();

        // Only the child keeps the slave side open, so the reader sees EOF
        // once the shell and everything it started are gone.
        drop(pair.slave);

        Ok(Self {
            master: pair.master,
            child: Some(child),
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(PtyError::CloneReader)
    }

    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master.take_writer().map_err(PtyError::TakeWriter)
    }

    /// Take ownership of the child handle so it can be waited on from a
    /// blocking task. Returns `None` on every call after the first.
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(PtyError::Resize)
    }

    pub fn size(&self) -> Option<(u16, u16)> {
        self.master.get_size().ok().map(|s| (s.rows, s.cols))
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// portable_pty calls setsid() for the child, so the shell leads its own
/// group and this also reaches the jobs it started.
pub fn signal_process_group(pid: u32, signal: i32) {
    if pid == 0 || pid > i32::MAX as u32 {
        tracing::warn!(pid, "PID is 0 or exceeds i32::MAX, cannot send signal");
        return;
    }
    #[cfg(unix)]
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
    #[cfg(not(unix))]
    let _ = signal;
}
