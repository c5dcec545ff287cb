//! Run-mode control (kill switch).
//!
//! The run mode is an immutable value produced by each poll. The engine polls
//! before each task, before each cycle and before each role launch; nothing
//! caches it across polls.
//!
//! Precedence: the `WARDEN_RUN_MODE` environment variable, then the kill-switch
//! file (`.warden/run_mode` by default), then `normal`. Unknown values fail closed
//! to `paused`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Environment variable that overrides the kill-switch file.
pub const RUN_MODE_ENV: &str = "WARDEN_RUN_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Normal,
    /// No new work; discovery (dry run) still allowed.
    Paused,
    /// Single-agent work only; multi-agent tasks are deferred.
    Safe,
    /// No new work and no new batches.
    Off,
}

impl RunMode {
    /// Parse a mode string. Unknown values yield `Paused`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "normal" | "" => RunMode::Normal,
            "paused" => RunMode::Paused,
            "safe" => RunMode::Safe,
            "off" => RunMode::Off,
            other => {
                tracing::warn!(value = other, "unknown run mode, treating as paused");
                RunMode::Paused
            }
        }
    }

    /// Whether a single-agent unit of work may start.
    pub fn allows_single_agent(&self) -> bool {
        matches!(self, RunMode::Normal | RunMode::Safe)
    }

    /// Whether a multi-agent task (or one of its roles) may start.
    pub fn allows_multi_agent(&self) -> bool {
        matches!(self, RunMode::Normal)
    }

    /// Whether a batch may begin at all.
    pub fn allows_batch_start(&self) -> bool {
        !matches!(self, RunMode::Off)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Normal => write!(f, "normal"),
            RunMode::Paused => write!(f, "paused"),
            RunMode::Safe => write!(f, "safe"),
            RunMode::Off => write!(f, "off"),
        }
    }
}

/// Something that can be polled for the current run mode.
pub trait RunModeSource: Send + Sync {
    fn current(&self) -> RunMode;
}

/// Reads the environment variable, then the kill-switch file, on every poll.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    file: Option<PathBuf>,
    read_env: bool,
}

impl KillSwitch {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            read_env: true,
        }
    }

    /// A kill switch that ignores `WARDEN_RUN_MODE` (file only).
    pub fn file_only(file: PathBuf) -> Self {
        Self {
            file: Some(file),
            read_env: false,
        }
    }
}

impl RunModeSource for KillSwitch {
    fn current(&self) -> RunMode {
        if self.read_env
            && let Ok(value) = std::env::var(RUN_MODE_ENV)
            && !value.trim().is_empty()
        {
            return RunMode::parse_lenient(&value);
        }

        let Some(ref path) = self.file else {
            return RunMode::Normal;
        };

        match std::fs::read_to_string(path) {
            Ok(content) => RunMode::parse_lenient(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RunMode::Normal,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read kill switch, treating as paused");
                RunMode::Paused
            }
        }
    }
}

/// In-process run mode that can be flipped programmatically.
#[derive(Debug, Default)]
pub struct ManualRunMode {
    mode: Mutex<RunMode>,
}

impl ManualRunMode {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode: Mutex::new(mode),
        }
    }

    pub fn set(&self, mode: RunMode) {
        match self.mode.lock() {
            Ok(mut guard) => *guard = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }
}

impl RunModeSource for ManualRunMode {
    fn current(&self) -> RunMode {
        match self.mode.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
