//! Pulse-width outputs for the drive servos.
//!
//! Both drive channels run at a fixed 50 Hz period.  Callers work in
//! microseconds of pulse width; the sysfs interface wants nanoseconds, so every
//! write is `micros * 1000`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::HardwareError;

/// PWM period in nanoseconds (50 Hz).
pub const PWM_PERIOD_NS: u64 = 20_000_000;

/// How often and how long to wait for udev to create `pwmN` after export.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const EXPORT_POLL_ATTEMPTS: u32 = 20;

/// A single pulse-width output channel.
pub trait PwmChannel: Send {
    /// Stable identifier, e.g. `"pwmchip0/pwm1"` or `"left"`.
    fn id(&self) -> &str;

    /// Set the high time of each period to `micros` microseconds.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::Io`] if the duty cycle cannot be written.
    fn set_duty_us(&mut self, micros: u32) -> Result<(), HardwareError>;
}

// ────────────────────────────────────────────────────────────────────────────
// sysfs
// ────────────────────────────────────────────────────────────────────────────

/// A PWM controller exposed under `/sys/class/pwm/pwmchipN`.
#[derive(Debug, Clone)]
pub struct SysfsPwmChip {
    path: PathBuf,
}

impl SysfsPwmChip {
    /// Pick the first `pwmchip*` under `root` (in name order) whose `npwm`
    /// reports at least `min_channels` outputs.
    ///
    /// # Errors
    ///
    /// [`HardwareError::Io`] if `root` cannot be listed, or
    /// [`HardwareError::NoPwmChip`] when no chip qualifies.
    pub fn discover(root: &Path, min_channels: u32) -> Result<Self, HardwareError> {
        let entries = fs::read_dir(root).map_err(|source| HardwareError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut chips: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("pwmchip"))
            })
            .collect();
        chips.sort();

        for chip in chips {
            let npwm = fs::read_to_string(chip.join("npwm"))
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            if npwm.is_some_and(|n| n >= min_channels) {
                info!(chip = %chip.display(), npwm = ?npwm, "using pwm chip");
                return Ok(Self { path: chip });
            }
        }

        Err(HardwareError::NoPwmChip {
            root: root.to_path_buf(),
            needed: min_channels,
        })
    }

    /// Path of the chip directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Export (if needed) and configure channel `index` with `period_ns`.
    ///
    /// The channel is disabled, given its period, then re-enabled.  It is
    /// disabled again when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// [`HardwareError::ExportTimeout`] if the channel directory never
    /// appears, or [`HardwareError::Io`] for any failed sysfs write.
    pub fn channel(&self, index: u32, period_ns: u64) -> Result<SysfsPwmChannel, HardwareError> {
        let dir = self.path.join(format!("pwm{index}"));
        if !dir.exists() {
            write_attr(&self.path.join("export"), &index.to_string())?;
            wait_for_dir(&dir)?;
        }

        write_attr(&dir.join("enable"), "0")?;
        write_attr(&dir.join("period"), &period_ns.to_string())?;
        write_attr(&dir.join("enable"), "1")?;

        let id = format!(
            "{}/pwm{index}",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("pwmchip")
        );
        debug!(channel = %id, period_ns, "pwm channel enabled");
        Ok(SysfsPwmChannel { id, dir })
    }
}

/// An enabled sysfs PWM channel.  Disabled on drop.
#[derive(Debug)]
pub struct SysfsPwmChannel {
    id: String,
    dir: PathBuf,
}

impl PwmChannel for SysfsPwmChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_duty_us(&mut self, micros: u32) -> Result<(), HardwareError> {
        let nanos = u64::from(micros) * 1000;
        write_attr(&self.dir.join("duty_cycle"), &nanos.to_string())
    }
}

impl Drop for SysfsPwmChannel {
    fn drop(&mut self) {
        if let Err(e) = write_attr(&self.dir.join("enable"), "0") {
            warn!(channel = %self.id, error = %e, "failed to disable pwm channel");
        }
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), HardwareError> {
    fs::write(path, value).map_err(|source| HardwareError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn wait_for_dir(dir: &Path) -> Result<(), HardwareError> {
    for _ in 0..EXPORT_POLL_ATTEMPTS {
        thread::sleep(EXPORT_POLL_INTERVAL);
        if dir.exists() {
            return Ok(());
        }
    }
    Err(HardwareError::ExportTimeout {
        channel: dir.to_path_buf(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Simulation
// ────────────────────────────────────────────────────────────────────────────

/// One recorded duty-cycle write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwmWrite {
    pub channel: String,
    pub micros: u32,
    /// Tokio clock at the time of the write, so paused-time tests can assert
    /// how long each intent was held.
    pub at: tokio::time::Instant,
}

/// Shared, append-only record of writes made by one or more
/// [`SimPwmChannel`]s.  Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct PwmLog {
    writes: Arc<Mutex<Vec<PwmWrite>>>,
}

impl PwmLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, channel: &str, micros: u32) {
        let write = PwmWrite {
            channel: channel.to_string(),
            micros,
            at: tokio::time::Instant::now(),
        };
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(write);
    }

    /// Every write so far, oldest first.
    pub fn writes(&self) -> Vec<PwmWrite> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent value written to `channel`.
    pub fn last_for(&self, channel: &str) -> Option<u32> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|w| w.channel == channel)
            .map(|w| w.micros)
    }

    pub fn is_empty(&self) -> bool {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// A simulated PWM channel that records every duty-cycle write.
/// Always succeeds.
pub struct SimPwmChannel {
    id: String,
    log: PwmLog,
}

impl SimPwmChannel {
    /// Create a channel with its own private log.
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Self::with_log(id, PwmLog::new())
    }

    /// Create a channel that records into `log`, which may be shared with
    /// other channels to capture the interleaving of writes.
    pub fn with_log(id: impl Into<String>, log: PwmLog) -> Box<Self> {
        Box::new(Self { id: id.into(), log })
    }

    pub fn log(&self) -> PwmLog {
        self.log.clone()
    }
}

impl PwmChannel for SimPwmChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_duty_us(&mut self, micros: u32) -> Result<(), HardwareError> {
        self.log.record(&self.id, micros);
        Ok(())
    }
}
