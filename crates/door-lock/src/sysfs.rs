//! Linux sysfs GPIO pins (`/sys/class/gpio`)
//!
//! Bias (pull-up/down) cannot be set through sysfs; it must come from the
//! board or device tree. Interrupts are delivered by a dedicated thread that
//! `poll(2)`s the pin's `value` file for `POLLPRI`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::hardware::{DigitalInput, DigitalOutput, Edge, EdgeHandler, InterruptSource, Level, Subscription};
use crate::HardwareError;

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Poll timeout, bounds how long cancelling a subscription takes
const POLL_TIMEOUT_MS: i32 = 100;

fn setup_err(pin: u32, what: &str, e: std::io::Error) -> HardwareError {
    HardwareError::Setup(format!("gpio{pin}: {what}: {e}"))
}

/// Exported sysfs GPIO pin
#[derive(Debug)]
pub struct SysfsPin {
    pin: u32,
    dir: PathBuf,
}

impl SysfsPin {
    /// Export `pin` under the default sysfs root
    pub fn export(pin: u32) -> Result<Self, HardwareError> {
        Self::export_at(Path::new(GPIO_ROOT), pin)
    }

    /// Export `pin` under `root` (alternate roots are used in tests)
    pub fn export_at(root: &Path, pin: u32) -> Result<Self, HardwareError> {
        let dir = root.join(format!("gpio{pin}"));
        if !dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| setup_err(pin, "export", e))?;
        }
        if !dir.exists() {
            return Err(HardwareError::Setup(format!("gpio{pin}: not present after export")));
        }
        debug!(pin, "gpio exported");
        Ok(Self { pin, dir })
    }

    fn set_attr(&self, name: &str, value: &str) -> Result<(), HardwareError> {
        fs::write(self.dir.join(name), value).map_err(|e| setup_err(self.pin, name, e))
    }

    /// Configure as output, initially driven to `initial`
    pub fn into_output(self, initial: Level) -> Result<SysfsOutput, HardwareError> {
        let direction = if initial.is_high() { "high" } else { "low" };
        self.set_attr("direction", direction)?;
        info!(pin = self.pin, direction, "gpio output configured");
        Ok(SysfsOutput { pin: self })
    }

    pub fn into_input(self) -> Result<SysfsInput, HardwareError> {
        self.set_attr("direction", "in")?;
        info!(pin = self.pin, "gpio input configured");
        Ok(SysfsInput { pin: self })
    }

    pub fn into_interrupt(self) -> Result<SysfsInterrupt, HardwareError> {
        self.set_attr("direction", "in")?;
        Ok(SysfsInterrupt { pin: self })
    }

    fn read_level(&self) -> Result<Level, HardwareError> {
        let raw = fs::read_to_string(self.dir.join("value")).map_err(|e| HardwareError::Io {
            pin: self.pin,
            message: e.to_string(),
        })?;
        parse_level(self.pin, &raw)
    }
}

fn parse_level(pin: u32, raw: &str) -> Result<Level, HardwareError> {
    match raw.trim() {
        "0" => Ok(Level::Low),
        "1" => Ok(Level::High),
        other => Err(HardwareError::Io {
            pin,
            message: format!("unexpected value {other:?}"),
        }),
    }
}

/// sysfs output pin
#[derive(Debug)]
pub struct SysfsOutput {
    pin: SysfsPin,
}

impl DigitalOutput for SysfsOutput {
    fn write(&mut self, level: Level) -> Result<(), HardwareError> {
        let value = if level.is_high() { "1" } else { "0" };
        fs::write(self.pin.dir.join("value"), value).map_err(|e| HardwareError::Io {
            pin: self.pin.pin,
            message: e.to_string(),
        })
    }
}

/// sysfs input pin
#[derive(Debug)]
pub struct SysfsInput {
    pin: SysfsPin,
}

impl DigitalInput for SysfsInput {
    fn read(&mut self) -> Result<Level, HardwareError> {
        self.pin.read_level()
    }
}

/// sysfs input pin with edge interrupts
#[derive(Debug)]
pub struct SysfsInterrupt {
    pin: SysfsPin,
}

impl InterruptSource for SysfsInterrupt {
    fn on_edge(&mut self, edge: Edge, debounce: Duration, handler: EdgeHandler) -> Result<Subscription, HardwareError> {
        self.pin.set_attr("edge", edge.as_sysfs())?;

        let pin = self.pin.pin;
        let value = OpenOptions::new()
            .read(true)
            .open(self.pin.dir.join("value"))
            .map_err(|e| setup_err(pin, "open value", e))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("gpio{pin}-irq"))
            .spawn(move || watch_edges(pin, value, debounce, handler, thread_stop))
            .map_err(|e| setup_err(pin, "spawn interrupt thread", e))?;

        info!(pin, edge = edge.as_sysfs(), debounce_ms = debounce.as_millis() as u64, "gpio interrupt armed");
        Ok(Subscription::new(move || stop.store(true, Ordering::SeqCst)))
    }
}

fn watch_edges(pin: u32, mut value: File, debounce: Duration, handler: EdgeHandler, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; 8];
    // Consume the initial state so the first poll waits for a real edge
    let _ = value.read(&mut buf);
    let mut last_fired: Option<Instant> = None;

    while !stop.load(Ordering::SeqCst) {
        let mut fds = libc::pollfd {
            fd: value.as_raw_fd(),
            events: libc::POLLPRI | libc::POLLERR,
            revents: 0,
        };
        // SAFETY: `fds` is a single valid pollfd that outlives the call, and
        // the descriptor stays open for the lifetime of `value`.
        let ready = unsafe { libc::poll(&mut fds, 1, POLL_TIMEOUT_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            error!(pin, error = %err, "gpio poll failed, interrupt delivery stopped");
            return;
        }
        if ready == 0 || fds.revents & libc::POLLPRI == 0 {
            continue;
        }

        if value.seek(SeekFrom::Start(0)).and_then(|_| value.read(&mut buf)).is_err() {
            warn!(pin, "gpio value re-read failed");
        }

        let now = Instant::now();
        if last_fired.is_some_and(|at| now.duration_since(at) < debounce) {
            continue;
        }
        last_fired = Some(now);
        handler();
    }
    debug!(pin, "gpio interrupt thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake sysfs tree with the pin directory already present
    fn fake_root(pin: u32, value: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(format!("gpio{pin}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("value"), value).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        root
    }

    #[test]
    fn test_output_writes_value_file() {
        let root = fake_root(18, "0");
        let mut out = SysfsPin::export_at(root.path(), 18)
            .unwrap()
            .into_output(Level::High)
            .unwrap();
        let dir = root.path().join("gpio18");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "high");

        out.write(Level::Low).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");
    }

    #[test]
    fn test_input_reads_level() {
        let root = fake_root(23, "1\n");
        let mut input = SysfsPin::export_at(root.path(), 23).unwrap().into_input().unwrap();
        assert_eq!(input.read().unwrap(), Level::High);
    }

    #[test]
    fn test_missing_pin_fails_setup() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            SysfsPin::export_at(root.path(), 99),
            Err(HardwareError::Setup(_))
        ));
    }

    #[test]
    fn test_garbage_value_is_io_error() {
        assert!(matches!(parse_level(5, "x"), Err(HardwareError::Io { pin: 5, .. })));
    }
}
