//! Open/grab lifecycle for the remote's event devices and the
//! multiplexed readiness wait the capture loops block on.
//!
//! Both halves of the remote are owned exclusively (evdev grab) for the
//! whole open lifetime so the desktop's input layer never sees the same
//! events. A missing or unreadable node is normal while the remote is
//! asleep or pairing; opening polls for it instead of failing.

use crate::config::Inputs;
use crate::event::Source;
use evdev::{Device, InputEvent};
use std::collections::VecDeque;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sleep between attempts while a device node is missing.
const APPEAR_POLL: Duration = Duration::from_secs(5);
/// Granularity of cancelable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Device-layer failures. The dispatch loop tells the recoverable
/// outcomes apart via [`ReadOutcome`]; anything surfacing here as an
/// `Err` is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no input devices configured; run the 'scan' command first")]
    NotConfigured,

    #[error("device {path} did not appear within {limit:?}")]
    WaitExpired { path: PathBuf, limit: Duration },

    #[error("poll on input devices failed")]
    Poll(#[source] std::io::Error),

    #[error("{op} on {path} failed")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Shared cancellation flag, raised from the Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Sleep in short slices so cancellation stays responsive. Returns
/// false if the flag was raised before the duration elapsed.
pub fn sleep_cancelable(total: Duration, cancel: &CancelFlag) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_set() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// What one readiness wait produced. The capture loops pattern-match
/// this instead of untangling raw I/O errors.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Next raw event, tagged by the half that produced it.
    Event(Source, InputEvent),
    /// No stream produced an event within the timeout window.
    Timeout,
    /// An open handle went away (unplugged or BLE sleep).
    Disappeared,
    /// The cancel flag was raised.
    Interrupted,
}

struct Slot {
    source: Source,
    path: PathBuf,
    dev: Device,
}

/// Both halves of the remote, exclusively grabbed.
pub struct Remote {
    slots: Vec<Slot>,
    pending: VecDeque<(Source, InputEvent)>,
    cancel: CancelFlag,
}

// `evdev::Device` does not implement `Debug`, so derive won't work here.
// Provide a manual impl covering the fields that do, which is all the
// test harness needs for `.unwrap_err()` / `.unwrap()`.
impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("slots", &self.slots.len())
            .field("pending", &self.pending.len())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Remote {
    /// Open and grab every configured device, waiting for nodes that
    /// are missing or not yet readable. Returns `None` if canceled
    /// while waiting. `max_wait` bounds the wait per device; the
    /// interactive CLI passes `None` and waits indefinitely.
    pub fn open(
        inputs: &Inputs,
        cancel: &CancelFlag,
        max_wait: Option<Duration>,
    ) -> Result<Option<Remote>, DeviceError> {
        if inputs.is_empty() {
            return Err(DeviceError::NotConfigured);
        }

        let mut slots: Vec<Slot> = Vec::new();
        let configured = [
            (Source::Keyboard, inputs.kbd.as_deref(), '.'),
            (Source::Mouse, inputs.mouse.as_deref(), ':'),
        ];
        for (source, path, marker) in configured {
            let Some(path) = path else { continue };
            match wait_open(path, marker, cancel, max_wait)? {
                Some(dev) => slots.push(Slot {
                    source,
                    path: path.to_path_buf(),
                    dev,
                }),
                None => {
                    // Canceled mid-open; hand back what we already hold.
                    for slot in &mut slots {
                        let _ = slot.dev.ungrab();
                    }
                    return Ok(None);
                }
            }
        }

        Ok(Some(Remote {
            slots,
            pending: VecDeque::new(),
            cancel: cancel.clone(),
        }))
    }

    /// Wait on both handles at once for up to `timeout` and return the
    /// first available event. Events already fetched from the kernel
    /// queue drain in device-delivery order before poll is consulted
    /// again.
    pub fn next_event(&mut self, timeout: Duration) -> Result<ReadOutcome, DeviceError> {
        if let Some((source, ev)) = self.pending.pop_front() {
            return Ok(ReadOutcome::Event(source, ev));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.is_set() {
                return Ok(ReadOutcome::Interrupted);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut fds: Vec<libc::pollfd> = self
                .slots
                .iter()
                .map(|slot| libc::pollfd {
                    fd: slot.dev.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();

            let rc = unsafe {
                libc::poll(
                    fds.as_mut_ptr(),
                    fds.len() as libc::nfds_t,
                    remaining.as_millis() as i32,
                )
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    // Signal delivery; the cancel check above decides.
                    continue;
                }
                return Err(DeviceError::Poll(err));
            }
            if rc == 0 {
                return Ok(ReadOutcome::Timeout);
            }

            for (slot, fd) in self.slots.iter_mut().zip(&fds) {
                if fd.revents == 0 {
                    continue;
                }
                match slot.dev.fetch_events() {
                    Ok(events) => {
                        for ev in events {
                            self.pending.push_back((slot.source, ev));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) if is_gone(&e) => {
                        warn!("device {} disappeared: {e}", slot.path.display());
                        return Ok(ReadOutcome::Disappeared);
                    }
                    Err(e) => {
                        return Err(DeviceError::Io {
                            op: "read",
                            path: slot.path.clone(),
                            source: e,
                        });
                    }
                }
            }

            if let Some((source, ev)) = self.pending.pop_front() {
                return Ok(ReadOutcome::Event(source, ev));
            }
            // Readiness without a full event packet; poll again within
            // the same deadline.
        }
    }

    /// Release the exclusive grabs. Dropping the handles would also
    /// release them; this makes the hand-back explicit on clean
    /// shutdown paths.
    pub fn close(mut self) {
        for slot in &mut self.slots {
            let _ = slot.dev.ungrab();
        }
    }
}

/// Open, set non-blocking, and exclusively grab one device node,
/// polling until it appears and becomes readable. Prints a progress
/// marker per retry; the remote waking from BLE sleep can take a few
/// seconds to re-register its nodes.
fn wait_open(
    path: &Path,
    marker: char,
    cancel: &CancelFlag,
    max_wait: Option<Duration>,
) -> Result<Option<Device>, DeviceError> {
    let start = Instant::now();
    let mut seen_missing = false;

    loop {
        if cancel.is_set() {
            return Ok(None);
        }

        match try_open(path) {
            Ok(dev) => {
                if seen_missing {
                    println!();
                }
                info!("grabbed {}", path.display());
                return Ok(Some(dev));
            }
            Err(e) if is_waitable(&e) => {
                if !seen_missing {
                    println!(
                        "Waiting for {} to appear. Try pressing a button ...",
                        path.display()
                    );
                    seen_missing = true;
                }
                print!("{marker}");
                let _ = std::io::stdout().flush();
            }
            Err(e) => {
                return Err(DeviceError::Io {
                    op: "open",
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }

        if let Some(limit) = max_wait {
            if start.elapsed() >= limit {
                return Err(DeviceError::WaitExpired {
                    path: path.to_path_buf(),
                    limit,
                });
            }
        }
        if !sleep_cancelable(APPEAR_POLL, cancel) {
            return Ok(None);
        }
    }
}

fn try_open(path: &Path) -> std::io::Result<Device> {
    let mut dev = Device::open(path)?;
    set_nonblocking(&dev)?;
    dev.grab()?;
    Ok(dev)
}

/// Missing node or permission trouble: keep polling, the udev rule may
/// still be settling or the remote is asleep.
fn is_waitable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
    )
}

/// ENODEV from a grabbed handle (and ENOENT from a re-open race) mean
/// the remote dropped the connection, not that our I/O is broken.
fn is_gone(e: &std::io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENOENT))
}

fn set_nonblocking(dev: &Device) -> std::io::Result<()> {
    let raw_fd = dev.as_raw_fd();

    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(raw_fd, libc::F_GETFL) };
    if current < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(raw_fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_configured_inputs_is_typed_error() {
        let cancel = CancelFlag::new();
        let err = Remote::open(&Inputs::default(), &cancel, None).unwrap_err();
        assert!(matches!(err, DeviceError::NotConfigured));
    }

    #[test]
    fn test_open_canceled_while_waiting() {
        let cancel = CancelFlag::new();
        cancel.set();
        let inputs = Inputs {
            kbd: Some(PathBuf::from("/dev/input/event-that-does-not-exist")),
            mouse: None,
        };
        let remote = Remote::open(&inputs, &cancel, None).unwrap();
        assert!(remote.is_none());
    }

    #[test]
    fn test_open_bounded_wait_expires() {
        let cancel = CancelFlag::new();
        let inputs = Inputs {
            kbd: Some(PathBuf::from("/dev/input/event-that-does-not-exist")),
            mouse: None,
        };
        let err = Remote::open(&inputs, &cancel, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, DeviceError::WaitExpired { .. }));
    }

    #[test]
    fn test_sleep_cancelable_stops_early() {
        let cancel = CancelFlag::new();
        cancel.set();
        let start = Instant::now();
        assert!(!sleep_cancelable(Duration::from_secs(5), &cancel));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_gone_classification() {
        let enodev = std::io::Error::from_raw_os_error(libc::ENODEV);
        let eacces = std::io::Error::from_raw_os_error(libc::EACCES);
        assert!(is_gone(&enodev));
        assert!(!is_gone(&eacces));
        assert!(is_waitable(&eacces));
        assert!(!is_waitable(&enodev));
    }
}
