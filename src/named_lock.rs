//! Cross-process mutual exclusion for shared bus controllers
//!
//! The FPGA exposes exactly one physical I2C controller and one SPI
//! controller; every logical handle is a pin-muxed view of the same block.
//! Serializing transactions therefore has to work across OS processes, not
//! just threads. The lock is an exclusive advisory file lock (`flock`) on
//! a file derived from the device serial number and resource name. When a
//! process dies, cleanly or not, the kernel drops the lock with the file
//! descriptor, so a crash never strands the bus. A named semaphore would
//! not give us that.
//!
//! `flock` locks attach to the open file description, so separate opens of
//! the lock file exclude each other even inside one process. Threads
//! sharing a single `NamedLock` handle share one file description; an
//! in-process mutex in front of the file lock covers them. The returned
//! guard holds both and releases them on drop, on every exit path.

use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// File-lock-backed mutual exclusion for one named device resource.
pub struct NamedLock {
    file: File,
    path: PathBuf,
    thread_gate: Mutex<()>,
}

impl NamedLock {
    /// Open (creating if absent) the lock file for `name` scoped to the
    /// device with `serial_number`, under `base_dir`.
    ///
    /// The file is created world-writable so unrelated processes owned by
    /// different users can cooperate on the same device.
    pub fn open(base_dir: &Path, serial_number: &str, name: &str) -> Result<Self> {
        let dir = base_dir.join(serial_number);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o666)
            .open(&path)?;
        log::debug!("Opened lock file {}", path.display());
        Ok(NamedLock {
            file,
            path,
            thread_gate: Mutex::new(()),
        })
    }

    /// Open the lock in the default per-host location
    /// (`<tmp>/setu-link/<serial>/<name>`). Not shared across hosts.
    pub fn open_default(serial_number: &str, name: &str) -> Result<Self> {
        let base = std::env::temp_dir().join("setu-link");
        Self::open(&base, serial_number, name)
    }

    /// Block until no other thread or process holds this lock, then take
    /// it. The guard releases the lock when dropped.
    pub fn lock(&self) -> Result<NamedLockGuard<'_>> {
        let thread_guard = self.thread_gate.lock();
        // Block until we're the owner. A signal can interrupt the wait
        // mid-block; resume it.
        loop {
            let status = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_EX) };
            if status == 0 {
                break;
            }
            let io = std::io::Error::last_os_error();
            if io.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Other(format!(
                "flock({}) failed: {}",
                self.path.display(),
                io
            )));
        }
        Ok(NamedLockGuard {
            lock: self,
            _thread_guard: thread_guard,
        })
    }

    fn unlock(&self) {
        let status = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if status != 0 {
            // Nothing sensible to do during unwinding; the fd close will
            // release the lock anyway.
            log::error!(
                "flock unlock failed for {}: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

/// RAII guard for a held [`NamedLock`]; releases on drop.
pub struct NamedLockGuard<'a> {
    lock: &'a NamedLock,
    _thread_guard: MutexGuard<'a, ()>,
}

impl Drop for NamedLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
