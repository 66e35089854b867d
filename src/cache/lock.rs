use crate::errors::{AppError, AppResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Acquiring { attempts: u32 },
    Held,
    Released,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Acquired,
    Contended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStep {
    Acquired,
    Retry(Duration),
    GiveUp,
}

/// Retry/backoff/timeout bookkeeping for a lock, independent of the primitive.
///
/// Callers feed attempt outcomes together with the current instant and follow
/// the returned step. At least one attempt is always honoured, even with a zero
/// timeout, and the backoff never sleeps past the deadline.
#[derive(Debug, Clone)]
pub struct LockAcquisition {
    state: LockState,
    timeout: Duration,
    backoff: Duration,
    started: Option<Instant>,
}

impl LockAcquisition {
    pub fn new(timeout: Duration, backoff: Duration) -> Self {
        Self {
            state: LockState::Idle,
            timeout,
            backoff,
            started: None,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn begin(&mut self, now: Instant) {
        if self.state == LockState::Idle {
            self.state = LockState::Acquiring { attempts: 0 };
            self.started = Some(now);
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    pub fn record_attempt(&mut self, outcome: AttemptOutcome, now: Instant) -> LockStep {
        let LockState::Acquiring { attempts } = self.state else {
            return LockStep::GiveUp;
        };
        match outcome {
            AttemptOutcome::Acquired => {
                self.state = LockState::Held;
                LockStep::Acquired
            }
            AttemptOutcome::Contended => {
                let elapsed = self.elapsed(now);
                if elapsed >= self.timeout {
                    self.state = LockState::TimedOut;
                    return LockStep::GiveUp;
                }
                self.state = LockState::Acquiring {
                    attempts: attempts.saturating_add(1),
                };
                LockStep::Retry(self.backoff.min(self.timeout - elapsed))
            }
        }
    }

    /// Returns true only for the Held -> Released transition.
    pub fn release(&mut self) -> bool {
        if self.state == LockState::Held {
            self.state = LockState::Released;
            return true;
        }
        false
    }
}

pub trait LockPrimitive: Send {
    /// `Ok(false)` means another holder owns the lock right now.
    fn try_lock(&mut self) -> io::Result<bool>;
    fn write_owner(&mut self, line: &str) -> io::Result<()>;
    fn unlock(&mut self) -> io::Result<()>;
}

/// Advisory exclusive `flock` on the lock file.
#[cfg(unix)]
pub struct FlockPrimitive {
    path: PathBuf,
    held: Option<nix::fcntl::Flock<File>>,
}

#[cfg(unix)]
impl FlockPrimitive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }
}

#[cfg(unix)]
impl LockPrimitive for FlockPrimitive {
    fn try_lock(&mut self) -> io::Result<bool> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                self.held = Some(lock);
                Ok(true)
            }
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(false),
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }

    fn write_owner(&mut self, line: &str) -> io::Result<()> {
        let Some(lock) = self.held.as_mut() else {
            return Ok(());
        };
        lock.set_len(0)?;
        lock.write_all(line.as_bytes())?;
        lock.flush()
    }

    fn unlock(&mut self) -> io::Result<()> {
        match self.held.take() {
            Some(lock) => lock.unlock().map(drop).map_err(|(_, errno)| io::Error::from(errno)),
            None => Ok(()),
        }
    }
}

/// Exclusive-create sentinel used where `flock` is unavailable.
#[cfg(not(unix))]
pub struct SentinelPrimitive {
    path: PathBuf,
    held: Option<File>,
}

#[cfg(not(unix))]
impl SentinelPrimitive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }
}

#[cfg(not(unix))]
impl LockPrimitive for SentinelPrimitive {
    fn try_lock(&mut self) -> io::Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => {
                self.held = Some(file);
                Ok(true)
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn write_owner(&mut self, line: &str) -> io::Result<()> {
        match self.held.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes())?;
                file.flush()
            }
            None => Ok(()),
        }
    }

    fn unlock(&mut self) -> io::Result<()> {
        if self.held.take().is_some() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

pub fn platform_primitive(path: &Path) -> Box<dyn LockPrimitive> {
    #[cfg(unix)]
    {
        Box::new(FlockPrimitive::new(path))
    }
    #[cfg(not(unix))]
    {
        Box::new(SentinelPrimitive::new(path))
    }
}

/// Scoped exclusive hold on the cache lock file; released on drop.
pub struct CacheLock {
    path: PathBuf,
    machine: LockAcquisition,
    primitive: Box<dyn LockPrimitive>,
}

impl std::fmt::Debug for CacheLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLock")
            .field("path", &self.path)
            .field("state", &self.machine.state())
            .finish()
    }
}

impl CacheLock {
    pub fn acquire(path: &Path, timeout: Duration) -> AppResult<Self> {
        Self::acquire_with(path, platform_primitive(path), timeout, LOCK_RETRY_BACKOFF)
    }

    pub fn acquire_with(
        path: &Path,
        mut primitive: Box<dyn LockPrimitive>,
        timeout: Duration,
        backoff: Duration,
    ) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
        }

        let mut machine = LockAcquisition::new(timeout, backoff);
        machine.begin(Instant::now());
        let mut last_error: Option<io::Error> = None;
        loop {
            let outcome = match primitive.try_lock() {
                Ok(true) => AttemptOutcome::Acquired,
                Ok(false) => AttemptOutcome::Contended,
                Err(error) => {
                    last_error = Some(error);
                    AttemptOutcome::Contended
                }
            };
            match machine.record_attempt(outcome, Instant::now()) {
                LockStep::Acquired => break,
                LockStep::Retry(wait) => {
                    tracing::debug!(
                        path = %path.display(),
                        elapsed_secs = machine.elapsed(Instant::now()).as_secs_f64(),
                        "waiting for cache lock to be released"
                    );
                    thread::sleep(wait);
                }
                LockStep::GiveUp => {
                    let detail = last_error
                        .map(|error| format!(": {}", error))
                        .unwrap_or_default();
                    return Err(AppError::LockTimeout(format!(
                        "failed to acquire cache lock {} after {:.1}s{}",
                        path.display(),
                        timeout.as_secs_f64(),
                        detail
                    )));
                }
            }
        }

        if let Err(error) = primitive.write_owner(&owner_line()) {
            tracing::warn!(path = %path.display(), error = %error, "failed to record cache lock owner");
        }
        tracing::info!(path = %path.display(), pid = std::process::id(), "acquired cache lock");

        Ok(Self {
            path: path.to_path_buf(),
            machine,
            primitive,
        })
    }

    pub fn state(&self) -> LockState {
        self.machine.state()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if !self.machine.release() {
            return;
        }
        match self.primitive.unlock() {
            Ok(()) => tracing::info!(path = %self.path.display(), "released cache lock"),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), error = %error, "error releasing cache lock")
            }
        }
    }
}

fn owner_line() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    format!("PID: {}, Time: {:.3}\n", std::process::id(), seconds)
}
