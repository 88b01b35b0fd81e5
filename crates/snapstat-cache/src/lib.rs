//! snapstat-cache: Keyed file cache with per-key locking.
//!
//! Report commands are slow and their output changes at most once per
//! sampling interval, so results are kept as one file per cache key. A
//! request for a key:
//!
//! 1. takes the key's exclusive lock (bounded retries),
//! 2. serves the payload if it is younger than the caller's TTL and non-empty,
//! 3. otherwise runs the command and, if the output is non-empty, replaces
//!    the payload atomically (temp file + rename, owner-only permissions),
//! 4. releases the lock and removes the lock marker.
//!
//! At most one command per key is in flight at a time. Empty output is never
//! stored.
//!
//! Independently, [`KeyedCache::sweep_expired`] deletes payloads older than a
//! global expiry, along with temp files and lock markers left behind by
//! crashed writers. It is garbage collection, not a correctness mechanism: a
//! racing delete only causes a later cache miss.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use snapstat_cache::{CacheConfig, KeyedCache, SystemClock};
//! use snapstat_runner::{CommandSpec, SystemRunner};
//!
//! let cache = KeyedCache::new(
//!     CacheConfig::new("/root/tmp/imh-snap-stat"),
//!     SystemRunner::default(),
//!     SystemClock,
//! )?;
//! cache.sweep_expired()?;
//! let text = cache.get_or_run(
//!     "sys_snap_0_0_23_59",
//!     &CommandSpec::new("sys-snap.pl").args(["--print", "00:00", "23:59", "-v"]),
//!     Duration::from_secs(60),
//! )?;
//! # Ok::<(), snapstat_core::SnapstatError>(())
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use snapstat_core::{SnapstatError, SnapstatResult};
use snapstat_runner::{CommandRunner, CommandSpec};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

mod key;
mod lock;

pub use key::{
    cache_file_name, cache_key, lock_file_name, CACHE_EXTENSION, LOCK_EXTENSION, MAX_TAG_LEN,
    TEMP_EXTENSION,
};

use lock::KeyLock;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for freshness and expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: SystemTime) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> SystemTime {
        (**self).now()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding payload and lock files. Created with mode 0700.
    pub dir: PathBuf,

    /// Lock attempts before giving up.
    ///
    /// Default: 10
    pub lock_attempts: u32,

    /// Sleep between contended lock attempts.
    ///
    /// Default: 200ms
    pub lock_backoff: Duration,

    /// Payloads older than this are removed by the sweep.
    ///
    /// Default: 1 hour
    pub expiry: Duration,

    /// Wall-clock budget for each regenerating command.
    ///
    /// Default: 10 seconds
    pub command_timeout: Duration,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_attempts: 10,
            lock_backoff: Duration::from_millis(200),
            expiry: Duration::from_secs(3600),
            command_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Keyed cache
// ============================================================================

/// File-backed cache of command output, one entry per tag.
#[derive(Debug)]
pub struct KeyedCache<R, C = SystemClock> {
    config: CacheConfig,
    runner: R,
    clock: C,
}

impl<R: CommandRunner, C: Clock> KeyedCache<R, C> {
    /// Open (creating if needed) the cache directory.
    pub fn new(config: CacheConfig, runner: R, clock: C) -> SnapstatResult<Self> {
        create_private_dir(&config.dir)?;
        Ok(Self {
            config,
            runner,
            clock,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Path of the payload file for `tag`.
    pub fn cache_path(&self, tag: &str) -> PathBuf {
        self.config.dir.join(cache_file_name(tag))
    }

    /// Return the cached output for `tag` if younger than `ttl`, else run
    /// `spec` under the key's lock and cache its output.
    ///
    /// An entry whose age equals `ttl` is stale.
    ///
    /// # Errors
    ///
    /// * [`SnapstatError::LockBusy`] - another request held the lock through
    ///   every retry
    /// * [`SnapstatError::EmptyOutput`] - the command printed nothing useful
    /// * anything the runner reports (timeout, command not found)
    pub fn get_or_run(&self, tag: &str, spec: &CommandSpec, ttl: Duration) -> SnapstatResult<String> {
        let key = cache_key(tag);
        let payload = self.config.dir.join(cache_file_name(tag));
        let marker = self.config.dir.join(lock_file_name(tag));

        let _lock = KeyLock::acquire(
            &marker,
            &key,
            self.config.lock_attempts,
            self.config.lock_backoff,
        )?;

        if let Some(cached) = self.read_fresh(&payload, ttl) {
            debug!(key = %key, "Cache hit");
            return Ok(cached);
        }

        info!(key = %key, command = %spec, "Cache miss, running command");
        let output = self.runner.run(spec, self.config.command_timeout)?;
        if output.trim().is_empty() {
            return Err(SnapstatError::empty_output(spec.to_string()));
        }

        if let Err(e) = write_private_atomic(&payload, &output) {
            warn!(key = %key, error = %e, "Could not store cache entry");
        }
        Ok(output)
    }

    /// Read `payload` if it exists, is non-empty, and `age < ttl`.
    fn read_fresh(&self, payload: &Path, ttl: Duration) -> Option<String> {
        let modified = fs::metadata(payload).and_then(|m| m.modified()).ok()?;
        let age = self
            .clock
            .now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age >= ttl {
            return None;
        }

        match fs::read_to_string(payload) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %payload.display(), error = %e, "Unreadable cache entry");
                None
            }
        }
    }

    /// Delete payloads, temp files and unheld lock markers older than the
    /// global expiry.
    ///
    /// Returns the number of files removed. Individual delete failures are
    /// ignored.
    pub fn sweep_expired(&self) -> SnapstatResult<usize> {
        let entries = fs::read_dir(&self.config.dir).map_err(|e| {
            SnapstatError::io(
                format!("read cache dir {}", self.config.dir.display()),
                e,
            )
        })?;

        let now = self.clock.now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str());
            if !matches!(extension, Some(CACHE_EXTENSION | TEMP_EXTENSION | LOCK_EXTENSION)) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.config.expiry {
                continue;
            }
            let gone = if extension == Some(LOCK_EXTENSION) {
                lock::remove_abandoned(&path)
            } else {
                fs::remove_file(&path).is_ok()
            };
            if gone {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }
}

fn create_private_dir(dir: &Path) -> SnapstatResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .map_err(|e| SnapstatError::io(format!("create cache dir {}", dir.display()), e))
}

/// Write `contents` to a temp file beside `target`, then rename over it.
fn write_private_atomic(target: &Path, contents: &str) -> io::Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::other("cache path has no file name"))?;
    let temp = target.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    let result = (|| {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp)?;
        file.write_all(contents.as_bytes())?;
        #[cfg(unix)]
        fs::set_permissions(&temp, fs::Permissions::from_mode(0o600))?;
        drop(file);
        fs::rename(&temp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedRunner {
        outputs: Mutex<Vec<SnapstatResult<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<SnapstatResult<String>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, _spec: &CommandSpec, _timeout: Duration) -> SnapstatResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                return Ok("fallback\n".to_string());
            }
            outputs.remove(0)
        }
    }

    fn spec() -> CommandSpec {
        CommandSpec::new("sar").arg("-q")
    }

    #[test]
    fn miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![Ok("first\n".into())]));
        let cache =
            KeyedCache::new(CacheConfig::new(dir.path()), Arc::clone(&runner), SystemClock)
                .unwrap();

        let ttl = Duration::from_secs(600);
        assert_eq!(cache.get_or_run("t", &spec(), ttl).unwrap(), "first\n");
        assert_eq!(cache.get_or_run("t", &spec(), ttl).unwrap(), "first\n");
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_tags_do_not_share_entries() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![
            Ok("a\n".into()),
            Ok("b\n".into()),
        ]));
        let cache =
            KeyedCache::new(CacheConfig::new(dir.path()), Arc::clone(&runner), SystemClock)
                .unwrap();

        let ttl = Duration::from_secs(600);
        assert_eq!(cache.get_or_run("a/b", &spec(), ttl).unwrap(), "a\n");
        assert_eq!(cache.get_or_run("a.b", &spec(), ttl).unwrap(), "b\n");
    }

    #[test]
    fn runner_error_propagates_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![
            Err(SnapstatError::Timeout),
            Ok("later\n".into()),
        ]));
        let cache =
            KeyedCache::new(CacheConfig::new(dir.path()), Arc::clone(&runner), SystemClock)
                .unwrap();

        let ttl = Duration::from_secs(600);
        assert!(matches!(
            cache.get_or_run("t", &spec(), ttl),
            Err(SnapstatError::Timeout)
        ));
        assert!(!cache.cache_path("t").exists());
        assert_eq!(cache.get_or_run("t", &spec(), ttl).unwrap(), "later\n");
    }

    #[test]
    fn lock_marker_is_removed_after_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![Ok("x\n".into())]);
        let cache = KeyedCache::new(CacheConfig::new(dir.path()), runner, SystemClock).unwrap();

        cache
            .get_or_run("t", &spec(), Duration::from_secs(60))
            .unwrap();
        assert!(!dir.path().join(lock_file_name("t")).exists());
        assert!(cache.cache_path("t").exists());
    }

    #[cfg(unix)]
    #[test]
    fn payload_and_directory_are_owner_only() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("cache");
        let runner = ScriptedRunner::new(vec![Ok("x\n".into())]);
        let cache = KeyedCache::new(CacheConfig::new(&dir), runner, SystemClock).unwrap();

        cache
            .get_or_run("t", &spec(), Duration::from_secs(60))
            .unwrap();

        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(cache.cache_path("t"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn sweep_removes_only_old_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let runner = ScriptedRunner::new(vec![Ok("x\n".into())]);
        let cache =
            KeyedCache::new(CacheConfig::new(dir.path()), runner, Arc::clone(&clock)).unwrap();

        cache
            .get_or_run("t", &spec(), Duration::from_secs(60))
            .unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        let modified = fs::metadata(cache.cache_path("t"))
            .unwrap()
            .modified()
            .unwrap();

        clock.set(modified + Duration::from_secs(3600));
        assert_eq!(cache.sweep_expired().unwrap(), 0);

        clock.set(modified + Duration::from_secs(3601));
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert!(!cache.cache_path("t").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    #[cfg(unix)]
    fn sweep_removes_leftovers_of_crashed_writers() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![]);
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let cache =
            KeyedCache::new(CacheConfig::new(dir.path()), runner, Arc::clone(&clock)).unwrap();

        let temp = dir.path().join(format!(".{}.4242.tmp", cache_file_name("t")));
        let marker = dir.path().join(lock_file_name("t"));
        fs::write(&temp, "half").unwrap();
        fs::write(&marker, "").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(cache.sweep_expired().unwrap(), 0);
        assert!(temp.exists() && marker.exists());

        let newest = [&temp, &marker]
            .iter()
            .map(|p| fs::metadata(p).unwrap().modified().unwrap())
            .max()
            .unwrap();
        clock.set(newest + Duration::from_secs(3601));
        assert_eq!(cache.sweep_expired().unwrap(), 2);
        assert!(!temp.exists());
        assert!(!marker.exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn manual_clock_advances() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));
    }
}
