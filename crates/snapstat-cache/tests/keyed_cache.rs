//! Behavioral tests for the keyed cache: single-flight per key, freshness
//! boundary, and refusal to cache empty output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};

use snapstat_cache::{CacheConfig, KeyedCache, ManualClock, SystemClock};
use snapstat_core::{SnapstatError, SnapstatResult};
use snapstat_runner::{CommandRunner, CommandSpec};

/// Stub that counts invocations and takes a while to answer.
struct CountingRunner {
    calls: AtomicUsize,
    output: String,
    delay: Duration,
}

impl CountingRunner {
    fn new(output: &str, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            output: output.to_string(),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CommandRunner for CountingRunner {
    fn run(&self, _spec: &CommandSpec, _timeout: Duration) -> SnapstatResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(self.output.clone())
    }
}

fn report_spec() -> CommandSpec {
    CommandSpec::new("sar").args(["-q", "-f", "/var/log/sa/sa03"])
}

#[test]
fn concurrent_callers_share_one_execution() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(CountingRunner::new(
        "10:00:01 1 200 0.10 0.20 0.30 0\n",
        Duration::from_millis(150),
    ));
    let config = CacheConfig {
        lock_backoff: Duration::from_millis(50),
        lock_attempts: 40,
        ..CacheConfig::new(dir.path())
    };
    let cache = Arc::new(KeyedCache::new(config, Arc::clone(&runner), SystemClock).unwrap());

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_run("sarq_today", &report_spec(), Duration::from_secs(3600))
            })
        })
        .collect();

    for handle in handles {
        let text = handle.join().unwrap().expect("every caller gets data");
        assert!(text.starts_with("10:00:01"));
    }
    assert_eq!(runner.calls(), 1);
}

#[test]
fn contended_lock_reports_busy_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(CountingRunner::new("x\n", Duration::from_millis(400)));
    let config = CacheConfig {
        lock_backoff: Duration::from_millis(20),
        lock_attempts: 2,
        ..CacheConfig::new(dir.path())
    };
    let cache = Arc::new(KeyedCache::new(config, Arc::clone(&runner), SystemClock).unwrap());

    let slow = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || cache.get_or_run("busy", &report_spec(), Duration::from_secs(60)))
    };
    while runner.calls() == 0 {
        thread::sleep(Duration::from_millis(5));
    }

    let contended = cache.get_or_run("busy", &report_spec(), Duration::from_secs(60));
    assert!(matches!(contended, Err(SnapstatError::LockBusy { .. })));
    assert!(contended.unwrap_err().is_transient());

    assert!(slow.join().unwrap().is_ok());
    assert_eq!(runner.calls(), 1);
}

#[test]
fn entry_is_stale_exactly_at_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(CountingRunner::new("payload\n", Duration::ZERO));
    let clock = Arc::new(ManualClock::new(SystemTime::now()));
    let cache = KeyedCache::new(
        CacheConfig::new(dir.path()),
        Arc::clone(&runner),
        Arc::clone(&clock),
    )
    .unwrap();
    let ttl = Duration::from_secs(600);

    cache.get_or_run("t", &report_spec(), ttl).unwrap();
    assert_eq!(runner.calls(), 1);

    let written = std::fs::metadata(cache.cache_path("t"))
        .unwrap()
        .modified()
        .unwrap();

    clock.set(written + ttl - Duration::from_millis(1));
    cache.get_or_run("t", &report_spec(), ttl).unwrap();
    assert_eq!(runner.calls(), 1, "younger than ttl is served from cache");

    clock.set(written + ttl);
    cache.get_or_run("t", &report_spec(), ttl).unwrap();
    assert_eq!(runner.calls(), 2, "age == ttl regenerates");
}

#[test]
fn whitespace_output_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(CountingRunner::new(" \n\t\n", Duration::ZERO));
    let cache =
        KeyedCache::new(CacheConfig::new(dir.path()), Arc::clone(&runner), SystemClock).unwrap();
    let ttl = Duration::from_secs(3600);

    for _ in 0..3 {
        let result = cache.get_or_run("empty", &report_spec(), ttl);
        assert!(matches!(result, Err(SnapstatError::EmptyOutput { .. })));
    }

    assert_eq!(runner.calls(), 3, "every caller re-runs the command");
    assert!(!cache.cache_path("empty").exists());
}

#[test]
fn empty_payload_on_disk_is_treated_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(CountingRunner::new("fresh\n", Duration::ZERO));
    let cache =
        KeyedCache::new(CacheConfig::new(dir.path()), Arc::clone(&runner), SystemClock).unwrap();

    std::fs::write(cache.cache_path("t"), "   \n").unwrap();
    let text = cache
        .get_or_run("t", &report_spec(), Duration::from_secs(3600))
        .unwrap();

    assert_eq!(text, "fresh\n");
    assert_eq!(runner.calls(), 1);
}
