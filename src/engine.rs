//! The queue-processing loop.
//!
//! Strictly sequential: one download in flight at a time, head of the queue
//! first. Successful URLs leave the queue; failing URLs accumulate persisted
//! attempts until the retry limit demotes them to the failure file. When the
//! queue drains, the loop either terminates (one-shot) or polls for entries
//! appended by a producer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::download::{CurlDownloader, Downloader, FetchError};
use crate::failure::{FailureLog, FailureLogError};
use crate::hook;
use crate::queue::{QueueError, QueueFile};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{StateError, StateStore};

/// Slice length for interruptible sleeps, so Ctrl-C is honored promptly
/// even mid-poll.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Errors that can abort a queue run.
///
/// Download failures are not among them: those are bookkept and retried.
/// What aborts the run is broken plumbing under the loop itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Queue file operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// State file operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Failure file operation failed.
    #[error(transparent)]
    Failure(#[from] FailureLogError),

    /// The downloader could not be constructed.
    #[error(transparent)]
    Downloader(#[from] FetchError),
}

/// Whether the loop terminates or polls when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Drain the queue, then exit.
    OneShot,
    /// Poll for new entries at the configured interval.
    Poll,
}

/// Counters from a queue run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    completed: usize,
    failed: usize,
    retried: usize,
}

impl RunStats {
    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Returns the number of URLs demoted to the failure file.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Returns the number of failed attempts that stayed queued for retry.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried
    }

    /// Returns the number of URLs that reached a terminal outcome.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// Sequential download engine over the file-backed queue.
pub struct Engine {
    config: Config,
    queue: QueueFile,
    state: StateStore,
    failures: FailureLog,
    retry_policy: RetryPolicy,
    downloader: Arc<dyn Downloader>,
    interrupted: Arc<AtomicBool>,
}

impl Engine {
    /// Builds an engine with the cURL downloader from config.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Downloader`] when no downloader binary can be
    /// found.
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        let downloader = Arc::new(CurlDownloader::from_config(&config)?);
        Ok(Self::with_downloader(config, downloader))
    }

    /// Builds an engine around an explicit [`Downloader`] implementation.
    #[must_use]
    pub fn with_downloader(config: Config, downloader: Arc<dyn Downloader>) -> Self {
        let queue = QueueFile::new(&config.queue);
        let state = StateStore::new(&config.state);
        let failures = FailureLog::new(&config.failed);
        let retry_policy = RetryPolicy::with_max_retries(config.max_retries);
        Self {
            config,
            queue,
            state,
            failures,
            retry_policy,
            downloader,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the retry policy (backoff pacing; the limit still comes from
    /// the policy itself).
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Shares an externally created interrupt flag (e.g. one a signal
    /// handler already owns).
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Returns the flag that makes the loop stop between steps when set.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Runs the queue loop until the queue drains (one-shot), or forever
    /// (poll), or until interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when queue/state/failure file plumbing fails;
    /// individual download failures are bookkept, not returned.
    #[instrument(skip(self), fields(queue = %self.config.queue.display()))]
    pub async fn run(&self, mode: RunMode) -> Result<RunStats, EngineError> {
        let mut stats = RunStats::default();

        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                info!("interrupted, stopping queue run");
                break;
            }

            let Some(url) = self.queue.front()? else {
                match mode {
                    RunMode::OneShot => {
                        debug!("queue empty, one-shot run done");
                        break;
                    }
                    RunMode::Poll => {
                        debug!(
                            interval_secs = self.config.poll_interval.as_secs(),
                            "queue empty, polling"
                        );
                        if self.idle(self.config.poll_interval).await {
                            break;
                        }
                        continue;
                    }
                }
            };

            self.process(&url, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Attempts one download of `url` and applies the outcome to the queue,
    /// state, and failure files.
    async fn process(&self, url: &str, stats: &mut RunStats) -> Result<(), EngineError> {
        info!(url = %url, "fetching");
        self.state.set_current(url)?;
        let outcome = self.downloader.fetch(url, &self.config.dest).await;
        self.state.clear_current()?;

        match outcome {
            Ok(saved) => {
                self.queue.remove(url)?;
                self.state.clear_attempts(url)?;
                stats.completed += 1;
                info!(url = %url, dest = %saved.display(), "download complete");

                if let Some(post) = &self.config.post {
                    hook::spawn_post_command(post, url, &saved);
                }
            }
            Err(err) => {
                let attempts = self.state.record_failure(url)?;
                match self.retry_policy.should_retry(attempts) {
                    RetryDecision::Retry { delay, attempts } => {
                        stats.retried += 1;
                        warn!(
                            url = %url,
                            attempts,
                            error = %err,
                            "download failed, will retry"
                        );
                        self.idle(delay).await;
                    }
                    RetryDecision::GiveUp { attempts } => {
                        self.queue.remove(url)?;
                        self.failures.append(url)?;
                        self.state.clear_attempts(url)?;
                        stats.failed += 1;
                        warn!(
                            url = %url,
                            attempts,
                            failed_file = %self.failures.path().display(),
                            error = %err,
                            "retries exhausted, moved to failure file"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Sleeps for `duration` in slices, returning true if interrupted.
    async fn idle(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.interrupted.load(Ordering::SeqCst) {
                return true;
            }
            let slice = remaining.min(SLEEP_SLICE);
            sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::download::FetchError;

    /// Scripted outcomes per URL; anything unscripted succeeds.
    struct ScriptedDownloader {
        outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedDownloader {
        fn new(script: &[(&str, &[bool])]) -> Self {
            let outcomes = script
                .iter()
                .map(|(url, results)| ((*url).to_string(), results.iter().copied().collect()))
                .collect();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Downloader for ScriptedDownloader {
        async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            let ok = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(true);
            if ok {
                Ok(dest_dir.join("downloaded.bin"))
            } else {
                Err(FetchError::exit_code(url, 22))
            }
        }
    }

    fn test_config(dir: &TempDir, max_retries: u32) -> Config {
        Config {
            dest: dir.path().join("dest"),
            queue: dir.path().join("dqlist"),
            state: dir.path().join("dqlist.state"),
            failed: dir.path().join("dqlist.failed"),
            max_retries,
            poll_interval: Duration::from_millis(10),
            post: None,
            curl_path: None,
            curl_args: Vec::new(),
            auth: Vec::new(),
            verbosity: crate::config::VerbositySetting::Default,
        }
    }

    /// Zero-delay policy so retry loops don't slow the suite down.
    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::ZERO, Duration::ZERO, 1.0)
    }

    fn engine_with(
        config: Config,
        downloader: Arc<ScriptedDownloader>,
    ) -> Engine {
        let max_retries = config.max_retries;
        Engine::with_downloader(config, downloader).with_retry_policy(instant_policy(max_retries))
    }

    #[tokio::test]
    async fn test_successful_download_removes_url_from_queue() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 3);
        let queue = QueueFile::new(&config.queue);
        queue.append(&["https://example.com/a".to_string()]).unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[("https://example.com/a", &[true])]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));

        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.failed(), 0);
        assert!(queue.load().unwrap().is_empty());
        assert!(FailureLog::new(&config.failed).list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_urls_attempted_in_queue_order() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 3);
        let queue = QueueFile::new(&config.queue);
        queue
            .append(&[
                "https://example.com/1".to_string(),
                "https://example.com/2".to_string(),
                "https://example.com/3".to_string(),
            ])
            .unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let engine = engine_with(config, Arc::clone(&downloader));

        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.completed(), 3);
        assert_eq!(
            downloader.calls(),
            vec![
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/3"
            ]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 3);
        let queue = QueueFile::new(&config.queue);
        queue.append(&["https://example.com/flaky".to_string()]).unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[(
            "https://example.com/flaky",
            &[false, false, true],
        )]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));

        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.retried(), 2);
        assert_eq!(stats.failed(), 0);
        assert!(queue.load().unwrap().is_empty());
        assert!(FailureLog::new(&config.failed).list().unwrap().is_empty());
        // Attempts were cleared after the eventual success.
        assert_eq!(
            StateStore::new(&config.state)
                .attempts("https://example.com/flaky")
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_demote_to_failure_file() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 2);
        let queue = QueueFile::new(&config.queue);
        queue
            .append(&[
                "https://example.com/dead".to_string(),
                "https://example.com/fine".to_string(),
            ])
            .unwrap();

        // max_retries = 2 allows three attempts; fail all of them.
        let downloader = Arc::new(ScriptedDownloader::new(&[(
            "https://example.com/dead",
            &[false, false, false],
        )]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));

        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.completed(), 1);
        assert_eq!(stats.retried(), 2);

        // The dead URL moved out of the queue and into the failure file.
        assert_eq!(queue.load().unwrap(), Vec::<String>::new());
        assert_eq!(
            FailureLog::new(&config.failed).list().unwrap(),
            vec!["https://example.com/dead"]
        );
        // Its attempt count was cleared for a potential re-add.
        assert_eq!(
            StateStore::new(&config.state)
                .attempts("https://example.com/dead")
                .unwrap(),
            0
        );
        // Head-of-queue retries ran before the next URL was touched.
        assert_eq!(
            downloader.calls(),
            vec![
                "https://example.com/dead",
                "https://example.com/dead",
                "https://example.com/dead",
                "https://example.com/fine"
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_retries_demotes_on_first_failure() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 0);
        let queue = QueueFile::new(&config.queue);
        queue.append(&["https://example.com/dead".to_string()]).unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[(
            "https://example.com/dead",
            &[false],
        )]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));

        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.retried(), 0);
        assert_eq!(downloader.calls().len(), 1);
    }

    /// Always fails, and trips the engine's interrupt flag after its first
    /// call so exactly one attempt is recorded.
    struct FailOnceThenInterrupt {
        flag: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Downloader for FailOnceThenInterrupt {
        async fn fetch(&self, url: &str, _dest_dir: &Path) -> Result<PathBuf, FetchError> {
            self.flag.store(true, Ordering::SeqCst);
            Err(FetchError::exit_code(url, 22))
        }
    }

    #[tokio::test]
    async fn test_attempt_counts_survive_engine_restarts() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 2);
        let queue = QueueFile::new(&config.queue);
        queue.append(&["https://example.com/dead".to_string()]).unwrap();

        // First run: exactly one failed attempt, then interruption.
        {
            let flag = Arc::new(AtomicBool::new(false));
            let engine = Engine::with_downloader(
                config.clone(),
                Arc::new(FailOnceThenInterrupt {
                    flag: Arc::clone(&flag),
                }),
            )
            .with_retry_policy(instant_policy(2))
            .with_interrupt_flag(flag);
            engine.run(RunMode::OneShot).await.unwrap();
        }

        let persisted = StateStore::new(&config.state)
            .attempts("https://example.com/dead")
            .unwrap();
        assert_eq!(persisted, 1, "attempt count should survive the restart");
        assert_eq!(
            queue.load().unwrap(),
            vec!["https://example.com/dead"],
            "interrupted URL stays queued"
        );

        // Second run picks up the persisted count: with max_retries = 2 and
        // one attempt already burned, two more failures exhaust the limit.
        let downloader = Arc::new(ScriptedDownloader::new(&[(
            "https://example.com/dead",
            &[false, false],
        )]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));
        let stats = engine.run(RunMode::OneShot).await.unwrap();
        assert_eq!(stats.failed(), 1);
        assert_eq!(downloader.calls().len(), 2);
        assert_eq!(
            FailureLog::new(&config.failed).list().unwrap(),
            vec!["https://example.com/dead"]
        );
    }

    #[tokio::test]
    async fn test_current_marker_cleared_after_each_download() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 3);
        QueueFile::new(&config.queue)
            .append(&["https://example.com/a".to_string()])
            .unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let engine = engine_with(config.clone(), downloader);
        engine.run(RunMode::OneShot).await.unwrap();

        assert!(StateStore::new(&config.state).current().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_poll_mode_picks_up_late_appends_until_interrupted() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, 3);
        let queue = QueueFile::new(&config.queue);

        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let engine = engine_with(config.clone(), Arc::clone(&downloader));
        let flag = engine.interrupt_flag();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                queue.append(&["https://example.com/late".to_string()]).unwrap();
                // Give the poll loop a moment to drain it, then stop the run.
                sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
            })
        };

        let stats = engine.run(RunMode::Poll).await.unwrap();
        producer.await.unwrap();

        assert_eq!(stats.completed(), 1);
        assert_eq!(downloader.calls(), vec!["https://example.com/late"]);
        assert!(queue.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_hook_runs_after_success() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("hook-ran");
        let mut config = test_config(&dir, 3);
        config.post = Some(format!("echo {{url}} > {}", marker.display()));

        QueueFile::new(&config.queue)
            .append(&["https://example.com/a".to_string()])
            .unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let engine = engine_with(config, downloader);
        engine.run(RunMode::OneShot).await.unwrap();

        // Hook is fire-and-forget: poll briefly for its side effect.
        for _ in 0..50 {
            if marker.exists() {
                let content = std::fs::read_to_string(&marker).unwrap();
                assert!(content.contains("https://example.com/a"));
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("post-download hook did not run within 1s");
    }

    #[tokio::test]
    async fn test_post_hook_not_run_for_failures() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("hook-ran");
        let mut config = test_config(&dir, 0);
        config.post = Some(format!("touch {} # {{url}}", marker.display()));

        QueueFile::new(&config.queue)
            .append(&["https://example.com/dead".to_string()])
            .unwrap();

        let downloader = Arc::new(ScriptedDownloader::new(&[(
            "https://example.com/dead",
            &[false],
        )]));
        let engine = engine_with(config, downloader);
        engine.run(RunMode::OneShot).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists(), "hook must only fire on success");
    }
}
