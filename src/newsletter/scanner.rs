use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use super::report::{ScanState, TickError, TickReport};
use crate::board_store::{JobPosting, PostingStore, Subscriber, SubscriberStore};
use crate::config::NewsletterSettings;
use crate::dispatch::{compose_message, DispatchGateway};
use crate::ledger::NotificationLedger;
use crate::matcher;
use crate::server::metrics;
use crate::server_store::ServerStore;

/// Name of the persisted lease guarding against concurrent scans.
pub const SCAN_LEASE_NAME: &str = "newsletter_scan";

/// Runs a synchronous store call on the blocking pool.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Store task panicked")?
}

enum PairOutcome {
    AlreadyNotified,
    Sent,
    Failed,
    /// Sent, but the ledger write failed.
    LedgerError,
    /// Neither sent nor recorded as failed; nothing would re-queue it.
    Unrecorded,
}

/// Drives newsletter ticks. One instance per process; [`run_tick`] refuses to
/// overlap with itself and with scanners in other processes sharing the same
/// server database.
///
/// [`run_tick`]: NewsletterScanner::run_tick
pub struct NewsletterScanner {
    postings: Arc<dyn PostingStore>,
    subscribers: Arc<dyn SubscriberStore>,
    ledger: Arc<dyn NotificationLedger>,
    server_store: Arc<dyn ServerStore>,
    gateway: Arc<dyn DispatchGateway>,
    settings: NewsletterSettings,
    holder: String,
    scanning: AtomicBool,
    state: Mutex<ScanState>,
}

/// Clears the reentrancy flag when a tick ends, however it ends.
struct ScanGuard<'a>(&'a NewsletterScanner);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.set_state(ScanState::Idle);
        self.0.scanning.store(false, Ordering::Release);
    }
}

impl NewsletterScanner {
    pub fn new(
        postings: Arc<dyn PostingStore>,
        subscribers: Arc<dyn SubscriberStore>,
        ledger: Arc<dyn NotificationLedger>,
        server_store: Arc<dyn ServerStore>,
        gateway: Arc<dyn DispatchGateway>,
        settings: NewsletterSettings,
    ) -> Self {
        let holder = format!(
            "pid{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis()
        );
        Self {
            postings,
            subscribers,
            ledger,
            server_store,
            gateway,
            settings,
            holder,
            scanning: AtomicBool::new(false),
            state: Mutex::new(ScanState::Idle),
        }
    }

    /// Identity this scanner acquires the scan lease under.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn state(&self) -> ScanState {
        self.state.lock().map(|s| *s).unwrap_or(ScanState::Idle)
    }

    fn set_state(&self, state: ScanState) {
        if let Ok(mut current) = self.state.lock() {
            debug!("Newsletter scan {} -> {}", current.as_str(), state.as_str());
            *current = state;
        }
    }

    /// Run one scan-and-notify cycle.
    ///
    /// On success the cursor has advanced to the start of this tick. On any
    /// error the cursor is untouched and the next tick covers the same window.
    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Newsletter tick already in progress, skipping");
            metrics::record_newsletter_tick(TickError::AlreadyRunning.label(), Duration::ZERO);
            return Err(TickError::AlreadyRunning);
        }
        let _guard = ScanGuard(self);

        let started = Instant::now();
        let result = self.run_leased_tick().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(report) => {
                metrics::record_newsletter_tick("committed", elapsed);
                info!(
                    "Newsletter tick committed in {:?}: {} postings, {} subscribers, {} matched, {} sent, {} failed, {} already notified",
                    elapsed,
                    report.postings_scanned,
                    report.subscribers_scanned,
                    report.matched,
                    report.sent,
                    report.failed,
                    report.already_notified
                );
            }
            Err(e) => {
                metrics::record_newsletter_tick(e.label(), elapsed);
                warn!("Newsletter tick aborted after {:?}: {}", elapsed, e);
            }
        }
        result
    }

    async fn run_leased_tick(&self) -> Result<TickReport, TickError> {
        let ttl = chrono::Duration::from_std(self.settings.lease_ttl())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let store = self.server_store.clone();
        let holder = self.holder.clone();
        let acquired = blocking(move || store.try_acquire_lease(SCAN_LEASE_NAME, &holder, ttl))
            .await
            .map_err(|e| TickError::StoreUnavailable(format!("scan lease: {:#}", e)))?;
        if !acquired {
            return Err(TickError::LeaseHeld);
        }

        let result = match tokio::time::timeout(self.settings.tick_timeout, self.scan()).await {
            Ok(result) => result,
            Err(_) => Err(TickError::Timeout(self.settings.tick_timeout)),
        };
        if result.is_err() {
            self.set_state(ScanState::Aborted);
        }

        let store = self.server_store.clone();
        let holder = self.holder.clone();
        if let Err(e) = blocking(move || store.release_lease(SCAN_LEASE_NAME, &holder)).await {
            // It expires on its own
            warn!("Failed to release scan lease: {:#}", e);
        }

        result
    }

    async fn scan(&self) -> Result<TickReport, TickError> {
        self.set_state(ScanState::Scanning);
        let scan_start = Utc::now();

        let store = self.server_store.clone();
        let cursor = blocking(move || store.load_scan_cursor())
            .await
            .map_err(|e| TickError::StoreUnavailable(format!("scan cursor: {:#}", e)))?;
        let mut report = TickReport::new(scan_start, cursor.last_scan_at);

        let since = match cursor.last_scan_at {
            Some(ts) => Some(self.window_start(ts)?),
            None => None,
        };

        let posting_store = self.postings.clone();
        let window: Vec<JobPosting> = blocking(move || posting_store.list_postings_since(since))
            .await
            .map_err(|e| TickError::StoreUnavailable(format!("postings: {:#}", e)))?
            .into_iter()
            .filter(JobPosting::is_open)
            .collect();

        let subscriber_store = self.subscribers.clone();
        let subscribers = blocking(move || subscriber_store.list_active_subscribers())
            .await
            .map_err(|e| TickError::StoreUnavailable(format!("subscribers: {:#}", e)))?;

        let ledger = self.ledger.clone();
        let retries = blocking(move || ledger.pending_retries())
            .await
            .map_err(|e| TickError::Ledger(format!("{:#}", e)))?;

        report.postings_scanned = window.len();
        report.subscribers_scanned = subscribers.len();
        debug!(
            "Scanning {} postings since {:?} against {} subscribers ({} pending retries)",
            window.len(),
            since,
            subscribers.len(),
            retries.len()
        );

        let (postings, candidates, retry_pairs) =
            self.build_candidates(window, &subscribers, retries).await?;
        report.retry_pairs = retry_pairs;
        report.candidate_pairs = candidates.len();

        let postings = Arc::new(postings);
        let subscribers = Arc::new(subscribers);
        let matched = {
            let postings = postings.clone();
            let subscribers = subscribers.clone();
            tokio::task::spawn_blocking(move || {
                candidates
                    .into_par_iter()
                    .filter(|&(si, pi)| matcher::matches(&postings[pi], &subscribers[si].criteria))
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|e| TickError::Internal(format!("matching task failed: {}", e)))?
        };
        report.matched = matched.len();

        let outcomes: Vec<PairOutcome> = stream::iter(matched)
            .map(|(si, pi)| self.process_pair(&subscribers[si], &postings[pi]))
            .buffer_unordered(self.settings.dispatch_concurrency)
            .collect()
            .await;

        let mut unrecorded = 0;
        for outcome in outcomes {
            match outcome {
                PairOutcome::AlreadyNotified => report.already_notified += 1,
                PairOutcome::Sent => report.sent += 1,
                PairOutcome::Failed => report.failed += 1,
                PairOutcome::LedgerError => report.ledger_errors += 1,
                PairOutcome::Unrecorded => unrecorded += 1,
            }
        }
        if unrecorded > 0 {
            // Keep the cursor so the next tick covers these pairs again
            return Err(TickError::Ledger(format!(
                "{} of {} matched pairs could not be recorded",
                unrecorded, report.matched
            )));
        }

        self.set_state(ScanState::Committing);
        let store = self.server_store.clone();
        let version = cursor.version;
        let advanced = blocking(move || store.advance_scan_cursor(version, scan_start))
            .await
            .map_err(|e| TickError::StoreUnavailable(format!("scan cursor commit: {:#}", e)))?;
        if !advanced {
            return Err(TickError::CursorConflict(version));
        }

        report.state = ScanState::Committing;
        report.cursor_after = Some(scan_start);
        Ok(report)
    }

    /// Earliest creation time scanned when the cursor is at `cursor`.
    fn window_start(&self, cursor: DateTime<Utc>) -> Result<DateTime<Utc>, TickError> {
        chrono::Duration::from_std(self.settings.grace_window)
            .ok()
            .and_then(|grace| cursor.checked_sub_signed(grace))
            .ok_or_else(|| {
                TickError::Internal(format!(
                    "grace window of {:?} reaches before the earliest timestamp",
                    self.settings.grace_window
                ))
            })
    }

    /// Every (subscriber, posting) pair in the window, plus earlier failed
    /// pairs whose posting is outside it. Returns the posting list the
    /// candidate indices refer to and the number of re-queued pairs.
    async fn build_candidates(
        &self,
        window: Vec<JobPosting>,
        subscribers: &[Subscriber],
        retries: Vec<(String, String)>,
    ) -> Result<(Vec<JobPosting>, Vec<(usize, usize)>, usize), TickError> {
        let window_len = window.len();
        let mut postings = window;
        let mut candidates: Vec<(usize, usize)> = (0..subscribers.len())
            .flat_map(|si| (0..window_len).map(move |pi| (si, pi)))
            .collect();

        let subscriber_index: HashMap<&str, usize> = subscribers
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut posting_index: HashMap<String, usize> = postings
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let mut unavailable: HashSet<String> = HashSet::new();
        let mut retry_pairs = 0;

        for (subscriber_id, job_id) in retries {
            // Deactivated subscribers are not retried
            let Some(&si) = subscriber_index.get(subscriber_id.as_str()) else {
                continue;
            };
            if unavailable.contains(&job_id) {
                continue;
            }
            if let Some(&pi) = posting_index.get(&job_id) {
                if pi >= window_len {
                    candidates.push((si, pi));
                    retry_pairs += 1;
                }
                continue;
            }

            let store = self.postings.clone();
            let id = job_id.clone();
            let posting = blocking(move || store.get_posting(&id))
                .await
                .map_err(|e| TickError::StoreUnavailable(format!("postings: {:#}", e)))?;
            match posting {
                Some(posting) if posting.is_open() => {
                    let pi = postings.len();
                    postings.push(posting);
                    posting_index.insert(job_id, pi);
                    candidates.push((si, pi));
                    retry_pairs += 1;
                }
                _ => {
                    debug!("Not retrying posting {}: closed or removed", job_id);
                    unavailable.insert(job_id);
                }
            }
        }

        Ok((postings, candidates, retry_pairs))
    }

    async fn process_pair(&self, subscriber: &Subscriber, posting: &JobPosting) -> PairOutcome {
        let ledger = self.ledger.clone();
        let (sid, jid) = (subscriber.id.clone(), posting.id.clone());
        match blocking(move || ledger.has_notified(&sid, &jid)).await {
            Ok(true) => return PairOutcome::AlreadyNotified,
            Ok(false) => {}
            Err(e) => {
                error!(
                    "Ledger lookup failed for subscriber {} and posting {}: {:#}",
                    subscriber.id, posting.id, e
                );
                metrics::record_ledger_error("has_notified");
                return PairOutcome::Unrecorded;
            }
        }

        let message = compose_message(posting, subscriber);
        let started = Instant::now();
        let sent = self.gateway.send(&subscriber.email, &message).await;
        let elapsed = started.elapsed();

        let ledger = self.ledger.clone();
        let (sid, jid) = (subscriber.id.clone(), posting.id.clone());
        let now = Utc::now();
        match sent {
            Ok(()) => {
                metrics::record_dispatch(self.gateway.name(), "sent", elapsed);
                match blocking(move || ledger.record_success(&sid, &jid, now)).await {
                    Ok(true) => {
                        debug!("Notified subscriber {} of posting {}", subscriber.id, posting.id);
                        PairOutcome::Sent
                    }
                    Ok(false) => {
                        warn!(
                            "Subscriber {} was notified of posting {} by a concurrent writer",
                            subscriber.id, posting.id
                        );
                        PairOutcome::Sent
                    }
                    Err(e) => {
                        error!(
                            "Notified subscriber {} of posting {} but failed to record it: {:#}",
                            subscriber.id, posting.id, e
                        );
                        metrics::record_ledger_error("record_success");
                        PairOutcome::LedgerError
                    }
                }
            }
            Err(e) => {
                metrics::record_dispatch(self.gateway.name(), "failed", elapsed);
                warn!(
                    "Dispatch to subscriber {} for posting {} failed: {}",
                    subscriber.id, posting.id, e
                );
                let reason = e.to_string();
                match blocking(move || ledger.record_failure(&sid, &jid, now, &reason)).await {
                    Ok(()) => PairOutcome::Failed,
                    Err(e) => {
                        error!(
                            "Failed to record dispatch failure for subscriber {} and posting {}: {:#}",
                            subscriber.id, posting.id, e
                        );
                        metrics::record_ledger_error("record_failure");
                        PairOutcome::Unrecorded
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board_store::{PostingStatus, SqliteBoardStore, SubscriptionCriteria};
    use crate::dispatch::{DispatchError, NotificationMessage};
    use crate::ledger::{DispatchOutcome, SqliteNotificationLedger};
    use crate::server_store::SqliteServerStore;
    use crate::ledger::NotificationRecord;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Records sends; fails or hangs for configured addresses.
    #[derive(Default)]
    struct ScriptedGateway {
        sent: Mutex<Vec<(String, String)>>,
        failures_left: Mutex<HashMap<String, usize>>,
        hang_for: Option<String>,
        on_send: Option<Box<dyn Fn() + Send + Sync>>,
    }

    impl ScriptedGateway {
        fn failing(address: &str, times: usize) -> Self {
            let gateway = Self::default();
            gateway
                .failures_left
                .lock()
                .unwrap()
                .insert(address.to_string(), times);
            gateway
        }

        fn sent_to(&self) -> Vec<String> {
            let mut to: Vec<_> = self
                .sent
                .lock()
                .unwrap()
                .iter()
                .map(|(a, _)| a.clone())
                .collect();
            to.sort();
            to
        }
    }

    #[async_trait]
    impl DispatchGateway for ScriptedGateway {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(
            &self,
            address: &str,
            message: &NotificationMessage,
        ) -> Result<(), DispatchError> {
            if let Some(hook) = &self.on_send {
                hook();
            }
            if self.hang_for.as_deref() == Some(address) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            {
                let mut failures = self.failures_left.lock().unwrap();
                if let Some(left) = failures.get_mut(address) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(DispatchError::Transport("connection reset".to_string()));
                    }
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((address.to_string(), message.subject.clone()));
            Ok(())
        }
    }

    struct FailingPostingStore;

    impl PostingStore for FailingPostingStore {
        fn list_postings_since(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> anyhow::Result<Vec<JobPosting>> {
            anyhow::bail!("database is locked")
        }
        fn get_posting(&self, _id: &str) -> anyhow::Result<Option<JobPosting>> {
            anyhow::bail!("database is locked")
        }
        fn insert_posting(&self, _posting: &JobPosting) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
        fn set_posting_status(&self, _id: &str, _status: PostingStatus) -> anyhow::Result<bool> {
            anyhow::bail!("database is locked")
        }
    }

    /// SQLite ledger whose individual operations can be made to fail.
    struct FlakyLedger {
        inner: Arc<SqliteNotificationLedger>,
        fail_lookup: AtomicBool,
        fail_record_success: AtomicBool,
        fail_record_failure: AtomicBool,
    }

    impl FlakyLedger {
        fn new(inner: Arc<SqliteNotificationLedger>) -> Self {
            Self {
                inner,
                fail_lookup: AtomicBool::new(false),
                fail_record_success: AtomicBool::new(false),
                fail_record_failure: AtomicBool::new(false),
            }
        }

        fn heal(&self) {
            self.fail_lookup.store(false, Ordering::SeqCst);
            self.fail_record_success.store(false, Ordering::SeqCst);
            self.fail_record_failure.store(false, Ordering::SeqCst);
        }
    }

    impl NotificationLedger for FlakyLedger {
        fn has_notified(&self, subscriber_id: &str, job_id: &str) -> anyhow::Result<bool> {
            if self.fail_lookup.load(Ordering::SeqCst) {
                anyhow::bail!("disk I/O error");
            }
            self.inner.has_notified(subscriber_id, job_id)
        }

        fn record_success(
            &self,
            subscriber_id: &str,
            job_id: &str,
            timestamp: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            if self.fail_record_success.load(Ordering::SeqCst) {
                anyhow::bail!("disk I/O error");
            }
            self.inner.record_success(subscriber_id, job_id, timestamp)
        }

        fn record_failure(
            &self,
            subscriber_id: &str,
            job_id: &str,
            timestamp: DateTime<Utc>,
            reason: &str,
        ) -> anyhow::Result<()> {
            if self.fail_record_failure.load(Ordering::SeqCst) {
                anyhow::bail!("disk I/O error");
            }
            self.inner
                .record_failure(subscriber_id, job_id, timestamp, reason)
        }

        fn records_for_pair(
            &self,
            subscriber_id: &str,
            job_id: &str,
        ) -> anyhow::Result<Vec<NotificationRecord>> {
            self.inner.records_for_pair(subscriber_id, job_id)
        }

        fn success_count(&self, subscriber_id: &str, job_id: &str) -> anyhow::Result<usize> {
            self.inner.success_count(subscriber_id, job_id)
        }

        fn pending_retries(&self) -> anyhow::Result<Vec<(String, String)>> {
            self.inner.pending_retries()
        }

        fn recent_records(&self, limit: usize) -> anyhow::Result<Vec<NotificationRecord>> {
            self.inner.recent_records(limit)
        }

        fn purge_failures_before(&self, before: DateTime<Utc>) -> anyhow::Result<usize> {
            self.inner.purge_failures_before(before)
        }
    }

    struct Fixture {
        board: Arc<SqliteBoardStore>,
        ledger: Arc<SqliteNotificationLedger>,
        server: Arc<SqliteServerStore>,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                board: Arc::new(SqliteBoardStore::new(dir.path().join("board.db")).unwrap()),
                ledger: Arc::new(
                    SqliteNotificationLedger::new(dir.path().join("ledger.db")).unwrap(),
                ),
                server: Arc::new(SqliteServerStore::new(dir.path().join("server.db")).unwrap()),
                _dir: dir,
            }
        }

        fn scanner(&self, gateway: Arc<dyn DispatchGateway>) -> NewsletterScanner {
            self.scanner_with(gateway, NewsletterSettings::default())
        }

        fn scanner_with(
            &self,
            gateway: Arc<dyn DispatchGateway>,
            settings: NewsletterSettings,
        ) -> NewsletterScanner {
            NewsletterScanner::new(
                self.board.clone(),
                self.board.clone(),
                self.ledger.clone(),
                self.server.clone(),
                gateway,
                settings,
            )
        }

        fn scanner_with_ledger(
            &self,
            gateway: Arc<dyn DispatchGateway>,
            ledger: Arc<dyn NotificationLedger>,
        ) -> NewsletterScanner {
            NewsletterScanner::new(
                self.board.clone(),
                self.board.clone(),
                ledger,
                self.server.clone(),
                gateway,
                NewsletterSettings::default(),
            )
        }

        /// Places the cursor so a posting of age `age` is inside the next
        /// window only.
        fn cursor_just_before(&self, age: chrono::Duration) {
            let version = self.server.load_scan_cursor().unwrap().version;
            let at = Utc::now() - age - chrono::Duration::minutes(1);
            assert!(self.server.advance_scan_cursor(version, at).unwrap());
        }

        fn add_posting(&self, id: &str, category: &str, age: chrono::Duration) {
            self.board
                .insert_posting(&JobPosting {
                    id: id.to_string(),
                    title: format!("Posting {}", id),
                    description: "Description".to_string(),
                    category: Some(category.to_string()),
                    location: Some("Remote".to_string()),
                    job_type: Some("Full-time".to_string()),
                    company_name: Some("Acme".to_string()),
                    salary: Some(120_000),
                    status: PostingStatus::Open,
                    created_at: Utc::now() - age,
                })
                .unwrap();
        }

        fn add_subscriber(&self, id: &str, category: &str) {
            self.board
                .insert_subscriber(&Subscriber {
                    id: id.to_string(),
                    name: id.to_uppercase(),
                    email: format!("{}@example.com", id),
                    criteria: SubscriptionCriteria {
                        categories: vec![category.to_string()],
                        ..Default::default()
                    },
                    active: true,
                })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_tick_notifies_matching_pairs() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_posting("j2", "design", chrono::Duration::hours(1));
        fx.add_subscriber("u1", "eng");
        fx.add_subscriber("u2", "design");
        let gateway = Arc::new(ScriptedGateway::default());
        let scanner = fx.scanner(gateway.clone());

        let report = scanner.run_tick().await.unwrap();

        assert_eq!(report.state, ScanState::Committing);
        assert_eq!(report.cursor_before, None);
        assert_eq!(report.candidate_pairs, 4);
        assert_eq!(report.matched, 2);
        assert_eq!(report.sent, 2);
        assert_eq!(gateway.sent_to(), vec!["u1@example.com", "u2@example.com"]);
        assert!(fx.ledger.has_notified("u1", "j1").unwrap());
        assert!(!fx.ledger.has_notified("u1", "j2").unwrap());
        assert_eq!(
            fx.server.load_scan_cursor().unwrap().last_scan_at,
            Some(report.started_at)
        );
        assert_eq!(scanner.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_closed_postings_and_inactive_subscribers_are_skipped() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_posting("j2", "eng", chrono::Duration::hours(1));
        fx.board
            .set_posting_status("j2", PostingStatus::Closed)
            .unwrap();
        fx.add_subscriber("u1", "eng");
        fx.add_subscriber("u2", "eng");
        fx.board.set_subscriber_active("u2", false).unwrap();
        let gateway = Arc::new(ScriptedGateway::default());

        let report = fx.scanner(gateway.clone()).run_tick().await.unwrap();

        assert_eq!(report.candidate_pairs, 1);
        assert_eq!(report.sent, 1);
        assert!(!fx.ledger.has_notified("u1", "j2").unwrap());
        assert!(!fx.ledger.has_notified("u2", "j1").unwrap());
    }

    #[tokio::test]
    async fn test_repeated_ticks_notify_at_most_once() {
        let fx = Fixture::new();
        // Inside the grace window of every following tick
        fx.add_posting("j1", "eng", chrono::Duration::seconds(1));
        fx.add_subscriber("u1", "eng");
        let gateway = Arc::new(ScriptedGateway::default());
        let scanner = fx.scanner(gateway.clone());

        for _ in 0..3 {
            scanner.run_tick().await.unwrap();
        }
        let report = scanner.run_tick().await.unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.already_notified, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(gateway.sent_to().len(), 1);
        assert_eq!(fx.ledger.success_count("u1", "j1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_retried_next_tick() {
        let fx = Fixture::new();
        // Old enough to be outside the second tick's window
        fx.add_posting("j1", "eng", chrono::Duration::days(2));
        fx.add_subscriber("u1", "eng");
        let gateway = Arc::new(ScriptedGateway::failing("u1@example.com", 1));
        let scanner = fx.scanner(gateway.clone());

        let first = scanner.run_tick().await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(!fx.ledger.has_notified("u1", "j1").unwrap());

        let second = scanner.run_tick().await.unwrap();
        assert_eq!(second.postings_scanned, 0);
        assert_eq!(second.retry_pairs, 1);
        assert_eq!(second.sent, 1);

        let outcomes: Vec<_> = fx
            .ledger
            .records_for_pair("u1", "j1")
            .unwrap()
            .iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(outcomes, vec![DispatchOutcome::Failed, DispatchOutcome::Sent]);

        let third = scanner.run_tick().await.unwrap();
        assert_eq!(third.retry_pairs, 0);
        assert_eq!(gateway.sent_to().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_skipped_once_posting_closed() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::days(2));
        fx.add_subscriber("u1", "eng");
        let scanner = fx.scanner(Arc::new(ScriptedGateway::failing("u1@example.com", 1)));

        scanner.run_tick().await.unwrap();
        fx.board
            .set_posting_status("j1", PostingStatus::Closed)
            .unwrap();
        let report = scanner.run_tick().await.unwrap();

        assert_eq!(report.retry_pairs, 0);
        assert_eq!(report.sent, 0);
    }

    #[tokio::test]
    async fn test_interrupted_tick_recovers_without_duplicates() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("a", "eng");
        fx.add_subscriber("b", "eng");

        let hanging = Arc::new(ScriptedGateway {
            hang_for: Some("b@example.com".to_string()),
            ..Default::default()
        });
        let settings = NewsletterSettings {
            tick_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let err = fx
            .scanner_with(hanging.clone(), settings)
            .run_tick()
            .await
            .unwrap_err();
        assert!(matches!(err, TickError::Timeout(_)));
        assert_eq!(hanging.sent_to(), vec!["a@example.com"]);
        assert!(fx.ledger.has_notified("a", "j1").unwrap());
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 0);

        let healthy = Arc::new(ScriptedGateway::default());
        let report = fx.scanner(healthy.clone()).run_tick().await.unwrap();

        assert_eq!(report.already_notified, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(healthy.sent_to(), vec!["b@example.com"]);
        assert_eq!(fx.ledger.success_count("a", "j1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_without_advancing_cursor() {
        let fx = Fixture::new();
        fx.add_subscriber("u1", "eng");
        let gateway = Arc::new(ScriptedGateway::default());
        let scanner = NewsletterScanner::new(
            Arc::new(FailingPostingStore),
            fx.board.clone(),
            fx.ledger.clone(),
            fx.server.clone(),
            gateway.clone(),
            NewsletterSettings::default(),
        );

        let err = scanner.run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::StoreUnavailable(_)));
        assert!(err.to_string().contains("database is locked"));
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 0);
        assert!(gateway.sent_to().is_empty());
        assert_eq!(scanner.state(), ScanState::Idle);
        // Lease was released
        assert!(fx
            .server
            .try_acquire_lease(SCAN_LEASE_NAME, "other", chrono::Duration::minutes(1))
            .unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_rejected() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("u1", "eng");
        let scanner = fx.scanner(Arc::new(ScriptedGateway::default()));

        let (first, second) = tokio::join!(scanner.run_tick(), scanner.run_tick());

        assert!(first.is_ok());
        assert!(matches!(second, Err(TickError::AlreadyRunning)));
        assert!(scanner.run_tick().await.is_ok());
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_skips_tick() {
        let fx = Fixture::new();
        fx.server
            .try_acquire_lease(SCAN_LEASE_NAME, "other-host", chrono::Duration::minutes(5))
            .unwrap();
        let gateway = Arc::new(ScriptedGateway::default());

        let err = fx.scanner(gateway).run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::LeaseHeld));
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_concurrent_cursor_advance_is_a_conflict() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("u1", "eng");
        let server = fx.server.clone();
        let gateway = Arc::new(ScriptedGateway {
            on_send: Some(Box::new(move || {
                server.advance_scan_cursor(0, Utc::now()).unwrap();
            })),
            ..Default::default()
        });

        let err = fx.scanner(gateway).run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::CursorConflict(0)));
        // The send itself was recorded
        assert!(fx.ledger.has_notified("u1", "j1").unwrap());
    }

    #[tokio::test]
    async fn test_ledger_lookup_failure_keeps_cursor() {
        let fx = Fixture::new();
        let age = chrono::Duration::hours(1);
        fx.add_posting("j1", "eng", age);
        fx.add_subscriber("u1", "eng");
        fx.cursor_just_before(age);
        let ledger = Arc::new(FlakyLedger::new(fx.ledger.clone()));
        ledger.fail_lookup.store(true, Ordering::SeqCst);
        let gateway = Arc::new(ScriptedGateway::default());
        let scanner = fx.scanner_with_ledger(gateway.clone(), ledger.clone());

        let err = scanner.run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::Ledger(_)));
        assert!(gateway.sent_to().is_empty());
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 1);

        // Same window again: the pair is still in it
        ledger.heal();
        let report = scanner.run_tick().await.unwrap();
        assert_eq!(report.postings_scanned, 1);
        assert_eq!(report.sent, 1);
        assert!(fx.ledger.has_notified("u1", "j1").unwrap());
    }

    #[tokio::test]
    async fn test_unrecorded_dispatch_failure_keeps_cursor() {
        let fx = Fixture::new();
        let age = chrono::Duration::hours(1);
        fx.add_posting("j1", "eng", age);
        fx.add_subscriber("u1", "eng");
        fx.cursor_just_before(age);
        let ledger = Arc::new(FlakyLedger::new(fx.ledger.clone()));
        ledger.fail_record_failure.store(true, Ordering::SeqCst);
        let gateway = Arc::new(ScriptedGateway::failing("u1@example.com", 1));
        let scanner = fx.scanner_with_ledger(gateway.clone(), ledger.clone());

        let err = scanner.run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::Ledger(_)));
        assert!(fx.ledger.records_for_pair("u1", "j1").unwrap().is_empty());
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 1);
        assert_eq!(scanner.state(), ScanState::Idle);

        ledger.heal();
        let report = scanner.run_tick().await.unwrap();
        assert_eq!(report.postings_scanned, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(gateway.sent_to(), vec!["u1@example.com"]);
        assert!(fx.ledger.has_notified("u1", "j1").unwrap());
    }

    #[tokio::test]
    async fn test_recorded_failure_alongside_unrecorded_pair_still_aborts() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("a", "eng");
        fx.add_subscriber("b", "eng");
        let ledger = Arc::new(FlakyLedger::new(fx.ledger.clone()));
        ledger.fail_record_failure.store(true, Ordering::SeqCst);
        let gateway = Arc::new(ScriptedGateway::failing("b@example.com", 1));

        let err = fx
            .scanner_with_ledger(gateway.clone(), ledger)
            .run_tick()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("1 of 2 matched pairs"));
        // The successful send is kept
        assert!(fx.ledger.has_notified("a", "j1").unwrap());
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_success_is_counted_and_committed() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("u1", "eng");
        let ledger = Arc::new(FlakyLedger::new(fx.ledger.clone()));
        ledger.fail_record_success.store(true, Ordering::SeqCst);
        let gateway = Arc::new(ScriptedGateway::default());

        let report = fx
            .scanner_with_ledger(gateway.clone(), ledger)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.ledger_errors, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(gateway.sent_to(), vec!["u1@example.com"]);
        assert!(!fx.ledger.has_notified("u1", "j1").unwrap());
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_oversized_grace_window_aborts_instead_of_panicking() {
        let fx = Fixture::new();
        fx.add_posting("j1", "eng", chrono::Duration::hours(1));
        fx.add_subscriber("u1", "eng");
        let settings = NewsletterSettings {
            grace_window: Duration::from_secs(10_000_000_000_000),
            ..Default::default()
        };
        let scanner = fx.scanner_with(Arc::new(ScriptedGateway::default()), settings);

        // No cursor yet, so the grace window is not applied
        scanner.run_tick().await.unwrap();
        let err = scanner.run_tick().await.unwrap_err();

        assert!(matches!(err, TickError::Internal(_)));
        assert_eq!(fx.server.load_scan_cursor().unwrap().version, 1);
        assert_eq!(scanner.state(), ScanState::Idle);
    }
}
