//! One status check run over every configured application.
//!
//! Each application moves through
//! `Start -> TokenReady -> Fetched -> Diffed` and ends as notified, skipped or
//! failed. A failure for one application never stops the others; only a login
//! failure ends the run early.

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, error, info, warn};

use super::diff::{diff, ChangeEvent};
use super::history::{History, HistoryStore};
use crate::auth::{AuthToken, Session};
use crate::config::RetryConfig;
use crate::error::{AuthError, ConfigError, PortalError, StoreError};
use crate::notify::NotificationSink;
use crate::portal::schools::validate_applications;
use crate::portal::{Application, ApplicationIdentifier, PortalClient, StatusRecord};

/// Bounded exponential backoff for transient portal failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: StdDuration,
    pub max_backoff: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: StdDuration::from_millis(config.initial_backoff_ms),
            max_backoff: StdDuration::from_millis(config.max_backoff_ms),
        }
    }

    /// No waiting between attempts.
    #[allow(dead_code)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: StdDuration::ZERO,
            max_backoff: StdDuration::ZERO,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    ///
    /// Doubles per attempt up to `max_backoff`, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> StdDuration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + StdDuration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: StdDuration::from_millis(500),
            max_backoff: StdDuration::from_secs(8),
        }
    }
}

/// Progress of one application through a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    TokenReady,
    Fetched,
    Diffed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::TokenReady => "token_ready",
            Self::Fetched => "fetched",
            Self::Diffed => "diffed",
        };
        f.write_str(name)
    }
}

/// Terminal state of one application.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Changes were found and reported.
    Notified(ChangeEvent),
    Skipped(SkipReason),
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// First time this application was seen; its snapshot is stored as the baseline.
    Baseline,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    AuthRejectedTwice,
    InvalidIdentifier(String),
    TransientExhausted { attempts: u32, last_error: String },
    InvalidResponse(String),
    LoginFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRejectedTwice => {
                write!(f, "token rejected again after a fresh login")
            }
            Self::InvalidIdentifier(detail) => {
                write!(f, "invalid GUID, check your schools file ({})", detail)
            }
            Self::TransientExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            Self::InvalidResponse(detail) => write!(f, "unexpected portal response: {}", detail),
            Self::LoginFailed(detail) => write!(f, "not checked, login failed: {}", detail),
        }
    }
}

/// Mutable state for one run: the session and the history read at start.
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    pub session: Session,
    pub history: History,
}

impl RunContext {
    pub fn new(session: Session, history: History) -> Self {
        Self {
            started_at: Utc::now(),
            session,
            history,
        }
    }

    /// Evaluate token validity as of `started_at`.
    pub fn at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationReport {
    pub application: Application,
    pub outcome: Outcome,
}

/// Everything a run produced, including the state to persist.
#[derive(Debug)]
pub struct RunReport {
    pub applications: Vec<ApplicationReport>,
    /// History including every snapshot fetched in this run.
    pub history: History,
    pub token: Option<AuthToken>,
    pub logins: u32,
    /// Set when a login failure ended the run early.
    pub fatal: Option<AuthError>,
}

impl RunReport {
    #[allow(dead_code)]
    pub fn outcome(&self, id: &ApplicationIdentifier) -> Option<&Outcome> {
        self.applications
            .iter()
            .find(|r| &r.application.id == id)
            .map(|r| &r.outcome)
    }

    /// Write the run's history to `store`, except on a dry run.
    ///
    /// Returns whether the file was written. Applications that failed still
    /// carry their previous snapshot.
    pub fn persist(&self, store: &HistoryStore, dry_run: bool) -> Result<bool, StoreError> {
        if dry_run {
            info!("Dry run, status history not saved");
            return Ok(false);
        }
        store.save(&self.history)?;
        info!("Saved status history for {} school(s)", self.history.len());
        Ok(true)
    }

    pub fn has_failures(&self) -> bool {
        self.applications
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Failed(_)))
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            checked: self.applications.len(),
            ..Default::default()
        };
        for report in &self.applications {
            let name = report.application.name.clone();
            match &report.outcome {
                Outcome::Notified(_) => summary.changed.push(name),
                Outcome::Skipped(SkipReason::Baseline) => summary.baseline += 1,
                Outcome::Skipped(SkipReason::Unchanged) => {}
                Outcome::Failed(reason) => summary.failures.push((name, reason.to_string())),
            }
        }
        summary
    }
}

/// Counts and names for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub checked: usize,
    pub changed: Vec<String>,
    pub baseline: usize,
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    /// One-line subject for the notification.
    pub fn headline(&self) -> String {
        match self.changed.as_slice() {
            [] if self.checked > 0 && self.failures.is_empty() => format!(
                "LSAC Check Complete ({} School{} - No Changes)",
                self.checked,
                plural(self.checked)
            ),
            [] if !self.failures.is_empty() => format!(
                "LSAC Check Finished With {} Failure{}",
                self.failures.len(),
                plural(self.failures.len())
            ),
            [] => "LSAC Status Check Complete".to_string(),
            [name] => format!("LSAC Update: {}", name),
            many => format!("LSAC Updates: {} Schools Changed", many.len()),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Check every application in order and report to `sink`.
///
/// Returns an error only for configuration problems, before any portal request.
pub async fn run(
    mut ctx: RunContext,
    applications: &[Application],
    portal: &dyn PortalClient,
    sink: &mut dyn NotificationSink,
    policy: &RetryPolicy,
) -> Result<RunReport, ConfigError> {
    validate_applications(applications)?;

    info!("Checking status for {} school(s)", applications.len());

    let mut reports = Vec::with_capacity(applications.len());
    let mut fatal: Option<AuthError> = None;

    for app in applications {
        let outcome = match fatal.as_ref().map(ToString::to_string) {
            Some(detail) => {
                let reason = FailureReason::LoginFailed(detail);
                sink.application_failed(app, &reason);
                Outcome::Failed(reason)
            }
            None => match check_application(&mut ctx, app, portal, sink, policy).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Login failed, skipping remaining schools: {}", e);
                    let reason = FailureReason::LoginFailed(e.to_string());
                    sink.application_failed(app, &reason);
                    fatal = Some(e);
                    Outcome::Failed(reason)
                }
            },
        };

        reports.push(ApplicationReport {
            application: app.clone(),
            outcome,
        });
    }

    let logins = ctx.session.logins();
    let report = RunReport {
        applications: reports,
        history: ctx.history,
        token: ctx.session.into_token(),
        logins,
        fatal,
    };

    sink.run_finished(&report.summary());
    Ok(report)
}

/// Why a fetch did not produce a record.
enum FetchFailure {
    Login(AuthError),
    Failed(FailureReason),
}

impl From<AuthError> for FetchFailure {
    fn from(e: AuthError) -> Self {
        Self::Login(e)
    }
}

async fn check_application(
    ctx: &mut RunContext,
    app: &Application,
    portal: &dyn PortalClient,
    sink: &mut dyn NotificationSink,
    policy: &RetryPolicy,
) -> Result<Outcome, AuthError> {
    debug!("{}: {}", app.name, Stage::Start);
    info!("Fetching status for {}", app.name);

    let record = match fetch_with_recovery(ctx, app, portal, policy).await {
        Ok(record) => record,
        Err(FetchFailure::Login(e)) => return Err(e),
        Err(FetchFailure::Failed(reason)) => {
            warn!("Check failed for {}: {}", app.name, reason);
            sink.application_failed(app, &reason);
            return Ok(Outcome::Failed(reason));
        }
    };
    debug!("{}: {}", app.name, Stage::Fetched);

    let previous = ctx.history.get(&app.id);
    let baseline = previous.is_none();
    let event = diff(previous, &record, &app.id);
    debug!("{}: {}", app.name, Stage::Diffed);

    let outcome = if baseline {
        info!("First check for {}, recording baseline", app.name);
        sink.application_checked(app, &record, None);
        Outcome::Skipped(SkipReason::Baseline)
    } else if event.is_empty() {
        debug!("No changes for {}", app.name);
        sink.application_checked(app, &record, None);
        Outcome::Skipped(SkipReason::Unchanged)
    } else {
        info!("{} change(s) detected for {}", event.changes.len(), app.name);
        sink.application_checked(app, &record, Some(&event));
        Outcome::Notified(event)
    };

    ctx.history.record(app.id.clone(), record);
    Ok(outcome)
}

/// Fetch with a single re-login on rejection and bounded retries on transient errors.
async fn fetch_with_recovery(
    ctx: &mut RunContext,
    app: &Application,
    portal: &dyn PortalClient,
    policy: &RetryPolicy,
) -> Result<StatusRecord, FetchFailure> {
    let mut token = ctx.session.token(ctx.started_at).await?;
    debug!("{}: {}", app.name, Stage::TokenReady);

    let mut relogged = false;
    loop {
        let failure = match fetch_with_retry(portal, &app.id, &token, policy).await {
            Ok(record) => return Ok(record),
            Err(e) if e.requires_login() && !relogged => {
                relogged = true;
                token = ctx.session.relogin().await?;
                continue;
            }
            Err(PortalError::AuthRejected) => FailureReason::AuthRejectedTwice,
            Err(PortalError::InvalidIdentifier(detail)) => FailureReason::InvalidIdentifier(detail),
            Err(PortalError::Transient(last_error)) => FailureReason::TransientExhausted {
                attempts: policy.max_attempts,
                last_error,
            },
            Err(PortalError::InvalidResponse(detail)) => FailureReason::InvalidResponse(detail),
        };
        return Err(FetchFailure::Failed(failure));
    }
}

async fn fetch_with_retry(
    portal: &dyn PortalClient,
    id: &ApplicationIdentifier,
    token: &AuthToken,
    policy: &RetryPolicy,
) -> Result<StatusRecord, PortalError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match portal.fetch_status(id, token).await {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Attempt {}/{} failed: {}, retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Authenticator, Credentials, TokenCache};
    use crate::portal::models::{Applicant, ProgramStatus};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Issues `fresh-<n>` tokens and records each call.
    struct FakeLogin {
        log: CallLog,
        fail: bool,
    }

    #[async_trait]
    impl Authenticator for FakeLogin {
        async fn login(&self, _credentials: &Credentials) -> Result<AuthToken, AuthError> {
            let mut log = self.log.lock().unwrap();
            let n = log.iter().filter(|e| e.starts_with("login")).count() + 1;
            log.push(format!("login {n}"));
            if self.fail {
                return Err(AuthError::LoginFailed("bad credentials".into()));
            }
            Ok(AuthToken::fresh(format!("fresh-{n}")))
        }
    }

    /// Serves scripted results per GUID, then a default record with status "Under Review".
    struct FakePortal {
        log: CallLog,
        scripts: Mutex<HashMap<String, VecDeque<Result<StatusRecord, PortalError>>>>,
        /// Tokens the portal rejects outright.
        rejected_tokens: Vec<String>,
    }

    impl FakePortal {
        fn new(log: CallLog) -> Self {
            Self {
                log,
                scripts: Mutex::new(HashMap::new()),
                rejected_tokens: Vec::new(),
            }
        }

        fn script(self, guid: &str, results: Vec<Result<StatusRecord, PortalError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(guid.to_string(), results.into());
            self
        }

        fn reject_token(mut self, token: &str) -> Self {
            self.rejected_tokens.push(token.to_string());
            self
        }

        fn fetches(&self) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.starts_with("fetch"))
                .count()
        }
    }

    #[async_trait]
    impl PortalClient for FakePortal {
        async fn fetch_status(
            &self,
            id: &ApplicationIdentifier,
            token: &AuthToken,
        ) -> Result<StatusRecord, PortalError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("fetch {} {}", id, token.secret()));

            if self.rejected_tokens.iter().any(|t| t == token.secret()) {
                return Err(PortalError::AuthRejected);
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(id.as_str())
                .and_then(|q| q.pop_front());
            scripted.unwrap_or_else(|| Ok(status_record("Under Review")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        checked: Vec<(String, Option<ChangeEvent>)>,
        failed: Vec<(String, FailureReason)>,
        summaries: Vec<RunSummary>,
    }

    impl NotificationSink for RecordingSink {
        fn application_checked(
            &mut self,
            application: &Application,
            _record: &StatusRecord,
            changes: Option<&ChangeEvent>,
        ) {
            self.checked
                .push((application.name.clone(), changes.cloned()));
        }

        fn application_failed(&mut self, application: &Application, reason: &FailureReason) {
            self.failed.push((application.name.clone(), reason.clone()));
        }

        fn run_finished(&mut self, summary: &RunSummary) {
            self.summaries.push(summary.clone());
        }
    }

    const HARVARD: &str = "aGFydmFyZA==";
    const YALE: &str = "eWFsZQ==";

    fn app(name: &str, guid: &str) -> Application {
        Application {
            name: name.into(),
            id: ApplicationIdentifier::parse(guid).unwrap(),
        }
    }

    fn status_record(status: &str) -> StatusRecord {
        StatusRecord {
            school_id: Some("1".into()),
            applicant: Applicant::default(),
            programs: vec![ProgramStatus {
                title: "JD".into(),
                status: status.into(),
                message: None,
                checklist: Default::default(),
                letters: vec![],
                fee: None,
                scholarship: None,
            }],
            fetched_at: Utc::now(),
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        cache: TokenCache,
        log: CallLog,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let cache = TokenCache::in_dir(dir.path());
            Self {
                _dir: dir,
                cache,
                log: Arc::new(Mutex::new(Vec::new())),
                now: Utc::now(),
            }
        }

        /// Seed the cache with a token acquired `hours_ago`.
        fn cached_token(self, token: &str, hours_ago: i64) -> Self {
            self.cache
                .save(&AuthToken::new(token, self.now - Duration::hours(hours_ago)))
                .unwrap();
            self
        }

        fn context(&self, history: History, login_fails: bool) -> RunContext {
            let login = Arc::new(FakeLogin {
                log: self.log.clone(),
                fail: login_fails,
            });
            let session = Session::new(
                self.cache.clone(),
                login,
                Credentials::new("jdoe", "hunter2"),
            );
            RunContext::new(session, history).at(self.now)
        }

        fn portal(&self) -> FakePortal {
            FakePortal::new(self.log.clone())
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_recent_token_skips_login() {
        let h = Harness::new().cached_token("cached", 23);
        let portal = h.portal();
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(h.calls(), vec![format!("fetch {HARVARD} cached")]);
        assert_eq!(report.logins, 0);
        assert_eq!(report.token.unwrap().secret(), "cached");
    }

    #[tokio::test]
    async fn test_expired_token_logs_in_before_first_fetch() {
        let h = Harness::new().cached_token("stale", 25);
        let portal = h.portal();
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(
            h.calls(),
            vec![
                "login 1".to_string(),
                format!("fetch {HARVARD} fresh-1"),
                format!("fetch {YALE} fresh-1"),
            ]
        );
        assert_eq!(report.logins, 1);
        assert_eq!(h.cache.load().unwrap().secret(), "fresh-1");
    }

    #[tokio::test]
    async fn test_rejected_token_relogs_once_and_retries() {
        let h = Harness::new().cached_token("revoked", 1);
        let portal = h.portal().reject_token("revoked");
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(
            h.calls(),
            vec![
                format!("fetch {HARVARD} revoked"),
                "login 1".to_string(),
                format!("fetch {HARVARD} fresh-1"),
                format!("fetch {YALE} fresh-1"),
            ]
        );
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_rejected_twice_fails_only_that_school() {
        let h = Harness::new().cached_token("cached", 1);
        let portal = h.portal().script(
            HARVARD,
            vec![Err(PortalError::AuthRejected), Err(PortalError::AuthRejected)],
        );
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        let harvard = ApplicationIdentifier::parse(HARVARD).unwrap();
        let yale = ApplicationIdentifier::parse(YALE).unwrap();
        assert_eq!(
            report.outcome(&harvard),
            Some(&Outcome::Failed(FailureReason::AuthRejectedTwice))
        );
        assert_eq!(
            report.outcome(&yale),
            Some(&Outcome::Skipped(SkipReason::Baseline))
        );
        assert_eq!(report.logins, 1);
        assert!(report.fatal.is_none());
        assert!(report.history.get(&harvard).is_none());
        assert!(report.history.get(&yale).is_some());
        assert_eq!(sink.failed.len(), 1);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_duplicate_identifier_aborts_before_fetch() {
        let h = Harness::new().cached_token("cached", 1);
        let portal = h.portal();
        let mut sink = RecordingSink::default();

        let result = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Harvard again", HARVARD)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await;

        assert!(matches!(result, Err(ConfigError::DuplicateIdentifier { .. })));
        assert!(h.calls().is_empty());
        assert!(sink.summaries.is_empty());
    }

    #[tokio::test]
    async fn test_status_change_notifies() {
        let h = Harness::new().cached_token("cached", 1);
        let harvard = app("Harvard", HARVARD);
        let mut history = History::new();
        history.record(harvard.id.clone(), status_record("Under Review"));

        let portal = h
            .portal()
            .script(HARVARD, vec![Ok(status_record("Admitted"))]);
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(history, false),
            &[harvard.clone()],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        let event = match report.outcome(&harvard.id) {
            Some(Outcome::Notified(event)) => event.clone(),
            other => panic!("expected notification, got {other:?}"),
        };
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].to_string(), "JD: status Under Review -> Admitted");
        assert_eq!(sink.checked, vec![("Harvard".to_string(), Some(event))]);
        assert_eq!(
            report.history.get(&harvard.id).unwrap().programs[0].status,
            "Admitted"
        );
        assert_eq!(sink.summaries[0].headline(), "LSAC Update: Harvard");
    }

    #[tokio::test]
    async fn test_unchanged_and_baseline_do_not_notify() {
        let h = Harness::new().cached_token("cached", 1);
        let harvard = app("Harvard", HARVARD);
        let yale = app("Yale", YALE);
        let mut history = History::new();
        history.record(harvard.id.clone(), status_record("Under Review"));

        let portal = h.portal().script(YALE, vec![Ok(status_record("Admitted"))]);
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(history, false),
            &[harvard.clone(), yale.clone()],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(
            report.outcome(&harvard.id),
            Some(&Outcome::Skipped(SkipReason::Unchanged))
        );
        assert_eq!(
            report.outcome(&yale.id),
            Some(&Outcome::Skipped(SkipReason::Baseline))
        );
        assert!(sink.checked.iter().all(|(_, event)| event.is_none()));
        assert_eq!(report.history.len(), 2);
        assert_eq!(
            sink.summaries[0].headline(),
            "LSAC Check Complete (2 Schools - No Changes)"
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let h = Harness::new().cached_token("cached", 1);
        let portal = h.portal().script(
            HARVARD,
            vec![
                Err(PortalError::Transient("timeout".into())),
                Err(PortalError::Transient("HTTP 503".into())),
                Ok(status_record("Complete")),
            ],
        );
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(portal.fetches(), 3);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_transient_exhaustion_fails_one_school() {
        let h = Harness::new().cached_token("cached", 1);
        let portal = h.portal().script(
            HARVARD,
            vec![
                Err(PortalError::Transient("timeout".into())),
                Err(PortalError::Transient("timeout".into())),
                Err(PortalError::Transient("HTTP 502".into())),
            ],
        );
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        let harvard = ApplicationIdentifier::parse(HARVARD).unwrap();
        assert_eq!(
            report.outcome(&harvard),
            Some(&Outcome::Failed(FailureReason::TransientExhausted {
                attempts: 3,
                last_error: "HTTP 502".into(),
            }))
        );
        assert_eq!(portal.fetches(), 4);
        assert_eq!(sink.summaries[0].failures.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_not_retried() {
        let h = Harness::new().cached_token("cached", 1);
        let portal = h.portal().script(
            HARVARD,
            vec![Err(PortalError::InvalidIdentifier("HTTP 400".into()))],
        );
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert_eq!(portal.fetches(), 2);
        assert!(matches!(
            report.applications[0].outcome,
            Outcome::Failed(FailureReason::InvalidIdentifier(_))
        ));
        assert!(matches!(
            report.applications[1].outcome,
            Outcome::Skipped(_)
        ));
    }

    #[tokio::test]
    async fn test_login_failure_ends_run() {
        let h = Harness::new();
        let portal = h.portal();
        let mut sink = RecordingSink::default();

        let report = run(
            h.context(History::new(), true),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap();

        assert!(matches!(report.fatal, Some(AuthError::LoginFailed(_))));
        assert_eq!(h.calls(), vec!["login 1".to_string()]);
        assert_eq!(sink.failed.len(), 2);
        assert!(report
            .applications
            .iter()
            .all(|r| matches!(r.outcome, Outcome::Failed(FailureReason::LoginFailed(_)))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: StdDuration::from_millis(100),
            max_backoff: StdDuration::from_millis(300),
        };

        let first = policy.backoff(1);
        assert!(first >= StdDuration::from_millis(100) && first <= StdDuration::from_millis(110));
        let second = policy.backoff(2);
        assert!(second >= StdDuration::from_millis(200) && second <= StdDuration::from_millis(220));
        let capped = policy.backoff(4);
        assert!(capped >= StdDuration::from_millis(300) && capped <= StdDuration::from_millis(330));

        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::immediate(3).backoff(2), StdDuration::ZERO);
    }

    #[test]
    fn test_headlines() {
        let mut summary = RunSummary {
            checked: 3,
            ..Default::default()
        };
        assert_eq!(
            summary.headline(),
            "LSAC Check Complete (3 Schools - No Changes)"
        );

        summary.changed = vec!["Harvard".into(), "Yale".into()];
        assert_eq!(summary.headline(), "LSAC Updates: 2 Schools Changed");

        summary.changed.clear();
        summary.failures.push(("Yale".into(), "timeout".into()));
        assert_eq!(summary.headline(), "LSAC Check Finished With 1 Failure");

        assert_eq!(RunSummary::default().headline(), "LSAC Status Check Complete");
    }

    async fn run_with_saved_history(h: &Harness, store: &HistoryStore) -> RunReport {
        let portal = h
            .portal()
            .script(
                HARVARD,
                vec![Err(PortalError::InvalidIdentifier("HTTP 404".into()))],
            )
            .script(YALE, vec![Ok(status_record("Admitted"))]);
        let mut sink = RecordingSink::default();
        run(
            h.context(store.load(), false),
            &[app("Harvard", HARVARD), app("Yale", YALE)],
            &portal,
            &mut sink,
            &RetryPolicy::immediate(3),
        )
        .await
        .unwrap()
    }

    fn seed_history(store: &HistoryStore) {
        let mut history = History::new();
        history.record(
            ApplicationIdentifier::parse(HARVARD).unwrap(),
            status_record("Under Review"),
        );
        history.record(
            ApplicationIdentifier::parse(YALE).unwrap(),
            status_record("Under Review"),
        );
        store.save(&history).unwrap();
    }

    #[tokio::test]
    async fn test_persist_keeps_old_snapshot_for_failed_school() {
        let h = Harness::new().cached_token("cached", 1);
        let store = HistoryStore::in_dir(h._dir.path());
        seed_history(&store);

        let report = run_with_saved_history(&h, &store).await;

        assert!(report.has_failures());
        assert!(report.persist(&store, false).unwrap());

        let saved = store.load();
        let harvard = ApplicationIdentifier::parse(HARVARD).unwrap();
        let yale = ApplicationIdentifier::parse(YALE).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved.get(&harvard).unwrap().programs[0].status, "Under Review");
        assert_eq!(saved.get(&yale).unwrap().programs[0].status, "Admitted");
    }

    #[tokio::test]
    async fn test_dry_run_leaves_history_file_untouched() {
        let h = Harness::new().cached_token("cached", 1);
        let store = HistoryStore::in_dir(h._dir.path());
        seed_history(&store);
        let before = std::fs::read(store.path()).unwrap();

        let report = run_with_saved_history(&h, &store).await;
        assert_eq!(report.history.len(), 2);

        assert!(!report.persist(&store, true).unwrap());
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }
}
