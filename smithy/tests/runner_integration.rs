use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use smithy::logging::{KEY_COMPONENT_TYPE, KEY_PANIC_STACK_TRACE, KEY_STEP};
use smithy::store::SqliteStore;
use smithy::{
    ComponentError, Enricher, Filter, Finding, InstanceId, PanicHandler, QueryOpts, Reporter,
    RunContext, RunnerOptions, Scanner, StoreError, StoreParams, StoreType, Storer, Target,
    VulnerabilityFinding, run_enricher, run_filter, run_reporter, run_scanner, run_target,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

fn finding(uid: &str) -> Finding {
    Finding::new(json!({"finding_info": {"uid": uid, "title": format!("issue {uid}")}}))
}

fn uids(findings: &[VulnerabilityFinding]) -> Vec<String> {
    let mut out: Vec<_> = findings
        .iter()
        .filter_map(|f| f.finding.uid().map(String::from))
        .collect();
    out.sort();
    out
}

#[derive(Debug, Clone, Default)]
struct Counters {
    writes: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Counters {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// File-backed sqlite store that counts the calls the runner makes.
struct CountingStore {
    inner: SqliteStore,
    counters: Counters,
    fail_close: bool,
}

#[async_trait]
impl Storer for CountingStore {
    fn validate(&self, finding: &Finding) -> Result<(), StoreError> {
        self.inner.validate(finding)
    }

    async fn read(
        &self,
        instance_id: InstanceId,
        opts: Option<QueryOpts>,
    ) -> Result<Vec<VulnerabilityFinding>, StoreError> {
        self.inner.read(instance_id, opts).await
    }

    async fn write(&self, instance_id: InstanceId, findings: &[Finding]) -> Result<(), StoreError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(instance_id, findings).await
    }

    async fn update(
        &self,
        instance_id: InstanceId,
        findings: &[VulnerabilityFinding],
    ) -> Result<(), StoreError> {
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(instance_id, findings).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.fail_close {
            return Err(StoreError::Service {
                status: 500,
                body: "close failed".into(),
            });
        }
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    db: PathBuf,
    instance: InstanceId,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("smithy.db");
        Self {
            _dir: dir,
            db,
            instance: InstanceId::new(),
        }
    }

    fn options(&self) -> RunnerOptions {
        self.options_with_env(HashMap::new())
    }

    fn options_with_env(&self, env: HashMap<String, String>) -> RunnerOptions {
        RunnerOptions::with_env(env)
            .component_name("test-component")
            .instance_id(self.instance)
            .store_params(StoreParams {
                sqlite_path: self.db.clone(),
                ..StoreParams::default()
            })
    }

    async fn counting(&self, fail_close: bool) -> (CountingStore, Counters) {
        let counters = Counters::default();
        let store = CountingStore {
            inner: SqliteStore::open(&self.db).await.unwrap(),
            counters: counters.clone(),
            fail_close,
        };
        (store, counters)
    }

    async fn seed(&self, findings: &[Finding]) {
        let store = SqliteStore::open(&self.db).await.unwrap();
        store.write(self.instance, findings).await.unwrap();
        store.close().await.unwrap();
    }

    async fn stored(&self) -> Vec<VulnerabilityFinding> {
        let store = SqliteStore::open(&self.db).await.unwrap();
        let found = match store.read(self.instance, None).await {
            Ok(found) => found,
            Err(err) if err.is_no_findings() => Vec::new(),
            Err(err) => panic!("unexpected read error: {err}"),
        };
        store.close().await.unwrap();
        found
    }
}

struct StaticScanner(Vec<Finding>);

#[async_trait]
impl Scanner for StaticScanner {
    async fn transform(&self, _ctx: &RunContext) -> anyhow::Result<Vec<Finding>> {
        Ok(self.0.clone())
    }
}

struct FailingScanner;

#[async_trait]
impl Scanner for FailingScanner {
    async fn transform(&self, _ctx: &RunContext) -> anyhow::Result<Vec<Finding>> {
        Err(anyhow::anyhow!("exit status 2").context("gosec failed"))
    }
}

struct PanickingScanner;

#[async_trait]
impl Scanner for PanickingScanner {
    async fn transform(&self, _ctx: &RunContext) -> anyhow::Result<Vec<Finding>> {
        panic!("scanner blew up");
    }
}

struct SleepyScanner(Duration);

#[async_trait]
impl Scanner for SleepyScanner {
    async fn transform(&self, _ctx: &RunContext) -> anyhow::Result<Vec<Finding>> {
        tokio::time::sleep(self.0).await;
        Ok(vec![finding("late")])
    }
}

#[derive(Default)]
struct MetadataScanner {
    seen: Mutex<Option<Value>>,
}

#[async_trait]
impl Scanner for MetadataScanner {
    async fn transform(&self, ctx: &RunContext) -> anyhow::Result<Vec<Finding>> {
        *self.seen.lock().unwrap() = ctx.target_metadata().cloned();
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CapturingReporter {
    calls: AtomicUsize,
    seen: Mutex<Vec<VulnerabilityFinding>>,
}

#[async_trait]
impl Reporter for CapturingReporter {
    async fn report(&self, _ctx: &RunContext, findings: &[VulnerabilityFinding]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().extend_from_slice(findings);
        Ok(())
    }
}

struct FailingReporter;

#[async_trait]
impl Reporter for FailingReporter {
    async fn report(&self, _ctx: &RunContext, _findings: &[VulnerabilityFinding]) -> anyhow::Result<()> {
        anyhow::bail!("sink unreachable")
    }
}

/// Marks every finding and appends one derived finding.
struct GrowingEnricher;

#[async_trait]
impl Enricher for GrowingEnricher {
    async fn annotate(
        &self,
        _ctx: &RunContext,
        mut findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Vec<VulnerabilityFinding>> {
        for vf in &mut findings {
            vf.finding.as_value_mut()["enriched"] = json!(true);
        }
        findings.push(VulnerabilityFinding::unsaved(finding("derived")));
        Ok(findings)
    }
}

/// Rewrites ids so the update targets findings that do not exist.
struct GhostEnricher;

#[async_trait]
impl Enricher for GhostEnricher {
    async fn annotate(
        &self,
        _ctx: &RunContext,
        findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Vec<VulnerabilityFinding>> {
        Ok(findings
            .into_iter()
            .map(|vf| VulnerabilityFinding::new(vf.id.unwrap_or_default() + 1_000, vf.finding))
            .collect())
    }
}

/// Replaces every finding body with something the store must reject.
struct CorruptingEnricher;

#[async_trait]
impl Enricher for CorruptingEnricher {
    async fn annotate(
        &self,
        _ctx: &RunContext,
        mut findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Vec<VulnerabilityFinding>> {
        for vf in &mut findings {
            *vf.finding.as_value_mut() = json!(42);
        }
        Ok(findings)
    }
}

/// Keeps findings whose uid is listed, marking them as kept.
struct AllowListFilter(Vec<&'static str>);

#[async_trait]
impl Filter for AllowListFilter {
    async fn filter(
        &self,
        _ctx: &RunContext,
        findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Option<Vec<VulnerabilityFinding>>> {
        let total = findings.len();
        let mut kept: Vec<_> = findings
            .into_iter()
            .filter(|vf| {
                vf.finding
                    .uid()
                    .is_some_and(|uid| self.0.iter().any(|allowed| *allowed == uid))
            })
            .collect();
        if kept.len() == total {
            return Ok(None);
        }
        for vf in &mut kept {
            vf.finding.as_value_mut()["kept"] = json!(true);
        }
        Ok(Some(kept))
    }
}

struct FailingFilter;

#[async_trait]
impl Filter for FailingFilter {
    async fn filter(
        &self,
        _ctx: &RunContext,
        _findings: Vec<VulnerabilityFinding>,
    ) -> anyhow::Result<Option<Vec<VulnerabilityFinding>>> {
        anyhow::bail!("policy file missing")
    }
}

struct RecordingTarget {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl Target for RecordingTarget {
    async fn prepare(&self, ctx: &RunContext) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(ctx.store().is_none());
        if self.fail {
            anyhow::bail!("git clone failed");
        }
        Ok(())
    }
}

/// Recovers every panic without surfacing an error.
#[derive(Debug)]
struct SwallowingHandler;

impl PanicHandler for SwallowingHandler {
    fn handle_panic(
        &self,
        _ctx: &RunContext,
        _payload: Option<Box<dyn std::any::Any + Send>>,
    ) -> (Option<anyhow::Error>, bool) {
        (None, false)
    }
}

/// Turns panics into recoverable errors.
#[derive(Debug)]
struct RecoveringHandler;

impl PanicHandler for RecoveringHandler {
    fn handle_panic(
        &self,
        _ctx: &RunContext,
        payload: Option<Box<dyn std::any::Any + Send>>,
    ) -> (Option<anyhow::Error>, bool) {
        let err = payload.and_then(smithy::panic::payload_to_error);
        (err, false)
    }
}

#[tokio::test]
async fn scanner_with_empty_output_writes_nothing() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    run_scanner(&StaticScanner(vec![]), h.options().storer(store))
        .await
        .unwrap();

    assert_eq!(counters.writes(), 0);
    assert_eq!(counters.closes(), 1);
    assert!(h.stored().await.is_empty());
}

#[tokio::test]
async fn scanner_invalid_finding_aborts_before_any_write() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;
    let bad = Finding::new(json!({"finding_info": {"uid": "b", "title": ""}}));
    let scanner = StaticScanner(vec![finding("a"), bad, finding("c")]);

    let err = run_scanner(&scanner, h.options().storer(store)).await.unwrap_err();

    assert!(matches!(err, ComponentError::InvalidFinding(_)));
    assert_eq!(counters.writes(), 0);
    assert_eq!(counters.closes(), 1);
    assert!(h.stored().await.is_empty());
}

#[tokio::test]
async fn scanner_transform_failure_is_wrapped() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    let err = run_scanner(&FailingScanner, h.options().storer(store))
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::ScanTransformFailed(_)));
    assert!(err.to_string().contains("gosec failed: exit status 2"));
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn scanner_then_reporter_round_trip() {
    let h = Harness::new();
    let batch = vec![finding("a"), finding("b"), finding("a")];

    run_scanner(&StaticScanner(batch), h.options()).await.unwrap();

    let reporter = CapturingReporter::default();
    run_reporter(&reporter, h.options()).await.unwrap();

    let seen = reporter.seen.lock().unwrap().clone();
    assert_eq!(reporter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(uids(&seen), vec!["a", "a", "b"]);
    assert_eq!(seen, h.stored().await);
}

#[tokio::test]
async fn reporter_receives_seeded_findings() {
    let h = Harness::new();
    h.seed(&[finding("one"), finding("two")]).await;
    let (store, counters) = h.counting(false).await;

    let reporter = CapturingReporter::default();
    run_reporter(&reporter, h.options().storer(store)).await.unwrap();

    let seen = reporter.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|f| f.id.is_some()));
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn reporter_skips_when_store_is_empty() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    let reporter = CapturingReporter::default();
    run_reporter(&reporter, h.options().storer(store)).await.unwrap();

    assert_eq!(reporter.calls.load(Ordering::SeqCst), 0);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn reporter_runs_with_empty_list_when_flag_is_set() {
    let h = Harness::new();

    let reporter = CapturingReporter::default();
    run_reporter(&reporter, h.options().run_reporters_without_findings(true))
        .await
        .unwrap();

    assert_eq!(reporter.calls.load(Ordering::SeqCst), 1);
    assert!(reporter.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reporter_flag_is_read_from_env() {
    let h = Harness::new();
    let env = HashMap::from([(
        "SMITHY_RUN_REPORTERS_WITHOUT_FINDINGS".to_string(),
        "true".to_string(),
    )]);

    let reporter = CapturingReporter::default();
    run_reporter(&reporter, h.options_with_env(env)).await.unwrap();

    assert_eq!(reporter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reporter_failure_is_wrapped() {
    let h = Harness::new();
    h.seed(&[finding("one")]).await;

    let err = run_reporter(&FailingReporter, h.options()).await.unwrap_err();

    assert!(matches!(err, ComponentError::ReportFailed(_)));
    assert_eq!(err.step(), "report");
}

#[tokio::test]
async fn enricher_can_grow_the_finding_set() {
    let h = Harness::new();
    h.seed(&[finding("a"), finding("b")]).await;
    let before = h.stored().await;
    let (store, counters) = h.counting(false).await;

    run_enricher(&GrowingEnricher, h.options().storer(store)).await.unwrap();

    let after = h.stored().await;
    assert_eq!(counters.updates(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(uids(&after), vec!["a", "b", "derived"]);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[1].id, before[1].id);
    assert_eq!(after[0].finding.get("enriched"), Some(&json!(true)));
}

#[tokio::test]
async fn enricher_treats_empty_store_as_read_failure() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    let err = run_enricher(&GrowingEnricher, h.options().storer(store))
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::StoreReadFailed(StoreError::NoFindingsFound)));
    assert_eq!(counters.updates(), 0);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn enricher_update_of_unknown_ids_changes_nothing() {
    let h = Harness::new();
    h.seed(&[finding("a")]).await;
    let before = h.stored().await;

    let err = run_enricher(&GhostEnricher, h.options()).await.unwrap_err();

    assert!(matches!(
        err,
        ComponentError::StoreUpdateFailed(StoreError::FindingNotFound(_))
    ));
    assert_eq!(h.stored().await, before);
}

#[tokio::test]
async fn enricher_output_is_validated_before_update() {
    let h = Harness::new();
    h.seed(&[finding("a")]).await;
    let before = h.stored().await;

    let err = run_enricher(&CorruptingEnricher, h.options()).await.unwrap_err();

    assert!(matches!(
        err,
        ComponentError::StoreUpdateFailed(StoreError::InvalidFinding { .. })
    ));
    assert_eq!(h.stored().await, before);
}

#[tokio::test]
async fn filter_without_changes_skips_update() {
    let h = Harness::new();
    h.seed(&[finding("a"), finding("b")]).await;
    let before = h.stored().await;
    let (store, counters) = h.counting(false).await;

    run_filter(&AllowListFilter(vec!["a", "b"]), h.options().storer(store))
        .await
        .unwrap();

    assert_eq!(counters.updates(), 0);
    assert_eq!(counters.closes(), 1);
    assert_eq!(h.stored().await, before);
}

#[tokio::test]
async fn filter_updates_kept_findings() {
    let h = Harness::new();
    h.seed(&[finding("a"), finding("b")]).await;
    let (store, counters) = h.counting(false).await;

    run_filter(&AllowListFilter(vec!["a"]), h.options().storer(store))
        .await
        .unwrap();

    let after = h.stored().await;
    assert_eq!(counters.updates(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(after[0].finding.uid(), Some("a"));
    assert_eq!(after[0].finding.get("kept"), Some(&json!(true)));
    assert_eq!(after[1].finding.get("kept"), None);
}

#[tokio::test]
async fn filter_failure_is_wrapped() {
    let h = Harness::new();
    h.seed(&[finding("a")]).await;
    let (store, counters) = h.counting(false).await;

    let err = run_filter(&FailingFilter, h.options().storer(store))
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::FilterFailed(_)));
    assert_eq!(err.step(), "filter");
    assert_eq!(counters.updates(), 0);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn filter_treats_empty_store_as_read_failure() {
    let h = Harness::new();

    let err = run_filter(&AllowListFilter(vec![]), h.options())
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::StoreReadFailed(StoreError::NoFindingsFound)));
}

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn records(&self) -> Vec<Value> {
        let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn panic_is_logged_with_stack_trace() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(smithy::logging::layer(logs.clone()));
    let _default = tracing::subscriber::set_default(subscriber);
    let h = Harness::new();

    let err = run_scanner(&PanickingScanner, h.options()).await.unwrap_err();
    assert!(err.is_fatal());

    let records = logs.records();
    let panic_record = records
        .iter()
        .find(|r| r.get(KEY_PANIC_STACK_TRACE).is_some())
        .expect("panic handler should log a stack trace");
    let trace = panic_record[KEY_PANIC_STACK_TRACE].as_str().unwrap();
    assert!(trace.contains("scanner blew up"));
    assert_eq!(panic_record["level"], "ERROR");
    assert_eq!(panic_record[KEY_COMPONENT_TYPE], "scanner");

    let last = records.last().unwrap();
    assert_eq!(last[KEY_STEP], "panic");
    assert_eq!(last["fatal"], true);
}

#[tokio::test]
async fn panic_in_component_is_fatal_and_store_still_closes() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    let err = run_scanner(&PanickingScanner, h.options().storer(store))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("scanner blew up"));
    assert_eq!(counters.writes(), 0);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn non_fatal_handler_surfaces_recovered_error() {
    let h = Harness::new();

    let err = run_scanner(&PanickingScanner, h.options().panic_handler(RecoveringHandler))
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::PanicRecovered(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn handler_without_error_turns_panic_into_success() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    run_scanner(
        &PanickingScanner,
        h.options().panic_handler(SwallowingHandler).storer(store),
    )
    .await
    .unwrap();

    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn close_failure_never_replaces_the_result() {
    let h = Harness::new();
    let (store, counters) = h.counting(true).await;

    run_scanner(&StaticScanner(vec![finding("a")]), h.options().storer(store))
        .await
        .unwrap();

    assert_eq!(counters.writes(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(h.stored().await.len(), 1);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_step() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = run_scanner(
        &SleepyScanner(Duration::from_secs(30)),
        h.options().storer(store).cancellation_token(token),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ComponentError::Cancelled));
    assert_eq!(counters.writes(), 0);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn run_timeout_aborts_hung_component() {
    let h = Harness::new();
    let (store, counters) = h.counting(false).await;

    let err = run_scanner(
        &SleepyScanner(Duration::from_secs(30)),
        h.options().storer(store).timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.step(), "cancelled");
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn target_runs_without_opening_a_store() {
    let h = Harness::new();
    let target = RecordingTarget {
        fail: false,
        calls: AtomicUsize::new(0),
    };

    // a postgres store without a DSN would fail to open
    run_target(&target, h.options().store_type(StoreType::Postgresql))
        .await
        .unwrap();

    assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    assert!(!h.db.exists());
}

#[tokio::test]
async fn target_failure_is_wrapped() {
    let h = Harness::new();
    let target = RecordingTarget {
        fail: true,
        calls: AtomicUsize::new(0),
    };

    let err = run_target(&target, h.options()).await.unwrap_err();

    assert!(matches!(err, ComponentError::TargetPrepareFailed(_)));
    assert!(err.to_string().contains("git clone failed"));
}

#[tokio::test]
async fn missing_component_name_fails_before_component_runs() {
    let env = HashMap::from([(
        "SMITHY_INSTANCE_ID".to_string(),
        InstanceId::new().to_string(),
    )]);
    let scanner = MetadataScanner::default();

    let err = run_scanner(&scanner, RunnerOptions::with_env(env)).await.unwrap_err();

    assert!(matches!(err, ComponentError::ConfigInvalid(_)));
}

#[tokio::test]
async fn unopenable_store_fails_before_component_runs() {
    let h = Harness::new();
    let blocker = h.db.clone();
    std::fs::create_dir_all(&blocker).unwrap();

    let err = run_reporter(&CapturingReporter::default(), h.options())
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::StoreOpenFailed(_)));
}

#[tokio::test]
async fn scanner_sees_target_metadata() {
    let h = Harness::new();
    let meta_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        meta_dir.path().join("target.json"),
        r#"{"repository":"https://github.com/smithy-security/smithy"}"#,
    )
    .unwrap();
    let env = HashMap::from([(
        "SMITHY_TARGET_METADATA_PATH".to_string(),
        meta_dir.path().display().to_string(),
    )]);

    let scanner = MetadataScanner::default();
    run_scanner(&scanner, h.options_with_env(env)).await.unwrap();

    let seen = scanner.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen["repository"], "https://github.com/smithy-security/smithy");
}

#[tokio::test]
async fn unreadable_target_metadata_is_a_config_error() {
    let h = Harness::new();
    let env = HashMap::from([(
        "SMITHY_TARGET_METADATA_PATH".to_string(),
        "/definitely/not/here/target.json".to_string(),
    )]);

    let err = run_scanner(&MetadataScanner::default(), h.options_with_env(env))
        .await
        .unwrap_err();

    assert!(matches!(err, ComponentError::ConfigInvalid(_)));
}
