use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysdump::collector::{CollectionContext, CollectorError, ConsentDecision, DryRunCollector, DryRunService};
use sysdump::validate::{validate_archive, ValidationProfile};
use sysdump::{
    BugreportMode, ErrorKind, EventSink, OperationState, Outcome, ReportCollector, ReportEvent,
    ReportRequest, RequestCoordinator, WaitOutcome,
};
use tempfile::{tempdir, tempfile};

const WAIT: Duration = Duration::from_secs(10);

fn request(mode: i32) -> ReportRequest {
    ReportRequest::new(2000, "com.dummy.package", tempfile().unwrap(), tempfile().unwrap(), mode)
}

fn small_dry_run(consent: ConsentDecision) -> DryRunCollector {
    DryRunCollector::new(consent)
        .with_services(vec![
            DryRunService::new("CRITICAL cpuinfo", 4),
            DryRunService::new("HIGH meminfo", 4),
            DryRunService::new("wifi", 4),
        ])
        .with_consent_timeout(Duration::from_millis(50))
}

/// Holds every collection until the test says how it ends.
struct GatedCollector {
    entered: Sender<()>,
    release: Mutex<Receiver<Result<(), CollectorError>>>,
}

fn gated() -> (GatedCollector, Receiver<()>, Sender<Result<(), CollectorError>>) {
    let (entered_tx, entered_rx) = bounded(4);
    let (release_tx, release_rx) = bounded(4);
    let collector = GatedCollector { entered: entered_tx, release: Mutex::new(release_rx) };
    (collector, entered_rx, release_tx)
}

impl ReportCollector for GatedCollector {
    fn collect(&self, ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError> {
        ctx.report_progress(5);
        self.entered.send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap()
    }
}

struct PanickingCollector;

impl ReportCollector for PanickingCollector {
    fn collect(&self, _ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError> {
        panic!("collector blew up");
    }
}

/// Sends duplicate, regressing and out-of-range progress before succeeding.
struct ChattyCollector;

impl ReportCollector for ChattyCollector {
    fn collect(&self, ctx: &mut CollectionContext<'_>) -> Result<(), CollectorError> {
        ctx.report_progress(50);
        ctx.report_progress(30);
        ctx.report_progress(250);
        Ok(())
    }
}

#[test]
fn test_second_start_is_rejected_without_touching_the_first() {
    let (collector, entered, release) = gated();
    let coord = RequestCoordinator::new(collector);

    let first = Arc::new(EventSink::new("first"));
    let first_id = coord.start(request(BugreportMode::Interactive.raw()), Arc::clone(&first)).unwrap();
    entered.recv_timeout(WAIT).unwrap();

    let second = Arc::new(EventSink::new("second"));
    let err = coord.start(request(BugreportMode::Default.raw()), Arc::clone(&second)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AnotherReportInProgress);
    assert_eq!(
        second.wait_until_terminal(Duration::ZERO),
        WaitOutcome::Failed(ErrorKind::AnotherReportInProgress),
    );

    // Still running, still the same service.
    assert_eq!(coord.state(), OperationState::Running);
    assert_eq!(coord.lookup_service().unwrap().operation, first_id);
    assert!(!first.is_terminal());
    assert_eq!(first.latest_progress(), Some(5));

    release.send(Err(CollectorError::ConsentDenied)).unwrap();
    assert_eq!(first.wait_until_terminal(WAIT), WaitOutcome::Failed(ErrorKind::ConsentDenied));
    assert!(coord.wait_idle(WAIT));
    assert!(coord.lookup_service().is_none());
}

#[test]
fn test_invalid_mode_is_rejected_synchronously() {
    let (collector, entered, _release) = gated();
    let coord = RequestCoordinator::new(collector);
    let sink = Arc::new(EventSink::default());

    let err = coord.start(request(2000), Arc::clone(&sink)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
    assert_eq!(sink.error_kind(), Some(ErrorKind::InvalidInput));
    assert_eq!(coord.state(), OperationState::Idle);
    assert!(coord.lookup_service().is_none());
    assert!(entered.try_recv().is_err());
}

#[test]
fn test_coordinator_is_reusable_after_each_outcome() {
    let (collector, entered, release) = gated();
    let coord = RequestCoordinator::new(collector);

    let endings = [
        (Ok(()), Outcome::Finished),
        (Err(CollectorError::ConsentDenied), Outcome::Failed(ErrorKind::ConsentDenied)),
        (Err(CollectorError::ConsentTimeout(Duration::from_secs(60))), Outcome::Failed(ErrorKind::ConsentTimeout)),
        (Err(CollectorError::Other("disk full".into())), Outcome::Failed(ErrorKind::Unknown)),
    ];
    for (i, (ending, expected)) in endings.into_iter().enumerate() {
        let sink = Arc::new(EventSink::default());
        coord.start(request(BugreportMode::Full.raw()), Arc::clone(&sink)).unwrap();
        entered.recv_timeout(WAIT).unwrap();
        release.send(ending).unwrap();

        sink.wait_until_terminal(WAIT);
        assert_eq!(sink.outcome(), Some(expected));
        assert!(coord.wait_idle(WAIT));
        assert_eq!(coord.completed_operations(), i as u64 + 1);
        assert_eq!(coord.last_record().unwrap().outcome, expected);
    }
}

#[test]
fn test_events_arrive_progress_first_then_one_terminal() {
    let coord = RequestCoordinator::new(ChattyCollector);
    let sink = Arc::new(EventSink::default());
    let events = sink.subscribe();

    coord.start(request(BugreportMode::Wifi.raw()), Arc::clone(&sink)).unwrap();
    assert_eq!(sink.wait_until_terminal(WAIT), WaitOutcome::Finished);
    assert!(coord.wait_idle(WAIT));

    let seen: Vec<ReportEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            ReportEvent::Progress(50),
            ReportEvent::Progress(30),
            ReportEvent::Progress(100),
            ReportEvent::Finished,
        ]
    );
    assert_eq!(sink.protocol_violations(), 0);
}

#[test]
fn test_late_terminal_signal_is_counted_not_applied() {
    let coord = RequestCoordinator::new(ChattyCollector);
    let sink = Arc::new(EventSink::default());
    let events = sink.subscribe();

    coord.start(request(BugreportMode::Remote.raw()), Arc::clone(&sink)).unwrap();
    assert_eq!(sink.wait_until_terminal(WAIT), WaitOutcome::Finished);
    assert!(coord.wait_idle(WAIT));

    // A straggling collaborator reports again after the operation ended.
    sink.on_error(ErrorKind::ConsentTimeout);
    sink.on_progress(80);

    assert_eq!(sink.outcome(), Some(Outcome::Finished));
    assert_eq!(sink.protocol_violations(), 1);
    assert_eq!(sink.latest_progress(), Some(100));
    let terminals = events.try_iter().filter(ReportEvent::is_terminal).count();
    assert_eq!(terminals, 1);
    assert_eq!(coord.last_record().unwrap().outcome, Outcome::Finished);
}

#[test]
fn test_panicking_collector_reports_unknown() {
    let coord = RequestCoordinator::new(PanickingCollector);
    let sink = Arc::new(EventSink::default());
    let outcome = coord
        .start_and_wait(request(BugreportMode::Telephony.raw()), Arc::clone(&sink), WAIT)
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Failed(ErrorKind::Unknown));
    assert!(coord.wait_idle(WAIT));
    assert!(coord.lookup_service().is_none());
}

#[test]
fn test_dry_run_consent_outcomes() {
    for (consent, expected) in [
        (ConsentDecision::Denied, ErrorKind::ConsentDenied),
        (ConsentDecision::NoResponse, ErrorKind::ConsentTimeout),
    ] {
        let coord = RequestCoordinator::new(small_dry_run(consent));
        let sink = Arc::new(EventSink::default());
        let outcome = coord.start_and_wait(request(BugreportMode::Default.raw()), Arc::clone(&sink), WAIT).unwrap();
        assert_eq!(outcome, WaitOutcome::Failed(expected));
        assert!(coord.wait_idle(WAIT));
    }
}

#[test]
fn test_dry_run_produces_a_valid_archive() {
    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("tmp.zip");
    let png_path = dir.path().join("tmp.png");

    let coord = RequestCoordinator::new(small_dry_run(ConsentDecision::Granted));
    let sink = Arc::new(EventSink::new("Smokey"));
    let req = ReportRequest::with_mode(
        2000,
        "com.dummy.package",
        File::create(&zip_path).unwrap(),
        File::create(&png_path).unwrap(),
        BugreportMode::Interactive,
    );
    coord.start(req, Arc::clone(&sink)).unwrap();
    assert_eq!(coord.wait_for(&sink), WaitOutcome::Finished);
    assert_eq!(sink.latest_progress(), Some(100));
    assert!(coord.wait_idle(WAIT));

    let profile = ValidationProfile {
        min_critical: 1,
        min_high: 1,
        min_normal: 1,
        ..ValidationProfile::default()
    }
    .with_expected_version("2.0");
    let report = validate_archive(&zip_path, &profile, None).unwrap();
    assert!(report.passed(), "{:#?}", report.failures().collect::<Vec<_>>());
    assert!(report.main_entry.starts_with("bugreport-com.dummy.package-"));
    assert_eq!(report.sections.len(), 3);
    assert!(std::fs::metadata(&png_path).unwrap().len() > 0);
}
