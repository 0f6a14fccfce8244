//! The capture → recognise → log → display loop, one cycle at a time.
//!
//! [`Pipeline`] is the whole context of a running attendance session: the
//! video source, perception adapter, gallery, matcher, sampler flag, held
//! overlay and ledger. The caller drives it with [`Pipeline::cycle`]; cycles
//! never overlap because they all go through `&mut self`.

use crate::annotate::{Annotation, Annotator};
use crate::gallery::Gallery;
use crate::ledger::{AttendanceLedger, AttendanceRecord, LedgerError, LedgerStore};
use crate::matcher::{EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::perception::Perception;
use crate::sampler::{FrameSampler, DEFAULT_SCALE};
use crate::types::{Identification, MatchResult};
use chrono::NaiveDateTime;
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("video source unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    Read(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Where display frames come from.
pub trait VideoSource {
    /// Acquire the device. Called on every Idle → Running transition.
    fn open(&mut self) -> Result<(), SourceError>;
    fn read_frame(&mut self) -> Result<RgbImage, SourceError>;
    /// Release the device. Must be safe to call when not open.
    fn release(&mut self);
}

/// Where annotated frames go.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage);
}

/// Sink that drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl FrameSink for DiscardSink {
    fn present(&mut self, _frame: &RgbImage) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub match_threshold: f32,
    pub scale: f32,
    /// Redraw the last processed overlay on skipped frames.
    pub hold_overlay: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            scale: DEFAULT_SCALE,
            hold_overlay: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Pipeline not running; nothing was read.
    Idle,
    /// The source produced no frame this cycle.
    NoFrame,
    /// Frame went through perception and matching.
    Processed,
    /// Frame was only displayed.
    Skipped,
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Fresh match results (processed cycles only), boxes in working space.
    pub matches: Vec<MatchResult>,
    /// What was drawn on the display frame.
    pub annotations: Vec<Annotation>,
    /// Attendance newly persisted during this cycle.
    pub recorded: Vec<AttendanceRecord>,
    /// Ledger failures that started a failure streak during this cycle.
    /// Repeats within a streak are only logged at debug level.
    pub ledger_errors: Vec<LedgerError>,
}

impl CycleReport {
    fn empty(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            matches: Vec::new(),
            annotations: Vec::new(),
            recorded: Vec::new(),
            ledger_errors: Vec::new(),
        }
    }
}

pub struct Pipeline<V, P, S>
where
    V: VideoSource,
    P: Perception,
    S: LedgerStore,
{
    source: V,
    perception: P,
    gallery: Gallery,
    matcher: Box<dyn Matcher + Send>,
    sampler: FrameSampler,
    ledger: AttendanceLedger<S>,
    annotator: Annotator,
    sink: Box<dyn FrameSink + Send>,
    hold_overlay: bool,
    held: Vec<Annotation>,
    state: PipelineState,
    read_failures: u32,
    ledger_failing: bool,
}

impl<V, P, S> Pipeline<V, P, S>
where
    V: VideoSource,
    P: Perception,
    S: LedgerStore,
{
    pub fn new(
        source: V,
        perception: P,
        gallery: Gallery,
        ledger: AttendanceLedger<S>,
        sink: Box<dyn FrameSink + Send>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            perception,
            gallery,
            matcher: Box::new(EuclideanMatcher::new(options.match_threshold)),
            sampler: FrameSampler::new(options.scale),
            ledger,
            annotator: Annotator::default(),
            sink,
            hold_overlay: options.hold_overlay,
            held: Vec::new(),
            state: PipelineState::Idle,
            read_failures: 0,
            ledger_failing: false,
        }
    }

    /// Replace the matching strategy.
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher + Send>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &AttendanceLedger<S> {
        &self.ledger
    }

    /// Idle → Running. `Ok(false)` if already running.
    pub fn start(&mut self) -> Result<bool, PipelineError> {
        if self.state != PipelineState::Idle {
            return Ok(false);
        }

        if let Err(e) = self.source.open() {
            tracing::warn!(error = %e, "cannot start: video source failed to open");
            return Err(e.into());
        }

        self.sampler.reset();
        self.held.clear();
        self.read_failures = 0;
        self.ledger_failing = false;
        self.state = PipelineState::Running;
        tracing::info!(
            gallery = self.gallery.len(),
            date = %self.ledger.session().date(),
            "pipeline running"
        );
        Ok(true)
    }

    /// Running → Stopping → Idle. `Ok(false)` if already idle.
    ///
    /// The source is released even when the final ledger flush fails; the
    /// pipeline ends Idle either way.
    pub fn stop(&mut self) -> Result<bool, PipelineError> {
        if self.state == PipelineState::Idle {
            return Ok(false);
        }

        self.state = PipelineState::Stopping;
        self.source.release();
        self.held.clear();
        let flushed = self.ledger.flush();
        self.state = PipelineState::Idle;
        tracing::info!(recorded = self.ledger.records().len(), "pipeline stopped");

        flushed?;
        Ok(true)
    }

    /// Run one iteration of the loop. `now` stamps any attendance recorded.
    ///
    /// When `now` falls on a new date the ledger session rolls over first,
    /// even if no one is recognised this cycle.
    pub fn cycle(&mut self, now: NaiveDateTime) -> CycleReport {
        if self.state != PipelineState::Running {
            return CycleReport::empty(CycleOutcome::Idle);
        }

        let mut rollover_errors = Vec::new();
        match self.ledger.roll_to(now.date()) {
            Ok(true) => self.ledger_recovered(),
            Ok(false) => {}
            Err(e) => self.ledger_failed(e, None, &mut rollover_errors),
        }

        let mut report = self.read_and_present(now);
        rollover_errors.append(&mut report.ledger_errors);
        report.ledger_errors = rollover_errors;
        report
    }

    fn read_and_present(&mut self, now: NaiveDateTime) -> CycleReport {
        let mut frame = match self.source.read_frame() {
            Ok(frame) => {
                self.read_failures = 0;
                frame
            }
            Err(e) => {
                if self.read_failures == 0 {
                    tracing::warn!(error = %e, "no frame from video source");
                } else {
                    tracing::debug!(error = %e, failures = self.read_failures + 1, "no frame from video source");
                }
                self.read_failures = self.read_failures.saturating_add(1);
                return CycleReport::empty(CycleOutcome::NoFrame);
            }
        };

        let mut report = if self.sampler.should_process() {
            self.process(&frame, now)
        } else {
            let mut report = CycleReport::empty(CycleOutcome::Skipped);
            if self.hold_overlay {
                report.annotations = self.held.clone();
            }
            report
        };

        self.annotator.annotate(&mut frame, &report.annotations);
        self.sink.present(&frame);

        if report.outcome == CycleOutcome::Processed {
            self.held = std::mem::take(&mut report.annotations);
            report.annotations = self.held.clone();
        }
        report
    }

    fn process(&mut self, frame: &RgbImage, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport::empty(CycleOutcome::Processed);
        let working = self.sampler.downscale(frame);

        let faces = match self.perception.detect_and_encode(&working) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(error = %e, "perception failed, treating frame as empty");
                Vec::new()
            }
        };

        for face in &faces {
            let result = self.matcher.compare(face, &self.gallery);
            tracing::debug!(
                label = result.identification.label(),
                distance = result.distance,
                "face matched"
            );

            if let Identification::Known(name) = &result.identification {
                match self.ledger.record(name, now) {
                    Ok(true) => {
                        self.ledger_recovered();
                        if let Some(record) = self.ledger.records().last() {
                            report.recorded.push(record.clone());
                        }
                    }
                    Ok(false) => {}
                    Err(e) => self.ledger_failed(e, Some(name), &mut report.ledger_errors),
                }
            }

            let display_box = self.sampler.upscale_box(&result.face.bbox);
            report.annotations.push(Annotation::from_match(&result, display_box));
            report.matches.push(result);
        }

        report
    }

    /// Only the first failure of a streak is logged as an error and reported.
    fn ledger_failed(&mut self, error: LedgerError, name: Option<&str>, reported: &mut Vec<LedgerError>) {
        if self.ledger_failing {
            tracing::debug!(name = name.unwrap_or("-"), error = %error, "attendance ledger still failing");
            return;
        }
        tracing::error!(name = name.unwrap_or("-"), error = %error, "failed to record attendance");
        self.ledger_failing = true;
        reported.push(error);
    }

    fn ledger_recovered(&mut self) {
        if self.ledger_failing {
            tracing::info!("attendance ledger writable again");
            self.ledger_failing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{KNOWN_COLOR, UNKNOWN_COLOR};
    use crate::ledger::{CsvLedgerStore, FailingStore};
    use crate::perception::PerceptionError;
    use crate::types::{BoundingBox, DetectedFace, Embedding, Identity};
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeSource {
        fail_open: bool,
        fail_reads: bool,
        opens: usize,
        releases: usize,
    }

    impl FakeSource {
        fn working() -> Self {
            Self {
                fail_open: false,
                fail_reads: false,
                opens: 0,
                releases: 0,
            }
        }
    }

    impl VideoSource for FakeSource {
        fn open(&mut self) -> Result<(), SourceError> {
            if self.fail_open {
                return Err(SourceError::Unavailable("no such device".into()));
            }
            self.opens += 1;
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
            if self.fail_reads {
                return Err(SourceError::Read("timeout".into()));
            }
            Ok(RgbImage::new(64, 64))
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    /// Pops one scripted answer per call; empty once the script runs out.
    struct ScriptedPerception {
        script: VecDeque<Result<Vec<DetectedFace>, String>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedPerception {
        fn new(script: Vec<Result<Vec<DetectedFace>, String>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: script.into(),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl Perception for ScriptedPerception {
        fn detect_and_encode(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, PerceptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(Ok(faces)) => Ok(faces),
                Some(Err(e)) => Err(PerceptionError::Other(e)),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct CapturingSink {
        frames: Arc<Mutex<Vec<RgbImage>>>,
    }

    impl FrameSink for CapturingSink {
        fn present(&mut self, frame: &RgbImage) {
            self.frames.lock().unwrap().push(frame.clone());
        }
    }

    #[derive(Clone, Default)]
    struct CountingStore {
        appends: Arc<AtomicUsize>,
        flushes: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    impl LedgerStore for CountingStore {
        fn load(&mut self, _date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
            Ok(Vec::new())
        }

        fn append(&mut self, _date: NaiveDate, _record: &AttendanceRecord) -> Result<(), LedgerError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("read-only filesystem".into()));
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), LedgerError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn at_second(s: u32) -> NaiveDateTime {
        day().and_hms_opt(9, 0, s).unwrap()
    }

    /// Face in working space (16×16 for a 64×64 frame at 0.25).
    fn face(values: &[f32]) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 2.0,
                y: 2.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.95,
                landmarks: None,
            },
            encoding: Embedding::new(values.to_vec()),
        }
    }

    fn gallery_ab() -> Gallery {
        Gallery::from_identities(vec![
            Identity {
                name: "A".into(),
                reference: Embedding::new(vec![0.0, 0.0]),
            },
            Identity {
                name: "B".into(),
                reference: Embedding::new(vec![1.0, 0.0]),
            },
        ])
    }

    fn pipeline<S: LedgerStore>(
        source: FakeSource,
        perception: ScriptedPerception,
        store: S,
        sink: CapturingSink,
    ) -> Pipeline<FakeSource, ScriptedPerception, S> {
        let ledger = AttendanceLedger::open(store, day()).unwrap();
        Pipeline::new(source, perception, gallery_ab(), ledger, Box::new(sink), PipelineOptions::default())
    }

    #[test]
    fn test_end_to_end_records_once_and_annotates() {
        let dir = tempfile::tempdir().unwrap();
        let (perception, calls) = ScriptedPerception::new(vec![
            Ok(vec![face(&[0.1, 0.0])]),  // cycle 1: A
            Ok(vec![face(&[0.0, 5.0])]),  // cycle 3: far from everyone
            Ok(vec![face(&[0.05, 0.0])]), // cycle 5: A again
        ]);
        let sink = CapturingSink::default();
        let store = CsvLedgerStore::new(dir.path()).unwrap();
        let mut pipeline = pipeline(FakeSource::working(), perception, store, sink.clone());

        assert!(pipeline.start().unwrap());
        let reports: Vec<CycleReport> = (1..=5).map(|i| pipeline.cycle(at_second(i))).collect();

        let outcomes: Vec<CycleOutcome> = reports.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                CycleOutcome::Processed,
                CycleOutcome::Skipped,
                CycleOutcome::Processed,
                CycleOutcome::Skipped,
                CycleOutcome::Processed,
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Exactly one record, for A, stamped at cycle 1.
        let records = pipeline.ledger().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "A");
        assert_eq!(records[0].timestamp, at_second(1));
        assert_eq!(reports[0].recorded.len(), 1);
        assert!(reports[4].recorded.is_empty());

        let label = |r: &CycleReport| r.annotations[0].identification.clone();
        assert_eq!(label(&reports[0]), Identification::Known("A".into()));
        assert_eq!(label(&reports[2]), Identification::Unknown);
        assert_eq!(label(&reports[4]), Identification::Known("A".into()));
        // Skipped cycles show the previous processed overlay.
        assert_eq!(label(&reports[1]), Identification::Known("A".into()));
        assert_eq!(label(&reports[3]), Identification::Unknown);

        // Display boxes are upscaled: working x=2 → display x=8.
        assert_eq!(reports[0].annotations[0].bbox.x, 8.0);
        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(*frames[0].get_pixel(20, 8), KNOWN_COLOR);
        assert_eq!(*frames[2].get_pixel(20, 8), UNKNOWN_COLOR);
        assert_eq!(*frames[4].get_pixel(20, 8), KNOWN_COLOR);

        // Persisted file agrees.
        let text = std::fs::read_to_string(dir.path().join("01-03-2024.csv")).unwrap();
        assert_eq!(text, "Name,Time\nA,09:00:01\n");
    }

    #[test]
    fn test_skipped_cycles_never_touch_perception_or_ledger() {
        let (perception, calls) = ScriptedPerception::new(vec![
            Ok(vec![face(&[0.0, 0.0])]),
            Ok(vec![face(&[1.0, 0.0])]),
        ]);
        let store = CountingStore::default();
        let appends = store.appends.clone();
        let mut pipeline = pipeline(FakeSource::working(), perception, store, CapturingSink::default());
        pipeline.start().unwrap();

        let mut perceived = Vec::new();
        for i in 1..=4 {
            pipeline.cycle(at_second(i));
            perceived.push((calls.load(Ordering::SeqCst), appends.load(Ordering::SeqCst)));
        }
        // Counters only move on cycles 1 and 3.
        assert_eq!(perceived, vec![(1, 1), (1, 1), (2, 2), (2, 2)]);
    }

    #[test]
    fn test_hold_overlay_disabled_shows_nothing_on_skipped_cycles() {
        let (perception, _) = ScriptedPerception::new(vec![Ok(vec![face(&[0.0, 0.0])])]);
        let sink = CapturingSink::default();
        let ledger = AttendanceLedger::open(CountingStore::default(), day()).unwrap();
        let options = PipelineOptions {
            hold_overlay: false,
            ..PipelineOptions::default()
        };
        let mut pipeline = Pipeline::new(
            FakeSource::working(),
            perception,
            gallery_ab(),
            ledger,
            Box::new(sink.clone()),
            options,
        );
        pipeline.start().unwrap();

        assert_eq!(pipeline.cycle(at_second(1)).annotations.len(), 1);
        assert!(pipeline.cycle(at_second(2)).annotations.is_empty());
        let frames = sink.frames.lock().unwrap();
        assert_eq!(*frames[1].get_pixel(20, 8), image::Rgb([0, 0, 0]));
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (perception, _) = ScriptedPerception::new(vec![]);
        let mut pipeline = pipeline(FakeSource::working(), perception, CountingStore::default(), CapturingSink::default());

        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.stop().unwrap());
        assert!(pipeline.start().unwrap());
        assert!(!pipeline.start().unwrap());
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert_eq!(pipeline.source.opens, 1);

        assert!(pipeline.stop().unwrap());
        assert!(!pipeline.stop().unwrap());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.source.releases, 1);
        assert_eq!(pipeline.cycle(at_second(1)).outcome, CycleOutcome::Idle);
    }

    #[test]
    fn test_source_failure_at_start_stays_idle() {
        let source = FakeSource {
            fail_open: true,
            ..FakeSource::working()
        };
        let (perception, calls) = ScriptedPerception::new(vec![]);
        let mut pipeline = pipeline(source, perception, CountingStore::default(), CapturingSink::default());

        let err = pipeline.start().unwrap_err();
        assert!(matches!(err, PipelineError::Source(SourceError::Unavailable(_))));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.cycle(at_second(1)).outcome, CycleOutcome::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_read_failure_is_no_frame() {
        let source = FakeSource {
            fail_reads: true,
            ..FakeSource::working()
        };
        let (perception, calls) = ScriptedPerception::new(vec![]);
        let sink = CapturingSink::default();
        let mut pipeline = pipeline(source, perception, CountingStore::default(), sink.clone());
        pipeline.start().unwrap();

        for i in 0..3 {
            assert_eq!(pipeline.cycle(at_second(i)).outcome, CycleOutcome::NoFrame);
        }
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restart_processes_first_frame() {
        let (perception, calls) = ScriptedPerception::new(vec![]);
        let mut pipeline = pipeline(FakeSource::working(), perception, CountingStore::default(), CapturingSink::default());
        pipeline.start().unwrap();
        pipeline.cycle(at_second(1)); // processed, next would be skipped
        pipeline.stop().unwrap();
        pipeline.start().unwrap();
        assert_eq!(pipeline.cycle(at_second(2)).outcome, CycleOutcome::Processed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_perception_error_counts_as_no_faces() {
        let (perception, _) = ScriptedPerception::new(vec![Err("tensor shape".into())]);
        let mut pipeline = pipeline(FakeSource::working(), perception, CountingStore::default(), CapturingSink::default());
        pipeline.start().unwrap();

        let report = pipeline.cycle(at_second(1));
        assert_eq!(report.outcome, CycleOutcome::Processed);
        assert!(report.matches.is_empty());
        assert_eq!(pipeline.state(), PipelineState::Running);
    }

    #[test]
    fn test_ledger_failure_is_reported_once_per_streak_and_retried() {
        let (perception, _) = ScriptedPerception::new(vec![
            Ok(vec![face(&[0.0, 0.0])]), // cycle 1: A, store failing
            Ok(vec![face(&[0.0, 0.0])]), // cycle 3: A again, still failing
            Ok(vec![face(&[0.0, 0.0])]), // cycle 5: A, store back
            Ok(vec![face(&[1.0, 0.0])]), // cycle 7: B, failing again
        ]);
        let store = CountingStore::default();
        let (appends, failing) = (store.appends.clone(), store.failing.clone());
        failing.store(true, Ordering::SeqCst);
        let mut pipeline = pipeline(FakeSource::working(), perception, store, CapturingSink::default());
        pipeline.start().unwrap();

        let first = pipeline.cycle(at_second(1));
        assert_eq!(first.ledger_errors.len(), 1);
        assert!(first.recorded.is_empty());
        // Still annotated as A even though logging failed.
        assert_eq!(first.annotations[0].identification, Identification::Known("A".into()));

        pipeline.cycle(at_second(2));
        let retry = pipeline.cycle(at_second(3));
        assert!(retry.ledger_errors.is_empty());
        assert_eq!(appends.load(Ordering::SeqCst), 2);
        assert!(pipeline.ledger().records().is_empty());

        failing.store(false, Ordering::SeqCst);
        pipeline.cycle(at_second(4));
        let recovered = pipeline.cycle(at_second(5));
        assert_eq!(recovered.recorded.len(), 1);
        assert_eq!(pipeline.ledger().records()[0].timestamp, at_second(5));

        // A fresh streak is reported again.
        failing.store(true, Ordering::SeqCst);
        pipeline.cycle(at_second(6));
        let again = pipeline.cycle(at_second(7));
        assert_eq!(again.ledger_errors.len(), 1);
    }

    #[test]
    fn test_ledger_failures_within_one_cycle_reported_once() {
        let (perception, _) = ScriptedPerception::new(vec![Ok(vec![face(&[0.0, 0.0]), face(&[1.0, 0.0])])]);
        let mut pipeline = pipeline(FakeSource::working(), perception, FailingStore, CapturingSink::default());
        pipeline.start().unwrap();

        let report = pipeline.cycle(at_second(1));
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.ledger_errors.len(), 1);
    }

    #[test]
    fn test_stop_flushes_ledger_once() {
        let (perception, _) = ScriptedPerception::new(vec![]);
        let store = CountingStore::default();
        let flushes = store.flushes.clone();
        let mut pipeline = pipeline(FakeSource::working(), perception, store, CapturingSink::default());

        assert!(!pipeline.stop().unwrap());
        assert_eq!(flushes.load(Ordering::SeqCst), 0);

        pipeline.start().unwrap();
        pipeline.cycle(at_second(1));
        assert!(pipeline.stop().unwrap());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        assert!(!pipeline.stop().unwrap());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cycle_rolls_session_over_at_midnight() {
        let (perception, _) = ScriptedPerception::new(vec![Ok(vec![face(&[0.0, 0.0])])]);
        let store = CountingStore::default();
        let flushes = store.flushes.clone();
        let mut pipeline = pipeline(FakeSource::working(), perception, store, CapturingSink::default());
        pipeline.start().unwrap();

        pipeline.cycle(at_second(1));
        assert_eq!(pipeline.ledger().records().len(), 1);

        // Nobody in view after midnight; the session still moves on.
        let tomorrow = day().succ_opt().unwrap();
        let report = pipeline.cycle(tomorrow.and_hms_opt(0, 0, 1).unwrap());
        assert!(report.ledger_errors.is_empty());
        assert_eq!(pipeline.ledger().session().date(), tomorrow);
        assert!(pipeline.ledger().records().is_empty());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);

        pipeline.cycle(tomorrow.and_hms_opt(0, 0, 2).unwrap());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_faces_are_never_logged() {
        let (perception, _) = ScriptedPerception::new(vec![Ok(vec![face(&[9.0, 9.0]), face(&[0.0, 0.0])])]);
        let store = CountingStore::default();
        let appends = store.appends.clone();
        let mut pipeline = pipeline(FakeSource::working(), perception, store, CapturingSink::default());
        pipeline.start().unwrap();

        let report = pipeline.cycle(at_second(1));
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.matches[0].identification, Identification::Unknown);
        assert_eq!(appends.load(Ordering::SeqCst), 1);
        assert_eq!(report.recorded[0].name, "A");
    }
}
