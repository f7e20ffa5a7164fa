use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::models::config::{RecordingConfig, SessionOptions};
use crate::models::diagnostics::StreamDiagnostics;
use crate::models::error::CaptureError;
use crate::models::recording_result::{RecordingMeta, RecordingResult};
use crate::models::segment::Segment;
use crate::models::state::SessionState;
use crate::models::stream_kind::StreamKind;
use crate::models::target::CaptureTarget;
use crate::storage::inspect;
use crate::storage::layout;
use crate::storage::metadata;
use crate::storage::segment_writer::SegmentWriter;
use crate::stream::capture_stream::{CaptureStream, FinishOutcome};
use crate::stream::sink::SharedWriter;
use crate::traits::capability_provider::{find_target, CapabilityProvider};
use crate::traits::capture_session::CaptureSession;
use crate::traits::capture_source::SourceFactory;
use crate::traits::claim_registry::ClaimRegistry;
use crate::traits::session_delegate::SessionDelegate;

/// What a started session captures. Fixed for the session's lifetime.
struct ActiveRecording {
    config: RecordingConfig,
    target: CaptureTarget,
    kinds: Vec<StreamKind>,
    epoch: Instant,
}

/// Internal mutable session state, protected by `parking_lot::Mutex`.
struct SessionInner {
    state: SessionState,
    recording: Option<ActiveRecording>,
    segments: Vec<Segment>,
    retired_streams: Vec<StreamDiagnostics>,
    result: Option<RecordingResult>,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            recording: None,
            segments: Vec::new(),
            retired_streams: Vec::new(),
            result: None,
        }
    }
}

/// The recording session controller.
///
/// Owns the state machine, the capture streams and the sequence of sealed
/// segments, and is the only component that opens segments or tears down
/// streams. Generic over the platform's target listing and source
/// acquisition:
///
/// ```text
/// [CapabilityProvider] → resolve target → [ClaimRegistry] claim
///                                              ↓
/// [SourceFactory] → CaptureStream × N → ChunkSink → [SegmentWriter] → segment-<i>/
/// ```
///
/// Lifecycle operations take `&self` and are serialized: a call that
/// overlaps another fails with `OperationInProgress`. Every wait on a stream
/// is bounded by `SessionOptions`, so `stop` and `cancel` always return.
///
/// A session is single-use; `Stopped` and `Cancelled` are terminal.
pub struct RecordingSession<P: CapabilityProvider, F: SourceFactory> {
    id: String,
    provider: P,
    factory: F,
    claims: Arc<dyn ClaimRegistry>,
    options: SessionOptions,
    delegate: Option<Arc<dyn SessionDelegate>>,

    // Held for the duration of one lifecycle operation.
    lifecycle: Mutex<()>,
    inner: Mutex<SessionInner>,

    // Open segment, shared with every stream's sink.
    writer: SharedWriter,
    streams: Mutex<Vec<CaptureStream>>,
}

impl<P: CapabilityProvider, F: SourceFactory> RecordingSession<P, F> {
    pub fn new(provider: P, factory: F, claims: Arc<dyn ClaimRegistry>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider,
            factory,
            claims,
            options: SessionOptions::default(),
            delegate: None,
            lifecycle: Mutex::new(()),
            inner: Mutex::new(SessionInner::new()),
            writer: Arc::new(Mutex::new(None)),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Sealed segments so far, in index order. Empty after `cancel`.
    pub fn segments(&self) -> Vec<Segment> {
        self.inner.lock().segments.clone()
    }

    /// Root directory of the current recording, once started.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .recording
            .as_ref()
            .map(|r| r.config.output_path.clone())
    }

    /// Final result, available after `stop`.
    pub fn result(&self) -> Option<RecordingResult> {
        self.inner.lock().result.clone()
    }

    /// Sealed segment durations plus the open segment's elapsed time.
    pub fn duration_secs(&self) -> f64 {
        let sealed: f64 = self.inner.lock().segments.iter().map(Segment::duration_secs).sum();
        let open = self.writer.lock().as_ref().map_or(0.0, SegmentWriter::elapsed_secs);
        sealed + open
    }

    /// Per-stream counters for live streams, or for the streams of the
    /// finished recording.
    pub fn diagnostics(&self) -> Vec<StreamDiagnostics> {
        let live: Vec<StreamDiagnostics> = self.streams.lock().iter().map(CaptureStream::diagnostics).collect();
        if live.is_empty() {
            self.inner.lock().retired_streams.clone()
        } else {
            live
        }
    }

    /// Validate `config`, resolve and claim the target and the output root,
    /// acquire streams and open segment 0. Transitions: idle → recording.
    ///
    /// An output root that already holds segments is rejected with
    /// `InvalidConfig`; every recording starts from `segment-0`.
    ///
    /// On any failure every partially acquired resource is released and the
    /// session stays idle.
    pub fn start(&self, config: RecordingConfig) -> Result<(), CaptureError> {
        let _op = self.begin()?;
        self.expect_state("start", SessionState::is_idle)?;

        config.validate().map_err(CaptureError::InvalidConfig)?;
        let target_ref = config.target().map_err(CaptureError::InvalidConfig)?;

        if !self.provider.has_permission() {
            return Err(CaptureError::PermissionDenied);
        }

        let target = find_target(&self.provider, target_ref).ok_or(CaptureError::TargetNotFound(target_ref))?;

        self.claims.claim(target_ref, &self.id)?;
        if let Err(e) = self.claims.claim_output(&config.output_path, &self.id) {
            self.claims.release(target_ref, &self.id);
            return Err(e);
        }

        let mut kinds = vec![StreamKind::video_for(target.kind)];
        if config.capture_system_audio {
            kinds.push(StreamKind::SystemAudio);
        }

        let launched = ensure_fresh_root(&config.output_path).and_then(|()| self.launch(&config, &target, &kinds));
        let epoch = match launched {
            Ok(epoch) => epoch,
            Err(e) => {
                self.claims.release_output(&config.output_path, &self.id);
                self.claims.release(target_ref, &self.id);
                return Err(e);
            }
        };

        log::info!(
            "Session {} recording {} ({:?}) into {}",
            self.id,
            target_ref,
            kinds,
            config.output_path.display()
        );

        self.inner.lock().recording = Some(ActiveRecording {
            config,
            target,
            kinds,
            epoch,
        });
        self.set_state(SessionState::Recording);
        Ok(())
    }

    /// Seal the open segment and suspend streams.
    /// Transitions: recording → paused.
    pub fn pause(&self) -> Result<(), CaptureError> {
        let _op = self.begin()?;
        self.expect_state("pause", SessionState::is_recording)?;

        for stream in self.streams.lock().iter_mut() {
            stream.suspend();
        }
        self.seal_open_segment();

        self.set_state(SessionState::Paused);
        Ok(())
    }

    /// Open the next segment and reactivate streams.
    /// Transitions: paused → recording.
    ///
    /// If the segment cannot be created the session stays paused.
    pub fn resume(&self) -> Result<(), CaptureError> {
        let _op = self.begin()?;
        self.expect_state("resume", SessionState::is_paused)?;

        let (root, kinds, epoch, index) = {
            let inner = self.inner.lock();
            let recording = inner.recording.as_ref().ok_or_else(missing_recording)?;
            (
                recording.config.output_path.clone(),
                recording.kinds.clone(),
                recording.epoch,
                inner.segments.len() as u32,
            )
        };

        let writer = SegmentWriter::open(&root, index, &kinds, epoch)?;
        *self.writer.lock() = Some(writer);

        for stream in self.streams.lock().iter_mut() {
            if let Err(e) = stream.activate(self.options.start_timeout) {
                log::warn!("Failed to reactivate {} stream: {}", stream.kind(), e);
                self.notify_stream_error(stream.kind(), &e);
            }
        }

        self.set_state(SessionState::Recording);
        Ok(())
    }

    /// Drain every stream (bounded by `stop_timeout`), seal the final
    /// segment, release the target and write `recording-meta.json`.
    /// Transitions: recording/paused → stopping → stopped.
    ///
    /// Returns the recording root. If a stream had to be force-terminated the
    /// session still stops, and the error is `PartialStop`.
    pub fn stop(&self) -> Result<PathBuf, CaptureError> {
        let _op = self.begin()?;
        self.expect_state("stop", SessionState::is_active)?;
        self.set_state(SessionState::Stopping);

        let forced = self.shutdown_streams(self.options.stop_timeout, false);
        self.seal_open_segment();

        let result = {
            let mut inner = self.inner.lock();
            let recording = inner.recording.as_ref().ok_or_else(missing_recording)?;
            let metadata = RecordingMeta::new(
                &self.id,
                &recording.config,
                &recording.target,
                &inner.segments,
                &forced,
            );
            let result = RecordingResult {
                output_path: recording.config.output_path.clone(),
                duration_secs: metadata.duration_secs,
                segments: inner.segments.clone(),
                forced_streams: forced.clone(),
                metadata,
            };
            inner.result = Some(result.clone());
            result
        };

        self.release_claims();

        if let Err(e) = metadata::write_metadata(&result.metadata, &result.output_path) {
            log::warn!("Failed to write recording metadata: {}", e);
        }

        self.set_state(SessionState::Stopped);
        log::info!(
            "Session {} stopped: {} segment(s), {:.3}s",
            self.id,
            result.segments.len(),
            result.duration_secs
        );

        if let Some(ref delegate) = self.delegate {
            delegate.on_recording_finished(&result);
        }

        if forced.is_empty() {
            Ok(result.output_path)
        } else {
            Err(CaptureError::PartialStop {
                path: result.output_path,
                forced,
            })
        }
    }

    /// Shut down every stream (bounded by `cancel_timeout`) and discard the
    /// recording's output. Transitions: recording/paused → cancelling → cancelled.
    pub fn cancel(&self) -> Result<(), CaptureError> {
        let _op = self.begin()?;
        self.expect_state("cancel", SessionState::is_active)?;
        self.set_state(SessionState::Cancelling);

        let forced = self.shutdown_streams(self.options.cancel_timeout, true);
        if let Some(writer) = self.writer.lock().take() {
            writer.seal();
        }

        let root = {
            let mut inner = self.inner.lock();
            inner.segments.clear();
            inner.recording.as_ref().map(|r| r.config.output_path.clone())
        };
        if let Some(root) = root {
            discard_output(&root);
        }

        self.release_claims();
        self.set_state(SessionState::Cancelled);
        log::info!("Session {} cancelled", self.id);

        if forced.is_empty() {
            Ok(())
        } else {
            Err(CaptureError::PartialCancel { forced })
        }
    }

    // --- Internal helpers ---

    fn begin(&self) -> Result<MutexGuard<'_, ()>, CaptureError> {
        self.lifecycle.try_lock().ok_or(CaptureError::OperationInProgress)
    }

    fn expect_state(&self, operation: &'static str, allowed: fn(&SessionState) -> bool) -> Result<(), CaptureError> {
        let state = self.state();
        if allowed(&state) {
            Ok(())
        } else {
            Err(CaptureError::invalid_state(operation, state))
        }
    }

    fn set_state(&self, new_state: SessionState) {
        self.inner.lock().state = new_state;
        log::debug!("Session {} → {}", self.id, new_state);
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(new_state);
        }
    }

    /// Acquire and start one stream per kind with segment 0 open.
    /// Returns the session epoch.
    fn launch(
        &self,
        config: &RecordingConfig,
        target: &CaptureTarget,
        kinds: &[StreamKind],
    ) -> Result<Instant, CaptureError> {
        let mut streams = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let acquired = self
                .factory
                .acquire(kind, target, config.frame_rate)
                .map_err(|e| CaptureError::CaptureStartFailed(format!("failed to acquire {} stream: {}", kind, e)))
                .and_then(|source| CaptureStream::spawn(kind, source, Arc::clone(&self.writer), self.delegate.clone()));

            match acquired {
                Ok(stream) => streams.push(stream),
                Err(e) => {
                    abort_all(&mut streams);
                    return Err(e);
                }
            }
        }

        let epoch = Instant::now();
        let writer = match SegmentWriter::open(&config.output_path, 0, kinds, epoch) {
            Ok(writer) => writer,
            Err(e) => {
                abort_all(&mut streams);
                return Err(e);
            }
        };
        *self.writer.lock() = Some(writer);

        let timeout = self.options.start_timeout;
        if let Err(e) = streams.iter_mut().try_for_each(|stream| stream.activate(timeout)) {
            abort_all(&mut streams);
            if let Some(writer) = self.writer.lock().take() {
                writer.seal();
            }
            discard_output(&config.output_path);
            return Err(e);
        }

        *self.streams.lock() = streams;
        Ok(epoch)
    }

    /// Finish all streams against one shared deadline. Returns the kinds that
    /// had to be force-terminated.
    fn shutdown_streams(&self, timeout: std::time::Duration, discard: bool) -> Vec<StreamKind> {
        let mut streams = std::mem::take(&mut *self.streams.lock());
        let deadline = Instant::now() + timeout;

        for stream in streams.iter_mut() {
            if discard {
                stream.close_output();
            }
            stream.request_finish();
        }

        let mut forced = Vec::new();
        for stream in streams.iter_mut() {
            match stream.await_finish(deadline) {
                FinishOutcome::Drained => {}
                FinishOutcome::Failed(e) => self.notify_stream_error(stream.kind(), &e),
                FinishOutcome::ForceTerminated => forced.push(stream.kind()),
            }
        }

        self.inner.lock().retired_streams = streams.iter().map(CaptureStream::diagnostics).collect();
        forced
    }

    fn seal_open_segment(&self) {
        let Some(writer) = self.writer.lock().take() else {
            return;
        };
        let segment = writer.seal();
        if let Some(ref delegate) = self.delegate {
            delegate.on_segment_sealed(&segment);
        }
        self.inner.lock().segments.push(segment);
    }

    fn release_claims(&self) {
        let claimed = self
            .inner
            .lock()
            .recording
            .as_ref()
            .map(|r| (r.target.target_ref(), r.config.output_path.clone()));
        if let Some((target, root)) = claimed {
            self.claims.release_output(&root, &self.id);
            self.claims.release(target, &self.id);
        }
    }

    fn notify_stream_error(&self, kind: StreamKind, error: &CaptureError) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_stream_error(kind, error);
        }
    }
}

impl<P: CapabilityProvider, F: SourceFactory> Drop for RecordingSession<P, F> {
    fn drop(&mut self) {
        if !self.inner.get_mut().state.is_active() {
            return;
        }
        log::warn!("Session {} dropped while active, aborting streams", self.id);
        for stream in self.streams.get_mut().iter_mut() {
            stream.abort();
        }
        if let Some(writer) = self.writer.lock().take() {
            writer.seal();
        }
        self.release_claims();
    }
}

impl<P: CapabilityProvider, F: SourceFactory> CaptureSession for RecordingSession<P, F> {
    fn state(&self) -> SessionState {
        RecordingSession::state(self)
    }

    fn start(&self, config: RecordingConfig) -> Result<(), CaptureError> {
        RecordingSession::start(self, config)
    }

    fn pause(&self) -> Result<(), CaptureError> {
        RecordingSession::pause(self)
    }

    fn resume(&self) -> Result<(), CaptureError> {
        RecordingSession::resume(self)
    }

    fn stop(&self) -> Result<PathBuf, CaptureError> {
        RecordingSession::stop(self)
    }

    fn cancel(&self) -> Result<(), CaptureError> {
        RecordingSession::cancel(self)
    }

    fn segments(&self) -> Vec<Segment> {
        RecordingSession::segments(self)
    }
}

fn missing_recording() -> CaptureError {
    CaptureError::Unknown("active session has no recording configuration".into())
}

/// Refuse to mix a new recording into one that already lives at `root`.
fn ensure_fresh_root(root: &Path) -> Result<(), CaptureError> {
    let existing = inspect::inspect_recording(root)?;
    if let Some(last) = existing.last() {
        return Err(CaptureError::InvalidConfig(format!(
            "{} already holds a recording ({} segment(s), up to segment-{})",
            root.display(),
            existing.len(),
            last.index
        )));
    }
    Ok(())
}

fn abort_all(streams: &mut Vec<CaptureStream>) {
    for stream in streams.iter_mut() {
        stream.abort();
    }
    streams.clear();
}

/// Best-effort removal of everything a session wrote under `root`. The root
/// itself is only removed when nothing else lives there.
fn discard_output(root: &Path) {
    let content = layout::content_dir(root);
    if content.exists() {
        if let Err(e) = fs::remove_dir_all(&content) {
            log::warn!("Failed to remove {}: {}", content.display(), e);
        }
    }
    if let Err(e) = metadata::remove_metadata(root) {
        log::warn!("{}", e);
    }
    if fs::remove_dir(root).is_err() {
        log::debug!("Left non-empty output root {}", root.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::{TargetKind, TargetRef};
    use crate::session::claims::InMemoryClaimRegistry;
    use crate::stream::sink::{ChunkSink, MediaChunk};
    use crate::traits::capture_source::CaptureSource;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    // --- Fakes ---

    struct FakeProvider {
        permitted: bool,
        displays: Vec<CaptureTarget>,
        windows: Vec<CaptureTarget>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                permitted: true,
                displays: vec![CaptureTarget::display(1, "Built-in Display", 60)],
                windows: vec![CaptureTarget::window(77, "README.md", "Editor")],
            }
        }
    }

    impl CapabilityProvider for FakeProvider {
        fn has_permission(&self) -> bool {
            self.permitted
        }

        fn list_displays(&self) -> Vec<CaptureTarget> {
            self.displays.clone()
        }

        fn list_windows(&self) -> Vec<CaptureTarget> {
            self.windows.clone()
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Normal,
        FailStart,
        SlowStart(Duration),
        HangOnStop(Duration),
    }

    #[derive(Default)]
    struct Ledger {
        acquired: AtomicUsize,
        started: AtomicUsize,
        stopped: AtomicUsize,
        aborted: AtomicUsize,
    }

    impl Ledger {
        /// Sources acquired but neither stopped nor aborted.
        fn leaked(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
                - self.stopped.load(Ordering::SeqCst)
                - self.aborted.load(Ordering::SeqCst)
        }
    }

    struct FakeSource {
        kind: StreamKind,
        behavior: Behavior,
        ledger: Arc<Ledger>,
        sink: Option<ChunkSink>,
        released: bool,
    }

    impl FakeSource {
        fn emit(&self, label: &str) {
            if let Some(sink) = &self.sink {
                sink.push(MediaChunk::new(Duration::ZERO, format!("{}:{};", self.kind, label).into_bytes()));
            }
        }
    }

    impl CaptureSource for FakeSource {
        fn start(&mut self, sink: ChunkSink) -> Result<(), CaptureError> {
            self.ledger.started.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::FailStart => return Err(CaptureError::Unknown("device busy".into())),
                Behavior::SlowStart(delay) => thread::sleep(delay),
                _ => {}
            }
            self.sink = Some(sink);
            self.emit("start");
            Ok(())
        }

        fn resume(&mut self) -> Result<(), CaptureError> {
            self.emit("resume");
            Ok(())
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            if let Behavior::HangOnStop(delay) = self.behavior {
                thread::sleep(delay);
            }
            self.emit("stop");
            self.released = true;
            self.ledger.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) {
            if !self.released {
                self.released = true;
                self.ledger.aborted.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct FakeFactory {
        ledger: Arc<Ledger>,
        behaviors: Vec<(StreamKind, Behavior)>,
        refuse: Option<StreamKind>,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                ledger: Arc::new(Ledger::default()),
                behaviors: Vec::new(),
                refuse: None,
            }
        }

        fn with(mut self, kind: StreamKind, behavior: Behavior) -> Self {
            self.behaviors.push((kind, behavior));
            self
        }
    }

    impl SourceFactory for FakeFactory {
        fn acquire(
            &self,
            kind: StreamKind,
            _target: &CaptureTarget,
            _frame_rate: u32,
        ) -> Result<Box<dyn CaptureSource>, CaptureError> {
            if self.refuse == Some(kind) {
                return Err(CaptureError::Unknown("no such device".into()));
            }
            self.ledger.acquired.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .behaviors
                .iter()
                .find(|(k, _)| *k == kind)
                .map_or(Behavior::Normal, |(_, b)| *b);
            Ok(Box::new(FakeSource {
                kind,
                behavior,
                ledger: Arc::clone(&self.ledger),
                sink: None,
                released: false,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<SessionState>>,
        sealed: Mutex<Vec<u32>>,
        stream_errors: Mutex<Vec<StreamKind>>,
        finished: AtomicUsize,
    }

    impl SessionDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: SessionState) {
            self.states.lock().push(state);
        }

        fn on_segment_sealed(&self, segment: &Segment) {
            self.sealed.lock().push(segment.index);
        }

        fn on_stream_error(&self, kind: StreamKind, _error: &CaptureError) {
            self.stream_errors.lock().push(kind);
        }

        fn on_recording_finished(&self, _result: &RecordingResult) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    type TestSession = RecordingSession<FakeProvider, FakeFactory>;

    fn session_with(factory: FakeFactory) -> (TestSession, Arc<Ledger>) {
        let ledger = Arc::clone(&factory.ledger);
        let session = RecordingSession::new(FakeProvider::new(), factory, InMemoryClaimRegistry::shared());
        (session, ledger)
    }

    fn short_timeouts() -> SessionOptions {
        SessionOptions {
            start_timeout: Duration::from_millis(500),
            stop_timeout: Duration::from_millis(200),
            cancel_timeout: Duration::from_millis(200),
        }
    }

    fn display_config(root: &Path) -> RecordingConfig {
        RecordingConfig::for_display(root.join("rec"), 1)
    }

    // --- Start ---

    #[test]
    fn start_then_stop_produces_one_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, ledger) = session_with(FakeFactory::new());

        session.start(display_config(tmp.path())).unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        let root = session.stop().unwrap();
        assert_eq!(root, tmp.path().join("rec"));
        assert_eq!(session.state(), SessionState::Stopped);

        let segments = session.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].index, 0);
        let video = segments[0].artifact(StreamKind::DisplayVideo).unwrap();
        assert!(!video.is_empty());
        assert!(layout::artifact_path(&root, 0, StreamKind::DisplayVideo).is_file());
        assert!(!layout::artifact_path(&root, 0, StreamKind::SystemAudio).exists());
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn window_target_writes_window_artifact_and_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        let config = RecordingConfig::for_window(tmp.path().join("rec"), 77).with_system_audio(true);

        session.start(config).unwrap();
        let root = session.stop().unwrap();

        let listing = inspect::inspect_recording(&root).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].video().unwrap().kind, StreamKind::WindowVideo);
        assert!(listing[0].has_system_audio());
        assert!(inspect::integrity_issues(&listing).is_empty());
    }

    #[test]
    fn start_with_both_targets_is_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, ledger) = session_with(FakeFactory::new());
        let config = RecordingConfig {
            window_id: Some(77),
            ..display_config(tmp.path())
        };

        assert!(matches!(session.start(config), Err(CaptureError::InvalidConfig(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(ledger.acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_with_zero_frame_rate_is_invalid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        let config = display_config(tmp.path()).with_frame_rate(0);

        assert!(matches!(session.start(config), Err(CaptureError::InvalidConfig(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn start_with_stale_target_acquires_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, ledger) = session_with(FakeFactory::new());
        let config = RecordingConfig::for_window(tmp.path().join("rec"), 99999);

        assert_eq!(
            session.start(config),
            Err(CaptureError::TargetNotFound(TargetRef {
                kind: TargetKind::Window,
                id: 99999
            }))
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(ledger.acquired.load(Ordering::SeqCst), 0);
        assert!(!tmp.path().join("rec").exists());
    }

    #[test]
    fn start_without_permission_is_denied() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new();
        let provider = FakeProvider {
            permitted: false,
            ..FakeProvider::new()
        };
        let session = RecordingSession::new(provider, factory, InMemoryClaimRegistry::shared());

        assert_eq!(session.start(display_config(tmp.path())), Err(CaptureError::PermissionDenied));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn failed_acquisition_releases_acquired_streams() {
        let tmp = tempfile::tempdir().unwrap();
        let mut factory = FakeFactory::new();
        factory.refuse = Some(StreamKind::SystemAudio);
        let claims = InMemoryClaimRegistry::shared();
        let ledger = Arc::clone(&factory.ledger);
        let session = RecordingSession::new(FakeProvider::new(), factory, claims.clone());

        let err = session
            .start(display_config(tmp.path()).with_system_audio(true))
            .unwrap_err();

        assert!(matches!(err, CaptureError::CaptureStartFailed(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(claims.is_empty());

        // The display source was acquired first and must have been aborted.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ledger.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn failed_activation_leaves_session_idle_and_cleans_output() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new().with(StreamKind::SystemAudio, Behavior::FailStart);
        let (session, ledger) = session_with(factory);

        let err = session
            .start(display_config(tmp.path()).with_system_audio(true))
            .unwrap_err();

        assert!(matches!(err, CaptureError::CaptureStartFailed(ref m) if m.contains("device busy")));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!layout::content_dir(&tmp.path().join("rec")).exists());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ledger.leaked(), 0);

        // Idle means the session can still be started.
        let restarted = session.start(display_config(tmp.path()));
        assert!(restarted.is_ok());
        session.stop().unwrap();
    }

    #[test]
    fn start_twice_is_invalid_state() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();

        let err = session.start(display_config(tmp.path())).unwrap_err();
        assert_eq!(err, CaptureError::invalid_state("start", SessionState::Recording));
        session.stop().unwrap();
    }

    // --- Pause / resume ---

    #[test]
    fn pause_resume_stop_produces_two_ordered_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        thread::sleep(Duration::from_millis(20));

        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(session.segments().len(), 1);
        thread::sleep(Duration::from_millis(20));

        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        thread::sleep(Duration::from_millis(20));

        let root = session.stop().unwrap();
        let segments = session.segments();
        assert_eq!(segments.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(segments[0].end_offset_secs <= segments[1].start_offset_secs);
        assert!(segments[0].ended_at <= segments[1].started_at);

        for segment in &segments {
            assert!(!segment.artifact(StreamKind::DisplayVideo).unwrap().is_empty());
        }
        assert_eq!(inspect::inspect_recording(&root).unwrap().len(), 2);
    }

    #[test]
    fn duration_is_sum_of_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        thread::sleep(Duration::from_millis(30));
        session.pause().unwrap();
        thread::sleep(Duration::from_millis(50));

        // Time spent paused does not count.
        let paused_duration = session.duration_secs();
        thread::sleep(Duration::from_millis(20));
        assert_relative_eq!(session.duration_secs(), paused_duration);

        session.resume().unwrap();
        session.stop().unwrap();

        let result = session.result().unwrap();
        let sum: f64 = result.segments.iter().map(Segment::duration_secs).sum();
        assert_relative_eq!(result.duration_secs, sum);
        assert_relative_eq!(session.duration_secs(), sum);
    }

    #[test]
    fn pause_and_resume_require_matching_state() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());

        assert_eq!(session.pause(), Err(CaptureError::invalid_state("pause", SessionState::Idle)));
        assert_eq!(session.resume(), Err(CaptureError::invalid_state("resume", SessionState::Idle)));

        session.start(display_config(tmp.path())).unwrap();
        assert_eq!(
            session.resume(),
            Err(CaptureError::invalid_state("resume", SessionState::Recording))
        );
        session.pause().unwrap();
        assert_eq!(session.pause(), Err(CaptureError::invalid_state("pause", SessionState::Paused)));
        session.stop().unwrap();
    }

    #[test]
    fn stop_while_paused_keeps_sealed_segment() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, ledger) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        session.pause().unwrap();

        session.stop().unwrap();
        assert_eq!(session.segments().len(), 1);
        assert_eq!(ledger.stopped.load(Ordering::SeqCst), 1);
    }

    // --- Stop ---

    #[test]
    fn stop_twice_is_invalid_state_and_keeps_output() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        let root = session.stop().unwrap();

        assert_eq!(session.stop(), Err(CaptureError::invalid_state("stop", SessionState::Stopped)));
        assert_eq!(session.segments().len(), 1);
        assert!(layout::artifact_path(&root, 0, StreamKind::DisplayVideo).is_file());
    }

    #[test]
    fn stop_writes_metadata_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path()).with_system_audio(true)).unwrap();
        let root = session.stop().unwrap();

        let meta = metadata::read_metadata(&root).unwrap();
        assert_eq!(meta.id, session.id());
        assert_eq!(meta.state, SessionState::Stopped);
        assert_eq!(meta.target.id, 1);
        assert_eq!(meta.segments.len(), 1);
        assert!(meta.forced_streams.is_empty());
    }

    #[test]
    fn hung_stream_yields_partial_stop_within_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new().with(StreamKind::WindowVideo, Behavior::HangOnStop(Duration::from_secs(3)));
        let (session, _) = session_with(factory);
        let session = session.with_options(short_timeouts());
        let config = RecordingConfig::for_window(tmp.path().join("rec"), 77).with_system_audio(true);
        session.start(config).unwrap();

        let started = Instant::now();
        let err = session.stop().unwrap_err();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(1), "stop took {:?}", elapsed);
        assert_eq!(
            err,
            CaptureError::PartialStop {
                path: tmp.path().join("rec"),
                forced: vec![StreamKind::WindowVideo],
            }
        );
        assert_eq!(session.state(), SessionState::Stopped);

        // The partial artifact is kept.
        let result = session.result().unwrap();
        assert!(result.is_partial());
        assert!(!result.segments[0].artifact(StreamKind::WindowVideo).unwrap().is_empty());
        assert!(!result.segments[0].artifact(StreamKind::SystemAudio).unwrap().is_empty());
    }

    #[test]
    fn delegate_sees_every_transition() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(FakeFactory::new());
        let delegate = Arc::new(RecordingDelegate::default());
        session.set_delegate(delegate.clone());

        session.start(display_config(tmp.path())).unwrap();
        session.pause().unwrap();
        session.resume().unwrap();
        session.stop().unwrap();

        assert_eq!(
            *delegate.states.lock(),
            vec![
                SessionState::Recording,
                SessionState::Paused,
                SessionState::Recording,
                SessionState::Stopping,
                SessionState::Stopped,
            ]
        );
        assert_eq!(*delegate.sealed.lock(), vec![0, 1]);
        assert_eq!(delegate.finished.load(Ordering::SeqCst), 1);
    }

    // --- Cancel ---

    #[test]
    fn cancel_discards_output() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, ledger) = session_with(FakeFactory::new());
        let root = tmp.path().join("rec");
        session.start(display_config(tmp.path())).unwrap();
        assert!(root.exists());

        session.cancel().unwrap();

        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!root.exists());
        assert!(session.segments().is_empty());
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn cancel_leaves_unrelated_files_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        let root = tmp.path().join("rec");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("notes.txt"), b"keep me").unwrap();

        session.start(display_config(tmp.path())).unwrap();
        session.pause().unwrap();
        session.cancel().unwrap();

        assert!(root.join("notes.txt").is_file());
        assert!(!layout::content_dir(&root).exists());
    }

    #[test]
    fn hung_stream_yields_partial_cancel_within_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new().with(StreamKind::DisplayVideo, Behavior::HangOnStop(Duration::from_secs(3)));
        let (session, _) = session_with(factory);
        let session = session.with_options(short_timeouts());
        session.start(display_config(tmp.path())).unwrap();

        let started = Instant::now();
        let err = session.cancel().unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            err,
            CaptureError::PartialCancel {
                forced: vec![StreamKind::DisplayVideo]
            }
        );
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(!layout::content_dir(&tmp.path().join("rec")).exists());
    }

    #[test]
    fn terminal_states_reject_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        session.cancel().unwrap();

        let state = SessionState::Cancelled;
        assert_eq!(session.start(display_config(tmp.path())), Err(CaptureError::invalid_state("start", state)));
        assert_eq!(session.pause(), Err(CaptureError::invalid_state("pause", state)));
        assert_eq!(session.resume(), Err(CaptureError::invalid_state("resume", state)));
        assert_eq!(session.stop(), Err(CaptureError::invalid_state("stop", state)));
        assert_eq!(session.cancel(), Err(CaptureError::invalid_state("cancel", state)));
    }

    #[test]
    fn cancel_from_idle_is_invalid_state() {
        let (session, _) = session_with(FakeFactory::new());
        assert_eq!(session.cancel(), Err(CaptureError::invalid_state("cancel", SessionState::Idle)));
    }

    // --- Concurrency ---

    #[test]
    fn overlapping_operation_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = FakeFactory::new().with(StreamKind::DisplayVideo, Behavior::SlowStart(Duration::from_millis(300)));
        let (session, _) = session_with(factory);
        let session = Arc::new(session);

        let starter = {
            let session = Arc::clone(&session);
            let config = display_config(tmp.path());
            thread::spawn(move || session.start(config))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(session.pause(), Err(CaptureError::OperationInProgress));
        assert_eq!(session.stop(), Err(CaptureError::OperationInProgress));

        starter.join().unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        session.stop().unwrap();
    }

    #[test]
    fn second_session_on_same_target_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let claims = InMemoryClaimRegistry::shared();
        let first = RecordingSession::new(FakeProvider::new(), FakeFactory::new(), claims.clone());
        let second = RecordingSession::new(FakeProvider::new(), FakeFactory::new(), claims.clone());

        first.start(RecordingConfig::for_display(tmp.path().join("a"), 1)).unwrap();
        let err = second
            .start(RecordingConfig::for_display(tmp.path().join("b"), 1))
            .unwrap_err();

        assert_eq!(
            err,
            CaptureError::TargetClaimed {
                target: TargetRef::display(1),
                holder: first.id().to_string(),
            }
        );
        assert_eq!(second.state(), SessionState::Idle);

        // Once the first session stops the target is free again.
        first.stop().unwrap();
        assert!(claims.is_empty());
        second.start(RecordingConfig::for_display(tmp.path().join("b"), 1)).unwrap();
        second.stop().unwrap();
    }

    #[test]
    fn closed_audio_output_does_not_stop_video() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path()).with_system_audio(true)).unwrap();

        // Closing the audio artifact's gate mid-recording mimics a dead
        // audio device; video keeps flowing into the next segment.
        session.streams.lock().iter_mut().find(|s| s.kind() == StreamKind::SystemAudio).unwrap().close_output();
        session.pause().unwrap();
        session.resume().unwrap();
        session.stop().unwrap();

        let segments = session.segments();
        assert!(!segments[1].artifact(StreamKind::DisplayVideo).unwrap().is_empty());
        assert!(segments[1].artifact(StreamKind::SystemAudio).unwrap().is_empty());
    }

    #[test]
    fn audio_write_failure_marks_segment_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut session, _) = session_with(FakeFactory::new());
        let delegate = Arc::new(RecordingDelegate::default());
        session.set_delegate(delegate.clone());
        session.start(display_config(tmp.path()).with_system_audio(true)).unwrap();

        session
            .writer
            .lock()
            .as_mut()
            .unwrap()
            .break_artifact(StreamKind::SystemAudio);
        session.stop().unwrap();

        let segment = &session.segments()[0];
        assert!(segment.is_partial());
        let audio = segment.artifact(StreamKind::SystemAudio).unwrap();
        assert!(audio.write_failed);
        assert_eq!(audio.chunk_count, 1);

        // Video got both its start and its drained stop chunk.
        let video = segment.artifact(StreamKind::DisplayVideo).unwrap();
        assert!(!video.write_failed);
        assert_eq!(video.chunk_count, 2);

        assert_eq!(*delegate.stream_errors.lock(), vec![StreamKind::SystemAudio]);
        let audio_diagnostics = session
            .diagnostics()
            .into_iter()
            .find(|d| d.kind == StreamKind::SystemAudio)
            .unwrap();
        assert_eq!(audio_diagnostics.write_failures, 1);
    }

    #[test]
    fn reused_output_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let claims = InMemoryClaimRegistry::shared();
        let first = RecordingSession::new(FakeProvider::new(), FakeFactory::new(), claims.clone());
        first.start(display_config(tmp.path())).unwrap();
        first.pause().unwrap();
        first.resume().unwrap();
        let root = first.stop().unwrap();

        let factory = FakeFactory::new();
        let ledger = Arc::clone(&factory.ledger);
        let second = RecordingSession::new(FakeProvider::new(), factory, claims.clone());
        let err = second.start(display_config(tmp.path())).unwrap_err();

        assert!(matches!(err, CaptureError::InvalidConfig(ref m) if m.contains("already holds a recording")));
        assert_eq!(second.state(), SessionState::Idle);
        assert_eq!(ledger.acquired.load(Ordering::SeqCst), 0);
        assert!(claims.is_empty());

        // The earlier recording is untouched.
        assert_eq!(inspect::inspect_recording(&root).unwrap().len(), 2);
        assert_eq!(metadata::read_metadata(&root).unwrap().segments.len(), 2);
    }

    #[test]
    fn two_live_sessions_cannot_share_output_root() {
        let tmp = tempfile::tempdir().unwrap();
        let claims = InMemoryClaimRegistry::shared();
        let display = RecordingSession::new(FakeProvider::new(), FakeFactory::new(), claims.clone());
        let window = RecordingSession::new(FakeProvider::new(), FakeFactory::new(), claims.clone());

        display.start(display_config(tmp.path())).unwrap();
        let err = window
            .start(RecordingConfig::for_window(tmp.path().join("rec"), 77).with_system_audio(true))
            .unwrap_err();

        assert!(matches!(err, CaptureError::OutputClaimed { ref holder, .. } if holder == display.id()));
        assert_eq!(window.state(), SessionState::Idle);

        // The rejected start released the window target it had claimed.
        assert_eq!(claims.holder(TargetRef::window(77)), None);

        let root = display.stop().unwrap();
        assert!(layout::artifact_path(&root, 0, StreamKind::DisplayVideo).is_file());
        assert!(claims.is_empty());
    }

    #[test]
    fn dropping_active_session_releases_claim() {
        let tmp = tempfile::tempdir().unwrap();
        let claims = InMemoryClaimRegistry::shared();
        let factory = FakeFactory::new();
        let ledger = Arc::clone(&factory.ledger);
        {
            let session = RecordingSession::new(FakeProvider::new(), factory, claims.clone());
            session.start(display_config(tmp.path())).unwrap();
        }
        assert!(claims.is_empty());

        let deadline = Instant::now() + Duration::from_secs(2);
        while ledger.leaked() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ledger.leaked(), 0);
    }

    #[test]
    fn works_through_the_trait_object() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        let session: &dyn CaptureSession = &session;

        session.start(display_config(tmp.path())).unwrap();
        session.pause().unwrap();
        session.resume().unwrap();
        session.stop().unwrap();
        assert_eq!(session.segments().len(), 2);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn diagnostics_survive_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _) = session_with(FakeFactory::new());
        session.start(display_config(tmp.path())).unwrap();
        session.stop().unwrap();

        let diagnostics = session.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, StreamKind::DisplayVideo);
        assert!(diagnostics[0].bytes_written > 0);
    }
}
