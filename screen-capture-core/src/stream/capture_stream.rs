use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::diagnostics::StreamDiagnostics;
use crate::models::error::CaptureError;
use crate::models::stream_kind::StreamKind;
use crate::stream::sink::{ChunkSink, SharedWriter, StreamShared, TerminalSignal};
use crate::traits::capture_source::CaptureSource;
use crate::traits::session_delegate::SessionDelegate;

enum StreamCommand {
    Start,
    Suspend,
    Resume,
    Finish,
    Abort,
}

enum StreamAck {
    Started(Result<(), CaptureError>),
    Finished(Result<(), CaptureError>),
}

/// Lifecycle of a single stream as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Source acquired, worker running, nothing started yet.
    Acquired,
    Active,
    Suspended,
    /// `Finish` sent, acknowledgment pending.
    Finishing,
    /// Source drained and released.
    Finished,
    /// Torn down without (or without waiting for) a graceful drain.
    Aborted,
}

/// How a stream's shutdown ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The source acknowledged in time.
    Drained,
    /// The source acknowledged in time but reported an error while draining.
    Failed(CaptureError),
    /// No acknowledgment before the deadline; the stream was cut loose.
    ForceTerminated,
}

/// One live capture source owned by a session.
///
/// Tagged by `StreamKind`; every kind exposes the same
/// activate/suspend/finish/abort surface. The source lives on a dedicated
/// worker thread and is driven through a command channel; replies come back
/// on an acknowledgment channel that the session reads with a deadline.
/// A source that blocks inside `stop` can therefore delay its own worker
/// but never the session.
pub struct CaptureStream {
    kind: StreamKind,
    phase: StreamPhase,
    shared: Arc<StreamShared>,
    commands: Sender<StreamCommand>,
    acks: Receiver<StreamAck>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CaptureStream {
    /// Spawn the worker thread that will own `source`.
    ///
    /// The source does not produce anything until `activate`.
    pub fn spawn(
        kind: StreamKind,
        source: Box<dyn CaptureSource>,
        writer: SharedWriter,
        delegate: Option<Arc<dyn SessionDelegate>>,
    ) -> Result<Self, CaptureError> {
        let shared = Arc::new(StreamShared::new(kind));
        let sink = ChunkSink::new(Arc::clone(&shared), writer, delegate);
        let (command_tx, command_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("capture-{}", kind))
            .spawn(move || run_worker(kind, source, sink, command_rx, ack_tx))
            .map_err(|e| CaptureError::CaptureStartFailed(format!("failed to spawn {} worker: {}", kind, e)))?;

        Ok(Self {
            kind,
            phase: StreamPhase::Acquired,
            shared,
            commands: command_tx,
            acks: ack_rx,
            worker: Some(worker),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == StreamPhase::Active
    }

    /// First terminal signal this stream saw, if any.
    pub fn terminal_signal(&self) -> Option<TerminalSignal> {
        self.shared.terminal()
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        self.shared.diagnostics()
    }

    /// Begin (or continue) producing into the open segment.
    ///
    /// The first activation starts the source and waits up to `timeout` for
    /// it to acknowledge. Reactivating a suspended stream does not wait.
    pub fn activate(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        match self.phase {
            StreamPhase::Active => Ok(()),
            StreamPhase::Suspended => {
                self.shared.set_accepting(true);
                self.send(StreamCommand::Resume);
                self.phase = StreamPhase::Active;
                Ok(())
            }
            StreamPhase::Acquired => {
                self.shared.set_accepting(true);
                self.send(StreamCommand::Start);
                match self.await_started(timeout) {
                    Ok(()) => {
                        log::debug!("{} stream active", self.kind);
                        self.phase = StreamPhase::Active;
                        Ok(())
                    }
                    Err(e) => {
                        self.shared.set_accepting(false);
                        Err(e)
                    }
                }
            }
            phase => Err(CaptureError::CaptureStartFailed(format!(
                "{} stream cannot be activated while {:?}",
                self.kind, phase
            ))),
        }
    }

    /// Pause production without releasing the source.
    pub fn suspend(&mut self) {
        if self.phase != StreamPhase::Active {
            return;
        }
        self.shared.set_accepting(false);
        self.send(StreamCommand::Suspend);
        self.phase = StreamPhase::Suspended;
    }

    /// Stop routing this stream's output to disk, including whatever it
    /// drains during shutdown.
    pub fn close_output(&mut self) {
        self.shared.close();
    }

    /// Ask the source to drain and close without waiting.
    ///
    /// A stream that never started is aborted instead.
    pub fn request_finish(&mut self) {
        match self.phase {
            StreamPhase::Active | StreamPhase::Suspended => {
                if !self.shared.signal_terminal(TerminalSignal::Finish) {
                    log::debug!(
                        "{} stream already ended ({:?}), finishing anyway",
                        self.kind,
                        self.shared.terminal()
                    );
                }
                self.send(StreamCommand::Finish);
                self.phase = StreamPhase::Finishing;
            }
            StreamPhase::Acquired => self.abort(),
            StreamPhase::Finishing | StreamPhase::Finished | StreamPhase::Aborted => {}
        }
    }

    /// Wait until `deadline` for the finish acknowledgment.
    ///
    /// On timeout the stream is force-terminated: its output is closed and
    /// its worker detached, so a hung source can never block the caller past
    /// the deadline.
    pub fn await_finish(&mut self, deadline: Instant) -> FinishOutcome {
        match self.phase {
            StreamPhase::Finishing => {}
            StreamPhase::Finished => return FinishOutcome::Drained,
            StreamPhase::Aborted => return FinishOutcome::ForceTerminated,
            _ => {
                self.request_finish();
                if self.phase != StreamPhase::Finishing {
                    return FinishOutcome::ForceTerminated;
                }
            }
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(StreamAck::Finished(result)) => {
                    self.shared.close();
                    if let Some(worker) = self.worker.take() {
                        if worker.join().is_err() {
                            log::warn!("{} worker panicked after finishing", self.kind);
                        }
                    }
                    self.phase = StreamPhase::Finished;
                    return match result {
                        Ok(()) => FinishOutcome::Drained,
                        Err(e) => {
                            log::warn!("{} stream failed while finishing: {}", self.kind, e);
                            FinishOutcome::Failed(e)
                        }
                    };
                }
                // A start acknowledgment that arrived after its own timeout.
                Ok(StreamAck::Started(_)) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("{} stream did not acknowledge finish in time, forcing termination", self.kind);
                    self.force_terminate();
                    return FinishOutcome::ForceTerminated;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("{} worker exited without acknowledging finish", self.kind);
                    self.force_terminate();
                    return FinishOutcome::ForceTerminated;
                }
            }
        }
    }

    /// Request a graceful drain and wait at most `timeout` for it.
    pub fn finish(&mut self, timeout: Duration) -> FinishOutcome {
        let deadline = Instant::now() + timeout;
        self.request_finish();
        self.await_finish(deadline)
    }

    /// Release immediately. Never blocks.
    pub fn abort(&mut self) {
        if matches!(self.phase, StreamPhase::Finished | StreamPhase::Aborted) {
            return;
        }
        self.shared.signal_terminal(TerminalSignal::Abort);
        self.force_terminate();
        log::debug!("{} stream aborted", self.kind);
    }

    fn force_terminate(&mut self) {
        self.shared.close();
        self.send(StreamCommand::Abort);
        // Detach: the worker exits on its own once the source returns.
        self.worker.take();
        self.phase = StreamPhase::Aborted;
    }

    fn await_started(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(StreamAck::Started(Ok(()))) => return Ok(()),
                Ok(StreamAck::Started(Err(e))) => {
                    return Err(CaptureError::CaptureStartFailed(format!("{} stream: {}", self.kind, e)))
                }
                Ok(StreamAck::Finished(_)) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CaptureError::CaptureStartFailed(format!(
                        "{} stream did not start within {:?}",
                        self.kind, timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::CaptureStartFailed(format!(
                        "{} worker exited during start",
                        self.kind
                    )))
                }
            }
        }
    }

    fn send(&self, command: StreamCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("{} worker already gone", self.kind);
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.abort();
        }
    }
}

fn run_worker(
    kind: StreamKind,
    mut source: Box<dyn CaptureSource>,
    sink: ChunkSink,
    commands: Receiver<StreamCommand>,
    acks: Sender<StreamAck>,
) {
    let mut started = false;

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Start => {
                let result = source.start(sink.clone());
                started = result.is_ok();
                let _ = acks.send(StreamAck::Started(result));
            }
            StreamCommand::Suspend => {
                if let Err(e) = source.suspend() {
                    sink.report_error(e);
                }
            }
            StreamCommand::Resume => {
                if let Err(e) = source.resume() {
                    sink.report_error(e);
                }
            }
            StreamCommand::Finish => {
                let result = if started { source.stop() } else { Ok(()) };
                drop(source);
                let _ = acks.send(StreamAck::Finished(result));
                return;
            }
            StreamCommand::Abort => {
                source.abort();
                log::debug!("{} worker aborted", kind);
                return;
            }
        }
    }

    // The stream handle went away without a final command.
    source.abort();
}
