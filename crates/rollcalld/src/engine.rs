use chrono::{Local, NaiveDate, NaiveDateTime};
use rollcall_core::{
    AttendanceRecord, LedgerStore, Perception, Pipeline, PipelineError, PipelineState, VideoSource,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: PipelineState,
    pub session_date: NaiveDate,
    pub identities: Vec<String>,
    pub recorded: usize,
}

/// Something the loop wants the outside world to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Recorded(AttendanceRecord),
    LedgerFailed(String),
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Records {
        reply: oneshot::Sender<Vec<AttendanceRecord>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Begin capturing. `Ok(false)` if already running.
    pub async fn start(&self) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Start { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Stop capturing after the current cycle. `Ok(false)` if already idle.
    pub async fn stop(&self) -> Result<bool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Stop { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Attendance recorded in the current session, in order.
    pub async fn records(&self) -> Result<Vec<AttendanceRecord>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Records { reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn send(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the pipeline. While idle it blocks on the request channel;
/// while running it drains pending requests, runs one cycle, then sleeps for
/// `tick`. It exits once every [`EngineHandle`] is dropped, stopping the
/// pipeline first if needed.
pub fn spawn_engine<V, P, S>(
    mut pipeline: Pipeline<V, P, S>,
    tick: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> EngineHandle
where
    V: VideoSource + Send + 'static,
    P: Perception + Send + 'static,
    S: LedgerStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            loop {
                if pipeline.state() == PipelineState::Idle {
                    match rx.blocking_recv() {
                        Some(request) => handle_request(&mut pipeline, request),
                        None => break,
                    }
                    continue;
                }

                match rx.try_recv() {
                    Ok(request) => {
                        handle_request(&mut pipeline, request);
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => {
                        if let Err(e) = pipeline.stop() {
                            tracing::error!(error = %e, "stop on shutdown failed");
                        }
                        break;
                    }
                    Err(TryRecvError::Empty) => {}
                }

                run_cycle(&mut pipeline, now(), &events);
                std::thread::sleep(tick);
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn handle_request<V, P, S>(pipeline: &mut Pipeline<V, P, S>, request: EngineRequest)
where
    V: VideoSource,
    P: Perception,
    S: LedgerStore,
{
    match request {
        EngineRequest::Start { reply } => {
            let _ = reply.send(pipeline.start().map_err(EngineError::from));
        }
        EngineRequest::Stop { reply } => {
            let _ = reply.send(pipeline.stop().map_err(EngineError::from));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(status_of(pipeline));
        }
        EngineRequest::Records { reply } => {
            let _ = reply.send(pipeline.ledger().records().to_vec());
        }
    }
}

fn status_of<V, P, S>(pipeline: &Pipeline<V, P, S>) -> EngineStatus
where
    V: VideoSource,
    P: Perception,
    S: LedgerStore,
{
    EngineStatus {
        state: pipeline.state(),
        session_date: pipeline.ledger().session().date(),
        identities: pipeline
            .gallery()
            .identities()
            .iter()
            .map(|i| i.name.clone())
            .collect(),
        recorded: pipeline.ledger().records().len(),
    }
}

fn run_cycle<V, P, S>(
    pipeline: &mut Pipeline<V, P, S>,
    now: NaiveDateTime,
    events: &mpsc::UnboundedSender<EngineEvent>,
) where
    V: VideoSource,
    P: Perception,
    S: LedgerStore,
{
    let report = pipeline.cycle(now);
    for record in report.recorded {
        let _ = events.send(EngineEvent::Recorded(record));
    }
    for error in report.ledger_errors {
        let _ = events.send(EngineEvent::LedgerFailed(error.to_string()));
    }
}
