use super::{evaluate_request, EvaluationConfig, FilterTransport, ProgressSink, TransportFuture};
use crate::errors::{AppError, AppResult};
use crate::models::TransportKind;
use crate::protocol::{FailureKind, FailureReport, FilterRequestMessage, WorkerMessage};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

const WORKER_THREAD_NAME: &str = "dream-filter-worker";

struct WorkerJob {
    request: FilterRequestMessage,
    reply: mpsc::UnboundedSender<WorkerMessage>,
}

/// Background thread that evaluates filter requests one at a time.
///
/// There is no cancel message: a caller that stops listening simply drops its
/// reply receiver, and the worker's late messages go nowhere.
pub struct WorkerTransport {
    jobs: Mutex<Option<std_mpsc::Sender<WorkerJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerTransport {
    /// Spawns the worker thread and waits for its ready handshake.
    pub async fn start(config: EvaluationConfig, ready_timeout: Duration) -> AppResult<Self> {
        let (job_tx, job_rx) = std_mpsc::channel::<WorkerJob>();
        let (ready_tx, ready_rx) = oneshot::channel::<WorkerMessage>();

        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker_loop(job_rx, ready_tx, config))
            .map_err(|error| AppError::WorkerUnavailable(format!("failed to spawn filter worker: {error}")))?;

        match timeout(ready_timeout, ready_rx).await {
            Ok(Ok(WorkerMessage::Ready)) => {}
            Ok(Ok(WorkerMessage::Failure(report))) => {
                return Err(AppError::WorkerUnavailable(report.message));
            }
            Ok(Ok(_)) => {
                return Err(AppError::WorkerUnavailable(
                    "filter worker sent an unexpected start-up message".to_string(),
                ));
            }
            Ok(Err(_)) => {
                return Err(AppError::WorkerUnavailable(
                    "filter worker exited before becoming ready".to_string(),
                ));
            }
            Err(_) => {
                return Err(AppError::WorkerUnavailable(format!(
                    "filter worker not ready after {}ms",
                    ready_timeout.as_millis()
                )));
            }
        }

        tracing::info!(thread = WORKER_THREAD_NAME, "filter worker ready");
        Ok(Self {
            jobs: Mutex::new(Some(job_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        let has_sender = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let alive = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        has_sender && alive
    }

    /// Closes the job channel. The thread exits after its current job.
    pub fn shutdown(&self) {
        let sender = self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_some() {
            tracing::debug!(thread = WORKER_THREAD_NAME, "filter worker shutting down");
        }
    }

    fn submit(&self, job: WorkerJob) -> AppResult<()> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = jobs.as_ref() else {
            return Err(AppError::WorkerUnavailable("filter worker has been shut down".to_string()));
        };
        sender
            .send(job)
            .map_err(|_| AppError::WorkerUnavailable("filter worker thread exited".to_string()))
    }
}

impl Drop for WorkerTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl FilterTransport for WorkerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Worker
    }

    fn dispatch(&self, request: FilterRequestMessage, progress: ProgressSink) -> TransportFuture<'_> {
        Box::pin(async move {
            let request_id = request.request_id;
            let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
            self.submit(WorkerJob {
                request,
                reply: reply_tx,
            })?;

            while let Some(message) = reply_rx.recv().await {
                match message {
                    WorkerMessage::Progress(update) if update.request_id == request_id => progress(update),
                    WorkerMessage::Result(response) if response.request_id == request_id => {
                        return Ok(response);
                    }
                    WorkerMessage::Failure(report) => return Err(report.into()),
                    other => {
                        tracing::debug!(
                            request_id,
                            message_request_id = ?other.request_id(),
                            "ignoring unrelated worker message"
                        );
                    }
                }
            }

            Err(AppError::WorkerUnavailable(
                "filter worker stopped before responding".to_string(),
            ))
        })
    }
}

fn worker_loop(
    jobs: std_mpsc::Receiver<WorkerJob>,
    ready: oneshot::Sender<WorkerMessage>,
    config: EvaluationConfig,
) {
    if ready.send(WorkerMessage::Ready).is_err() {
        return;
    }

    while let Ok(WorkerJob { request, reply }) = jobs.recv() {
        let request_id = request.request_id;
        let progress_reply = reply.clone();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            evaluate_request(&request, &config, &mut |update| {
                let _ = progress_reply.send(WorkerMessage::Progress(update));
            })
        }));

        let message = match outcome {
            Ok(response) => WorkerMessage::Result(response),
            Err(payload) => WorkerMessage::Failure(FailureReport {
                request_id: Some(request_id),
                error_kind: FailureKind::Panicked,
                message: panic_message(payload.as_ref()),
            }),
        };

        // Receiver is gone when the caller timed out; nothing to do then.
        let _ = reply.send(message);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "filter worker panicked".to_string()
    }
}
