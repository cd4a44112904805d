use stepcore::{Message, StepError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<UnboundedReceiver<Message>>,
}

/// Receiving side of a step's `in` endpoint, drained by a background task
/// between `open` and `close`.
pub(crate) struct Inbox {
    receiver: Mutex<Option<UnboundedReceiver<Message>>>,
    worker: Mutex<Option<Worker>>,
}

impl Inbox {
    pub fn new(receiver: UnboundedReceiver<Message>) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    /// Hands every incoming message to `on_message` until closed.
    pub async fn open<F>(&self, step: &str, mut on_message: F) -> Result<(), StepError>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let mut receiver =
            self.receiver
                .lock()
                .await
                .take()
                .ok_or_else(|| StepError::StartFailed {
                    step: step.to_string(),
                    reason: "inbox is already being drained".into(),
                })?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = receiver.recv() => match message {
                        Some(message) => on_message(message),
                        None => break,
                    },
                }
            }
            receiver
        });

        *self.worker.lock().await = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stops the drain task and keeps the receiver for the next `open`.
    pub async fn close(&self, step: &str) -> Result<(), StepError> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        worker.cancel.cancel();
        let receiver = worker.handle.await.map_err(|e| StepError::StopFailed {
            step: step.to_string(),
            reason: e.to_string(),
        })?;
        *self.receiver.lock().await = Some(receiver);
        Ok(())
    }
}
