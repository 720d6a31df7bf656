//! In-process bounded job queue.

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{DispatchError, EvaluationTask, JobDispatcher};

/// Sending half; cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<EvaluationTask>,
}

/// Receiving half, consumed by a [`JobWorker`](super::JobWorker).
#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::Receiver<EvaluationTask>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, JobReceiver { receiver })
    }
}

impl JobDispatcher for JobQueue {
    fn enqueue(&self, task: EvaluationTask) -> Result<(), DispatchError> {
        self.sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::QueueClosed,
        })
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<EvaluationTask> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EvaluationTask> {
        self.receiver.try_recv().ok()
    }

    /// Stop intake; already buffered tasks can still be received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauge_core::EvaluationContext;
    use uuid::Uuid;

    fn task() -> EvaluationTask {
        EvaluationTask::new(Uuid::new_v4(), 1, EvaluationContext::TestRun, false)
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut receiver) = JobQueue::bounded(4);
        let sent = task();
        queue.enqueue(sent.clone()).unwrap();

        assert_eq!(receiver.recv().await, Some(sent));
    }

    #[test]
    fn test_full_queue() {
        let (queue, _receiver) = JobQueue::bounded(1);
        queue.enqueue(task()).unwrap();
        assert_eq!(queue.enqueue(task()), Err(DispatchError::QueueFull));
    }

    #[test]
    fn test_closed_queue() {
        let (queue, mut receiver) = JobQueue::bounded(4);
        queue.enqueue(task()).unwrap();
        receiver.close();

        assert_eq!(queue.enqueue(task()), Err(DispatchError::QueueClosed));
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }
}
