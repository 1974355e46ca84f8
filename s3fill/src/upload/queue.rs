//! The job queue feeding tasks to the upload workers.
use super::Task;
use tracing::debug;

/// Create a job queue which can buffer `capacity` tasks without blocking the producer.
///
/// Returns the producer half, which is consumed when the queue is filled, and the consumer half,
/// which is cloned once per worker.  Each task pushed is delivered to exactly one consumer.
///
/// Panics if `capacity` is zero; a job with nothing to upload never creates a queue.
pub(super) fn job_queue(capacity: usize) -> (JobQueue, TaskReceiver) {
    assert!(capacity > 0, "BUG: job queue capacity must be at least 1");

    let (sender, receiver) = async_channel::bounded(capacity);

    (JobQueue { sender }, TaskReceiver { receiver })
}

/// The producer side of the job queue.
#[derive(Debug)]
pub(super) struct JobQueue {
    sender: async_channel::Sender<Task>,
}

impl JobQueue {
    /// Push tasks `1..=count` in order, then close the queue.
    ///
    /// Taking `self` by value makes it impossible to push anything after the close.  Returns the
    /// number of tasks actually enqueued, which is less than `count` only if every consumer went
    /// away before the queue was full.
    pub(super) async fn fill(self, count: usize) -> usize {
        for ordinal in 1..=count {
            if self.sender.send(Task::new(ordinal)).await.is_err() {
                debug!(
                    ordinal,
                    count, "All workers exited before the job queue was filled"
                );

                return ordinal - 1;
            }
        }

        self.sender.close();

        count
    }
}

/// The consumer side of the job queue.
#[derive(Clone, Debug)]
pub(super) struct TaskReceiver {
    receiver: async_channel::Receiver<Task>,
}

impl TaskReceiver {
    /// Wait for the next task.
    ///
    /// Yields `None` once the queue has been closed and every buffered task has been taken.
    pub(super) async fn recv(&self) -> Option<Task> {
        self.receiver.recv().await.ok()
    }
}
