use std::collections::VecDeque;
use std::sync::Mutex;

use super::task::UploadTask;

/// FIFO backlog that workers claim tasks from, one at a time.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<UploadTask>>,
}

impl TaskQueue {
    pub fn from_tasks(tasks: impl IntoIterator<Item = UploadTask>) -> Self {
        Self {
            inner: Mutex::new(tasks.into_iter().collect()),
        }
    }

    pub fn claim(&self) -> Option<UploadTask> {
        self.lock().pop_front()
    }

    /// Empties the backlog, returning whatever was never claimed.
    pub fn drain(&self) -> Vec<UploadTask> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<UploadTask>> {
        // Poisoning is ignored: every critical section is a single deque call.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = TaskQueue::from_tasks(vec![UploadTask::new("/A", 1), UploadTask::new("/B", 2)]);

        let first = queue.claim().unwrap();
        let second = queue.claim().unwrap();

        assert_eq!(first.path_key(), "/A");
        assert_eq!(second.path_key(), "/B");
        assert!(queue.claim().is_none());
    }

    #[test]
    fn claim_on_empty_returns_none() {
        let queue = TaskQueue::default();
        assert!(queue.claim().is_none());
    }

    #[test]
    fn drain_returns_unclaimed_tasks() {
        let queue = TaskQueue::from_tasks(vec![
            UploadTask::new("/A", 1),
            UploadTask::new("/B", 1),
            UploadTask::new("/C", 1),
        ]);
        let _ = queue.claim();

        let rest = queue.drain();
        assert_eq!(rest.len(), 2);
        assert!(queue.drain().is_empty());
    }
}
