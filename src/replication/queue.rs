//! Bounded injection queue
//!
//! Many producers (scanner lanes), many consumers (injector workers).
//! `push` waits while the queue is full, so a saturated queue stalls the
//! lanes instead of dropping work. `pop` waits while the queue is empty and
//! returns `None` only once the queue has been closed and drained.

use super::task::InjectionTask;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

pub struct InjectionQueue {
    tasks: Mutex<VecDeque<InjectionTask>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    closed: AtomicBool,
}

impl InjectionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            tasks: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, VecDeque<InjectionTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without waiting. Hands the task back if the queue is full or
    /// closed.
    pub fn try_push(&self, task: InjectionTask) -> Result<(), InjectionTask> {
        if self.is_closed() {
            return Err(task);
        }
        let mut tasks = self.tasks();
        if tasks.len() >= self.capacity {
            return Err(task);
        }
        tasks.push_back(task);
        drop(tasks);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue, waiting for room. Fails only if the queue is closed.
    pub async fn push(&self, task: InjectionTask) -> Result<(), InjectionTask> {
        let mut task = task;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(task) {
                Ok(()) => return Ok(()),
                Err(t) if self.is_closed() => return Err(t),
                Err(t) => task = t,
            }
            notified.await;
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<InjectionTask> {
        let task = self.tasks().pop_front();
        if task.is_some() {
            self.not_full.notify_one();
        }
        task
    }

    /// Dequeue, waiting for a task. `None` once closed and empty.
    pub async fn pop(&self) -> Option<InjectionTask> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_pop() {
                return Some(task);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// No more tasks will be accepted; consumers drain what is left
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChunkId, ChunkKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    fn task(n: u8) -> InjectionTask {
        InjectionTask::new(ChunkId::for_bytes(&[n]), ChunkKind::Data, vec![], 3, 0).unwrap()
    }

    #[test]
    fn test_try_push_full() {
        let queue = InjectionQueue::new(2);
        assert!(queue.try_push(task(1)).is_ok());
        assert!(queue.try_push(task(2)).is_ok());
        let rejected = queue.try_push(task(3)).unwrap_err();
        assert_eq!(rejected, task(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let queue = InjectionQueue::new(4);
        for n in 0..3 {
            queue.try_push(task(n)).unwrap();
        }
        assert_eq!(queue.try_pop(), Some(task(0)));
        assert_eq!(queue.try_pop(), Some(task(1)));
        assert_eq!(queue.try_pop(), Some(task(2)));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_push_waits_until_room() {
        let queue = InjectionQueue::new(1);
        queue.try_push(task(1)).unwrap();

        let mut push = tokio_test::task::spawn(queue.push(task(2)));
        assert_pending!(push.poll());

        assert_eq!(queue.try_pop(), Some(task(1)));
        assert!(push.is_woken());
        assert_ready!(push.poll()).unwrap();
        assert_eq!(queue.try_pop(), Some(task(2)));
    }

    #[test]
    fn test_pop_waits_until_task() {
        let queue = InjectionQueue::new(1);
        let mut pop = tokio_test::task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.try_push(task(7)).unwrap();
        assert!(pop.is_woken());
        assert_eq!(assert_ready!(pop.poll()), Some(task(7)));
    }

    #[test]
    fn test_close_drains_then_ends() {
        let queue = InjectionQueue::new(4);
        queue.try_push(task(1)).unwrap();
        queue.close();

        assert!(queue.try_push(task(2)).is_err());
        let mut pop = tokio_test::task::spawn(queue.pop());
        assert_eq!(assert_ready!(pop.poll()), Some(task(1)));
        let mut pop = tokio_test::task::spawn(queue.pop());
        assert_eq!(assert_ready!(pop.poll()), None);
    }

    #[test]
    fn test_close_wakes_waiting_consumer() {
        let queue = InjectionQueue::new(1);
        let mut pop = tokio_test::task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.close();
        assert!(pop.is_woken());
        assert_eq!(assert_ready!(pop.poll()), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_producers_many_consumers() {
        let queue = Arc::new(InjectionQueue::new(3));

        let producers: Vec<_> = (0..4u8)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for n in 0..25u8 {
                        queue.push(task(p * 25 + n)).await.unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut seen = 0usize;
                    while queue.pop().await.is_some() {
                        seen += 1;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.await.unwrap();
        }
        queue.close();

        let mut total = 0;
        for c in consumers {
            total += c.await.unwrap();
        }
        assert_eq!(total, 100);
        assert!(queue.is_empty());
    }
}
