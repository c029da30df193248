use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{core::domain::Job, error::DispatchError};

/// Bounded FIFO drained by the scheduler loop.
///
/// A popped job keeps counting against the capacity until its
/// [`JobTicket`] is dropped, so the bound covers work that is still
/// waiting on a build or a container slot.
#[derive(Debug)]
pub struct JobQueue {
    capacity: usize,
    jobs: Mutex<VecDeque<Job>>,
    in_flight: Arc<AtomicUsize>,
}

/// Held by whoever works on a popped job.
#[derive(Debug)]
pub struct JobTicket {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queued jobs plus popped jobs whose tickets are still alive.
    pub fn outstanding(&self) -> usize {
        let queue = self.lock();
        queue.len() + self.in_flight.load(Ordering::SeqCst)
    }

    /// Enqueues all jobs or none of them.
    pub fn push_all(&self, jobs: Vec<Job>) -> Result<(), DispatchError> {
        let mut queue = self.lock();
        if queue.len() + self.in_flight.load(Ordering::SeqCst) + jobs.len() > self.capacity {
            return Err(DispatchError::QueueFull {
                capacity: self.capacity,
            });
        }
        queue.extend(jobs);
        Ok(())
    }

    pub fn pop(&self) -> Option<(Job, JobTicket)> {
        let job = self.lock().pop_front()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some((
            job,
            JobTicket {
                in_flight: self.in_flight.clone(),
            },
        ))
    }

    /// Drops every queued job of a submission, returning how many were removed.
    pub fn purge(&self, submission_id: &str) -> usize {
        let mut queue = self.lock();
        let before = queue.len();
        queue.retain(|job| job.submission_id() != submission_id);
        before - queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        // A poisoned queue still holds valid jobs.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::CaseKey;

    fn pop_job(queue: &JobQueue) -> Option<Job> {
        queue.pop().map(|(job, _)| job)
    }

    fn execute(id: &str, case: usize) -> Job {
        Job::Execute {
            submission_id: id.to_string(),
            key: CaseKey::new(0, case),
        }
    }

    #[test]
    fn test_push_all_is_all_or_nothing() {
        let queue = JobQueue::new(3);
        queue.push_all(vec![execute("a", 0), execute("a", 1)]).unwrap();

        let err = queue
            .push_all(vec![execute("b", 0), execute("b", 1)])
            .unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(queue.len(), 2);

        queue.push_all(vec![execute("c", 0)]).unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new(4);
        queue
            .push_all(vec![
                Job::Build {
                    submission_id: "a".to_string(),
                },
                execute("a", 0),
            ])
            .unwrap();
        assert!(matches!(pop_job(&queue), Some(Job::Build { .. })));
        assert_eq!(pop_job(&queue), Some(execute("a", 0)));
        assert_eq!(pop_job(&queue), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_purge_only_touches_one_submission() {
        let queue = JobQueue::new(8);
        queue
            .push_all(vec![execute("a", 0), execute("b", 0), execute("a", 1)])
            .unwrap();
        assert_eq!(queue.purge("a"), 2);
        assert_eq!(pop_job(&queue), Some(execute("b", 0)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_popped_jobs_count_until_ticket_dropped() {
        let queue = JobQueue::new(3);
        queue
            .push_all(vec![execute("a", 0), execute("a", 1), execute("a", 2)])
            .unwrap();
        let tickets: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert!(queue.is_empty());
        assert_eq!(queue.outstanding(), 3);

        let err = queue.push_all(vec![execute("b", 0)]).unwrap_err();
        assert!(err.is_retriable());

        drop(tickets);
        assert_eq!(queue.outstanding(), 0);
        queue.push_all(vec![execute("b", 0)]).unwrap();
    }
}
