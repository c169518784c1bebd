// Priority Job Queue
// Four FIFO lanes (urgent > high > normal > low); holds pending jobs only

use crate::domain::{Job, JobId, Priority};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Queue shared by the job service, dispatcher and sweeper
pub type SharedQueue = Arc<Mutex<PriorityJobQueue>>;

/// Pending job counts per priority
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
    /// `created_at` of the oldest pending job
    pub oldest_created_at: Option<i64>,
}

/// In-process priority queue.
///
/// Not synchronized; owners wrap it in a `tokio::sync::Mutex`.
#[derive(Debug, Default)]
pub struct PriorityJobQueue {
    lanes: [VecDeque<Job>; 4],
}

impl PriorityJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail of the job's priority lane.
    ///
    /// Returns false (and drops nothing) if the id is already queued.
    pub fn enqueue(&mut self, job: Job) -> bool {
        if self.contains(&job.id) {
            return false;
        }
        self.lanes[job.priority.lane()].push_back(job);
        true
    }

    /// Pop the front of the highest non-empty lane
    pub fn dequeue(&mut self) -> Option<Job> {
        self.lanes.iter_mut().find_map(|lane| lane.pop_front())
    }

    /// Next job `dequeue` would return
    pub fn peek(&self) -> Option<&Job> {
        self.lanes.iter().find_map(|lane| lane.front())
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        self.take(id).is_some()
    }

    /// Move a job to the tail of another lane.
    ///
    /// Same priority is a no-op that keeps its position. Returns false when
    /// the job is not queued.
    pub fn update_priority(&mut self, id: &JobId, priority: Priority) -> bool {
        let current = match self.find(id) {
            Some(job) => job.priority,
            None => return false,
        };
        if current == priority {
            return true;
        }

        match self.take(id) {
            Some(mut job) => {
                job.priority = priority;
                self.lanes[priority.lane()].push_back(job);
                true
            }
            None => false,
        }
    }

    /// Evict jobs created more than `max_age_ms` before `now`.
    ///
    /// Evicted jobs keep their status; the caller decides what happens next.
    pub fn cleanup(&mut self, max_age_ms: u64, now: i64) -> Vec<Job> {
        let cutoff = now.saturating_sub(i64::try_from(max_age_ms).unwrap_or(i64::MAX));
        let mut evicted = Vec::new();

        for lane in self.lanes.iter_mut() {
            let (stale, fresh): (VecDeque<Job>, VecDeque<Job>) =
                lane.drain(..).partition(|job| job.created_at < cutoff);
            *lane = fresh;
            evicted.extend(stale);
        }
        evicted
    }

    pub fn get_stats(&self) -> QueueStats {
        let count = |p: Priority| self.lanes[p.lane()].len();

        QueueStats {
            urgent: count(Priority::Urgent),
            high: count(Priority::High),
            normal: count(Priority::Normal),
            low: count(Priority::Low),
            total: self.len(),
            oldest_created_at: self.lanes.iter().flatten().map(|j| j.created_at).min(),
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.find(id).is_some()
    }

    /// Queued jobs in dispatch order
    pub fn snapshot(&self) -> Vec<Job> {
        self.lanes.iter().flatten().cloned().collect()
    }

    fn find(&self, id: &JobId) -> Option<&Job> {
        self.lanes.iter().flatten().find(|job| &job.id == id)
    }

    fn take(&mut self, id: &JobId) -> Option<Job> {
        self.lanes.iter_mut().find_map(|lane| {
            let index = lane.iter().position(|job| &job.id == id)?;
            lane.remove(index)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobSpec, JobType};

    fn job(id: &str, priority: Priority, created_at: i64) -> Job {
        Job::new(
            id,
            created_at,
            JobSpec::new(JobType::Image, serde_json::json!({})).with_priority(priority),
        )
    }

    fn drain(queue: &mut PriorityJobQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue()).map(|j| j.id).collect()
    }

    #[test]
    fn test_dequeue_priority_then_fifo() {
        let mut queue = PriorityJobQueue::new();
        queue.enqueue(job("A", Priority::Low, 1));
        queue.enqueue(job("B", Priority::Urgent, 2));
        queue.enqueue(job("C", Priority::Normal, 3));
        queue.enqueue(job("D", Priority::Urgent, 4));
        queue.enqueue(job("E", Priority::High, 5));

        assert_eq!(drain(&mut queue), vec!["B", "D", "E", "C", "A"]);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = PriorityJobQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.peek().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.get_stats(), QueueStats::default());
    }

    #[test]
    fn test_duplicate_enqueue_rejected() {
        let mut queue = PriorityJobQueue::new();
        assert!(queue.enqueue(job("A", Priority::Low, 1)));
        assert!(!queue.enqueue(job("A", Priority::Urgent, 1)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().map(|j| j.priority), Some(Priority::Low));
    }

    #[test]
    fn test_remove_and_peek_across_lanes() {
        let mut queue = PriorityJobQueue::new();
        queue.enqueue(job("A", Priority::Low, 1));
        queue.enqueue(job("B", Priority::High, 2));

        assert_eq!(queue.peek().map(|j| j.id.as_str()), Some("B"));
        assert!(queue.remove(&"B".to_string()));
        assert!(!queue.remove(&"B".to_string()));
        assert_eq!(queue.peek().map(|j| j.id.as_str()), Some("A"));
    }

    #[test]
    fn test_update_priority_moves_to_tail() {
        let mut queue = PriorityJobQueue::new();
        queue.enqueue(job("A", Priority::High, 1));
        queue.enqueue(job("B", Priority::High, 2));
        queue.enqueue(job("C", Priority::Low, 3));

        assert!(queue.update_priority(&"C".to_string(), Priority::High));
        // Same priority keeps position
        assert!(queue.update_priority(&"A".to_string(), Priority::High));
        assert!(!queue.update_priority(&"missing".to_string(), Priority::Urgent));

        let snapshot: Vec<String> = queue.snapshot().into_iter().map(|j| j.id).collect();
        assert_eq!(snapshot, vec!["A", "B", "C"]);
        assert_eq!(queue.snapshot()[2].priority, Priority::High);
        assert_eq!(drain(&mut queue), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_stats_and_cleanup() {
        let mut queue = PriorityJobQueue::new();
        queue.enqueue(job("old-low", Priority::Low, 100));
        queue.enqueue(job("old-high", Priority::High, 200));
        queue.enqueue(job("new-high", Priority::High, 9_000));

        let stats = queue.get_stats();
        assert_eq!(stats.high, 2);
        assert_eq!(stats.low, 1);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.oldest_created_at, Some(100));

        let evicted = queue.cleanup(5_000, 10_000);
        let mut ids: Vec<String> = evicted.into_iter().map(|j| j.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["old-high", "old-low"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&"new-high".to_string()));
    }
}
