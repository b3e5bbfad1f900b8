use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// What a deadline fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    /// Periodic RTCP report emission.
    SendReport,
    /// Give up waiting for a reordered packet on this source.
    ExpirePending { ssrc: u32 },
    /// Drain queued congestion receive records into a feedback report.
    FlushCongestionFeedback,
    /// Purge receivers that went silent.
    CheckStaleReceivers,
}

/// A priority queue of `(deadline, action)` drained by the session's
/// `handle_timeout`. Deadlines are advisory: firing late merely delays a
/// report or prolongs a reorder window.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<(Instant, Action)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn schedule(&mut self, deadline: Instant, action: Action) {
        self.heap.push(Reverse((deadline, action)));
    }

    /// The earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((t, _))| *t)
    }

    /// Pops every action whose deadline has passed, in deadline order.
    /// Duplicate entries for the same action collapse to one.
    pub fn poll(&mut self, now: Instant) -> Vec<Action> {
        let mut due = vec![];
        while let Some(Reverse((t, _))) = self.heap.peek() {
            if *t > now {
                break;
            }
            let Some(Reverse((_, action))) = self.heap.pop() else {
                break;
            };
            if !due.contains(&action) {
                due.push(action);
            }
        }
        due
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let now = Instant::now();
        let mut s = Scheduler::new();
        s.schedule(now + Duration::from_millis(40), Action::SendReport);
        s.schedule(now + Duration::from_millis(10), Action::ExpirePending { ssrc: 7 });

        assert_eq!(s.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(s.poll(now).is_empty());

        let due = s.poll(now + Duration::from_millis(50));
        assert_eq!(
            due,
            vec![Action::ExpirePending { ssrc: 7 }, Action::SendReport]
        );
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn test_duplicates_collapse() {
        let now = Instant::now();
        let mut s = Scheduler::new();
        s.schedule(now, Action::SendReport);
        s.schedule(now, Action::SendReport);
        assert_eq!(s.poll(now), vec![Action::SendReport]);
    }
}
