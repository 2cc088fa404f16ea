//! Three-tier priority queue feeding background preloads
//!
//! An item lives in exactly one tier. Adding at a higher tier promotes it;
//! adding at a lower tier than the one it already occupies is a no-op.
//! [`drain_slice`] takes items off the queue during one idle slot, bounded
//! by a per-item time budget and a batch cap.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::state::DeviceProfile;

/// Scheduling tier of a queued icon
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Deduplicating queue with high / normal / low tiers
#[derive(Debug, Default)]
pub struct PriorityQueue {
    high: IndexSet<String>,
    normal: IndexSet<String>,
    low: IndexSet<String>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_high(&mut self, item: impl Into<String>) {
        let item = item.into();
        self.normal.shift_remove(&item);
        self.low.shift_remove(&item);
        self.high.insert(item);
    }

    pub fn add_normal(&mut self, item: impl Into<String>) {
        let item = item.into();
        if self.high.contains(&item) {
            return;
        }
        self.low.shift_remove(&item);
        self.normal.insert(item);
    }

    pub fn add_low(&mut self, item: impl Into<String>) {
        let item = item.into();
        if self.high.contains(&item) || self.normal.contains(&item) {
            return;
        }
        self.low.insert(item);
    }

    pub fn add(&mut self, item: impl Into<String>, priority: Priority) {
        match priority {
            Priority::High => self.add_high(item),
            Priority::Normal => self.add_normal(item),
            Priority::Low => self.add_low(item),
        }
    }

    /// Remove and return the oldest item of the highest non-empty tier
    pub fn next(&mut self) -> Option<String> {
        [&mut self.high, &mut self.normal, &mut self.low]
            .into_iter()
            .find(|tier| !tier.is_empty())
            .and_then(|tier| tier.shift_remove_index(0))
    }

    /// Tier currently holding an item
    pub fn tier_of(&self, item: &str) -> Option<Priority> {
        if self.high.contains(item) {
            Some(Priority::High)
        } else if self.normal.contains(item) {
            Some(Priority::Normal)
        } else if self.low.contains(item) {
            Some(Priority::Low)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.high.clear();
        self.normal.clear();
        self.low.clear();
    }
}

/// Idle time left in the current slot
pub trait IdleDeadline {
    fn time_remaining(&self) -> Duration;

    /// The slot fired because its timeout elapsed, not because of idle time
    fn did_timeout(&self) -> bool;
}

/// Deadline measured from the start of an idle slot
#[derive(Debug, Clone, Copy)]
pub struct SlotDeadline {
    start: Instant,
    budget: Duration,
    timed_out: bool,
}

impl SlotDeadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
            timed_out: false,
        }
    }

    pub fn timed_out(budget: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::new(budget)
        }
    }
}

impl IdleDeadline for SlotDeadline {
    fn time_remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    fn did_timeout(&self) -> bool {
        self.timed_out
    }
}

/// How much preload work one idle slot may take
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DrainPolicy {
    /// Required idle time left before starting another item
    pub time_per_item_ms: u64,
    /// Items started per slot at most
    pub max_batch: usize,
    /// Wait before each idle slot
    pub slot_delay_ms: u64,
    /// Idle budget of one slot
    pub slot_budget_ms: u64,
}

impl DrainPolicy {
    pub fn for_profile(profile: DeviceProfile) -> Self {
        if profile.low_end {
            Self {
                time_per_item_ms: 2,
                max_batch: 2,
                slot_delay_ms: 25,
                slot_budget_ms: 16,
            }
        } else {
            Self {
                time_per_item_ms: 4,
                max_batch: 4,
                slot_delay_ms: 25,
                slot_budget_ms: 16,
            }
        }
    }

    pub fn time_per_item(&self) -> Duration {
        Duration::from_millis(self.time_per_item_ms)
    }

    pub fn slot_delay(&self) -> Duration {
        Duration::from_millis(self.slot_delay_ms)
    }

    pub fn slot_budget(&self) -> Duration {
        Duration::from_millis(self.slot_budget_ms)
    }
}

/// Take items off the queue for one idle slot, handing each to `kick`.
/// Returns how many items were started.
pub fn drain_slice<D, F>(
    queue: &mut PriorityQueue,
    deadline: &D,
    policy: &DrainPolicy,
    mut kick: F,
) -> usize
where
    D: IdleDeadline + ?Sized,
    F: FnMut(String),
{
    let mut processed = 0;

    while (deadline.time_remaining() > policy.time_per_item() || deadline.did_timeout())
        && processed < policy.max_batch
    {
        let Some(item) = queue.next() else {
            break;
        };
        kick(item);
        processed += 1;
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Endless;

    impl IdleDeadline for Endless {
        fn time_remaining(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn did_timeout(&self) -> bool {
            false
        }
    }

    struct Exhausted;

    impl IdleDeadline for Exhausted {
        fn time_remaining(&self) -> Duration {
            Duration::ZERO
        }

        fn did_timeout(&self) -> bool {
            false
        }
    }

    fn policy(max_batch: usize) -> DrainPolicy {
        DrainPolicy {
            time_per_item_ms: 4,
            max_batch,
            slot_delay_ms: 25,
            slot_budget_ms: 16,
        }
    }

    #[test]
    fn test_next_prefers_highest_tier() {
        let mut queue = PriorityQueue::new();
        queue.add_low("low");
        queue.add_normal("normal");
        queue.add_high("high");

        assert_eq!(queue.next().as_deref(), Some("high"));
        assert_eq!(queue.next().as_deref(), Some("normal"));
        assert_eq!(queue.next().as_deref(), Some("low"));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_promotion_moves_item() {
        let mut queue = PriorityQueue::new();
        queue.add_low("x");
        queue.add_normal("x");
        assert_eq!(queue.tier_of("x"), Some(Priority::Normal));
        queue.add_high("x");
        assert_eq!(queue.tier_of("x"), Some(Priority::High));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_no_demotion() {
        let mut queue = PriorityQueue::new();
        queue.add_high("x");
        queue.add_normal("x");
        queue.add_low("x");
        assert_eq!(queue.tier_of("x"), Some(Priority::High));

        queue.add_normal("y");
        queue.add_low("y");
        assert_eq!(queue.tier_of("y"), Some(Priority::Normal));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_item_in_one_tier_for_any_interleaving() {
        let ops = [Priority::Low, Priority::Normal, Priority::High];
        // Every sequence of three adds of the same item
        for a in ops {
            for b in ops {
                for c in ops {
                    let mut queue = PriorityQueue::new();
                    queue.add("item", a);
                    queue.add("item", b);
                    queue.add("item", c);
                    assert_eq!(queue.len(), 1);
                    assert_eq!(queue.tier_of("item"), Some(a.max(b).max(c)));
                }
            }
        }
    }

    #[test]
    fn test_fifo_within_tier() {
        let mut queue = PriorityQueue::new();
        queue.add_normal("a");
        queue.add_normal("b");
        queue.add_normal("c");
        assert_eq!(queue.next().as_deref(), Some("a"));
        assert_eq!(queue.next().as_deref(), Some("b"));
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert_eq!("low".parse::<Priority>(), Ok(Priority::Low));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_drain_respects_batch_cap() {
        for cap in [1, 2, 4, 7] {
            let mut queue = PriorityQueue::new();
            for i in 0..100 {
                queue.add_low(format!("icon-{}", i));
            }

            let mut total = 0;
            let mut slices = 0;
            while !queue.is_empty() {
                let mut started = Vec::new();
                let n = drain_slice(&mut queue, &Endless, &policy(cap), |item| started.push(item));
                assert!(n <= cap);
                assert_eq!(n, started.len());
                total += n;
                slices += 1;
            }

            assert_eq!(total, 100);
            assert_eq!(slices, (100 + cap - 1) / cap);
        }
    }

    #[test]
    fn test_drain_stops_without_idle_time() {
        let mut queue = PriorityQueue::new();
        queue.add_low("a");
        let n = drain_slice(&mut queue, &Exhausted, &policy(4), |_| {});
        assert_eq!(n, 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_runs_on_timeout_even_without_idle_time() {
        let mut queue = PriorityQueue::new();
        queue.add_low("a");
        queue.add_low("b");
        let deadline = SlotDeadline::timed_out(Duration::ZERO);
        let n = drain_slice(&mut queue, &deadline, &policy(4), |_| {});
        assert_eq!(n, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_takes_highest_tier_first() {
        let mut queue = PriorityQueue::new();
        queue.add_low("low");
        queue.add_high("high");
        let mut started = Vec::new();
        drain_slice(&mut queue, &Endless, &policy(1), |item| started.push(item));
        assert_eq!(started, vec!["high".to_string()]);
    }
}
