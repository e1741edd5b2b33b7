//! Quiescence-window debouncing

use std::time::{Duration, Instant};

use super::Sections;

/// Accumulates invalidations until no new one arrived for `window`.
///
/// Pure state machine; the caller supplies the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    pending: Sections,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Sections::NONE,
            deadline: None,
        }
    }

    /// Record a change seen at `now`; each one restarts the quiet period
    pub fn push(&mut self, sections: Sections, now: Instant) {
        if sections.is_empty() {
            return;
        }
        self.pending |= sections;
        self.deadline = Some(now + self.window);
    }

    /// When the pending batch becomes due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the batch if the quiet period has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<Sections> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.deadline.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_collapses_into_one_batch() {
        let start = Instant::now();
        let window = Duration::from_millis(100);
        let mut debouncer = Debouncer::new(window);

        debouncer.push(Sections::STATUS, start);
        debouncer.push(Sections::REFS, start + Duration::from_millis(60));
        debouncer.push(Sections::DIFF, start + Duration::from_millis(120));

        // still inside the window of the last change
        assert_eq!(debouncer.poll(start + Duration::from_millis(200)), None);
        let batch = debouncer.poll(start + Duration::from_millis(220)).unwrap();
        assert_eq!(batch, Sections::STATUS | Sections::REFS | Sections::DIFF);
        assert!(debouncer.is_idle());
        assert_eq!(debouncer.poll(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_ignored_changes_do_not_arm() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.push(Sections::NONE, now);
        assert!(debouncer.is_idle());
        assert_eq!(debouncer.deadline(), None);
    }
}
