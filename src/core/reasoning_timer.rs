use std::time::{Duration, Instant};

/// Timing update to apply to a reasoning block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningStatus {
    /// Nothing to record: no reasoning yet, or already frozen.
    Inactive,
    /// Reasoning is still open; the duration keeps growing.
    Open { duration_seconds: u64 },
    /// First answer token arrived (or the stream ended); duration is final.
    Finalized { duration_seconds: u64 },
}

impl ReasoningStatus {
    pub fn is_inactive(self) -> bool {
        self == ReasoningStatus::Inactive
    }
}

/// Wall-clock span from the first reasoning token to the first answer token.
#[derive(Debug, Clone, Default)]
pub struct ReasoningTimer {
    started_at: Option<Instant>,
    finalized: bool,
}

impl ReasoningTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_open(&self) -> bool {
        self.started_at.is_some() && !self.finalized
    }

    /// Starts the clock on the first reasoning text; later calls are ignored.
    pub fn observe_reasoning(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Status after a delta. `answer_arrived` freezes an open timer.
    pub fn status(&mut self, now: Instant, answer_arrived: bool) -> ReasoningStatus {
        let Some(started_at) = self.started_at else {
            return ReasoningStatus::Inactive;
        };
        if self.finalized {
            return ReasoningStatus::Inactive;
        }

        let duration_seconds = whole_seconds(now.saturating_duration_since(started_at));
        if answer_arrived {
            self.finalized = true;
            ReasoningStatus::Finalized { duration_seconds }
        } else {
            ReasoningStatus::Open { duration_seconds }
        }
    }

    /// Force-finalizes at end of stream when no answer ever arrived.
    pub fn finish(&mut self, now: Instant) -> ReasoningStatus {
        if self.is_open() {
            self.status(now, true)
        } else {
            ReasoningStatus::Inactive
        }
    }
}

/// Rounds up to whole seconds, never below one.
pub fn whole_seconds(elapsed: Duration) -> u64 {
    let mut seconds = elapsed.as_secs();
    if elapsed.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_reasoning_reports_one_second() {
        assert_eq!(whole_seconds(Duration::ZERO), 1);
        assert_eq!(whole_seconds(Duration::from_millis(10)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(whole_seconds(Duration::from_secs(3)), 3);
    }

    #[test]
    fn inactive_until_reasoning_is_seen() {
        let mut timer = ReasoningTimer::new();
        let now = Instant::now();
        assert_eq!(timer.status(now, false), ReasoningStatus::Inactive);
        assert_eq!(timer.status(now, true), ReasoningStatus::Inactive);
        assert_eq!(timer.finish(now), ReasoningStatus::Inactive);
    }

    #[test]
    fn duration_grows_while_open_and_freezes_on_answer() {
        let mut timer = ReasoningTimer::new();
        let start = Instant::now();
        timer.observe_reasoning(start);
        timer.observe_reasoning(start + Duration::from_secs(5));
        assert_eq!(timer.started_at(), Some(start));

        let mut last = 0;
        for step in [0u64, 400, 1_500, 2_200] {
            match timer.status(start + Duration::from_millis(step), false) {
                ReasoningStatus::Open { duration_seconds } => {
                    assert!(duration_seconds >= last);
                    last = duration_seconds;
                }
                other => panic!("expected open status, got {other:?}"),
            }
        }
        assert_eq!(last, 3);

        assert_eq!(
            timer.status(start + Duration::from_millis(3_500), true),
            ReasoningStatus::Finalized {
                duration_seconds: 4
            }
        );
        assert!(timer.is_finalized());
        assert_eq!(
            timer.status(start + Duration::from_secs(60), true),
            ReasoningStatus::Inactive
        );
        assert_eq!(
            timer.finish(start + Duration::from_secs(60)),
            ReasoningStatus::Inactive
        );
    }

    #[test]
    fn finish_finalizes_when_no_answer_arrived() {
        let mut timer = ReasoningTimer::new();
        let start = Instant::now();
        timer.observe_reasoning(start);
        assert_eq!(
            timer.finish(start + Duration::from_millis(2_500)),
            ReasoningStatus::Finalized {
                duration_seconds: 3
            }
        );
        assert!(!timer.is_open());
    }
}
