use super::stats::IncrementalStatistics;

/// Splits a flow's lifetime into active bursts and the idle gaps between
/// them, using the configured activity timeout as the boundary.
#[derive(Debug, Clone)]
pub struct ActiveIdleTracker {
    period_start: u64,
    period_end: u64,
    active: IncrementalStatistics,
    idle: IncrementalStatistics,
}

impl ActiveIdleTracker {
    pub fn new(start_time: u64) -> Self {
        Self {
            period_start: start_time,
            period_end: start_time,
            active: IncrementalStatistics::new(),
            idle: IncrementalStatistics::new(),
        }
    }

    /// Extend the current active period to `current_time`, or close it and
    /// record the idle gap when the gap exceeds `activity_timeout` (µs).
    pub fn rollover(&mut self, current_time: u64, activity_timeout: u64) {
        let gap = current_time.saturating_sub(self.period_end);
        if gap > activity_timeout {
            self.close_active_period();
            self.idle.add_value(gap as f64);
            self.period_start = current_time;
            self.period_end = current_time;
        } else {
            self.period_end = self.period_end.max(current_time);
        }
    }

    /// Flush the last active period at flow termination. When the flow was
    /// cut off by the observer rather than by a FIN, the time left until
    /// `flow_timeout` (measured from `flow_start`) is recorded as idle.
    pub fn finalize(&mut self, flow_start: u64, flow_timeout: u64, ended_by_flag: bool) {
        self.close_active_period();

        if !ended_by_flag {
            let elapsed = self.period_end.saturating_sub(flow_start);
            if flow_timeout > elapsed {
                self.idle.add_value((flow_timeout - elapsed) as f64);
            }
        }
    }

    fn close_active_period(&mut self) {
        let span = self.period_end.saturating_sub(self.period_start);
        if span > 0 {
            self.active.add_value(span as f64);
        }
    }

    #[inline]
    pub fn period_start(&self) -> u64 { self.period_start }

    #[inline]
    pub fn period_end(&self) -> u64 { self.period_end }

    pub fn active(&self) -> &IncrementalStatistics { &self.active }

    pub fn idle(&self) -> &IncrementalStatistics { &self.idle }
}
