//! Run-scoped wall-clock timer.

use std::time::{Duration, Instant};

/// Measures one run. Owned by the orchestrator, not global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTimer {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl RunTimer {
    /// Timer that has not started yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) timing.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.stopped_at = None;
    }

    /// Freeze the elapsed time. No-op unless running.
    pub fn stop(&mut self) {
        if self.started_at.is_some() && self.stopped_at.is_none() {
            self.stopped_at = Some(Instant::now());
        }
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.stopped_at.is_none()
    }

    /// Time measured so far; zero if never started.
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => stop.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Elapsed time for humans.
    pub fn time_string(&self) -> String {
        format_elapsed(self.elapsed())
    }
}

/// `"4.20 seconds"`, or `"2 minutes 3.00 seconds"` past one minute.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2} seconds");
    }
    let minutes = elapsed.as_secs() / 60;
    let rest = secs - (minutes * 60) as f64;
    let unit = if minutes == 1 { "minute" } else { "minutes" };
    format!("{minutes} {unit} {rest:.2} seconds")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_timer_reads_zero() {
        let timer = RunTimer::new();
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed(), Duration::ZERO);
        assert_eq!(timer.time_string(), "0.00 seconds");
    }

    #[test]
    fn stop_freezes_elapsed() {
        let mut timer = RunTimer::new();
        timer.start();
        assert!(timer.is_running());
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        let frozen = timer.elapsed();
        assert!(frozen >= Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.elapsed(), frozen);
        assert!(!timer.is_running());
    }

    #[test]
    fn formats_minutes() {
        assert_eq!(format_elapsed(Duration::from_millis(4200)), "4.20 seconds");
        assert_eq!(
            format_elapsed(Duration::from_secs(63)),
            "1 minute 3.00 seconds"
        );
        assert_eq!(
            format_elapsed(Duration::from_secs(150)),
            "2 minutes 30.00 seconds"
        );
    }
}
