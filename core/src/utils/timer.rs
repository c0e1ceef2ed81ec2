//! Execution timing
//!
//! Measures wall-clock time of a query or scan and flags runs that cross a
//! slow threshold.

use log::{debug, warn};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::{Duration, Instant};

/// Timer for measuring execution time
#[derive(Debug, Clone)]
pub struct Timer {
    /// Name used in log lines
    name: String,

    /// Start time
    start: Instant,

    /// Elapsed time above which a run is reported as slow
    warning_threshold: Option<Duration>,
}

impl Timer {
    /// Start a timer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Timer {
            name: name.into(),
            start: Instant::now(),
            warning_threshold: None,
        }
    }

    /// Set the slow threshold
    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in whole milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Whether the slow threshold has been crossed
    pub fn has_warning(&self) -> bool {
        self.warning_threshold
            .map(|threshold| self.elapsed() > threshold)
            .unwrap_or(false)
    }

    /// Log the elapsed time and return it in milliseconds
    ///
    /// Slow runs are logged at warn level, everything else at debug.
    pub fn finish(&self, message: impl AsRef<str>) -> u64 {
        let elapsed_ms = self.elapsed_ms();
        if self.has_warning() {
            warn!("{} {} took {}ms [SLOW]", self.name, message.as_ref(), elapsed_ms);
        } else {
            debug!("{} {} took {}ms", self.name, message.as_ref(), elapsed_ms);
        }
        elapsed_ms
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {:?}", self.name, self.elapsed())
    }
}
