//! Progress and throughput reporting.

use std::{fmt, time::Duration};

use crate::{catalog::TestId, Context};

/// Units for scaling byte counts.
const UNITS: [&str; 9] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

const MIB: f64 = 1024.0 * 1024.0;

/// Scales a byte count to the largest unit it fills at least once (multiples of 1024).
pub fn scale(bytes: u64) -> (f64, &'static str) {
    let mut value = bytes as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    (value, UNITS[unit])
}

/// Accumulated throughput samples in MB/s.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Throughput {
    total: f64,
    samples: u32,
}

impl Throughput {
    /// Adds a sample of `bytes` transferred within `elapsed`.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(1e-9);
        self.total += bytes as f64 / secs / MIB;
        self.samples += 1;
    }

    /// Number of recorded samples.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Sum of all samples.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Average over the recorded samples.
    ///
    /// Zero if nothing was measured.
    pub fn average(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total / self.samples as f64
        }
    }
}

/// Progress line of a running test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Test being run.
    pub test: TestId,
    /// Bytes read back and verified so far.
    pub transferred: u64,
    /// Average read and write throughput, present in the final report.
    pub throughput: Option<(f64, f64)>,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (amount, unit) = scale(self.transferred);
        write!(f, "test {:2}: sent {amount:10.1} {unit:>2}", self.test.number())?;
        match self.throughput {
            Some((read, write)) => write!(f, " read {read:10.1} MB/s write {write:10.1} MB/s ... "),
            None => write!(f, " read {:10} MB/s write {:10} MB/s ... ", "", ""),
        }
    }
}

impl Context {
    /// Current progress of `test`.
    ///
    /// Throughput averages are included if `show_throughput` is set.
    pub fn progress(&self, test: TestId, show_throughput: bool) -> Progress {
        Progress {
            test,
            transferred: self.transferred,
            throughput: show_throughput.then(|| (self.read_tput.average(), self.write_tput.average())),
        }
    }

    /// Emits the progress line of `test`.
    ///
    /// The line is rewritten in place on the output. If progress output is
    /// disabled it is logged instead.
    pub fn report(&mut self, test: TestId, show_throughput: bool) {
        let progress = self.progress(test, show_throughput);
        if self.progress {
            self.emit(&format!("\r{progress}"), false);
        } else {
            log::debug!("{progress}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{scale, Progress, Throughput};
    use crate::TestId;

    #[test]
    fn scaling() {
        assert_eq!(scale(0), (0.0, "B"));
        assert_eq!(scale(1023), (1023.0, "B"));
        assert_eq!(scale(12288), (12.0, "kB"));
        assert_eq!(scale(3 << 20), (3.0, "MB"));
        assert_eq!(scale(u64::MAX).1, "EB");
    }

    #[test]
    fn average_over_samples() {
        let mut tput = Throughput::default();
        assert_eq!(tput.average(), 0.0);

        tput.record(1 << 20, Duration::from_secs(1));
        tput.record(1 << 20, Duration::from_millis(500));
        assert_eq!(tput.samples(), 2);
        assert!((tput.average() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn progress_line() {
        let progress = Progress { test: TestId::Simple, transferred: 12288, throughput: None };
        let line = progress.to_string();
        assert!(line.starts_with("test  0: sent       12.0 kB"), "{line}");

        let progress = Progress { throughput: Some((20.0, 10.5)), ..progress };
        let line = progress.to_string();
        assert!(line.contains("read       20.0 MB/s write       10.5 MB/s"), "{line}");
    }
}
