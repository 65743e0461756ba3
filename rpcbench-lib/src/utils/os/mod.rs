use std::time::{Duration, Instant};

#[cfg(target_family = "unix")]
mod unix;

#[cfg(target_family = "unix")]
pub use self::unix::{raise_nofile, rlim_t};

/// CPU time consumed by this process so far, user and system time combined.
///
/// Returns `None` on platforms where it cannot be queried.
pub fn process_cpu_time() -> Option<Duration> {
    #[cfg(target_family = "unix")]
    {
        self::unix::process_cpu_time()
    }
    #[cfg(not(target_family = "unix"))]
    {
        None
    }
}

/// Tracks process CPU time between marks.
#[derive(Debug, Clone, Copy)]
pub struct CpuTimeMark {
    last: Option<Duration>,
}

impl CpuTimeMark {
    pub fn now() -> Self {
        Self {
            last: process_cpu_time(),
        }
    }

    /// CPU time spent since this mark was taken, in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        match (self.last, process_cpu_time()) {
            (Some(last), Some(now)) => now.saturating_sub(last).as_secs_f64(),
            _ => 0.,
        }
    }
}

/// Wall clock and CPU time since the start of a statistics window.
#[derive(Debug, Clone, Copy)]
pub struct UsageWindow {
    started: Instant,
    cpu: CpuTimeMark,
}

impl UsageWindow {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            cpu: CpuTimeMark::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn cpu_secs(&self) -> f64 {
        self.cpu.elapsed_secs()
    }
}
