//! Inter-request delay policies for benchmark lanes.

use std::time::Duration;

use rama::error::{BoxError, OpaqueError};
use rand::{SeedableRng as _, rngs::SmallRng};
use rand_distr::{Distribution as _, Exp};

/// How a lane paces its next request once the previous one completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadModel {
    /// Issue the next request as soon as the previous one completed.
    ClosedLoop,
    /// Open loop: exponentially distributed gaps with the given mean.
    Poisson { mean_interval: Duration },
}

impl LoadModel {
    /// Open loop model where `lane_count` lanes together offer
    /// `offered_load` requests per second.
    pub fn poisson(offered_load: f64, lane_count: usize) -> Result<Self, BoxError> {
        if !offered_load.is_finite() || offered_load <= 0. {
            return Err(OpaqueError::from_display(format!(
                "poisson offered load must be a positive rate, got {offered_load}"
            ))
            .into());
        }
        let mean_interval = Duration::try_from_secs_f64(lane_count.max(1) as f64 / offered_load).map_err(|_| {
            OpaqueError::from_display(format!(
                "poisson offered load {offered_load} is too low for {lane_count} lanes"
            ))
        })?;
        Ok(Self::Poisson { mean_interval })
    }

    /// Create the pacer of a single lane.
    pub fn lane_pacer(&self) -> LanePacer {
        self.lane_pacer_with_rng(SmallRng::from_os_rng())
    }

    fn lane_pacer_with_rng(&self, rng: SmallRng) -> LanePacer {
        let exp = match *self {
            Self::ClosedLoop => None,
            Self::Poisson { mean_interval } => {
                let mean = mean_interval.as_secs_f64();
                // a zero mean would mean an infinite rate, treat it as closed loop
                (mean > 0.).then(|| Exp::new(1. / mean)).and_then(Result::ok)
            }
        };
        LanePacer { exp, rng }
    }
}

/// Per lane pacing state; each lane owns its own random stream.
#[derive(Debug)]
pub struct LanePacer {
    exp: Option<Exp<f64>>,
    rng: SmallRng,
}

impl LanePacer {
    /// Time to wait before the next request, given how long the
    /// completed one already took.
    pub fn next_delay(&mut self, already_elapsed: Duration) -> Duration {
        let Some(exp) = self.exp else {
            return Duration::ZERO;
        };
        // draws of a huge mean may not fit a Duration
        let draw = Duration::try_from_secs_f64(exp.sample(&mut self.rng)).unwrap_or(Duration::MAX);
        draw.saturating_sub(already_elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(model: LoadModel, seed: u64) -> LanePacer {
        model.lane_pacer_with_rng(SmallRng::seed_from_u64(seed))
    }

    #[test]
    fn closed_loop_never_waits() {
        let mut p = seeded(LoadModel::ClosedLoop, 1);
        for elapsed in [Duration::ZERO, Duration::from_secs(1)] {
            assert_eq!(p.next_delay(elapsed), Duration::ZERO);
        }
    }

    #[test]
    fn poisson_mean_interval_scales_with_lanes() {
        let model = LoadModel::poisson(1000., 4).unwrap();
        assert_eq!(
            model,
            LoadModel::Poisson {
                mean_interval: Duration::from_millis(4)
            }
        );
    }

    #[test]
    fn poisson_rejects_non_positive_load() {
        assert!(LoadModel::poisson(0., 1).is_err());
        assert!(LoadModel::poisson(-5., 1).is_err());
        assert!(LoadModel::poisson(f64::NAN, 1).is_err());
    }

    #[test]
    fn poisson_rejects_load_too_low_to_represent() {
        assert!(LoadModel::poisson(1e-300, 4).is_err());
        assert!(LoadModel::poisson(f64::MIN_POSITIVE, 1).is_err());
        assert!(LoadModel::poisson(1e-9, 1).is_ok());
    }

    #[test]
    fn huge_mean_saturates_instead_of_overflowing() {
        let model = LoadModel::Poisson {
            mean_interval: Duration::MAX,
        };
        let mut p = seeded(model, 5);
        let delays: Vec<_> = (0..1_000).map(|_| p.next_delay(Duration::ZERO)).collect();
        // about a third of the draws exceed what a Duration holds
        assert!(delays.contains(&Duration::MAX));
        assert!(delays.iter().all(|d| *d > Duration::ZERO));
    }

    #[test]
    fn poisson_draws_converge_to_mean() {
        let model = LoadModel::poisson(100., 1).unwrap();
        let mut p = seeded(model, 2);

        let n = 20_000;
        let total: f64 = (0..n)
            .map(|_| p.next_delay(Duration::ZERO).as_secs_f64())
            .sum();
        let mean = total / n as f64;

        // expected mean is 10ms
        assert!((mean - 0.010).abs() < 0.0005, "mean = {mean}");
    }

    #[test]
    fn poisson_subtracts_elapsed_time() {
        let model = LoadModel::poisson(100., 1).unwrap();
        let mut a = seeded(model, 3);
        let mut b = seeded(model, 3);

        for _ in 0..100 {
            let full = a.next_delay(Duration::ZERO);
            let reduced = b.next_delay(Duration::from_millis(5));
            assert_eq!(reduced, full.saturating_sub(Duration::from_millis(5)));
        }

        // a call slower than any draw never waits
        assert_eq!(b.next_delay(Duration::from_secs(3600)), Duration::ZERO);
    }
}
