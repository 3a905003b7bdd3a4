use std::time::{Duration, Instant};

/// Paces a loop to a fixed period.
pub struct FpsLimiter {
    fps_control: Instant,
    fps_wait: Duration,
    last_ready: Option<Instant>,
}

impl FpsLimiter {
    pub fn new(fps: usize) -> Self {
        Self::with_period(Duration::from_nanos(1_000_000_000 / fps.max(1) as u64))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            fps_control: Instant::now(),
            fps_wait: period,
            last_ready: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.fps_wait
    }

    /// Sleeps for whatever is left of the current period and starts the next.
    pub fn wait(&mut self) {
        let elapsed = self.fps_control.elapsed();

        if self.fps_wait > elapsed {
            spin_sleep::sleep(self.fps_wait - elapsed);
        }

        self.fps_control = Instant::now();
    }

    /// Non-blocking check: true on the first call and then at most once per
    /// period.
    pub fn ready(&mut self) -> bool {
        match self.last_ready {
            Some(last) if last.elapsed() < self.fps_wait => false,
            _ => {
                self.last_ready = Some(Instant::now());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_from_fps() {
        assert_eq!(FpsLimiter::new(10).period(), Duration::from_millis(100));
        assert_eq!(FpsLimiter::new(0).period(), Duration::from_millis(1000));
    }

    #[test]
    fn high_rates_keep_a_non_zero_period() {
        assert_eq!(FpsLimiter::new(2000).period(), Duration::from_micros(500));
        assert!(FpsLimiter::new(1_000_000).period() > Duration::ZERO);
    }

    #[test]
    fn wait_fills_the_period() {
        let mut limiter = FpsLimiter::with_period(Duration::from_millis(20));
        let start = Instant::now();
        limiter.wait();
        limiter.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn ready_once_per_period() {
        let mut limiter = FpsLimiter::with_period(Duration::from_millis(50));
        assert!(limiter.ready());
        assert!(!limiter.ready());
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.ready());
        assert!(!limiter.ready());
    }
}
