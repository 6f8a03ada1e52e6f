use crate::config::BackoffConfig;
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_FACTOR: f64 = 2.0;
pub const DEFAULT_JITTER: bool = false;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// A single configuration override applied on top of the defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackoffOption {
    MinDelay(Duration),
    MaxDelay(Duration),
    Factor(f64),
    Jitter(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Exponential backoff delay generator.
///
/// Each call to [`Backoff::next_delay`] returns `min_delay * factor^attempts`
/// (optionally jittered) and advances the attempt counter. Once the delay
/// would exceed `max_delay` the generator saturates: it keeps returning
/// `max_delay` and the counter stops moving until [`Backoff::reset`].
///
/// The counter is atomic, so one instance can be shared across threads
/// behind an `Arc`.
#[derive(Debug)]
pub struct Backoff {
    attempts: AtomicU64,
    factor: f64,
    jitter: bool,
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_options(std::iter::empty())
    }

    /// Builds a generator from the defaults, then applies `opts` in order.
    /// Zero-valued delays or factor left over after the options are replaced
    /// with the defaults.
    pub fn with_options<I>(opts: I) -> Self
    where
        I: IntoIterator<Item = BackoffOption>,
    {
        let mut bo = Backoff {
            attempts: AtomicU64::new(0),
            factor: DEFAULT_FACTOR,
            jitter: DEFAULT_JITTER,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        };
        for opt in opts {
            bo.apply(opt);
        }
        bo.fill_zero_defaults();
        bo
    }

    pub fn from_config(cfg: &BackoffConfig) -> Self {
        Self::with_options([
            BackoffOption::MinDelay(cfg.min_delay),
            BackoffOption::MaxDelay(cfg.max_delay),
            BackoffOption::Factor(cfg.factor),
            BackoffOption::Jitter(cfg.jitter),
        ])
    }

    pub fn builder() -> BackoffBuilder {
        BackoffBuilder::default()
    }

    fn apply(&mut self, opt: BackoffOption) {
        match opt {
            BackoffOption::MinDelay(d) => self.min_delay = d,
            BackoffOption::MaxDelay(d) => self.max_delay = d,
            BackoffOption::Factor(f) => self.factor = f,
            BackoffOption::Jitter(j) => self.jitter = j,
        }
    }

    fn fill_zero_defaults(&mut self) {
        if self.min_delay.is_zero() {
            self.min_delay = DEFAULT_MIN_DELAY;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        if self.factor == 0.0 {
            self.factor = DEFAULT_FACTOR;
        }
    }

    /// Computes the next delay and advances the counter unless saturated.
    pub fn next_delay(&self) -> Duration {
        let attempts = self.attempts.load(Ordering::SeqCst);
        let min = self.min_delay.as_nanos() as f64;
        let mut dur = min * self.factor.powf(attempts as f64);
        if self.jitter {
            let r: f64 = thread_rng().gen();
            dur = r * (dur - min) + min;
        }
        if dur > self.max_delay.as_nanos() as f64 {
            debug!(attempts, max = ?self.max_delay, "backoff saturated");
            return self.max_delay;
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = if dur < u64::MAX as f64 {
            // `as` saturates: negative and NaN land on zero
            Duration::from_nanos(dur as u64)
        } else {
            // past u64 nanoseconds; only reachable with a max_delay of centuries
            Duration::try_from_secs_f64(dur / 1e9).unwrap_or(self.max_delay)
        };
        trace!(attempts, ?delay, "backoff delay");
        delay
    }

    /// Blocks the current thread for the next delay.
    pub fn sleep(&self) {
        let delay = self.next_delay();
        debug!(?delay, "sleeping");
        std::thread::sleep(delay);
    }

    /// Sleeps for the next delay unless `cancel` fires first.
    ///
    /// The timer is dropped on both paths, so nothing stays registered with
    /// the runtime once this returns.
    pub async fn sleep_cancelable(&self, cancel: &CancellationToken) -> SleepOutcome {
        let delay = self.next_delay();
        debug!(?delay, "sleeping (cancelable)");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => SleepOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
        };
        debug!(?outcome, "sleep finished");
        outcome
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        debug!("backoff reset");
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempts_usize(&self) -> usize {
        usize::try_from(self.attempts()).unwrap_or(usize::MAX)
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }
}

/// Chained alternative to [`Backoff::with_options`].
#[derive(Clone, Debug, Default)]
pub struct BackoffBuilder {
    opts: Vec<BackoffOption>,
}

impl BackoffBuilder {
    pub fn min_delay(mut self, d: Duration) -> Self {
        self.opts.push(BackoffOption::MinDelay(d));
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.opts.push(BackoffOption::MaxDelay(d));
        self
    }

    pub fn factor(mut self, f: f64) -> Self {
        self.opts.push(BackoffOption::Factor(f));
        self
    }

    pub fn jitter(mut self, j: bool) -> Self {
        self.opts.push(BackoffOption::Jitter(j));
        self
    }

    pub fn build(self) -> Backoff {
        Backoff::with_options(self.opts)
    }
}
