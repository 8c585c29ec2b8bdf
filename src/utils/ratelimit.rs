/// Outbound rate limiter for the payment gateway API (sliding one-second window)
use lazy_static::lazy_static;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Max requests per second the gateway accepts from one seller
const GATEWAY_MAX_REQUESTS: usize = 20;

lazy_static! {
    static ref GATEWAY_RATE_LIMITER: Mutex<SlidingWindowLimiter> =
        Mutex::new(SlidingWindowLimiter::new(GATEWAY_MAX_REQUESTS, Duration::from_secs(1)));
}

pub struct SlidingWindowLimiter {
    /// Timestamps of the requests inside the current window
    request_times: VecDeque<Instant>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            request_times: VecDeque::new(),
            max_requests,
            window,
        }
    }

    /// Record a request if there is room, otherwise return how long to wait
    pub fn check_and_record(&mut self) -> Duration {
        self.check_and_record_at(Instant::now())
    }

    fn check_and_record_at(&mut self, now: Instant) -> Duration {
        while let Some(&front) = self.request_times.front() {
            if now.duration_since(front) > self.window {
                self.request_times.pop_front();
            } else {
                break;
            }
        }

        if self.request_times.len() >= self.max_requests {
            if let Some(&oldest) = self.request_times.front() {
                let elapsed = now.duration_since(oldest);
                if elapsed < self.window {
                    return self.window - elapsed;
                }
            }
        }

        self.request_times.push_back(now);
        Duration::ZERO
    }
}

/// Wait until a slot in the gateway request budget is recorded
pub async fn rate_limit_gateway_api() {
    loop {
        let wait = {
            // Queue is still consistent after a panic elsewhere
            let mut limiter = GATEWAY_RATE_LIMITER
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            limiter.check_and_record()
        };

        if wait.is_zero() {
            return;
        }

        tracing::debug!("Gateway API rate limit: waiting {}ms", wait.as_millis());
        tokio::time::sleep(wait).await;
    }
}
