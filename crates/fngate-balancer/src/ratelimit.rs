//! Token-bucket rate limiting and tiered admission.
//!
//! A call must take one token from each enabled tier (function, tenant,
//! global) in that order. The first tier that refuses ends the attempt and
//! every token already taken is put back, so a denied call never leaves a
//! partial charge behind. Tiers are locked one at a time, never together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use fngate_state::RateLimit;

/// Admission tier that refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Function,
    Tenant,
    Global,
}

struct Bucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
    }
}

/// A token bucket holding up to `burst` tokens, refilled at `rate`
/// tokens per second. Starts full.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                capacity,
                rate: f64::from(limit.rate),
                tokens: capacity,
                last: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one token. Returns false, leaving the bucket untouched, when
    /// less than a whole token is available.
    pub fn get(&self) -> bool {
        let mut b = self.lock();
        b.refill();
        if b.tokens >= 1.0 {
            b.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Return one token taken by [`get`](Self::get). Never overfills.
    pub fn put(&self) {
        let mut b = self.lock();
        b.tokens = (b.tokens + 1.0).min(b.capacity);
    }

    /// Reconfigure in place, keeping the current fill level (clamped to
    /// the new capacity).
    pub fn update(&self, limit: RateLimit) {
        let mut b = self.lock();
        b.refill();
        b.capacity = f64::from(limit.burst.max(1));
        b.rate = f64::from(limit.rate);
        b.tokens = b.tokens.min(b.capacity);
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let mut b = self.lock();
        b.refill();
        b.tokens
    }

    pub fn limit(&self) -> RateLimit {
        let b = self.lock();
        RateLimit {
            burst: b.capacity as u32,
            rate: b.rate as u32,
        }
    }
}

/// Holder of an optional limiter whose presence can change at runtime
/// when a function or tenant toggles its rate limit.
#[derive(Default)]
pub struct LimiterSlot {
    limiter: RwLock<Option<Arc<RateLimiter>>>,
}

impl LimiterSlot {
    pub fn new(limit: Option<RateLimit>) -> Self {
        Self {
            limiter: RwLock::new(limit.map(|l| Arc::new(RateLimiter::new(l)))),
        }
    }

    pub fn current(&self) -> Option<Arc<RateLimiter>> {
        self.limiter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a new setting: update an existing limiter in place, create
    /// one if the tier was disabled, or drop it if the tier is disabled.
    pub fn apply(&self, limit: Option<RateLimit>) {
        let mut slot = self.limiter.write().unwrap_or_else(PoisonError::into_inner);
        match (slot.as_ref(), limit) {
            (Some(existing), Some(limit)) => existing.update(limit),
            (None, Some(limit)) => *slot = Some(Arc::new(RateLimiter::new(limit))),
            (_, None) => *slot = None,
        }
    }
}

/// Take one token from each enabled tier, in order. On the first refusal
/// every earlier token is returned in reverse order and the refusing tier
/// is reported; later tiers are never consulted.
pub fn admit(
    function: Option<&RateLimiter>,
    tenant: Option<&RateLimiter>,
    global: Option<&RateLimiter>,
) -> Result<(), Tier> {
    let tiers = [
        (Tier::Function, function),
        (Tier::Tenant, tenant),
        (Tier::Global, global),
    ];

    for (i, (tier, limiter)) in tiers.iter().enumerate() {
        let Some(limiter) = limiter else { continue };
        if !limiter.get() {
            for (_, taken) in tiers[..i].iter().rev() {
                if let Some(taken) = taken {
                    taken.put();
                }
            }
            return Err(*tier);
        }
    }
    Ok(())
}
