// src/handler_pool.rs
//
// Pooled, reusable handler objects with adaptive min/max sizing.
//
// A `HandlerPool` configured with `min == initial == max == 1` behaves
// exactly like the source's `SingleInstancePool` (a single shared instance
// guarded by the pool's own lock) — no separate type is needed for that
// variant, see DESIGN.md.

use crate::error::ChopinError;
use crate::expected_inputs::ExpectedInput;
use crate::http::{BodyValue, Request};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// What a handler's `handle()` call produced, before the dispatcher turns
/// it into a `Response` body.
pub enum HandlerOutcome {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl From<HandlerOutcome> for BodyValue {
    fn from(o: HandlerOutcome) -> Self {
        match o {
            HandlerOutcome::Empty => BodyValue::Text(String::new()),
            HandlerOutcome::Text(s) => BodyValue::Text(s),
            HandlerOutcome::Bytes(b) => BodyValue::Bytes(b),
            HandlerOutcome::Json(v) => BodyValue::Json(v),
        }
    }
}

/// A pooled, reusable handler object.
///
/// `initialize` runs once, right after a request/response pair is bound
/// (the source's `initialize()` hook); `handle` runs the actual request
/// logic and returns the body to serialize, or a handler-class error.
pub trait Handler: Send {
    fn initialize(&mut self) {}

    fn expected_inputs(&self) -> Vec<ExpectedInput> {
        Vec::new()
    }

    fn handle(&mut self, req: &Request) -> Result<HandlerOutcome, ChopinError>;
}

pub type HandlerFactory = fn() -> Box<dyn Handler>;

/// A boxed, no-argument function handler — used for routes registered as
/// inline closures rather than a named `Handler` type.
pub struct FnHandler<F>(pub F)
where
    F: FnMut(&Request) -> Result<HandlerOutcome, ChopinError> + Send;

impl<F> Handler for FnHandler<F>
where
    F: FnMut(&Request) -> Result<HandlerOutcome, ChopinError> + Send,
{
    fn handle(&mut self, req: &Request) -> Result<HandlerOutcome, ChopinError> {
        (self.0)(req)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    factory: HandlerFactory,
    idle: VecDeque<Box<dyn Handler>>,
    total: usize,
    active: usize,
    hits: u64,
    misses: u64,
    min: usize,
    max: usize,
    acquire_count_since_resize: u64,
    last_resize: Instant,
}

/// Per-handler-class object pool with adaptive sizing.
///
/// Invariants: `total <= max`; `active <= total`; idle handlers carry no
/// request state until re-acquired; a released handler is cleared of its
/// previous binding before it rejoins the idle queue (trivially true here,
/// since `Request` is passed by reference rather than stored on the
/// handler).
pub struct HandlerPool {
    inner: Mutex<Inner>,
    resize_interval: Duration,
}

const MIN_ACQUIRES_BEFORE_RESIZE: u64 = 100;
const PREWARM_STEP: usize = 5;
const MAX_CAP: usize = 1000;

impl HandlerPool {
    pub fn new(factory: HandlerFactory, initial: usize, min: usize, max: usize) -> Self {
        Self::with_resize_interval(factory, initial, min, max, 10)
    }

    pub fn with_resize_interval(
        factory: HandlerFactory,
        initial: usize,
        min: usize,
        max: usize,
        resize_interval_secs: u64,
    ) -> Self {
        let max = max.min(MAX_CAP).max(min).max(1);
        let min = min.min(max);
        let initial = initial.clamp(min, max);
        let mut idle = VecDeque::with_capacity(initial);
        for _ in 0..initial {
            idle.push_back((factory)());
        }
        Self {
            inner: Mutex::new(Inner {
                factory,
                idle,
                total: initial,
                active: 0,
                hits: 0,
                misses: 0,
                min,
                max,
                acquire_count_since_resize: 0,
                last_resize: Instant::now(),
            }),
            resize_interval: Duration::from_secs(resize_interval_secs.max(1)),
        }
    }

    /// Acquire a handler. Returns `None` when the pool is saturated
    /// (`total == max` and no idle handler is available) — rather than
    /// busy-spinning the worker thread (which would stall every other
    /// connection on this reactor core), the caller treats `None` as
    /// transient pool exhaustion and responds accordingly. See DESIGN.md.
    pub fn acquire(&self) -> Option<Box<dyn Handler>> {
        let mut inner = self.inner.lock().unwrap();
        inner.acquire_count_since_resize += 1;
        self.maybe_resize(&mut inner);

        if let Some(mut h) = inner.idle.pop_front() {
            inner.hits += 1;
            inner.active += 1;
            h.initialize();
            return Some(h);
        }

        if inner.total < inner.max {
            inner.misses += 1;
            inner.total += 1;
            inner.active += 1;
            let mut h = (inner.factory)();
            h.initialize();
            return Some(h);
        }

        inner.misses += 1;
        None
    }

    pub fn release(&self, handler: Box<dyn Handler>) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = inner.active.saturating_sub(1);
        inner.idle.push_back(handler);
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        PoolStats {
            total: inner.total,
            active: inner.active,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Unifies the source's two overlapping adaptive-sizing policies
    /// (acquire-driven and periodic-monitor) into the single policy
    /// described in spec.md §4.8 / §9: run on a 10s wall-clock cadence OR
    /// after 100 acquisitions, whichever comes first.
    fn maybe_resize(&self, inner: &mut Inner) {
        let elapsed = inner.last_resize.elapsed();
        if elapsed < self.resize_interval && inner.acquire_count_since_resize < MIN_ACQUIRES_BEFORE_RESIZE {
            return;
        }

        let attempts = inner.hits + inner.misses;
        let miss_ratio = if attempts > 0 {
            inner.misses as f64 / attempts as f64
        } else {
            0.0
        };

        if miss_ratio > 0.2 && inner.total < inner.max {
            let grow = PREWARM_STEP.min(inner.max - inner.total);
            for _ in 0..grow {
                inner.idle.push_back((inner.factory)());
                inner.total += 1;
            }
            trace!(grew = grow, total = inner.total, "handler pool pre-warmed");
        } else if inner.idle.len() > 2 * inner.min && inner.total > inner.min {
            let shrink = inner.total - inner.min;
            for _ in 0..shrink {
                if inner.idle.pop_back().is_none() {
                    break;
                }
                inner.total -= 1;
            }
            trace!(total = inner.total, "handler pool shrunk to min");
        }

        // Periodic max adjustment folded into the same pass.
        if inner.total > 0 {
            let ratio = inner.active as f64 / inner.total as f64;
            if ratio > 0.8 {
                inner.max = (inner.max + PREWARM_STEP).min(MAX_CAP);
            } else if ratio < 0.2 && inner.max > inner.min {
                inner.max = (inner.max - PREWARM_STEP).max(inner.min);
            }
        }

        inner.hits = 0;
        inner.misses = 0;
        inner.acquire_count_since_resize = 0;
        inner.last_resize = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl Handler for Echo {
        fn handle(&mut self, _req: &Request) -> Result<HandlerOutcome, ChopinError> {
            Ok(HandlerOutcome::Text("ok".into()))
        }
    }
    fn make_echo() -> Box<dyn Handler> {
        Box::new(Echo)
    }

    fn req() -> Request {
        Request::new(
            crate::parser::Method::Get,
            "/",
            Default::default(),
            Default::default(),
            Vec::new(),
            "127.0.0.1",
        )
    }

    #[test]
    fn acquire_and_release_respect_total_and_active() {
        let pool = HandlerPool::new(make_echo, 1, 1, 2);
        let h1 = pool.acquire().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert!(stats.total <= 2);
        pool.release(h1);
        assert_eq!(pool.stats().active, 0);
    }

    #[test]
    fn saturated_pool_returns_none() {
        let pool = HandlerPool::new(make_echo, 1, 1, 1);
        let h1 = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        pool.release(h1);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn single_instance_pool_is_min_eq_max_eq_one() {
        let pool = HandlerPool::new(make_echo, 1, 1, 1);
        assert_eq!(pool.stats().total, 1);
        let h = pool.acquire().unwrap();
        let mut h = h;
        let outcome = h.handle(&req()).unwrap();
        assert!(matches!(outcome, HandlerOutcome::Text(s) if s == "ok"));
        pool.release(h);
    }
}
