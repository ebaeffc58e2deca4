use std::time::{Duration, Instant};

/// Wall clock for the render loop. [`FrameClock::delta`] returns the time since
/// the previous call, so every frame advances animation by exactly what elapsed.
#[derive(Debug, Clone)]
pub struct FrameClock {
    started: Instant,
    last: Instant,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::start()
    }
}

impl FrameClock {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::start();
    }

    /// Seconds since the previous call (or since the clock started).
    pub fn delta(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Leading-edge time gate: the first call passes, later calls pass only once
/// `interval` has elapsed since the last call that passed.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_pass: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pass: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` and records the pass when the gate is open at `now`.
    pub fn try_pass(&mut self, now: Instant) -> bool {
        if self.is_open(now) {
            self.last_pass = Some(now);
            true
        } else {
            false
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_pass {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}

/// Supplies frame deltas to a render loop. Returning `None` ends the loop.
pub trait FrameDriver {
    fn next_frame(&mut self) -> Option<f32>;
}

/// Produces a fixed delta for a bounded number of frames, without sleeping.
#[derive(Debug, Clone)]
pub struct FixedStepDriver {
    step: f32,
    remaining: Option<u64>,
}

impl FixedStepDriver {
    pub fn new(step: f32, frames: Option<u64>) -> Self {
        Self {
            step,
            remaining: frames,
        }
    }
}

impl FrameDriver for FixedStepDriver {
    fn next_frame(&mut self) -> Option<f32> {
        match self.remaining.as_mut() {
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some(self.step)
            }
            None => Some(self.step),
        }
    }
}

/// Paces frames to a target refresh rate and reports measured deltas.
#[derive(Debug)]
pub struct RealtimeDriver {
    clock: FrameClock,
    frame_interval: Duration,
    frame_start: Instant,
    remaining: Option<u64>,
}

impl RealtimeDriver {
    pub fn new(refresh_hz: u32, frames: Option<u64>) -> Self {
        let hz = refresh_hz.max(1);
        Self {
            clock: FrameClock::start(),
            frame_interval: Duration::from_secs_f64(1.0 / f64::from(hz)),
            frame_start: Instant::now(),
            remaining: frames,
        }
    }
}

impl FrameDriver for RealtimeDriver {
    fn next_frame(&mut self) -> Option<f32> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let busy = self.frame_start.elapsed();
        if busy < self.frame_interval {
            std::thread::sleep(self.frame_interval - busy);
        }
        self.frame_start = Instant::now();
        Some(self.clock.delta())
    }
}
