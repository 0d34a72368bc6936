/// Timing handed to [`crate::MusicFeatureExtractor::step`] for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub delta_seconds: f64,
    pub now_ms: f64,
}

/// Monotonic frame clock for offline and fixed-rate drivers.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    pub time_seconds: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.time_seconds = 0.0;
    }

    /// Advances by `delta` seconds. Negative or NaN deltas count as zero.
    pub fn advance(&mut self, delta: f64) -> FrameTick {
        let delta = if delta.is_nan() { 0.0 } else { delta.max(0.0) };
        self.time_seconds += delta;
        FrameTick {
            delta_seconds: delta,
            now_ms: self.time_seconds * 1000.0,
        }
    }
}

/// Fixed-rate ticker producing `fps` frames per second.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    clock: PlaybackClock,
    frame_seconds: f64,
    frames: u64,
}

impl FrameScheduler {
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            clock: PlaybackClock::default(),
            frame_seconds: 1.0 / fps,
            frames: 0,
        }
    }

    pub fn frame_seconds(&self) -> f64 {
        self.frame_seconds
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn tick(&mut self) -> FrameTick {
        self.frames += 1;
        // derive from the frame count so long runs do not accumulate error
        let now = self.frames as f64 * self.frame_seconds;
        let delta = now - self.clock.time_seconds;
        self.clock.advance(delta)
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_ignores_backward_steps() {
        let mut clock = PlaybackClock::default();
        clock.advance(0.5);
        let tick = clock.advance(-1.0);
        assert_eq!(tick.delta_seconds, 0.0);
        assert_eq!(tick.now_ms, 500.0);
        assert_eq!(clock.advance(f64::NAN).now_ms, 500.0);
    }

    #[test]
    fn scheduler_ticks_at_fixed_rate() {
        let mut scheduler = FrameScheduler::new(50.0);
        let first = scheduler.tick();
        assert!((first.delta_seconds - 0.02).abs() < 1e-12);
        for _ in 1..500 {
            scheduler.tick();
        }
        let last = scheduler.tick();
        assert!((last.now_ms - 10_020.0).abs() < 1e-6);
        assert_eq!(scheduler.frames(), 501);
    }

    #[test]
    fn scheduler_rejects_bad_rates() {
        assert!((FrameScheduler::new(0.0).frame_seconds() - 1.0 / 60.0).abs() < 1e-12);
        assert!((FrameScheduler::new(f64::NAN).frame_seconds() - 1.0 / 60.0).abs() < 1e-12);
    }
}
