use std::num::NonZeroU64;

/// Linear ramp of one output parameter between two values over a whole
/// number of seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ramp {
    start: f64,
    end: f64,
    duration: NonZeroU64, // seconds
}

impl Ramp {
    pub fn new(start: f64, end: f64, duration: NonZeroU64) -> Self {
        Self {
            start,
            end,
            duration,
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> NonZeroU64 {
        self.duration
    }

    /// Value after `elapsed` seconds. Exact at both ends, held at `end` once
    /// the duration has passed.
    pub fn value_at(&self, elapsed: u64) -> f64 {
        let duration = self.duration.get();
        if elapsed == 0 {
            return self.start;
        }
        if elapsed >= duration {
            return self.end;
        }
        let value = (self.end - self.start) / duration as f64 * elapsed as f64 + self.start;
        // rounding must not step outside the ramp
        value.clamp(self.start.min(self.end), self.start.max(self.end))
    }
}
