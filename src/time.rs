//! Tick-based time keeping.
//!
//! The engine owns no timers; it only stamps segments with the tick at which
//! they last left the sender and derives their age from a host-supplied
//! monotonic tick counter. Wrap of the counter is tolerated for durations
//! shorter than half its range.

/// A host-supplied monotonic tick counter.
pub type TickSource = fn() -> u32;

/// Converts host ticks into milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    now_ticks: TickSource,
    ms_per_tick: u32,
}

impl Clock {
    /// Create a clock from a tick source and the tick period in milliseconds.
    pub fn new(now_ticks: TickSource, ms_per_tick: u32) -> Clock {
        Clock {
            now_ticks,
            ms_per_tick,
        }
    }

    /// The current tick count.
    pub fn ticks(&self) -> u32 {
        (self.now_ticks)()
    }
}

/// Records the tick at which a segment last left the sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct TxTimer {
    born: u32,
}

impl TxTimer {
    /// Stamp the timer with the current tick.
    pub fn set(&mut self, clock: &Clock) {
        self.born = clock.ticks();
    }

    /// Age of the timer in milliseconds.
    pub fn age_ms(&self, clock: &Clock) -> u32 {
        clock
            .ticks()
            .wrapping_sub(self.born)
            .wrapping_mul(clock.ms_per_tick)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TICKS: AtomicU32 = AtomicU32::new(0);

    fn ticks() -> u32 {
        TICKS.load(Ordering::Relaxed)
    }

    #[test]
    fn age_follows_ticks() {
        let clock = Clock::new(ticks, 10);

        TICKS.store(100, Ordering::Relaxed);
        let mut timer = TxTimer::default();
        timer.set(&clock);
        assert_eq!(timer.age_ms(&clock), 0);

        TICKS.store(130, Ordering::Relaxed);
        assert_eq!(timer.age_ms(&clock), 300);

        // The tick counter may wrap between stamping and reading.
        TICKS.store(u32::MAX, Ordering::Relaxed);
        timer.set(&clock);
        TICKS.store(4, Ordering::Relaxed);
        assert_eq!(timer.age_ms(&clock), 50);
    }
}
