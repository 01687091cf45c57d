//! Probabilistic drift marking.
//!
//! A single low observation is weak evidence of drift, so only `rate` out of
//! ten such observations flag the resource for repair.

use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use rand::Rng;
use reservoir_core::constants::MAX_AUTO_ADJUST_RATE;

use crate::error::ResourceError;

#[derive(Debug)]
pub struct AutoAdjust {
    rate: AtomicU8,
}

impl AutoAdjust {
    pub fn new(rate: u8) -> Self {
        debug_assert!(rate <= MAX_AUTO_ADJUST_RATE, "ADJUST: rate must be validated by config");
        Self {
            rate: AtomicU8::new(rate.min(MAX_AUTO_ADJUST_RATE)),
        }
    }

    pub fn rate(&self) -> u8 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn set_rate(&self, rate: u8) -> Result<(), ResourceError> {
        if rate > MAX_AUTO_ADJUST_RATE {
            return Err(ResourceError::run(format!(
                "auto adjust rate must be between 0 and {MAX_AUTO_ADJUST_RATE}, got {rate}"
            )));
        }
        self.rate.store(rate, Ordering::Relaxed);
        Ok(())
    }

    pub fn should_adjust(&self) -> bool {
        let draw = rand::rng().random_range(0..MAX_AUTO_ADJUST_RATE);
        is_adjust_draw(draw, self.rate())
    }
}

/// A draw in `[0, 10)` triggers an adjustment when it falls below `rate`.
#[inline]
pub fn is_adjust_draw(draw: u8, rate: u8) -> bool {
    draw < rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_zero_never_adjusts() {
        let adjust = AutoAdjust::new(0);
        assert!((0..1000).all(|_| !adjust.should_adjust()));
    }

    #[test]
    fn test_rate_ten_always_adjusts() {
        let adjust = AutoAdjust::new(10);
        assert!((0..1000).all(|_| adjust.should_adjust()));
    }

    #[test]
    fn test_draw_threshold() {
        assert!(is_adjust_draw(2, 3));
        assert!(!is_adjust_draw(3, 3));
        assert!(!is_adjust_draw(0, 0));
        assert!(is_adjust_draw(9, 10));
    }

    #[test]
    fn test_set_rate_bounds() {
        let adjust = AutoAdjust::new(3);
        adjust.set_rate(10).unwrap();
        assert_eq!(adjust.rate(), 10);
        assert!(adjust.set_rate(11).is_err());
        assert_eq!(adjust.rate(), 10);
    }
}
