use crate::CoreError;

/// Floating point type used throughout system
pub type Real = f64;

/// One tolerance for everything
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}

/// Simulation time span `[start, stop]` in seconds.
///
/// Threaded through foreign-model construction so the runtime can set up
/// its experiment horizon before the first call.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSpan {
    pub start: Real,
    pub stop: Real,
}

impl TimeSpan {
    pub fn new(start: Real, stop: Real) -> Result<Self, CoreError> {
        if !start.is_finite() {
            return Err(CoreError::NonFinite {
                what: "span start",
                value: start,
            });
        }
        if !stop.is_finite() {
            return Err(CoreError::NonFinite {
                what: "span stop",
                value: stop,
            });
        }
        if stop < start {
            return Err(CoreError::InvalidArg {
                what: "span stop must not precede start",
            });
        }
        Ok(Self { start, stop })
    }

    pub fn duration(&self) -> Real {
        self.stop - self.start
    }
}

impl Default for TimeSpan {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 1.0,
        }
    }
}
