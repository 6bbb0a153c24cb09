use std::fmt;
use std::ops::{Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Fixed-point scalar with 4 decimal places of precision.
///
/// Rate multipliers, power ratios, and illumination levels all go through
/// this type so two runs with the same seed agree bit-for-bit regardless of
/// host float settings. Only the operations the rate pipeline needs are
/// implemented.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Scalar(i64);

impl Scalar {
    pub const SCALE: i64 = 10_000;

    pub fn from_f32(value: f32) -> Self {
        Self((value * Self::SCALE as f32).round() as i64)
    }

    pub fn from_u32(value: u32) -> Self {
        Self(i64::from(value) * Self::SCALE)
    }

    /// `numerator / denominator` without an intermediate float.
    pub fn ratio(numerator: u32, denominator: u32) -> Self {
        if denominator == 0 {
            return Self::zero();
        }
        Self(i64::from(numerator) * Self::SCALE / i64::from(denominator))
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn one() -> Self {
        Self(Self::SCALE)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    /// Round to the nearest whole tick count, never below 1. This is the
    /// terminal step of the rate pipeline.
    pub fn to_rate(self) -> u32 {
        let ticks = (self.0 + Self::SCALE / 2) / Self::SCALE;
        ticks.max(1) as u32
    }

    /// Round to the nearest non-negative integer.
    pub fn round_to_u32(self) -> u32 {
        ((self.0 + Self::SCALE / 2) / Self::SCALE).max(0) as u32
    }
}

impl Mul for Scalar {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(self.0 * rhs.0 / Self::SCALE)
    }
}

impl Div for Scalar {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self(self.0 * Self::SCALE / rhs.0)
    }
}

impl Sub for Scalar {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f32())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_f32())
    }
}
