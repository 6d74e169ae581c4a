// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pressure bands for the admission tracking tables.
//!
//! Pressure is the ratio of timestamps currently tracked across all client
//! fingerprints to the configured budget. As the ratio climbs, the memory
//! guardian tightens the per-fingerprint history cap by a power-of-two
//! divisor so the tables shrink instead of growing without bound.
//!
//! # Example
//!
//! ```
//! use flow_gate::PressureLevel;
//!
//! // Plenty of headroom
//! let level = PressureLevel::from_pressure(0.4);
//! assert_eq!(level, PressureLevel::Normal);
//! assert_eq!(level.cap_divisor(), 1);
//!
//! // Approaching the budget - caps halve
//! let level = PressureLevel::from_pressure(0.85);
//! assert_eq!(level, PressureLevel::Elevated);
//! assert_eq!(level.cap_divisor(), 2);
//!
//! // Over budget - caps cut to an eighth
//! let level = PressureLevel::from_pressure(1.2);
//! assert_eq!(level, PressureLevel::Critical);
//! assert_eq!(level.cap_divisor(), 8);
//! ```

/// Tracking-table pressure level.
///
/// Four-tier cascade:
/// - **Normal** (< 80%): full history cap applies
/// - **Elevated** (80-90%): cap halves
/// - **Strained** (90-100%): cap quarters
/// - **Critical** (>= 100%): cap is an eighth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    #[default]
    Normal = 0,
    Elevated = 1,
    Strained = 2,
    Critical = 3,
}

impl PressureLevel {
    /// Calculate the level from a pressure ratio (0.0 → 1.0+).
    ///
    /// A NaN ratio maps to `Critical`; an accounting bug must never read
    /// as headroom.
    #[must_use]
    pub fn from_pressure(pressure: f64) -> Self {
        match pressure {
            p if p < 0.80 => Self::Normal,
            p if p < 0.90 => Self::Elevated,
            p if p < 1.00 => Self::Strained,
            _ => Self::Critical,
        }
    }

    /// Divisor applied to the per-fingerprint history cap at this level.
    #[must_use]
    pub fn cap_divisor(&self) -> usize {
        match self {
            Self::Normal => 1,
            Self::Elevated => 2,
            Self::Strained => 4,
            Self::Critical => 8,
        }
    }

    /// Whether the guardian is trimming harder than usual at this level.
    #[must_use]
    pub fn is_tightening(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Elevated => "Elevated - history caps halved",
            Self::Strained => "Strained - history caps quartered",
            Self::Critical => "Critical - tracking budget exceeded",
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
