//! Physical plausibility checks
//!
//! An out-of-range value nearly always means a misaligned or corrupted
//! response rather than a real measurement, so a single violation rejects
//! the whole reading.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{MeterError, MeterResult};
use crate::parameter::Parameter;
use crate::reading::Reading;

/// Inclusive value range
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Per-parameter bounds; parameters without a bound are accepted as is.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    bounds: BTreeMap<Parameter, Bounds>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::empty()
            .with_bound(Parameter::Voltage, Bounds::new(100.0, 300.0))
            .with_bound(Parameter::Current, Bounds::new(0.0, 100.0))
            .with_bound(Parameter::Frequency, Bounds::new(45.0, 55.0))
            .with_bound(Parameter::PowerFactor, Bounds::new(-1.5, 1.5))
            .with_bound(Parameter::ActivePower, Bounds::new(-20_000.0, 20_000.0))
            .with_bound(Parameter::ReactivePower, Bounds::new(-20_000.0, 20_000.0))
            .with_bound(Parameter::ApparentPower, Bounds::new(0.0, 20_000.0))
    }
}

impl Validator {
    /// No bounds at all
    pub fn empty() -> Self {
        Self {
            bounds: BTreeMap::new(),
        }
    }

    pub fn with_bound(mut self, parameter: Parameter, bounds: Bounds) -> Self {
        self.bounds.insert(parameter, bounds);
        self
    }

    /// Merge configured bounds over the current set.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> MeterResult<Self>
    where
        I: IntoIterator<Item = (&'a Parameter, &'a Bounds)>,
    {
        for (&parameter, &bounds) in overrides {
            if bounds.min.is_nan() || bounds.max.is_nan() || bounds.min > bounds.max {
                return Err(MeterError::configuration(format!(
                    "validation bound for {}: min {} exceeds max {}",
                    parameter, bounds.min, bounds.max
                )));
            }
            self.bounds.insert(parameter, bounds);
        }
        Ok(self)
    }

    pub fn bound(&self, parameter: Parameter) -> Option<Bounds> {
        self.bounds.get(&parameter).copied()
    }

    pub fn check_value(&self, parameter: Parameter, value: f64) -> MeterResult<()> {
        match self.bounds.get(&parameter) {
            Some(b) if !b.contains(value) => Err(MeterError::Validation {
                parameter,
                value,
                min: b.min,
                max: b.max,
            }),
            _ => Ok(()),
        }
    }

    /// Accept the reading only if every decoded value is within bounds.
    /// Null values are not checked.
    pub fn validate(&self, reading: &Reading) -> MeterResult<()> {
        reading
            .present()
            .try_for_each(|(parameter, value)| self.check_value(parameter, value))
    }
}
