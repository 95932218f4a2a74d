//! Point-in-time readings
//!
//! A [`Reading`] is built fresh every cycle for one meter and discarded once
//! delivered. Parameters that failed to decode stay in the map as `None` so
//! that the summary line can report them; deliveries only ever carry decoded
//! values.

use std::collections::BTreeMap;

use crate::parameter::{Cadence, Parameter};

/// Decoded values of one delivery, keyed by parameter
pub type ReadingValues = BTreeMap<Parameter, f64>;

/// One meter's values for one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub meter: String,
    /// Unix seconds of the cycle
    pub timestamp: i64,
    pub values: BTreeMap<Parameter, Option<f64>>,
}

impl Reading {
    pub fn new(meter: impl Into<String>, timestamp: i64) -> Self {
        Self {
            meter: meter.into(),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with_values(
        meter: impl Into<String>,
        timestamp: i64,
        values: BTreeMap<Parameter, Option<f64>>,
    ) -> Self {
        Self {
            meter: meter.into(),
            timestamp,
            values,
        }
    }

    pub fn insert(&mut self, parameter: Parameter, value: Option<f64>) {
        self.values.insert(parameter, value);
    }

    /// Decoded value of `parameter`, if it was read and decoded
    pub fn get(&self, parameter: Parameter) -> Option<f64> {
        self.values.get(&parameter).copied().flatten()
    }

    /// Parameters attempted this cycle
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameters that decoded
    pub fn decoded_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    /// Decoded values only
    pub fn present(&self) -> impl Iterator<Item = (Parameter, f64)> + '_ {
        self.values
            .iter()
            .filter_map(|(&p, v)| v.map(|value| (p, value)))
    }

    /// Decoded values of one cadence class
    pub fn subset(&self, cadence: Cadence) -> ReadingValues {
        self.present()
            .filter(|(p, _)| p.cadence() == cadence)
            .collect()
    }

    /// `(instant, minute)` subsets of the decoded values
    pub fn split(&self) -> (ReadingValues, ReadingValues) {
        self.present()
            .partition(|(p, _)| p.cadence() == Cadence::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_by_cadence_drops_nulls() {
        let mut reading = Reading::new("Meter 1", 1_700_000_000);
        reading.insert(Parameter::Voltage, Some(230.0));
        reading.insert(Parameter::Current, None);
        reading.insert(Parameter::ImportActiveEnergy, Some(1234.5));
        reading.insert(Parameter::MaximumPowerDemand, None);

        let (instant, minute) = reading.split();
        assert_eq!(instant.len(), 1);
        assert_eq!(instant.get(&Parameter::Voltage), Some(&230.0));
        assert_eq!(minute.len(), 1);
        assert_eq!(minute.get(&Parameter::ImportActiveEnergy), Some(&1234.5));

        assert_eq!(reading.len(), 4);
        assert_eq!(reading.decoded_count(), 2);
        assert_eq!(reading.subset(Cadence::Minute), minute);
    }

    #[test]
    fn test_get_flattens_missing_and_null() {
        let mut reading = Reading::new("Meter 1", 0);
        reading.insert(Parameter::Frequency, Some(50.0));
        reading.insert(Parameter::PowerFactor, None);
        assert_eq!(reading.get(Parameter::Frequency), Some(50.0));
        assert_eq!(reading.get(Parameter::PowerFactor), None);
        assert_eq!(reading.get(Parameter::Voltage), None);
    }

    #[test]
    fn test_empty_reading() {
        let reading = Reading::new("Meter 1", 0);
        assert!(reading.is_empty());
        let (instant, minute) = reading.split();
        assert!(instant.is_empty() && minute.is_empty());
    }
}
