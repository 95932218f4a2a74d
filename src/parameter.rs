//! Measurement identifiers and their register metadata
//!
//! The set of parameters is closed: a catalog or meter list naming anything
//! else is rejected at load time instead of being silently ignored.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::byte_order::BytePermutation;
use crate::constants::REGISTER_BYTES;
use crate::error::MeterError;
use crate::value::DataType;

/// How often a parameter is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// Every poll cycle, stamped with the cycle's wall-clock second
    Instant,
    /// Once per minute boundary, stamped with the minute
    Minute,
}

/// Every measurement the ingestion endpoint understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parameter {
    Voltage,
    Current,
    ActivePower,
    ApparentPower,
    ReactivePower,
    PowerFactor,
    PhaseAngle,
    Frequency,
    ImportActiveEnergy,
    ExportActiveEnergy,
    ImportReactiveEnergy,
    ExportReactiveEnergy,
    TotalActiveEnergy,
    TotalReactiveEnergy,
    PowerDemand,
    MaximumPowerDemand,
    CurrentDemand,
    MaximumCurrentDemand,
    ActivePowerDemand,
    MaximumActivePowerDemand,
    ApparentPowerDemand,
}

impl Parameter {
    pub const ALL: [Parameter; 21] = [
        Parameter::Voltage,
        Parameter::Current,
        Parameter::ActivePower,
        Parameter::ApparentPower,
        Parameter::ReactivePower,
        Parameter::PowerFactor,
        Parameter::PhaseAngle,
        Parameter::Frequency,
        Parameter::ImportActiveEnergy,
        Parameter::ExportActiveEnergy,
        Parameter::ImportReactiveEnergy,
        Parameter::ExportReactiveEnergy,
        Parameter::TotalActiveEnergy,
        Parameter::TotalReactiveEnergy,
        Parameter::PowerDemand,
        Parameter::MaximumPowerDemand,
        Parameter::CurrentDemand,
        Parameter::MaximumCurrentDemand,
        Parameter::ActivePowerDemand,
        Parameter::MaximumActivePowerDemand,
        Parameter::ApparentPowerDemand,
    ];

    /// Name used in catalogs and ingestion payloads
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Voltage => "Voltage",
            Parameter::Current => "Current",
            Parameter::ActivePower => "Active Power",
            Parameter::ApparentPower => "Apparent Power",
            Parameter::ReactivePower => "Reactive Power",
            Parameter::PowerFactor => "Power Factor",
            Parameter::PhaseAngle => "Phase Angle",
            Parameter::Frequency => "Frequency",
            Parameter::ImportActiveEnergy => "Import Active Energy",
            Parameter::ExportActiveEnergy => "Export Active Energy",
            Parameter::ImportReactiveEnergy => "Import Reactive Energy",
            Parameter::ExportReactiveEnergy => "Export Reactive Energy",
            Parameter::TotalActiveEnergy => "Total Active Energy",
            Parameter::TotalReactiveEnergy => "Total Reactive Energy",
            Parameter::PowerDemand => "Power Demand",
            Parameter::MaximumPowerDemand => "Maximum Power Demand",
            Parameter::CurrentDemand => "Current Demand",
            Parameter::MaximumCurrentDemand => "Maximum Current Demand",
            Parameter::ActivePowerDemand => "Active Power Demand",
            Parameter::MaximumActivePowerDemand => "Maximum Active Power Demand",
            Parameter::ApparentPowerDemand => "Apparent Power Demand",
        }
    }

    /// Cumulative energy and demand counters are minute-boundary parameters;
    /// everything else is instant.
    pub fn cadence(&self) -> Cadence {
        match self {
            Parameter::Voltage
            | Parameter::Current
            | Parameter::ActivePower
            | Parameter::ApparentPower
            | Parameter::ReactivePower
            | Parameter::PowerFactor
            | Parameter::PhaseAngle
            | Parameter::Frequency => Cadence::Instant,
            _ => Cadence::Minute,
        }
    }

    #[inline]
    pub fn is_minute_boundary(&self) -> bool {
        self.cadence() == Cadence::Minute
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| MeterError::configuration(format!("Unknown parameter: {:?}", s)))
    }
}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParameterVisitor;

        impl Visitor<'_> for ParameterVisitor {
            type Value = Parameter;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a parameter name such as \"Voltage\" or \"Import Active Energy\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(ParameterVisitor)
    }
}

fn default_size() -> u16 {
    2
}

fn default_scale() -> f64 {
    1.0
}

/// Register metadata for one parameter of a device model.
///
/// Field names follow the catalog file: `id` is the register address,
/// `size` is in 16-bit words, `endian` the byte permutation, `mul` the
/// scale multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "id")]
    pub address: u16,
    #[serde(default = "default_size")]
    pub size: u16,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    #[serde(rename = "endian", default)]
    pub byte_order: BytePermutation,
    #[serde(rename = "mul", default = "default_scale")]
    pub scale: f64,
}

impl ParameterSpec {
    pub fn new(address: u16, size: u16, data_type: DataType) -> Self {
        Self {
            address,
            size,
            data_type,
            byte_order: BytePermutation::default(),
            scale: 1.0,
        }
    }

    pub fn with_byte_order(mut self, byte_order: BytePermutation) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Width of the value in bytes
    #[inline]
    pub fn byte_width(&self) -> usize {
        self.size as usize * REGISTER_BYTES
    }

    /// One past the last register, widened so it cannot overflow
    #[inline]
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.size)
    }

    /// Reasons this spec can never decode, if any
    pub fn check(&self) -> Result<(), String> {
        if !matches!(self.size, 1 | 2 | 4) {
            return Err(format!("size must be 1, 2 or 4 registers, got {}", self.size));
        }
        if self.end_address() > 0x1_0000 {
            return Err(format!(
                "registers {}..{} exceed the address space",
                self.address,
                self.end_address()
            ));
        }
        if !self.data_type.supports_width(self.byte_width()) {
            return Err(format!(
                "type {} cannot be decoded from {} registers",
                self.data_type, self.size
            ));
        }
        if !self.byte_order.fits(self.byte_width()) {
            return Err(format!(
                "byte order {} does not fit {} bytes",
                self.byte_order,
                self.byte_width()
            ));
        }
        if !self.scale.is_finite() {
            return Err("mul must be a finite number".to_string());
        }
        Ok(())
    }
}
