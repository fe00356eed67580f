//! Static table of heat pump registers to poll.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use heliotherm_protocol::Command;

/// Register table errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("unknown register '{0}'")]
    Unknown(String),
    #[error("duplicate register name '{0}'")]
    DuplicateName(String),
    #[error("duplicate register address {kind:?} {number}")]
    DuplicateAddress { kind: RegisterKind, number: u16 },
}

/// Which register namespace a spec addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// `MP` - live process values (temperatures, pressures, pump states).
    Process,
    /// `SP` - parameters (setpoints, operating-hour counters, modes).
    Parameter,
}

/// Physical unit of a register, used to suffix the metric name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Celsius,
    Bar,
    Percent,
    Hours,
    Count,
    /// Operating state or bitmask; exported without a unit suffix.
    State,
}

impl Unit {
    /// Metric name suffix for this unit, if any.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            Unit::Celsius => Some("celsius"),
            Unit::Bar => Some("bar"),
            Unit::Percent => Some("percent"),
            Unit::Hours => Some("hours"),
            // `_total` is reserved for counters; these are gauges
            Unit::Count => Some("count"),
            Unit::State => None,
        }
    }
}

/// One monitored quantity: logical name plus protocol address and scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSpec {
    /// Logical metric name (e.g. "outdoor_temp").
    pub name: String,

    /// Register namespace.
    pub kind: RegisterKind,

    /// Register number within the namespace.
    pub number: u16,

    /// Scaling factor applied to the reported value (default: 1.0; the
    /// controller already reports decimal-scaled values).
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Physical unit.
    pub unit: Unit,
}

fn default_scale() -> f64 {
    1.0
}

impl RegisterSpec {
    fn new(name: &str, kind: RegisterKind, number: u16, unit: Unit) -> Self {
        Self {
            name: name.to_string(),
            kind,
            number,
            scale: 1.0,
            unit,
        }
    }

    /// The query command that reads this register.
    pub fn command(&self) -> Command {
        match self.kind {
            RegisterKind::Process => Command::ReadProcessValue(self.number),
            RegisterKind::Parameter => Command::ReadParameter(self.number),
        }
    }

    /// Full metric name including namespace and unit suffix.
    pub fn metric_name(&self) -> String {
        match self.unit.suffix() {
            Some(suffix) => format!("heliotherm_{}_{}", self.name, suffix),
            None => format!("heliotherm_{}", self.name),
        }
    }
}

/// Immutable, ordered register table. Built once at startup; lookups are
/// read-only afterwards, so the table is freely shareable across tasks.
#[derive(Debug, Clone)]
pub struct RegisterTable {
    specs: Vec<RegisterSpec>,
}

impl RegisterTable {
    /// Build a table, rejecting duplicate names or addresses.
    pub fn new(specs: Vec<RegisterSpec>) -> Result<Self, RegisterError> {
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();

        for spec in &specs {
            if !names.insert(spec.name.clone()) {
                return Err(RegisterError::DuplicateName(spec.name.clone()));
            }
            if !addresses.insert((spec.kind, spec.number)) {
                return Err(RegisterError::DuplicateAddress {
                    kind: spec.kind,
                    number: spec.number,
                });
            }
        }

        Ok(Self { specs })
    }

    /// The built-in register set, drawn from the registers Heliotherm's
    /// service interface documents for this controller family.
    pub fn default_table() -> Self {
        use RegisterKind::{Parameter, Process};

        let specs = vec![
            RegisterSpec::new("outdoor_temp", Process, 0, Unit::Celsius),
            RegisterSpec::new("hot_water_temp", Process, 2, Unit::Celsius),
            RegisterSpec::new("flow_temp", Process, 3, Unit::Celsius),
            RegisterSpec::new("return_temp", Process, 4, Unit::Celsius),
            RegisterSpec::new("brine_in_temp", Process, 6, Unit::Celsius),
            RegisterSpec::new("fresh_water_temp", Process, 11, Unit::Celsius),
            RegisterSpec::new("evaporation_temp", Process, 12, Unit::Celsius),
            RegisterSpec::new("condensation_temp", Process, 13, Unit::Celsius),
            RegisterSpec::new("low_pressure", Process, 20, Unit::Bar),
            RegisterSpec::new("high_pressure", Process, 21, Unit::Bar),
            RegisterSpec::new("heating_circuit_pump", Process, 22, Unit::State),
            RegisterSpec::new("brine_pump", Process, 24, Unit::State),
            RegisterSpec::new("hot_water_production", Process, 25, Unit::State),
            RegisterSpec::new("compressor", Process, 30, Unit::State),
            RegisterSpec::new("fault", Process, 31, Unit::State),
            RegisterSpec::new("compressor_demand", Process, 56, Unit::Percent),
            RegisterSpec::new("heating_circuit_setpoint", Process, 57, Unit::Celsius),
            RegisterSpec::new("compressor_status", Parameter, 10, Unit::State),
            RegisterSpec::new("compressor_runtime", Parameter, 11, Unit::Hours),
            RegisterSpec::new("operating_mode", Parameter, 13, Unit::State),
            RegisterSpec::new("room_setpoint_temp", Parameter, 69, Unit::Celsius),
            RegisterSpec::new("heating_raise_temp", Parameter, 71, Unit::Celsius),
            RegisterSpec::new("heating_setback_temp", Parameter, 72, Unit::Celsius),
            RegisterSpec::new("heating_limit_temp", Parameter, 76, Unit::Celsius),
            RegisterSpec::new("hot_water_normal_temp", Parameter, 83, Unit::Celsius),
            RegisterSpec::new("hot_water_minimum_temp", Parameter, 85, Unit::Celsius),
            RegisterSpec::new("hot_water_runtime", Parameter, 171, Unit::Hours),
            RegisterSpec::new("heating_runtime", Parameter, 172, Unit::Hours),
            RegisterSpec::new("total_runtime", Parameter, 173, Unit::Hours),
            RegisterSpec::new("hot_water_setpoint", Parameter, 223, Unit::Celsius),
        ];

        // the built-in table is known to be duplicate-free
        Self::new(specs).expect("built-in register table is valid")
    }

    /// Look up a register by logical name.
    pub fn lookup(&self, name: &str) -> Result<&RegisterSpec, RegisterError> {
        self.specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| RegisterError::Unknown(name.to_string()))
    }

    /// All registers in polling order.
    pub fn all(&self) -> &[RegisterSpec] {
        &self.specs
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = RegisterTable::default_table();
        assert!(!table.is_empty());
    }

    #[test]
    fn test_lookup() {
        let table = RegisterTable::default_table();
        let spec = table.lookup("outdoor_temp").unwrap();
        assert_eq!(spec.kind, RegisterKind::Process);
        assert_eq!(spec.number, 0);
        assert_eq!(spec.unit, Unit::Celsius);
    }

    #[test]
    fn test_lookup_unknown() {
        let table = RegisterTable::default_table();
        assert_eq!(
            table.lookup("no_such_register"),
            Err(RegisterError::Unknown("no_such_register".to_string()))
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let specs = vec![
            RegisterSpec::new("outdoor_temp", RegisterKind::Process, 0, Unit::Celsius),
            RegisterSpec::new("outdoor_temp", RegisterKind::Process, 1, Unit::Celsius),
        ];
        assert!(matches!(
            RegisterTable::new(specs),
            Err(RegisterError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let specs = vec![
            RegisterSpec::new("a", RegisterKind::Parameter, 11, Unit::Hours),
            RegisterSpec::new("b", RegisterKind::Parameter, 11, Unit::Hours),
        ];
        assert!(matches!(
            RegisterTable::new(specs),
            Err(RegisterError::DuplicateAddress { .. })
        ));
    }

    #[test]
    fn test_same_number_different_kind_allowed() {
        let specs = vec![
            RegisterSpec::new("a", RegisterKind::Process, 11, Unit::Celsius),
            RegisterSpec::new("b", RegisterKind::Parameter, 11, Unit::Hours),
        ];
        assert!(RegisterTable::new(specs).is_ok());
    }

    #[test]
    fn test_metric_names() {
        let table = RegisterTable::default_table();
        assert_eq!(
            table.lookup("outdoor_temp").unwrap().metric_name(),
            "heliotherm_outdoor_temp_celsius"
        );
        assert_eq!(
            table.lookup("compressor").unwrap().metric_name(),
            "heliotherm_compressor"
        );
        assert_eq!(
            table.lookup("compressor_runtime").unwrap().metric_name(),
            "heliotherm_compressor_runtime_hours"
        );
    }

    #[test]
    fn test_count_suffix_is_not_total() {
        // every register renders as a gauge, so `_total` is off limits
        let spec = RegisterSpec::new("defrost_cycles", RegisterKind::Parameter, 200, Unit::Count);
        assert_eq!(spec.metric_name(), "heliotherm_defrost_cycles_count");
    }

    #[test]
    fn test_commands() {
        let table = RegisterTable::default_table();
        assert_eq!(
            table.lookup("outdoor_temp").unwrap().command(),
            Command::ReadProcessValue(0)
        );
        assert_eq!(
            table.lookup("hot_water_setpoint").unwrap().command(),
            Command::ReadParameter(223)
        );
    }
}
