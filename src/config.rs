//! # Configuration
//!
//! Two static inputs are loaded once at startup:
//!
//! - the **settings file** (`setting.json`): gateway address, logging
//!   switches, the meter list and optional tuning sections;
//! - the **parameter catalog** it points to: per device model, the function
//!   code and the register layout of every parameter.
//!
//! Settings are layered with `figment`: the JSON file, then `API_BASE_URL`
//! from the environment, then command-line overrides. Everything is checked
//! before the first poll; any problem is a [`MeterError::Configuration`] and
//! stops the process.
//!
//! ```json
//! {
//!     "Logger_ID": "LG-01",
//!     "Device_IP": "192.168.1.50",
//!     "meter_params": "meter_params.json",
//!     "meterlist": [
//!         {"name": "Meter 1", "id": 1, "model": "PM2200", "paramlist": ["Voltage", "Current"]}
//!     ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use tracing::debug;

use crate::constants::{is_register_read, DEFAULT_TCP_PORT, MAX_READ_REGISTERS};
use crate::error::{MeterError, MeterResult};
use crate::health::HealthCheckConfig;
use crate::ingest::IngestConfig;
use crate::parameter::{Parameter, ParameterSpec};
use crate::planner::{RegisterPlanner, DEFAULT_MAX_GAP};
use crate::session::SessionConfig;
use crate::supervisor::SupervisorPolicy;
use crate::timing::PollTiming;
use crate::validator::{Bounds, Validator};

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "setting.json";

/// Environment variable overriding `ingest.base_url`
pub const API_BASE_URL_ENV: &str = "API_BASE_URL";

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_max_gap() -> u16 {
    DEFAULT_MAX_GAP
}

fn default_max_registers() -> u16 {
    MAX_READ_REGISTERS as u16
}

/// Accept `"LG-01"` as well as `17`
fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct TextVisitor;

    impl Visitor<'_> for TextVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(TextVisitor)
}

/// Accept `3` as well as `"3"`
fn unit_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let text = text_or_number(deserializer)?;
    text.trim()
        .parse()
        .map_err(|_| de::Error::custom(format!("unit id must be 0-255, got {:?}", text)))
}

/// One entry of `meterlist`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MeterEntry {
    pub name: String,
    #[serde(deserialize_with = "unit_id")]
    pub id: u8,
    pub model: String,
    pub paramlist: Vec<Parameter>,
}

/// Contents of the settings file after layering
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "Logger_ID", deserialize_with = "text_or_number")]
    pub logger_id: String,
    #[serde(rename = "Device_IP")]
    pub device_ip: String,
    #[serde(rename = "Device_Port", default = "default_port")]
    pub device_port: u16,
    #[serde(default)]
    pub debug: bool,
    #[serde(rename = "Troubleshoot", default)]
    pub troubleshoot: u8,
    /// Parameter catalog; relative to the settings file
    pub meter_params: PathBuf,
    pub meterlist: Vec<MeterEntry>,
    #[serde(default)]
    pub timing: PollTiming,
    #[serde(default = "default_max_gap")]
    pub max_gap: u16,
    #[serde(default = "default_max_registers")]
    pub max_registers_per_read: u16,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
    #[serde(default)]
    pub supervisor: SupervisorPolicy,
    /// Bounds merged over the built-in set
    #[serde(default)]
    pub validation: BTreeMap<Parameter, Bounds>,
}

/// Command-line values that win over the file and the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub device_ip: Option<String>,
    pub device_port: Option<u16>,
    pub api_base_url: Option<String>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(ip) = &self.device_ip {
            figment = figment.merge(Serialized::default("Device_IP", ip));
        }
        if let Some(port) = self.device_port {
            figment = figment.merge(Serialized::default("Device_Port", port));
        }
        if let Some(url) = &self.api_base_url {
            figment = figment.merge(Serialized::default("ingest.base_url", url));
        }
        figment
    }
}

impl Settings {
    /// Layer the settings text with the environment and `overrides`.
    pub fn from_json(json: &str, overrides: &ConfigOverrides) -> MeterResult<Self> {
        let figment = Figment::new().merge(Json::string(json)).merge(
            Env::raw()
                .only(&[API_BASE_URL_ENV])
                .map(|_| "ingest.base_url".into()),
        );
        let settings = overrides.apply(figment).extract()?;
        Ok(settings)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.device_ip.clone(), self.device_port).with_timing(&self.timing)
    }

    pub fn planner(&self) -> RegisterPlanner {
        RegisterPlanner::new()
            .with_max_gap(self.max_gap)
            .with_max_registers(self.max_registers_per_read)
    }
}

/// Register layout of one device model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceModel {
    #[serde(rename = "functionCode")]
    pub function_code: u8,
    #[serde(flatten)]
    pub parameters: BTreeMap<Parameter, ParameterSpec>,
}

/// Parameter catalog, keyed by model name
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    pub models: BTreeMap<String, DeviceModel>,
}

impl ModelCatalog {
    pub fn from_json(json: &str) -> MeterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> MeterResult<Self> {
        Self::from_json(&read_file(path, "parameter catalog")?)
    }

    pub fn model(&self, name: &str) -> Option<&DeviceModel> {
        self.models.get(name)
    }
}

/// One meter, resolved against its model
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub model: String,
    pub unit_id: u8,
    pub function_code: u8,
    /// In `paramlist` order
    pub parameters: Vec<(Parameter, ParameterSpec)>,
}

impl DeviceConfig {
    /// Resolve `entry` against `catalog`, checking every parameter spec.
    pub fn resolve(entry: &MeterEntry, catalog: &ModelCatalog) -> MeterResult<Self> {
        let model = catalog.model(&entry.model).ok_or_else(|| {
            MeterError::configuration(format!(
                "{}: unknown model {:?}",
                entry.name, entry.model
            ))
        })?;

        if !is_register_read(model.function_code) {
            return Err(MeterError::configuration(format!(
                "model {}: function code {} is not a register read (3 or 4)",
                entry.model, model.function_code
            )));
        }
        if entry.paramlist.is_empty() {
            return Err(MeterError::configuration(format!(
                "{}: paramlist is empty",
                entry.name
            )));
        }

        let mut seen = BTreeSet::new();
        let mut parameters = Vec::with_capacity(entry.paramlist.len());
        for &parameter in &entry.paramlist {
            if !seen.insert(parameter) {
                return Err(MeterError::configuration(format!(
                    "{}: {} listed twice",
                    entry.name, parameter
                )));
            }
            let spec = model.parameters.get(&parameter).ok_or_else(|| {
                MeterError::configuration(format!(
                    "{}: model {} has no parameter {}",
                    entry.name, entry.model, parameter
                ))
            })?;
            spec.check().map_err(|reason| {
                MeterError::configuration(format!(
                    "model {}: {}: {}",
                    entry.model, parameter, reason
                ))
            })?;
            parameters.push((parameter, *spec));
        }

        Ok(Self {
            name: entry.name.clone(),
            model: entry.model.clone(),
            unit_id: entry.id,
            function_code: model.function_code,
            parameters,
        })
    }
}

/// Everything the logger needs, checked
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: Settings,
    pub devices: Vec<DeviceConfig>,
    pub validator: Validator,
    /// Settings file this was loaded from
    pub source: PathBuf,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> MeterResult<Self> {
        Self::load_with(path, &ConfigOverrides::default())
    }

    pub fn load_with(path: impl AsRef<Path>, overrides: &ConfigOverrides) -> MeterResult<Self> {
        let path = path.as_ref();
        let settings = Settings::from_json(&read_file(path, "settings")?, overrides)?;

        let catalog_path = resolve_relative(path, &settings.meter_params);
        debug!("loading parameter catalog from {}", catalog_path.display());
        let catalog = ModelCatalog::load(&catalog_path)?;

        let mut config = Self::from_parts(settings, &catalog)?;
        config.source = path.to_path_buf();
        Ok(config)
    }

    /// Check `settings` and resolve every meter against `catalog`.
    pub fn from_parts(settings: Settings, catalog: &ModelCatalog) -> MeterResult<Self> {
        if settings.device_ip.trim().is_empty() {
            return Err(MeterError::configuration("Device_IP is empty"));
        }
        if settings.meterlist.is_empty() {
            return Err(MeterError::configuration("meterlist is empty"));
        }
        settings
            .timing
            .check()
            .map_err(|reason| MeterError::configuration(format!("timing: {}", reason)))?;
        if settings.supervisor.max_failures == 0 {
            return Err(MeterError::configuration(
                "supervisor.max_failures must be at least 1",
            ));
        }

        let mut names = BTreeSet::new();
        let mut devices = Vec::with_capacity(settings.meterlist.len());
        for entry in &settings.meterlist {
            if !names.insert(entry.name.as_str()) {
                return Err(MeterError::configuration(format!(
                    "meter name {:?} used twice",
                    entry.name
                )));
            }
            devices.push(DeviceConfig::resolve(entry, catalog)?);
        }

        let validator = Validator::default().with_overrides(&settings.validation)?;

        Ok(Self {
            settings,
            devices,
            validator,
            source: PathBuf::new(),
        })
    }
}

fn read_file(path: &Path, what: &str) -> MeterResult<String> {
    fs::read_to_string(path).map_err(|e| {
        MeterError::configuration(format!("cannot read {} file {}: {}", what, path.display(), e))
    })
}

/// `relative` as seen from the directory holding `base`
fn resolve_relative(base: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        return relative.to_path_buf();
    }
    match base.parent() {
        Some(dir) => dir.join(relative),
        None => relative.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    const CATALOG: &str = r#"{
        "PM2200": {
            "functionCode": 3,
            "Voltage": {"id": 3027, "type": "float", "endian": "1234", "description": "L-N avg"},
            "Current": {"id": 3009},
            "Frequency": {"id": 3109, "size": 2, "mul": 1},
            "Import Active Energy": {"id": 2699, "size": 4, "type": "int", "endian": 12345678, "mul": 0.001}
        },
        "EM115": {
            "functionCode": 4,
            "Voltage": {"id": 0, "endian": "CDAB"},
            "Power Factor": {"id": 30, "size": 1, "type": "sint", "mul": 0.001}
        }
    }"#;

    fn settings_json(meter_params: &str) -> String {
        format!(
            r#"{{
                "Logger_ID": 17,
                "Device_IP": "192.168.1.50",
                "debug": true,
                "Troubleshoot": 1,
                "meter_params": "{}",
                "meterlist": [
                    {{"name": "Main", "id": 1, "model": "PM2200",
                      "paramlist": ["Voltage", "Current", "Import Active Energy"]}},
                    {{"name": "Pump", "id": "7", "model": "EM115",
                      "paramlist": ["Power Factor", "Voltage"]}}
                ],
                "timing": {{"inter_meter_delay_ms": 100}},
                "validation": {{"Voltage": {{"min": 180, "max": 260}}}}
            }}"#,
            meter_params
        )
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn settings(json: &str) -> Settings {
        Settings::from_json(json, &ConfigOverrides::default()).unwrap()
    }

    #[test]
    fn test_load_resolves_catalog_next_to_settings() {
        let dir = TempDir::new().unwrap();
        write(&dir, "meter_params.json", CATALOG);
        let path = write(&dir, "setting.json", &settings_json("meter_params.json"));

        let config = assert_ok!(AppConfig::load(&path));
        assert_eq!(config.source, path);
        assert_eq!(config.settings.logger_id, "17");
        assert_eq!(config.settings.device_port, 502);
        assert!(config.settings.debug);
        assert_eq!(config.settings.troubleshoot, 1);
        assert_eq!(config.settings.timing.inter_meter_delay_ms, 100);
        assert_eq!(config.settings.timing.inter_cycle_delay_ms, 500);

        assert_eq!(config.devices.len(), 2);
        let main = &config.devices[0];
        assert_eq!(main.unit_id, 1);
        assert_eq!(main.function_code, 3);
        assert_eq!(
            main.parameters[0],
            (Parameter::Voltage, ParameterSpec::new(3027, 2, DataType::Float))
        );
        assert_eq!(main.parameters[2].1.scale, 0.001);

        let pump = &config.devices[1];
        assert_eq!(pump.unit_id, 7);
        assert_eq!(pump.function_code, 4);
        assert_eq!(pump.parameters[0].0, Parameter::PowerFactor);
        assert_eq!(pump.parameters[1].1.byte_order.to_string(), "3412");

        assert_eq!(
            config.validator.bound(Parameter::Voltage),
            Some(Bounds::new(180.0, 260.0))
        );
    }

    #[test]
    fn test_cli_overrides_win() {
        let overrides = ConfigOverrides {
            device_ip: Some("10.0.0.9".to_string()),
            device_port: Some(5020),
            api_base_url: Some("http://ingest.local:9000".to_string()),
        };
        let settings = Settings::from_json(&settings_json("x.json"), &overrides).unwrap();
        assert_eq!(settings.device_ip, "10.0.0.9");
        assert_eq!(settings.device_port, 5020);
        assert_eq!(settings.ingest.base_url, "http://ingest.local:9000");
        assert_eq!(settings.ingest.ingest_timeout_secs, 30);
        assert_eq!(settings.session_config().address(), "10.0.0.9:5020");
    }

    #[test]
    fn test_missing_files_are_configuration_errors() {
        let dir = TempDir::new().unwrap();
        let missing = AppConfig::load(dir.path().join("setting.json"));
        assert!(matches!(missing, Err(MeterError::Configuration { .. })));

        let path = write(&dir, "setting.json", &settings_json("absent.json"));
        let err = assert_err!(AppConfig::load(&path));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("absent.json"));
    }

    #[test]
    fn test_malformed_settings_rejected() {
        let err = Settings::from_json("{\"Logger_ID\": 1", &ConfigOverrides::default());
        assert!(matches!(err, Err(MeterError::Configuration { .. })));

        // Device_IP is required
        let err = Settings::from_json(
            r#"{"Logger_ID": 1, "meter_params": "p.json", "meterlist": []}"#,
            &ConfigOverrides::default(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_parameter_names_rejected() {
        let json = settings_json("p.json").replace("\"Current\"", "\"Currnet\"");
        assert!(Settings::from_json(&json, &ConfigOverrides::default()).is_err());

        let catalog = CATALOG.replace("\"Frequency\"", "\"Freq\"");
        assert!(ModelCatalog::from_json(&catalog).is_err());
    }

    #[test]
    fn test_meter_resolution_errors() {
        let catalog = ModelCatalog::from_json(CATALOG).unwrap();
        let cases = [
            (
                settings_json("p.json").replace("\"EM115\"", "\"EM999\""),
                "unknown model",
            ),
            (
                settings_json("p.json").replace("\"Power Factor\", \"Voltage\"", "\"Current\""),
                "has no parameter",
            ),
            (
                settings_json("p.json").replace("\"Power Factor\", \"Voltage\"", "\"Voltage\", \"Voltage\""),
                "listed twice",
            ),
            (
                settings_json("p.json").replace("\"Pump\"", "\"Main\""),
                "used twice",
            ),
        ];
        for (json, expected) in cases {
            let err = AppConfig::from_parts(settings(&json), &catalog).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{} should mention {:?}",
                err,
                expected
            );
        }
    }

    #[test]
    fn test_undecodable_specs_rejected() {
        let settings = settings(&settings_json("p.json"));
        for broken in [
            CATALOG.replace("\"functionCode\": 4", "\"functionCode\": 6"),
            CATALOG.replace("\"size\": 1, \"type\": \"sint\"", "\"size\": 1, \"type\": \"float\""),
            CATALOG.replace("\"id\": 3009", "\"id\": 3009, \"size\": 3"),
            CATALOG.replace("\"endian\": \"CDAB\"", "\"endian\": \"1256\""),
        ] {
            let catalog = ModelCatalog::from_json(&broken).unwrap();
            let err = AppConfig::from_parts(settings.clone(), &catalog).unwrap_err();
            assert!(matches!(err, MeterError::Configuration { .. }), "{}", err);
        }
    }

    #[test]
    fn test_empty_meterlist_and_inverted_bounds() {
        let catalog = ModelCatalog::from_json(CATALOG).unwrap();

        let mut empty = settings(&settings_json("p.json"));
        empty.meterlist.clear();
        assert!(AppConfig::from_parts(empty, &catalog).is_err());

        let inverted = settings_json("p.json").replace(
            "{\"min\": 180, \"max\": 260}",
            "{\"min\": 260, \"max\": 180}",
        );
        assert!(AppConfig::from_parts(settings(&inverted), &catalog).is_err());
    }

    #[test]
    fn test_planner_settings() {
        let json = settings_json("p.json").replace(
            "\"debug\": true,",
            "\"debug\": true, \"max_gap\": 0, \"max_registers_per_read\": 500,",
        );
        let planner = settings(&json).planner();
        assert_eq!(planner.max_gap(), 0);
        assert_eq!(planner.max_registers(), 125);
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_relative(Path::new("/etc/logger/setting.json"), Path::new("params.json")),
            PathBuf::from("/etc/logger/params.json")
        );
        assert_eq!(
            resolve_relative(Path::new("/etc/logger/setting.json"), Path::new("/opt/p.json")),
            PathBuf::from("/opt/p.json")
        );
        assert_eq!(
            resolve_relative(Path::new("setting.json"), Path::new("params.json")),
            PathBuf::from("params.json")
        );
    }
}
