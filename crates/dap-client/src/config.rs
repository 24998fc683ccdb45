//! Launch configurations and client settings.
//! - LaunchConfiguration/ConfigurationCompound: project `debug.configurations` / `debug.compounds`
//! - ConfigurationSet: load, look up, resolve compounds
//! - substitute_variables: `${name}` expansion over string values
//! - ClientSettings: `dap-client.toml` with `[log]` and `[hover]`

use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{DapError, DapResult};

pub(crate) const CONFIG_FILES: &[&str] = &["dap-client.toml", ".dap-client.toml"];

const CONFIGURATIONS_KEY: &str = "debug.configurations";
const COMPOUNDS_KEY: &str = "debug.compounds";
const DEFAULT_HOVER_DEBOUNCE_MS: u64 = 250;

/// Whether a configuration starts the debuggee or attaches to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchRequest {
    Launch,
    Attach,
}

impl LaunchRequest {
    /// DAP command name.
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Attach => "attach",
        }
    }
}

/// One entry of `debug.configurations`. `arguments` is the whole JSON object
/// and is passed to the adapter untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfiguration {
    pub name: String,
    pub adapter_type: String,
    pub request: LaunchRequest,
    pub arguments: Map<String, Value>,
}

impl LaunchConfiguration {
    /// `index` is only used to label errors.
    pub fn from_json(json: &Value, index: usize) -> DapResult<Self> {
        let Some(object) = json.as_object() else {
            return Err(config_error(format!("configuration {index}: expected an object")));
        };
        let field = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| config_error(format!("configuration {index}: missing string '{key}'")))
        };
        let name = field("name")?;
        let adapter_type = field("type")?;
        let request = match field("request")?.as_str() {
            "launch" => LaunchRequest::Launch,
            "attach" => LaunchRequest::Attach,
            other => {
                return Err(config_error(format!(
                    "configuration '{name}': unknown request '{other}'"
                )))
            }
        };
        Ok(Self {
            name,
            adapter_type,
            request,
            arguments: object.clone(),
        })
    }

    /// Copy with `${name}` references in every string value expanded.
    #[must_use]
    pub fn with_variables(&self, variables: &FxHashMap<String, String>) -> Self {
        let arguments = self
            .arguments
            .iter()
            .map(|(key, value)| (key.clone(), substitute_variables(value, variables)))
            .collect();
        Self {
            arguments,
            ..self.clone()
        }
    }
}

/// One entry of `debug.compounds`: several configurations started together.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigurationCompound {
    pub name: String,
    pub configurations: Vec<String>,
}

impl ConfigurationCompound {
    pub fn from_json(json: &Value, index: usize) -> DapResult<Self> {
        Self::deserialize(json).map_err(|err| config_error(format!("compound {index}: {err}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSet {
    pub configurations: Vec<LaunchConfiguration>,
    pub compounds: Vec<ConfigurationCompound>,
}

impl ConfigurationSet {
    /// Load from a settings object holding `debug.configurations` and
    /// `debug.compounds`. Missing lists are empty.
    pub fn from_json(settings: &Value) -> DapResult<Self> {
        let list = |key: &str| -> DapResult<Vec<Value>> {
            match settings.get(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(_) => Err(config_error(format!("'{key}' must be a list"))),
            }
        };
        let configurations = list(CONFIGURATIONS_KEY)?
            .iter()
            .enumerate()
            .map(|(index, json)| LaunchConfiguration::from_json(json, index))
            .collect::<DapResult<Vec<_>>>()?;
        let compounds = list(COMPOUNDS_KEY)?
            .iter()
            .enumerate()
            .map(|(index, json)| ConfigurationCompound::from_json(json, index))
            .collect::<DapResult<Vec<_>>>()?;
        Ok(Self {
            configurations,
            compounds,
        })
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&LaunchConfiguration> {
        self.configurations
            .iter()
            .find(|configuration| configuration.name == name)
    }

    /// Member configurations of a compound, in declaration order.
    pub fn resolve_compound(&self, name: &str) -> DapResult<Vec<&LaunchConfiguration>> {
        let Some(compound) = self.compounds.iter().find(|compound| compound.name == name) else {
            return Err(config_error(format!("unknown compound '{name}'")));
        };
        compound
            .configurations
            .iter()
            .map(|member| {
                self.find(member).ok_or_else(|| {
                    config_error(format!("compound '{name}': unknown configuration '{member}'"))
                })
            })
            .collect()
    }
}

fn config_error(message: String) -> DapError {
    DapError::Config(message)
}

/// Expand `${name}` in every string of `value`. Unknown names and
/// unterminated references are kept verbatim.
#[must_use]
pub fn substitute_variables(value: &Value, variables: &FxHashMap<String, String>) -> Value {
    match value {
        Value::String(text) => Value::String(substitute_str(text, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_variables(item, variables))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, item)| (key.clone(), substitute_variables(item, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_str(text: &str, variables: &FxHashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match variables.get(name) {
            Some(replacement) => out.push_str(replacement),
            None => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Logging switches from the `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Informational session messages.
    pub info: bool,
    /// Adapter and protocol errors.
    pub errors: bool,
    /// Internal failures.
    pub exceptions: bool,
    /// Record every protocol frame.
    pub transcript: bool,
    /// Explicit `EnvFilter` directives; overrides the switches above.
    pub filter: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            info: false,
            errors: true,
            exceptions: true,
            transcript: false,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverSettings {
    pub debounce: Duration,
}

impl Default for HoverSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_HOVER_DEBOUNCE_MS),
        }
    }
}

/// Client settings loaded from `dap-client.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Settings file path (if found).
    pub config_path: Option<PathBuf>,
    pub log: LogSettings,
    pub hover: HoverSettings,
}

impl ClientSettings {
    /// Load settings from the first settings file found in `root`.
    pub fn load(root: &Path) -> Self {
        let Some(path) = find_config_file(root) else {
            return Self::default();
        };
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            warn!("Failed to read dap-client settings at {}", path.display());
            return Self {
                config_path: Some(path.to_path_buf()),
                ..Self::default()
            };
        };
        let mut settings = Self::from_contents(&contents);
        settings.config_path = Some(path.to_path_buf());
        settings
    }

    pub fn from_contents(contents: &str) -> Self {
        let parsed: SettingsFile = match toml::from_str(contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Failed to parse dap-client settings: {err}");
                return Self::default();
            }
        };
        let defaults = LogSettings::default();
        let log = LogSettings {
            info: parsed.log.info.unwrap_or(defaults.info),
            errors: parsed.log.errors.unwrap_or(defaults.errors),
            exceptions: parsed.log.exceptions.unwrap_or(defaults.exceptions),
            transcript: parsed.log.transcript.unwrap_or(defaults.transcript),
            filter: parsed.log.filter,
        };
        let hover = HoverSettings {
            debounce: parsed
                .hover
                .debounce_ms
                .map_or(HoverSettings::default().debounce, Duration::from_millis),
        };
        Self {
            config_path: None,
            log,
            hover,
        }
    }
}

pub(crate) fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    log: LogSection,
    #[serde(default)]
    hover: HoverSection,
}

#[derive(Debug, Default, Deserialize)]
struct LogSection {
    info: Option<bool>,
    errors: Option<bool>,
    exceptions: Option<bool>,
    transcript: Option<bool>,
    filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HoverSection {
    debounce_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project_settings() -> Value {
        json!({
            "debug.configurations": [
                {"name": "server", "type": "python", "request": "launch", "program": "${workspaceFolder}/server.py"},
                {"name": "client", "type": "python", "request": "attach", "port": 5678}
            ],
            "debug.compounds": [
                {"name": "both", "configurations": ["server", "client"]},
                {"name": "broken", "configurations": ["server", "missing"]}
            ]
        })
    }

    #[test]
    fn configurations_keep_the_whole_object() {
        let set = ConfigurationSet::from_json(&project_settings()).expect("settings");
        let server = set.find("server").expect("server");
        assert_eq!(server.adapter_type, "python");
        assert_eq!(server.request, LaunchRequest::Launch);
        assert_eq!(server.arguments["program"], json!("${workspaceFolder}/server.py"));
        assert_eq!(server.arguments["name"], json!("server"));
        assert_eq!(set.find("client").map(|c| c.request.command()), Some("attach"));
    }

    #[test]
    fn missing_lists_are_empty() {
        let set = ConfigurationSet::from_json(&json!({})).expect("settings");
        assert!(set.configurations.is_empty());
        assert!(set.compounds.is_empty());
    }

    #[test]
    fn invalid_configuration_names_its_index() {
        let err = ConfigurationSet::from_json(&json!({
            "debug.configurations": [{"name": "x", "request": "launch"}]
        }))
        .unwrap_err();
        assert_eq!(
            err,
            DapError::Config("configuration 0: missing string 'type'".to_string())
        );
        let err = LaunchConfiguration::from_json(
            &json!({"name": "x", "type": "lldb", "request": "run"}),
            3,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DapError::Config("configuration 'x': unknown request 'run'".to_string())
        );
    }

    #[test]
    fn compound_resolves_members_in_order() {
        let set = ConfigurationSet::from_json(&project_settings()).expect("settings");
        let names: Vec<&str> = set
            .resolve_compound("both")
            .expect("compound")
            .iter()
            .map(|configuration| configuration.name.as_str())
            .collect();
        assert_eq!(names, vec!["server", "client"]);

        assert_eq!(
            set.resolve_compound("broken").unwrap_err(),
            DapError::Config("compound 'broken': unknown configuration 'missing'".to_string())
        );
        assert!(set.resolve_compound("nope").is_err());
    }

    #[test]
    fn variables_expand_in_nested_strings() {
        let mut variables = FxHashMap::default();
        variables.insert("workspaceFolder".to_string(), "/work".to_string());
        variables.insert("file".to_string(), "/work/a.py".to_string());
        let value = json!({
            "program": "${workspaceFolder}/server.py",
            "args": ["${file}", "${unknown}", "${open"],
            "port": 1
        });
        assert_eq!(
            substitute_variables(&value, &variables),
            json!({
                "program": "/work/server.py",
                "args": ["/work/a.py", "${unknown}", "${open"],
                "port": 1
            })
        );
    }

    #[test]
    fn with_variables_keeps_identity_fields() {
        let set = ConfigurationSet::from_json(&project_settings()).expect("settings");
        let mut variables = FxHashMap::default();
        variables.insert("workspaceFolder".to_string(), "/w".to_string());
        let server = set.find("server").expect("server").with_variables(&variables);
        assert_eq!(server.name, "server");
        assert_eq!(server.arguments["program"], json!("/w/server.py"));
    }

    #[test]
    fn settings_defaults_and_overrides() {
        assert_eq!(ClientSettings::from_contents(""), ClientSettings::default());
        assert_eq!(
            ClientSettings::default().hover.debounce,
            Duration::from_millis(250)
        );

        let settings = ClientSettings::from_contents(
            "[log]\ninfo = true\ntranscript = true\n\n[hover]\ndebounce_ms = 40\n",
        );
        assert!(settings.log.info);
        assert!(settings.log.errors);
        assert!(settings.log.transcript);
        assert_eq!(settings.hover.debounce, Duration::from_millis(40));
    }

    #[test]
    fn unparsable_settings_fall_back_to_defaults() {
        let settings = ClientSettings::from_contents("[hover]\ndebounce_ms = \"soon\"\n");
        assert_eq!(settings, ClientSettings::default());
    }
}
