//! Config Loader: parses and validates the JSON configuration file, expands
//! `${workspaceFolder}`/`${env:NAME}` variables, and doubles as a configuration
//! provider that derives a [`DebugConfig`] from a file path.
//!
//! Validates eagerly and fails with a specific reason: adapters must be a non-empty
//! command per language, and variable expansion never re-scans its own output.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::DapError;
use crate::types::{DebugConfig, RequestKind, StandaloneConfig};

/// The file name callers are expected to walk upward from `cwd` looking for.
pub const CONFIG_FILE_NAME: &str = "debugmcp.config.json";

static VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(workspaceFolder|env:([A-Za-z_][A-Za-z0-9_]*))\}").unwrap());

/// A loaded, validated, variable-expanded configuration file.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: StandaloneConfig,
}

impl ConfigLoader {
    /// Loads and validates `path`, then expands `${workspaceFolder}`/`${env:NAME}`
    /// recursively through every string value. `${workspaceFolder}` resolves to the
    /// directory containing the config file. Loading is idempotent: the same file
    /// loaded twice yields equivalent configs.
    pub fn load(path: &Path) -> Result<Self, DapError> {
        let text = std::fs::read_to_string(path).map_err(|_| DapError::ConfigNotFound { path: path.to_path_buf() })?;
        let mut raw: Value = serde_json::from_str(&text).map_err(|e| DapError::ConfigInvalid { reason: e.to_string() })?;

        validate(&raw)?;

        let workspace_folder = path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { PathBuf::from(".") } else { p.to_path_buf() })
            .unwrap_or_else(|| PathBuf::from("."));
        expand_variables(&mut raw, &workspace_folder);

        let config: StandaloneConfig = serde_json::from_value(raw).map_err(|e| DapError::ConfigInvalid { reason: e.to_string() })?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StandaloneConfig {
        &self.config
    }

    /// Walks upward from `start` looking for [`CONFIG_FILE_NAME`].
    pub fn search_upward(start: &Path) -> Option<PathBuf> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            let candidate = d.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            dir = d.parent();
        }
        None
    }

    /// Derives a [`DebugConfig`] for `file_path`, merging the loader's
    /// `defaults[language]` (if any) with the conventional overrides: `type`
    /// (default `language`), `request` (default `launch`), `name`
    /// (`Standalone Debug: <basename>`), `program`, `cwd`, `console` (default
    /// `integratedTerminal`).
    pub fn provide_debug_config(&self, file_path: &Path, working_dir: &Path) -> DebugConfig {
        let language = language_for_extension(file_path.extension().and_then(|e| e.to_str()).unwrap_or(""));

        let mut merged: Map<String, Value> = self.config.defaults.get(language).cloned().unwrap_or_default();
        merged.entry("type".to_string()).or_insert_with(|| Value::String(language.to_string()));
        merged.entry("request".to_string()).or_insert_with(|| Value::String("launch".to_string()));
        merged
            .entry("console".to_string())
            .or_insert_with(|| Value::String("integratedTerminal".to_string()));

        let basename = file_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        merged.insert("name".to_string(), Value::String(format!("Standalone Debug: {basename}")));
        merged.insert("program".to_string(), Value::String(file_path.to_string_lossy().into_owned()));
        merged.insert("cwd".to_string(), Value::String(working_dir.to_string_lossy().into_owned()));

        serde_json::from_value(Value::Object(merged)).unwrap_or(DebugConfig {
            adapter_type: language.to_string(),
            request: RequestKind::Launch,
            name: format!("Standalone Debug: {basename}"),
            program: Some(file_path.to_string_lossy().into_owned()),
            args: Vec::new(),
            cwd: Some(working_dir.to_string_lossy().into_owned()),
            env: Default::default(),
            stop_on_entry: None,
            extra: Map::new(),
        })
    }
}

/// `adapters` must be an object; each entry must have a non-empty string `command`;
/// `args`, if present, must be a list.
fn validate(raw: &Value) -> Result<(), DapError> {
    let Some(adapters) = raw.get("adapters") else {
        return Err(DapError::ConfigInvalid { reason: "missing 'adapters' object".into() });
    };
    let Some(adapters) = adapters.as_object() else {
        return Err(DapError::ConfigInvalid { reason: "'adapters' must be an object".into() });
    };
    for (language, descriptor) in adapters {
        let Some(descriptor) = descriptor.as_object() else {
            return Err(DapError::ConfigInvalid { reason: format!("adapters.{language} must be an object") });
        };
        match descriptor.get("command").and_then(Value::as_str) {
            Some(command) if !command.is_empty() => {}
            _ => return Err(DapError::ConfigInvalid { reason: format!("adapters.{language}.command must be a non-empty string") }),
        }
        if let Some(args) = descriptor.get("args") {
            if !args.is_array() {
                return Err(DapError::ConfigInvalid { reason: format!("adapters.{language}.args must be a list") });
            }
        }
    }
    Ok(())
}

/// Recursively expands `${workspaceFolder}`/`${env:NAME}` in every string value.
/// Single-pass: the result of a substitution is never re-scanned for more variables.
fn expand_variables(value: &mut Value, workspace_folder: &Path) {
    match value {
        Value::String(s) => *s = expand_string(s, workspace_folder),
        Value::Array(items) => {
            for item in items {
                expand_variables(item, workspace_folder);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v, workspace_folder);
            }
        }
        _ => {}
    }
}

fn expand_string(input: &str, workspace_folder: &Path) -> String {
    VARIABLE_PATTERN
        .replace_all(input, |caps: &regex::Captures| match caps.get(2) {
            Some(name) => std::env::var(name.as_str()).unwrap_or_default(),
            None => workspace_folder.to_string_lossy().into_owned(),
        })
        .into_owned()
}

/// Closed extension → language map; anything unrecognized falls back to `python`.
pub fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        "py" => "python",
        "js" | "ts" | "jsx" | "tsx" => "node",
        "java" => "java",
        "cs" => "coreclr",
        "cpp" | "cc" | "c" => "cppdbg",
        "go" => "go",
        "rs" => "lldb",
        "php" => "php",
        "rb" => "ruby",
        _ => "python",
    }
}
