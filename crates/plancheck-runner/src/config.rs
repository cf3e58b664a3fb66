use crate::process::{PlannerCommand, DOMAIN_PATH_PLACEHOLDER, PROBLEM_PATH_PLACEHOLDER};
use anyhow::{anyhow, Context, Result};
use plancheck_core::{BenchmarkSpec, Markers};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "plancheck.yaml";
pub const DEFAULT_TIMEOUT_S: u64 = 60;
pub const DEFAULT_MEMORY_LIMIT_GB: u64 = 25;
pub const DEFAULT_PLANNER_PROGRAM: &str = "./build/treerex";
const DEFAULT_PLANNER_FLAGS: &[&str] = &["-po", "-sibylsat"];

const DEFAULT_CATALOG: &[(&str, usize)] = &[
    ("Benchmarks/ipc2023-domains/partial-order/Transport", 15),
    ("Benchmarks/ipc2023-domains/partial-order/Barman-BDI", 2),
    ("Benchmarks/ipc2023-domains/partial-order/Rover", 10),
    ("Benchmarks/ipc2023-domains/partial-order/Satellite", 20),
    ("Benchmarks/ipc2023-domains/partial-order/UM-Translog", 10),
    ("Benchmarks/ipc2023-domains/partial-order/PCP", 1),
    ("Benchmarks/ipc2023-domains/partial-order/Woodworking", 10),
];

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub benchmarks: Vec<BenchmarkSpec>,
    pub planner: PlannerCommand,
    pub timeout: Duration,
    pub memory_limit_gb: u64,
    pub markers: Markers,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let mut argv = vec![
            DEFAULT_PLANNER_PROGRAM.to_string(),
            DOMAIN_PATH_PLACEHOLDER.to_string(),
            PROBLEM_PATH_PLACEHOLDER.to_string(),
        ];
        argv.extend(DEFAULT_PLANNER_FLAGS.iter().map(ToString::to_string));
        Self {
            benchmarks: DEFAULT_CATALOG
                .iter()
                .map(|(path, cap)| BenchmarkSpec::new(*path, *cap))
                .collect(),
            planner: PlannerCommand { argv },
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_S),
            memory_limit_gb: DEFAULT_MEMORY_LIMIT_GB,
            markers: Markers::default(),
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    BuiltinDefaults,
}

/// Command-line adjustments layered over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timeout_s: Option<u64>,
    pub memory_limit_gb: Option<u64>,
    pub planner: Option<String>,
    pub benchmarks: Vec<String>,
}

impl HarnessConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(timeout_s) = overrides.timeout_s {
            if timeout_s == 0 {
                return Err(anyhow!("--timeout-s must be positive"));
            }
            self.timeout = Duration::from_secs(timeout_s);
        }
        if let Some(memory_limit_gb) = overrides.memory_limit_gb {
            self.memory_limit_gb = memory_limit_gb;
        }
        if let Some(planner) = overrides.planner.as_deref() {
            if planner.trim().is_empty() {
                return Err(anyhow!("--planner must not be empty"));
            }
            self.planner.set_program(planner);
        }
        if !overrides.benchmarks.is_empty() {
            for wanted in &overrides.benchmarks {
                if !self.benchmarks.iter().any(|spec| spec.name() == *wanted) {
                    let known = self
                        .benchmarks
                        .iter()
                        .map(BenchmarkSpec::name)
                        .collect::<Vec<_>>();
                    return Err(anyhow!(
                        "unknown benchmark '{}' (catalog: {})",
                        wanted,
                        known.join(", ")
                    ));
                }
            }
            self.benchmarks
                .retain(|spec| overrides.benchmarks.contains(&spec.name()));
        }
        Ok(())
    }
}

/// Loads `path`, or the built-in defaults when the implicit default file is
/// absent. An explicitly named file must exist.
pub fn load_config_or_default(
    path: Option<&Path>,
) -> Result<(HarnessConfig, ConfigSource)> {
    match path {
        Some(path) => Ok((load_config(path)?, ConfigSource::File(path.to_path_buf()))),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.is_file() {
                Ok((
                    load_config(default_path)?,
                    ConfigSource::File(default_path.to_path_buf()),
                ))
            } else {
                Ok((HarnessConfig::default(), ConfigSource::BuiltinDefaults))
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    let raw_yaml = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&raw_yaml)
        .with_context(|| format!("invalid YAML in {}", path.display()))?;
    let json_value: Value = serde_json::to_value(yaml_value)?;
    let config_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    parse_config(&json_value, config_dir)
        .with_context(|| format!("invalid config {}", path.display()))
}

/// Builds a config from a parsed document. A relative `root` is taken
/// relative to `config_dir`; without `root`, benchmark paths stay relative to
/// the working directory.
pub fn parse_config(json_value: &Value, config_dir: &Path) -> Result<HarnessConfig> {
    if !json_value.is_object() {
        return Err(anyhow!("config must be a mapping"));
    }
    let defaults = HarnessConfig::default();

    let root = match json_value.pointer("/root") {
        None | Some(Value::Null) => None,
        Some(Value::String(root)) if !root.trim().is_empty() => Some(config_dir.join(root)),
        Some(_) => return Err(anyhow!("root must be a non-empty string")),
    };

    let planner = match parse_command_field(json_value.pointer("/planner/command"), "planner.command")? {
        Some(argv) => PlannerCommand::new(argv)?,
        None => defaults.planner,
    };
    let timeout_s = parse_positive_u64(json_value.pointer("/planner/timeout_s"), "planner.timeout_s")?
        .unwrap_or(DEFAULT_TIMEOUT_S);
    let memory_limit_gb = match json_value.pointer("/planner/memory_limit_gb") {
        None | Some(Value::Null) => DEFAULT_MEMORY_LIMIT_GB,
        Some(value) => value
            .as_u64()
            .ok_or_else(|| anyhow!("planner.memory_limit_gb must be a non-negative integer"))?,
    };

    let mut markers = Markers::default();
    if let Some(marker) = parse_marker(json_value, "/verification/verified_marker")? {
        markers.verified = marker;
    }
    if let Some(marker) = parse_marker(json_value, "/verification/plan_length_marker")? {
        markers.plan_length = marker;
    }

    let benchmarks = match json_value.pointer("/benchmarks") {
        None | Some(Value::Null) => defaults.benchmarks,
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| parse_benchmark(item, idx, root.as_deref()))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(anyhow!("benchmarks must be a list")),
    };

    Ok(HarnessConfig {
        benchmarks,
        planner,
        timeout: Duration::from_secs(timeout_s),
        memory_limit_gb,
        markers,
    })
}

fn parse_benchmark(item: &Value, idx: usize, root: Option<&Path>) -> Result<BenchmarkSpec> {
    let path = item
        .pointer("/path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .ok_or_else(|| anyhow!("benchmarks[{}].path must be a non-empty string", idx))?;
    let cap = item
        .pointer("/instances")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("benchmarks[{}].instances must be a non-negative integer", idx))?;
    let directory = match root {
        Some(root) => root.join(path),
        None => PathBuf::from(path),
    };
    Ok(BenchmarkSpec::new(directory, cap as usize))
}

/// A string command is split on whitespace with no quoting rules, so an
/// argument containing spaces needs the list form.
fn parse_command_field(value: Option<&Value>, field: &str) -> Result<Option<Vec<String>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let parts = s.split_whitespace().map(ToString::to_string).collect::<Vec<_>>();
            if parts.is_empty() {
                return Err(anyhow!("{} must not be empty", field));
            }
            Ok(Some(parts))
        }
        Some(Value::Array(items)) => {
            let mut parsed = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let token = item
                    .as_str()
                    .ok_or_else(|| anyhow!("{}[{}] must be a string", field, idx))?;
                if token.trim().is_empty() {
                    return Err(anyhow!("{}[{}] must not be empty", field, idx));
                }
                parsed.push(token.to_string());
            }
            if parsed.is_empty() {
                return Err(anyhow!("{} must not be empty", field));
            }
            Ok(Some(parsed))
        }
        Some(_) => Err(anyhow!("{} must be a string or string[]", field)),
    }
}

fn parse_positive_u64(value: Option<&Value>, field: &str) -> Result<Option<u64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Ok(Some(n)),
            _ => Err(anyhow!("{} must be a positive integer", field)),
        },
    }
}

fn parse_marker(json_value: &Value, pointer: &str) -> Result<Option<String>> {
    match json_value.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(marker)) if !marker.is_empty() => Ok(Some(marker.clone())),
        Some(_) => Err(anyhow!(
            "{} must be a non-empty string",
            pointer.trim_start_matches('/').replace('/', ".")
        )),
    }
}

pub fn default_config_yaml() -> Result<String> {
    let config = HarnessConfig::default();
    let value = json!({
        "planner": {
            "command": config.planner.argv(),
            "timeout_s": config.timeout.as_secs(),
            "memory_limit_gb": config.memory_limit_gb,
        },
        "verification": {
            "verified_marker": config.markers.verified,
            "plan_length_marker": config.markers.plan_length,
        },
        "benchmarks": config
            .benchmarks
            .iter()
            .map(|spec| json!({
                "path": spec.directory.to_string_lossy(),
                "instances": spec.instance_cap,
            }))
            .collect::<Vec<_>>(),
    });
    Ok(serde_yaml::to_string(&value)?)
}

/// Writes the default configuration, refusing to clobber an existing file
/// unless `force` is set.
pub fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, default_config_yaml()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
