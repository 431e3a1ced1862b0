// External option resolver. Procedures declare an option schema; this module
// turns raw strings from the CLI, the user's ~/.xhddrc and the procedure's
// own suggested defaults into a typed, validated OptionMap. The engine and
// the procedures never read the config file themselves.

use crate::device::Device;
use crate::procedure::{OptionKind, OptionMap, OptionValue, Procedure};
use directories::BaseDirs;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = ".xhddrc";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("option {name}: expected an integer, got {value:?}")]
    NotAnInteger { name: String, value: String },

    #[error("option {name}: {value:?} is not one of the allowed choices {choices:?}")]
    BadChoice {
        name: String,
        value: String,
        choices: Vec<String>,
    },

    #[error("option {name} has no value and no default")]
    Unresolved { name: String },

    #[error("unknown option {name} for procedure {procedure}")]
    UnknownOption { name: String, procedure: String },
}

/// Parsed user configuration: line-oriented `procedure.option=value` entries.
/// `procedure.option.suggest=value` overrides the suggested default without
/// forcing the value.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    entries: BTreeMap<String, String>,
}

impl UserConfig {
    /// Load `~/.xhddrc` if present. A missing file is an empty config.
    pub fn load() -> Self {
        match BaseDirs::new() {
            Some(dirs) => Self::from_path(dirs.home_dir().join(CONFIG_FILE_NAME)),
            None => Self::default(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::parse(&text),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    /// Value the user pinned for `procedure.option`.
    pub fn supplied(&self, procedure: &str, option: &str) -> Option<&str> {
        self.entries
            .get(&format!("{}.{}", procedure, option))
            .map(String::as_str)
    }

    /// Suggested default the user configured for `procedure.option`.
    pub fn suggested(&self, procedure: &str, option: &str) -> Option<&str> {
        self.entries
            .get(&format!("{}.{}.suggest", procedure, option))
            .map(String::as_str)
    }
}

/// Resolve every option the procedure declares, in precedence order:
/// explicit override, config-supplied value, config-suggested default,
/// procedure-suggested default. Values are validated against the declared
/// kind and choice set before `open` ever sees them.
pub fn resolve_options(
    procedure: &dyn Procedure,
    dev: &Device,
    config: &UserConfig,
    overrides: &[(String, String)],
) -> Result<OptionMap, ResolveError> {
    let specs = procedure.options();
    for (name, _) in overrides {
        if !specs.iter().any(|spec| spec.name == name.as_str()) {
            return Err(ResolveError::UnknownOption {
                name: name.clone(),
                procedure: procedure.name().to_string(),
            });
        }
    }

    let mut opts = OptionMap::new();
    for spec in specs {
        let raw = overrides
            .iter()
            .find(|(name, _)| name.as_str() == spec.name)
            .map(|(_, value)| value.clone())
            .or_else(|| {
                config
                    .supplied(procedure.name(), spec.name)
                    .map(str::to_string)
            })
            .or_else(|| {
                config
                    .suggested(procedure.name(), spec.name)
                    .map(str::to_string)
            })
            .or_else(|| procedure.suggest_default(dev, spec));

        let raw = raw.ok_or_else(|| ResolveError::Unresolved {
            name: spec.name.to_string(),
        })?;

        if !spec.choices.is_empty() && !spec.choices.contains(&raw.as_str()) {
            return Err(ResolveError::BadChoice {
                name: spec.name.to_string(),
                value: raw,
                choices: spec.choices.iter().map(|c| c.to_string()).collect(),
            });
        }

        let value = match spec.kind {
            OptionKind::Int64 => {
                let parsed = raw.parse::<i64>().map_err(|_| ResolveError::NotAnInteger {
                    name: spec.name.to_string(),
                    value: raw.clone(),
                })?;
                OptionValue::Int64(parsed)
            }
            OptionKind::String => OptionValue::Str(raw),
        };
        debug!(procedure = procedure.name(), option = spec.name, ?value, "option resolved");
        opts.insert(spec.name, value);
    }
    Ok(opts)
}

/// Path the config is loaded from, for diagnostics.
pub fn config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedures::erase::EraseProcedure;

    fn device() -> Device {
        Device {
            path: "/dev/sdz".into(),
            capacity: 1 << 20,
            sector_size: 512,
            ata_capable: true,
            mounted: false,
            model: "test".into(),
        }
    }

    #[test]
    fn parses_supplied_and_suggested_entries() {
        let config = UserConfig::parse(
            "# comment\n\
             erase.start_lba=4096\n\
             erase.pattern.suggest=255\n\
             \n\
             runscript.script_file = probe.xs \n",
        );
        assert_eq!(config.supplied("erase", "start_lba"), Some("4096"));
        assert_eq!(config.suggested("erase", "pattern"), Some("255"));
        assert_eq!(config.supplied("runscript", "script_file"), Some("probe.xs"));
        assert_eq!(config.supplied("erase", "pattern"), None);
    }

    #[test]
    fn missing_config_file_is_empty() {
        let config = UserConfig::from_path("/nonexistent/.xhddrc");
        assert_eq!(config.supplied("erase", "start_lba"), None);
    }

    #[test]
    fn procedure_defaults_fill_unconfigured_options() {
        let procedure = EraseProcedure::new();
        let opts =
            resolve_options(&procedure, &device(), &UserConfig::default(), &[]).unwrap();
        assert_eq!(opts.get_i64("start_lba"), Some(0));
        assert_eq!(opts.get_i64("pattern"), Some(0));
    }

    #[test]
    fn config_value_beats_default_and_override_beats_config() {
        let procedure = EraseProcedure::new();
        let config = UserConfig::parse("erase.start_lba=100\n");

        let opts = resolve_options(&procedure, &device(), &config, &[]).unwrap();
        assert_eq!(opts.get_i64("start_lba"), Some(100));

        let overrides = vec![("start_lba".to_string(), "200".to_string())];
        let opts = resolve_options(&procedure, &device(), &config, &overrides).unwrap();
        assert_eq!(opts.get_i64("start_lba"), Some(200));
    }

    #[test]
    fn non_numeric_int_option_is_rejected() {
        let procedure = EraseProcedure::new();
        let overrides = vec![("start_lba".to_string(), "abc".to_string())];
        let err = resolve_options(&procedure, &device(), &UserConfig::default(), &overrides)
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotAnInteger { .. }));
    }

    #[test]
    fn unknown_override_is_rejected() {
        let procedure = EraseProcedure::new();
        let overrides = vec![("bogus".to_string(), "1".to_string())];
        let err = resolve_options(&procedure, &device(), &UserConfig::default(), &overrides)
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownOption { .. }));
    }
}
