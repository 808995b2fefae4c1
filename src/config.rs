// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Agent configuration, from builders or from flag command strings.
//!
//! # Examples
//!
//! ```rust
//! use visflag::config::{AgentConfig, AgentMode};
//!
//! let config = AgentConfig::from_command("mode=shadow tolerance=2 antenna='!0&1'").unwrap();
//! assert_eq!(config.mode, AgentMode::Shadow);
//! assert_eq!(config.selection.antenna.as_deref(), Some("!0&1"));
//! ```

use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use derive_builder::Builder;
use log::debug;

use crate::{
    agent::{FlagAgent, FlagAlgorithm},
    data::MetadataCatalog,
    error::{ConfigError, FlagError},
    flag_cube::FlagMode,
    manual::ManualFlagAlgorithm,
    selection::{DataSelection, SelectionConfig, SelectionConfigBuilder},
    shadow::{parse_additional_antennas, ShadowContext, ShadowFlagAlgorithm},
    worker::{AgentHandle, ExecutionMode},
};

/// A loosely typed configuration value, as found in records like virtual antenna descriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// A boolean
    Bool(bool),
    /// An integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A string
    Str(String),
    /// A list of values
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    /// The value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Int(value) => Some(value as f64),
            Self::Float(value) => Some(value),
            _ => None,
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A record of named values.
pub type ConfigRecord = BTreeMap<String, ConfigValue>;

/// What an agent does with the data it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    /// Flag everything selected
    #[default]
    Manual,
    /// Unflag everything selected
    Unflag,
    /// Flag rows with shadowed antennas
    Shadow,
}

impl FromStr for AgentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "unflag" => Ok(Self::Unflag),
            "shadow" => Ok(Self::Shadow),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Manual => "manual",
                Self::Unflag => "unflag",
                Self::Shadow => "shadow",
            }
        )
    }
}

/// Everything needed to create one agent.
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(setter(into))]
pub struct AgentConfig {
    /// Agent name, the mode name if empty
    #[builder(default)]
    pub name: String,
    /// What the agent does
    #[builder(default)]
    pub mode: AgentMode,
    /// What the agent looks at
    #[builder(default)]
    pub selection: SelectionConfig,
    /// Whether to flag (`true`) or unflag (`false`) what the agent decides on
    #[builder(default = "true")]
    pub apply: bool,
    /// Whether the agent keeps a private copy of the flags it writes
    #[builder(default = "false")]
    pub private_flags: bool,
    /// Whether the agent runs in its own thread
    #[builder(default = "false")]
    pub background: bool,
    /// Overlap allowed before an antenna is considered shadowed \[metres\]
    #[builder(default = "0.0")]
    pub tolerance: f64,
    /// Virtual antennas considered when looking for shadows
    #[builder(default)]
    pub addantenna: Vec<ConfigRecord>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            mode: AgentMode::default(),
            selection: SelectionConfig::default(),
            apply: true,
            private_flags: false,
            background: false,
            tolerance: 0.0,
            addantenna: vec![],
        }
    }
}

impl Display for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Agent {} ({} mode) will {} {}.",
            self.agent_name(),
            self.mode,
            if self.flag_value() { "flag" } else { "unflag" },
            self.selection
        )?;
        if self.mode == AgentMode::Shadow {
            writeln!(
                f,
                "Shadow tolerance is {}m, with {} additional antennas.",
                self.tolerance,
                self.addantenna.len()
            )?;
        }
        writeln!(
            f,
            "{} keep private flags.",
            if self.private_flags {
                "Will"
            } else {
                "Will not"
            }
        )?;
        writeln!(
            f,
            "{} run in the background.",
            if self.background { "Will" } else { "Will not" }
        )?;
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Ok(true),
        "false" | "f" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a boolean".into(),
            received: value.to_string(),
        }),
    }
}

impl AgentConfig {
    /// The name the agent will have.
    pub fn agent_name(&self) -> String {
        if self.name.is_empty() {
            self.mode.to_string()
        } else {
            self.name.clone()
        }
    }

    /// The value the agent will write.
    pub fn flag_value(&self) -> bool {
        self.mode != AgentMode::Unflag && self.apply
    }

    /// Parse a flag command of space separated `key=value` tokens. Values may be quoted.
    ///
    /// `addantenna` can't be given this way, use [`AgentConfigBuilder`].
    ///
    /// # Errors
    ///
    /// A [`ConfigError`] for tokens that aren't `key=value`, unknown keys and malformed values.
    pub fn from_command(command: &str) -> Result<Self, ConfigError> {
        let tokens = shlex::split(command).ok_or_else(|| ConfigError::Tokenize(command.into()))?;
        let mut builder = AgentConfigBuilder::default();
        let mut selection = SelectionConfigBuilder::default();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: token.clone(),
                    expected: "key=value".into(),
                    received: token.clone(),
                })?;
            match key {
                "mode" => {
                    builder.mode(value.parse::<AgentMode>()?);
                }
                "name" => {
                    builder.name(value);
                }
                "apply" => {
                    builder.apply(parse_bool(key, value)?);
                }
                "private_flags" => {
                    builder.private_flags(parse_bool(key, value)?);
                }
                "background" => {
                    builder.background(parse_bool(key, value)?);
                }
                "tolerance" => {
                    let tolerance = value
                        .parse::<f64>()
                        .ok()
                        .filter(|tolerance| tolerance.is_finite())
                        .ok_or_else(|| ConfigError::InvalidValue {
                            key: key.into(),
                            expected: "a distance in metres".into(),
                            received: value.into(),
                        })?;
                    builder.tolerance(tolerance);
                }
                "addantenna" => {
                    return Err(ConfigError::InvalidValue {
                        key: key.into(),
                        expected: "a list of records, given through the builder".into(),
                        received: value.into(),
                    })
                }
                "autocorr" => {
                    selection.autocorr(parse_bool(key, value)?);
                }
                "array" => {
                    selection.array(value);
                }
                "field" => {
                    selection.field(value);
                }
                "scan" => {
                    selection.scan(value);
                }
                "timerange" => {
                    selection.timerange(value);
                }
                "spw" => {
                    selection.spw(value);
                }
                "antenna" => {
                    selection.antenna(value);
                }
                "uvrange" => {
                    selection.uvrange(value);
                }
                "correlation" => {
                    selection.correlation(value);
                }
                "observation" => {
                    selection.observation(value);
                }
                "intent" => {
                    selection.intent(value);
                }
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            }
        }
        let selection = selection
            .build()
            .map_err(|e| ConfigError::Builder(e.to_string()))?;
        builder
            .selection(selection)
            .build()
            .map_err(|e| ConfigError::Builder(e.to_string()))
    }
}

/// Create the agent described by `config`.
///
/// Shadow agents share their computations through `shadow_context`.
///
/// # Errors
///
/// Fails if the selection can't be resolved against `catalog`, or the tolerance isn't finite.
pub fn create_agent(
    config: &AgentConfig,
    catalog: &MetadataCatalog,
    shadow_context: &Arc<ShadowContext>,
) -> Result<AgentHandle, FlagError> {
    if !config.tolerance.is_finite() {
        return Err(ConfigError::InvalidValue {
            key: "tolerance".into(),
            expected: "a distance in metres".into(),
            received: config.tolerance.to_string(),
        }
        .into());
    }
    let selection = DataSelection::new(&config.selection, catalog)?;
    let algorithm: Box<dyn FlagAlgorithm> = match config.mode {
        AgentMode::Manual | AgentMode::Unflag => Box::new(ManualFlagAlgorithm),
        AgentMode::Shadow => Box::new(ShadowFlagAlgorithm::new(
            catalog,
            config.tolerance,
            parse_additional_antennas(&config.addantenna),
            shadow_context.clone(),
        )),
    };
    debug!("{config}");
    let agent = FlagAgent::new(config.agent_name(), selection, algorithm)
        .with_flag_value(config.flag_value())
        .with_mode(if config.private_flags {
            FlagMode::Private
        } else {
            FlagMode::Common
        });
    let execution = if config.background {
        ExecutionMode::Background
    } else {
        ExecutionMode::Synchronous
    };
    Ok(AgentHandle::new(agent, execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::SelectionError,
        test_common::{get_all_pairs, get_test_buffer, get_test_catalog},
    };

    #[test]
    fn test_command_matches_builder() {
        let parsed = AgentConfig::from_command(
            "mode=shadow name=shadows tolerance=2.5 antenna='!0&1' spw=\"0:1~3\" background=True",
        )
        .unwrap();
        let built = AgentConfigBuilder::default()
            .mode(AgentMode::Shadow)
            .name("shadows")
            .tolerance(2.5)
            .background(true)
            .selection(
                SelectionConfigBuilder::default()
                    .antenna("!0&1")
                    .spw("0:1~3")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert_eq!(parsed, built);
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfigBuilder::default().build().unwrap();
        assert_eq!(config, AgentConfig::default());
        assert!(config.apply);
        assert_eq!(config.agent_name(), "manual");
        assert_eq!(AgentConfig::from_command("").unwrap(), config);
    }

    #[test]
    fn test_command_errors() {
        assert_eq!(
            AgentConfig::from_command("mode=clip"),
            Err(ConfigError::UnknownMode("clip".into()))
        );
        assert_eq!(
            AgentConfig::from_command("clipminmax=[0,1]"),
            Err(ConfigError::UnknownKey {
                key: "clipminmax".into()
            })
        );
        assert!(matches!(
            AgentConfig::from_command("tolerance=far"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_command("tolerance=nan"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_command("apply=maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_command("addantenna=[]"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_command("shadow"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_command("antenna='0&1"),
            Err(ConfigError::Tokenize(_))
        ));
    }

    #[test]
    fn test_unflag_mode_writes_false() {
        let config = AgentConfig::from_command("mode=unflag apply=true").unwrap();
        assert!(!config.flag_value());
        let config = AgentConfig::from_command("mode=manual apply=false").unwrap();
        assert!(!config.flag_value());
    }

    #[test]
    fn test_display_describes_agent() {
        let config = AgentConfig::from_command("mode=shadow tolerance=1 private_flags=1").unwrap();
        let description = config.to_string();
        assert!(description.contains("Agent shadow (shadow mode) will flag all data."));
        assert!(description.contains("Shadow tolerance is 1m, with 0 additional antennas."));
        assert!(description.contains("Will keep private flags."));
        assert!(description.contains("Will not run in the background."));
    }

    #[test]
    fn test_create_agent_from_command() {
        let catalog = get_test_catalog(3);
        let context = Arc::new(ShadowContext::new());
        let config = AgentConfig::from_command("mode=manual antenna=ant01").unwrap();
        let mut handle = create_agent(&config, &catalog, &context).unwrap();
        assert_eq!(handle.name(), "manual");
        assert!(handle.flag_value());

        let buffer = Arc::new(get_test_buffer(&get_all_pairs(3, false), 1, 1));
        handle.queue_process(buffer.clone()).unwrap();
        handle.complete_process().unwrap();
        // (0, 1) and (1, 2)
        assert_eq!(buffer.flags.rows().to_vec(), vec![true, false, true]);
    }

    #[test]
    fn test_create_shadow_agents_share_context() {
        let catalog = get_test_catalog(3);
        let context = Arc::new(ShadowContext::new());
        let config = AgentConfigBuilder::default()
            .mode(AgentMode::Shadow)
            .addantenna(vec![ConfigRecord::from([
                ("diameter".to_string(), ConfigValue::from(12.0)),
                ("position".to_string(), ConfigValue::from(vec![1.0, 2.0, 3.0])),
            ])])
            .build()
            .unwrap();
        let first = create_agent(&config, &catalog, &context).unwrap();
        let second = create_agent(&config, &catalog, &context).unwrap();
        assert_eq!(context.num_agents(), 2);
        drop(first);
        drop(second);
        assert_eq!(context.num_agents(), 0);
    }

    #[test]
    fn test_create_agent_propagates_selection_errors() {
        let catalog = get_test_catalog(3);
        let context = Arc::new(ShadowContext::new());
        let config = AgentConfig::from_command("correlation=RL").unwrap();
        assert!(matches!(
            create_agent(&config, &catalog, &context),
            Err(FlagError::Selection(SelectionError::NoCorrelations { .. }))
        ));
        let config = AgentConfigBuilder::default()
            .tolerance(f64::INFINITY)
            .build()
            .unwrap();
        assert!(matches!(
            create_agent(&config, &catalog, &context),
            Err(FlagError::Config(ConfigError::InvalidValue { .. }))
        ));
    }
}
