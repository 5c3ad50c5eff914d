//! Run configuration.
//!
//! The layout mirrors the shape of the graph being executed:
//!
//! ```yaml
//! solids:
//!   add_one:
//!     inputs:
//!       num:
//!         value: 2
//!   add_both:
//!     solids:
//!       adder_a:
//!         config:
//!           verbose: true
//! ```
//!
//! Composites are addressed through their nested `solids` map and take no
//! `config` of their own. Every key must name an existing solid or input;
//! typos are reported instead of ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub solids: BTreeMap<String, SolidConfig>,
}

/// Configuration for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolidConfig {
    /// Values for inputs left unwired in the graph.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    /// Arbitrary per-solid configuration, see
    /// [`SolidContext::config`](crate::SolidContext::config).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Configuration for invocations inside a composite.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub solids: BTreeMap<String, SolidConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputValue {
    pub value: serde_json::Value,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Sets the value of `input` on the top-level solid `solid`.
    pub fn with_input(
        mut self,
        solid: &str,
        input: &str,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.solids
            .entry(solid.to_string())
            .or_default()
            .inputs
            .insert(input.to_string(), InputValue { value: value.into() });
        self
    }

    /// Sets the per-solid config of the top-level solid `solid`.
    pub fn with_config(mut self, solid: &str, config: serde_json::Value) -> Self {
        self.solids.entry(solid.to_string()).or_default().config = Some(config);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json() {
        let config =
            RunConfig::from_json(r#"{"solids":{"TableOne":{"inputs":{"num":{"value":1}}}}}"#)
                .unwrap();

        assert_eq!(config, RunConfig::new().with_input("TableOne", "num", 1));
    }

    #[test]
    fn test_from_yaml_nested() {
        let config = RunConfig::from_yaml(
            r#"
solids:
  add_both:
    solids:
      adder_a:
        config:
          verbose: true
        inputs:
          b:
            value: 2
"#,
        )
        .unwrap();

        let inner = &config.solids["add_both"].solids["adder_a"];
        assert_eq!(inner.config, Some(json!({ "verbose": true })));
        assert_eq!(inner.inputs["b"].value, json!(2));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = RunConfig::from_value(json!({ "solid": {} })).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));

        let err = RunConfig::from_value(json!({
            "solids": { "a": { "inputs": { "x": { "val": 1 } } } }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(RunConfig::from_json("{}").unwrap(), RunConfig::default());
    }
}
