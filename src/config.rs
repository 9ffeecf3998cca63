use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Template grammar settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyntaxConfig {
    /// Opening and closing interpolation tokens.
    pub interpolation_delimiters: [String; 2],
    /// Prefix marking a dynamic binding attribute.
    pub binding_delimiter: String,
    /// Prefix marking an event listener attribute.
    pub listener_delimiter: String,
    /// Prefix marking a directive attribute.
    pub directive_delimiter: String,
    /// Directive names to recognize. Empty accepts every directive.
    pub custom_directives: Vec<String>,
    /// Trim markup before matching its first tag.
    pub trim_whitespace: bool,
    /// Warn when a dynamic binding resolves to nothing.
    pub strict_mode: bool,
}

impl Default for SyntaxConfig {
    fn default() -> Self {
        Self {
            interpolation_delimiters: ["{{".to_string(), "}}".to_string()],
            binding_delimiter: ":".to_string(),
            listener_delimiter: "@".to_string(),
            directive_delimiter: "$".to_string(),
            custom_directives: Vec::new(),
            trim_whitespace: true,
            strict_mode: false,
        }
    }
}

impl SyntaxConfig {
    pub fn validate(&self) -> Result<()> {
        let delimiters = [
            ("interpolation open", &self.interpolation_delimiters[0]),
            ("interpolation close", &self.interpolation_delimiters[1]),
            ("binding", &self.binding_delimiter),
            ("listener", &self.listener_delimiter),
            ("directive", &self.directive_delimiter),
        ];
        for (label, value) in delimiters {
            if value.trim().is_empty() {
                return Err(RuntimeError::InvalidConfig {
                    reason: format!("{} delimiter must not be empty", label),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub syntax: SyntaxConfig,
    /// Tag of the elements the compiler mounts roots into.
    pub root_tag: String,
    /// Wrapper tag for components that do not name their own.
    pub default_wrapper: String,
    /// Style blocks are injected as `<style id="{style_prefix}-{tag}">`.
    pub style_prefix: String,
    /// Log scene snapshots after each render pass.
    pub debug_mode: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            syntax: SyntaxConfig::default(),
            root_tag: "scene-root".to_string(),
            default_wrapper: "div".to_string(),
            style_prefix: "a-style".to_string(),
            debug_mode: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(source: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(source).map_err(|e| RuntimeError::InvalidConfig {
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.syntax.validate()?;
        if self.root_tag.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig {
                reason: "root tag must not be empty".to_string(),
            });
        }
        if self.default_wrapper.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig {
                reason: "default wrapper tag must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn style_id(&self, tag: &str) -> String {
        format!("{}-{}", self.style_prefix, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(
            r#"{ "rootTag": "app-root", "syntax": { "customDirectives": ["$if"] } }"#,
        )
        .unwrap();
        assert_eq!(config.root_tag, "app-root");
        assert_eq!(config.default_wrapper, "div");
        assert_eq!(config.syntax.custom_directives, vec!["$if".to_string()]);
        assert_eq!(config.syntax.binding_delimiter, ":");
        assert!(config.syntax.trim_whitespace);
    }

    #[test]
    fn test_empty_delimiter_is_rejected() {
        let err = RuntimeConfig::from_json(r#"{ "syntax": { "listenerDelimiter": "" } }"#)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_json_is_a_config_error() {
        let err = RuntimeConfig::from_json("{ rootTag ").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_style_id() {
        assert_eq!(RuntimeConfig::default().style_id("counter"), "a-style-counter");
    }
}
