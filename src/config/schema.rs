//! Schema types for `rivet.toml`.
//!
//! Defines the structure and validation rules of a build file. Values that
//! errors may need to point at are wrapped in [`toml::Spanned`] so their
//! byte range survives deserialization.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use toml::Spanned;

/// Project metadata section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name (required)
    pub name: String,
    /// Target built when none is requested
    #[serde(default)]
    pub default: Option<Spanned<String>>,
}

/// Execution settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    /// Number of worker threads
    #[serde(default)]
    pub jobs: Option<usize>,
}

/// A property value as written in TOML.
///
/// Integers and booleans are accepted for convenience and stored as text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl PropertyValue {
    /// Text stored in the property dictionary.
    pub fn as_raw(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Boolean(b) => b.to_string(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// One step of a target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TaskConfig {
    /// `{ echo = "..." }`
    Echo { echo: String },
    /// `{ property = "name", value = "..." }`
    Property { property: String, value: PropertyValue },
    /// `{ fail = "..." }`
    Fail { fail: String },
}

/// A `[targets.<name>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Targets that must succeed before this one runs
    #[serde(default)]
    pub depends: Vec<Spanned<String>>,
    /// One-line description shown by `rivet targets`
    #[serde(default)]
    pub description: Option<String>,
    /// Run only when this expands to true
    #[serde(default, rename = "if")]
    pub if_condition: Option<Spanned<String>>,
    /// Skip when this expands to true
    #[serde(default)]
    pub unless: Option<Spanned<String>>,
    /// Steps, executed in order
    #[serde(default)]
    pub tasks: Vec<Spanned<TaskConfig>>,
}

/// Complete `rivet.toml` document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildFile {
    /// Project metadata (required)
    pub project: ProjectSection,
    /// Execution settings
    #[serde(default)]
    pub execution: ExecutionSection,
    /// Project properties
    #[serde(default)]
    pub properties: BTreeMap<String, Spanned<PropertyValue>>,
    /// Declared targets
    #[serde(default)]
    pub targets: BTreeMap<String, Spanned<TargetConfig>>,
}

/// User defaults read from the XDG config directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Execution settings
    #[serde(default)]
    pub execution: ExecutionSection,
    /// Default properties, overridden by the build file
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Validation error for build file fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "targets.compile.depends")
    pub field: String,
    /// Error message
    pub message: String,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check that `name` can be used as a target or property name.
///
/// Names start with a letter or `_`, continue with letters, digits, `_`,
/// `-` or `.`, and do not end with `-` or `.`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_') {
        return false;
    }
    if !name.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.')) {
        return false;
    }
    !name.ends_with('-') && !name.ends_with('.')
}

impl BuildFile {
    /// Validate the document.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "project.name".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        if let Some(default) = &self.project.default {
            if !self.targets.contains_key(default.get_ref()) {
                errors.push(ConfigValidationError {
                    field: "project.default".to_string(),
                    message: format!("names undeclared target '{}'", default.get_ref()),
                });
            }
        }

        if self.execution.jobs == Some(0) {
            errors.push(ConfigValidationError {
                field: "execution.jobs".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        for name in self.properties.keys() {
            if !is_valid_name(name) {
                errors.push(ConfigValidationError {
                    field: format!("properties.{}", name),
                    message: "is not a valid property name".to_string(),
                });
            }
        }

        for (name, target) in &self.targets {
            if !is_valid_name(name) {
                errors.push(ConfigValidationError {
                    field: format!("targets.{}", name),
                    message: "is not a valid target name".to_string(),
                });
            }

            for dep in &target.get_ref().depends {
                if !self.targets.contains_key(dep.get_ref()) {
                    errors.push(ConfigValidationError {
                        field: format!("targets.{}.depends", name),
                        message: format!("names undeclared target '{}'", dep.get_ref()),
                    });
                }
            }

            for task in &target.get_ref().tasks {
                if let TaskConfig::Property { property, .. } = task.get_ref() {
                    if !is_valid_name(property) {
                        errors.push(ConfigValidationError {
                            field: format!("targets.{}.tasks", name),
                            message: format!("'{}' is not a valid property name", property),
                        });
                    }
                }
            }
        }

        errors
    }
}
