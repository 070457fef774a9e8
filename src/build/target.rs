//! Build target definitions.
//!
//! A target is a named list of tasks with dependencies on other targets. The
//! [`BuildPlan`] holds every declared target with source locations resolved
//! from the build file.

use crate::config::{LoadedBuildFile, TaskConfig};
use crate::error::BuildError;
use crate::location::Location;
use std::collections::{BTreeMap, HashSet};

/// What a task does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Expand and print a message
    Echo { message: String },
    /// Expand a value and store it in a property
    SetProperty { name: String, value: String },
    /// Expand a message and fail the target with it
    Fail { message: String },
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Echo { .. } => write!(f, "echo"),
            TaskAction::SetProperty { .. } => write!(f, "property"),
            TaskAction::Fail { .. } => write!(f, "fail"),
        }
    }
}

/// One step of a target.
#[derive(Debug, Clone)]
pub struct Task {
    pub action: TaskAction,
    pub location: Location,
}

/// Expression text with the location of its first character.
#[derive(Debug, Clone)]
pub struct Condition {
    pub text: String,
    pub location: Location,
}

/// A reference to another target.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub location: Location,
}

/// A build target representing work to be done.
#[derive(Debug, Clone)]
pub struct Target {
    /// Unique name
    pub name: String,
    /// One-line description
    pub description: Option<String>,
    /// Targets that must succeed first, in declaration order
    pub dependencies: Vec<Dependency>,
    /// Run only when true
    pub if_condition: Option<Condition>,
    /// Skip when true
    pub unless: Option<Condition>,
    /// Steps, executed in order
    pub tasks: Vec<Task>,
    /// Where the target is declared
    pub location: Location,
}

impl Target {
    /// Create a target without tasks or dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            dependencies: vec![],
            if_condition: None,
            unless: None,
            tasks: vec![],
            location: Location::Unknown,
        }
    }

    /// Add a dependency to this target.
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency { name: name.into(), location: Location::Unknown });
        self
    }

    /// Names of the dependencies.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }

    /// Check if this target matches a filter string.
    ///
    /// Supports an exact name, `*` for everything, and a single trailing or
    /// leading `*` such as `test-*` or `*-docs`.
    pub fn matches_filter(&self, filter: &str) -> bool {
        if self.name == filter || filter == "*" {
            return true;
        }

        if let Some(prefix) = filter.strip_suffix('*') {
            return !prefix.contains('*') && self.name.starts_with(prefix);
        }
        if let Some(suffix) = filter.strip_prefix('*') {
            return !suffix.contains('*') && self.name.ends_with(suffix);
        }

        false
    }
}

/// Every declared target, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct BuildPlan {
    targets: BTreeMap<String, Target>,
}

impl BuildPlan {
    /// Create a new empty build plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert the `[targets]` of a build file, resolving spans to locations.
    pub fn from_build_file(loaded: &LoadedBuildFile) -> Self {
        let mut plan = Self::new();

        for (name, spanned) in &loaded.file().targets {
            let config = spanned.get_ref();
            let condition = |c: &toml::Spanned<String>| Condition {
                text: c.get_ref().clone(),
                location: loaded.value_location(c.span()),
            };

            let tasks = config
                .tasks
                .iter()
                .map(|task| {
                    let action = match task.get_ref() {
                        TaskConfig::Echo { echo } => TaskAction::Echo { message: echo.clone() },
                        TaskConfig::Property { property, value } => {
                            TaskAction::SetProperty { name: property.clone(), value: value.as_raw() }
                        }
                        TaskConfig::Fail { fail } => TaskAction::Fail { message: fail.clone() },
                    };
                    Task { action, location: loaded.location(task.span()) }
                })
                .collect();

            plan.add_target(Target {
                name: name.clone(),
                description: config.description.clone(),
                dependencies: config
                    .depends
                    .iter()
                    .map(|d| Dependency { name: d.get_ref().clone(), location: loaded.location(d.span()) })
                    .collect(),
                if_condition: config.if_condition.as_ref().map(condition),
                unless: config.unless.as_ref().map(condition),
                tasks,
                location: loaded.location(spanned.span()),
            });
        }

        plan
    }

    /// Add a target to the plan, replacing one with the same name.
    pub fn add_target(&mut self, target: Target) {
        self.targets.insert(target.name.clone(), target);
    }

    /// Look up a target.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    /// All targets, sorted by name.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    /// Get the number of targets in the plan.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Resolve requested names and patterns to target names.
    ///
    /// A pattern that matches nothing is an [`BuildError::UnknownTarget`].
    pub fn select(&self, patterns: &[String]) -> Result<Vec<String>, BuildError> {
        let mut selected: Vec<String> = Vec::new();

        for pattern in patterns {
            let matches: Vec<&String> =
                self.targets.values().filter(|t| t.matches_filter(pattern)).map(|t| &t.name).collect();
            if matches.is_empty() {
                return Err(BuildError::UnknownTarget { name: pattern.clone(), location: Location::Unknown });
            }
            for name in matches {
                if !selected.contains(name) {
                    selected.push(name.clone());
                }
            }
        }

        Ok(selected)
    }

    /// Targets reachable from `roots` through dependencies, roots included.
    ///
    /// Dependencies come before the targets that declare them, unless the
    /// graph has a cycle. An undeclared name is reported at the place that
    /// references it.
    pub fn closure(&self, roots: &[String]) -> Result<Vec<&Target>, BuildError> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for root in roots {
            let target = self
                .get(root)
                .ok_or_else(|| BuildError::UnknownTarget { name: root.clone(), location: Location::Unknown })?;
            self.visit_target(target, &mut visited, &mut result)?;
        }

        Ok(result)
    }

    fn visit_target<'a>(
        &'a self,
        target: &'a Target,
        visited: &mut HashSet<&'a str>,
        result: &mut Vec<&'a Target>,
    ) -> Result<(), BuildError> {
        if !visited.insert(target.name.as_str()) {
            return Ok(());
        }

        for dep in &target.dependencies {
            let dep_target = self.get(&dep.name).ok_or_else(|| BuildError::UnknownTarget {
                name: dep.name.clone(),
                location: dep.location.clone(),
            })?;
            self.visit_target(dep_target, visited, result)?;
        }

        result.push(target);
        Ok(())
    }
}
