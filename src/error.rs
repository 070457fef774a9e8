//! Error types shared by the expression language, the scheduler and the driver.
//!
//! Display strings never include the source location; use
//! [`BuildError::location`] or [`BuildError::describe`] to render it.

use crate::config::ConfigError;
use crate::graph::RunStats;
use crate::location::Location;
use std::fmt;
use thiserror::Error;

static UNKNOWN: Location = Location::Unknown;

/// Any failure raised while evaluating properties or running targets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A token was requested after end of input had been produced
    #[error("no more tokens: end of expression already reached")]
    Tokenizer,
    /// Malformed token in an expression
    #[error("{message}: '{text}'")]
    Lexical { message: String, text: String, position: usize, location: Location },
    /// A property was referenced but never set
    #[error("property '{name}' has not been set")]
    UndefinedProperty { name: String, location: Location },
    /// Property expansion revisited a property that is still being expanded
    #[error("circular property reference: {}", .chain.join(" -> "))]
    CircularReference { chain: Vec<String>, location: Location },
    /// Syntax or type error inside `${...}`
    #[error("{message}")]
    Expression { message: String, location: Location },
    /// A function call could not be dispatched or failed
    #[error("function '{function}' failed: {message}")]
    Invocation { function: String, message: String, location: Location },
    /// A `fail` task or an equivalent explicit failure
    #[error("{message}")]
    TaskFailed { message: String, location: Location },
    /// The visitor panicked while running a target
    #[error("panicked: {message}")]
    Panic { message: String },
    /// A scheduled target raised a failure
    #[error("target '{target}' failed: {cause}")]
    TargetExecution {
        target: String,
        location: Location,
        #[source]
        cause: Box<BuildError>,
    },
    /// One or more targets failed during a run
    #[error(transparent)]
    Run(Box<RunFailure>),
    /// The target graph contains a cycle
    #[error("circular dependency between targets: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String>, location: Location },
    /// A requested target or a dependency is not declared
    #[error("target '{name}' does not exist")]
    UnknownTarget { name: String, location: Location },
    /// Attempt to overwrite a read-only property
    #[error("property '{name}' is read-only")]
    ReadOnlyProperty { name: String, location: Location },
    /// A leaf was registered for a node that has prerequisites
    #[error("node '{name}' has {prerequisites} prerequisite(s) and cannot be a leaf")]
    NotALeaf { name: String, prerequisites: usize },
    /// The build file could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The worker pool could not be started
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl BuildError {
    /// Build the error raised when `name` is found while already on `chain`.
    ///
    /// The reported chain is the active expansion chain followed by the
    /// repeated name, so `${A}` inside `A` reports `[A, A]`.
    pub fn circular_reference(name: &str, chain: &[String], location: Location) -> Self {
        let mut chain = chain.to_vec();
        chain.push(name.to_string());
        BuildError::CircularReference { chain, location }
    }

    /// Create an expression error.
    pub fn expression(message: impl Into<String>, location: Location) -> Self {
        BuildError::Expression { message: message.into(), location }
    }

    /// Create a function invocation error.
    pub fn invocation(function: &str, message: impl Into<String>, location: Location) -> Self {
        BuildError::Invocation { function: function.to_string(), message: message.into(), location }
    }

    /// Wrap a failure raised while running `target`.
    ///
    /// Failures already attributed to a target are returned unchanged. The
    /// location of the cause wins over `fallback` when it is known.
    pub fn in_target(target: &str, fallback: &Location, cause: BuildError) -> Self {
        if matches!(cause, BuildError::TargetExecution { .. }) {
            return cause;
        }
        let location =
            if cause.location().is_known() { cause.location().clone() } else { fallback.clone() };
        BuildError::TargetExecution { target: target.to_string(), location, cause: Box::new(cause) }
    }

    /// The source location carried by this error, if any.
    pub fn location(&self) -> &Location {
        match self {
            BuildError::Lexical { location, .. }
            | BuildError::UndefinedProperty { location, .. }
            | BuildError::CircularReference { location, .. }
            | BuildError::Expression { location, .. }
            | BuildError::Invocation { location, .. }
            | BuildError::TaskFailed { location, .. }
            | BuildError::TargetExecution { location, .. }
            | BuildError::CircularDependency { location, .. }
            | BuildError::UnknownTarget { location, .. }
            | BuildError::ReadOnlyProperty { location, .. } => location,
            BuildError::Run(failure) => failure.location(),
            BuildError::Tokenizer
            | BuildError::Panic { .. }
            | BuildError::NotALeaf { .. }
            | BuildError::Config(_)
            | BuildError::ThreadPool(_) => &UNKNOWN,
        }
    }

    /// Fill in `location` when this error does not carry one yet.
    pub fn or_location(mut self, fallback: &Location) -> Self {
        if self.location().is_known() {
            return self;
        }
        match &mut self {
            BuildError::Lexical { location, .. }
            | BuildError::UndefinedProperty { location, .. }
            | BuildError::CircularReference { location, .. }
            | BuildError::Expression { location, .. }
            | BuildError::Invocation { location, .. }
            | BuildError::TaskFailed { location, .. }
            | BuildError::TargetExecution { location, .. }
            | BuildError::CircularDependency { location, .. }
            | BuildError::UnknownTarget { location, .. }
            | BuildError::ReadOnlyProperty { location, .. } => *location = fallback.clone(),
            _ => {}
        }
        self
    }

    /// Message prefixed with the location, as printed by the CLI.
    pub fn describe(&self) -> String {
        format!("{}{}", self.location().prefix(), self)
    }

    /// The aggregate run failure, if this is one.
    pub fn as_run_failure(&self) -> Option<&RunFailure> {
        match self {
            BuildError::Run(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Aggregate of every target failure collected during one run.
///
/// The first recorded failure headlines: its message and location are the
/// aggregate's, and it is returned as the error source. All failures stay
/// available through [`RunFailure::failures`], together with the statistics
/// of the run that produced them.
#[derive(Debug)]
pub struct RunFailure {
    failures: Vec<BuildError>,
    stats: RunStats,
}

impl RunFailure {
    /// Build an aggregate from the collected failures, `None` if there are none.
    pub fn from_failures(failures: Vec<BuildError>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures, stats: RunStats::default() })
        }
    }

    /// Attach the statistics of the failed run.
    pub fn with_stats(mut self, stats: RunStats) -> Self {
        self.stats = stats;
        self
    }

    /// Statistics of the failed run.
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The first recorded failure.
    pub fn first(&self) -> &BuildError {
        &self.failures[0]
    }

    /// Every failure, in the order they were recorded.
    pub fn failures(&self) -> &[BuildError] {
        &self.failures
    }

    /// Location of the first failure.
    pub fn location(&self) -> &Location {
        self.first().location()
    }

    /// Consume the aggregate, returning every failure.
    pub fn into_failures(self) -> Vec<BuildError> {
        self.failures
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first())
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.first())
    }
}

impl From<RunFailure> for BuildError {
    fn from(failure: RunFailure) -> Self {
        BuildError::Run(Box::new(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn task_failure(line: usize) -> BuildError {
        BuildError::TaskFailed {
            message: format!("boom {}", line),
            location: Location::new("rivet.toml", line, 3),
        }
    }

    #[test]
    fn test_circular_reference_appends_name() {
        let err = BuildError::circular_reference("A", &["A".to_string()], Location::Unknown);
        match &err {
            BuildError::CircularReference { chain, .. } => assert_eq!(chain, &["A", "A"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "circular property reference: A -> A");
    }

    #[test]
    fn test_in_target_prefers_cause_location() {
        let err = BuildError::in_target("compile", &Location::new("x", 1, 1), task_failure(9));
        assert_eq!(err.location(), &Location::new("rivet.toml", 9, 3));
        assert_eq!(err.to_string(), "target 'compile' failed: boom 9");
    }

    #[test]
    fn test_in_target_falls_back() {
        let cause = BuildError::Panic { message: "oops".to_string() };
        let err = BuildError::in_target("link", &Location::new("x", 4, 1), cause);
        assert_eq!(err.location(), &Location::new("x", 4, 1));
    }

    #[test]
    fn test_in_target_keeps_existing_attribution() {
        let inner = BuildError::in_target("a", &Location::Unknown, task_failure(2));
        let outer = BuildError::in_target("b", &Location::Unknown, inner);
        assert!(outer.to_string().starts_with("target 'a' failed"));
    }

    #[test]
    fn test_or_location() {
        let err = BuildError::expression("bad", Location::Unknown)
            .or_location(&Location::new("f", 2, 2));
        assert_eq!(err.location(), &Location::new("f", 2, 2));

        let err = task_failure(5).or_location(&Location::new("f", 2, 2));
        assert_eq!(err.location(), &Location::new("rivet.toml", 5, 3));
    }

    #[test]
    fn test_run_failure_headline() {
        assert!(RunFailure::from_failures(vec![]).is_none());

        let failure = RunFailure::from_failures(vec![task_failure(1), task_failure(2)]).unwrap();
        let err = BuildError::from(failure);

        assert_eq!(err.to_string(), "boom 1");
        assert_eq!(err.location(), &Location::new("rivet.toml", 1, 3));
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom 1".to_string()));
        assert_eq!(err.as_run_failure().unwrap().failures().len(), 2);
    }

    #[test]
    fn test_describe() {
        assert_eq!(task_failure(7).describe(), "rivet.toml:7:3: boom 7");
        assert_eq!(BuildError::Tokenizer.describe(), BuildError::Tokenizer.to_string());
    }
}
