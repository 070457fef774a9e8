//! Build pipeline orchestration.
//!
//! The pipeline turns the requested targets into an [`ExecutionGraph`] and
//! runs each target's tasks on the worker pool once its dependencies have
//! succeeded.

use crate::build::{BuildContext, BuildPlan, BuildResult, Condition, Target, TargetResult, Task, TaskAction};
use crate::error::BuildError;
use crate::expression::Value;
use crate::graph::ExecutionGraph;
use crate::location::Location;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

/// Build pipeline for executing builds.
pub struct BuildPipeline {
    /// Build context
    context: BuildContext,
    /// Declared targets
    plan: BuildPlan,
}

impl BuildPipeline {
    /// Create a new build pipeline.
    pub fn new(context: BuildContext) -> Self {
        let plan = BuildPlan::from_build_file(context.build_file());
        Self { context, plan }
    }

    /// Get the build context.
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Get the declared targets.
    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    /// Targets to build: the filter, else `project.default`, else everything.
    pub fn requested_targets(&self) -> Result<Vec<String>, BuildError> {
        if let Some(filter) = self.context.target_filter().filter(|f| !f.is_empty()) {
            return self.plan.select(filter);
        }

        if let Some(default) = &self.context.build_file().file().project.default {
            return Ok(vec![default.get_ref().clone()]);
        }

        Ok(self.plan.targets().map(|t| t.name.clone()).collect())
    }

    /// Build the execution graph for `targets` and check it for cycles.
    pub fn graph(&self, targets: &[&Target]) -> Result<ExecutionGraph, BuildError> {
        let mut graph = ExecutionGraph::new().with_jobs(self.context.jobs());

        for target in targets {
            let node = graph.get_node(&target.name);
            for dep in target.dependency_names() {
                let prerequisite = graph.get_node(dep);
                graph.register_dependant_node(prerequisite, node);
            }
        }
        graph.register_leaves();

        graph.check_acyclic().map_err(|err| {
            let location = match &err {
                BuildError::CircularDependency { chain, .. } => {
                    chain.first().and_then(|name| self.plan.get(name)).map(|t| t.location.clone())
                }
                _ => None,
            };
            err.or_location(&location.unwrap_or_default())
        })?;

        Ok(graph)
    }

    /// Run the build pipeline.
    ///
    /// Errors found before any target runs (unknown or cyclic targets, a
    /// worker pool that cannot start) are returned as `Err`. Target failures
    /// are recorded in the returned [`BuildResult`].
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        let roots = self.requested_targets()?;
        let targets = self.plan.closure(&roots)?;
        let mut graph = self.graph(&targets)?;

        if self.context.is_verbose() {
            println!("Build plan: {} targets", targets.len());
            for target in &targets {
                println!("  - {}", target.name);
            }
        }
        info!(targets = targets.len(), jobs = graph.jobs(), "starting build");

        let records: Mutex<HashMap<String, TargetResult>> = Mutex::new(HashMap::new());
        let outcome = graph.run(|name| self.visit(name, &records));
        let mut records = records.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut result = BuildResult::new();
        for target in &targets {
            let record = records.remove(&target.name).unwrap_or_else(|| TargetResult::not_run(target.name.clone()));
            result.add_result(record);
        }

        match outcome {
            Ok(stats) => result.stats = stats,
            Err(err) => {
                let Some(failure) = err.as_run_failure() else {
                    return Err(err);
                };
                mark_unrecorded_failures(&mut result, failure.failures());
                result.stats = failure.stats().clone();
                result.set_failure(err);
            }
        }

        result.total_duration = start.elapsed();
        info!("{}", result.summary());
        Ok(result)
    }

    fn visit(&self, name: &str, records: &Mutex<HashMap<String, TargetResult>>) -> Result<(), BuildError> {
        let target = self
            .plan
            .get(name)
            .ok_or_else(|| BuildError::UnknownTarget { name: name.to_string(), location: Location::Unknown })?;

        let started = Instant::now();
        let mut messages = Vec::new();
        let outcome = self.run_target(target, &mut messages);
        let duration = started.elapsed();

        let record = match &outcome {
            Ok(true) => TargetResult::success(name.to_string(), messages, duration),
            Ok(false) => TargetResult::skipped(name.to_string(), duration),
            Err(err) => TargetResult::failed(name.to_string(), err.to_string(), messages, duration),
        };
        records.lock().unwrap_or_else(PoisonError::into_inner).insert(name.to_string(), record);

        outcome.map(|_| ()).map_err(|err| err.or_location(&target.location))
    }

    /// Run one target. Returns `false` when a condition skipped it.
    fn run_target(&self, target: &Target, messages: &mut Vec<String>) -> Result<bool, BuildError> {
        if let Some(condition) = &target.if_condition {
            if !self.condition_holds(condition)? {
                debug!(target = %target.name, condition = %condition.text, "skipped: if condition is false");
                return Ok(false);
            }
        }
        if let Some(condition) = &target.unless {
            if self.condition_holds(condition)? {
                debug!(target = %target.name, condition = %condition.text, "skipped: unless condition is true");
                return Ok(false);
            }
        }

        for task in &target.tasks {
            self.run_task(target, task, messages)?;
        }
        Ok(true)
    }

    /// Expand a condition. Empty text is false.
    fn condition_holds(&self, condition: &Condition) -> Result<bool, BuildError> {
        let text = self.context.properties().expand(&condition.text, &condition.location)?;
        if text.trim().is_empty() {
            return Ok(false);
        }

        Value::String(text.clone()).to_bool().ok_or_else(|| {
            BuildError::expression(
                format!("condition '{}' expanded to '{}', expected true or false", condition.text, text),
                condition.location.clone(),
            )
        })
    }

    fn run_task(&self, target: &Target, task: &Task, messages: &mut Vec<String>) -> Result<(), BuildError> {
        let properties = self.context.properties();
        debug!(target = %target.name, task = %task.action, "running task");

        match &task.action {
            TaskAction::Echo { message } => {
                let message = properties.expand(message, &task.location)?;
                if !self.context.is_quiet() {
                    println!("[{}] {}", target.name, message);
                }
                messages.push(message);
            }
            TaskAction::SetProperty { name, value } => {
                let value = properties.expand(value, &task.location)?;
                properties.set(name, &value).map_err(|e| e.or_location(&task.location))?;
            }
            TaskAction::Fail { message } => {
                let message = properties.expand(message, &task.location)?;
                return Err(BuildError::TaskFailed { message, location: task.location.clone() });
            }
        }

        Ok(())
    }
}

/// Targets whose visitor panicked never recorded a result.
fn mark_unrecorded_failures(result: &mut BuildResult, failures: &[BuildError]) {
    for failure in failures {
        if let BuildError::TargetExecution { target, cause, .. } = failure {
            if let Some(record) = result.targets.iter_mut().find(|r| &r.target == target) {
                if !record.status.is_failure() {
                    *record = TargetResult::failed(target.clone(), cause.to_string(), vec![], record.duration);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildStatus;
    use crate::config::LoadedBuildFile;

    fn pipeline(text: &str) -> BuildPipeline {
        pipeline_with(text, |ctx| ctx)
    }

    fn pipeline_with(text: &str, configure: impl FnOnce(BuildContext) -> BuildContext) -> BuildPipeline {
        let loaded = LoadedBuildFile::parse("rivet.toml", text.to_string()).expect("should parse build file");
        let context = BuildContext::new(loaded).expect("should create context").with_quiet(true).with_jobs(2);
        BuildPipeline::new(configure(context))
    }

    const CHAIN: &str = r#"[project]
name = "demo"
default = "all"

[properties]
out = "build"

[targets.init]
tasks = [{ echo = "init ${out}" }, { property = "stamp", value = "${project.name}-1" }]

[targets.compile]
depends = ["init"]
tasks = [{ echo = "compile ${stamp}" }]

[targets.all]
depends = ["compile"]
tasks = [{ echo = "done" }]

[targets.unrelated]
tasks = [{ echo = "never" }]
"#;

    #[test]
    fn test_requested_targets() {
        assert_eq!(pipeline(CHAIN).requested_targets().unwrap(), vec!["all"]);

        let filtered = pipeline_with(CHAIN, |ctx| ctx.with_filter(vec!["init".to_string()]));
        assert_eq!(filtered.requested_targets().unwrap(), vec!["init"]);

        let no_default = pipeline("[project]\nname = \"x\"\n[targets.b]\n[targets.a]\n");
        assert_eq!(no_default.requested_targets().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_build_default_target() {
        let result = pipeline(CHAIN).build().unwrap();

        assert!(result.is_success());
        assert_eq!(result.targets.len(), 3);
        assert!(result.target("unrelated").is_none());
        assert_eq!(result.target("init").unwrap().messages, vec!["init build"]);
        assert_eq!(result.target("compile").unwrap().messages, vec!["compile demo-1"]);
        assert_eq!(result.stats.visited, 3);
    }

    #[test]
    fn test_unknown_requested_target() {
        let p = pipeline_with(CHAIN, |ctx| ctx.with_filter(vec!["deploy".to_string()]));
        assert!(matches!(p.build(), Err(BuildError::UnknownTarget { .. })));
    }

    #[test]
    fn test_cycle_reported_before_running() {
        let p = pipeline(
            r#"[project]
name = "demo"

[targets.a]
depends = ["b"]
tasks = [{ echo = "a" }]

[targets.b]
depends = ["a"]
"#,
        );

        let err = p.build().unwrap_err();
        assert!(matches!(err, BuildError::CircularDependency { .. }));
        assert!(err.location().is_known());
    }

    #[test]
    fn test_failure_marks_descendants_not_run() {
        let p = pipeline(
            r#"[project]
name = "demo"

[targets.init]

[targets.broken]
depends = ["init"]
tasks = [{ fail = "cannot build ${project.name}" }]

[targets.after]
depends = ["broken"]

[targets.side]
depends = ["init"]
tasks = [{ echo = "side" }]
"#,
        );

        let result = p.build().unwrap();
        assert!(!result.is_success());
        assert_eq!(result.target("broken").unwrap().status, BuildStatus::Failed("cannot build demo".to_string()));
        assert_eq!(result.target("after").unwrap().status, BuildStatus::NotRun);
        assert_eq!(result.target("side").unwrap().status, BuildStatus::Success);

        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.to_string(), "target 'broken' failed: cannot build demo");
        assert_eq!(failure.location(), &Location::new("rivet.toml", 8, 10));
    }

    #[test]
    fn test_conditions() {
        let p = pipeline_with(
            r#"[project]
name = "demo"

[properties]
debug = false

[targets.debug-only]
if = "${debug}"
tasks = [{ echo = "debugging" }]

[targets.release-only]
unless = "${debug}"
tasks = [{ echo = "releasing" }]

[targets.exists]
if = "${property::exists('nothing')}"
"#,
            |ctx| ctx,
        );

        let result = p.build().unwrap();
        assert_eq!(result.target("debug-only").unwrap().status, BuildStatus::Skipped);
        assert_eq!(result.target("release-only").unwrap().messages, vec!["releasing"]);
        assert_eq!(result.target("exists").unwrap().status, BuildStatus::Skipped);
    }

    #[test]
    fn test_definitions_flip_conditions() {
        let text = "[project]\nname = \"d\"\n[properties]\ndebug = false\n[targets.t]\nif = \"${debug}\"\ntasks = [{ echo = \"on\" }]\n";
        let p = pipeline_with(text, |ctx| ctx.with_definitions(&[("debug".to_string(), "true".to_string())]));
        assert_eq!(p.build().unwrap().target("t").unwrap().status, BuildStatus::Success);
    }

    #[test]
    fn test_non_boolean_condition_fails() {
        let p = pipeline("[project]\nname = \"d\"\n[targets.t]\nif = \"maybe\"\n");
        let result = p.build().unwrap();
        assert!(result.target("t").unwrap().status.is_failure());
    }

    #[test]
    fn test_setting_read_only_property_fails() {
        let p = pipeline(
            "[project]\nname = \"d\"\n[targets.t]\ntasks = [{ property = \"project.name\", value = \"x\" }]\n",
        );
        let result = p.build().unwrap();
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.to_string(), "target 't' failed: property 'project.name' is read-only");
        assert_eq!(failure.location(), &Location::new("rivet.toml", 4, 10));
    }

    #[test]
    fn test_rebuild_runs_again() {
        let p = pipeline(CHAIN);
        assert!(p.build().unwrap().is_success());
        let second = p.build().unwrap();
        assert!(second.is_success());
        assert_eq!(second.stats.visited, 3);
    }
}
