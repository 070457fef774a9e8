//! Build context containing the build file, properties and options for a build.

use crate::config::{LoadedBuildFile, UserConfig};
use crate::error::BuildError;
use crate::expression::FunctionRegistry;
use crate::graph::default_jobs;
use crate::location::Location;
use crate::properties::PropertyDictionary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Identity of the project being built, as seen by `project::*` functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Project name from `[project]`
    pub name: String,
    /// Directory containing the build file
    pub base_dir: PathBuf,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), base_dir: base_dir.into() }
    }
}

/// Build context containing everything needed to execute a build.
///
/// Properties are layered on construction: built-in read-only properties,
/// then the build file's `[properties]`. User defaults fill in names the build
/// file left unset, and command-line definitions replace anything.
#[derive(Debug)]
pub struct BuildContext {
    /// The loaded build file
    build_file: LoadedBuildFile,
    /// Project identity
    project: ProjectInfo,
    /// Function table used for expansion
    functions: Arc<FunctionRegistry>,
    /// Properties shared by every target
    properties: PropertyDictionary,
    /// Worker threads, if set explicitly
    jobs: Option<usize>,
    /// Worker threads from user defaults
    default_jobs: Option<usize>,
    /// Suppress `echo` output
    quiet: bool,
    /// Whether to run in verbose mode
    verbose: bool,
    /// Optional filter to build specific targets only
    target_filter: Option<Vec<String>>,
}

impl BuildContext {
    /// Create a context with the built-in function table.
    pub fn new(build_file: LoadedBuildFile) -> Result<Self, BuildError> {
        Self::with_functions(build_file, FunctionRegistry::with_builtins())
    }

    /// Create a context with a custom function table.
    pub fn with_functions(build_file: LoadedBuildFile, functions: FunctionRegistry) -> Result<Self, BuildError> {
        let project = ProjectInfo::new(&build_file.file().project.name, build_file.base_dir());
        let functions = Arc::new(functions);
        let properties = PropertyDictionary::new(project.clone(), Arc::clone(&functions));

        properties.set_read_only("project.name", &project.name);
        properties.set_read_only("project.basedir", &project.base_dir.to_string_lossy());
        properties.set_read_only("rivet.version", env!("CARGO_PKG_VERSION"));

        for (name, value) in &build_file.file().properties {
            let location = build_file.value_location(value.span());
            properties.set_dynamic(name, &value.get_ref().as_raw(), location)?;
        }
        debug!(project = %project.name, properties = properties.len(), "build context ready");

        Ok(Self {
            build_file,
            project,
            functions,
            properties,
            jobs: None,
            default_jobs: None,
            quiet: false,
            verbose: false,
            target_filter: None,
        })
    }

    /// Apply user defaults. Properties already set are left alone.
    pub fn with_user_config(mut self, user: &UserConfig) -> Result<Self, BuildError> {
        for (name, value) in &user.properties {
            if !self.properties.contains(name) {
                self.properties.set_dynamic(name, &value.as_raw(), Location::Unknown)?;
            }
        }
        self.default_jobs = user.execution.jobs;
        Ok(self)
    }

    /// Install command-line `NAME=VALUE` definitions as read-only properties.
    pub fn with_definitions(self, definitions: &[(String, String)]) -> Self {
        for (name, value) in definitions {
            self.properties.set_read_only(name, value);
        }
        self
    }

    /// Get the loaded build file.
    pub fn build_file(&self) -> &LoadedBuildFile {
        &self.build_file
    }

    /// Get the project identity.
    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project.base_dir
    }

    /// Get the function table.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Get the property dictionary.
    pub fn properties(&self) -> &PropertyDictionary {
        &self.properties
    }

    /// Number of worker threads.
    ///
    /// Command line, then `[execution]` in the build file, then user
    /// defaults, then available parallelism.
    pub fn jobs(&self) -> usize {
        self.jobs
            .or(self.build_file.file().execution.jobs)
            .or(self.default_jobs)
            .unwrap_or_else(default_jobs)
            .max(1)
    }

    /// Whether `echo` output is suppressed.
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set the number of worker threads.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Set quiet mode.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set target filter to build only specific targets.
    pub fn with_filter(mut self, targets: Vec<String>) -> Self {
        self.target_filter = Some(targets);
        self
    }

    /// Get the target filter.
    pub fn target_filter(&self) -> Option<&[String]> {
        self.target_filter.as_deref()
    }
}
