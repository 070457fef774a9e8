//! Property store and expansion state
//!
//! Properties are named string values. A value that embeds `${...}`
//! references is *dynamic*: it is stored raw and expanded each time it is
//! read, so properties may be defined in terms of properties declared later.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rivet::build::ProjectInfo;
//! use rivet::expression::FunctionRegistry;
//! use rivet::location::Location;
//! use rivet::properties::PropertyDictionary;
//!
//! let props = PropertyDictionary::new(
//!     ProjectInfo::new("demo", "."),
//!     Arc::new(FunctionRegistry::with_builtins()),
//! );
//! props.set_dynamic("bin", "${out}/bin", Location::Unknown).unwrap();
//! props.set("out", "build").unwrap();
//!
//! assert_eq!(props.expand("copy to ${bin}", &Location::Unknown).unwrap(), "copy to build/bin");
//! ```

use crate::build::ProjectInfo;
use crate::error::BuildError;
use crate::expression::{ExpressionEvaluator, FunctionRegistry, Value};
use crate::location::Location;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Deepest nesting of property references and sub-expressions allowed in
/// one expansion pass.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// Expansion progress of one property within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    Unvisited,
    Visiting,
    Visited,
}

/// Per-pass bookkeeping: the state of every property touched so far and the
/// chain of properties currently being expanded.
///
/// A pass that failed with a circular reference leaves properties
/// `Visiting`; start the next pass with a fresh state.
#[derive(Debug, Default)]
pub struct ExpansionState {
    states: HashMap<String, PropertyState>,
    chain: Vec<String>,
    /// Sub-expressions currently being parsed
    nesting: usize,
}

impl ExpansionState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `name` in this pass.
    pub fn state(&self, name: &str) -> PropertyState {
        self.states.get(name).copied().unwrap_or(PropertyState::Unvisited)
    }

    /// Properties currently being expanded, outermost first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Mark `name` as being expanded.
    pub fn enter(&mut self, name: &str) {
        self.chain.push(name.to_string());
        self.states.insert(name.to_string(), PropertyState::Visiting);
    }

    /// Mark `name` as fully expanded.
    pub fn leave(&mut self, name: &str) {
        self.chain.pop();
        self.states.insert(name.to_string(), PropertyState::Visited);
    }

    /// Properties being expanded plus sub-expressions being parsed.
    pub fn depth(&self) -> usize {
        self.chain.len() + self.nesting
    }

    /// Enter a sub-expression. Returns `false`, without entering, when
    /// that would exceed [`MAX_EXPANSION_DEPTH`].
    pub fn descend(&mut self) -> bool {
        if self.depth() >= MAX_EXPANSION_DEPTH {
            return false;
        }
        self.nesting += 1;
        true
    }

    /// Leave a sub-expression entered with [`ExpansionState::descend`].
    pub fn ascend(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }
}

/// Property access consumed by the expression evaluator.
pub trait PropertyStore: Send + Sync {
    /// Raw value of a property, `None` if it is not set.
    fn get_property_value(&self, name: &str) -> Option<String>;

    /// Whether the raw value embeds further references.
    fn is_dynamic_property(&self, name: &str) -> bool;

    /// Where the property was defined, if known.
    fn property_location(&self, _name: &str) -> Location {
        Location::Unknown
    }

    /// Expand `${...}` references in `raw`, threading `state` through nested
    /// property expansions.
    fn expand_properties(
        &self,
        raw: &str,
        location: &Location,
        state: &mut ExpansionState,
    ) -> Result<String, BuildError>;
}

#[derive(Debug, Clone)]
struct PropertyEntry {
    value: String,
    dynamic: bool,
    read_only: bool,
    location: Location,
}

/// Thread-safe property store backing a build.
#[derive(Debug)]
pub struct PropertyDictionary {
    entries: RwLock<HashMap<String, PropertyEntry>>,
    functions: Arc<FunctionRegistry>,
    project: ProjectInfo,
}

impl PropertyDictionary {
    /// Create an empty dictionary for `project`.
    pub fn new(project: ProjectInfo, functions: Arc<FunctionRegistry>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), functions, project }
    }

    /// The project this dictionary belongs to.
    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    /// The function table used for expansion.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Set a literal value. `${` in `value` is not expanded.
    pub fn set(&self, name: &str, value: &str) -> Result<(), BuildError> {
        self.insert(name, value, false, false, Location::Unknown)
    }

    /// Set a value that is expanded lazily each time it is read.
    pub fn set_dynamic(&self, name: &str, raw: &str, location: Location) -> Result<(), BuildError> {
        self.insert(name, raw, raw.contains("${"), false, location)
    }

    /// Set a literal value that later `set` calls cannot overwrite.
    ///
    /// Read-only properties replace each other, so command-line values can be
    /// installed before the build file's own defaults are read.
    pub fn set_read_only(&self, name: &str, value: &str) {
        let entry = PropertyEntry {
            value: value.to_string(),
            dynamic: false,
            read_only: true,
            location: Location::Unknown,
        };
        self.write().insert(name.to_string(), entry);
    }

    /// Check if a property is set.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Check if a property is read-only.
    pub fn is_read_only(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|e| e.read_only)
    }

    /// Raw value of a property without expansion.
    pub fn get_raw(&self, name: &str) -> Option<String> {
        self.read().get(name).map(|e| e.value.clone())
    }

    /// Fully expanded value of a property.
    pub fn get(&self, name: &str) -> Result<String, BuildError> {
        let mut state = ExpansionState::new();
        let mut evaluator = self.evaluator(&mut state, Location::Unknown);
        evaluator.evaluate_property(name)
    }

    /// Expand every `${...}` in `text` in a fresh pass.
    pub fn expand(&self, text: &str, location: &Location) -> Result<String, BuildError> {
        let mut state = ExpansionState::new();
        self.expand_properties(text, location, &mut state)
    }

    /// Evaluate a bare expression such as `count > 3` in a fresh pass.
    pub fn evaluate(&self, expression: &str, location: &Location) -> Result<Value, BuildError> {
        let mut state = ExpansionState::new();
        let mut evaluator = self.evaluator(&mut state, location.clone());
        evaluator.evaluate(expression)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All property names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(
        &self,
        name: &str,
        value: &str,
        dynamic: bool,
        read_only: bool,
        location: Location,
    ) -> Result<(), BuildError> {
        let mut entries = self.write();
        if entries.get(name).is_some_and(|e| e.read_only) {
            return Err(BuildError::ReadOnlyProperty { name: name.to_string(), location });
        }
        entries.insert(name.to_string(), PropertyEntry { value: value.to_string(), dynamic, read_only, location });
        Ok(())
    }

    fn evaluator<'a>(
        &'a self,
        state: &'a mut ExpansionState,
        location: Location,
    ) -> ExpressionEvaluator<'a> {
        ExpressionEvaluator::new(self, &self.functions, &self.project, state, location)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PropertyEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PropertyEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PropertyStore for PropertyDictionary {
    fn get_property_value(&self, name: &str) -> Option<String> {
        self.get_raw(name)
    }

    fn is_dynamic_property(&self, name: &str) -> bool {
        self.read().get(name).is_some_and(|e| e.dynamic)
    }

    fn property_location(&self, name: &str) -> Location {
        self.read().get(name).map(|e| e.location.clone()).unwrap_or_default()
    }

    fn expand_properties(
        &self,
        raw: &str,
        location: &Location,
        state: &mut ExpansionState,
    ) -> Result<String, BuildError> {
        if !raw.contains("${") {
            return Ok(raw.to_string());
        }
        self.evaluator(state, location.clone()).expand(raw)
    }
}
