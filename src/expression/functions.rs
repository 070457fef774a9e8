//! Function capability table
//!
//! Functions are registered explicitly under their qualified name
//! (`prefix::name`) together with their arity and one of three calling
//! conventions:
//!
//! - [`FunctionKind::Stateless`]: pure functions of their arguments
//! - [`FunctionKind::Evaluator`]: functions that need the running evaluator,
//!   e.g. to expand a property within the same pass
//! - [`FunctionKind::Context`]: functions that need the project and the
//!   property store; they receive a fresh [`FunctionContext`] per call

use super::evaluator::ExpressionEvaluator;
use super::value::Value;
use crate::build::ProjectInfo;
use crate::error::BuildError;
use crate::location::Location;
use crate::properties::PropertyStore;
use std::collections::HashMap;

/// Pure function of its arguments.
pub type StatelessFn = fn(&[Value]) -> Result<Value, BuildError>;
/// Function invoked on the running evaluator.
pub type EvaluatorFn = fn(&mut ExpressionEvaluator<'_>, &[Value]) -> Result<Value, BuildError>;
/// Function invoked with the current build context.
pub type ContextFn = fn(&FunctionContext<'_>, &[Value]) -> Result<Value, BuildError>;

/// Calling convention of a registered function.
#[derive(Clone, Copy)]
pub enum FunctionKind {
    Stateless(StatelessFn),
    Evaluator(EvaluatorFn),
    Context(ContextFn),
}

impl std::fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::Stateless(_) => write!(f, "Stateless"),
            FunctionKind::Evaluator(_) => write!(f, "Evaluator"),
            FunctionKind::Context(_) => write!(f, "Context"),
        }
    }
}

/// Build context handed to [`FunctionKind::Context`] functions.
pub struct FunctionContext<'a> {
    pub project: &'a ProjectInfo,
    pub properties: &'a dyn PropertyStore,
}

/// Name and arity of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub name: String,
    pub arity: usize,
}

/// A registered function.
#[derive(Debug, Clone)]
pub struct FunctionEntry {
    pub signature: FunctionSignature,
    pub kind: FunctionKind,
}

/// Table of callable functions, keyed by qualified name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { functions: HashMap::new() }
    }

    /// Create a registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("string::to-upper", 1, FunctionKind::Stateless(string_to_upper));
        registry.register("string::to-lower", 1, FunctionKind::Stateless(string_to_lower));
        registry.register("string::trim", 1, FunctionKind::Stateless(string_trim));
        registry.register("string::length", 1, FunctionKind::Stateless(string_length));
        registry.register("string::contains", 2, FunctionKind::Stateless(string_contains));
        registry.register("string::replace", 3, FunctionKind::Stateless(string_replace));
        registry.register("convert::to-int", 1, FunctionKind::Stateless(convert_to_int));
        registry.register("convert::to-string", 1, FunctionKind::Stateless(convert_to_string));

        registry.register("property::exists", 1, FunctionKind::Evaluator(property_exists));
        registry.register("property::get-value", 1, FunctionKind::Evaluator(property_get_value));
        registry.register("property::is-dynamic", 1, FunctionKind::Evaluator(property_is_dynamic));

        registry.register("project::get-name", 0, FunctionKind::Context(project_get_name));
        registry.register(
            "project::get-base-directory",
            0,
            FunctionKind::Context(project_get_base_directory),
        );
        registry.register("environment::get-variable", 1, FunctionKind::Context(env_get_variable));
        registry.register(
            "environment::variable-exists",
            1,
            FunctionKind::Context(env_variable_exists),
        );

        registry
    }

    /// Register (or replace) a function.
    pub fn register(&mut self, name: &str, arity: usize, kind: FunctionKind) {
        let signature = FunctionSignature { name: name.to_string(), arity };
        self.functions.insert(name.to_string(), FunctionEntry { signature, kind });
    }

    /// Look up a function by qualified name.
    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    /// Check if a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered signatures, sorted by name.
    pub fn signatures(&self) -> Vec<&FunctionSignature> {
        let mut signatures: Vec<_> = self.functions.values().map(|e| &e.signature).collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name));
        signatures
    }
}

fn string_arg(args: &[Value], index: usize) -> String {
    args[index].to_string()
}

fn int_arg(function: &str, args: &[Value], index: usize) -> Result<i64, BuildError> {
    args[index].to_int().ok_or_else(|| {
        BuildError::invocation(
            function,
            format!("argument {} ('{}') is not an integer", index + 1, args[index]),
            Location::Unknown,
        )
    })
}

fn string_to_upper(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::String(string_arg(args, 0).to_uppercase()))
}

fn string_to_lower(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::String(string_arg(args, 0).to_lowercase()))
}

fn string_trim(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::String(string_arg(args, 0).trim().to_string()))
}

fn string_length(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::Integer(string_arg(args, 0).chars().count() as i64))
}

fn string_contains(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::Boolean(string_arg(args, 0).contains(&string_arg(args, 1))))
}

fn string_replace(args: &[Value]) -> Result<Value, BuildError> {
    let pattern = string_arg(args, 1);
    if pattern.is_empty() {
        return Err(BuildError::invocation(
            "string::replace",
            "pattern must not be empty",
            Location::Unknown,
        ));
    }
    Ok(Value::String(string_arg(args, 0).replace(&pattern, &string_arg(args, 2))))
}

fn convert_to_int(args: &[Value]) -> Result<Value, BuildError> {
    int_arg("convert::to-int", args, 0).map(Value::Integer)
}

fn convert_to_string(args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::String(string_arg(args, 0)))
}

fn property_exists(
    evaluator: &mut ExpressionEvaluator<'_>,
    args: &[Value],
) -> Result<Value, BuildError> {
    let name = string_arg(args, 0);
    Ok(Value::Boolean(evaluator.properties().get_property_value(&name).is_some()))
}

fn property_get_value(
    evaluator: &mut ExpressionEvaluator<'_>,
    args: &[Value],
) -> Result<Value, BuildError> {
    let name = string_arg(args, 0);
    evaluator.evaluate_property(&name).map(Value::String)
}

fn property_is_dynamic(
    evaluator: &mut ExpressionEvaluator<'_>,
    args: &[Value],
) -> Result<Value, BuildError> {
    let name = string_arg(args, 0);
    Ok(Value::Boolean(evaluator.properties().is_dynamic_property(&name)))
}

fn project_get_name(context: &FunctionContext<'_>, _args: &[Value]) -> Result<Value, BuildError> {
    Ok(Value::String(context.project.name.clone()))
}

fn project_get_base_directory(
    context: &FunctionContext<'_>,
    _args: &[Value],
) -> Result<Value, BuildError> {
    Ok(Value::String(context.project.base_dir.display().to_string()))
}

fn env_get_variable(_context: &FunctionContext<'_>, args: &[Value]) -> Result<Value, BuildError> {
    let name = string_arg(args, 0);
    std::env::var(&name).map(Value::String).map_err(|_| {
        BuildError::invocation(
            "environment::get-variable",
            format!("environment variable '{}' is not set", name),
            Location::Unknown,
        )
    })
}

fn env_variable_exists(
    _context: &FunctionContext<'_>,
    args: &[Value],
) -> Result<Value, BuildError> {
    Ok(Value::Boolean(std::env::var_os(string_arg(args, 0)).is_some()))
}
