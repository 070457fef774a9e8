//! Expression Test Suite
//!
//! Integration tests for property expansion through the public API:
//! tokenizing, expanding `${...}` references, function calls and
//! circular reference detection.

use std::sync::Arc;
use std::thread;

use rivet::build::ProjectInfo;
use rivet::error::BuildError;
use rivet::expression::{tokenize, FunctionKind, FunctionRegistry, TokenKind, Value};
use rivet::location::Location;
use rivet::properties::PropertyDictionary;

// ============================================================================
// Test Utilities
// ============================================================================

fn dictionary() -> PropertyDictionary {
    PropertyDictionary::new(
        ProjectInfo::new("webapp", "/srv/webapp"),
        Arc::new(FunctionRegistry::with_builtins()),
    )
}

fn expand(props: &PropertyDictionary, text: &str) -> Result<String, BuildError> {
    props.expand(text, &Location::Unknown)
}

fn dynamic(props: &PropertyDictionary, name: &str, raw: &str) {
    props.set_dynamic(name, raw, Location::Unknown).unwrap();
}

// ============================================================================
// Tokenizer
// ============================================================================

#[test]
fn test_tokenize_comparison_with_escaped_quote() {
    let tokens = tokenize("foo123 != 'it''s'").unwrap();
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TokenKind::Keyword, TokenKind::NotEqual, TokenKind::String]);
    assert_eq!(tokens[0].text, "foo123");
    assert_eq!(tokens[2].text, "it's");
}

#[test]
fn test_tokenize_function_call() {
    let tokens = tokenize("string::replace(version, '.', '_')").unwrap();
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Keyword,
            TokenKind::DoubleColon,
            TokenKind::Keyword,
            TokenKind::LeftParen,
            TokenKind::Keyword,
            TokenKind::Comma,
            TokenKind::String,
            TokenKind::Comma,
            TokenKind::String,
            TokenKind::RightParen,
        ]
    );
}

#[test]
fn test_tokenize_unterminated_string() {
    let err = tokenize("'open").unwrap_err();
    assert!(matches!(err, BuildError::Lexical { .. }));
}

// ============================================================================
// Expansion
// ============================================================================

#[test]
fn test_text_without_references_is_unchanged() {
    let props = dictionary();
    for text in ["", "just text", "price: $10", "{braces}", "a$b$c"] {
        assert_eq!(expand(&props, text).unwrap(), text);
    }
}

#[test]
fn test_forward_references() {
    let props = dictionary();
    dynamic(&props, "archive", "${dist}/${project.name}.zip");
    dynamic(&props, "dist", "${out}/dist");
    props.set("out", "target").unwrap();
    props.set("project.name", "webapp").unwrap();

    assert_eq!(expand(&props, "copy ${archive}").unwrap(), "copy target/dist/webapp.zip");
}

#[test]
fn test_value_changes_are_seen_on_next_expansion() {
    let props = dictionary();
    dynamic(&props, "bin", "${out}/bin");
    props.set("out", "debug").unwrap();
    assert_eq!(expand(&props, "${bin}").unwrap(), "debug/bin");

    props.set("out", "release").unwrap();
    assert_eq!(expand(&props, "${bin}").unwrap(), "release/bin");
}

#[test]
fn test_expressions_inside_references() {
    let props = dictionary();
    props.set("major", "2").unwrap();
    props.set("minor", "7").unwrap();

    assert_eq!(expand(&props, "v${major + 1}.${minor * 2}").unwrap(), "v3.14");
    assert_eq!(expand(&props, "${major >= 2 and minor != 0}").unwrap(), "true");
    assert_eq!(expand(&props, "${'v' + major}").unwrap(), "v2");
}

#[test]
fn test_builtin_functions() {
    let props = dictionary();
    props.set("version", "1.4.2").unwrap();

    assert_eq!(expand(&props, "${string::replace(version, '.', '_')}").unwrap(), "1_4_2");
    assert_eq!(expand(&props, "${string::to-upper(project::get-name())}").unwrap(), "WEBAPP");
    assert_eq!(expand(&props, "${string::length('abc') + 1}").unwrap(), "4");
    assert_eq!(expand(&props, "${property::exists('version')}").unwrap(), "true");
    assert_eq!(expand(&props, "${property::exists('nope')}").unwrap(), "false");
}

fn double(args: &[Value]) -> Result<Value, BuildError> {
    let n = args[0].to_int().unwrap_or(0);
    Ok(Value::Integer(n * 2))
}

#[test]
fn test_custom_function_registry() {
    let mut functions = FunctionRegistry::with_builtins();
    functions.register("math::double", 1, FunctionKind::Stateless(double));
    let props = PropertyDictionary::new(ProjectInfo::new("calc", "."), Arc::new(functions));
    props.set("n", "21").unwrap();

    assert_eq!(expand(&props, "${math::double(n)}").unwrap(), "42");
}

#[test]
fn test_unknown_function_is_invocation_error() {
    let props = dictionary();
    let err = expand(&props, "${math::double(1)}").unwrap_err();
    assert!(matches!(err, BuildError::Invocation { .. }));
}

#[test]
fn test_undefined_property() {
    let props = dictionary();
    let err = props.expand("x ${missing}", &Location::new("rivet.toml", 2, 8)).unwrap_err();

    match &err {
        BuildError::UndefinedProperty { name, .. } => assert_eq!(name, "missing"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.location().is_known());
}

// ============================================================================
// Circular References
// ============================================================================

fn cycle_chain(err: BuildError) -> Vec<String> {
    match err {
        BuildError::CircularReference { chain, .. } => chain,
        other => panic!("expected circular reference, got {other:?}"),
    }
}

#[test]
fn test_self_reference() {
    let props = dictionary();
    dynamic(&props, "A", "${A}");

    assert_eq!(cycle_chain(expand(&props, "${A}").unwrap_err()), vec!["A", "A"]);
}

#[test]
fn test_mutual_reference() {
    let props = dictionary();
    dynamic(&props, "A", "${B}");
    dynamic(&props, "B", "${A}");

    let err = expand(&props, "${A}").unwrap_err();
    assert_eq!(err.to_string(), "circular property reference: A -> B -> A");
    assert_eq!(cycle_chain(err), vec!["A", "B", "A"]);
}

#[test]
fn test_cycle_through_property_function() {
    let props = dictionary();
    dynamic(&props, "A", "${property::get-value('B')}");
    dynamic(&props, "B", "${A}");

    assert_eq!(cycle_chain(expand(&props, "${A}").unwrap_err()), vec!["A", "B", "A"]);
}

#[test]
fn test_shared_subexpression_is_not_a_cycle() {
    let props = dictionary();
    dynamic(&props, "left", "${base}-l");
    dynamic(&props, "right", "${base}-r");
    dynamic(&props, "both", "${left}+${right}");
    props.set("base", "b").unwrap();

    assert_eq!(expand(&props, "${both}").unwrap(), "b-l+b-r");
}

#[test]
fn test_concurrent_expansion() {
    let props = dictionary();
    dynamic(&props, "path", "${root}/${leaf}");
    props.set("root", "/opt").unwrap();
    props.set("leaf", "bin").unwrap();
    dynamic(&props, "loop", "${loop}");

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(expand(&props, "${path}").unwrap(), "/opt/bin");
                    assert!(expand(&props, "${loop}").is_err());
                }
            });
        }
    });
}

// ============================================================================
// Nesting Limits
// ============================================================================

/// Run `f` on a thread with a worker-sized stack.
fn with_large_stack<F: FnOnce() + Send + 'static>(f: F) {
    thread::Builder::new()
        .stack_size(8 * 1024 * 1024)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap();
}

fn chain(props: &PropertyDictionary, length: usize) {
    props.set("p0", "base").unwrap();
    for i in 1..=length {
        dynamic(props, &format!("p{}", i), &format!("${{p{}}}", i - 1));
    }
}

#[test]
fn test_moderate_property_chain_expands() {
    let props = dictionary();
    chain(&props, 20);
    assert_eq!(expand(&props, "${p20}").unwrap(), "base");
}

#[test]
fn test_long_property_chain_is_an_expression_error() {
    with_large_stack(|| {
        let props = dictionary();
        chain(&props, 1000);

        let err = expand(&props, "${p1000}").unwrap_err();
        assert!(matches!(err, BuildError::Expression { .. }));
        assert!(err.to_string().contains("nested deeper than"));
    });
}

#[test]
fn test_nested_parentheses() {
    let props = dictionary();
    let text = format!("${{{}1{}}}", "(".repeat(30), ")".repeat(30));
    assert_eq!(expand(&props, &text).unwrap(), "1");
}

#[test]
fn test_deeply_nested_parentheses_are_rejected() {
    with_large_stack(|| {
        let props = dictionary();
        let text = format!("${{{}1{}}}", "(".repeat(500), ")".repeat(500));

        let err = expand(&props, &text).unwrap_err();
        assert!(matches!(err, BuildError::Expression { .. }));
        assert!(err.to_string().contains("nested deeper than"));
    });
}

#[test]
fn test_deeply_nested_negation_is_rejected() {
    let props = dictionary();
    let text = format!("${{{}1}}", "- ".repeat(200));
    assert!(matches!(expand(&props, &text).unwrap_err(), BuildError::Expression { .. }));
}
