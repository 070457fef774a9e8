//! Recursive expression evaluator
//!
//! Evaluates the expression language used inside `${...}`:
//!
//! ```text
//! expr     := or
//! or       := and ("or" and)*
//! and      := rel ("and" rel)*
//! rel      := add (("==" | "!=" | "<" | ">" | "<=" | ">=") add)?
//! add      := mul (("+" | "-") mul)*
//! mul      := unary (("*" | "/" | "%") unary)*
//! unary    := ("-" | "!" | "not") unary | primary
//! primary  := number | string | "true" | "false" | "(" expr ")"
//!           | ident "::" ident "(" [expr ("," expr)*] ")"
//!           | ident
//! ```
//!
//! A bare identifier is a property reference. Properties whose raw value
//! embeds further references are expanded recursively through the property
//! store, threading the same [`ExpansionState`] so that cycles spanning
//! several properties are reported with the full chain.

use super::functions::{FunctionContext, FunctionKind, FunctionRegistry};
use super::tokenizer::{TokenKind, Tokenizer, TokenizerOptions};
use super::value::Value;
use crate::build::ProjectInfo;
use crate::error::BuildError;
use crate::location::Location;
use crate::properties::{ExpansionState, PropertyState, PropertyStore, MAX_EXPANSION_DEPTH};
use std::cmp::Ordering;
use tracing::trace;

/// Evaluator for one expansion pass.
pub struct ExpressionEvaluator<'a> {
    properties: &'a dyn PropertyStore,
    functions: &'a FunctionRegistry,
    project: &'a ProjectInfo,
    state: &'a mut ExpansionState,
    location: Location,
    /// Cleared while parsing the skipped side of `and`/`or`
    evaluating: bool,
}

impl<'a> ExpressionEvaluator<'a> {
    /// Create an evaluator whose text starts at `location`.
    pub fn new(
        properties: &'a dyn PropertyStore,
        functions: &'a FunctionRegistry,
        project: &'a ProjectInfo,
        state: &'a mut ExpansionState,
        location: Location,
    ) -> Self {
        Self { properties, functions, project, state, location, evaluating: true }
    }

    /// The property store this evaluator reads from.
    pub fn properties(&self) -> &'a dyn PropertyStore {
        self.properties
    }

    /// The project this evaluator runs for.
    pub fn project(&self) -> &'a ProjectInfo {
        self.project
    }

    /// Expand every `${...}` in `text`.
    ///
    /// Literal text is copied unchanged; a `$` not followed by `{` is literal.
    pub fn expand(&mut self, text: &str) -> Result<String, BuildError> {
        if !text.contains("${") {
            return Ok(text.to_string());
        }

        let options = TokenizerOptions { ignore_whitespace: false, single_char_mode: true };
        let mut tokenizer = Tokenizer::start(text, self.location.clone(), options)?;
        let mut output = String::with_capacity(text.len());

        while tokenizer.kind() != TokenKind::EndOfInput {
            if tokenizer.kind() == TokenKind::Dollar && tokenizer.peek_char() == Some('{') {
                let opened_at = tokenizer.location_at(tokenizer.current().start);

                tokenizer.next_token()?;
                tokenizer.set_single_char_mode(false);
                tokenizer.set_ignore_whitespace(true);
                tokenizer.next_token()?;

                let value = self.parse_expression(&mut tokenizer)?;
                match tokenizer.kind() {
                    TokenKind::RightCurly => {}
                    TokenKind::EndOfInput => {
                        return Err(BuildError::expression(
                            "unterminated '${' expression, expected '}'",
                            opened_at,
                        ));
                    }
                    other => return Err(self.unexpected(&tokenizer, &format!("{}, expected '}}'", other))),
                }
                output.push_str(&value.to_string());

                tokenizer.set_single_char_mode(true);
                tokenizer.set_ignore_whitespace(false);
            } else {
                output.push_str(&tokenizer.current().text);
            }
            tokenizer.next_token()?;
        }

        Ok(output)
    }

    /// Evaluate a complete expression (without the surrounding `${}`).
    pub fn evaluate(&mut self, expression: &str) -> Result<Value, BuildError> {
        let mut tokenizer =
            Tokenizer::start(expression, self.location.clone(), TokenizerOptions::default())?;
        if tokenizer.kind() == TokenKind::EndOfInput {
            return Err(BuildError::expression("empty expression", self.location.clone()));
        }

        let value = self.parse_expression(&mut tokenizer)?;
        if tokenizer.kind() != TokenKind::EndOfInput {
            let found = tokenizer.kind().to_string();
            return Err(self.unexpected(&tokenizer, &format!("{} after end of expression", found)));
        }
        Ok(value)
    }

    /// Resolve a property by name.
    ///
    /// Dynamic properties are expanded recursively; meeting a property that
    /// is still being expanded in this pass is a circular reference.
    pub fn evaluate_property(&mut self, name: &str) -> Result<String, BuildError> {
        if !self.properties.is_dynamic_property(name) {
            return self.properties.get_property_value(name).ok_or_else(|| {
                BuildError::UndefinedProperty { name: name.to_string(), location: self.location.clone() }
            });
        }

        if self.state.state(name) == PropertyState::Visiting {
            return Err(BuildError::circular_reference(
                name,
                self.state.chain(),
                self.location.clone(),
            ));
        }

        if self.state.depth() >= MAX_EXPANSION_DEPTH {
            return Err(BuildError::expression(
                format!("property '{}' is nested deeper than {} levels", name, MAX_EXPANSION_DEPTH),
                self.location.clone(),
            ));
        }

        self.state.enter(name);
        let raw = self.properties.get_property_value(name).ok_or_else(|| {
            BuildError::UndefinedProperty { name: name.to_string(), location: self.location.clone() }
        })?;

        let defined_at = self.properties.property_location(name);
        let location = if defined_at.is_known() { defined_at } else { self.location.clone() };
        trace!(property = name, depth = self.state.chain().len(), "expanding dynamic property");

        let expanded = self.properties.expand_properties(&raw, &location, &mut *self.state)?;
        self.state.leave(name);

        Ok(expanded)
    }

    /// Invoke a function from the capability table.
    pub fn evaluate_function(&mut self, name: &str, args: &[Value]) -> Result<Value, BuildError> {
        let location = self.location.clone();
        self.call_function(name, args, &location)
    }

    fn call_function(
        &mut self,
        name: &str,
        args: &[Value],
        location: &Location,
    ) -> Result<Value, BuildError> {
        let entry = self
            .functions
            .get(name)
            .ok_or_else(|| BuildError::invocation(name, "unknown function", location.clone()))?;

        if entry.signature.arity != args.len() {
            return Err(BuildError::invocation(
                name,
                format!("expected {} argument(s), got {}", entry.signature.arity, args.len()),
                location.clone(),
            ));
        }

        let result = match entry.kind {
            FunctionKind::Stateless(function) => function(args),
            FunctionKind::Evaluator(function) => function(self, args),
            FunctionKind::Context(function) => {
                let context = FunctionContext { project: self.project, properties: self.properties };
                function(&context, args)
            }
        };

        result.map_err(|e| e.or_location(location))
    }

    fn parse_expression(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        self.parse_or(t)
    }

    fn parse_or(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let mut left = self.parse_and(t)?;

        while is_keyword(t, "or") {
            let location = t.location_at(t.current().start);
            t.next_token()?;

            let lhs = self.boolean(&left, &location)?;
            let was_evaluating = self.evaluating;
            self.evaluating = was_evaluating && !lhs;
            let right = self.parse_and(t);
            self.evaluating = was_evaluating;

            let rhs = if lhs { true } else { self.boolean(&right?, &location)? };
            left = Value::Boolean(lhs || rhs);
        }

        Ok(left)
    }

    fn parse_and(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let mut left = self.parse_relational(t)?;

        while is_keyword(t, "and") {
            let location = t.location_at(t.current().start);
            t.next_token()?;

            let lhs = self.boolean(&left, &location)?;
            let was_evaluating = self.evaluating;
            self.evaluating = was_evaluating && lhs;
            let right = self.parse_relational(t);
            self.evaluating = was_evaluating;

            let rhs = if lhs { self.boolean(&right?, &location)? } else { false };
            left = Value::Boolean(lhs && rhs);
        }

        Ok(left)
    }

    fn parse_relational(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let left = self.parse_additive(t)?;

        let op = t.kind();
        if !matches!(
            op,
            TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::LessThan
                | TokenKind::GreaterThan
                | TokenKind::LessOrEqual
                | TokenKind::GreaterOrEqual
        ) {
            return Ok(left);
        }

        let location = t.location_at(t.current().start);
        t.next_token()?;
        let right = self.parse_additive(t)?;

        if !self.evaluating {
            return Ok(Value::Boolean(false));
        }

        let ordering = compare(&left, &right)
            .ok_or_else(|| BuildError::expression(
                format!("cannot compare {} with {}", left.type_name(), right.type_name()),
                location,
            ))?;

        let result = match op {
            TokenKind::Equal => ordering == Ordering::Equal,
            TokenKind::NotEqual => ordering != Ordering::Equal,
            TokenKind::LessThan => ordering == Ordering::Less,
            TokenKind::GreaterThan => ordering == Ordering::Greater,
            TokenKind::LessOrEqual => ordering != Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        Ok(Value::Boolean(result))
    }

    fn parse_additive(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let mut left = self.parse_multiplicative(t)?;

        while matches!(t.kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = t.kind();
            let location = t.location_at(t.current().start);
            t.next_token()?;
            let right = self.parse_multiplicative(t)?;

            if !self.evaluating {
                continue;
            }

            left = match (op, &left, &right) {
                (TokenKind::Plus, Value::String(_), _) | (TokenKind::Plus, _, Value::String(_)) => {
                    Value::String(format!("{}{}", left, right))
                }
                _ => {
                    let (a, b) = self.integers(&left, &right, &location)?;
                    let result = if op == TokenKind::Plus { a.checked_add(b) } else { a.checked_sub(b) };
                    Value::Integer(result.ok_or_else(|| {
                        BuildError::expression("integer overflow", location.clone())
                    })?)
                }
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let mut left = self.parse_unary(t)?;

        while matches!(t.kind(), TokenKind::Mul | TokenKind::Div | TokenKind::Mod) {
            let op = t.kind();
            let location = t.location_at(t.current().start);
            t.next_token()?;
            let right = self.parse_unary(t)?;

            if !self.evaluating {
                continue;
            }

            let (a, b) = self.integers(&left, &right, &location)?;
            if op != TokenKind::Mul && b == 0 {
                return Err(BuildError::expression("division by zero", location));
            }
            let result = match op {
                TokenKind::Mul => a.checked_mul(b),
                TokenKind::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            left = Value::Integer(
                result.ok_or_else(|| BuildError::expression("integer overflow", location))?,
            );
        }

        Ok(left)
    }

    fn parse_unary(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        if !self.state.descend() {
            return Err(BuildError::expression(
                format!("expression is nested deeper than {} levels", MAX_EXPANSION_DEPTH),
                t.location_at(t.current().start),
            ));
        }
        let result = self.parse_operand(t);
        self.state.ascend();
        result
    }

    fn parse_operand(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let location = t.location_at(t.current().start);

        if t.kind() == TokenKind::Minus {
            t.next_token()?;
            let operand = self.parse_unary(t)?;
            if !self.evaluating {
                return Ok(operand);
            }
            let value = operand.to_int().ok_or_else(|| {
                BuildError::expression(format!("cannot negate {}", operand.type_name()), location.clone())
            })?;
            return value
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| BuildError::expression("integer overflow", location));
        }

        if t.kind() == TokenKind::Not || is_keyword(t, "not") {
            t.next_token()?;
            let operand = self.parse_unary(t)?;
            if !self.evaluating {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(!self.boolean(&operand, &location)?));
        }

        self.parse_primary(t)
    }

    fn parse_primary(&mut self, t: &mut Tokenizer<'_>) -> Result<Value, BuildError> {
        let location = t.location_at(t.current().start);

        match t.kind() {
            TokenKind::Number => {
                let text = t.current().text.clone();
                t.next_token()?;
                text.parse::<i64>().map(Value::Integer).map_err(|_| {
                    BuildError::expression(format!("number '{}' is out of range", text), location)
                })
            }
            TokenKind::String => {
                let text = t.current().text.clone();
                t.next_token()?;
                Ok(Value::String(text))
            }
            TokenKind::LeftParen => {
                t.next_token()?;
                let value = self.parse_expression(t)?;
                self.expect(t, TokenKind::RightParen)?;
                Ok(value)
            }
            TokenKind::Keyword => {
                let name = t.current().text.clone();
                t.next_token()?;

                if t.kind() == TokenKind::DoubleColon {
                    return self.parse_function_call(t, &name, location);
                }

                match name.as_str() {
                    "true" => Ok(Value::Boolean(true)),
                    "false" => Ok(Value::Boolean(false)),
                    _ if !self.evaluating => Ok(Value::String(String::new())),
                    _ => {
                        let saved = std::mem::replace(&mut self.location, location);
                        let result = self.evaluate_property(&name);
                        self.location = saved;
                        result.map(Value::String)
                    }
                }
            }
            TokenKind::EndOfInput => {
                Err(BuildError::expression("unexpected end of expression", location))
            }
            _ => {
                let found = t.kind().to_string();
                Err(self.unexpected(t, &found))
            }
        }
    }

    fn parse_function_call(
        &mut self,
        t: &mut Tokenizer<'_>,
        prefix: &str,
        location: Location,
    ) -> Result<Value, BuildError> {
        t.next_token()?;
        if t.kind() != TokenKind::Keyword {
            let found = t.kind().to_string();
            return Err(self.unexpected(t, &format!("{}, expected function name", found)));
        }
        let name = format!("{}::{}", prefix, t.current().text);
        t.next_token()?;

        self.expect(t, TokenKind::LeftParen)?;
        let mut args = Vec::new();
        if t.kind() != TokenKind::RightParen {
            loop {
                args.push(self.parse_expression(t)?);
                if t.kind() != TokenKind::Comma {
                    break;
                }
                t.next_token()?;
            }
        }
        self.expect(t, TokenKind::RightParen)?;

        if !self.evaluating {
            return Ok(Value::String(String::new()));
        }
        self.call_function(&name, &args, &location)
    }

    fn expect(&self, t: &mut Tokenizer<'_>, kind: TokenKind) -> Result<(), BuildError> {
        if t.kind() != kind {
            let found = t.kind().to_string();
            return Err(self.unexpected(t, &format!("{}, expected {}", found, kind)));
        }
        t.next_token()
    }

    fn unexpected(&self, t: &Tokenizer<'_>, what: &str) -> BuildError {
        BuildError::expression(format!("unexpected {}", what), t.location_at(t.current().start))
    }

    fn boolean(&self, value: &Value, location: &Location) -> Result<bool, BuildError> {
        if !self.evaluating {
            return Ok(false);
        }
        value.to_bool().ok_or_else(|| {
            BuildError::expression(format!("'{}' is not a boolean", value), location.clone())
        })
    }

    fn integers(
        &self,
        left: &Value,
        right: &Value,
        location: &Location,
    ) -> Result<(i64, i64), BuildError> {
        match (left.to_int(), right.to_int()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(BuildError::expression(
                format!(
                    "arithmetic requires integers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                location.clone(),
            )),
        }
    }
}

fn is_keyword(t: &Tokenizer<'_>, word: &str) -> bool {
    t.kind() == TokenKind::Keyword && t.current().text == word
}

/// Compare two values, coercing strings towards the other operand's type.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Integer(a), other @ Value::String(_)) => other.to_int().map(|b| a.cmp(&b)),
        (other @ Value::String(_), Value::Integer(b)) => other.to_int().map(|a| a.cmp(b)),
        (Value::Boolean(a), other @ Value::String(_)) => other.to_bool().map(|b| a.cmp(&b)),
        (other @ Value::String(_), Value::Boolean(b)) => other.to_bool().map(|a| a.cmp(b)),
        _ => None,
    }
}
