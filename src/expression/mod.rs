//! Expression language used for property substitution.
//!
//! Text such as `${out}/bin` or `${string::to-upper(project.name) + '-' + version}`
//! is resolved in two layers:
//!
//! - **Tokenizer**: lazily turns expression text into typed tokens
//! - **Evaluator**: parses the tokens recursively, resolving property
//!   references through a [`crate::properties::PropertyStore`] and calling
//!   functions from a [`FunctionRegistry`]

pub mod evaluator;
pub mod functions;
pub mod tokenizer;
pub mod value;

pub use evaluator::ExpressionEvaluator;
pub use functions::{FunctionContext, FunctionEntry, FunctionKind, FunctionRegistry, FunctionSignature};
pub use tokenizer::{tokenize, Token, TokenKind, Tokenizer, TokenizerOptions};
pub use value::Value;
