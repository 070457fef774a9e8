//! Eval command implementation

use std::process::ExitCode;

use super::{exit_code_for, load_context, BuildFileArgs, EXIT_ERROR, EXIT_SUCCESS};
use crate::expression::FunctionRegistry;
use crate::location::Location;

/// Run the eval command
pub fn run_eval(expression: &str, args: &BuildFileArgs, verbose: bool) -> ExitCode {
    let context = match load_context(args, true) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e.describe());
            return exit_code_for(&e);
        }
    };
    if verbose {
        eprintln!("Project: {} ({})", context.project().name, context.project_root().display());
        eprintln!("Functions:");
        for line in function_lines(context.functions()) {
            eprintln!("  {}", line);
        }
    }

    match context.properties().expand(expression, &Location::Unknown) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e.describe());
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// One line per callable function, e.g. `string::replace(3 args)`.
fn function_lines(functions: &FunctionRegistry) -> Vec<String> {
    functions
        .signatures()
        .into_iter()
        .map(|s| match s.arity {
            1 => format!("{}(1 arg)", s.name),
            n => format!("{}({} args)", s.name, n),
        })
        .collect()
}
