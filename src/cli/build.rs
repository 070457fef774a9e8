//! Build command implementations (build, targets)

use std::process::ExitCode;

use super::{exit_code_for, load_context, BuildFileArgs, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::{BuildPipeline, BuildPlan, BuildResult};

/// Run the build command
pub fn run_build(
    args: &BuildFileArgs,
    targets: Vec<String>,
    jobs: Option<usize>,
    quiet: bool,
    json: bool,
    verbose: bool,
) -> ExitCode {
    let mut context = match load_context(args, false) {
        Ok(ctx) => ctx.with_quiet(quiet || json).with_verbose(verbose && !json),
        Err(e) => {
            eprintln!("Error: {}", e.describe());
            return exit_code_for(&e);
        }
    };
    if verbose && !json {
        println!("Using build file: {}", context.build_file().path().display());
    }
    if let Some(jobs) = jobs {
        context = context.with_jobs(jobs);
    }
    if !targets.is_empty() {
        context = context.with_filter(targets);
    }

    let pipeline = BuildPipeline::new(context);
    let result = match pipeline.build() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("BUILD FAILED");
            eprintln!("{}", e.describe());
            return exit_code_for(&e);
        }
    };

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: cannot serialize build result: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    } else {
        report(&result, verbose);
    }

    if result.is_success() {
        ExitCode::from(EXIT_SUCCESS)
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}

fn report(result: &BuildResult, verbose: bool) {
    let Some(failure) = &result.failure else {
        println!("{}", result.summary());
        if verbose {
            println!("{}", result.stats);
        }
        return;
    };

    eprintln!("BUILD FAILED");
    eprintln!("{}", failure.describe());

    if verbose {
        if let Some(run) = failure.as_run_failure() {
            if run.failures().len() > 1 {
                eprintln!("All failures ({}):", run.failures().len());
                for f in run.failures() {
                    eprintln!("  - {}", f.describe());
                }
            }
        }
        eprintln!("{}", result.summary());
    }
}

/// Run the targets command
pub fn run_targets(args: &BuildFileArgs) -> ExitCode {
    let context = match load_context(args, false) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e.describe());
            return exit_code_for(&e);
        }
    };

    let plan = BuildPlan::from_build_file(context.build_file());
    let default = context.build_file().file().project.default.as_ref().map(|d| d.get_ref().as_str());

    println!("Targets of {}:", context.project().name);
    for line in target_lines(&plan, default) {
        println!("{}", line);
    }

    ExitCode::from(EXIT_SUCCESS)
}

/// One line per target: marker, name, description and dependencies.
fn target_lines(plan: &BuildPlan, default: Option<&str>) -> Vec<String> {
    let width = plan.targets().map(|t| t.name.len()).max().unwrap_or(0);

    plan.targets()
        .map(|target| {
            let marker = if Some(target.name.as_str()) == default { "*" } else { " " };
            let mut line = format!("{} {:width$}", marker, target.name, width = width);
            if let Some(description) = &target.description {
                line.push_str("  ");
                line.push_str(description);
            }
            let deps: Vec<&str> = target.dependency_names().collect();
            if !deps.is_empty() {
                line.push_str(&format!("  [depends: {}]", deps.join(", ")));
            }
            line.trim_end().to_string()
        })
        .collect()
}
