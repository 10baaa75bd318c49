//! Loading IR projects and driving the whole-program analysis.

use std::path::Path;

use crate::analysis::annotation;
use crate::analysis::callgraph::CallGraphPass;
use crate::analysis::range::RangePass;
use crate::analysis::taint::TaintPass;
use crate::analysis::{GlobalContext, IterativeModulePass};
use crate::checkers::{alloc_size, Config};
use crate::intermediate_representation::Project;
use crate::prelude::*;
use crate::solver::z3::Z3Solver;
use crate::utils::diagnostic::BugReport;
use crate::utils::log::{LogMessage, LogThreadMsg};

/// Load a project from a list of IR module files in JSON serialization.
pub fn load_project(paths: &[impl AsRef<Path>]) -> Result<Project, Error> {
    let mut modules = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let file = std::io::BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("Could not open IR module {}", path.display()))?,
        );
        modules.push(
            serde_json::from_reader(file)
                .with_context(|| format!("Could not parse IR module {}", path.display()))?,
        );
    }
    Ok(Project { modules })
}

/// Run the full analysis over a project:
/// annotate all modules, repeat the call graph, taint and range passes until
/// none reports change, then hand every function to the checker.
///
/// Returns the shared analysis stores and the collected bug reports.
pub fn run_analysis(
    project: &mut Project,
    config: &Config,
    logger: &crossbeam_channel::Sender<LogThreadMsg>,
) -> (GlobalContext, Vec<BugReport>) {
    for module in &mut project.modules {
        annotation::run(module, &config.allocation_sinks);
    }
    let mut ctx = GlobalContext::new(project);
    let mut round = 0u64;
    loop {
        round += 1;
        let mut changed = false;
        changed |= CallGraphPass::new(&mut ctx).run(project, logger);
        changed |= TaintPass::new(&mut ctx).run(project, logger);
        changed |= RangePass::new(&mut ctx).run(project, logger);
        let _ = logger.send(
            LogMessage::new_debug(format!(
                "analysis round {round} {}",
                if changed { "changed the stores" } else { "reached the fixed point" }
            ))
            .source("Driver")
            .into(),
        );
        if !changed {
            break;
        }
    }

    let z3_config = z3::Config::new();
    let z3_ctx = z3::Context::new(&z3_config);
    let mut reports = Vec::new();
    for module in &project.modules {
        for function in &module.functions {
            if function.is_declaration() {
                continue;
            }
            let function_reports = alloc_size::check_function(module, function, &|| {
                Z3Solver::with_timeout(&z3_ctx, config.solver_timeout_ms)
            });
            for report in &function_reports {
                let _ = logger.send(report.clone().into());
            }
            reports.extend(function_reports);
        }
    }
    (ctx, reports)
}
