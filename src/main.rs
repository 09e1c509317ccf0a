//! crank - run declarative build plans on the local machine.
//!
//! Usage:
//!   crank run <plan-file>       Execute a plan with the local runner
//!   crank validate <plan-file>  Check a plan file without running it
//!   crank show <plan-file>      Print the interpreted step tree

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use crank::{
    load_plan_file, BuildModel, Engine, LocalFactory, LoggingBuildDelegateFactory, Plan, StepPlan,
};

/// crank - a build execution engine for declarative plans
#[derive(Parser)]
#[command(name = "crank")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan file with the local runner
    Run {
        /// Path to the plan file (YAML or JSON)
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,

        /// Numeric id to tag the build's workloads with
        #[arg(long, default_value = "1")]
        build_id: i64,
    },

    /// Check a plan file without running it
    Validate {
        /// Path to the plan file (YAML or JSON)
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },

    /// Print the interpreted step tree
    Show {
        /// Path to the plan file (YAML or JSON)
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            plan_file,
            build_id,
        } => run_plan(plan_file, build_id).await,
        Commands::Validate { plan_file } => validate_plan(plan_file),
        Commands::Show { plan_file } => show_plan(plan_file),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Execute a plan with the local runner, aborting on Ctrl+C.
async fn run_plan(
    plan_file: PathBuf,
    build_id: i64,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let file = load_plan_file(&plan_file)?;
    info!("loaded plan '{}' from {}", file.name, plan_file.display());

    let engine = Engine::new(
        Arc::new(LocalFactory::new()),
        Arc::new(LoggingBuildDelegateFactory),
    );

    let model = BuildModel {
        id: build_id,
        name: file.name.clone(),
        job_name: String::new(),
    };
    let mut build = engine.create_build(model, file.plan)?;

    let abort = build.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting build");
            abort.abort();
        }
    });

    let result = build.resume().await;

    if result.aborted {
        warn!("build aborted");
        return Ok(ExitCode::from(3));
    }
    if let Some(err) = result.error {
        error!("build errored: {}", err);
        return Ok(ExitCode::from(2));
    }
    if result.succeeded {
        info!("build succeeded");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("build failed");
        Ok(ExitCode::FAILURE)
    }
}

/// Check that a plan file loads and passes engine validation.
fn validate_plan(plan_file: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let file = load_plan_file(&plan_file)?;

    let engine = Engine::new(
        Arc::new(LocalFactory::new()),
        Arc::new(LoggingBuildDelegateFactory),
    );
    engine.create_build(BuildModel::default(), file.plan)?;

    println!("{}: OK", plan_file.display());
    Ok(ExitCode::SUCCESS)
}

/// Print the plan as an indented step tree.
fn show_plan(plan_file: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let file = load_plan_file(&plan_file)?;

    println!("plan '{}':", file.name);
    describe(&file.plan, 1);
    Ok(ExitCode::SUCCESS)
}

fn describe(plan: &Plan, depth: usize) {
    let indent = "  ".repeat(depth);
    match &plan.step {
        StepPlan::Get(get) => println!("{}get '{}'", indent, get.name),
        StepPlan::Put(put) => println!("{}put '{}'", indent, put.name),
        StepPlan::DependentGet(get) => println!("{}dependent get '{}'", indent, get.name),
        StepPlan::Task(task) => println!("{}task '{}'", indent, task.name),
        StepPlan::Aggregate(plans) => {
            println!("{}in parallel:", indent);
            for plan in plans {
                describe(plan, depth + 1);
            }
        }
        StepPlan::Do(plans) => {
            println!("{}in sequence:", indent);
            for plan in plans {
                describe(plan, depth + 1);
            }
        }
        StepPlan::OnSuccess(hook) => {
            describe(&hook.step, depth);
            println!("{}on success:", indent);
            describe(&hook.next, depth + 1);
        }
        StepPlan::OnFailure(hook) => {
            describe(&hook.step, depth);
            println!("{}on failure:", indent);
            describe(&hook.next, depth + 1);
        }
        StepPlan::Ensure(hook) => {
            describe(&hook.step, depth);
            println!("{}ensure:", indent);
            describe(&hook.next, depth + 1);
        }
        StepPlan::Try(step) => {
            println!("{}try:", indent);
            describe(step, depth + 1);
        }
        StepPlan::Timeout(timeout) => {
            println!("{}within {}:", indent, timeout.duration);
            describe(&timeout.step, depth + 1);
        }
        StepPlan::Conditional(conditional) => {
            println!("{}when {:?}:", indent, conditional.conditions);
            describe(&conditional.step, depth + 1);
        }
        StepPlan::Retry(retry) => {
            println!("{}up to {} attempts:", indent, retry.attempts);
            describe(&retry.step, depth + 1);
        }
    }
}
