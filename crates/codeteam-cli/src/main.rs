use anyhow::Result;
use clap::{Parser, Subcommand};
use codeteam_core::{AppConfig, Phase, runtime_dir};
use codeteam_engine::{Engine, StdinDecisions};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::Path;

#[derive(Parser)]
#[command(name = "codeteam")]
#[command(about = "Reconciliation-based orchestrator for plan/code/verify/commit workflows", long_about = None)]
struct Cli {
    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the runtime directory and default settings.
    Init,
    /// Start the planning phase from a feature request.
    Plan {
        /// The request to plan for; prompted interactively when omitted.
        request: Option<String>,
    },
    /// Start or resume the coding and verification loop.
    Code,
    /// Show the reconciled phase and plan progress.
    Status,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = std::env::current_dir()?;
    match cli.command {
        Commands::Init => run_init(&workspace, cli.json),
        Commands::Plan { request } => run_plan(&workspace, request, cli.json, cli.verbose),
        Commands::Code => run_code(&workspace, cli.json, cli.verbose),
        Commands::Status => run_status(&workspace, cli.json),
    }
}

fn run_init(workspace: &Path, json: bool) -> Result<()> {
    let cfg = AppConfig::ensure(workspace)?;
    let dir = runtime_dir(workspace);
    std::fs::create_dir_all(dir.join("logs"))?;
    std::fs::create_dir_all(dir.join("reports"))?;
    std::fs::create_dir_all(workspace.join(&cfg.plans_directory))?;
    if json {
        println!(
            "{}",
            json!({"initialized": dir, "settings": AppConfig::project_settings_path(workspace)})
        );
    } else {
        println!("Initialized {}", dir.display());
        println!(
            "Settings: {}",
            AppConfig::project_settings_path(workspace).display()
        );
    }
    Ok(())
}

fn run_plan(workspace: &Path, request: Option<String>, json: bool, verbose: bool) -> Result<()> {
    let request = match request {
        Some(request) => request,
        None => prompt_for_request()?,
    };
    if request.trim().is_empty() {
        anyhow::bail!("no request provided");
    }

    let mut engine = Engine::new(workspace, Box::new(StdinDecisions))?;
    engine.set_verbose(verbose);
    let outcome = engine.run_plan_phase(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "Plan `{}` with {} task(s) written to {}",
            outcome.plan_id,
            outcome.tasks,
            outcome.document.display()
        );
        if outcome.accepted {
            println!("Plan accepted. Run `codeteam code` to start.");
        } else {
            println!("Plan not accepted yet. Re-run `codeteam code` once you are ready.");
        }
    }
    Ok(())
}

fn run_code(workspace: &Path, json: bool, verbose: bool) -> Result<()> {
    let mut engine = Engine::new(workspace, Box::new(StdinDecisions))?;
    engine.set_verbose(verbose);
    let summary = engine.run_code_phase()?;
    let final_phase = summary.final_phase();

    if json {
        println!(
            "{}",
            json!({
                "phases": summary.phases,
                "commits": summary.commits,
                "final_phase": final_phase,
            })
        );
        return Ok(());
    }

    for commit in &summary.commits {
        println!("committed {commit}");
    }
    match final_phase {
        Some(Phase::PlanComplete) => println!("Plan complete — all tasks finished."),
        Some(Phase::NoPlan) => println!("No plan found. Run `codeteam plan` first."),
        Some(Phase::AwaitingPlanAcceptance) => {
            println!("Plan awaits acceptance. Re-run `codeteam code` to decide.");
        }
        Some(phase) => println!("Suspended at {phase}. Re-run `codeteam code` to resume."),
        None => {}
    }
    Ok(())
}

fn run_status(workspace: &Path, json: bool) -> Result<()> {
    let engine = Engine::new(workspace, Box::new(StdinDecisions))?;
    let status = engine.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("phase: {}", status.phase);
    match &status.plan_id {
        Some(plan_id) => println!(
            "plan: {} ({}/{} tasks completed)",
            plan_id, status.tasks_completed, status.tasks_total
        ),
        None => println!("plan: none"),
    }
    if let Some(task) = &status.active_task {
        println!("active task: {task}");
    }
    println!(
        "working tree: {}",
        if status.tree_dirty { "dirty" } else { "clean" }
    );
    Ok(())
}

fn prompt_for_request() -> Result<String> {
    print!("Enter your request: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
