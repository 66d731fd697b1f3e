use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use nemflow::study;
use nemflow::{
    load_case, new_run_id, optimize, read_result, read_scenario, write_case_file, write_result,
    write_scenario, Alg, CaseSource, Engine, EngineConfig, NetworkSummary, ReportTarget,
    SolveMode, SolveOptions, StudyConfig, WriteMode,
};
use std::path::PathBuf;

/// Impact studies of distributed generation and storage on power networks.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(SolveArgs),

    /// Optimal Power Flow
    #[clap(name = "opf")]
    OptimalPowerFlow(SolveArgs),

    /// Installed capacity and load classes of a case
    Summary(SummaryArgs),

    /// Optimal day-ahead compensation schedule
    Nem(ConfigArgs),

    /// Full study: prepare, solve and report
    Run(RunArgs),

    /// Validate a study and write the scenario handoff file
    Prepare(PrepareArgs),

    /// Solve a scenario handoff file and write the result handoff file
    Solve(SolvePhaseArgs),

    /// Report a result handoff file
    Report(ReportArgs),
}

#[derive(Args)]
struct SolveArgs {
    /// Catalog case name or MATPOWER file
    #[arg(required = true)]
    case: String,

    /// Write the solved case to a MATPOWER file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    solver: SolverArgs,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args)]
struct SolverArgs {
    /// Power flow algorithm.
    #[arg(long)]
    pub alg: Option<Alg>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    pub tol: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    pub max_it: Option<usize>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    Native,
    Octave,
}

#[derive(Args)]
struct EngineArgs {
    /// Engine that solves the case. Overrides the configuration file.
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Octave executable
    #[arg(long, default_value = "octave")]
    octave: PathBuf,

    /// Directory holding MATPOWER
    #[arg(long)]
    matpower: Option<PathBuf>,
}

#[derive(Args)]
struct SummaryArgs {
    /// Catalog case name or MATPOWER file
    #[arg(required = true)]
    case: String,
}

#[derive(Args)]
struct ConfigArgs {
    /// Study configuration (TOML)
    #[arg(required = true)]
    config: PathBuf,
}

#[derive(Args)]
struct ReportTargetArgs {
    /// Also write the report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// How an existing report file is treated
    #[arg(long, value_enum, default_value_t = WriteMode::Append)]
    write_mode: WriteMode,
}

#[derive(Args)]
struct RunArgs {
    /// Study configuration (TOML)
    #[arg(required = true)]
    config: PathBuf,

    #[command(flatten)]
    target: ReportTargetArgs,

    #[command(flatten)]
    solver: SolverArgs,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args)]
struct PrepareArgs {
    /// Study configuration (TOML)
    #[arg(required = true)]
    config: PathBuf,

    /// Scenario handoff file
    #[arg(short, long, default_value = "scenario.bin")]
    output: PathBuf,
}

#[derive(Args)]
struct SolvePhaseArgs {
    /// Scenario handoff file
    #[arg(required = true)]
    scenario: PathBuf,

    /// Result handoff file
    #[arg(short, long, default_value = "result.bin")]
    output: PathBuf,

    #[command(flatten)]
    solver: SolverArgs,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args)]
struct ReportArgs {
    /// Result handoff file
    #[arg(required = true)]
    result: PathBuf,

    /// Scenario handoff file the result must belong to
    #[arg(long)]
    scenario: Option<PathBuf>,

    #[command(flatten)]
    target: ReportTargetArgs,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn solve_options(base: &SolveOptions, args: &SolverArgs) -> Result<SolveOptions> {
    let mut opt = base.clone();
    if let Some(alg) = args.alg {
        opt.algorithm = alg;
    }
    if let Some(tol) = args.tol {
        opt.tolerance = tol;
    }
    if let Some(max_it) = args.max_it {
        opt.max_it = max_it;
    }
    opt.validated().map_err(|err| anyhow!(err))
}

fn engine_config(base: &EngineConfig, args: &EngineArgs) -> EngineConfig {
    match args.engine {
        None => base.clone(),
        Some(EngineKind::Native) => EngineConfig::Native,
        Some(EngineKind::Octave) => EngineConfig::Octave {
            program: args.octave.clone(),
            matpower_path: args.matpower.clone(),
        },
    }
}

fn report_target(args: &ReportTargetArgs) -> Option<ReportTarget> {
    args.report.as_ref().map(|path| ReportTarget {
        path: path.clone(),
        mode: args.write_mode,
    })
}

fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::PowerFlow(args) => single_solve(args, SolveMode::PowerFlow),
        Commands::OptimalPowerFlow(args) => single_solve(args, SolveMode::OptimalPowerFlow),
        Commands::Summary(args) => {
            let mpc = load_case(&CaseSource::parse(&args.case))?;
            print!("{}", NetworkSummary::of(&mpc)?.render());
            Ok(())
        }
        Commands::Nem(args) => {
            let config = StudyConfig::from_file(&args.config)?;
            let inputs = config
                .compensation
                .ok_or_else(|| anyhow!("{} has no [compensation] table", args.config.display()))?;
            print!("{}", optimize(&inputs, config.economics.der_cost)?.render());
            Ok(())
        }
        Commands::Run(args) => {
            let mut config = StudyConfig::from_file(&args.config)?;
            config.solver = solve_options(&config.solver, &args.solver)?;
            config.engine = engine_config(&config.engine, &args.engine);
            if let Some(target) = report_target(&args.target) {
                config.report = Some(target);
            }
            study::run(&config, new_run_id())?;
            Ok(())
        }
        Commands::Prepare(args) => {
            let config = StudyConfig::from_file(&args.config)?;
            let prepared = study::prepare(&config, new_run_id())?;
            write_scenario(&args.output, &prepared.handoff)?;
            info!("scenario written to {}", args.output.display());
            Ok(())
        }
        Commands::Solve(args) => {
            let handoff = read_scenario(&args.scenario)?;
            let options = solve_options(&SolveOptions::default(), &args.solver)?;
            let mut engine = engine_config(&EngineConfig::Native, &args.engine).build(&options);
            let result = study::solve(&handoff, engine.as_mut())?;
            write_result(&args.output, &result)?;
            info!("result written to {}", args.output.display());
            Ok(())
        }
        Commands::Report(args) => {
            let run_id = match &args.scenario {
                Some(path) => Some(read_scenario(path)?.run_id),
                None => None,
            };
            let result = read_result(&args.result, run_id)?;
            study::report(&result, report_target(&args.target).as_ref())?;
            Ok(())
        }
    }
}

fn single_solve(args: &SolveArgs, mode: SolveMode) -> Result<()> {
    let mpc = load_case(&CaseSource::parse(&args.case))?;
    let options = solve_options(&SolveOptions::default(), &args.solver)?;
    let mut engine = engine_config(&EngineConfig::Native, &args.engine).build(&options);

    let result = engine.solve(&mpc, mode)?.ensure_converged()?;
    println!(
        "{} converged in {} iterations",
        result.mode, result.iterations
    );
    if let Some(f) = result.objective {
        println!("objective: {:.2} $/hr", f);
    }
    println!("{:>6}{:>10}{:>10}", "bus", "Vm", "Va");
    for b in &result.case.bus {
        println!("{:>6}{:>10.4}{:>10.3}", b.bus_i, b.vm, b.va);
    }
    println!("{:>6}{:>10}{:>10}", "gen", "Pg", "Qg");
    for g in &result.case.gen {
        println!("{:>6}{:>10.2}{:>10.2}", g.gen_bus, g.pg, g.qg);
    }

    if let Some(out_path) = &args.output {
        write_case_file(out_path, &result.case)?;
    }
    Ok(())
}
