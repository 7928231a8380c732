// Tue Feb 3 2026 - Alex

use clap::{Parser, Subcommand};
use colored::Colorize;
use ident_harness::{
    config::{self, FinalizeConfig, StageOneConfig, StageTwoConfig, TemplatesConfig},
    finalize::{FinalizeCoordinator, FINALIZE_REPORT_FIELDS},
    matcher,
    stage_one::{self, StageOneCoordinator},
    stage_two::{self, StageTwoCoordinator},
    templates::{self, TemplateMaker},
    utils::logging,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "identv")]
#[command(author = "Alex")]
#[command(version = "1.0.0")]
#[command(about = "Validation driver for distributed two-stage identification", long_about = None)]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate enrollment or search templates with the matcher under test
    MakeTemplates { config: PathBuf },

    /// Finalize the enrollment set into per-node partitions
    Finalize { config: PathBuf },

    /// Run the distributed stage one scan and merge its per-node results
    IdentStageOne { config: PathBuf },

    /// Produce ranked candidate lists from the merged stage one output
    IdentStageTwo { config: PathBuf },

    /// Print matcher and harness identification
    Version {
        #[arg(long, default_value = "null")]
        matcher: String,
    },

    #[command(hide = true)]
    StageOneNode {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        node: u32,
    },

    #[command(hide = true)]
    StageOneWorker {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        node: u32,
        #[arg(long)]
        worker: u32,
    },

    #[command(hide = true)]
    StageTwoWorker {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        worker: u32,
    },

    #[command(hide = true)]
    TemplateWorker {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        worker: u32,
    },
}

fn main() {
    let args = Args::parse();

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "[!]".red(), e);
            1
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> anyhow::Result<i32> {
    match args.command {
        // Worker-side entry points, spawned by the coordinators. They log
        // through RUST_LOG to the inherited stderr.
        Cmd::StageOneNode { config, node } => {
            logging::init_from_env();
            let cfg: StageOneConfig = config::load_config(&config)?;
            stage_one::run_node(&cfg, &config, node)?;
            return Ok(0);
        }
        Cmd::StageOneWorker {
            config,
            node,
            worker,
        } => {
            logging::init_from_env();
            let cfg: StageOneConfig = config::load_config(&config)?;
            stage_one::run_worker(&cfg, node, worker)?;
            return Ok(0);
        }
        Cmd::StageTwoWorker { config, worker } => {
            logging::init_from_env();
            let cfg: StageTwoConfig = config::load_config(&config)?;
            stage_two::run_worker(&cfg, worker)?;
            return Ok(0);
        }
        Cmd::TemplateWorker { config, worker } => {
            logging::init_from_env();
            let cfg: TemplatesConfig = config::load_config(&config)?;
            templates::run_worker(&cfg, worker)?;
            return Ok(0);
        }
        command => {
            if !atty::is(atty::Stream::Stdout) {
                colored::control::set_override(false);
            }
            logging::init_logger(args.verbose);
            run_operation(command)
        }
    }
}

fn run_operation(command: Cmd) -> anyhow::Result<i32> {
    match command {
        Cmd::MakeTemplates { config } => {
            println!("{} Loading configuration: {}", "[*]".blue(), config.display());
            let cfg: TemplatesConfig = config::load_config(&config)?;
            println!(
                "{} Generating {} templates with {} worker(s)",
                "[*]".blue(),
                cfg.kind,
                cfg.effective_processes()
            );

            let maker = TemplateMaker::new(cfg, config);
            let progress = spinner("Generating templates...");
            let result = maker.run();
            progress.finish_and_clear();
            result?;

            println!("{} Template generation complete", "[+]".green());
            Ok(0)
        }

        Cmd::Finalize { config } => {
            println!("{} Loading configuration: {}", "[*]".blue(), config.display());
            let cfg: FinalizeConfig = config::load_config(&config)?;

            let coordinator = FinalizeCoordinator::new(cfg);
            let progress = spinner("Finalizing enrollment set...");
            let result = coordinator.run();
            progress.finish_and_clear();
            let outcome = result?;

            println!("{}", FINALIZE_REPORT_FIELDS);
            for attempt in &outcome.attempts {
                println!("{}", attempt);
            }

            if outcome.status.is_success() {
                println!("{} Enrollment set finalized", "[+]".green());
            } else {
                eprintln!("{} Finalization returned: {}", "[!]".red(), outcome.status);
            }
            Ok(outcome.status.code.value() as i32)
        }

        Cmd::IdentStageOne { config } => {
            println!("{} Loading configuration: {}", "[*]".blue(), config.display());
            let cfg: StageOneConfig = config::load_config(&config)?;
            println!(
                "{} Dispatching {} node(s) x {} worker(s)",
                "[*]".blue(),
                cfg.nodes,
                cfg.effective_processes()
            );
            println!(
                "{} Combined per-search budget ({}): {}s, matcher-owned",
                "[*]".blue(),
                cfg.input_class,
                cfg.input_class.combined_budget().as_secs()
            );

            let mut coordinator = StageOneCoordinator::new(cfg, config);
            let progress = spinner("Running stage one...");
            let result = coordinator.run();
            progress.finish_and_clear();
            let report = result?;

            println!(
                "{} Stage one complete: {} merged search(es)",
                "[+]".green(),
                report.merged_count()
            );
            let missing = report.searches_with_missing_contributions();
            if missing > 0 {
                println!(
                    "{} {} search(es) missing contributions from some node",
                    "[!]".yellow(),
                    missing
                );
            }
            Ok(0)
        }

        Cmd::IdentStageTwo { config } => {
            println!("{} Loading configuration: {}", "[*]".blue(), config.display());
            let cfg: StageTwoConfig = config::load_config(&config)?;
            println!(
                "{} Dispatching {} worker(s)",
                "[*]".blue(),
                cfg.effective_processes()
            );

            let coordinator = StageTwoCoordinator::new(cfg, config);
            let progress = spinner("Running stage two...");
            let result = coordinator.run();
            progress.finish_and_clear();
            result?;

            println!("{} Stage two complete", "[+]".green());
            Ok(0)
        }

        Cmd::Version { matcher: name } => {
            let matcher = matcher::for_name(&name)?;
            let identity = matcher.identity();
            println!("Harness: identv {}", env!("CARGO_PKG_VERSION"));
            println!("Matcher: {} rev {}", identity.identifier, identity.revision);
            println!("Contact: {}", identity.contact);
            Ok(0)
        }

        // Worker subcommands are handled before logger setup
        _ => unreachable!("worker commands handled in run()"),
    }
}

fn spinner(message: &str) -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    progress.set_message(message.to_string());
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}
