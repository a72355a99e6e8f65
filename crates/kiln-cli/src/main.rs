//! Kiln CLI - build, inspect and run demo graphs on the reference backend.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use kiln_cli::{format_tensors, random_inputs, render_report, Demo};
use kiln_runtime::{Context, ContextOptions, GraphProgram};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Compile and run tensor graphs on the Kiln reference backend", long_about = None)]
#[command(version)]
struct Cli {
    /// Worker threads for async builds and computes (overrides KILN_WORKER_THREADS)
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a demo graph, run it and print the outputs
    Demo {
        #[arg(value_enum)]
        demo: Demo,

        /// Build and compute on the worker pool
        #[arg(long = "async")]
        run_async: bool,

        /// Number of computes to run on the same program
        #[arg(short = 'n', long, default_value = "1")]
        iterations: usize,
    },
    /// Print the operator order and value bindings of a demo graph
    Inspect {
        #[arg(value_enum)]
        demo: Demo,
    },
    /// Generate a Graphviz DOT file from a demo graph
    Dot {
        #[arg(value_enum)]
        demo: Demo,

        /// Output file path (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Time repeated computes with random inputs
    Bench {
        #[arg(value_enum)]
        demo: Demo,

        /// Number of timed computes
        #[arg(short = 'n', long, default_value = "1000")]
        iterations: usize,

        /// Untimed computes before measuring
        #[arg(long, default_value = "10")]
        warmup: usize,

        /// Seed for the random inputs
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Demo {
            demo,
            run_async,
            iterations,
        } => cmd_demo(demo, run_async, iterations, cli.workers),
        Commands::Inspect { demo } => cmd_inspect(demo, cli.workers),
        Commands::Dot { demo, output } => cmd_dot(demo, output),
        Commands::Bench {
            demo,
            iterations,
            warmup,
            seed,
        } => cmd_bench(demo, iterations, warmup, seed, cli.workers),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn create_context(workers: Option<usize>) -> Result<Context> {
    let mut options = ContextOptions::from_env();
    if let Some(workers) = workers {
        options = options.with_worker_threads(workers);
    }
    Context::with_options(options).context("Failed to create context")
}

fn build(context: &Context, demo: Demo, run_async: bool) -> Result<GraphProgram> {
    let graph = demo
        .graph()
        .with_context(|| format!("Failed to build the {} graph", demo.name()))?;
    let program = if run_async {
        pollster::block_on(context.build_future(graph))
    } else {
        context.build_sync(&graph)
    };
    program.with_context(|| format!("Failed to compile the {} graph", demo.name()))
}

/// Build and run a demo, printing inputs and outputs.
fn cmd_demo(demo: Demo, run_async: bool, iterations: usize, workers: Option<usize>) -> Result<()> {
    if iterations == 0 {
        anyhow::bail!("--iterations must be at least 1");
    }

    let context = create_context(workers)?;
    let start = Instant::now();
    let program = Arc::new(build(&context, demo, run_async)?);
    eprintln!(
        "Compiled {} ({} operators) in {:.2?}",
        demo.name(),
        program.operator_order().len(),
        start.elapsed()
    );

    let mut inputs = demo.sample_inputs()?;
    let mut outputs = program.allocate_outputs()?;
    for iteration in 0..iterations {
        if run_async {
            let outcome = pollster::block_on(context.compute_future(
                Arc::clone(&program),
                inputs,
                outputs,
            ))?;
            inputs = outcome.inputs;
            outputs = outcome.outputs;
            outcome
                .result
                .with_context(|| format!("Compute {iteration} failed"))?;
        } else {
            program
                .compute(&inputs, &mut outputs)
                .with_context(|| format!("Compute {iteration} failed"))?;
        }
    }

    println!("Inputs:");
    for line in format_tensors(&inputs) {
        println!("  {line}");
    }
    println!("Outputs:");
    for line in format_tensors(&outputs) {
        println!("  {line}");
    }
    Ok(())
}

/// Compile a demo and print how it lowers.
fn cmd_inspect(demo: Demo, workers: Option<usize>) -> Result<()> {
    let graph = demo.graph()?;
    println!(
        "Graph '{}': {} operands, {} operators, {} outputs\n",
        demo.name(),
        graph.operands().len(),
        graph.operators().len(),
        graph.outputs().len()
    );

    // The context keeps the backend initialized while compiling.
    let _context = create_context(workers)?;
    let compiled = kiln_compiler::compile(&graph)
        .with_context(|| format!("Failed to compile the {} graph", demo.name()))?;
    print!("{}", render_report(&graph, &compiled)?);
    Ok(())
}

/// Generate DOT format from a demo graph.
fn cmd_dot(demo: Demo, output_path: Option<PathBuf>) -> Result<()> {
    let dot = demo.graph()?.to_dot();
    if let Some(output_path) = output_path {
        std::fs::write(&output_path, dot)
            .with_context(|| format!("Failed to write DOT output to {}", output_path.display()))?;
        eprintln!("Wrote DOT output to {}", output_path.display());
    } else {
        print!("{dot}");
    }
    Ok(())
}

/// Time computes with random inputs.
fn cmd_bench(
    demo: Demo,
    iterations: usize,
    warmup: usize,
    seed: Option<u64>,
    workers: Option<usize>,
) -> Result<()> {
    if iterations == 0 {
        anyhow::bail!("--iterations must be at least 1");
    }

    let context = create_context(workers)?;
    let program = build(&context, demo, false)?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let inputs = random_inputs(&program, &mut rng)?;
    tracing::debug!(?seed, inputs = inputs.len(), "generated random inputs");
    let mut outputs = program.allocate_outputs()?;

    for _ in 0..warmup {
        program.compute(&inputs, &mut outputs)?;
    }

    let mut fastest = Duration::MAX;
    let start = Instant::now();
    for iteration in 0..iterations {
        let step = Instant::now();
        program
            .compute(&inputs, &mut outputs)
            .with_context(|| format!("Compute {iteration} failed"))?;
        fastest = fastest.min(step.elapsed());
    }
    let total = start.elapsed();

    let mean = total.div_f64(iterations as f64);
    println!("{}: {iterations} computes in {total:.2?}", demo.name());
    println!("  mean {mean:.2?}, fastest {fastest:.2?}");
    println!(
        "  {:.1} computes/s",
        iterations as f64 / total.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
