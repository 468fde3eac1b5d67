use anyhow::anyhow;
use argh::FromArgs;
use std::path::Path;
use std::sync::Arc;

use crate::files::{FileId, FileSystemState};
use crate::fs::RealFileSystem;
use crate::load::{self, TargetLayout};
use crate::process::ShellRunner;
use crate::progress::DumbConsoleProgress;
use crate::{db, signal, trace};

/// opgraph: evaluates generated operation graphs.
#[derive(FromArgs)]
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// debugging tools, "-d list" to list
    #[argh(option, short = 'd')]
    debug: Option<String>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Evaluate(EvaluateArgs),
    Graph(GraphArgs),
}

/// Run the stale operations of a generated target directory.
#[derive(FromArgs)]
#[argh(subcommand, name = "evaluate")]
struct EvaluateArgs {
    /// target directory holding .soup [default=.]
    #[argh(positional, default = "String::from(\".\")")]
    target: String,
}

/// Print the operations stored in a .bog file.
#[derive(FromArgs)]
#[argh(subcommand, name = "graph")]
struct GraphArgs {
    /// graph file to print
    #[argh(positional)]
    path: String,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("OPGRAPH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn paths(files: &FileSystemState, ids: &[FileId]) -> anyhow::Result<String> {
    let mut out = String::new();
    for &id in ids {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(files.get_file_path(id)?);
    }
    Ok(out)
}

fn dump_graph(path: &Path) -> anyhow::Result<()> {
    let graph = db::load(path)?;
    let files = db::restore_files(&graph)?;
    let roots: Vec<String> = graph
        .root_operations()
        .iter()
        .map(|id| id.0.to_string())
        .collect();
    println!("roots: {}", roots.join(" "));
    for op in graph.operations() {
        println!("{} {}", op.id.0, op.title);
        println!("  command: {}", op.command);
        println!("  in: {}", paths(&files, &op.declared_input)?);
        println!("  out: {}", paths(&files, &op.declared_output)?);
        if op.was_successful_run {
            println!("  observed in: {}", paths(&files, &op.observed_input)?);
            println!("  observed out: {}", paths(&files, &op.observed_output)?);
        }
        let children: Vec<String> = op.children.iter().map(|id| id.0.to_string()).collect();
        println!("  children: {}", children.join(" "));
    }
    Ok(())
}

fn evaluate(target: &str, parallelism: usize, verbose: bool) -> anyhow::Result<i32> {
    let layout = TargetLayout::new(target);
    let fs = RealFileSystem::new();
    let mut progress = DumbConsoleProgress::new(verbose);
    signal::register_sigint();
    let result = load::evaluate(
        &layout,
        &fs,
        Arc::new(ShellRunner::new()),
        &mut progress,
        parallelism,
        Some(&signal::INTERRUPTED),
    )?;
    match result {
        None => {
            // Don't print any summary, the failing operation is enough info.
            Ok(1)
        }
        Some(0) => {
            // Special case: don't print numbers when no work done.
            println!("opgraph: no work to do");
            Ok(0)
        }
        Some(n) => {
            println!("opgraph: ran {} operations, now up to date", n);
            Ok(0)
        }
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging();

    if let Some(debug) = &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  trace  generate json performance trace");
                return Ok(1);
            }
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &args.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    match &args.command {
        Command::Evaluate(eval) => {
            let parallelism = match args.jobs {
                Some(n) => n,
                None => usize::from(std::thread::available_parallelism()?),
            };
            evaluate(&eval.target, parallelism, args.verbose)
        }
        Command::Graph(graph) => {
            dump_graph(Path::new(&graph.path))?;
            Ok(0)
        }
    }
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    let closed = trace::close();
    let code = res?;
    closed?;
    Ok(code)
}
