use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lockweave::analyzer::graphviz;
use lockweave::{AnalysisReport, CONTEXTS_DB_FILENAME, EVENT_DB_FILENAME, OutputMode, analyze};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockweave - Finds potential deadlocks in recorded lock acquisition orders"
)]
struct Cli {
    /// Directory containing the recording (lockweave_events.db and
    /// lockweave_contexts.db)
    #[arg(short = 'd', long = "data-dir", default_value = ".")]
    data_dir: PathBuf,

    /// What to include in the output
    #[arg(long = "output-mode", value_enum, default_value_t = CliOutputMode::Cycles)]
    output_mode: CliOutputMode,

    /// Keep full module paths (not only type names) in graph labels
    #[arg(long = "include-packages")]
    include_packages: bool,

    /// Print the threads and methods involved in cycles
    #[arg(long = "print-details")]
    print_details: bool,

    /// Emit the whole report as JSON instead of text and Graphviz files
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliOutputMode {
    /// Include everything, whole graph
    All,
    /// Only include cycles (this is the default)
    Cycles,
    /// Only include multi-threaded cycles
    Mtcycles,
}

impl From<CliOutputMode> for OutputMode {
    fn from(mode: CliOutputMode) -> Self {
        match mode {
            CliOutputMode::All => OutputMode::AllEdges,
            CliOutputMode::Cycles => OutputMode::AllCycles,
            CliOutputMode::Mtcycles => OutputMode::MultiThreadedCyclesOnly,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let report = analyze(
        cli.data_dir.join(EVENT_DB_FILENAME),
        cli.data_dir.join(CONTEXTS_DB_FILENAME),
        cli.output_mode.into(),
    )?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_statistics(&report);
    if cli.print_details {
        print_details(&report);
    }

    match report.mode {
        OutputMode::AllEdges => {
            write_graphviz_file(&graphviz::generate(&report.all_edges, cli.include_packages), 0)?;
        }
        OutputMode::AllCycles | OutputMode::MultiThreadedCyclesOnly => {
            if report.cycles.is_empty() {
                println!("No cycles found!");
                return Ok(());
            }
            println!();
            for (index, group) in report.cycle_groups.iter().enumerate() {
                if index >= 100 {
                    println!("Aborting. Too many cycles!");
                    break;
                }
                write_graphviz_file(&graphviz::generate(group, cli.include_packages), index)?;
            }
        }
    }
    Ok(())
}

fn print_statistics(report: &AnalysisReport) {
    let stats = &report.stats;
    println!("\nLoaded from database files:");
    println!("   Nodes: {}", stats.nodes);
    println!(
        "   Edges: {} (excluding {} duplicated)",
        stats.unique_edges, stats.duplicated_edges
    );
    if stats.truncated_log {
        println!("   (the event log ended in a truncated record)");
    }
    if stats.skipped_events > 0 {
        println!("   Skipped events: {}", stats.skipped_events);
    }
    println!("\nCycle analysis result: ");
    println!("   Cycles:          {}", stats.cycles_found);
    println!("   Edges in cycles: {}", stats.edges_in_cycles);
    println!("   Nodes in cycles: {}", stats.nodes_in_cycles);
    println!("   Max cycle depth: {}", stats.max_cycle_depth);
    println!("   Max graph depth: {}", stats.max_graph_depth);
    println!();
}

fn print_details(report: &AnalysisReport) {
    let mut threads = BTreeSet::new();
    let mut methods = BTreeSet::new();
    for cycle in &report.cycles {
        for edge in &cycle.edges {
            threads.insert(edge.source_context.thread_name());
            threads.insert(edge.target_context.thread_name());
            methods.insert(edge.source_context.method_with_class());
            methods.insert(edge.target_context.method_with_class());
        }
    }
    println!("Threads involved in cycles:");
    for thread in threads {
        println!("   {thread}");
    }
    println!();
    println!("Methods involved in cycles:");
    for method in methods {
        println!("   {method}");
    }
    println!();
}

fn write_graphviz_file(contents: &str, index: usize) -> Result<()> {
    let file = PathBuf::from(format!("lockweave_result_{index}.gv"));
    println!("Writing Graphviz file: {}", file.display());
    fs::write(&file, contents)
        .with_context(|| format!("failed to write Graphviz file {}", file.display()))?;
    Ok(())
}
