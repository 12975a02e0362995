use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use shogun_function::funcdb::FunctionDb;
use shogun_function::types::TaxonomicRank;
use shogun_function::{function_run_and_save, FunctionDbStatus};

/// Predict KEGG ortholog, module and pathway profiles from taxatables.
#[derive(Parser, Debug)]
#[command(name = "shogun-function", version, about)]
struct Args {
    /// Taxatable files, or directories holding them (.txt, .tsv, optionally .gz)
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Database directory with a metadata.yaml naming the function files
    #[arg(short, long)]
    database: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "shogun_function_out")]
    output: PathBuf,

    /// Taxonomic level to predict at: a rank name or 1 (kingdom) to 8 (strain)
    #[arg(short, long, default_value = "species")]
    level: TaxonomicRank,

    /// Do not write the median-normalized taxatable
    #[arg(long)]
    no_save_normalized: bool,

    /// Worker threads for processing several taxatables (0 = all cores)
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Log debug messages
    #[arg(short, long)]
    verbose: bool,
}

fn spinner(color: &str, msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(msg.to_string());
    spinner
}

fn is_taxatable(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    name.ends_with(".txt") || name.ends_with(".tsv")
}

/// Expands directories into the taxatables they contain.
fn gather_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("Cannot read directory {}", path.display()))?
                .filter_map(|entry| {
                    let path = entry.ok()?.path();
                    (path.is_file() && is_taxatable(&path)).then_some(path)
                })
                .collect();
            found.sort();
            inputs.extend(found);
        } else {
            inputs.push(path.clone());
        }
    }
    Ok(inputs)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    // 1. Gather taxatables
    let inputs = gather_inputs(&args.input)?;
    if inputs.is_empty() {
        bail!("No taxatables found in the given inputs");
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Cannot create output directory {}", args.output.display()))?;

    // 2. Load the function database once
    let loading = spinner("blue", "Loading function database...");
    let func_db = match FunctionDb::load(&args.database)
        .with_context(|| format!("Failed to load function database {}", args.database.display()))?
    {
        FunctionDbStatus::Available(db) => db,
        FunctionDbStatus::Unavailable(reason) => {
            loading.finish_with_message("No function database available.");
            bail!("No function database available in {}: {reason}", args.database.display());
        }
    };
    loading.finish_with_message(format!(
        "Function database loaded: {} strains, {} KEGG ids.",
        func_db.reference.n_taxa(),
        func_db.reference.n_functions()
    ));

    // 3. Predict each taxatable; files are independent and share the database read-only
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build()
        .context("Failed to build thread pool")?;

    let predicting = spinner(
        "green",
        &format!("Predicting functions at {} for {} taxatable(s)...", args.level, inputs.len()),
    );
    let results: Vec<Result<()>> = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| {
                function_run_and_save(input, &func_db, &args.output, args.level, !args.no_save_normalized)
                    .map(|_| ())
                    .with_context(|| format!("Functional prediction failed for {}", input.display()))
            })
            .collect()
    });
    predicting.finish_with_message("Functional prediction finished.");

    let mut failures = 0usize;
    for result in results {
        if let Err(err) = result {
            log::error!("{err:#}");
            failures += 1;
        }
    }
    if failures > 0 {
        bail!("{failures} of {} taxatable(s) failed", inputs.len());
    }

    let done = spinner("cyan", "All done!");
    done.finish_with_message(format!("All done! Output in {}", args.output.display()));
    Ok(())
}
