mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use svgconvert::{read_source, BatchLimits, BatchProcessor, ConversionPipeline, Dispatcher, Settings};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path.display()))?;
            Settings::from_json(&text)?
        }
        None => Settings::default(),
    };
    let config = cli.vectorization_config(&settings);
    let limits = if cli.professional {
        BatchLimits::professional()
    } else {
        settings.batch.clone()
    };

    let pipeline = ConversionPipeline::new(settings.pipeline.clone());
    let dispatcher = if cli.worker {
        Dispatcher::with_worker(pipeline)
    } else {
        Dispatcher::in_process(pipeline)
    };
    let mut batch = BatchProcessor::new(dispatcher, limits);

    let mut files = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        files.push(read_source(input).with_context(|| format!("reading {}", input.display()))?);
    }
    let ids = batch.add_files(files, &config)?;
    let outputs: HashMap<u64, PathBuf> = ids
        .into_iter()
        .zip(&cli.inputs)
        .map(|(id, input)| (id, output_path(input, cli.output_dir.as_deref())))
        .collect();

    let quiet = cli.json;
    let report = batch.process(|p| {
        if !quiet {
            eprint!(
                "\r[{}/{}] {} {:>3}% ({})   ",
                p.index + 1,
                p.total,
                p.file_name,
                p.file_progress,
                p.stage
            );
        }
    });
    if !quiet {
        eprintln!();
    }

    for outcome in &report.completed {
        let (Some(result), Some(path)) = (&outcome.result, outputs.get(&outcome.job_id)) else {
            continue;
        };
        std::fs::write(path, &result.svg_content).with_context(|| format!("writing {}", path.display()))?;
        if !quiet {
            println!(
                "{} -> {} ({:?}, {} paths, {:.0}% of original size)",
                outcome.file_name,
                path.display(),
                result.strategy,
                result.path_count,
                result.size_ratio() * 100.0
            );
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if let Some(summary) = report.failure_summary() {
        anyhow::bail!(summary);
    }
    Ok(())
}

fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let svg = input.with_extension("svg");
    match (output_dir, svg.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => svg,
    }
}
