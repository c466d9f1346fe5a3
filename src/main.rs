use clap::Parser;
use colored::*;
use env_logger::Builder;
use log::{info, LevelFilter};
use phytodiv::process::{run, Args};
use phytodiv::progress::{set_stage, ProcessingStage};

fn log_level(args: &Args) -> LevelFilter {
    if args.quiet {
        return LevelFilter::Warn;
    }
    match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    Builder::new()
        .filter_level(log_level(&args))
        .parse_default_env()
        .init();

    set_stage(ProcessingStage::Startup);
    info!("Input table: {}", args.input);
    info!("Output directory: {}", args.output_dir);
    if let Some(target) = args.rarefy {
        info!(
            "Rarefaction: target size {}, {} iterations, {} worker(s)",
            target, args.iterations, args.threads
        );
    }

    match run(&args) {
        Ok(outputs) => {
            info!("FAD results written to {}", outputs.fad.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format!("Error: {}", e).red());
            std::process::exit(1);
        }
    }
}
