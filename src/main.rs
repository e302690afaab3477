use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::{error, info};

use bioimage_datasets::{
    config::Config,
    consolidate::consolidate_dir,
    datasets::{all_datasets, find, Dataset},
    metadata::{
        extract_all_tif_metadata, extract_dm3_metadata, extract_zarr_metadata,
        get_brief_tif_metadata, get_volume_info_metadata,
    },
    volume::VolumeInfo,
    DatasetResult,
};

/// Download bioimaging datasets and extract their metadata as JSON
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root of the downloaded data, overrides the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Root of the metadata outputs, overrides the config file
    #[arg(long, global = true)]
    outputs_dir: Option<PathBuf>,
    /// More logging, repeat for trace
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the named datasets (all when none given) and extract their metadata
    Run {
        datasets: Vec<String>,
        /// Write the consolidated attribute report afterwards
        #[arg(long)]
        consolidate: bool,
    },
    /// List the known datasets
    List,
    /// Extract the metadata of a single local file or directory
    Extract {
        #[arg(long, value_enum)]
        format: Format,
        input: PathBuf,
        /// Output JSON file; for dm3 the output folder
        output: PathBuf,
    },
    /// Fold every metadata file below a directory into one attribute report
    Consolidate {
        outputs_dir: PathBuf,
        out_file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Tiff,
    TiffBrief,
    Zarr,
    Dm3,
    VolumeInfo,
}

fn init_logger(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_config(cli: &Cli) -> DatasetResult<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.outputs_dir {
        config.outputs_dir = dir.clone();
    }
    Ok(config)
}

/// Returns the number of datasets that failed
async fn run(names: &[String], config: &Config) -> DatasetResult<usize> {
    let datasets: Vec<Box<dyn Dataset>> = if names.is_empty() {
        all_datasets()
    } else {
        names.iter().map(|n| find(n)).collect::<DatasetResult<_>>()?
    };
    let mut failed = 0;
    for dataset in &datasets {
        info!("Running tasks of {}", dataset.name());
        if !dataset.run_tasks(config).await {
            failed += 1;
        }
    }
    Ok(failed)
}

async fn dispatch(cli: Cli) -> DatasetResult<bool> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Run {
            datasets,
            consolidate,
        } => {
            let failed = run(&datasets, &config).await?;
            if consolidate {
                consolidate_dir(
                    &config.outputs_dir,
                    &config.output_path("consolidated_metadata.json"),
                )?;
            }
            if failed > 0 {
                error!("{failed} datasets did not complete");
            }
            Ok(failed == 0)
        }
        Command::List => {
            for dataset in all_datasets() {
                println!("{:<18} {}", dataset.name(), dataset.description());
            }
            Ok(true)
        }
        Command::Extract {
            format,
            input,
            output,
        } => {
            match format {
                Format::Tiff => extract_all_tif_metadata(&input, &output, &config)?,
                Format::TiffBrief => get_brief_tif_metadata(&input, &output, &config)?,
                Format::Zarr => extract_zarr_metadata(&input, &output, &config)?,
                Format::Dm3 => extract_dm3_metadata(&input, &output, &config)?,
                Format::VolumeInfo => {
                    let info = VolumeInfo::from_json(&std::fs::read(&input)?)?;
                    get_volume_info_metadata(Some(&info), &output, &config)?
                }
            };
            Ok(true)
        }
        Command::Consolidate {
            outputs_dir,
            out_file,
        } => {
            consolidate_dir(&outputs_dir, &out_file)?;
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(&cli);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start the runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(dispatch(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test_cli {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_extract() {
        let cli = Cli::parse_from([
            "bioimage-datasets",
            "--data-dir",
            "/scratch",
            "extract",
            "--format",
            "tiff-brief",
            "in.tif",
            "out.json",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/scratch")));
        assert!(matches!(
            cli.command,
            Command::Extract {
                format: Format::TiffBrief,
                ..
            }
        ));
        let config = load_config(&cli).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/scratch"));
        assert_eq!(config.outputs_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["bioimage-datasets", "-v", "run", "epfl_hippocampus", "u2os_chromatin"]);
        assert_eq!(cli.verbose, 1);
        let Command::Run { datasets, consolidate } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(datasets, ["epfl_hippocampus", "u2os_chromatin"]);
        assert!(!consolidate);
    }
}
