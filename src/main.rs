extern crate exiot;

use clap::Parser;
use exiot::input::{config_from_json, Config};
use exiot::output::{write_matrix_csv, FileOutput};
use exiot::run_model;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct ModelArgs {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "./ConfigFile.json")]
    config_file: String,
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = ModelArgs::parse();
    let config_path = Path::new(&args.config_file);
    if !config_path.exists() {
        anyhow::bail!(
            "Config file {} does not exist, please check the path",
            config_path.display()
        );
    }
    info!("Using configuration file: {}", config_path.display());
    let config: Config = config_from_json(BufReader::new(File::open(config_path)?))?;

    let report_dir = config.project_info.report_dir().to_path_buf();
    fs::create_dir_all(&report_dir)?;
    fs::create_dir_all(&config.project_info.project_outdir)?;

    let results = run_model(&config, FileOutput::new(report_dir))?;

    let results_output = FileOutput::new(config.project_info.project_outdir.clone());
    write_matrix_csv(&results_output, "iot.csv", &results.iot, &results.full_names)?;
    write_matrix_csv(
        &results_output,
        "coefficients.csv",
        &results.coefficients,
        &results.full_names,
    )?;
    write_matrix_csv(
        &results_output,
        "supply_full.csv",
        &results.supply_full,
        &results.full_names,
    )?;
    write_matrix_csv(
        &results_output,
        "use_full.csv",
        &results.use_full,
        &results.full_names,
    )?;
    info!(
        "Model run for {} complete",
        config.project_info.project_name
    );

    Ok(())
}
