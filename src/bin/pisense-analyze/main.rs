mod cli;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use env_logger::Env;
use log::{debug, info, warn};

use pisense::{
    analysis::{report_stem, run_analysis, write_report, AnalysisSettings, JsonLinesTrackSource},
    tether_interface::{connect, publish_count_report, AnalysisOutputs},
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level))
        .filter_module("paho_mqtt", log::LevelFilter::Warn)
        .filter_module("tether_agent", log::LevelFilter::Warn)
        .init();

    debug!("Started; args: {:?}", cli);

    let tracks_path = Path::new(&cli.tracks_path);
    let mut source = JsonLinesTrackSource::open(tracks_path)?;

    let video_id = cli.video_id.clone().unwrap_or_else(|| cli.tracks_path.clone());
    let settings = AnalysisSettings {
        vline: cli.vline,
        hline: cli.hline,
        confidence_threshold: cli.confidence_threshold,
        model: cli.model.clone(),
        video_id,
    };

    let report = run_analysis(&mut source, &settings, |_, _| {})?;
    let result_file = write_report(
        &report,
        Path::new(&cli.results_dir),
        &report_stem(&settings.video_id),
    )?;

    if cli.tether_disable {
        info!("Tether disabled; result not published");
    } else {
        match connect(
            &cli.agent_role,
            &cli.agent_group,
            &cli.tether_host.to_string(),
        )
        .and_then(|mut agent| AnalysisOutputs::new(&mut agent).map(|outputs| (agent, outputs)))
        {
            Ok((agent, outputs)) => publish_count_report(&agent, &outputs, &report),
            Err(e) => warn!("Tether unavailable; result not published: {e:#}"),
        }
    }

    println!();
    println!("{}", "=".repeat(40));
    println!("  Boxes counted: {}", report.box_count);
    println!(
        "  Processed {} frames in {}s",
        report.frames_processed, report.processing_time_seconds
    );
    println!("  Results saved: {}", result_file.display());
    println!("{}", "=".repeat(40));

    Ok(())
}
