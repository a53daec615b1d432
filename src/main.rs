mod chart;
mod cluster;
mod creative;
mod export;
mod llm;
mod persona;
mod reaction;
mod settings;
mod sprint;

use std::{fs, path::Path, process::exit};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use creative::{CreativeExtractor, UploadedFile};
use llm::ServiceClient;
use settings::{Args, Command, Settings};
use sprint::{Sprint, SprintOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(ret) => ret,
        Err(error) => {
            eprintln!("Problem while loading settings. {error}");
            exit(1);
        }
    };

    let result = match args.command {
        Command::Segments { personas } => list_segments(&personas),
        Command::Run {
            personas,
            creative,
            segment,
            output,
        } => {
            let output = output.unwrap_or_else(|| settings.output.directory.clone());
            run_sprint(&settings, &personas, &creative, &segment, &output).await
        }
    };

    if let Err(error) = result {
        eprintln!("Error: {error:#}");
        exit(1);
    }
}

fn list_segments(personas: &Path) -> Result<()> {
    let groups = persona::load_personas(personas)
        .with_context(|| format!("cannot load personas from {}", personas.display()))?;
    for segment in persona::segment_options(&groups) {
        println!("{segment}");
    }
    Ok(())
}

async fn run_sprint(
    settings: &Settings,
    personas: &Path,
    creative: &Path,
    segment: &str,
    output: &Path,
) -> Result<()> {
    let groups = persona::load_personas(personas)
        .with_context(|| format!("cannot load personas from {}", personas.display()))?;
    let file = UploadedFile::open(creative)
        .with_context(|| format!("cannot read creative {}", creative.display()))?;
    let client = ServiceClient::from_settings(settings)?;

    let progress = |fraction: f64, label: &str| {
        info!("{label} ({:.0}%)", fraction * 100.0);
    };
    let mut sprint = Sprint::new(
        &client,
        &client,
        CreativeExtractor::default(),
        SprintOptions::from(&settings.sprint),
    );
    let report = sprint.run(&file, segment, &groups, Some(&progress)).await?;
    println!("{}", report.summary);

    let dir = output.join(Utc::now().format("sprint-%Y%m%dT%H%M%S").to_string());
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let workbook = dir.join(&settings.output.workbook);
    export::write_workbook(&workbook, &report.responses, &report.clusters)?;
    info!("Wrote {}", workbook.display());

    let chart = dir.join(&settings.output.chart);
    fs::write(&chart, report.chart.to_svg())
        .with_context(|| format!("failed to write {}", chart.display()))?;
    info!("Wrote {}", chart.display());

    Ok(())
}
