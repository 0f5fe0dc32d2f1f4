use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tessgeoid::core::{AggregationControl, BatchProgress};
use tessgeoid::{CorrectionConfig, CorrectionMode, GeoidCorrector, GeoidGrids, GridReader, GridWriter};

#[derive(Parser)]
#[command(name = "tessgeoid", about = "Tesseroid geoid corrections for gridded geoid heights")]
struct Cli {
    /// Correction mode: topographic, crustal, sedimentary, combined or residual
    #[arg(short = 'm', long)]
    mode: CorrectionMode,

    /// Geoid height grid (XYZ text, .gz, or GeoTIFF with the geotiff feature)
    #[arg(short = 'g', long)]
    geoid: PathBuf,

    /// Elevation grid in meters, on the geoid lattice
    #[arg(long)]
    elevation: Option<PathBuf>,

    /// Crustal thickness grid (meters or kilometres), on the geoid lattice
    #[arg(long)]
    crust: Option<PathBuf>,

    /// Sediment thickness grid (meters or kilometres), on the geoid lattice
    #[arg(long)]
    sediment: Option<PathBuf>,

    /// JSON configuration; missing fields take their defaults
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Output CSV with one column per result grid
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Also write every result grid as GeoTIFF into this directory
    #[arg(long)]
    geotiff_dir: Option<PathBuf>,

    /// Number of Rayon worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Input value to treat as missing
    #[arg(long)]
    nodata: Option<f64>,

    /// Write the effective configuration as JSON and continue
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Report per-batch progress
    #[arg(long)]
    progress: bool,
}

fn load_grids(cli: &Cli) -> Result<GeoidGrids> {
    let reader = GridReader::new().with_nodata(cli.nodata);

    let geoid = reader
        .read(&cli.geoid)
        .with_context(|| format!("failed to read geoid grid {}", cli.geoid.display()))?;
    let axes = geoid.axes;
    let mut grids = GeoidGrids::new(axes.clone(), geoid.values);

    let aux = |path: &Option<PathBuf>, what: &str| -> Result<Option<ndarray::Array2<f64>>> {
        match path {
            Some(p) => reader
                .read_on_axes(p, &axes)
                .map(Some)
                .with_context(|| format!("failed to read {} grid {}", what, p.display())),
            None => Ok(None),
        }
    };
    grids.elevation = aux(&cli.elevation, "elevation")?;
    grids.crustal_thickness = aux(&cli.crust, "crustal thickness")?;
    grids.sediment_thickness = aux(&cli.sediment, "sediment thickness")?;

    Ok(grids)
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => CorrectionConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CorrectionConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    if let Some(path) = &cli.write_config {
        config
            .to_json_file(path)
            .with_context(|| format!("failed to write config {}", path.display()))?;
        log::info!("Configuration written to {}", path.display());
    }

    let grids = load_grids(cli)?;
    let corrector = GeoidCorrector::new(config);

    let report = |p: BatchProgress| {
        log::info!(
            "[{:.1}s] batch {}/{} ({}/{} observations)",
            p.elapsed.as_secs_f64(),
            p.batch,
            p.n_batches,
            p.completed,
            p.total
        );
    };
    let mut control = AggregationControl::default();
    if cli.progress {
        control = control.with_progress(&report);
    }

    let result = corrector
        .compute_with(cli.mode, &grids, &control)
        .with_context(|| format!("{} correction failed", cli.mode))?;

    for (name, stats) in result.summary() {
        log::info!("{}: {}", name, stats);
    }

    GridWriter::write_result_csv(&cli.output, &result)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    if let Some(dir) = &cli.geotiff_dir {
        write_geotiffs(dir, &result)?;
    }

    log::info!(
        "Done: {} sources, {:.2?}, output {}",
        result.total_sources(),
        result.elapsed,
        cli.output.display()
    );
    Ok(())
}

#[cfg(feature = "geotiff")]
fn write_geotiffs(dir: &std::path::Path, result: &tessgeoid::CorrectionResult) -> Result<()> {
    let written = GridWriter::write_result_geotiffs(dir, result)
        .with_context(|| format!("failed to write GeoTIFFs to {}", dir.display()))?;
    log::info!("Wrote {} GeoTIFF grids to {}", written.len(), dir.display());
    Ok(())
}

#[cfg(not(feature = "geotiff"))]
fn write_geotiffs(_dir: &std::path::Path, _result: &tessgeoid::CorrectionResult) -> Result<()> {
    bail!("--geotiff-dir requires building with the `geotiff` feature");
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.threads == Some(0) {
        bail!("--threads must be at least 1");
    }

    match cli.threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .context("failed to build thread pool")?;
            pool.install(|| run(&cli))
        }
        None => run(&cli),
    }
}
