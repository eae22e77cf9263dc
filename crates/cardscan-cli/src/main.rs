//! cardscan CLI: identify trading cards in photos and build reference databases.

use anyhow::{Context, Result};
use bumpalo::Bump;
use cardscan_core::database::{Catalog, DatabaseBuilder, DatabaseFile, DatabaseStats, index_images};
use cardscan_core::fingerprint::{self, FingerprintSet};
use cardscan_core::normalize::{normalize, normalize_full_frame};
use cardscan_core::quad::locate_card;
use cardscan_core::{
    CanonicalImage, Candidate, Frame, FullIdentification, MatchResult, Pipeline, PipelineConfig,
    PipelineStats, Price, Quadrilateral, ReferenceDatabase,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cardscan")]
#[command(about = "Identify trading cards in photos and look up their market prices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the card in an image.
    Identify(IdentifyArgs),

    /// Build a reference database from a catalog and a directory of scans.
    Build(BuildArgs),

    /// Print the fingerprints of an image.
    Hash(HashArgs),

    /// Print reference database statistics.
    DbInfo {
        /// Path to the database JSON.
        #[arg(long)]
        db: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct IdentifyArgs {
    /// Path to the reference database JSON.
    #[arg(long)]
    db: PathBuf,

    /// Path to the input image.
    #[arg(long)]
    image: PathBuf,

    /// Pipeline configuration JSON (fields not given keep their defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Treat the image as a clean scan filling the whole frame.
    #[arg(long)]
    scan: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Write the frame with the detected card outline.
    #[arg(long)]
    debug_image: Option<PathBuf>,

    /// Write the warped canonical card image.
    #[arg(long)]
    canonical: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BuildArgs {
    /// Card catalog JSON (set info, identities, metadata, prices).
    #[arg(long)]
    catalog: PathBuf,

    /// Directory of reference scans named `<prefix>_<number>.<ext>`.
    #[arg(long)]
    images: PathBuf,

    /// Output database path; a `.min.json` sibling is written too.
    #[arg(long)]
    out: PathBuf,

    /// Pipeline configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct HashArgs {
    /// Path to the input image.
    #[arg(long)]
    image: PathBuf,

    /// Treat the image as a clean scan filling the whole frame.
    #[arg(long)]
    scan: bool,

    /// Pipeline configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Identify(args) => run_identify(&args),
        Commands::Build(args) => run_build(&args),
        Commands::Hash(args) => run_hash(&args),
        Commands::DbInfo { db } => run_db_info(&db),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    PipelineConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

fn load_frame(path: &Path) -> Result<Frame> {
    let rgb = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    let (w, h) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), w as usize, h as usize, 3)?)
}

// ── identify ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct IdentifyReport<'a> {
    image: String,
    result: &'a MatchResult,
    quad: Option<&'a Quadrilateral>,
    candidates: &'a [Candidate],
    fingerprints: Vec<String>,
    stats: &'a PipelineStats,
}

fn run_identify(args: &IdentifyArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let database = ReferenceDatabase::load(&args.db)?;
    tracing::info!(
        "Loaded {} reference cards from {} ({})",
        database.len(),
        args.db.display(),
        database.set_info().name
    );
    let pipeline = Pipeline::new(config, Arc::new(database))?;

    tracing::info!("Loading image: {}", args.image.display());
    let frame = load_frame(&args.image)?;
    tracing::info!("Image size: {}x{}", frame.width(), frame.height());

    let full = if args.scan {
        pipeline.identify_scan(&frame)?
    } else {
        pipeline.identify_full(&frame, None)?
    };
    tracing::info!(
        "Pipeline: {:.1} ms (localize {:.1}, normalize {:.1}, fingerprint {:.1}, match {:.1})",
        full.stats.total_ms,
        full.stats.localize_ms,
        full.stats.normalize_ms,
        full.stats.fingerprint_ms,
        full.stats.match_ms,
    );

    if let Some(path) = &args.debug_image {
        write_debug_image(&frame, full.quad.as_ref(), path)?;
        tracing::info!("Debug image written to {}", path.display());
    }
    if let Some(path) = &args.canonical {
        match &full.canonical {
            Some(canonical) => {
                save_canonical(canonical, path)?;
                tracing::info!("Canonical card written to {}", path.display());
            }
            None => tracing::warn!("no card located; {} not written", path.display()),
        }
    }

    if args.json {
        let report = IdentifyReport {
            image: args.image.display().to_string(),
            result: &full.result,
            quad: full.quad.as_ref(),
            candidates: &full.candidates,
            fingerprints: fingerprint_lines(full.fingerprints.first()),
            stats: &full.stats,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_result(&full);
    }
    Ok(())
}

fn print_result(full: &FullIdentification) {
    let result = &full.result;
    match &result.card {
        None if full.quad.is_none() => println!("No card detected"),
        None => {
            println!("No match");
            if let Some(best) = full.candidates.first() {
                println!(
                    "  closest:     {} ({}) at distance {:.2}",
                    best.name, best.id, best.distance
                );
            }
        }
        Some(card) => {
            println!("Card:         {} ({})", card.metadata.name, card.id);
            if let Some(rarity) = &card.metadata.rarity {
                println!("Rarity:       {rarity}");
            }
            println!("Quality:      {:?}", result.quality);
            println!("Distance:     {:.2}", result.distance.unwrap_or(f64::NAN));
            println!("Confidence:   {:.3}", result.confidence);
            match &result.price {
                Price::Unavailable => println!("Price:        unavailable"),
                Price::Available(p) => {
                    let fmt = |v: Option<f64>, unit: &str| {
                        v.map_or("n/a".to_owned(), |v| format!("{unit}{v:.2}"))
                    };
                    println!(
                        "Price:        TCGplayer {}, Cardmarket {}{}",
                        fmt(p.tcgplayer, "$"),
                        fmt(p.cardmarket, "€"),
                        p.updated_at
                            .as_ref()
                            .map_or(String::new(), |d| format!(" (as of {d})")),
                    );
                }
            }
        }
    }

    if full.candidates.len() > 1 {
        println!("Candidates:");
        for (i, c) in full.candidates.iter().enumerate() {
            println!(
                "  {}. {} ({})  distance {:.2}  confidence {:.3}",
                i + 1,
                c.name,
                c.id,
                c.distance,
                c.confidence
            );
        }
    }
}

fn fingerprint_lines(set: Option<&FingerprintSet>) -> Vec<String> {
    set.map(|s| s.fingerprints.iter().map(ToString::to_string).collect())
        .unwrap_or_default()
}

fn write_debug_image(frame: &Frame, quad: Option<&Quadrilateral>, path: &Path) -> Result<()> {
    use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

    let data: Vec<u8> = (0..frame.height())
        .flat_map(|y| (0..frame.width()).map(move |x| (x, y)))
        .flat_map(|(x, y)| frame.rgb(x, y))
        .collect();
    let mut canvas = image::RgbImage::from_raw(frame.width() as u32, frame.height() as u32, data)
        .context("frame buffer does not match its dimensions")?;

    if let Some(quad) = quad {
        let green = image::Rgb([0u8, 255, 0]);
        let c = quad.corners;
        for i in 0..4 {
            let (a, b) = (c[i], c[(i + 1) % 4]);
            let (start, end) = ((a.x as f32, a.y as f32), (b.x as f32, b.y as f32));
            draw_line_segment_mut(&mut canvas, start, end, green);
        }
        // Top-left corner in red.
        let corner = (c[0].x.round() as i32, c[0].y.round() as i32);
        draw_filled_circle_mut(&mut canvas, corner, 4, image::Rgb([255u8, 0, 0]));
    }

    canvas
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn save_canonical(canonical: &CanonicalImage, path: &Path) -> Result<()> {
    image::RgbImage::from_raw(
        canonical.width() as u32,
        canonical.height() as u32,
        canonical.data().to_vec(),
    )
    .context("canonical buffer does not match its dimensions")?
    .save(path)
    .with_context(|| format!("failed to write {}", path.display()))
}

// ── build ──────────────────────────────────────────────────────────────

fn run_build(args: &BuildArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let catalog = Catalog::load(&args.catalog)?;
    tracing::info!(
        "Catalog {} ({}): {} cards",
        catalog.set_info.name,
        catalog.set_info.set_code,
        catalog.cards.len()
    );

    let images = index_images(&args.images)?;
    tracing::info!("Found {} reference images in {}", images.len(), args.images.display());

    let file = DatabaseBuilder::new(config).build(&catalog, &images, load_frame);
    let minified = file.write(&args.out)?;
    tracing::info!("Database written to {} and {}", args.out.display(), minified.display());

    log_stats(&file.stats());
    Ok(())
}

fn log_stats(stats: &DatabaseStats) {
    tracing::info!("Total cards:          {}", stats.total_cards);
    tracing::info!("With fingerprints:    {}", stats.with_fingerprints);
    tracing::info!("With image URLs:      {}", stats.with_image_urls);
    tracing::info!("With prices:          {}", stats.with_prices);
    if stats.missing_fingerprints() > 0 {
        tracing::warn!(
            "{} cards have no fingerprint and cannot be matched",
            stats.missing_fingerprints()
        );
    }
    if stats.missing_prices() > 0 {
        tracing::info!("{} cards have no price", stats.missing_prices());
    }
}

// ── hash ───────────────────────────────────────────────────────────────

fn run_hash(args: &HashArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let frame = load_frame(&args.image)?;

    let canonical = if args.scan {
        normalize_full_frame(&frame, &config)?
    } else {
        let quad = locate(&frame, &config)?;
        normalize(&frame, &quad, &config)?
    };

    let set = fingerprint::compute_set(&canonical, &config.fingerprint);
    for line in fingerprint_lines(Some(&set)) {
        println!("{line}");
    }
    Ok(())
}

fn locate(frame: &Frame, config: &PipelineConfig) -> Result<Quadrilateral> {
    let arena = Bump::new();
    let (quad, stats) = locate_card(&arena, frame, config);
    tracing::debug!(?stats, "localization");
    quad.context("no card detected; pass --scan for full-frame scans")
}

// ── db-info ────────────────────────────────────────────────────────────

fn run_db_info(path: &Path) -> Result<()> {
    let file = DatabaseFile::load(path)?;
    let stats = file.stats();

    println!("cardscan reference database");
    println!("  set:                {} ({})", file.set_info.name, file.set_info.set_code);
    if let Some(series) = &file.set_info.series {
        println!("  series:             {series}");
    }
    println!("  cards:              {}", stats.total_cards);
    println!("  with fingerprints:  {}", stats.with_fingerprints);
    println!("  with image URLs:    {}", stats.with_image_urls);
    println!("  with prices:        {}", stats.with_prices);
    println!(
        "  missing:            {} fingerprints, {} image URLs, {} prices",
        stats.missing_fingerprints(),
        stats.missing_image_urls(),
        stats.missing_prices()
    );

    match ReferenceDatabase::from_file(file) {
        Ok(db) => println!(
            "  loadable entries:   {} ({}-bit fingerprints)",
            db.len(),
            db.hash_size() * db.hash_size()
        ),
        Err(e) => println!("  not loadable:       {e}"),
    }
    Ok(())
}
