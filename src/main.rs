use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use liquid_metal_icons::gpu::{FramePacer, MetallicRenderer, Tick};
use liquid_metal_icons::raster::default_fetcher;
use liquid_metal_icons::state::{DeviceProfile, IconKind};
use liquid_metal_icons::{IconPipeline, PipelineConfig, Priority, ProcessedIcon, ShaderParams, Theme};

/// File types picked up by folder preloads
const ICON_EXTENSIONS: [&str; 5] = ["svg", "png", "jpg", "jpeg", "webp"];

#[derive(Parser, Debug)]
#[command(name = "metal-icons", version, about = "Process icons and render them as liquid metal")]
struct Cli {
    /// JSON pipeline config; missing fields use the detected device profile
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force the constrained-device profile
    #[arg(long, global = true)]
    low_end: bool,

    /// Directory icon sources are resolved against
    #[arg(long, global = true, default_value = ".")]
    assets: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one icon and report the result
    Process {
        source: String,
        #[arg(long, value_enum, default_value_t = Mode::Logo)]
        mode: Mode,
        /// Metallic size; defaults to the device size
        #[arg(long)]
        size: Option<u32>,
    },
    /// Queue every icon below a folder and wait for the queue to drain
    Preload {
        dir: PathBuf,
        #[arg(long, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    /// Write the distance-field PNG of an icon
    Export {
        source: String,
        /// Output directory; defaults to the user cache directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render animation frames offscreen and save the last one
    Render {
        source: String,
        #[arg(long, value_enum, default_value_t = Mode::Metallic)]
        mode: Mode,
        #[arg(long, value_enum, default_value_t = ThemeArg::Dark)]
        theme: ThemeArg,
        #[arg(long, default_value_t = 30)]
        frames: u32,
        #[arg(long, default_value_t = 1.0)]
        device_pixel_ratio: f32,
        #[arg(long, default_value = "frame.png")]
        out: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Logo,
    Metallic,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ThemeArg {
    Light,
    Dark,
}

impl From<ThemeArg> for Theme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("liquid_metal_icons=info,metal_icons=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let pipeline = IconPipeline::new(config, default_fetcher(cli.assets.clone()));

    let result = match cli.command {
        Command::Process { source, mode, size } => process(&pipeline, &source, mode, size).await,
        Command::Preload { dir, priority } => preload(&pipeline, &dir, priority).await,
        Command::Export { source, out } => export(&pipeline, &source, out).await,
        Command::Render {
            source,
            mode,
            theme,
            frames,
            device_pixel_ratio,
            out,
        } => render(&pipeline, &source, mode, theme.into(), frames, device_pixel_ratio, &out).await,
    };

    pipeline.shutdown();
    result
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if cli.low_end && !config.profile.low_end {
        tracing::info!("forcing the low-end profile");
        let profile = DeviceProfile {
            low_end: true,
            ..config.profile
        };
        return Ok(PipelineConfig::for_profile(profile));
    }

    Ok(config)
}

async fn process_icon(
    pipeline: &Arc<IconPipeline>,
    source: &str,
    mode: Mode,
    size: Option<u32>,
) -> anyhow::Result<Arc<ProcessedIcon>> {
    let icon = match mode {
        Mode::Logo => pipeline.process_for_distance_field(source).await,
        Mode::Metallic => pipeline.process_for_metallic(source, size).await,
    };
    icon.with_context(|| format!("Failed to process {}", source))
}

async fn process(
    pipeline: &Arc<IconPipeline>,
    source: &str,
    mode: Mode,
    size: Option<u32>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let icon = process_icon(pipeline, source, mode, size).await?;
    let first = start.elapsed();

    // Second request is served from the cache
    let start = Instant::now();
    process_icon(pipeline, source, mode, size).await?;
    let cached = start.elapsed();

    let kind = match icon.kind {
        IconKind::DistanceField => "distance field",
        IconKind::AlphaMask => "alpha mask",
    };
    println!(
        "{}: {} {}x{} in {:.1?} (cached: {:.1?})",
        source, kind, icon.width, icon.height, first, cached
    );
    Ok(())
}

/// Icon files below `dir`, as source strings
fn collect_icons(dir: &Path) -> Vec<String> {
    let mut sources = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if let Some(extension) = path.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            if ICON_EXTENSIONS.contains(&ext.as_str()) {
                sources.push(path.to_string_lossy().into_owned());
            }
        }
    }

    sources.sort();
    sources
}

async fn preload(pipeline: &Arc<IconPipeline>, dir: &Path, priority: Priority) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    // Absolute paths, so sources don't resolve against the asset root
    let dir = std::fs::canonicalize(dir)
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let sources = collect_icons(&dir);
    println!("Queueing {} icons at {} priority", sources.len(), priority);

    let start = Instant::now();
    pipeline.preload(sources.iter().cloned(), priority);

    loop {
        let stats = pipeline.stats();
        if stats.queued == 0 && stats.preloading == 0 && stats.in_flight == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = pipeline.stats();
    println!(
        "Preloaded in {:.1?}: {} cached of {} found (cache holds {})",
        start.elapsed(),
        sources.iter().filter(|s| pipeline.cached(s).is_some()).count(),
        sources.len(),
        stats.cached
    );
    Ok(())
}

async fn export(pipeline: &Arc<IconPipeline>, source: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
    let icon = process_icon(pipeline, source, Mode::Logo, None).await?;
    let png = icon
        .png
        .as_ref()
        .context("Distance field has no encoded PNG")?;

    let dir = match out {
        Some(dir) => dir,
        None => dirs_next::cache_dir()
            .context("No cache directory on this system, pass --out")?
            .join("liquid-metal-icons"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "icon".to_string());
    let path = dir.join(format!("{}.png", stem));
    std::fs::write(&path, png).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Wrote {} ({}x{})", path.display(), icon.width, icon.height);
    Ok(())
}

async fn render(
    pipeline: &Arc<IconPipeline>,
    source: &str,
    mode: Mode,
    theme: Theme,
    frames: u32,
    device_pixel_ratio: f32,
    out: &Path,
) -> anyhow::Result<()> {
    let icon = process_icon(pipeline, source, mode, None).await?;
    let settings = pipeline.config().render;
    let params = match mode {
        Mode::Logo => ShaderParams::skill_icon(theme),
        Mode::Metallic => ShaderParams::small_icon(),
    };

    let mut renderer = MetallicRenderer::acquire(&settings, params).await?;
    renderer.link().await?;
    renderer.set_icon(icon)?;
    let size = renderer.resize(settings.base_size, device_pixel_ratio)?;

    // Synthetic display refresh driving the pacer
    let mut pacer = FramePacer::new(&settings, params.speed);
    let refresh = Duration::from_secs_f32(1.0 / settings.refresh_hz.max(1.0));
    let mut at = Duration::ZERO;
    let mut drawn = 0;
    while drawn < frames.max(1) {
        at += refresh;
        if let Tick::Render { time_ms } = pacer.tick(at) {
            renderer.draw(time_ms)?;
            drawn += 1;
        }
    }

    let frame = renderer.read_frame()?;
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels)
        .context("Frame buffer does not match its dimensions")?;
    image
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!(
        "Rendered {} frames at {}x{} ({:.0} ms of animation), saved {}",
        drawn,
        size,
        size,
        pacer.time_ms(),
        out.display()
    );
    renderer.release();
    Ok(())
}
