use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use scrollsnap::capture::CancelToken;
use scrollsnap::session::run_session;
use scrollsnap::{SessionConfig, ViewportSpec, WaitStrategy};

/// Scroll-and-snap webpage to tiles, optionally stitch into one long image.
#[derive(Parser, Debug)]
#[command(name = "scrollsnap")]
#[command(about = "Capture tall web pages as viewport tiles, optionally stitched into one long image")]
struct Args {
    /// One or more webpage URLs
    #[arg(required = true)]
    urls: Vec<String>,

    /// Output directory
    #[arg(long, default_value = "out")]
    out: PathBuf,

    /// Stitch all tiles into one long image
    #[arg(long)]
    stitch: bool,

    /// Viewport width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height (tile height baseline)
    #[arg(long, default_value_t = 1000)]
    height: u32,

    /// CSS zoom applied to the page, e.g. 1.0 / 2.0
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Settle strategy: "networkidle", or a fixed delay such as "350ms" or "2s"
    #[arg(long, default_value = "networkidle")]
    wait: String,

    /// Overlap pixels between tiles to avoid gaps
    #[arg(long, default_value_t = 80)]
    tile_overlap: u32,

    /// Pixels to crop from the top of tiles 2..N when stitching
    #[arg(long, default_value_t = 0)]
    sticky_top: u32,

    /// Pixels to crop from the bottom of middle tiles when stitching
    #[arg(long, default_value_t = 0)]
    sticky_bottom: u32,

    /// Max page height to capture in pixels (0 = uncapped)
    #[arg(long, default_value_t = 50_000)]
    cap_height: u32,

    /// Hard limit on tiles per page
    #[arg(long, default_value_t = 150)]
    max_tiles: u32,

    /// Path to cookies.json (exported format)
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Chromium user data dir for persistent login
    #[arg(long)]
    user_data_dir: Option<PathBuf>,

    /// Emulate a mobile-like viewport/touch UA
    #[arg(long)]
    mobile: bool,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Pages captured concurrently (each gets its own browser)
    #[arg(long, default_value_t = 1)]
    jobs: usize,
}

/// Parse the --wait flag: "networkidle", "<n>ms", "<n>s", or bare milliseconds
fn parse_wait(raw: &str) -> Result<WaitStrategy> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("networkidle") {
        return Ok(WaitStrategy::NetworkIdle);
    }
    if let Some(ms) = raw.strip_suffix("ms") {
        let ms: u64 = ms
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid wait duration: {}", raw))?;
        return Ok(WaitStrategy::FixedDelay(ms));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        let secs: u64 = secs
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid wait duration: {}", raw))?;
        return Ok(WaitStrategy::FixedDelay(secs * 1000));
    }
    if let Ok(ms) = raw.parse::<u64>() {
        return Ok(WaitStrategy::FixedDelay(ms));
    }
    Err(anyhow::anyhow!(
        "Invalid wait strategy: {} (expected \"networkidle\", \"<n>ms\", or \"<n>s\")",
        raw
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = SessionConfig {
        viewport: ViewportSpec {
            width: args.width,
            height: args.height,
            scale: args.scale,
            mobile: args.mobile,
        },
        wait: parse_wait(&args.wait)?,
        tile_overlap: args.tile_overlap,
        cap_height: (args.cap_height > 0).then_some(args.cap_height),
        max_tiles: args.max_tiles,
        sticky_top: args.sticky_top,
        sticky_bottom: args.sticky_bottom,
        stitch: args.stitch,
        headless: !args.headed,
        cookies: args.cookies,
        user_data_dir: args.user_data_dir,
        user_agent: None,
        nav_timeout_ms: 30_000,
    };
    // Surface bad geometry before any browser launches
    config.validate()?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received; stopping at the next tile boundary");
                cancel.cancel();
            }
        });
    }

    let jobs = args.jobs.clamp(1, num_cpus::get());
    let summary = run_session(config, args.urls, args.out, jobs, cancel).await?;

    println!();
    for report in &summary.reports {
        match (&report.failed_stage, report.cancelled) {
            (Some(stage), _) => println!(
                "✗ {} failed during {} after {} tiles: {}",
                report.url,
                stage,
                report.tiles,
                report.error.as_deref().unwrap_or("unknown error")
            ),
            (None, true) => println!("- {} cancelled after {} tiles", report.url, report.tiles),
            (None, false) => println!("✓ {} ({} tiles)", report.url, report.tiles),
        }
    }
    println!();
    println!("Done. Output at: {}", summary.session_dir.display());

    if !summary.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}
