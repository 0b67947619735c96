use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use strata::cli::Args;
use strata::config::{CompositorConfig, FrameCacheConfig};
use strata::core::Compositor;
use strata::synthetic::{CrossfadeEngine, SolidColorRenderer, demo_timeline};

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| "strata.log".into());
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("cannot create log file {}", log_path.display()))?;
        env_logger::Builder::new()
            .filter_level(log_level.max(log::LevelFilter::Debug))
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to {}", log_path.display());
    } else {
        // Console logging (respects RUST_LOG if set)
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<CompositorConfig> {
    let mut config = match &args.config {
        Some(path) => CompositorConfig::load(path)?,
        None => CompositorConfig::default(),
    };
    if let Some(percent) = args.mem_percent {
        let budget = FrameCacheConfig::from_system_memory(percent / 100.0, 2.0);
        config.cache.max_size_bytes = budget.max_size_bytes;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let config = load_config(&args)?;
    let timeline = demo_timeline(args.width, args.height, args.fps, args.duration);
    let duration = timeline.total_duration();
    let renderer = Arc::new(SolidColorRenderer::new());
    let compositor = Compositor::new(timeline, renderer.clone(), Arc::new(CrossfadeEngine), config)?;

    if let Some(center) = args.preload_center {
        let range = compositor.get_preload_range(center, duration, args.fps);
        info!(
            "Preloading [{:.3}, {:.3}]: {} frames missing",
            range.start_time,
            range.end_time,
            range.missing_frames.len()
        );
        let started = Instant::now();
        let outcome = compositor.preload_frames(center, duration, args.fps).wait();
        println!("preload:  {:?} in {:.1} ms", outcome, started.elapsed().as_secs_f64() * 1000.0);
    }

    let end = args.render_end();
    let frame_count = ((end - args.from) * args.fps).floor().max(0.0) as u64 + 1;
    let started = Instant::now();
    let mut failed = 0u64;
    for i in 0..frame_count {
        let t = args.from + i as f64 / args.fps;
        if compositor.render_frame(t).is_none() {
            failed += 1;
        }
    }
    let elapsed = started.elapsed();
    if failed > 0 {
        warn!("{} of {} frames failed", failed, frame_count);
    }

    let cache = compositor.cache_stats();
    let render = compositor.render_stats();
    println!(
        "rendered: {} frames in {:.1} ms ({:.1} fps), {} primitive calls",
        frame_count,
        elapsed.as_secs_f64() * 1000.0,
        frame_count as f64 / elapsed.as_secs_f64().max(1e-9),
        renderer.calls()
    );
    println!(
        "cache:    {} entries, {:.1} MB / {:.1} MB, hits {} misses {} ({:.1}%)",
        cache.entries,
        cache.size_bytes as f64 / 1024.0 / 1024.0,
        cache.max_size_bytes as f64 / 1024.0 / 1024.0,
        cache.hits,
        cache.misses,
        cache.hit_rate * 100.0
    );
    println!(
        "render:   {} composited, {} errors, avg {:.2} ms, last {:.2} ms",
        render.frames_rendered,
        render.render_errors,
        render.avg_render_time.as_secs_f64() * 1000.0,
        render.last_render_time.as_secs_f64() * 1000.0
    );

    if let Some(path) = &args.output {
        let frame = compositor
            .render_frame(args.from)
            .with_context(|| format!("render at {:.3}s failed", args.from))?;
        image::RgbaImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .context("frame buffer does not match its size")?
            .save(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("wrote:    {}", path.display());
    }

    Ok(())
}
