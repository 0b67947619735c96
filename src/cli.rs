use clap::Parser;
use std::path::PathBuf;

/// Frame compositor benchmark: renders a synthetic timeline through the cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Canvas width in pixels
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 360)]
    pub height: u32,

    /// Timeline frame rate
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,

    /// Timeline duration in seconds
    #[arg(long, default_value_t = 6.0)]
    pub duration: f64,

    /// First time to render (seconds)
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub from: f64,

    /// Last time to render (seconds, default: end of timeline)
    #[arg(long, value_name = "SECONDS")]
    pub to: Option<f64>,

    /// Preload around this time before rendering
    #[arg(long = "preload-center", value_name = "SECONDS")]
    pub preload_center: Option<f64>,

    /// Compositor config (JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Size the cache byte budget from available memory (percent)
    #[arg(long = "mem", value_name = "PERCENT")]
    pub mem_percent: Option<f64>,

    /// Write the frame at --from as PNG
    #[arg(short = 'o', long = "output", value_name = "PNG")]
    pub output: Option<PathBuf>,

    /// Enable debug logging to file (default: strata.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    /// Render range end, clamped to the timeline.
    pub fn render_end(&self) -> f64 {
        self.to.unwrap_or(self.duration).min(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["strata"]);
        assert_eq!((args.width, args.height), (640, 360));
        assert_eq!(args.render_end(), 6.0);
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "strata", "--fps", "24", "--from", "1.5", "--to", "99", "--preload-center", "2", "-vv",
        ]);
        assert_eq!(args.fps, 24.0);
        assert_eq!(args.from, 1.5);
        assert_eq!(args.render_end(), 6.0);
        assert_eq!(args.preload_center, Some(2.0));
        assert_eq!(args.verbosity, 2);
    }
}
