use super::app_config::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "travelog-images",
    version,
    about = "Remote image loading and cache maintenance for the travel log",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Display scale (pixels per point).
    #[arg(long, global = true)]
    pub scale: Option<f32>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one image through the caches and report where it came from.
    Fetch {
        /// Image URL.
        url: String,

        #[command(flatten)]
        size: SizeArgs,

        /// Bypass both cache tiers.
        #[arg(long)]
        transient: bool,

        /// Write the downsampled bitmap as PNG.
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Warm the caches for a batch of URLs and wait for completion.
    Prefetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        size: SizeArgs,
    },
    /// Drop the memory and disk caches.
    Clear,
    /// Print the effective configuration.
    Config,
}

/// Target size in points.
#[derive(Debug, Clone, Copy, Args)]
pub struct SizeArgs {
    /// Target width in points.
    #[arg(long, default_value_t = 64.0)]
    pub width: f32,

    /// Target height in points.
    #[arg(long, default_value_t = 64.0)]
    pub height: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let args = CliArgs::parse_from([
            "travelog-images",
            "fetch",
            "https://example.com/a.jpg",
            "--width",
            "24",
            "--transient",
        ]);

        let Command::Fetch {
            url,
            size,
            transient,
            out,
        } = args.command
        else {
            panic!("expected fetch");
        };
        assert_eq!(url, "https://example.com/a.jpg");
        assert!((size.width - 24.0).abs() < f32::EPSILON);
        assert!((size.height - 64.0).abs() < f32::EPSILON);
        assert!(transient);
        assert!(out.is_none());
    }

    #[test]
    fn test_prefetch_requires_urls() {
        assert!(CliArgs::try_parse_from(["travelog-images", "prefetch"]).is_err());
    }
}
