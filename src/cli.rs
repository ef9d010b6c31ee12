use clap::Parser;
use std::path::PathBuf;

use crate::quality::QualityTier;

#[derive(Parser, Debug)]
#[command(name = "scanzip")]
#[command(version)]
#[command(about = "Inspect and extract 3D scan archives, locally or over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  scanzip scan.zip -i                           manifest and content summary\n  \
  scanzip -v https://example.com/scan.zip       list a remote archive\n  \
  scanzip scan.zip -x 'meshes/*' -d out         extract matching entries into out\n  \
  scanzip scan.zip -p -x manifest.json          print the manifest")]
pub struct Cli {
    /// Archive path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Show the manifest and content summary
    #[arg(short = 'i')]
    pub info: bool,

    /// Extract entries matching the names or patterns that follow
    #[arg(short = 'x', value_name = "NAME", num_args = 1..)]
    pub extract: Vec<String>,

    /// Extract into DIR instead of the current directory
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Write extracted entries to stdout, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Overwrite existing files
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Print the resolved quality tier and budget for a request (auto, standard, high)
    #[arg(long, value_name = "TIER", num_args = 0..=1, default_missing_value = "auto")]
    pub tier: Option<QualityTier>,

    /// Hex key for obfuscated archives
    #[arg(long, value_name = "HEX")]
    pub key: Option<String>,

    /// Loader configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Enable debug logging
    #[arg(long)]
    pub verbose_log: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extract_and_tier_flags() {
        let cli = Cli::try_parse_from([
            "scanzip", "scan.zip", "--tier", "standard", "-x", "a.glb", "b/*", "-d", "out",
        ])
        .unwrap();
        assert_eq!(cli.tier, Some(QualityTier::Standard));
        assert_eq!(cli.extract, vec!["a.glb", "b/*"]);
        assert_eq!(cli.extract_dir, Some(PathBuf::from("out")));
        assert!(!cli.is_http_url());
    }

    #[test]
    fn bare_tier_flag_means_auto() {
        let cli = Cli::try_parse_from(["scanzip", "https://host/scan.zip", "--tier"]).unwrap();
        assert_eq!(cli.tier, Some(QualityTier::Auto));
        assert!(cli.is_http_url());
    }
}
