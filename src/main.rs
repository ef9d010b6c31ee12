//! Command-line front end for scan archives.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scanzip::quality::SystemProbe;
use scanzip::{
    ArchiveLoader, Cli, ContainerIndex, EntryDescriptor, HttpRangeReader, LoaderConfig,
    QualityTierResolver, Role,
};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging, opens the archive (local
/// file or HTTP URL) and dispatches to the requested modes.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose_log { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(&cli)?;

    if let Some(requested) = cli.tier {
        let resolver = QualityTierResolver::new(config.budgets);
        let tier = resolver.resolve_tier(requested, &SystemProbe);
        println!("tier: {tier} (requested {requested})");
        println!("budget: {} splats", resolver.budget_for(tier));
    }

    let loader = ArchiveLoader::new(config.clone());

    if cli.is_http_url() {
        let reader = Arc::new(
            HttpRangeReader::new(cli.file.clone(), config.http_timeout())?
                .with_fallback(config.range_fallback)
                .with_max_retries(config.max_retries),
        );
        loader
            .open_with(reader.clone(), &cli.file)
            .await
            .with_context(|| format!("cannot open {}", cli.file))?;

        process_archive(&loader, &cli).await?;

        if !cli.is_quiet() {
            eprintln!(
                "\nTotal bytes transferred: {} in {} requests",
                format_size(reader.transferred_bytes()),
                loader.requests()
            );
        }
    } else {
        loader
            .open_file(Path::new(&cli.file))
            .await
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_archive(&loader, &cli).await?;
    }

    Ok(())
}

/// Build the loader configuration.
///
/// Starts from `--config` (or the defaults), applies `SCANZIP_*` environment
/// overrides, then the `--key` flag.
///
/// # Arguments
///
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// Returns the configuration, or an error if the file or an override is invalid.
fn load_config(cli: &Cli) -> Result<LoaderConfig> {
    let config = match &cli.config {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(key) = &cli.key {
        config.archive_key = Some(key.clone());
    }
    Ok(config)
}

/// Process an opened archive according to the command-line options.
///
/// Modes can be combined:
/// - List mode (`-l` or `-v`): Display archive contents
/// - Info mode (`-i`): Summarize the manifest
/// - Extract mode (`-x`): Extract entries matching the given patterns
///
/// With no mode selected the short listing is printed.
///
/// # Arguments
///
/// * `loader` - Loader holding the opened archive
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if any mode fails.
async fn process_archive(loader: &ArchiveLoader, cli: &Cli) -> Result<()> {
    let index = loader.index()?;

    if cli.list || cli.verbose {
        list_entries(&index, cli.verbose);
    }
    if cli.info {
        print_info(loader).await?;
    }
    if !cli.extract.is_empty() {
        extract_matching(loader, &index, cli).await?;
    }
    if !(cli.list || cli.verbose || cli.info) && cli.extract.is_empty() && cli.tier.is_none() {
        list_entries(&index, false);
    }
    Ok(())
}

/// List entries in the archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just entry names, one per line
/// - Verbose format (`-v`): Table with sizes, compression ratio and timestamps
///
/// # Arguments
///
/// * `index` - Central directory index of the archive
/// * `verbose` - If true, display the detailed table
fn list_entries(index: &ContainerIndex, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in index.entries() {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name
        );
        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Space saved by compression, right-aligned for the verbose table.
///
/// # Arguments
///
/// * `compressed` - Stored size in bytes
/// * `uncompressed` - Original size in bytes
///
/// # Returns
///
/// Returns the saving as a percentage string, `0%` when nothing was saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Print the manifest summary: identity, content flags, role entries,
/// source files, annotations, alignment and the quality tier.
///
/// # Arguments
///
/// * `loader` - Loader holding the opened archive
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if the manifest cannot be read.
async fn print_info(loader: &ArchiveLoader) -> Result<()> {
    let manifest = loader.parse_manifest().await.context("cannot read manifest")?;
    let content = loader.content_info().await?;

    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    println!("Title:       {}", field(&manifest.title));
    println!("Description: {}", field(&manifest.description));
    println!("License:     {}", field(&manifest.license));
    println!("Version:     {}", field(&manifest.container_version));
    if !manifest.project.tags.is_empty() {
        println!("Tags:        {}", manifest.project.tags.join(", "));
    }

    println!("\nContent:");
    let flags = [
        ("splat", content.has_splat),
        ("scene proxy", content.has_scene_proxy),
        ("mesh", content.has_mesh),
        ("mesh proxy", content.has_mesh_proxy),
        ("point cloud", content.has_pointcloud),
        ("thumbnail", content.has_thumbnail),
        ("images", content.has_images),
        ("source files", content.has_source_files),
    ];
    for (label, present) in flags {
        println!("  {label:<13} {}", if present { "yes" } else { "no" });
    }

    println!("\nEntries:");
    for role in Role::ALL {
        for row in loader.entries_by_role(role).await? {
            println!("  {:<16} {}", row.key, row.entry.file_name);
        }
    }

    let sources = loader.source_files().await?;
    let annotations = loader.annotations().await?;
    println!("\nSource files: {}", sources.len());
    println!("Annotations:  {}", annotations.len());
    println!(
        "Alignment:    {}",
        if loader.alignment().await?.is_some() { "yes" } else { "no" }
    );
    println!(
        "Tier:         {} (budget {})",
        loader.current_tier(),
        loader.budget()
    );
    Ok(())
}

/// Extract every file entry matched by one of the `-x` patterns.
///
/// # Arguments
///
/// * `loader` - Loader holding the opened archive
/// * `index` - Central directory index of the archive
/// * `cli` - Parsed command-line arguments
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if nothing matches or an extraction fails.
async fn extract_matching(loader: &ArchiveLoader, index: &ContainerIndex, cli: &Cli) -> Result<()> {
    let selected: Vec<&EntryDescriptor> = index
        .entries()
        .iter()
        .filter(|e| !e.is_directory && cli.extract.iter().any(|p| matches_entry(p, &e.name)))
        .collect();
    if selected.is_empty() {
        bail!("no entries match {}", cli.extract.join(" "));
    }

    let show_names = cli.pipe && selected.len() > 1;
    for entry in selected {
        extract_entry(loader, entry, cli, show_names).await?;
    }
    Ok(())
}

/// Extract a single entry to disk or stdout.
///
/// Handles:
/// - Pipe mode (`-p`): Write the verified bytes to stdout
/// - Junk paths (`-j`): Drop directory components
/// - Overwrite control (`-o`): Skip existing files unless set
///
/// # Arguments
///
/// * `loader` - Loader holding the opened archive
/// * `entry` - The entry to extract
/// * `cli` - Parsed command-line arguments
/// * `show_name` - If true, print a name marker before the content (pipe mode with several entries)
///
/// # Returns
///
/// Returns `Ok(())` on success, or an error if extraction or writing fails.
async fn extract_entry(
    loader: &ArchiveLoader,
    entry: &EntryDescriptor,
    cli: &Cli,
    show_name: bool,
) -> Result<()> {
    if cli.pipe {
        let asset = loader.extract(&entry.name).await?;
        let mut stdout = tokio::io::stdout();
        if show_name {
            stdout
                .write_all(format!("--- {} ---\n", entry.name).as_bytes())
                .await?;
        }
        stdout.write_all(asset.bytes()).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let Some(output_path) = output_path(entry, cli) else {
        warn!(entry = %entry.name, "skipping entry with an unsafe path");
        return Ok(());
    };

    if output_path.exists() && !cli.overwrite {
        if !cli.is_very_quiet() {
            eprintln!("Skipping: {} (use -o to overwrite)", entry.name);
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.name);
    }

    let asset = loader
        .extract(&entry.name)
        .await
        .with_context(|| format!("cannot extract {}", entry.name))?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&output_path, asset.bytes())
        .await
        .with_context(|| format!("cannot write {}", output_path.display()))?;
    Ok(())
}

/// Destination for an entry, or `None` when the name escapes the target directory.
fn output_path(entry: &EntryDescriptor, cli: &Cli) -> Option<PathBuf> {
    let name = Path::new(&entry.name);
    if name
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let relative = if cli.junk_paths {
        PathBuf::from(name.file_name()?)
    } else {
        name.to_path_buf()
    };
    Some(match &cli.extract_dir {
        Some(dir) => dir.join(relative),
        None => relative,
    })
}

/// Check whether an entry is selected by an extraction pattern.
///
/// Glob patterns match the full name; plain patterns match the full name or
/// the base name.
///
/// # Arguments
///
/// * `pattern` - Pattern given on the command line
/// * `name` - Entry name inside the archive
///
/// # Returns
///
/// Returns `true` if the entry is selected.
fn matches_entry(pattern: &str, name: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, name);
    }
    let basename = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    name == pattern || basename == pattern
}

/// Check if a pattern contains glob wildcard characters.
///
/// # Arguments
///
/// * `pattern` - The pattern to check
///
/// # Returns
///
/// Returns `true` if the pattern contains `*` or `?` wildcards.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Match text against a simple glob pattern.
///
/// `*` matches any run of characters, `?` exactly one.
///
/// # Arguments
///
/// * `pattern` - Glob pattern
/// * `text` - Text to match against the pattern
///
/// # Returns
///
/// Returns `true` if the text matches the pattern, `false` otherwise.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p == t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    do_match(&pattern, &text)
}

/// Format a byte count with a binary unit.
///
/// # Arguments
///
/// * `size` - Size in bytes
///
/// # Returns
///
/// Returns a string such as `512 bytes` or `1.50 KB`.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*.glb", "mesh_0.glb"));
        assert!(glob_match("sources/*", "sources/raw/img_01.jpg"));
        assert!(glob_match("scene?.ply", "scene1.ply"));
        assert!(!glob_match("*.glb", "scene.ply"));
    }

    #[test]
    fn exact_names_match_basename() {
        assert!(matches_entry("thumb.jpg", "previews/thumb.jpg"));
        assert!(!matches_entry("thumb", "previews/thumb.jpg"));
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }
}
