//! Command line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vhdup_page_blob::PAGE_ALIGNMENT;
use vhdup_transfer::IndexRange;

#[derive(Parser, Debug)]
#[command(name = "vhdup", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a local disk image as a page blob.
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Disk image to upload.
    #[arg(long, value_name = "PATH")]
    pub local_vhd_path: PathBuf,

    /// Directory backing the page blob store.
    #[arg(long, value_name = "DIR")]
    pub store_root: PathBuf,

    /// Destination blob; `.vhd` is appended when missing.
    #[arg(long, value_name = "NAME")]
    pub blob_name: String,

    /// Destination container (defaults to the configured one).
    #[arg(long, value_name = "NAME")]
    pub container: Option<String>,

    /// Concurrent range writes (defaults to 8 per CPU).
    #[arg(long, value_name = "N")]
    pub parallelism: Option<usize>,

    /// Replace the blob if it already exists.
    #[arg(long)]
    pub overwrite: bool,

    /// Byte range to leave out, inclusive and 512-byte aligned. Repeatable.
    #[arg(long = "skip", value_name = "START-END", value_parser = parse_skip_range)]
    pub skip: Vec<IndexRange>,

    /// Upload all-zero ranges instead of skipping them.
    #[arg(long)]
    pub no_detect_empty: bool,

    /// Configuration file (defaults to the platform config directory).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parses `START-END` into an inclusive range covering whole pages.
pub fn parse_skip_range(s: &str) -> Result<IndexRange, String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got {s:?}"))?;
    let start: u64 = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid start {start:?}: {e}"))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid end {end:?}: {e}"))?;

    if start % PAGE_ALIGNMENT != 0 || end.checked_add(1).is_none_or(|e| e % PAGE_ALIGNMENT != 0) {
        return Err(format!(
            "skip range {s} must start and end on {PAGE_ALIGNMENT}-byte boundaries"
        ));
    }
    IndexRange::new(start, end).map_err(|e| e.to_string())
}

/// Appends `.vhd` unless the name already ends with it (any case).
pub fn normalize_blob_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".vhd") {
        name.to_string()
    } else {
        format!("{name}.vhd")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_upload_command() {
        let cli = Cli::try_parse_from([
            "vhdup",
            "upload",
            "--local-vhd-path",
            "/tmp/disk.vhd",
            "--store-root",
            "/tmp/store",
            "--blob-name",
            "disk",
            "--skip",
            "0-511",
            "--skip",
            "1024-2047",
            "--parallelism",
            "4",
        ])
        .unwrap();

        let Command::Upload(args) = cli.command;
        assert_eq!(args.blob_name, "disk");
        assert_eq!(args.parallelism, Some(4));
        assert!(args.container.is_none());
        assert!(!args.overwrite);
        assert_eq!(
            args.skip,
            vec![
                IndexRange::new(0, 511).unwrap(),
                IndexRange::new(1024, 2047).unwrap()
            ]
        );
    }

    #[test]
    fn missing_required_argument() {
        let err = Cli::try_parse_from(["vhdup", "upload", "--blob-name", "disk"]);
        assert!(err.is_err());
    }

    #[test]
    fn skip_range_validation() {
        assert_eq!(
            parse_skip_range("512-1023").unwrap(),
            IndexRange::new(512, 1023).unwrap()
        );
        assert!(parse_skip_range("512").is_err());
        assert!(parse_skip_range("a-b").is_err());
        assert!(parse_skip_range("100-611").is_err());
        assert!(parse_skip_range("0-512").is_err());
        assert!(parse_skip_range("1024-511").is_err());
    }

    #[test]
    fn blob_name_suffix() {
        assert_eq!(normalize_blob_name("disk"), "disk.vhd");
        assert_eq!(normalize_blob_name("disk.vhd"), "disk.vhd");
        assert_eq!(normalize_blob_name("DISK.VHD"), "DISK.VHD");
        assert_eq!(normalize_blob_name("disk.vhdx"), "disk.vhdx.vhd");
    }
}
