use crate::error::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// Classification of a candidate file by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Zip,
    Bz2,
    Plain,
}

pub fn classify(path: &Path) -> FileKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("zip") => FileKind::Zip,
        Some("bz2") => FileKind::Bz2,
        _ => FileKind::Plain,
    }
}

/// macOS archive metadata and hidden file names (including `._`
/// AppleDouble files) are never classified, uploaded, or ledgered.
///
/// Applies to files only: hidden directories are still descended into,
/// and their non-hidden contents upload normally.
pub fn is_skipped(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == "__MACOSX")
    {
        return true;
    }

    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Directories the walk never descends into.
pub fn is_metadata_dir(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == "__MACOSX")
}

/// Where `decompress_bz2` will write its output: the sibling path with
/// the `.bz2` suffix stripped.
pub fn bz2_output_path(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// Extracts all entries of a ZIP archive into its parent directory and
/// deletes the archive. Returns the parent directory so the caller can
/// re-scan it for newly exposed files.
///
/// Entries that would escape the parent directory are rejected by the zip
/// crate's extraction. Not atomic: a failure partway leaves both the
/// partial output and the archive on disk.
pub fn extract_zip(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(&parent)?;

    info!(archive = %path.display(), "Extracted ZIP archive");

    std::fs::remove_file(path)?;

    Ok(parent)
}

/// Decompresses a single-stream `.bz2` file to a sibling path with the
/// suffix stripped and deletes the compressed source. Returns the output
/// path, which goes straight to upload since BZ2 is not a multi-entry
/// container.
pub fn decompress_bz2(path: &Path) -> Result<PathBuf> {
    let output_path = bz2_output_path(path);

    let source = File::open(path)?;
    let mut decoder = bzip2::read::BzDecoder::new(source);
    let mut output = File::create(&output_path)?;
    std::io::copy(&mut decoder, &mut output)?;

    info!(source = %path.display(), output = %output_path.display(), "Decompressed BZ2 file");

    std::fs::remove_file(path)?;

    Ok(output_path)
}
