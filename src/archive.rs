//! Zip archive of a session's output directory, served by the download endpoint.

use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::Context;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::errors::{BuilderError, Result};

/// Zip every file under `dir` (paths relative to `dir`, `/`-separated).
pub fn zip_dir(dir: &Path) -> Result<Vec<u8>> {
    if !dir.is_dir() {
        return Err(BuilderError::NotFound(format!(
            "Output directory {} does not exist",
            dir.display()
        )));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));

    let mut entries: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .context("walking output directory")?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let rel = entry
            .path()
            .strip_prefix(dir)
            .context("entry outside output directory")?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .with_context(|| format!("adding directory {}", name))?;
        } else if entry.file_type().is_file() {
            let bytes =
                std::fs::read(entry.path()).map_err(|e| BuilderError::io(entry.path(), e))?;
            writer
                .start_file(name.as_str(), options)
                .with_context(|| format!("adding file {}", name))?;
            writer
                .write_all(&bytes)
                .with_context(|| format!("writing {}", name))?;
        }
    }

    let cursor = writer.finish().context("finishing zip archive")?;
    Ok(cursor.into_inner())
}
