//! Workspace acquisition: resolving a `Definition`'s origin (a local
//! directory, a local archive, or a remote archive URL) to a usable local
//! directory, with guaranteed cleanup on every exit path via `Drop`.

use std::fs::File;
use std::io::copy;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{Origin, OriginBase};
use crate::error::CreepError;

/// A materialized workspace directory. Temporary files/directories created
/// to produce it (a downloaded archive, its extraction directory) are
/// removed when this value is dropped, regardless of how the scope exits.
pub struct Workspace {
    directory: PathBuf,
    _download: Option<tempfile::TempPath>,
    _extracted: Option<tempfile::TempDir>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.directory
    }
}

/// Resolve `origin` to a [`Workspace`]. Local directories are used in
/// place; local and downloaded archives are extracted into a fresh
/// temporary directory.
pub fn acquire(origin: &Origin) -> Result<Workspace> {
    let (head, download) = match &origin.base {
        OriginBase::Local(path) => (path.clone(), None),
        OriginBase::Http(url) => {
            let suffix = Path::new(url.path())
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();

            let temp = tempfile::Builder::new()
                .suffix(&suffix)
                .tempfile()
                .context("failed to create temporary file for download")?;
            let (mut file, path) = temp.into_parts();

            let mut response = reqwest::blocking::get(url.as_str())
                .with_context(|| format!("failed to download {url}"))?
                .error_for_status()
                .with_context(|| format!("server returned an error for {url}"))?;

            copy(&mut response, &mut file).context("failed to write downloaded archive")?;

            (path.to_path_buf(), Some(path))
        }
    };

    if head.is_dir() {
        if origin.subpath.is_some() {
            bail!(CreepError::Configuration(
                "no sub-path can be specified when origin is a directory".into()
            ));
        }

        return Ok(Workspace {
            directory: head,
            _download: download,
            _extracted: None,
        });
    }

    if head.is_file() {
        let extracted = tempfile::tempdir().context("failed to create extraction directory")?;
        extract_archive(&head, extracted.path())?;

        let directory = match &origin.subpath {
            Some(sub) => crate::path::join_normalized(extracted.path(), sub),
            None => extracted.path().to_path_buf(),
        };

        return Ok(Workspace {
            directory,
            _download: download,
            _extracted: Some(extracted),
        });
    }

    bail!(CreepError::Configuration(format!(
        "origin path \"{}\" is not a directory nor an archive file.",
        head.display()
    )));
}

fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    let extension = archive
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "zip" => {
            let file = File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)?;
            zip.extract(destination)?;
        }
        "gz" | "tgz" => {
            let file = File::open(archive)?;
            let decoder = flate2::read::GzDecoder::new(file);
            tar::Archive::new(decoder).unpack(destination)?;
        }
        _ => {
            let file = File::open(archive)?;
            tar::Archive::new(file).unpack(destination)?;
        }
    }

    Ok(())
}
