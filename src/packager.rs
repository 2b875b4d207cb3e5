use crate::err::{CleanupWarning, DiagError, Result};
use crate::raw_file::display_relative;
use crate::retry::RetryPolicy;

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// `<dir>/<stem>-processed.zip` next to the input archive.
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diagnostics".to_owned());

    input.with_file_name(format!("{}-processed.zip", stem))
}

/// Deletes every zero-byte file below `root`, returning how many were removed.
pub fn remove_empty_files(root: &Path) -> Result<usize> {
    let mut removed = 0;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| DiagError::io("walk", root, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let len = entry
            .metadata()
            .map_err(|e| DiagError::io("stat", entry.path(), e.into()))?
            .len();

        if len == 0 {
            debug!("Removing empty file `{}`", entry.path().display());
            fs::remove_file(entry.path()).map_err(|e| DiagError::io("remove", entry.path(), e))?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Compresses `root` into a zip at `dest`, returning the archive size in bytes.
///
/// The archive is written next to `dest` and moved into place once complete, so a failed run
/// never leaves a truncated archive behind. An existing `dest` is only replaced if `overwrite`.
pub fn package(root: &Path, dest: &Path, overwrite: bool) -> Result<u64> {
    if dest.is_dir() {
        return Err(DiagError::packaging(
            dest,
            "There is a directory at the output path, refusing to overwrite",
        ));
    }
    if dest.exists() && !overwrite {
        return Err(DiagError::packaging(
            dest,
            "The output archive already exists and overwriting was not allowed",
        ));
    }

    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| DiagError::packaging(dest, e))?;

    let mut staging =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| DiagError::packaging(dest, e))?;

    let written = write_zip(root, staging.as_file_mut()).map_err(|e| DiagError::packaging(dest, e))?;
    info!("Compressed {} file(s) into `{}`", written, dest.display());

    staging
        .persist(dest)
        .map_err(|e| DiagError::packaging(dest, e.error))?;

    let size = fs::metadata(dest)
        .map_err(|e| DiagError::packaging(dest, e))?
        .len();
    if size == 0 {
        return Err(DiagError::packaging(dest, "The output archive is empty"));
    }

    Ok(size)
}

fn write_zip(root: &Path, out: &mut File) -> zip::result::ZipResult<usize> {
    let mut writer = zip::ZipWriter::new(out);
    let mut count = 0;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let len = entry.metadata().map_err(io::Error::from)?.len();

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(len >= u64::from(u32::MAX));

        writer.start_file(display_relative(relative), options)?;
        io::copy(&mut File::open(entry.path())?, &mut writer)?;
        count += 1;
    }

    writer.finish()?;
    Ok(count)
}

/// Removes the working directory, retrying while external decoders still hold file locks.
///
/// Exhausting the policy is not an error: the archive already exists, the leftover directory is
/// reported as a warning.
pub fn cleanup(work_dir: &Path, policy: &RetryPolicy) -> Option<CleanupWarning> {
    let result = policy.run(|attempt| {
        debug!("Removing `{}` (attempt {})", work_dir.display(), attempt);
        match fs::remove_dir_all(work_dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    });

    match result {
        Ok(()) => None,
        Err(exhausted) => {
            warn!(
                "Giving up on removing `{}` after {} attempt(s)",
                work_dir.display(),
                exhausted.attempts
            );
            Some(CleanupWarning {
                path: work_dir.to_path_buf(),
                attempts: exhausted.attempts,
                source: exhausted.error,
            })
        }
    }
}
