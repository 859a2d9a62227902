//! Filesystem helpers for game folders

use crate::LibraryError;
use crate::record::BannerType;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions recognized as artwork, compared case-sensitively
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Every regular file below `root`, sorted
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, LibraryError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Combined size in bytes of every regular file below `root`
pub fn folder_size(root: &Path) -> Result<u64, LibraryError> {
    let mut total = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Copy the tree at `source` into `dest`, preserving relative paths.
///
/// Existing destination files are only overwritten when the source is
/// newer. `progress` is called before each file with its 1-based index, the
/// total file count and the path relative to `source`. Returns the number of
/// files actually written.
pub fn copy_tree(
    source: &Path,
    dest: &Path,
    mut progress: impl FnMut(usize, usize, &Path),
) -> Result<usize, LibraryError> {
    let files = collect_files(source)?;
    let total = files.len();
    let mut copied = 0;

    for (index, file) in files.iter().enumerate() {
        let relative = file.strip_prefix(source).unwrap_or(file.as_path());
        progress(index + 1, total, relative);

        let target = dest.join(relative);
        if !needs_copy(file, &target)? {
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(LibraryError::fs(parent))?;
        }
        fs::copy(file, &target).map_err(LibraryError::fs(&target))?;
        copied += 1;
    }

    tracing::debug!(
        "Copied {} of {} files from {} to {}",
        copied,
        total,
        source.display(),
        dest.display()
    );
    Ok(copied)
}

fn needs_copy(source: &Path, target: &Path) -> Result<bool, LibraryError> {
    let target_meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(LibraryError::fs(target)(e)),
    };
    let source_meta = fs::metadata(source).map_err(LibraryError::fs(source))?;

    match (source_meta.modified(), target_meta.modified()) {
        (Ok(src), Ok(dst)) => Ok(src > dst),
        _ => Ok(true),
    }
}

/// Artwork files directly inside `folder`, keyed by the slot their file
/// stem names. Subfolders are not searched.
pub fn find_banners(folder: &Path) -> Result<Vec<(BannerType, PathBuf)>, LibraryError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(folder).map_err(LibraryError::fs(folder))? {
        let entry = entry.map_err(LibraryError::fs(folder))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !IMAGE_EXTENSIONS.contains(&ext) {
            continue;
        }

        if let Some(kind) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(BannerType::from_file_stem)
        {
            found.push((kind, path));
        }
    }
    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}
