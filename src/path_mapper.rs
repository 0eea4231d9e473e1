// Mirrors a source path into the target tree with the output extension.

use std::path::{Path, PathBuf};

use crate::config::OUTPUT_EXTENSION;
use crate::error::DiscoveryError;

/// Map `source_path` (under `source_root`) to its output path under `target_root`.
///
/// Only the root prefix and the extension change; every directory segment in
/// between is kept byte-for-byte. Identical inputs always yield the identical
/// output path.
///
/// # Example
/// ```
/// use std::path::Path;
/// use mp3batch::path_mapper::map_target_path;
///
/// let target = map_target_path(
///     Path::new("/music/flac"),
///     Path::new("/music/mp3"),
///     Path::new("/music/flac/Artist/Album/01 Track.flac"),
/// ).unwrap();
/// assert_eq!(target, Path::new("/music/mp3/Artist/Album/01 Track.mp3"));
/// ```
pub fn map_target_path(
    source_root: &Path,
    target_root: &Path,
    source_path: &Path,
) -> Result<PathBuf, DiscoveryError> {
    let relative = source_path
        .strip_prefix(source_root)
        .map_err(|_| DiscoveryError::OutsideRoot {
            path: source_path.to_path_buf(),
            root: source_root.to_path_buf(),
        })?;

    if relative.file_name().is_none() {
        return Err(DiscoveryError::OutsideRoot {
            path: source_path.to_path_buf(),
            root: source_root.to_path_buf(),
        });
    }

    let mut target = target_root.join(relative);
    target.set_extension(OUTPUT_EXTENSION);
    Ok(target)
}
