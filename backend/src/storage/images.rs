use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Extensions accepted as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "tiff"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Finder's `__MACOSX` folders and dot files such as `._look.png` sidecars.
fn is_metadata_name(name: &OsStr) -> bool {
    name == "__MACOSX" || name.to_string_lossy().starts_with('.')
}

/// True when any component of a relative path is OS metadata rather than
/// user content.
pub fn is_metadata(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => is_metadata_name(name),
        _ => false,
    })
}

/// Lists every image under `dir`, recursively, in path order. Metadata
/// folders and dot files below `dir` are not descended into.
pub fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_metadata_name(entry.file_name()));
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}
