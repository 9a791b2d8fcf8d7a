use std::path::Path;
use std::path::PathBuf;

/// Converts the path so that it is relative to the project root
pub fn to_project_path(project_root: &Path, file_path: &Path) -> PathBuf {
  file_path
    .strip_prefix(project_root)
    .unwrap_or(file_path)
    .to_path_buf()
}

/// Whether `child` is `parent` or lives somewhere below it.
///
/// Both paths are compared component by component, so `src/a` is not inside `src/ab`.
/// The empty path is the project root and contains every project path.
pub fn is_directory_inside(child: &Path, parent: &Path) -> bool {
  child.starts_with(parent)
}
