use std::path::Path;

use walkdir::WalkDir;

use crate::consts::DEFINITION_FILENAME;

/// Collect the names of all services defined under `root`.
///
/// A service's name is the name of the directory holding its definition file.
/// Directories whose name starts with `.` are not descended into.
pub fn discover_services(root: &Path) -> Result<Vec<String>, walkdir::Error> {
  let mut names = Vec::new();

  let walker = WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

  for entry in walker {
    let entry = entry?;
    if !entry.file_type().is_file() || entry.file_name() != DEFINITION_FILENAME {
      continue;
    }
    let name = entry
      .path()
      .parent()
      .and_then(Path::file_name)
      .map(|n| n.to_string_lossy().into_owned());
    if let Some(name) = name {
      names.push(name);
    }
  }

  Ok(names)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
  name.to_string_lossy().starts_with('.')
}
