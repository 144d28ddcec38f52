//! Capability-based filesystem access for CLI inputs and the database path.

use std::io::{self, Read};
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};

use crate::CliError;

/// Read a UTF-8 text file using ambient authority.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let mut file = fs_utf8::File::open_ambient(path, ambient_authority())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Fail unless `path` names an existing regular file.
pub(crate) fn require_file(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_file(path: &Utf8Path) -> io::Result<bool> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "path has no file name"))?;
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.metadata(name).map(|meta| meta.is_file())
}

/// Create the directory that will hold the database at `path`.
pub(crate) fn ensure_database_dir(path: &Utf8Path) -> Result<(), CliError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() {
        return Ok(());
    }
    create_dir_all(parent).map_err(|source| CliError::PrepareDatabaseDir {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir_all(dir: &Utf8Path) -> io::Result<()> {
    let (base, relative) = split_root(dir);
    if relative.as_str().is_empty() {
        return Ok(());
    }
    fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?.create_dir_all(&relative)
}

/// Split `dir` into an ambient root cap-std can open and the path beneath it.
fn split_root(dir: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let mut base = Utf8PathBuf::new();
    let mut relative = Utf8PathBuf::new();
    for component in dir.as_std_path().components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                if let Some(part) = component.as_os_str().to_str() {
                    base.push(part);
                }
            }
            other => {
                if let Some(part) = other.as_os_str().to_str() {
                    relative.push(part);
                }
            }
        }
    }
    if base.as_str().is_empty() {
        base.push(".");
    }
    (base, relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn utf8_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
    }

    #[rstest]
    #[case("/var/lib/onestop", "/", "var/lib/onestop")]
    #[case("data/registry", ".", "data/registry")]
    fn split_root_separates_ambient_base(
        #[case] dir: &str,
        #[case] base: &str,
        #[case] relative: &str,
    ) {
        let (found_base, found_relative) = split_root(Utf8Path::new(dir));
        assert_eq!(found_base, Utf8PathBuf::from(base));
        assert_eq!(found_relative, Utf8PathBuf::from(relative));
    }

    #[rstest]
    fn ensure_database_dir_creates_nested_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let database = utf8_root(&tmp).join("nested/deeper/registry.db");
        ensure_database_dir(&database).expect("create directories");
        assert!(database.parent().expect("parent").is_dir());
    }

    #[rstest]
    fn require_file_distinguishes_missing_and_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let root = utf8_root(&tmp);
        let missing = require_file(&root.join("absent.json"), "payload").expect_err("missing");
        assert!(matches!(missing, CliError::MissingSourceFile { .. }));
        let directory = require_file(&root, "payload").expect_err("directory");
        assert!(matches!(directory, CliError::SourcePathNotFile { .. }));
    }
}
