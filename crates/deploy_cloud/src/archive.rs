//! Gzipped tar archives of application sources.

use std::fs::File;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CloudError, CloudResult};

/// Pack the contents of `source_dir` into a `.tar.gz` at `dest`.
///
/// Entries are stored relative to the directory root.
pub fn pack_directory(source_dir: &Path, dest: &Path) -> CloudResult<()> {
    if !source_dir.is_dir() {
        return Err(CloudError::NotFound(format!(
            "source directory {}",
            source_dir.display()
        )));
    }

    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", source_dir)?;
    builder.into_inner()?.finish()?;

    debug!("Packed {:?} into {:?}", source_dir, dest);
    Ok(())
}

/// Pack `source_dir` into a temporary archive removed when dropped.
pub fn pack_to_temp(source_dir: &Path) -> CloudResult<NamedTempFile> {
    let archive = tempfile::Builder::new()
        .prefix("deploybot-source-")
        .suffix(".tar.gz")
        .tempfile()?;
    pack_directory(source_dir, archive.path())?;
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[test]
    fn test_archive_contains_relative_entries() {
        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("app")).unwrap();
        std::fs::write(src.path().join("Dockerfile"), "FROM python:3.12-slim\n").unwrap();
        std::fs::write(src.path().join("app/main.py"), "print('hi')\n").unwrap();

        let archive = pack_to_temp(src.path()).unwrap();

        let mut reader = tar::Archive::new(GzDecoder::new(File::open(archive.path()).unwrap()));
        let mut names: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();

        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
        assert!(names.iter().any(|n| n.ends_with("app/main.py")));
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let dest = TempDir::new().unwrap();
        let err = pack_directory(Path::new("/nonexistent/app"), &dest.path().join("a.tar.gz"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
