use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};

/// Creates a file and all parent directories if they don't exist.
pub fn create_file<S>(path: S) -> Result<File, Error>
where
    S: AsRef<Path>,
{
    if let Some(parent) = path.as_ref().parent() {
        create_dirs(parent)?;
    }

    File::create(path.as_ref()).context(format!(
        "Could not create file: {}",
        path.as_ref().display()
    ))
}

/// Creates all directories in a path if they don't exist.
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Writes a file atomically: the content lands in a temporary file in the
/// same directory which is then renamed over the destination, so readers
/// never observe a half-written file.
pub fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), Error> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    create_dirs(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .context("Failed to create temporary file")?;
    tmp.write_all(contents.as_ref())
        .context("Failed to write temporary file")?;
    tmp.as_file()
        .sync_all()
        .context("Failed to sync temporary file")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to persist '{}'", path.display()))?;

    Ok(())
}
