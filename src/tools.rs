//! File and network primitives used by the tool words.
//!
//! The machine only talks to the [`Tools`] trait. Failures are returned as [`ToolError`]s and
//! the machine decides what a failure means for the program (almost always a status value
//! pushed on the stack).
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Download failed: {0}")]
    Http(String),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("No entry {index} in `{dir}` ({count} entries)")]
    IndexOutOfRange { index: i64, dir: String, count: usize },
}

/// Result of a successful [`Tools::copy`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Nothing was copied because the destination is already there.
    DestinationExists,
}

/// The side-effecting collaborators of the machine.
///
/// Every call is synchronous and must release whatever it opened before returning.
pub trait Tools {
    fn download(&mut self, url: &str, dest: &Path) -> Result<(), ToolError>;
    fn read_file(&mut self, path: &Path) -> Result<String, ToolError>;
    fn move_path(&mut self, src: &Path, dst: &Path) -> Result<(), ToolError>;
    fn copy(&mut self, src: &Path, dst: &Path) -> Result<CopyOutcome, ToolError>;
    fn exists(&mut self, path: &Path) -> bool;
    fn touch(&mut self, path: &Path) -> Result<(), ToolError>;
    fn mkdir(&mut self, path: &Path) -> Result<(), ToolError>;
    fn remove(&mut self, path: &Path) -> Result<(), ToolError>;
    /// Extracts `archive` into `dest`, returning the number of directories and files written.
    fn unzip(&mut self, archive: &Path, dest: &Path) -> Result<(i64, i64), ToolError>;
    /// Names of the regular files directly inside `dir`, sorted.
    fn list_files(&mut self, dir: &Path) -> Result<Vec<String>, ToolError>;
    /// Names of the directories directly inside `dir`, sorted.
    fn list_dirs(&mut self, dir: &Path) -> Result<Vec<String>, ToolError>;
}

/// [`Tools`] backed by the local filesystem and plain HTTP(S).
#[derive(Default, Debug, Clone, Copy)]
pub struct HostTools {}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

fn list_entries(dir: &Path, want_dirs: bool) -> Result<Vec<String>, ToolError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() == want_dirs {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Writes `reader` into `dest`. A transfer that breaks off leaves no file behind.
fn save_stream(reader: &mut dyn io::Read, dest: &Path) -> Result<(), ToolError> {
    let mut file = File::create(dest)?;
    if let Err(e) = io::copy(reader, &mut file) {
        drop(file);
        if let Err(cleanup) = fs::remove_file(dest) {
            debug!(dest = %dest.display(), %cleanup, "cannot remove partial download");
        }
        return Err(e.into());
    }
    Ok(())
}

impl Tools for HostTools {
    fn download(&mut self, url: &str, dest: &Path) -> Result<(), ToolError> {
        debug!(url, dest = %dest.display(), "download");
        let response = ureq::get(url).call().map_err(|e| ToolError::Http(e.to_string()))?;
        save_stream(&mut response.into_reader(), dest)
    }

    fn read_file(&mut self, path: &Path) -> Result<String, ToolError> {
        Ok(fs::read_to_string(path)?)
    }

    fn move_path(&mut self, src: &Path, dst: &Path) -> Result<(), ToolError> {
        Ok(fs::rename(src, dst)?)
    }

    fn copy(&mut self, src: &Path, dst: &Path) -> Result<CopyOutcome, ToolError> {
        if dst.exists() {
            return Ok(CopyOutcome::DestinationExists);
        }
        copy_recursive(src, dst)?;
        Ok(CopyOutcome::Copied)
    }

    fn exists(&mut self, path: &Path) -> bool {
        path.exists()
    }

    fn touch(&mut self, path: &Path) -> Result<(), ToolError> {
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(())
    }

    fn mkdir(&mut self, path: &Path) -> Result<(), ToolError> {
        Ok(fs::create_dir_all(path)?)
    }

    fn remove(&mut self, path: &Path) -> Result<(), ToolError> {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn unzip(&mut self, archive: &Path, dest: &Path) -> Result<(i64, i64), ToolError> {
        debug!(archive = %archive.display(), dest = %dest.display(), "unzip");
        let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
        let (mut dirs, mut files) = (0, 0);
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            // Entries escaping `dest` (absolute paths, `..`) are skipped.
            let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else { continue };
            let target = dest.join(relative);
            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                dirs += 1;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&target)?;
                io::copy(&mut entry, &mut out)?;
                files += 1;
            }
        }
        Ok((dirs, files))
    }

    fn list_files(&mut self, dir: &Path) -> Result<Vec<String>, ToolError> {
        list_entries(dir, false)
    }

    fn list_dirs(&mut self, dir: &Path) -> Result<Vec<String>, ToolError> {
        list_entries(dir, true)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = HostTools::default();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");

        assert!(!tools.exists(&a));
        tools.touch(&a).unwrap();
        assert!(tools.exists(&a));
        fs::write(&a, "hello").unwrap();

        assert_eq!(tools.copy(&a, &b).unwrap(), CopyOutcome::Copied);
        assert_eq!(tools.copy(&a, &b).unwrap(), CopyOutcome::DestinationExists);
        assert_eq!(tools.read_file(&b).unwrap(), "hello");

        tools.remove(&b).unwrap();
        assert!(!tools.exists(&b));
        tools.move_path(&a, &b).unwrap();
        assert!(!tools.exists(&a));
        assert!(tools.read_file(&a).is_err());
    }

    #[test]
    fn test_listing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = HostTools::default();
        tools.mkdir(&dir.path().join("sub/deeper")).unwrap();
        tools.mkdir(&dir.path().join("other")).unwrap();
        tools.touch(&dir.path().join("z")).unwrap();
        tools.touch(&dir.path().join("y")).unwrap();

        assert_eq!(tools.list_files(dir.path()).unwrap(), vec!["y", "z"]);
        assert_eq!(tools.list_dirs(dir.path()).unwrap(), vec!["other", "sub"]);
        assert!(tools.list_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_unzip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::FileOptions::default();
            writer.add_directory("d/", options).unwrap();
            writer.start_file("d/one.txt", options).unwrap();
            writer.write_all(b"1").unwrap();
            writer.start_file("two.txt", options).unwrap();
            writer.write_all(b"2").unwrap();
            writer.finish().unwrap();
        }
        let mut tools = HostTools::default();
        let out = dir.path().join("out");
        assert_eq!(tools.unzip(&archive, &out).unwrap(), (1, 2));
        assert_eq!(tools.read_file(&out.join("d/one.txt")).unwrap(), "1");
        assert!(tools.unzip(&dir.path().join("missing.zip"), &out).is_err());
    }

    /// Hands out `good` and then fails, like a connection dropped mid-transfer.
    struct BrokenReader {
        good: &'static [u8],
    }

    impl io::Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.good.is_empty() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = self.good.len().min(buf.len());
            buf[..n].copy_from_slice(&self.good[..n]);
            self.good = &self.good[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_save_stream() {
        let dir = tempfile::tempdir().unwrap();
        let whole = dir.path().join("whole.bin");
        save_stream(&mut &b"payload"[..], &whole).unwrap();
        assert_eq!(fs::read(&whole).unwrap(), b"payload");

        let partial = dir.path().join("partial.bin");
        let result = save_stream(&mut BrokenReader { good: b"half of it" }, &partial);
        assert!(matches!(result, Err(ToolError::Io(_))));
        assert!(!partial.exists());
    }
}
