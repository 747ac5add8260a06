//! Concurrent positional writer for the destination file.
//!
//! Opens or creates the destination in place (no temp staging); resume
//! re-opens without truncation. Many workers write disjoint ranges of the
//! same file concurrently, so every write is pwrite-style and never touches
//! a shared cursor.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for one task's destination file. Cloning shares the same open
/// file; each `write_at` is independent and safe for concurrent callers
/// with disjoint offset ranges.
#[derive(Clone)]
pub struct DestFile {
    file: Arc<File>,
    path: PathBuf,
}

#[cfg(unix)]
fn write_at_impl(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at_impl(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

impl DestFile {
    /// Open or create the destination file without truncating existing
    /// bytes, so a resumed task keeps what earlier runs wrote.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(DestFile {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Set the logical length. Unwritten blocks stay sparse; there is no
    /// preallocation or zero-fill. Skip this for unknown sizes and let the
    /// file grow as writes land.
    pub fn set_size(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    /// Write all of `data` at `offset`, looping over short writes. Does not
    /// move any shared cursor.
    pub fn write_at(&self, data: &[u8], mut offset: u64) -> io::Result<()> {
        let mut buf = data;
        while !buf.is_empty() {
            let n = write_at_impl(&self.file, offset, buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write to destination file",
                ));
            }
            offset += n as u64;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flush file data and metadata to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Current length on disk.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_disjoint_writes_assemble_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let dest = DestFile::open(&path).unwrap();
        dest.set_size(1000).unwrap();

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let dest = dest.clone();
            handles.push(std::thread::spawn(move || {
                let chunk = vec![i as u8 + 1; 250];
                dest.write_at(&chunk, i * 250).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len(), 1000);
        for i in 0..4usize {
            assert!(content[i * 250..(i + 1) * 250].iter().all(|&b| b == i as u8 + 1));
        }
    }

    #[test]
    fn reopen_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.bin");
        {
            let dest = DestFile::open(&path).unwrap();
            dest.set_size(10).unwrap();
            dest.write_at(b"hello", 0).unwrap();
            dest.sync().unwrap();
        }
        let dest = DestFile::open(&path).unwrap();
        assert_eq!(dest.len().unwrap(), 10);
        let content = std::fs::read(&path).unwrap();
        assert_eq!(&content[..5], b"hello");
    }

    #[test]
    fn grows_without_set_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown.bin");
        let dest = DestFile::open(&path).unwrap();
        dest.write_at(b"Hello", 0).unwrap();
        assert_eq!(dest.len().unwrap(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"Hello");
    }

    #[test]
    fn open_rejects_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory component is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(DestFile::open(&blocker.join("out.bin")).is_err());
    }
}
