//! Big-endian framing helpers and crash-tolerant file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chronostore_error::{ChronoError, Result};
use tracing::error;

/// Append a big-endian `i32`.
#[inline]
pub fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Cursor over a byte buffer read from `path`.
///
/// Every decoding failure is reported as corruption of that file.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8], path: &'a Path) -> Self {
        Self { buf, pos: 0, path }
    }

    /// Bytes not yet consumed.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(i32::from_be_bytes(raw))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.corrupt(format!(
                "need {len} bytes at offset {}, only {} remain",
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Read a length field, rejecting negatives other than `-1` (absent).
    #[allow(clippy::cast_sign_loss)]
    pub fn read_len(&mut self, what: &str) -> Result<Option<usize>> {
        match self.read_i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(self.corrupt(format!("negative {what} length {len}"))),
            len => Ok(Some(len as usize)),
        }
    }

    /// Fail unless the whole buffer was consumed.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(self.corrupt(format!("{} trailing bytes", self.remaining())))
        }
    }

    #[must_use]
    pub fn corrupt(&self, detail: impl Into<String>) -> ChronoError {
        ChronoError::spine_corrupt(self.path, detail)
    }
}

/// Read a whole file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => {
            error!(path = %path.display(), error = %source, "file read failed");
            Err(ChronoError::IoRead {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Replace `path` with `bytes`: write a `.tmp` sibling, sync it, rename,
/// then sync the parent directory so the rename itself is durable.
///
/// A crash leaves either the old file or the new one, plus at most a stray
/// `.tmp` that the next write overwrites.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let parent = parent_dir(path);
    let result = (|| -> io::Result<()> {
        fs::create_dir_all(parent)?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        fs::File::open(parent)?.sync_all()
    })();
    result.map_err(|source| {
        error!(path = %path.display(), error = %source, "file write failed");
        ChronoError::IoWrite {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// A bare file name lives in the current directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
