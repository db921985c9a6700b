//! Bounded loading of binaries from disk.
//!
//! Files are size-checked before any byte is read, then either memory-mapped
//! read-only or read into a buffer. Either way the caller gets a `LoadedBinary`
//! that derefs to `&[u8]` for the parser.

use crate::config::IoLimits;
use crate::error::{DetectorError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

enum Backing {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

/// File contents held for the duration of an analysis.
pub struct LoadedBinary {
    path: PathBuf,
    backing: Backing,
}

impl LoadedBinary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(map) => &map[..],
            Backing::Buffered(buf) => buf.as_slice(),
        }
    }
}

impl Deref for LoadedBinary {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl AsRef<[u8]> for LoadedBinary {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl std::fmt::Debug for LoadedBinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBinary")
            .field("path", &self.path)
            .field("len", &self.bytes().len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Open `path`, enforcing `limits.max_file_size`.
pub fn load_binary<P: AsRef<Path>>(path: P, limits: &IoLimits) -> Result<LoadedBinary> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    debug!(
        path = %path.display(),
        size = file_size,
        limit = limits.max_file_size,
        "opening binary"
    );

    if file_size > limits.max_file_size {
        warn!(
            path = %path.display(),
            size = file_size,
            limit = limits.max_file_size,
            "file is too large"
        );
        return Err(DetectorError::FileTooLarge {
            limit: limits.max_file_size,
            found: file_size,
        });
    }

    // Empty files cannot be mapped.
    let backing = if limits.use_mmap && file_size > 0 {
        // Safety: read-only mapping of a regular file we just opened.
        Backing::Mapped(unsafe { Mmap::map(&file)? })
    } else {
        let mut buf = Vec::with_capacity(file_size as usize);
        // The file may grow between metadata() and the read.
        file.by_ref()
            .take(limits.max_file_size.saturating_add(1))
            .read_to_end(&mut buf)?;
        if buf.len() as u64 > limits.max_file_size {
            return Err(DetectorError::FileTooLarge {
                limit: limits.max_file_size,
                found: buf.len() as u64,
            });
        }
        Backing::Buffered(buf)
    };

    Ok(LoadedBinary {
        path: path.to_path_buf(),
        backing,
    })
}
