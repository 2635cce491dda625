//! Storage medium abstraction and the atomic image write.
//!
//! The worker is the only caller; nothing else in the firmware touches the
//! medium directly. Paths are absolute (`/queue-permanent/...`) and directory
//! components map onto the collection prefixes from [`crate::name`].

use alloc::vec::Vec;

use crate::name::{Collection, ImageName, ImagePath};

/// Filesystem-level access used by the job worker.
///
/// `write_file` may report a short write; callers treat anything below the
/// requested length as a failed write.
pub trait MediaStore {
    type Error: core::fmt::Debug;

    /// Mount the medium if it is not already mounted. Called at the start of
    /// every job so a card inserted after boot still gets picked up.
    fn ensure_mounted(&mut self) -> Result<(), Self::Error>;

    /// Append the names of every image in `collection` to `out`, with the
    /// collection prefix included. Order is whatever the medium yields.
    fn list(&mut self, collection: Collection, out: &mut Vec<ImageName>)
    -> Result<(), Self::Error>;

    fn exists(&mut self, path: &str) -> Result<bool, Self::Error>;

    /// Returns the number of bytes actually written.
    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<usize, Self::Error>;

    fn remove(&mut self, path: &str) -> Result<(), Self::Error>;

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error>;
}

/// Stage reached when an atomic write failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitError {
    Open,
    Write,
    Rename,
}

impl CommitError {
    pub const fn message(self) -> &'static str {
        match self {
            Self::Open => "Open failed",
            Self::Write => "Write failed",
            Self::Rename => "Rename failed",
        }
    }
}

/// Write `data` to `path` without ever exposing a partial file.
///
/// The bytes land in a `.tmp` sibling first; only a complete write is renamed
/// over the target. The sibling is removed again on any failure, so a crash
/// mid-write leaves at worst a stale `.tmp` next to an untouched target.
pub fn commit_image<M: MediaStore>(
    media: &mut M,
    path: &str,
    data: &[u8],
) -> Result<(), CommitError> {
    let tmp = tmp_path(path);

    let written = match media.write_file(&tmp, data) {
        Ok(n) => n,
        Err(_) => return Err(CommitError::Open),
    };
    if written != data.len() {
        let _ = media.remove(&tmp);
        return Err(CommitError::Write);
    }

    // Remove-then-rename: FAT rename does not overwrite.
    let _ = media.remove(path);
    if media.rename(&tmp, path).is_err() {
        let _ = media.remove(&tmp);
        return Err(CommitError::Rename);
    }
    Ok(())
}

fn tmp_path(path: &str) -> ImagePath {
    let mut tmp = ImagePath::new();
    let _ = tmp.push_str(path);
    let _ = tmp.push_str(".tmp");
    tmp
}

/// In-memory medium used by host tests and bring-up builds until the SD
/// driver lands.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    files: alloc::collections::BTreeMap<alloc::string::String, Vec<u8>>,
    mounted: bool,
    /// When set, `ensure_mounted` fails until cleared.
    pub fail_mount: bool,
    /// When set, the next `write_file` stores and reports only half the data.
    pub short_write_once: bool,
    /// When set, the next `rename` fails.
    pub fail_rename_once: bool,
}

#[derive(Debug, Eq, PartialEq)]
pub struct MemoryMediaError;

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file directly, bypassing the atomic-write path.
    pub fn insert(&mut self, path: &str, data: &[u8]) {
        self.files
            .insert(alloc::string::String::from(path), Vec::from(data));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn check_mounted(&self) -> Result<(), MemoryMediaError> {
        if self.mounted { Ok(()) } else { Err(MemoryMediaError) }
    }
}

impl MediaStore for MemoryMediaStore {
    type Error = MemoryMediaError;

    fn ensure_mounted(&mut self) -> Result<(), Self::Error> {
        if self.fail_mount {
            self.mounted = false;
            return Err(MemoryMediaError);
        }
        self.mounted = true;
        Ok(())
    }

    fn list(
        &mut self,
        collection: Collection,
        out: &mut Vec<ImageName>,
    ) -> Result<(), Self::Error> {
        self.check_mounted()?;
        let mut dir = alloc::string::String::from("/");
        dir.push_str(collection.prefix());
        for path in self.files.keys() {
            if let Some(rel) = path.strip_prefix(dir.as_str()) {
                if rel.is_empty() || rel.contains('/') || rel.ends_with(".tmp") {
                    continue;
                }
                let mut name = ImageName::new();
                let _ = name.push_str(collection.prefix());
                if name.push_str(rel).is_ok() {
                    out.push(name);
                }
            }
        }
        Ok(())
    }

    fn exists(&mut self, path: &str) -> Result<bool, Self::Error> {
        self.check_mounted()?;
        Ok(self.files.contains_key(path))
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<usize, Self::Error> {
        self.check_mounted()?;
        let stored = if self.short_write_once {
            self.short_write_once = false;
            &data[..data.len() / 2]
        } else {
            data
        };
        self.files
            .insert(alloc::string::String::from(path), Vec::from(stored));
        Ok(stored.len())
    }

    fn remove(&mut self, path: &str) -> Result<(), Self::Error> {
        self.check_mounted()?;
        self.files.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), Self::Error> {
        self.check_mounted()?;
        if self.fail_rename_once {
            self.fail_rename_once = false;
            return Err(MemoryMediaError);
        }
        match self.files.remove(from) {
            Some(data) => {
                self.files.insert(alloc::string::String::from(to), data);
                Ok(())
            }
            None => Err(MemoryMediaError),
        }
    }
}
