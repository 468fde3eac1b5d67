//! Interning of absolute file paths into compact FileIds.

use crate::canon::{canon_path, is_absolute, resolve};
use crate::densemap::{self, DenseMap};
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;

/// Handle for an absolute path.  Ids start at 1; 0 is never handed out and
/// u32::MAX is reserved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    pub const MAX: FileId = FileId(u32::MAX - 1);

    /// The id of table slot `index`, if it is still assignable.
    pub fn checked_from_index(index: usize) -> Option<FileId> {
        u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(1))
            .filter(|&id| id <= FileId::MAX.0)
            .map(FileId)
    }
}

impl densemap::Index for FileId {
    fn index(&self) -> usize {
        self.0 as usize - 1
    }
}
impl From<usize> for FileId {
    fn from(u: usize) -> FileId {
        debug_assert!(u < FileId::MAX.0 as usize);
        FileId(u as u32 + 1)
    }
}

/// Bidirectional path <-> FileId table.
///
/// Paths are stored canonicalized, so differently spelled references to the
/// same location intern to one id.  Slots may be empty when the table was
/// restored from a persisted subset of a larger table.
#[derive(Default, Clone, Debug)]
pub struct FileSystemState {
    paths: DenseMap<FileId, Option<String>>,
    lookup: FxHashMap<String, FileId>,
}

impl FileSystemState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a table from a previous build.  New ids continue after
    /// `max_file_id`.
    pub fn from_persisted(
        max_file_id: u32,
        files: impl IntoIterator<Item = (FileId, String)>,
    ) -> Result<Self> {
        if max_file_id > FileId::MAX.0 {
            return Err(Error::InvalidArgument(format!(
                "file id {} is reserved",
                max_file_id
            )));
        }
        let mut state = FileSystemState {
            paths: DenseMap::new_sized(max_file_id as usize, None),
            lookup: FxHashMap::default(),
        };
        for (id, path) in files {
            if id.0 == 0 || id.0 > max_file_id {
                return Err(Error::InvalidArgument(format!(
                    "file id {} outside 1..={}",
                    id.0, max_file_id
                )));
            }
            if state.lookup.insert(path.clone(), id).is_some() || state.paths[id].is_some() {
                return Err(Error::InvalidArgument(format!(
                    "file {} {:?} listed twice",
                    id.0, path
                )));
            }
            state.paths[id] = Some(path);
        }
        Ok(state)
    }

    pub fn max_file_id(&self) -> u32 {
        self.paths.len() as u32
    }

    /// Intern an absolute path.
    pub fn to_file_id(&mut self, path: &str) -> Result<FileId> {
        if !is_absolute(path) {
            return Err(Error::InvalidArgument(format!(
                "path must be absolute: {:?}",
                path
            )));
        }
        self.intern(canon_path(path))
    }

    /// Intern a path, resolving it against `working_directory` if relative.
    pub fn to_file_id_in(&mut self, path: &str, working_directory: &str) -> Result<FileId> {
        if !is_absolute(working_directory) {
            return Err(Error::InvalidArgument(format!(
                "working directory must be absolute: {:?}",
                working_directory
            )));
        }
        self.intern(resolve(path, working_directory))
    }

    /// Batch form of to_file_id_in.  One id per input, in input order.
    pub fn to_file_ids<S: AsRef<str>>(
        &mut self,
        paths: &[S],
        working_directory: &str,
    ) -> Result<Vec<FileId>> {
        paths
            .iter()
            .map(|p| self.to_file_id_in(p.as_ref(), working_directory))
            .collect()
    }

    pub fn try_find_file_id(&self, path: &str) -> Option<FileId> {
        if !is_absolute(path) {
            return None;
        }
        self.lookup.get(&canon_path(path)).copied()
    }

    pub fn get_file_path(&self, id: FileId) -> Result<&str> {
        if id.0 == 0 {
            return Err(Error::NotFound(format!("file id {}", id.0)));
        }
        match self.paths.lookup(id) {
            Some(Some(path)) => Ok(path),
            _ => Err(Error::NotFound(format!("file id {}", id.0))),
        }
    }

    /// All known (id, path) pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &str)> {
        self.paths
            .iter()
            .filter_map(|(id, path)| path.as_deref().map(|p| (id, p)))
    }

    /// Expects an already canonical absolute path.
    fn intern(&mut self, canon: String) -> Result<FileId> {
        if let Some(&id) = self.lookup.get(&canon) {
            return Ok(id);
        }
        if FileId::checked_from_index(self.paths.len()).is_none() {
            return Err(Error::InvalidOperation(format!(
                "no file id left for {:?}",
                canon
            )));
        }
        let id = self.paths.push(Some(canon.clone()));
        self.lookup.insert(canon, id);
        Ok(id)
    }
}
