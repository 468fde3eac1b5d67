//! The operation graph: build operations connected by the files they read
//! and write.

use crate::densemap::{self, DenseMap};
use crate::error::Result;
use crate::files::{FileId, FileSystemState};
use rustc_hash::FxHashMap;

/// Handle for an operation.  Assigned from 1 in registration order;
/// u32::MAX is reserved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u32);

impl OperationId {
    pub const MAX: OperationId = OperationId(u32::MAX - 1);

    /// The id of arena slot `index`, if it is still assignable.
    pub fn checked_from_index(index: usize) -> Option<OperationId> {
        u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(1))
            .filter(|&id| id <= OperationId::MAX.0)
            .map(OperationId)
    }
}

impl densemap::Index for OperationId {
    fn index(&self) -> usize {
        self.0 as usize - 1
    }
}
impl From<usize> for OperationId {
    fn from(u: usize) -> OperationId {
        debug_assert!(u < OperationId::MAX.0 as usize);
        OperationId(u as u32 + 1)
    }
}

/// The command an operation runs.  Two operations with equal commands are
/// the same operation.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CommandInfo {
    pub working_directory: String,
    pub executable: String,
    pub arguments: String,
}

impl CommandInfo {
    pub fn new(
        working_directory: impl Into<String>,
        executable: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        CommandInfo {
            working_directory: working_directory.into(),
            executable: executable.into(),
            arguments: arguments.into(),
        }
    }
}

impl std::fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} {}",
            self.working_directory, self.executable, self.arguments
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationInfo {
    pub id: OperationId,
    pub title: String,
    pub command: CommandInfo,
    pub declared_input: Vec<FileId>,
    pub declared_output: Vec<FileId>,
    /// Access list entries covering the declared inputs.
    pub read_access: Vec<FileId>,
    /// Access list entries covering the declared outputs.
    pub write_access: Vec<FileId>,
    /// Operations that must run strictly after this one.
    pub children: Vec<OperationId>,
    /// Count of predecessors; roots carry 1, satisfied by the start of the
    /// pass.
    pub dependency_count: u32,
    pub was_successful_run: bool,
    pub observed_input: Vec<FileId>,
    pub observed_output: Vec<FileId>,
}

impl OperationInfo {
    pub fn new(
        id: OperationId,
        title: String,
        command: CommandInfo,
        declared_input: Vec<FileId>,
        declared_output: Vec<FileId>,
    ) -> Self {
        OperationInfo {
            id,
            title,
            command,
            declared_input,
            declared_output,
            read_access: Vec::new(),
            write_access: Vec::new(),
            children: Vec::new(),
            dependency_count: 0,
            was_successful_run: false,
            observed_input: Vec::new(),
            observed_output: Vec::new(),
        }
    }

    /// Every file id this operation refers to.
    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        self.declared_input
            .iter()
            .chain(&self.declared_output)
            .chain(&self.read_access)
            .chain(&self.write_access)
            .chain(&self.observed_input)
            .chain(&self.observed_output)
            .copied()
    }

    /// Inputs whose change makes the outputs stale.
    pub fn all_inputs(&self) -> impl Iterator<Item = FileId> + '_ {
        self.declared_input
            .iter()
            .chain(&self.observed_input)
            .copied()
    }

    pub fn all_outputs(&self) -> impl Iterator<Item = FileId> + '_ {
        self.declared_output
            .iter()
            .chain(&self.observed_output)
            .copied()
    }
}

/// The graph handed from the generate phase to the evaluate phase.
///
/// Operations live in an arena indexed by OperationId; the command lookup
/// guards against registering the same command twice.
#[derive(Debug, Clone, Default)]
pub struct OperationGraph {
    referenced_files: Vec<(FileId, String)>,
    root_operations: Vec<OperationId>,
    operations: DenseMap<OperationId, OperationInfo>,
    command_lookup: FxHashMap<CommandInfo, OperationId>,
}

impl PartialEq for OperationGraph {
    fn eq(&self, other: &Self) -> bool {
        // command_lookup is derived from operations.
        self.referenced_files == other.referenced_files
            && self.root_operations == other.root_operations
            && self.operations == other.operations
    }
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn referenced_files(&self) -> &[(FileId, String)] {
        &self.referenced_files
    }

    pub fn set_referenced_files(&mut self, files: Vec<(FileId, String)>) {
        self.referenced_files = files;
    }

    pub fn root_operations(&self) -> &[OperationId] {
        &self.root_operations
    }

    pub fn set_root_operations(&mut self, roots: Vec<OperationId>) {
        self.root_operations = roots;
    }

    pub fn next_id(&self) -> OperationId {
        self.operations.next_id()
    }

    /// Append an operation.  Its id must be the next id and its command must
    /// be new; callers check both and report the matching error.
    pub fn add_operation(&mut self, operation: OperationInfo) -> OperationId {
        debug_assert_eq!(operation.id, self.operations.next_id());
        debug_assert!(!self.command_lookup.contains_key(&operation.command));
        self.command_lookup
            .insert(operation.command.clone(), operation.id);
        self.operations.push(operation)
    }

    pub fn find_operation(&self, command: &CommandInfo) -> Option<OperationId> {
        self.command_lookup.get(command).copied()
    }

    pub fn operation(&self, id: OperationId) -> Option<&OperationInfo> {
        if id.0 == 0 {
            return None;
        }
        self.operations.lookup(id)
    }

    pub fn operation_mut(&mut self, id: OperationId) -> Option<&mut OperationInfo> {
        if id.0 == 0 {
            return None;
        }
        self.operations.lookup_mut(id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &OperationInfo> {
        self.operations.values()
    }

    pub fn operations_mut(&mut self) -> impl Iterator<Item = &mut OperationInfo> {
        self.operations.values_mut()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Renumber the files the operations refer to as 1..=n, keeping their
    /// relative order, and record them as the referenced files.  Paths come
    /// from `files`, which must know every id in use.
    pub fn compact_files(&mut self, files: &FileSystemState) -> Result<()> {
        let used = self.used_file_ids();
        let mut table = Vec::with_capacity(used.len());
        let mut renumber: FxHashMap<FileId, FileId> = FxHashMap::default();
        for (index, &id) in used.iter().enumerate() {
            let new_id = FileId::from(index);
            table.push((new_id, files.get_file_path(id)?.to_string()));
            renumber.insert(id, new_id);
        }
        for op in self.operations.values_mut() {
            for list in [
                &mut op.declared_input,
                &mut op.declared_output,
                &mut op.read_access,
                &mut op.write_access,
                &mut op.observed_input,
                &mut op.observed_output,
            ] {
                for id in list.iter_mut() {
                    *id = renumber[&*id];
                }
            }
        }
        self.referenced_files = table;
        Ok(())
    }

    /// Sorted, deduplicated ids of every file any operation refers to.
    pub fn used_file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.operations().flat_map(|op| op.file_ids()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl std::ops::Index<OperationId> for OperationGraph {
    type Output = OperationInfo;

    fn index(&self, id: OperationId) -> &OperationInfo {
        &self.operations[id]
    }
}

impl std::ops::IndexMut<OperationId> for OperationGraph {
    fn index_mut(&mut self, id: OperationId) -> &mut OperationInfo {
        &mut self.operations[id]
    }
}
