//! The generate phase: collects declared operations and derives the edges
//! between them.

use crate::canon::{canon_directory, is_absolute, is_directory, is_within, parent_directory, resolve};
use crate::error::{Error, Result};
use crate::files::{FileId, FileSystemState};
use crate::graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Directories operations may read from and write to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessLists {
    read: Vec<String>,
    write: Vec<String>,
}

impl AccessLists {
    pub fn new<R, W>(read: R, write: W) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        W: IntoIterator,
        W::Item: AsRef<str>,
    {
        Ok(AccessLists {
            read: directory_list(read)?,
            write: directory_list(write)?,
        })
    }

    pub fn read(&self) -> &[String] {
        &self.read
    }

    pub fn write(&self) -> &[String] {
        &self.write
    }

    /// Entries of `list` that cover `paths`, in list order.  Fails on the
    /// first path no entry covers.
    fn covering<'a>(
        list: &'a [String],
        fallback: &'a [String],
        paths: &[String],
        kind: &str,
        title: &str,
    ) -> Result<Vec<&'a str>> {
        let mut used: Vec<&str> = Vec::new();
        for path in paths {
            let entry = list
                .iter()
                .chain(fallback)
                .find(|dir| is_within(path, dir))
                .ok_or_else(|| {
                    Error::AccessDenied(format!(
                        "operation {:?} has no {} access to {}",
                        title, kind, path
                    ))
                })?;
            if !used.contains(&entry.as_str()) {
                used.push(entry);
            }
        }
        Ok(used)
    }
}

fn directory_list<I>(entries: I) -> Result<Vec<String>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.as_ref();
        if !is_absolute(entry) {
            return Err(Error::InvalidArgument(format!(
                "access list entry must be absolute: {:?}",
                entry
            )));
        }
        let dir = canon_directory(entry);
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    Ok(dirs)
}

/// Builds an OperationGraph one declared operation at a time.
pub struct OperationGraphGenerator {
    files: FileSystemState,
    access: Option<AccessLists>,
    graph: OperationGraph,
}

impl OperationGraphGenerator {
    /// Without access lists, declared paths are not checked.
    pub fn new(files: FileSystemState, access: Option<AccessLists>) -> Self {
        OperationGraphGenerator {
            files,
            access,
            graph: OperationGraph::new(),
        }
    }

    pub fn files(&self) -> &FileSystemState {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Declare one operation.  Relative paths resolve against
    /// `working_directory`, which must be absolute.
    pub fn create_operation(
        &mut self,
        title: &str,
        executable: &str,
        arguments: &str,
        working_directory: &str,
        declared_input: &[&str],
        declared_output: &[&str],
    ) -> Result<OperationId> {
        if !is_absolute(working_directory) {
            return Err(Error::InvalidOperation(format!(
                "working directory must be absolute: {:?}",
                working_directory
            )));
        }
        let working_directory = canon_directory(working_directory);
        let command = CommandInfo::new(working_directory, executable, arguments);
        if let Some(existing) = self.graph.find_operation(&command) {
            return Err(Error::DuplicateOperation(format!(
                "{:?} repeats the command of {:?}: {}",
                title, self.graph[existing].title, command
            )));
        }

        let inputs: Vec<String> = declared_input
            .iter()
            .map(|p| resolve(p, &command.working_directory))
            .collect();
        let outputs: Vec<String> = declared_output
            .iter()
            .map(|p| resolve(p, &command.working_directory))
            .collect();

        trace!("create operation {:?}", title);
        let (read, write): (Vec<String>, Vec<String>) = match &self.access {
            None => (Vec::new(), Vec::new()),
            Some(access) => {
                // Writers may read back what they are allowed to write.
                let read =
                    AccessLists::covering(&access.read, &access.write, &inputs, "read", title)?;
                let write = AccessLists::covering(&access.write, &[], &outputs, "write", title)?;
                trace!("read access subset:");
                for dir in &read {
                    trace!("  {}", dir);
                }
                trace!("write access subset:");
                for dir in &write {
                    trace!("  {}", dir);
                }
                (
                    read.into_iter().map(str::to_owned).collect(),
                    write.into_iter().map(str::to_owned).collect(),
                )
            }
        };
        let read_access = self.intern_all(&read)?;
        let write_access = self.intern_all(&write)?;

        let declared_input = self.intern_all(&inputs)?;
        let declared_output = self.intern_all(&outputs)?;
        let id = OperationId::checked_from_index(self.graph.len()).ok_or_else(|| {
            Error::InvalidOperation(format!("no operation id left for {:?}", title))
        })?;
        let mut operation = OperationInfo::new(
            id,
            title.to_string(),
            command,
            declared_input,
            declared_output,
        );
        operation.read_access = read_access;
        operation.write_access = write_access;
        Ok(self.graph.add_operation(operation))
    }

    fn intern_all(&mut self, paths: &[String]) -> Result<Vec<FileId>> {
        paths.iter().map(|p| self.files.to_file_id(p)).collect()
    }

    /// Derive the edges between all declared operations and produce the
    /// final graph.
    pub fn build_graph(self) -> Result<OperationGraph> {
        let OperationGraphGenerator {
            files, mut graph, ..
        } = self;

        let mut parents = collect_producers(&files, &graph)?;
        let order = topological_order(&graph, &parents)?;
        reduce_transitive(&mut parents, &order);

        let mut roots = Vec::new();
        for index in 0..graph.len() {
            let id = OperationId::from(index);
            for &parent in &parents[index] {
                debug!("edge {:?} -> {:?}", graph[parent].title, graph[id].title);
                graph[parent].children.push(id);
            }
            let op = &mut graph[id];
            op.dependency_count = parents[index].len() as u32;
            if op.dependency_count == 0 {
                op.dependency_count = 1;
                roots.push(id);
            }
        }
        graph.set_root_operations(roots);

        graph.compact_files(&files)?;
        Ok(graph)
    }
}

/// For every operation (by arena index), the operations that produce a file
/// or an enclosing directory it touches.  Sorted, without duplicates or
/// self references.
fn collect_producers(
    files: &FileSystemState,
    graph: &OperationGraph,
) -> Result<Vec<Vec<OperationId>>> {
    let mut output_file_lookup: FxHashMap<FileId, Vec<OperationId>> = FxHashMap::default();
    let mut output_directory_lookup: FxHashMap<FileId, Vec<OperationId>> = FxHashMap::default();
    for op in graph.operations() {
        for &output in &op.declared_output {
            let lookup = if is_directory(files.get_file_path(output)?) {
                &mut output_directory_lookup
            } else {
                &mut output_file_lookup
            };
            lookup.entry(output).or_default().push(op.id);
        }
    }

    let directory_producers = |path: &str, found: &mut Vec<OperationId>| {
        let mut current = parent_directory(path);
        while let Some(dir) = current {
            if let Some(id) = files.try_find_file_id(dir) {
                if let Some(ops) = output_directory_lookup.get(&id) {
                    found.extend_from_slice(ops);
                }
            }
            current = parent_directory(dir);
        }
    };

    let mut all = Vec::with_capacity(graph.len());
    for op in graph.operations() {
        let mut found = Vec::new();
        for &input in &op.declared_input {
            if let Some(ops) = output_file_lookup.get(&input) {
                found.extend_from_slice(ops);
            }
            if let Some(ops) = output_directory_lookup.get(&input) {
                found.extend_from_slice(ops);
            }
            directory_producers(files.get_file_path(input)?, &mut found);
        }
        for &output in &op.declared_output {
            directory_producers(files.get_file_path(output)?, &mut found);
        }
        found.retain(|&id| id != op.id);
        found.sort_unstable();
        found.dedup();
        all.push(found);
    }
    Ok(all)
}

/// Kahn's algorithm over the producer edges.  Fails with the members of one
/// cycle if the edges do not form a DAG.
fn topological_order(
    graph: &OperationGraph,
    parents: &[Vec<OperationId>],
) -> Result<Vec<OperationId>> {
    let n = parents.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut pending: Vec<usize> = Vec::with_capacity(n);
    for (index, ps) in parents.iter().enumerate() {
        for p in ps {
            successors[p.0 as usize - 1].push(index);
        }
        pending.push(ps.len());
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(index) = queue.pop_front() {
        order.push(OperationId::from(index));
        for &s in &successors[index] {
            pending[s] -= 1;
            if pending[s] == 0 {
                queue.push_back(s);
            }
        }
    }
    if order.len() == n {
        return Ok(order);
    }

    // Every unordered node has an unordered parent, so walking parents from
    // any of them must revisit a node.
    let mut position: Vec<Option<usize>> = vec![None; n];
    let mut walk: Vec<usize> = Vec::new();
    let mut current = (0..n).find(|&i| pending[i] > 0).unwrap_or(0);
    while position[current].is_none() {
        position[current] = Some(walk.len());
        walk.push(current);
        current = match parents[current]
            .iter()
            .map(|p| p.0 as usize - 1)
            .find(|&p| pending[p] > 0)
        {
            Some(p) => p,
            None => break,
        };
    }
    let start = position[current].unwrap_or(0);
    let mut names: Vec<&str> = walk[start..]
        .iter()
        .rev()
        .map(|&i| graph[OperationId::from(i)].title.as_str())
        .collect();
    if let Some(&first) = names.first() {
        names.push(first);
    }
    Err(Error::CircularDependency(names.join(" -> ")))
}

/// Drop each edge p -> c where p already reaches another parent of c.
fn reduce_transitive(parents: &mut [Vec<OperationId>], order: &[OperationId]) {
    let n = parents.len();
    let mut visited: Vec<usize> = vec![usize::MAX; n];
    let mut stack: Vec<usize> = Vec::new();
    for (stamp, id) in order.iter().enumerate() {
        let index = id.0 as usize - 1;
        if parents[index].len() < 2 {
            continue;
        }
        // Mark every strict ancestor of every parent.
        for p in &parents[index] {
            stack.extend(parents[p.0 as usize - 1].iter().map(|a| a.0 as usize - 1));
        }
        while let Some(a) = stack.pop() {
            if visited[a] == stamp {
                continue;
            }
            visited[a] = stamp;
            stack.extend(parents[a].iter().map(|g| g.0 as usize - 1));
        }
        parents[index].retain(|p| visited[p.0 as usize - 1] != stamp);
    }
}
