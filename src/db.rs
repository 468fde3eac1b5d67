//! The binary operation graph file (".bog"), which carries the graph from
//! the generate phase to the evaluate phase and from one build to the next.
//!
//! Layout, all integers little-endian u32:
//!   "BOG\0" version
//!   "FIS\0" count { id path }     ids are 1..=count
//!   "ROP\0" count { id }
//!   "OPS\0" count { operation }
//! Strings are a byte length followed by UTF-8; lists are a count followed
//! by the items; booleans are 0 or 1.

use crate::error::{Error, Result};
use crate::files::{FileId, FileSystemState};
use crate::graph::{CommandInfo, OperationGraph, OperationId, OperationInfo};
use rustc_hash::FxHashSet;
use std::io::{BufWriter, Write};
use std::path::Path;

const FILE_MAGIC: &[u8; 4] = b"BOG\0";
const FILES_MAGIC: &[u8; 4] = b"FIS\0";
const ROOTS_MAGIC: &[u8; 4] = b"ROP\0";
const OPERATIONS_MAGIC: &[u8; 4] = b"OPS\0";
pub const VERSION: u32 = 5;

pub struct Writer<W: Write> {
    w: W,
}

impl<W: Write> Writer<W> {
    pub fn new(w: W) -> Self {
        Writer { w }
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    fn write_u32(&mut self, n: u32) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn write_len(&mut self, len: usize) -> std::io::Result<()> {
        let len = u32::try_from(len).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "list too long")
        })?;
        self.write_u32(len)
    }

    fn write_bool(&mut self, b: bool) -> std::io::Result<()> {
        self.write_u32(b as u32)
    }

    fn write_str(&mut self, s: &str) -> std::io::Result<()> {
        self.write_len(s.len())?;
        self.w.write_all(s.as_bytes())
    }

    fn write_file_ids(&mut self, ids: &[FileId]) -> std::io::Result<()> {
        self.write_len(ids.len())?;
        for id in ids {
            self.write_u32(id.0)?;
        }
        Ok(())
    }

    fn write_operation_ids(&mut self, ids: &[OperationId]) -> std::io::Result<()> {
        self.write_len(ids.len())?;
        for id in ids {
            self.write_u32(id.0)?;
        }
        Ok(())
    }

    fn write_operation(&mut self, op: &OperationInfo) -> std::io::Result<()> {
        self.write_u32(op.id.0)?;
        self.write_str(&op.title)?;
        self.write_str(&op.command.working_directory)?;
        self.write_str(&op.command.executable)?;
        self.write_str(&op.command.arguments)?;
        self.write_file_ids(&op.declared_input)?;
        self.write_file_ids(&op.declared_output)?;
        self.write_file_ids(&op.read_access)?;
        self.write_file_ids(&op.write_access)?;
        self.write_operation_ids(&op.children)?;
        self.write_u32(op.dependency_count)?;
        self.write_bool(op.was_successful_run)?;
        self.write_file_ids(&op.observed_input)?;
        self.write_file_ids(&op.observed_output)
    }

    /// Serialize a graph.  Every file id an operation refers to must be in
    /// the graph's referenced files, which are numbered 1..=n (see
    /// `OperationGraph::compact_files`).
    pub fn write_graph(&mut self, graph: &OperationGraph) -> Result<()> {
        let known: FxHashSet<FileId> = graph.referenced_files().iter().map(|(id, _)| *id).collect();
        for op in graph.operations() {
            if let Some(id) = op.file_ids().find(|id| !known.contains(id)) {
                return Err(Error::NotFound(format!(
                    "file id {} of operation {:?} is not a referenced file",
                    id.0, op.title
                )));
            }
        }

        let count = graph.referenced_files().len();
        if let Some((id, _)) = graph
            .referenced_files()
            .iter()
            .find(|(id, _)| id.0 == 0 || id.0 as usize > count)
        {
            return Err(Error::InvalidArgument(format!(
                "file id {} outside 1..={}; compact the graph first",
                id.0, count
            )));
        }

        self.w.write_all(FILE_MAGIC)?;
        self.write_u32(VERSION)?;

        self.w.write_all(FILES_MAGIC)?;
        self.write_len(graph.referenced_files().len())?;
        for (id, path) in graph.referenced_files() {
            self.write_u32(id.0)?;
            self.write_str(path)?;
        }

        self.w.write_all(ROOTS_MAGIC)?;
        self.write_operation_ids(graph.root_operations())?;

        self.w.write_all(OPERATIONS_MAGIC)?;
        self.write_len(graph.len())?;
        for op in graph.operations() {
            self.write_operation(op)?;
        }
        self.w.flush()?;
        Ok(())
    }
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::CorruptFile(msg.into())
}

struct Reader<'a> {
    buf: &'a [u8],
    ofs: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.ofs < n {
            return Err(corrupt(format!("unexpected end of file at byte {}", self.ofs)));
        }
        let bytes = &self.buf[self.ofs..self.ofs + n];
        self.ofs += n;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A list length, sanity checked against the bytes left so a corrupt
    /// count cannot trigger a huge allocation.
    fn read_len(&mut self, min_item_size: usize) -> Result<usize> {
        let len = self.read_u32()? as usize;
        if len.saturating_mul(min_item_size) > self.buf.len() - self.ofs {
            return Err(corrupt(format!("list of {} items overruns file", len)));
        }
        Ok(len)
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(corrupt(format!("bad boolean {}", n))),
        }
    }

    fn read_str(&mut self) -> Result<String> {
        let len = self.read_len(1)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("string is not UTF-8"))
    }

    fn read_magic(&mut self, magic: &[u8; 4]) -> Result<()> {
        let found = self.take(4)?;
        if found != magic {
            return Err(corrupt(format!(
                "expected section {:?}, found {:?}",
                String::from_utf8_lossy(&magic[..3]),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }

    fn read_file_ids(&mut self) -> Result<Vec<FileId>> {
        let len = self.read_len(4)?;
        let mut ids = Vec::with_capacity(len);
        for _ in 0..len {
            ids.push(FileId(self.read_u32()?));
        }
        Ok(ids)
    }

    fn read_operation_ids(&mut self) -> Result<Vec<OperationId>> {
        let len = self.read_len(4)?;
        let mut ids = Vec::with_capacity(len);
        for _ in 0..len {
            ids.push(OperationId(self.read_u32()?));
        }
        Ok(ids)
    }

    fn read_operation(&mut self) -> Result<OperationInfo> {
        let id = OperationId(self.read_u32()?);
        let title = self.read_str()?;
        let working_directory = self.read_str()?;
        let executable = self.read_str()?;
        let arguments = self.read_str()?;
        let declared_input = self.read_file_ids()?;
        let declared_output = self.read_file_ids()?;
        let read_access = self.read_file_ids()?;
        let write_access = self.read_file_ids()?;
        let children = self.read_operation_ids()?;
        let dependency_count = self.read_u32()?;
        let was_successful_run = self.read_bool()?;
        let observed_input = self.read_file_ids()?;
        let observed_output = self.read_file_ids()?;
        Ok(OperationInfo {
            id,
            title,
            command: CommandInfo {
                working_directory,
                executable,
                arguments,
            },
            declared_input,
            declared_output,
            read_access,
            write_access,
            children,
            dependency_count,
            was_successful_run,
            observed_input,
            observed_output,
        })
    }
}

/// Deserialize a graph, rejecting anything that does not match the layout
/// exactly or refers to ids it does not define.
pub fn read_graph(buf: &[u8]) -> Result<OperationGraph> {
    let mut r = Reader { buf, ofs: 0 };
    r.read_magic(FILE_MAGIC)?;
    let version = r.read_u32()?;
    if version != VERSION {
        return Err(corrupt(format!(
            "version {}, expected {}",
            version, VERSION
        )));
    }

    r.read_magic(FILES_MAGIC)?;
    let count = r.read_len(8)?;
    let mut files = Vec::with_capacity(count);
    let mut known: FxHashSet<FileId> = FxHashSet::default();
    for _ in 0..count {
        let id = FileId(r.read_u32()?);
        let path = r.read_str()?;
        // Ids are numbered 1..=count, so the restored table is no larger
        // than this list.
        if id.0 == 0 || id.0 as usize > count || !known.insert(id) {
            return Err(corrupt(format!("bad file id {}", id.0)));
        }
        files.push((id, path));
    }

    r.read_magic(ROOTS_MAGIC)?;
    let roots = r.read_operation_ids()?;

    r.read_magic(OPERATIONS_MAGIC)?;
    let count = r.read_len(4)?;
    let mut graph = OperationGraph::new();
    for _ in 0..count {
        let op = r.read_operation()?;
        if op.id != graph.next_id() {
            return Err(corrupt(format!(
                "operation id {} out of sequence, expected {}",
                op.id.0,
                graph.next_id().0
            )));
        }
        if let Some(id) = op.file_ids().find(|id| !known.contains(id)) {
            return Err(corrupt(format!("operation {} refers to unknown file {}", op.id.0, id.0)));
        }
        if graph.find_operation(&op.command).is_some() {
            return Err(corrupt(format!("operation {} repeats a command", op.id.0)));
        }
        graph.add_operation(op);
    }

    if r.ofs != buf.len() {
        return Err(corrupt(format!(
            "{} trailing bytes",
            buf.len() - r.ofs
        )));
    }

    let valid = |id: &OperationId| graph.operation(*id).is_some();
    if !roots.iter().all(valid) || !graph.operations().all(|op| op.children.iter().all(valid)) {
        return Err(corrupt("operation id out of range"));
    }

    graph.set_referenced_files(files);
    graph.set_root_operations(roots);
    Ok(graph)
}

pub fn write_graph_bytes(graph: &OperationGraph) -> Result<Vec<u8>> {
    let mut w = Writer::new(Vec::new());
    w.write_graph(graph)?;
    Ok(w.into_inner())
}

/// Read a graph file.
pub fn load(path: &Path) -> Result<OperationGraph> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(format!("read {}", path.display()), err))?;
    read_graph(&bytes).map_err(|err| match err {
        Error::CorruptFile(msg) => Error::CorruptFile(format!("{}: {}", path.display(), msg)),
        err => err,
    })
}

/// Like load, but a missing file is None.
pub fn load_if_exists(path: &Path) -> Result<Option<OperationGraph>> {
    if !path.exists() {
        return Ok(None);
    }
    load(path).map(Some)
}

/// Write a graph file, replacing any previous one only once the new one is
/// complete.
pub fn save(path: &Path, graph: &OperationGraph) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| Error::io(format!("create {}", parent.display()), err))?;
    }
    let tmp = path.with_extension("tmp");
    let file = std::fs::File::create(&tmp)
        .map_err(|err| Error::io(format!("create {}", tmp.display()), err))?;
    let mut w = Writer::new(BufWriter::new(file));
    w.write_graph(graph)?;
    w.into_inner()
        .flush()
        .map_err(|err| Error::io(format!("write {}", tmp.display()), err))?;
    std::fs::rename(&tmp, path)
        .map_err(|err| Error::io(format!("rename {}", path.display()), err))
}

/// Rebuild the file table a persisted graph was written with.
pub fn restore_files(graph: &OperationGraph) -> Result<FileSystemState> {
    let max = graph
        .referenced_files()
        .iter()
        .map(|(id, _)| id.0)
        .max()
        .unwrap_or(0);
    FileSystemState::from_persisted(max, graph.referenced_files().iter().cloned())
        .map_err(|err| corrupt(err.to_string()))
}
