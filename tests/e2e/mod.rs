//! Support code for e2e tests, which generate a graph through the library
//! and then run the opgraph binary against it.

mod basic;
mod missing;

use opgraph::load::{self, TargetLayout};
use opgraph::{BuildTask, Parameters, TaskContext, TaskRegistry};
use std::sync::Mutex;

pub fn opgraph_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_opgraph"));
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = String::from_utf8_lossy(&out.stdout);
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// One operation run through the shell: `command` in the space's root.
pub struct Op {
    pub title: &'static str,
    pub command: String,
    pub inputs: Vec<&'static str>,
    pub outputs: Vec<&'static str>,
}

#[cfg(unix)]
pub fn touch(title: &'static str, inputs: Vec<&'static str>, output: &'static str) -> Op {
    Op {
        title,
        command: format!("touch {}", output),
        inputs,
        outputs: vec![output],
    }
}

struct Declare {
    root: String,
    ops: Vec<Op>,
}

impl BuildTask for Declare {
    fn execute(&mut self, context: &mut TaskContext<'_>) -> anyhow::Result<()> {
        for op in &self.ops {
            let (exe, args) = op.command.split_once(' ').unwrap_or((op.command.as_str(), ""));
            context
                .generator
                .create_operation(op.title, exe, args, &self.root, &op.inputs, &op.outputs)?;
        }
        Ok(())
    }
}

/// Manages a temporary target directory.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// The directory in the form operation paths use.
    pub fn root(&self) -> String {
        let mut root = self.dir.path().to_string_lossy().replace('\\', "/");
        if !root.ends_with('/') {
            root.push('/');
        }
        root
    }

    pub fn path(&self, path: &str) -> std::path::PathBuf {
        self.dir.path().join(path)
    }

    pub fn layout(&self) -> TargetLayout {
        TargetLayout::new(self.dir.path())
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.path(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(path))
    }

    /// Set a file's mtime to `secs` after the epoch.
    pub fn set_mtime(&self, path: &str, secs: i64) -> std::io::Result<()> {
        filetime::set_file_mtime(self.path(path), filetime::FileTime::from_unix_time(secs, 0))
    }

    /// Run the generate phase with `ops` as the only declared operations.
    pub fn generate(&self, ops: Vec<Op>) -> anyhow::Result<()> {
        let mut registry = TaskRegistry::new();
        let root = self.root();
        let ops = Mutex::new(Some(ops));
        registry.register("declare", &[], &[], move || Declare {
            root: root.clone(),
            ops: ops.lock().unwrap().take().unwrap_or_default(),
        })?;
        load::generate(&self.layout(), &registry, &Parameters::new())?;
        Ok(())
    }

    /// Invoke opgraph in the space, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the evaluation failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("evaluate failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}
