//! Evaluate phase over a target directory, with an in-memory file system
//! and a runner that only pretends to execute commands.

use opgraph::fs::{FileSystem, MTime};
use opgraph::graph::CommandInfo;
use opgraph::load::{self, TargetLayout};
use opgraph::process::{ObservedAccess, ProcessRunner, TaskResult, Termination};
use opgraph::progress::NoProgress;
use opgraph::{db, BuildTask, Error, Parameters, TaskContext, TaskRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

/// Memory-backed file system with a logical clock for timestamps.
#[derive(Default)]
struct TestFileSystem {
    clock: AtomicU64,
    files: Mutex<HashMap<String, u64>>,
}

impl TestFileSystem {
    fn touch(&self, path: &str) {
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.lock().unwrap().insert(path.to_string(), now);
    }

    fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }
}

impl FileSystem for TestFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match self.files.lock().unwrap().get(path) {
            Some(&t) => MTime::Stamp(UNIX_EPOCH + Duration::from_secs(t)),
            None => MTime::Missing,
        })
    }
}

/// Treats the arguments as the list of files the command writes.
struct TestRunner {
    fs: Arc<TestFileSystem>,
    ran: Mutex<Vec<String>>,
    fail: Mutex<Vec<String>>,
    /// Extra inputs reported as observed, by executable.
    observed: HashMap<String, Vec<String>>,
}

impl TestRunner {
    fn new(fs: &Arc<TestFileSystem>) -> Self {
        TestRunner {
            fs: fs.clone(),
            ran: Mutex::new(Vec::new()),
            fail: Mutex::new(Vec::new()),
            observed: HashMap::new(),
        }
    }

    fn take_ran(&self) -> Vec<String> {
        std::mem::take(&mut *self.ran.lock().unwrap())
    }
}

impl ProcessRunner for TestRunner {
    fn run(&self, command: &CommandInfo) -> anyhow::Result<TaskResult> {
        self.ran.lock().unwrap().push(command.executable.clone());
        if self.fail.lock().unwrap().contains(&command.executable) {
            return Ok(TaskResult {
                termination: Termination::Failure,
                output: b"error: no\n".to_vec(),
                observed: None,
            });
        }
        let outputs: Vec<String> = command
            .arguments
            .split_whitespace()
            .map(str::to_string)
            .collect();
        for out in &outputs {
            self.fs.touch(out);
        }
        let observed = self.observed.get(&command.executable).map(|extra| ObservedAccess {
            input: extra.clone(),
            output: outputs,
        });
        Ok(TaskResult {
            termination: Termination::Success,
            output: Vec::new(),
            observed,
        })
    }
}

/// Declares a fixed list of (executable, inputs, outputs) operations.
struct Declare(Vec<(&'static str, Vec<&'static str>, Vec<&'static str>)>);

impl BuildTask for Declare {
    fn execute(&mut self, context: &mut TaskContext<'_>) -> anyhow::Result<()> {
        for (exe, inputs, outputs) in &self.0 {
            context
                .generator
                .create_operation(exe, exe, &outputs.join(" "), "/w/", inputs, outputs)?;
        }
        Ok(())
    }
}

fn operations() -> Vec<(&'static str, Vec<&'static str>, Vec<&'static str>)> {
    vec![
        ("compile", vec!["/w/a.c"], vec!["/w/a.o"]),
        ("link", vec!["/w/a.o"], vec!["/w/app"]),
        ("docs", vec!["/w/a.md"], vec!["/w/a.html"]),
    ]
}

fn generate(
    layout: &TargetLayout,
    ops: Vec<(&'static str, Vec<&'static str>, Vec<&'static str>)>,
) -> anyhow::Result<()> {
    let mut registry = TaskRegistry::new();
    let ops = Mutex::new(Some(ops));
    registry.register("declare", &[], &[], move || {
        Declare(ops.lock().unwrap().take().unwrap_or_default())
    })?;
    load::generate(layout, &registry, &Parameters::new())?;
    Ok(())
}

struct Space {
    _dir: tempfile::TempDir,
    layout: TargetLayout,
    fs: Arc<TestFileSystem>,
}

impl Space {
    fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let layout = TargetLayout::new(dir.path());
        let fs = Arc::new(TestFileSystem::default());
        for src in ["/w/a.c", "/w/a.md"] {
            fs.touch(src);
        }
        Ok(Space {
            _dir: dir,
            layout,
            fs,
        })
    }

    fn evaluate(&self, runner: &Arc<TestRunner>) -> opgraph::Result<Option<usize>> {
        self.evaluate_with(runner, None)
    }

    fn evaluate_with(
        &self,
        runner: &Arc<TestRunner>,
        cancel: Option<&AtomicBool>,
    ) -> opgraph::Result<Option<usize>> {
        let mut progress = NoProgress::default();
        load::evaluate(
            &self.layout,
            &*self.fs,
            runner.clone(),
            &mut progress,
            1,
            cancel,
        )
    }
}

#[test]
fn incremental_rebuild() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));

    assert_eq!(space.evaluate(&runner)?, Some(3));
    assert_eq!(runner.take_ran(), vec!["compile", "link", "docs"]);

    assert_eq!(space.evaluate(&runner)?, Some(0));
    assert!(runner.take_ran().is_empty());

    space.fs.touch("/w/a.c");
    assert_eq!(space.evaluate(&runner)?, Some(2));
    assert_eq!(runner.take_ran(), vec!["compile", "link"]);

    space.fs.remove("/w/a.html");
    assert_eq!(space.evaluate(&runner)?, Some(1));
    assert_eq!(runner.take_ran(), vec!["docs"]);
    Ok(())
}

#[test]
fn results_are_persisted() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    space.evaluate(&runner)?;

    let results = db::load(&space.layout.result_graph())?;
    assert!(results.operations().all(|op| op.was_successful_run));
    for (index, (id, _)) in results.referenced_files().iter().enumerate() {
        assert_eq!(id.0 as usize, index + 1);
    }
    let generated = db::load(&space.layout.evaluate_graph())?;
    assert!(generated.operations().all(|op| !op.was_successful_run));
    Ok(())
}

#[test]
fn failure_keeps_progress() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    runner.fail.lock().unwrap().push("link".to_string());

    assert_eq!(space.evaluate(&runner)?, None);
    assert_eq!(runner.take_ran(), vec!["compile", "link"]);

    runner.fail.lock().unwrap().clear();
    assert_eq!(space.evaluate(&runner)?, Some(2));
    assert_eq!(runner.take_ran(), vec!["link", "docs"]);
    Ok(())
}

#[test]
fn observed_inputs_are_tracked() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let mut runner = TestRunner::new(&space.fs);
    runner
        .observed
        .insert("compile".to_string(), vec!["a.c".to_string(), "a.h".to_string()]);
    let runner = Arc::new(runner);
    space.fs.touch("/w/a.h");

    assert_eq!(space.evaluate(&runner)?, Some(3));
    runner.take_ran();
    let results = db::load(&space.layout.result_graph())?;
    let files = db::restore_files(&results)?;
    assert!(files.try_find_file_id("/w/a.h").is_some());

    // A header nobody declared still triggers the compile.
    space.fs.touch("/w/a.h");
    assert_eq!(space.evaluate(&runner)?, Some(2));
    assert_eq!(runner.take_ran(), vec!["compile", "link"]);
    Ok(())
}

#[test]
fn corrupt_results_force_full_rebuild() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    space.evaluate(&runner)?;
    runner.take_ran();

    let path = space.layout.result_graph();
    let mut bytes = std::fs::read(&path)?;
    bytes.truncate(bytes.len() - 3);
    std::fs::write(&path, bytes)?;

    assert_eq!(space.evaluate(&runner)?, Some(3));
    Ok(())
}

#[test]
fn corrupt_generated_graph_is_fatal() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    std::fs::write(space.layout.evaluate_graph(), b"BOG\0")?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    assert!(matches!(
        space.evaluate(&runner),
        Err(Error::CorruptFile(_))
    ));
    Ok(())
}

#[test]
fn regenerated_graph_keeps_matching_results() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    space.evaluate(&runner)?;
    runner.take_ran();

    // The link now also reads a library; the other operations are unchanged.
    space.fs.touch("/w/lib.a");
    generate(
        &space.layout,
        vec![
            ("docs", vec!["/w/a.md"], vec!["/w/a.html"]),
            ("compile", vec!["/w/a.c"], vec!["/w/a.o"]),
            ("link", vec!["/w/a.o", "/w/lib.a"], vec!["/w/app"]),
        ],
    )?;
    assert_eq!(space.evaluate(&runner)?, Some(1));
    assert_eq!(runner.take_ran(), vec!["link"]);
    Ok(())
}

#[test]
fn cancellation_saves_results() -> anyhow::Result<()> {
    let space = Space::new()?;
    generate(&space.layout, operations())?;
    let runner = Arc::new(TestRunner::new(&space.fs));
    let cancel = AtomicBool::new(true);
    assert!(matches!(
        space.evaluate_with(&runner, Some(&cancel)),
        Err(Error::Interrupted)
    ));
    assert!(runner.take_ran().is_empty());
    assert!(space.layout.result_graph().exists());
    Ok(())
}
