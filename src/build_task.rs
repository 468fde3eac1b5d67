//! Named build tasks and the manager that runs them in dependency order.
//!
//! Tasks are registered up front in a TaskRegistry; each declares which
//! tasks it must run before or after.  Running a task is what feeds
//! operations into the OperationGraphGenerator.

use crate::error::{Error, Result};
use crate::generate::OperationGraphGenerator;
use crate::schedule::ReadyQueue;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Build parameters handed to every task, e.g. language, version, source
/// files.  Opaque to this crate.
pub type Parameters = BTreeMap<String, String>;

/// What a running task gets to work with.
pub struct TaskContext<'a> {
    pub parameters: &'a Parameters,
    pub generator: &'a mut OperationGraphGenerator,
}

pub trait BuildTask {
    fn execute(&mut self, context: &mut TaskContext<'_>) -> anyhow::Result<()>;
}

type TaskFactory = Box<dyn Fn() -> Box<dyn BuildTask>>;

struct TaskRegistration {
    name: String,
    run_before: Vec<String>,
    run_after: Vec<String>,
    factory: TaskFactory,
}

/// The table of known tasks, filled in by whatever extensions are linked
/// into the driver.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskRegistration>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, T>(
        &mut self,
        name: &str,
        run_before: &[&str],
        run_after: &[&str],
        factory: F,
    ) -> Result<()>
    where
        F: Fn() -> T + 'static,
        T: BuildTask + 'static,
    {
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(Error::InvalidArgument(format!(
                "task {:?} registered twice",
                name
            )));
        }
        self.tasks.push(TaskRegistration {
            name: name.to_string(),
            run_before: run_before.iter().map(|s| s.to_string()).collect(),
            run_after: run_after.iter().map(|s| s.to_string()).collect(),
            factory: Box::new(move || Box::new(factory()) as Box<dyn BuildTask>),
        });
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

pub struct BuildTaskContainer {
    pub name: String,
    pub task: Box<dyn BuildTask>,
    pub run_before_list: Vec<String>,
    pub run_after_list: Vec<String>,
    /// Own run_after_list plus every task naming this one in its
    /// run_before_list.
    pub run_after_closure_list: Vec<String>,
    pub has_run: bool,
}

impl std::fmt::Debug for BuildTaskContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildTaskContainer")
            .field("name", &self.name)
            .field("run_before_list", &self.run_before_list)
            .field("run_after_list", &self.run_after_list)
            .field("run_after_closure_list", &self.run_after_closure_list)
            .field("has_run", &self.has_run)
            .finish()
    }
}

pub struct BuildTaskManager {
    tasks: Vec<BuildTaskContainer>,
    lookup: FxHashMap<String, usize>,
}

impl BuildTaskManager {
    /// Instantiate every registered task and compute the run-after
    /// closures.  Names of unknown tasks in before/after lists are ignored.
    pub fn new(registry: &TaskRegistry) -> Self {
        let lookup: FxHashMap<String, usize> = registry
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        let mut closures: Vec<Vec<String>> = registry
            .tasks
            .iter()
            .map(|t| {
                t.run_after
                    .iter()
                    .filter(|name| {
                        let known = lookup.contains_key(name.as_str());
                        if !known {
                            debug!("task {:?} runs after unknown task {:?}", t.name, name);
                        }
                        known
                    })
                    .cloned()
                    .collect()
            })
            .collect();
        for t in &registry.tasks {
            for before in &t.run_before {
                match lookup.get(before) {
                    Some(&i) => {
                        if !closures[i].contains(&t.name) {
                            closures[i].push(t.name.clone());
                        }
                    }
                    None => debug!("task {:?} runs before unknown task {:?}", t.name, before),
                }
            }
        }
        for closure in &mut closures {
            let mut seen = Vec::with_capacity(closure.len());
            closure.retain(|name| {
                if seen.contains(name) {
                    false
                } else {
                    seen.push(name.clone());
                    true
                }
            });
        }

        let tasks = registry
            .tasks
            .iter()
            .zip(closures)
            .map(|(t, closure)| BuildTaskContainer {
                name: t.name.clone(),
                task: (t.factory)(),
                run_before_list: t.run_before.clone(),
                run_after_list: t.run_after.clone(),
                run_after_closure_list: closure,
                has_run: false,
            })
            .collect();
        BuildTaskManager { tasks, lookup }
    }

    pub fn tasks(&self) -> &[BuildTaskContainer] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&BuildTaskContainer> {
        self.lookup.get(name).map(|&i| &self.tasks[i])
    }

    /// Run every task once, each after all tasks in its closure.  Returns
    /// the names in the order they ran.
    pub fn execute(
        &mut self,
        parameters: &Parameters,
        generator: &mut OperationGraphGenerator,
    ) -> Result<Vec<String>> {
        if let Some(t) = self.tasks.iter().find(|t| t.has_run) {
            return Err(Error::InvalidOperation(format!(
                "task {:?} already ran in this pass",
                t.name
            )));
        }

        let predecessors: Vec<Vec<usize>> = self
            .tasks
            .iter()
            .map(|t| {
                t.run_after_closure_list
                    .iter()
                    .map(|name| self.lookup[name])
                    .collect()
            })
            .collect();
        let mut queue = ReadyQueue::from_predecessors(&predecessors);

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(index) = queue.start_next() {
            let container = &mut self.tasks[index];
            info!("running task {}", container.name);
            let mut context = TaskContext {
                parameters,
                generator: &mut *generator,
            };
            container
                .task
                .execute(&mut context)
                .map_err(|error| Error::TaskFailed {
                    name: container.name.clone(),
                    error,
                })?;
            container.has_run = true;
            order.push(container.name.clone());
            queue.finish(index);
        }

        if let Some(stuck) = queue.stuck() {
            let names: Vec<&str> = stuck.iter().map(|&i| self.tasks[i].name.as_str()).collect();
            return Err(Error::DependencyDeadlock(format!(
                "tasks cannot be ordered: {}",
                names.join(", ")
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileSystemState;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Record {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }
    impl BuildTask for Record {
        fn execute(&mut self, _context: &mut TaskContext<'_>) -> anyhow::Result<()> {
            self.log.borrow_mut().push(self.name);
            Ok(())
        }
    }

    fn register(
        registry: &mut TaskRegistry,
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
        before: &[&str],
        after: &[&str],
    ) {
        let log = log.clone();
        registry
            .register(name, before, after, move || Record {
                name,
                log: log.clone(),
            })
            .unwrap();
    }

    fn generator() -> OperationGraphGenerator {
        OperationGraphGenerator::new(FileSystemState::new(), None)
    }

    #[test]
    fn closure_merges_run_before() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TaskRegistry::new();
        register(&mut registry, &log, "build", &[], &["resolve"]);
        register(&mut registry, &log, "resolve", &["build", "missing"], &[]);
        register(&mut registry, &log, "recipe", &["build"], &[]);
        let manager = BuildTaskManager::new(&registry);
        assert_eq!(
            manager.task("build").unwrap().run_after_closure_list,
            vec!["resolve", "recipe"]
        );
        assert!(manager.task("resolve").unwrap().run_after_closure_list.is_empty());
    }

    #[test]
    fn runs_in_dependency_then_registration_order() -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TaskRegistry::new();
        register(&mut registry, &log, "link", &[], &["compile"]);
        register(&mut registry, &log, "compile", &[], &["resolve"]);
        register(&mut registry, &log, "docs", &[], &[]);
        register(&mut registry, &log, "resolve", &["compile"], &[]);
        let mut manager = BuildTaskManager::new(&registry);
        let order = manager.execute(&Parameters::new(), &mut generator())?;
        assert_eq!(order, vec!["docs", "resolve", "compile", "link"]);
        assert_eq!(*log.borrow(), vec!["docs", "resolve", "compile", "link"]);
        assert!(manager.tasks().iter().all(|t| t.has_run));
        Ok(())
    }

    #[test]
    fn failing_task_stops_the_pass() {
        struct Fail;
        impl BuildTask for Fail {
            fn execute(&mut self, _context: &mut TaskContext<'_>) -> anyhow::Result<()> {
                anyhow::bail!("recipe missing language")
            }
        }
        let mut registry = TaskRegistry::new();
        registry.register("bad", &[], &[], || Fail).unwrap();
        let mut manager = BuildTaskManager::new(&registry);
        match manager.execute(&Parameters::new(), &mut generator()) {
            Err(Error::TaskFailed { name, .. }) => assert_eq!(name, "bad"),
            other => panic!("expected task failure, got {:?}", other.map(|_| ())),
        }
        assert!(!manager.tasks()[0].has_run);
    }

    #[test]
    fn duplicate_registration() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = TaskRegistry::new();
        register(&mut registry, &log, "a", &[], &[]);
        let l = log.clone();
        let err = registry
            .register("a", &[], &[], move || Record {
                name: "a",
                log: l.clone(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
