//! Running a graph against a data store.
//!
//! The executor walks the topological layers of a graph. Tasks of a layer
//! may run concurrently, but a layer only starts once every task of the
//! previous one has finished, because a task may consume the outputs of any
//! earlier layer. Between layers, channels nobody needs anymore are released
//! from the store.
mod diagnostics;

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Value;
use crate::error::{ExecutionError, RunError, SliceError, StoreError, TaskError};
use crate::graph::Graph;
use crate::store::{self, DataStore, Version};
use crate::task::Task;

pub use diagnostics::{Diagnostics, TaskExecution};

/// Cooperative cancellation of a run. The executor checks the token before
/// starting each layer; tasks already running are allowed to finish.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which part of the graph to run and how to load it.
///
/// Every filter narrows the graph, filters are combined by intersection.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub tags: Vec<String>,
    pub task_names: Vec<String>,
    pub from_nodes: Vec<String>,
    pub to_nodes: Vec<String>,
    pub from_inputs: Vec<String>,
    /// Explicit versions to load for some channels, latest otherwise.
    pub load_versions: BTreeMap<String, Version>,
    pub cancel: Option<CancelToken>,
}

fn strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Vec<String> {
    items.into_iter().map(Into::into).collect()
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = strings(tags);
        self
    }

    pub fn task_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.task_names = strings(names);
        self
    }

    pub fn from_nodes<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.from_nodes = strings(names);
        self
    }

    pub fn to_nodes<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.to_nodes = strings(names);
        self
    }

    pub fn from_inputs<S: Into<String>>(mut self, channels: impl IntoIterator<Item = S>) -> Self {
        self.from_inputs = strings(channels);
        self
    }

    pub fn load_version(mut self, channel: impl Into<String>, version: impl Into<Version>) -> Self {
        self.load_versions.insert(channel.into(), version.into());
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The part of `graph` selected by these options.
    pub fn resolve(&self, graph: &Graph) -> Result<Graph, ExecutionError> {
        let mut filtered = graph.clone();

        if !self.tags.is_empty() {
            filtered = (&filtered & &graph.only_nodes_with_tags(&self.tags)?)?;
        }
        if !self.task_names.is_empty() {
            filtered = (&filtered & &graph.only_nodes(&self.task_names)?)?;
        }
        if !self.from_nodes.is_empty() {
            filtered = (&filtered & &graph.from_nodes(&self.from_nodes)?)?;
        }
        if !self.to_nodes.is_empty() {
            filtered = (&filtered & &graph.to_nodes(&self.to_nodes)?)?;
        }
        if !self.from_inputs.is_empty() {
            filtered = (&filtered & &graph.from_inputs(&self.from_inputs)?)?;
        }

        if filtered.is_empty() {
            let selectors = [&self.tags, &self.task_names, &self.from_nodes, &self.to_nodes, &self.from_inputs]
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            return Err(SliceError::Empty {
                operation: "run",
                selectors,
            }
            .into());
        }

        Ok(filtered)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Lifecycle of a run. A run never goes back to an earlier state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Summary of a successful run.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    /// Task names in completion order.
    pub completed: Vec<String>,
    /// Channels released from the store during the run.
    pub released: Vec<String>,
    /// Final outputs of the graph that ran. They are left in the store.
    pub outputs: BTreeSet<String>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Copy, Debug)]
enum Mode {
    Sequential,
    Parallel { max_workers: usize },
}

/// Runs graphs layer by layer, either on the calling thread or on a
/// dedicated thread pool.
#[derive(Clone, Debug)]
pub struct Executor {
    mode: Mode,
    async_io: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::parallel(0)
    }
}

impl Executor {
    /// Runs one task at a time, in the stable topological order of the graph.
    pub fn sequential() -> Self {
        Self {
            mode: Mode::Sequential,
            async_io: false,
        }
    }

    /// Runs the tasks of a layer concurrently on at most `max_workers`
    /// threads. Zero means one worker per available core.
    pub fn parallel(max_workers: usize) -> Self {
        let max_workers = match max_workers {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };

        Self {
            mode: Mode::Parallel { max_workers },
            async_io: false,
        }
    }

    /// Loads the inputs of a task concurrently.
    pub fn async_io(mut self, async_io: bool) -> Self {
        self.async_io = async_io;
        self
    }

    /// Threads needed to run `graph`: a layer can't run more tasks at once
    /// than it has, so the widest possible layer bounds the pool.
    fn workers_for(&self, graph: &Graph) -> Option<usize> {
        match self.mode {
            Mode::Sequential => None,
            Mode::Parallel { max_workers } => {
                let required = graph.len() - graph.layer_indices().len() + 1;
                Some(required.min(max_workers).max(1))
            }
        }
    }

    pub fn run(&self, graph: &Graph, store: &dyn DataStore, options: &RunOptions) -> Result<RunReport, RunError> {
        let graph = options.resolve(graph).map_err(abort)?;

        let missing = missing_inputs(&graph, store).map_err(abort)?;
        if !missing.is_empty() {
            return Err(abort(ExecutionError::MissingInputs(missing)));
        }

        let pool = match self.workers_for(&graph) {
            Some(workers) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("nagare-worker-{i}"))
                    .build()
                    .map_err(|e| abort(e.into()))?,
            ),
            None => None,
        };

        let context = TaskRunner {
            store,
            versions: &options.load_versions,
            async_io: self.async_io,
            style: crate::utils::get_style_task(),
        };

        let layers = graph.grouped_tasks();
        let releases = release_schedule(&graph);
        let total = graph.len();

        tracing::info!(
            tasks = total,
            layers = layers.len(),
            workers = pool.as_ref().map_or(1, ThreadPool::current_num_threads),
            "Running pipeline"
        );

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(total as u64);
        root_span.pb_set_style(&crate::utils::get_style_run());
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let mut completed = Vec::with_capacity(total);
        let mut released = Vec::new();
        let mut diagnostics = Diagnostics::default();

        for (index, layer) in layers.iter().enumerate() {
            if options.is_cancelled() {
                let error = ExecutionError::Cancelled {
                    completed: completed.len(),
                };
                return Err(failure(&graph, error, completed));
            }

            tracing::debug!(state = ?RunState::Running, layer = index, tasks = layer.len());

            let outcomes = match &pool {
                Some(pool) => context.run_parallel(pool, layer),
                None => context.run_sequential(layer),
            };

            let mut error = None;
            for outcome in outcomes {
                diagnostics.execution_times.insert(
                    outcome.name.clone(),
                    TaskExecution {
                        start: outcome.start,
                        duration: outcome.duration,
                    },
                );

                match outcome.result {
                    Ok(()) => {
                        completed.push(outcome.name);
                        root_span.pb_inc(1);
                        tracing::info!("Completed {} out of {} tasks", completed.len(), total);
                    }
                    Err(e) => {
                        tracing::error!("Task '{}' failed: {e}", outcome.name);
                        error.get_or_insert(e);
                    }
                }
            }

            if let Some(error) = error {
                tracing::debug!(state = ?RunState::Failed, layer = index);
                return Err(failure(&graph, error, completed));
            }

            for channel in releases.get(&index).into_iter().flatten() {
                store.release(channel).map_err(|source| {
                    let error = ExecutionError::Store {
                        context: "releasing".into(),
                        channel: channel.clone(),
                        source,
                    };
                    failure(&graph, error, completed.clone())
                })?;
                tracing::debug!("Released {channel}");
                released.push(channel.clone());
            }
        }

        tracing::info!("Pipeline execution completed successfully.");

        Ok(RunReport {
            state: RunState::Completed,
            completed,
            released,
            outputs: graph.outputs(),
            diagnostics,
        })
    }

    /// Runs only the part of `graph` whose data is missing from `store`.
    ///
    /// Rebuilds every task producing a missing channel along with everything
    /// downstream of it. Missing channels consumed by those tasks are rebuilt
    /// too, through the chain of tasks producing them. Nothing runs when the
    /// store already holds every channel.
    pub fn run_only_missing(
        &self,
        graph: &Graph,
        store: &dyn DataStore,
        options: &RunOptions,
    ) -> Result<RunReport, RunError> {
        let graph = options.resolve(graph).map_err(abort)?;
        let to_rerun = only_missing(&graph, store).map_err(abort)?;

        if to_rerun.is_empty() {
            tracing::info!("Nothing is missing from the store, no task to run.");
            return Ok(RunReport {
                state: RunState::Completed,
                completed: Vec::new(),
                released: Vec::new(),
                outputs: BTreeSet::new(),
                diagnostics: Diagnostics::default(),
            });
        }

        tracing::info!(tasks = to_rerun.len(), "Rebuilding missing data");

        // the filters were already applied
        let options = RunOptions {
            load_versions: options.load_versions.clone(),
            cancel: options.cancel.clone(),
            ..RunOptions::default()
        };
        self.run(&to_rerun, store, &options)
    }
}

fn abort(source: ExecutionError) -> RunError {
    RunError {
        source,
        completed: Vec::new(),
        resume_from: Vec::new(),
    }
}

/// Wraps `source` with the run progress and a suggestion on where to resume.
fn failure(graph: &Graph, source: ExecutionError, completed: Vec<String>) -> RunError {
    let resume_from = suggest_resume(graph, &completed);

    let remaining = graph.len() - completed.len();
    if !resume_from.is_empty() {
        tracing::warn!(
            "There are {remaining} tasks that have not run.\n\
             You can resume the pipeline run with `RunOptions::from_nodes({resume_from:?})`"
        );
    }

    RunError {
        source,
        completed,
        resume_from,
    }
}

/// Tasks which the rest of the graph starts from: the ones consuming the
/// free inputs of the tasks which did not complete. Nothing to suggest when
/// no task completed at all.
fn suggest_resume(graph: &Graph, completed: &[String]) -> Vec<String> {
    if completed.is_empty() {
        return Vec::new();
    }

    let done: BTreeSet<&str> = completed.iter().map(String::as_str).collect();
    let remaining: Vec<String> = graph
        .tasks()
        .into_iter()
        .map(Task::name)
        .filter(|name| !done.contains(name.as_str()))
        .collect();

    let Ok(remaining) = graph.only_nodes(&remaining) else {
        return Vec::new();
    };

    let mut start: BTreeSet<String> = match remaining.only_nodes_with_inputs(remaining.inputs()) {
        Ok(start) => start.tasks().into_iter().map(Task::name).collect(),
        Err(_) => BTreeSet::new(),
    };

    // tasks without any inputs are starting points too
    start.extend(
        remaining
            .tasks()
            .into_iter()
            .filter(|task| task.inputs().is_empty())
            .map(Task::name),
    );

    start.into_iter().collect()
}

/// Tasks of `graph` needed to rebuild the channels missing from `store`.
fn only_missing(graph: &Graph, store: &dyn DataStore) -> Result<Graph, ExecutionError> {
    let missing = absent(store, graph.data_sets(), "looking for missing data")?;
    if missing.is_empty() {
        return Ok(Graph::empty());
    }

    let producing = lenient(graph.only_nodes_with_outputs(&missing))?;
    let consuming = lenient(graph.from_inputs(&missing))?;
    let mut to_rerun = producing.union(&consuming)?;

    // missing inputs of the rebuilt part, produced somewhere upstream
    let produced = graph.all_outputs();
    let upstream: Vec<String> = absent(store, to_rerun.inputs(), "looking for missing data")?
        .into_iter()
        .filter(|channel| produced.contains(channel))
        .collect();
    if !upstream.is_empty() {
        to_rerun = to_rerun.union(&lenient(graph.to_outputs(&upstream))?)?;
    }

    Ok(to_rerun)
}

fn absent(store: &dyn DataStore, channels: BTreeSet<String>, context: &str) -> Result<Vec<String>, ExecutionError> {
    let mut missing = Vec::new();
    for channel in channels {
        let exists = store.exists(&channel).map_err(|source| ExecutionError::Store {
            context: context.into(),
            channel: channel.clone(),
            source,
        })?;
        if !exists {
            missing.push(channel);
        }
    }
    Ok(missing)
}

/// An empty slice is a valid answer here.
fn lenient(slice: Result<Graph, SliceError>) -> Result<Graph, SliceError> {
    match slice {
        Err(SliceError::Empty { .. }) => Ok(Graph::empty()),
        other => other,
    }
}

fn missing_inputs(graph: &Graph, store: &dyn DataStore) -> Result<Vec<String>, ExecutionError> {
    absent(store, graph.inputs(), "checking the pipeline inputs")
}

/// Channels to release after each layer, keyed by layer index.
///
/// A consumed channel is released after the layer of its last consumer. A
/// produced channel nobody consumes is released right after its producer.
/// Free inputs and final outputs are never released.
fn release_schedule(graph: &Graph) -> BTreeMap<usize, BTreeSet<String>> {
    let free = graph.inputs();
    let last = graph.outputs();
    let mut last_use: BTreeMap<&str, usize> = BTreeMap::new();

    let layers = graph.grouped_tasks();
    for (index, layer) in layers.iter().enumerate() {
        for task in layer {
            for input in task.inputs() {
                last_use.insert(input, index);
            }
        }
    }

    for (index, layer) in layers.iter().enumerate() {
        for task in layer {
            for output in task.outputs() {
                last_use.entry(output).or_insert(index);
            }
        }
    }

    let mut schedule: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (channel, index) in last_use {
        if !free.contains(channel) && !last.contains(channel) {
            schedule.entry(index).or_default().insert(channel.to_string());
        }
    }
    schedule
}

struct Outcome {
    name: String,
    result: Result<(), ExecutionError>,
    start: Instant,
    duration: Duration,
}

/// Everything a single task needs from the run.
struct TaskRunner<'a> {
    store: &'a dyn DataStore,
    versions: &'a BTreeMap<String, Version>,
    async_io: bool,
    style: ProgressStyle,
}

impl TaskRunner<'_> {
    /// Runs tasks one after another, stopping at the first failure.
    fn run_sequential(&self, layer: &[&Task]) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(layer.len());
        for task in layer {
            let outcome = self.run_timed(task);
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        outcomes
    }

    /// Runs all tasks of a layer on the pool and waits for every one of
    /// them, failed or not.
    fn run_parallel(&self, pool: &ThreadPool, layer: &[&Task]) -> Vec<Outcome> {
        let (sender, receiver) = channel::<Outcome>();

        pool.install(|| {
            rayon::scope(|s| {
                for &task in layer {
                    let sender = sender.clone();
                    s.spawn(move |_| {
                        // the receiver outlives the scope
                        let _ = sender.send(self.run_timed(task));
                    });
                }
            })
        });

        drop(sender);
        receiver.into_iter().collect()
    }

    fn run_timed(&self, task: &Task) -> Outcome {
        let name = task.name();

        let span = tracing::span!(Level::INFO, "task", name = %name);
        span.pb_set_style(&self.style);
        span.pb_set_message(&format!("Running {name}"));
        let _enter = span.enter();

        tracing::info!("Running task: {task}");

        let start = Instant::now();
        let result = self.run_task(task);
        let duration = start.elapsed();

        Outcome {
            name,
            result,
            start,
            duration,
        }
    }

    /// Loads, runs and saves `task`. A panic anywhere along the way, be it
    /// in the callable or in the store, fails the task.
    fn run_task(&self, task: &Task) -> Result<(), ExecutionError> {
        catch_unwind(AssertUnwindSafe(|| self.execute(task))).unwrap_or_else(|panic| {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(TaskError::Panicked {
                task: task.name(),
                message,
            }
            .into())
        })
    }

    fn execute(&self, task: &Task) -> Result<(), ExecutionError> {
        let inputs = self.load_inputs(task)?;
        let outputs = task.run(inputs)?;
        self.save_outputs(task, outputs)?;

        for channel in task.confirms() {
            self.store.confirm(channel).map_err(|source| ExecutionError::Store {
                context: format!("confirming for task '{}'", task.name()),
                channel: channel.clone(),
                source,
            })?;
        }

        Ok(())
    }

    /// Nothing is saved when any of the outputs is null.
    fn save_outputs(&self, task: &Task, outputs: BTreeMap<String, Value>) -> Result<(), ExecutionError> {
        let context = || format!("saving the outputs of task '{}'", task.name());

        if let Some(channel) = outputs.iter().find_map(|(channel, value)| value.is_null().then_some(channel)) {
            return Err(ExecutionError::Store {
                context: context(),
                channel: channel.clone(),
                source: StoreError::NullValue(channel.clone()),
            });
        }

        let save = |(channel, value): (String, Value)| -> Result<(), ExecutionError> {
            self.store.save(&channel, value).map_err(|source| ExecutionError::Store {
                context: context(),
                channel,
                source,
            })
        };

        if self.async_io && outputs.len() > 1 {
            outputs.into_par_iter().map(save).collect()
        } else {
            outputs.into_iter().map(save).collect()
        }
    }

    /// One load per declared input, repeats included.
    fn load_inputs(&self, task: &Task) -> Result<BTreeMap<String, Value>, ExecutionError> {
        let load = |channel: &str| -> Result<(String, Value), ExecutionError> {
            store::load_version(self.store, channel, self.versions.get(channel))
                .map(|value| (channel.to_string(), value))
                .map_err(|source| ExecutionError::Store {
                    context: format!("loading the inputs of task '{}'", task.name()),
                    channel: channel.to_string(),
                    source,
                })
        };

        let inputs = task.inputs();
        if self.async_io && inputs.len() > 1 {
            inputs.into_par_iter().map(load).collect()
        } else {
            inputs.into_iter().map(load).collect()
        }
    }
}
