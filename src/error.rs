use thiserror::Error;

/// Errors raised while defining or invoking a single task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task definition '{task}': {reason}")]
    Configuration { task: String, reason: String },

    #[error("Task '{task}' expected input(s) {expected:?}, but got {got:?}")]
    Inputs {
        task: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error(
        "Failed to save outputs of task '{task}': it declares {expected} output(s), \
         whereas the callable returned {found}"
    )]
    OutputArity {
        task: String,
        expected: usize,
        found: String,
    },

    #[error("Failed to save outputs of task '{task}': {reason}")]
    OutputShape { task: String, reason: String },

    #[error("Task '{task}' failed:\n{source}")]
    Callable {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },
}

/// Structural errors, raised while a graph is being built.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(
        "Pipeline tasks must have unique names. The following task names appear \
         more than once:\n\n{0}\nYou can name your tasks with `TaskBuilder::name`."
    )]
    DuplicateTasks(String),

    #[error("Task(s) {0:?} are defined more than once with different inputs or outputs")]
    ConflictingTasks(Vec<String>),

    #[error("Output(s) {0:?} are returned by more than one task. Task outputs must be unique.")]
    OutputNotUnique(Vec<String>),

    #[error("{0:?} are confirmed by more than one task. Task confirms must be unique.")]
    ConfirmNotUnique(Vec<String>),

    #[error(
        "The following channels are used with transcoding, but were referenced \
         without the separator: {0:?}"
    )]
    Transcoding(Vec<String>),

    #[error("Expected at most 1 transcoding separator, found {count} instead: '{name}'")]
    TranscodingSeparator { name: String, count: usize },

    #[error("Circular dependencies exist among these tasks: {0:?}")]
    CircularDependency(Vec<String>),
}

/// Errors raised by the slicing operations of a graph.
#[derive(Debug, Error)]
pub enum SliceError {
    #[error("Pipeline does not contain tasks named {0:?}")]
    UnknownTasks(Vec<String>),

    #[error("Pipeline does not contain channels named {0:?}")]
    UnknownChannels(Vec<String>),

    #[error("Pipeline does not contain tasks with namespace '{0}'")]
    UnknownNamespace(String),

    #[error("Slice `{operation}` with {selectors:?} resolves to no tasks")]
    Empty {
        operation: &'static str,
        selectors: Vec<String>,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Failures reported by a [`DataStore`](crate::DataStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Channel '{0}' not found in the store")]
    NotFound(String),

    #[error("Saving a null value to channel '{0}' is not allowed")]
    NullValue(String),

    #[error("Version '{version}' of channel '{name}' not found")]
    VersionNotFound { name: String, version: String },

    #[error("Store does not support versioned access, requested for channel '{0}'")]
    NotVersioned(String),

    #[error("Store lock was poisoned")]
    Poisoned,

    #[error("Unknown store type '{0}'")]
    UnknownType(String),

    #[error("Channel '{name}': {source}")]
    Backend {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors raised while an executor runs a graph.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Pipeline input(s) {0:?} not found in the store")]
    MissingInputs(Vec<String>),

    #[error("Channel '{channel}' failed while {context}:\n{source}")]
    Store {
        context: String,
        channel: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Run cancelled after {completed} task(s)")]
    Cancelled { completed: usize },

    #[error("Couldn't build the worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A failed run, with the progress it made before failing.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct RunError {
    #[source]
    pub source: ExecutionError,
    /// Tasks which completed before the failure, in completion order.
    pub completed: Vec<String>,
    /// Tasks to resume from with [`RunOptions::from_nodes`](crate::RunOptions::from_nodes).
    pub resume_from: Vec<String>,
}

/// Errors raised while remapping a modular graph.
#[derive(Debug, Error)]
pub enum ModularError {
    #[error("Parameters should be specified in the `parameters` mapping: {0:?}")]
    ParameterAsInput(Vec<String>),

    #[error("Inputs should be free inputs to the pipeline: {0:?}")]
    NotFreeInput(Vec<String>),

    #[error("Outputs can't contain free inputs to the pipeline: {0:?}")]
    OutputIsFreeInput(Vec<String>),

    #[error("Failed to map channels and/or parameters: {0:?}")]
    Unmapped(Vec<String>),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Error)]
pub enum NagareError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Modular(#[from] ModularError),

    #[error("Error while running the pipeline.\n{0}")]
    Run(#[from] RunError),

    #[error("Pipeline '{0}' not found in the registry")]
    PipelineNotFound(String),
}
