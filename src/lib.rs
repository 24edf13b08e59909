#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod error;
pub mod executor;
pub mod graph;
mod registry;
pub mod store;
pub mod task;
pub mod utils;

pub use crate::core::{Args, Dynamic, Value};
pub use crate::error::*;
pub use crate::executor::{CancelToken, Diagnostics, Executor, RunOptions, RunReport, RunState, TaskExecution};
pub use crate::graph::modular::{Remap, pipeline};
pub use crate::graph::{Graph, Member};
pub use crate::registry::{DEFAULT_GRAPH, GraphRegistry};
pub use crate::store::{DataStore, MemoryStore, StoreFactory, StoreRegistry, Version, Versioned};
pub use crate::task::decorators::log_time;
pub use crate::task::{Decorator, Ports, Task, TaskBuilder, TaskFn, task};
