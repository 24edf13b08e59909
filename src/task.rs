//! All the task-related abstractions.
//!
//! A [`Task`] is an immutable unit of work: an opaque callable together with
//! the names of the channels it reads from and writes to. The engine never
//! looks inside the callable, it only ever sees channel names.
//!
//! Tasks are created through [`task`], which returns a [`TaskBuilder`]:
//!
//! ```rust
//! use nagare::{Args, Value, task};
//!
//! let add = task(
//!     |args: Args| Ok(Value::new(args.arg::<i64>(0)? + args.arg::<i64>(1)?)),
//!     ["a", "b"],
//!     "sum",
//! )
//! .name("add")
//! .tags(["math"])
//! .build()
//! .unwrap();
//!
//! assert_eq!(add.name(), "add");
//! assert_eq!(add.inputs(), vec!["a", "b"]);
//! ```
pub mod decorators;

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{Args, Value};
use crate::error::TaskError;
use crate::graph::transcode;

/// Type-erased task callable.
pub type TaskFn = Arc<dyn Fn(Args) -> anyhow::Result<Value> + Send + Sync>;

/// Wraps a callable into another callable, e.g. to add logging or retries.
pub type Decorator = Arc<dyn Fn(TaskFn) -> TaskFn + Send + Sync>;

/// Running counter used to disambiguate tasks which were not given a name.
static ANONYMOUS: AtomicUsize = AtomicUsize::new(0);

/// The declared shape of a task's inputs or outputs.
///
/// The shape decides how values are bound to the callable: a single channel
/// and a list of channels are passed positionally, a mapping is passed by
/// argument name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Ports {
    #[default]
    Empty,
    Single(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl Ports {
    /// Channel names in binding order. Repeated channels are kept.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Ports::Empty => vec![],
            Ports::Single(name) => vec![name.as_str()],
            Ports::List(names) => names.iter().map(String::as_str).collect(),
            Ports::Map(names) => names.values().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Ports::Empty => true,
            Ports::Single(_) => false,
            Ports::List(names) => names.is_empty(),
            Ports::Map(names) => names.is_empty(),
        }
    }

    /// Returns the same shape with every channel renamed.
    pub(crate) fn rename(&self, rename: impl Fn(&str) -> String) -> Ports {
        match self {
            Ports::Empty => Ports::Empty,
            Ports::Single(name) => Ports::Single(rename(name)),
            Ports::List(names) => Ports::List(names.iter().map(|n| rename(n)).collect()),
            Ports::Map(names) => {
                Ports::Map(names.iter().map(|(k, v)| (k.clone(), rename(v))).collect())
            }
        }
    }

    fn normalize(self) -> Ports {
        if self.is_empty() { Ports::Empty } else { self }
    }
}

impl From<()> for Ports {
    fn from(_: ()) -> Self {
        Ports::Empty
    }
}

impl From<&str> for Ports {
    fn from(value: &str) -> Self {
        Ports::Single(value.to_string())
    }
}

impl From<String> for Ports {
    fn from(value: String) -> Self {
        Ports::Single(value)
    }
}

impl From<Vec<String>> for Ports {
    fn from(value: Vec<String>) -> Self {
        Ports::List(value).normalize()
    }
}

impl From<Vec<&str>> for Ports {
    fn from(value: Vec<&str>) -> Self {
        Ports::List(value.into_iter().map(String::from).collect()).normalize()
    }
}

impl<const N: usize> From<[&str; N]> for Ports {
    fn from(value: [&str; N]) -> Self {
        Ports::List(value.into_iter().map(String::from).collect()).normalize()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Ports {
    fn from(value: [(&str, &str); N]) -> Self {
        Ports::Map(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .normalize()
    }
}

impl From<BTreeMap<String, String>> for Ports {
    fn from(value: BTreeMap<String, String>) -> Self {
        Ports::Map(value).normalize()
    }
}

/// Creates a builder for a task calling `func` with the values of `inputs`
/// and saving its result to `outputs`.
pub fn task<F>(func: F, inputs: impl Into<Ports>, outputs: impl Into<Ports>) -> TaskBuilder
where
    F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    TaskBuilder {
        func: Arc::new(func),
        func_name: short_type_name(type_name::<F>()),
        inputs: inputs.into(),
        outputs: outputs.into(),
        name: None,
        namespace: None,
        tags: BTreeSet::new(),
        confirms: Vec::new(),
        decorators: Vec::new(),
    }
}

pub struct TaskBuilder {
    func: TaskFn,
    func_name: String,
    inputs: Ports,
    outputs: Ports,
    name: Option<String>,
    namespace: Option<String>,
    tags: BTreeSet<String>,
    confirms: Vec<String>,
    decorators: Vec<Decorator>,
}

impl TaskBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the function name shown in logs and derived task names.
    pub fn func_name(mut self, name: impl Into<String>) -> Self {
        self.func_name = name.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<T: Into<String>>(mut self, tags: impl IntoIterator<Item = T>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Channels whose history is confirmed once the task completes. They do
    /// not need to be inputs or outputs of the task.
    pub fn confirms<T: Into<String>>(mut self, confirms: impl IntoIterator<Item = T>) -> Self {
        self.confirms.extend(confirms.into_iter().map(Into::into));
        self
    }

    pub fn decorate(mut self, decorators: impl IntoIterator<Item = Decorator>) -> Self {
        self.decorators.extend(decorators);
        self
    }

    pub fn build(self) -> Result<Task, TaskError> {
        let derived = match &self.name {
            Some(_) => String::new(),
            None => format!(
                "{}_{}",
                self.func_name,
                ANONYMOUS.fetch_add(1, Ordering::Relaxed)
            ),
        };

        let task = Task {
            func: compose(self.func, &self.decorators),
            func_name: self.func_name.into(),
            inputs: self.inputs,
            outputs: self.outputs,
            name: self.name,
            derived,
            namespace: self.namespace,
            tags: self.tags,
            confirms: self.confirms,
        };

        task.validate()?;
        Ok(task)
    }
}

/// An immutable named unit of computation.
///
/// Two tasks are considered the same iff they have the same [`name`](Self::name).
/// Tagging and decorating produce new tasks and never mutate in place.
#[derive(Clone)]
pub struct Task {
    func: TaskFn,
    func_name: Arc<str>,
    inputs: Ports,
    outputs: Ports,
    name: Option<String>,
    derived: String,
    namespace: Option<String>,
    tags: BTreeSet<String>,
    confirms: Vec<String>,
}

impl Task {
    /// Unique name, prefixed with the namespace if there is one.
    pub fn name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}.{}", self.short_name()),
            None => self.short_name().to_string(),
        }
    }

    /// Name without the namespace. Not guaranteed to be unique.
    pub fn short_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.derived)
    }

    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Input channel names in binding order.
    pub fn inputs(&self) -> Vec<&str> {
        self.inputs.names()
    }

    pub fn outputs(&self) -> Vec<&str> {
        self.outputs.names()
    }

    pub fn input_ports(&self) -> &Ports {
        &self.inputs
    }

    pub fn output_ports(&self) -> &Ports {
        &self.outputs
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn confirms(&self) -> &[String] {
        &self.confirms
    }

    /// Returns a copy of this task with more tags added to it.
    pub fn tag<T: Into<String>>(&self, tags: impl IntoIterator<Item = T>) -> Task {
        let mut task = self.clone();
        task.tags.extend(tags.into_iter().map(Into::into));
        task
    }

    /// Returns a copy of this task whose callable is wrapped by `decorators`.
    ///
    /// The first decorator is the outermost one: it observes the call first
    /// and the result last.
    pub fn decorate(&self, decorators: impl IntoIterator<Item = Decorator>) -> Task {
        let decorators: Vec<_> = decorators.into_iter().collect();
        let mut task = self.clone();
        task.func = compose(task.func, &decorators);
        task
    }

    /// True when both tasks have the same name and the same declared inputs
    /// and outputs.
    pub fn same_definition(&self, other: &Task) -> bool {
        self.name() == other.name() && self.inputs == other.inputs && self.outputs == other.outputs
    }

    /// Copy with every channel renamed and a new namespace, validated again.
    pub(crate) fn remapped(
        &self,
        rename: impl Fn(&str) -> String,
        namespace: Option<String>,
    ) -> Result<Task, TaskError> {
        let task = Task {
            inputs: self.inputs.rename(&rename),
            outputs: self.outputs.rename(&rename),
            confirms: self.confirms.iter().map(|c| rename(c)).collect(),
            namespace,
            ..self.clone()
        };

        task.validate()?;
        Ok(task)
    }

    /// Runs the task with `inputs` keyed by channel name and returns its
    /// results keyed by output channel name.
    pub fn run(&self, inputs: BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>, TaskError> {
        let expected: BTreeSet<&str> = self.inputs().into_iter().collect();
        let got: BTreeSet<&str> = inputs.keys().map(String::as_str).collect();

        if expected != got {
            return Err(TaskError::Inputs {
                task: self.name(),
                expected: expected.into_iter().map(String::from).collect(),
                got: got.into_iter().map(String::from).collect(),
            });
        }

        let args = match &self.inputs {
            Ports::Empty => Args::default(),
            Ports::Single(name) => Args::positional([inputs[name].clone()]),
            Ports::List(names) => Args::positional(names.iter().map(|name| inputs[name].clone())),
            Ports::Map(names) => Args::named(
                names
                    .iter()
                    .map(|(arg, name)| (arg.clone(), inputs[name].clone())),
            ),
        };

        let value = (self.func)(args).map_err(|source| TaskError::Callable {
            task: self.name(),
            source,
        })?;

        self.bind_outputs(value)
    }

    fn bind_outputs(&self, value: Value) -> Result<BTreeMap<String, Value>, TaskError> {
        match &self.outputs {
            Ports::Empty => Ok(BTreeMap::new()),
            Ports::Single(name) => Ok(BTreeMap::from([(name.clone(), value)])),
            Ports::List(names) => match value {
                Value::Seq(items) if items.len() == names.len() => {
                    Ok(names.iter().cloned().zip(items).collect())
                }
                other => Err(TaskError::OutputArity {
                    task: self.name(),
                    expected: names.len(),
                    found: describe_returned(&other),
                }),
            },
            Ports::Map(names) => {
                let mut items = match value {
                    Value::Map(items) => items,
                    other => {
                        return Err(TaskError::OutputShape {
                            task: self.name(),
                            reason: format!(
                                "the outputs are declared as a mapping, whereas the callable returned {}",
                                describe_returned(&other)
                            ),
                        });
                    }
                };

                let declared: BTreeSet<&String> = names.keys().collect();
                let returned: BTreeSet<&String> = items.keys().collect();
                if declared != returned {
                    return Err(TaskError::OutputShape {
                        task: self.name(),
                        reason: format!(
                            "the declared output keys {declared:?} do not match the returned keys {returned:?}"
                        ),
                    });
                }

                Ok(names
                    .iter()
                    .filter_map(|(key, name)| items.remove(key).map(|item| (name.clone(), item)))
                    .collect())
            }
        }
    }

    fn validate(&self) -> Result<(), TaskError> {
        let error = |reason: String| TaskError::Configuration {
            task: self.to_string(),
            reason,
        };

        if self.inputs.is_empty() && self.outputs.is_empty() {
            return Err(error("it must have some inputs or outputs".into()));
        }

        let outputs = self.outputs();
        let mut seen = HashSet::new();
        let duplicates: BTreeSet<&str> = outputs.iter().filter(|o| !seen.insert(**o)).copied().collect();
        if !duplicates.is_empty() {
            return Err(error(format!(
                "duplicate output(s) {duplicates:?}, task outputs must be unique"
            )));
        }

        let inputs: BTreeSet<&str> = self.inputs().into_iter().collect();
        let common: BTreeSet<&str> = outputs.iter().filter(|o| inputs.contains(*o)).copied().collect();
        if !common.is_empty() {
            return Err(error(format!(
                "a task cannot have the same inputs and outputs: {common:?}"
            )));
        }

        let names = self
            .inputs()
            .into_iter()
            .chain(outputs.iter().copied())
            .chain(self.confirms.iter().map(String::as_str));

        for name in names {
            transcode::split(name).map_err(|e| error(e.to_string()))?;
        }

        Ok(())
    }
}

fn compose(func: TaskFn, decorators: &[Decorator]) -> TaskFn {
    decorators
        .iter()
        .rev()
        .fold(func, |func, decorator| decorator(func))
}

fn describe_returned(value: &Value) -> String {
    match value.arity() {
        Some(n) => format!("a {} of {n} value(s)", value.kind()),
        None if value.is_null() => "no value".into(),
        None => "a single value".into(),
    }
}

/// `my_crate::module::function` becomes `function`, closures keep the name
/// of the enclosing function.
fn short_type_name(name: &str) -> String {
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::")
        .find(|segment| !segment.starts_with('{'))
        .unwrap_or("task")
        .to_string()
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = |ports: &Ports| {
            if ports.is_empty() {
                return "None".to_string();
            }
            let names: BTreeSet<&str> = ports.names().into_iter().collect();
            format!("[{}]", names.into_iter().collect::<Vec<_>>().join(","))
        };

        write!(
            f,
            "{}: {}({}) -> {}",
            self.name(),
            self.func_name,
            list(&self.inputs),
            list(&self.outputs)
        )
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    fn identity(args: Args) -> anyhow::Result<Value> {
        Ok(args.positional.into_iter().next().unwrap_or_default())
    }

    fn wrap(label: &'static str) -> Decorator {
        Arc::new(move |func: TaskFn| -> TaskFn {
            Arc::new(move |args: Args| {
                let inner = args.arg::<String>(0)?;
                func(Args::positional([Value::new(format!("{label}({inner})"))]))
            })
        })
    }

    #[test]
    fn test_derived_names_do_not_collide() {
        let a = task(identity, "a", "b").build().unwrap();
        let b = task(identity, "a", "b").build().unwrap();
        assert!(a.name().starts_with("identity_"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_namespace_prefix() {
        let t = task(identity, "a", "b")
            .name("copy")
            .namespace("data.raw")
            .build()
            .unwrap();
        assert_eq!(t.name(), "data.raw.copy");
        assert_eq!(t.short_name(), "copy");
    }

    #[test]
    fn test_no_inputs_no_outputs() {
        let err = task(identity, (), ()).build().unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
    }

    #[test]
    fn test_duplicate_outputs() {
        let err = task(identity, "a", ["b", "b"]).build().unwrap_err();
        assert!(err.to_string().contains("duplicate output"));
    }

    #[test]
    fn test_duplicate_inputs_allowed() {
        let t = task(|args: Args| Ok(Value::new(args.arg::<i32>(0)? * args.arg::<i32>(1)?)), ["x", "x"], "y")
            .build()
            .unwrap();
        let out = t.run(BTreeMap::from([("x".to_string(), Value::new(4))])).unwrap();
        assert_eq!(out["y"].downcast_ref::<i32>(), Some(&16));
    }

    #[test]
    fn test_same_input_and_output() {
        let err = task(identity, "a", "a").build().unwrap_err();
        assert!(err.to_string().contains("same inputs and outputs"));
    }

    #[test]
    fn test_double_transcoding_separator() {
        let err = task(identity, "a@b@c", "d").build().unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }));
    }

    #[test]
    fn test_tag_returns_new_task() {
        let t = task(identity, "a", "b").name("t").tag("x").build().unwrap();
        let tagged = t.tag(["y"]);
        assert_eq!(t.tags().len(), 1);
        assert_eq!(tagged.tags().len(), 2);
        assert_eq!(t, tagged);
        assert!(t.same_definition(&tagged));
    }

    #[test]
    fn test_decorator_order() {
        let t = task(identity, "input", "output")
            .name("t")
            .decorate([wrap("g")])
            .build()
            .unwrap();
        let t = t.decorate([wrap("h"), wrap("fg")]);

        let out = t
            .run(BTreeMap::from([("input".to_string(), Value::new("1".to_string()))]))
            .unwrap();

        assert_eq!(out["output"].downcast_ref::<String>().unwrap(), "g(fg(h(1)))");
    }

    #[test]
    fn test_run_with_mapping() {
        let t = task(
            |args: Args| Ok(Value::new(args.kwarg::<i32>("a")? - args.kwarg::<i32>("b")?)),
            [("a", "left"), ("b", "right")],
            "diff",
        )
        .build()
        .unwrap();

        let out = t
            .run(BTreeMap::from([
                ("left".to_string(), Value::new(10)),
                ("right".to_string(), Value::new(3)),
            ]))
            .unwrap();
        assert_eq!(out["diff"].downcast_ref::<i32>(), Some(&7));
    }

    #[test]
    fn test_run_rejects_wrong_inputs() {
        let t = task(identity, "a", "b").build().unwrap();
        let err = t.run(BTreeMap::new()).unwrap_err();
        assert!(matches!(err, TaskError::Inputs { .. }));
    }

    #[test]
    fn test_list_output_arity() {
        let t = task(|_| Ok(Value::new(1)), (), ["p", "q"]).name("split").build().unwrap();
        let err = t.run(BTreeMap::new()).unwrap_err();
        match err {
            TaskError::OutputArity { task, expected, .. } => {
                assert_eq!(task, "split");
                assert_eq!(expected, 2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_mapping_outputs() {
        let t = task(
            |_| Ok(Value::map([("l", Value::new(1)), ("r", Value::new(2))])),
            (),
            [("l", "left"), ("r", "right")],
        )
        .build()
        .unwrap();
        let out = t.run(BTreeMap::new()).unwrap();
        assert_eq!(out["left"].downcast_ref::<i32>(), Some(&1));
        assert_eq!(out["right"].downcast_ref::<i32>(), Some(&2));

        let t = task(|_| Ok(Value::map([("l", Value::new(1))])), (), [("l", "left"), ("r", "right")])
            .build()
            .unwrap();
        assert!(matches!(t.run(BTreeMap::new()), Err(TaskError::OutputShape { .. })));
    }

    #[test]
    fn test_callable_error_names_task() {
        let t = task(|_| anyhow::bail!("boom"), (), "x").name("explode").build().unwrap();
        let err = t.run(BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("explode"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_display() {
        let t = task(identity, ["b", "a"], "c").name("t").build().unwrap();
        assert_eq!(t.to_string(), "t: identity([a,b]) -> [c]");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("nagare::task::tests::identity"), "identity");
        assert_eq!(short_type_name("nagare::task::tests::test_x::{{closure}}"), "test_x");
        assert_eq!(short_type_name("alloc::vec::Vec<u8>"), "Vec");
    }
}
