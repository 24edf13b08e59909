//! Ready-made task decorators.
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::Args;
use crate::task::{Decorator, TaskFn};

/// Logs the time taken by every invocation of the wrapped callable.
pub fn log_time(label: impl Into<String>) -> Decorator {
    let label: Arc<str> = label.into().into();

    Arc::new(move |func: TaskFn| -> TaskFn {
        let label = label.clone();
        Arc::new(move |args: Args| {
            let start = Instant::now();
            let result = func(args);
            tracing::info!(
                "Running {label} took {}",
                human_readable(start.elapsed())
            );
            result
        })
    })
}

pub(crate) fn human_readable(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let whole = elapsed.as_secs();
    let (hours, mins, rest) = (whole / 3600, (whole / 60) % 60, whole % 60);

    if hours > 0 {
        format!("{hours}h{mins:02}m{rest:02}s")
    } else if mins > 0 {
        format!("{mins}m{rest:02}s")
    } else if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.0}ms", secs * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::task::task;
    use std::collections::BTreeMap;

    #[test]
    fn test_human_readable() {
        assert_eq!(human_readable(Duration::from_millis(120)), "120ms");
        assert_eq!(human_readable(Duration::from_millis(1500)), "1.50s");
        assert_eq!(human_readable(Duration::from_secs(123)), "2m03s");
        assert_eq!(human_readable(Duration::from_secs(3723)), "1h02m03s");
    }

    #[test]
    fn test_log_time_is_transparent() {
        let t = task(|args: Args| Ok(Value::new(*args.arg::<i32>(0)? + 1)), "x", "y")
            .decorate([log_time("inc")])
            .build()
            .unwrap();

        let out = t.run(BTreeMap::from([("x".to_string(), Value::new(1))])).unwrap();
        assert_eq!(out["y"].downcast_ref::<i32>(), Some(&2));
    }
}
