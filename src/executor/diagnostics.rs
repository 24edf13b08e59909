use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::graph::Graph;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Run diagnostics and performance metrics.
///
/// Returned as part of [`RunReport`](crate::RunReport), it records when each
/// task started and how long it took.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Execution metrics keyed by task name.
    pub execution_times: BTreeMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Total time spent inside tasks, summed across threads.
    pub fn busy_time(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Wall time from the first task start to the last task end.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self.execution_times.values().map(|t| t.start + t.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution
    /// duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Did not run
    pub fn render_mermaid(&self, graph: &Graph) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let secs = times.values().map(|t| t.duration.as_secs_f64());
        let min_time = secs.clone().fold(f64::MAX, f64::min);
        let max_time = secs.fold(f64::MIN, f64::max);

        // no task ran, or all took the same time
        let (min_time, span) = if min_time > max_time {
            (0.0, 1.0)
        } else if (max_time - min_time).abs() < f64::EPSILON {
            (min_time, 1.0)
        } else {
            (min_time, max_time - min_time)
        };

        for index in graph.dag.node_indices() {
            let task = &graph.dag[index];
            let name = task.name();

            let (label, color) = match times.get(&name) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / span;
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("Skipped".to_string(), "#ADD8E6".to_string()),
            };

            let _ = writeln!(
                f,
                "    t{}[\"{}\\n{}\"]",
                index.index(),
                name.replace('"', "\\\""),
                label
            );
            let _ = writeln!(f, "    style t{} fill:{}", index.index(), color);
        }

        for edge in graph.dag.raw_edges() {
            let _ = writeln!(f, "    t{} --> t{}", edge.source().index(), edge.target().index());
        }

        f
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn heat(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };
    format!("#{r:02X}{g:02X}00")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::chain;

    fn execution(start: Instant, offset_ms: u64, duration_ms: u64) -> TaskExecution {
        TaskExecution {
            start: start + Duration::from_millis(offset_ms),
            duration: Duration::from_millis(duration_ms),
        }
    }

    #[test]
    fn test_heat() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn test_render_mermaid_marks_skipped() {
        let now = Instant::now();
        let diagnostics = Diagnostics {
            execution_times: BTreeMap::from([
                ("t1".to_string(), execution(now, 0, 10)),
                ("t2".to_string(), execution(now, 10, 30)),
            ]),
        };

        let text = diagnostics.render_mermaid(&chain());
        assert!(text.contains("style t0 fill:#00FF00"));
        assert!(text.contains("style t1 fill:#FF0000"));
        assert!(text.contains("style t2 fill:#ADD8E6"));
        assert!(text.contains("t0 --> t1"));
    }

    #[test]
    fn test_times() {
        let now = Instant::now();
        let diagnostics = Diagnostics {
            execution_times: BTreeMap::from([
                ("a".to_string(), execution(now, 0, 10)),
                ("b".to_string(), execution(now, 0, 20)),
            ]),
        };

        assert_eq!(diagnostics.busy_time(), Duration::from_millis(30));
        assert_eq!(diagnostics.wall_time(), Duration::from_millis(20));
        assert_eq!(Diagnostics::default().wall_time(), Duration::ZERO);
    }
}
