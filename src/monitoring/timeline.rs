//! Execution Timeline
//!
//! Reconstructs per-step timing from a persisted execution's history for
//! reports and Gantt charts.

use std::collections::HashMap;

use crate::workflow::WorkflowExecutionState;

/// Width of the chart area in characters.
const CHART_WIDTH: f64 = 50.0;

/// When one history entry ran, relative to the execution start.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpan {
    pub step_id: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub success: bool,
}

impl StepSpan {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

/// Timeline of a workflow execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTimeline {
    spans: Vec<StepSpan>,
    total_ms: u64,
}

impl ExecutionTimeline {
    /// Builds spans from `executedAt` (step end) and `durationMs`.
    pub fn from_state(state: &WorkflowExecutionState) -> Self {
        let spans: Vec<StepSpan> = state
            .history
            .iter()
            .map(|entry| {
                let end = (entry.executed_at - state.created_at)
                    .num_milliseconds()
                    .max(0) as u64;
                let duration = entry.duration_ms.unwrap_or(0).min(end);
                StepSpan {
                    step_id: entry.step_id.clone(),
                    start_ms: end - duration,
                    duration_ms: duration,
                    success: entry.success,
                }
            })
            .collect();

        let elapsed = (state.updated_at - state.created_at)
            .num_milliseconds()
            .max(0) as u64;
        let total_ms = spans
            .iter()
            .map(StepSpan::end_ms)
            .max()
            .unwrap_or(0)
            .max(elapsed);

        Self { spans, total_ms }
    }

    pub fn spans(&self) -> &[StepSpan] {
        &self.spans
    }

    /// Milliseconds from creation to the last recorded activity.
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Successful steps are drawn with `#`, failed ones with `x`.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        if self.spans.is_empty() || self.total_ms == 0 {
            return output;
        }

        let scale = CHART_WIDTH / self.total_ms as f64;

        let mut sorted: Vec<&StepSpan> = self.spans.iter().collect();
        sorted.sort_by_key(|span| span.start_ms);

        for span in sorted {
            let start_pos = (span.start_ms as f64 * scale) as usize;
            let width = (span.duration_ms as f64 * scale).max(1.0) as usize;
            let mark = if span.success { "#" } else { "x" };

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&mark.repeat(width));

            output.push_str(&format!(
                "{:12} |{:<width$}| ({} ms){}\n",
                truncate(&span.step_id, 12),
                bar,
                span.duration_ms,
                if span.success { "" } else { " FAILED" },
                width = CHART_WIDTH as usize
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", self.total_ms));
        output
    }

    /// Returns step durations in milliseconds, summed over repeated runs.
    pub fn get_durations(&self) -> HashMap<String, u64> {
        let mut durations: HashMap<String, u64> = HashMap::new();
        for span in &self.spans {
            *durations.entry(span.step_id.clone()).or_insert(0) += span.duration_ms;
        }
        durations
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::HistoryEntry;
    use chrono::Duration;
    use serde_json::Map;

    fn state_with(entries: &[(&str, i64, u64, bool)]) -> WorkflowExecutionState {
        let mut state = WorkflowExecutionState::new("wf", 1, Map::new(), None);
        for (step_id, end_ms, duration_ms, success) in entries {
            state.history.push(HistoryEntry {
                step_id: step_id.to_string(),
                executed_at: state.created_at + Duration::milliseconds(*end_ms),
                success: *success,
                output: None,
                error: None,
                duration_ms: Some(*duration_ms),
            });
        }
        state.updated_at = state.created_at;
        state
    }

    #[test]
    fn test_spans_from_history() {
        let timeline = ExecutionTimeline::from_state(&state_with(&[
            ("fetch", 100, 100, true),
            ("render", 250, 50, false),
        ]));

        let spans = timeline.spans();
        assert_eq!(spans[0].start_ms, 0);
        assert_eq!(spans[1].start_ms, 200);
        assert_eq!(spans[1].end_ms(), 250);
        assert_eq!(timeline.total_ms(), 250);
    }

    #[test]
    fn test_duration_clamped_to_execution_start() {
        let timeline = ExecutionTimeline::from_state(&state_with(&[("s1", 10, 500, true)]));
        assert_eq!(timeline.spans()[0].start_ms, 0);
        assert_eq!(timeline.spans()[0].duration_ms, 10);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let timeline = ExecutionTimeline::from_state(&state_with(&[
            ("step1", 50, 50, true),
            ("step2", 100, 50, false),
        ]));

        let chart = timeline.gantt_chart();
        assert!(chart.contains("step1"));
        assert!(chart.contains("step2"));
        assert!(chart.contains("FAILED"));
        assert!(chart.contains("Total: 100 ms"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::from_state(&state_with(&[]));
        let chart = timeline.gantt_chart();
        assert!(chart.contains("Timeline"));
        assert!(!chart.contains("Total"));
    }

    #[test]
    fn test_durations_sum_repeated_steps() {
        let timeline = ExecutionTimeline::from_state(&state_with(&[
            ("loop", 20, 20, true),
            ("loop", 50, 30, true),
        ]));

        assert_eq!(timeline.get_durations()["loop"], 50);
    }

    #[test]
    fn test_truncate_long_ids() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a-very-long-step", 8), "a-ver...");
    }
}
