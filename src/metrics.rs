use anyhow::{Context, Result};
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

/// Collectors for the executor's task lifecycle, exported in the Prometheus
/// text format rather than served over HTTP: the executor is a blocking,
/// thread-pool based CLI tool (§5), not a long-running service, so a scrape
/// endpoint has nothing to scrape between runs. `madats run --metrics-out
/// <path>` writes the gathered text to a file on completion instead.
#[derive(Debug)]
pub struct ExecutorMetrics {
    pub tasks_submitted: IntCounterVec,
    pub tasks_finished: IntCounterVec,
    pub task_duration_seconds: HistogramVec,
}

impl ExecutorMetrics {
    pub fn new() -> Result<ExecutorMetrics> {
        let tasks_submitted = register_int_counter_vec!(
            "madats_tasks_submitted_total",
            "Number of tasks submitted to a scheduler, by task type",
            &["task_type"]
        )
        .context("failed to register tasks_submitted counter")?;

        let tasks_finished = register_int_counter_vec!(
            "madats_tasks_finished_total",
            "Number of tasks that finished, by task type and status",
            &["task_type", "status"]
        )
        .context("failed to register tasks_finished counter")?;

        let task_duration_seconds = register_histogram_vec!(
            "madats_task_duration_seconds",
            "Wall-clock duration of a task's submit-to-completion span",
            &["task_type"]
        )
        .context("failed to register task_duration_seconds histogram")?;

        Ok(ExecutorMetrics {
            tasks_submitted,
            tasks_finished,
            task_duration_seconds,
        })
    }
}

/// Renders all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .context("failed to encode metrics")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_panicking() {
        // prometheus registers collectors in a process-global registry, so
        // this is the only test in the crate allowed to construct one.
        let metrics = ExecutorMetrics::new().unwrap();
        metrics.tasks_submitted.with_label_values(&["compute"]).inc();
        metrics
            .tasks_finished
            .with_label_values(&["compute", "completed"])
            .inc();
        let text = gather_text().unwrap();
        assert!(!text.is_empty());
    }
}
