//! The concurrent, dependency-gated task executor (spec §4.7/§5): walks the
//! frozen DAG, synthesizes a submission script per task, blocks each task on
//! its predecessor counter, invokes the scheduler adapter, and collects
//! per-task outcomes. Grounded on `facilitator::work_queue::WorkQueue`'s
//! `Arc<Mutex<...>>` job/result pattern, generalized here to a
//! dependency-gated pool (REDESIGN FLAGS §9: polling-with-sleep is the
//! explicitly sanctioned lowest-common-denominator fallback for predecessor
//! completion; the original's threaded `ExecutionManager.__execute_parallel__`
//! batches-by-bin is preserved as `ExecutionMode::Bin`).

use crate::config::MadatsConfig;
use crate::dag::Dag;
use crate::metrics::ExecutorMetrics;
use crate::scheduler::{self, Scheduler, SchedulerAdapter, SchedulerError};
use crate::status_db::{self, StatusStore, TaskStatus};
use crate::task::TaskId;
use crate::vds::{VdsError, VirtualDataSpace};
use rand::Rng;
use slog::{error, info, o, warn, Logger};
use std::collections::HashMap;
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Vds(#[from] VdsError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    StatusDb(#[from] status_db::StatusDbError),
    #[error(transparent)]
    Dag(#[from] crate::dag::DagError),
    #[error("failed to prepare script directory {path:?}: {source}")]
    ScriptDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write submission script {path:?}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl crate::ErrorClassification for ExecutorError {
    fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Vds(e) => e.is_retryable(),
            ExecutorError::Scheduler(e) => e.is_retryable(),
            ExecutorError::StatusDb(e) => e.is_retryable(),
            ExecutorError::Dag(e) => e.is_retryable(),
            ExecutorError::ScriptDir { .. } | ExecutorError::ScriptWrite { .. } => true,
        }
    }
}

/// Which planner strategy feeds task readiness to the worker pool (spec
/// §4.7, "Alternative execution modes"). `Priority`/`Dependency` are named in
/// the spec as accepted-for-future-extension and are intentionally not
/// built; `Dag` is the reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Dag,
    Bin,
}

/// Outcome of one task's submission (spec §7: "attached to the task's
/// result record").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed { stderr: String },
}

#[derive(Clone, Debug)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    pub stdout: String,
    pub script_path: PathBuf,
}

pub struct ExecutionReport {
    pub results: Vec<TaskResult>,
}

impl ExecutionReport {
    /// Spec §6 exit codes: 0 all completed, 1 at least one task failed.
    pub fn exit_code(&self) -> i32 {
        if self.results.iter().any(|r| matches!(r.outcome, TaskOutcome::Failed { .. })) {
            1
        } else {
            0
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| matches!(r.outcome, TaskOutcome::Failed { .. }))
    }
}

pub struct Executor {
    logger: Logger,
    config: MadatsConfig,
    scheduler: SchedulerAdapter,
    status_store: Arc<dyn StatusStore>,
    metrics: Option<Arc<ExecutorMetrics>>,
    mode: ExecutionMode,
    keep_scripts: bool,
    workflow_id: String,
}

impl Executor {
    pub fn new(
        logger: Logger,
        config: MadatsConfig,
        scheduler: SchedulerAdapter,
        workflow_id: impl Into<String>,
    ) -> Executor {
        Executor {
            logger,
            config,
            scheduler,
            status_store: Arc::new(status_db::NoopStatusStore),
            metrics: None,
            mode: ExecutionMode::Dag,
            keep_scripts: false,
            workflow_id: workflow_id.into(),
        }
    }

    pub fn with_status_store(mut self, store: Arc<dyn StatusStore>) -> Executor {
        self.status_store = store;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutorMetrics>) -> Executor {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Executor {
        self.mode = mode;
        self
    }

    pub fn with_keep_scripts(mut self, keep: bool) -> Executor {
        self.keep_scripts = keep;
        self
    }

    /// Runs every task in `vds` to completion per `dag`'s structure (spec
    /// §4.7). The VDS and DAG are read-only for the whole call (spec §5:
    /// "frozen from executor entry to executor exit").
    pub fn execute(&self, vds: &VirtualDataSpace, dag: &Dag) -> Result<ExecutionReport, ExecutorError> {
        let outdir = self.config.outdir(&self.workflow_id);
        fs::create_dir_all(&outdir).map_err(|source| ExecutorError::ScriptDir {
            path: outdir.clone(),
            source,
        })?;

        for &task_id in dag.tasks() {
            let task = vds.task(task_id)?;
            let record = status_db::record_for(&self.workflow_id, task, vds, dag);
            self.status_store.insert_workflow(&record)?;
        }

        let report = match self.mode {
            ExecutionMode::Dag => self.execute_dag(vds, dag, &outdir)?,
            ExecutionMode::Bin => self.execute_bin(vds, dag, &outdir)?,
        };

        if !self.keep_scripts {
            let _ = fs::remove_dir_all(&outdir);
        }
        Ok(report)
    }

    fn execute_dag(
        &self,
        vds: &VirtualDataSpace,
        dag: &Dag,
        outdir: &std::path::Path,
    ) -> Result<ExecutionReport, ExecutorError> {
        let tasks = dag.tasks();

        let mut pending: HashMap<TaskId, i64> = HashMap::new();
        for &t in tasks {
            pending.insert(t, dag.predecessors(t).len() as i64);
        }
        let pending = Mutex::new(pending);
        let job_ids: Mutex<HashMap<TaskId, String>> = Mutex::new(HashMap::new());
        let results: Mutex<Vec<TaskResult>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for &task_id in tasks {
                let pending = &pending;
                let job_ids = &job_ids;
                let results = &results;
                handles.push(scope.spawn(move || {
                    wait_for_predecessors(pending, task_id);

                    let outcome = self.run_one(vds, dag, outdir, task_id, job_ids).unwrap_or_else(|e| {
                        error!(self.logger, "task submission failed"; "task_id" => task_id.to_string(), "error" => e.to_string());
                        TaskResult {
                            task_id,
                            outcome: TaskOutcome::Failed { stderr: e.to_string() },
                            stdout: String::new(),
                            script_path: outdir.join(format!("{}.sub", task_id)),
                        }
                    });

                    results.lock().unwrap().push(outcome);
                    decrement_successors(pending, dag, task_id);
                }));
            }
            for h in handles {
                let _ = h.join();
            }
        });

        Ok(ExecutionReport {
            results: results.into_inner().unwrap(),
        })
    }

    fn execute_bin(
        &self,
        vds: &VirtualDataSpace,
        dag: &Dag,
        outdir: &std::path::Path,
    ) -> Result<ExecutionReport, ExecutorError> {
        let bins = dag.bin_execution_order()?;
        let job_ids: Mutex<HashMap<TaskId, String>> = Mutex::new(HashMap::new());
        let mut all_results = Vec::new();

        for bin in bins {
            let results: Mutex<Vec<TaskResult>> = Mutex::new(Vec::new());
            std::thread::scope(|scope| {
                let mut handles = Vec::new();
                for &task_id in &bin {
                    let job_ids = &job_ids;
                    let results = &results;
                    handles.push(scope.spawn(move || {
                        let outcome = self.run_one(vds, dag, outdir, task_id, job_ids).unwrap_or_else(|e| {
                            error!(self.logger, "task submission failed"; "task_id" => task_id.to_string(), "error" => e.to_string());
                            TaskResult {
                                task_id,
                                outcome: TaskOutcome::Failed { stderr: e.to_string() },
                                stdout: String::new(),
                                script_path: outdir.join(format!("{}.sub", task_id)),
                            }
                        });
                        results.lock().unwrap().push(outcome);
                    }));
                }
                for h in handles {
                    let _ = h.join();
                }
            });
            all_results.extend(results.into_inner().unwrap());
        }

        Ok(ExecutionReport { results: all_results })
    }

    fn run_one(
        &self,
        vds: &VirtualDataSpace,
        dag: &Dag,
        outdir: &std::path::Path,
        task_id: TaskId,
        job_ids: &Mutex<HashMap<TaskId, String>>,
    ) -> Result<TaskResult, ExecutorError> {
        let task = vds.task(task_id)?;
        let log = self.logger.new(o!(
            "task_id" => task_id.to_string(),
            "task_name" => task.name.clone(),
        ));

        let predecessor_job_ids: Vec<String> = {
            let guard = job_ids.lock().unwrap();
            dag.predecessors(task_id)
                .iter()
                .filter_map(|p| guard.get(p).cloned())
                .collect()
        };

        let script = scheduler::render_script(task, vds, &self.scheduler, &predecessor_job_ids)?;
        let script_path = outdir.join(format!("{}.sub", task_id));
        fs::write(&script_path, &script).map_err(|source| ExecutorError::ScriptWrite {
            path: script_path.clone(),
            source,
        })?;
        set_executable(&script_path).map_err(|source| ExecutorError::ScriptWrite {
            path: script_path.clone(),
            source,
        })?;

        self.status_store.mark_started(&self.workflow_id, task_id)?;
        if let Some(metrics) = &self.metrics {
            metrics.tasks_submitted.with_label_values(&[task_type_label(task.task_type)]).inc();
        }

        let scheduler: Scheduler = task.scheduler.as_deref().unwrap_or("none").parse()?;
        let submit_command = self.scheduler.submit_command(scheduler)?;
        let timeout = task
            .scheduler_opts
            .get("walltime")
            .and_then(|v| v.parse::<crate::config::WallDuration>().ok())
            .map(|d| d.to_chrono())
            .and_then(|d| d.to_std().ok());

        let started = Instant::now();
        let invocation = invoke_submit(&log, &submit_command, &script_path, timeout);

        let outcome = match invocation {
            Ok((output, timed_out)) if output.status.success() && !timed_out => {
                info!(log, "task completed"; "duration_ms" => started.elapsed().as_millis() as u64);
                TaskOutcome::Completed
            }
            Ok((output, timed_out)) => {
                let stderr = if timed_out {
                    format!("task exceeded walltime and was killed: {}", String::from_utf8_lossy(&output.stderr))
                } else {
                    String::from_utf8_lossy(&output.stderr).to_string()
                };
                warn!(log, "task failed"; "stderr" => stderr.clone());
                TaskOutcome::Failed { stderr }
            }
            Err(e) => {
                warn!(log, "failed to invoke submit command"; "error" => e.to_string());
                TaskOutcome::Failed { stderr: e.to_string() }
            }
        };

        let status = match &outcome {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        };
        self.status_store.mark_finished(&self.workflow_id, task_id, status)?;
        if let Some(metrics) = &self.metrics {
            let label = task_type_label(task.task_type);
            metrics
                .tasks_finished
                .with_label_values(&[label, status_label(&outcome)])
                .inc();
            metrics
                .task_duration_seconds
                .with_label_values(&[label])
                .observe(started.elapsed().as_secs_f64());
        }

        let stdout = match &invocation {
            Ok((output, _)) => String::from_utf8_lossy(&output.stdout).to_string(),
            Err(_) => String::new(),
        };

        Ok(TaskResult {
            task_id,
            outcome,
            stdout,
            script_path,
        })
    }
}

fn task_type_label(t: crate::task::TaskType) -> &'static str {
    match t {
        crate::task::TaskType::Compute => "compute",
        crate::task::TaskType::Data => "data",
        crate::task::TaskType::Cleanup => "cleanup",
    }
}

fn status_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Completed => "completed",
        TaskOutcome::Failed { .. } => "failed",
    }
}

#[cfg(unix)]
fn set_executable(path: &std::path::Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o744);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &std::path::Path) -> io::Result<()> {
    Ok(())
}

/// Blocks on `task_id`'s predecessor counter reaching zero, per spec §4.7:
/// "a polling loop under lock with short sleep (1ms order) is acceptable."
/// A small random jitter avoids every worker waking on the exact same tick.
fn wait_for_predecessors(pending: &Mutex<HashMap<TaskId, i64>>, task_id: TaskId) {
    loop {
        let ready = {
            let guard = pending.lock().unwrap();
            *guard.get(&task_id).unwrap_or(&0) <= 0
        };
        if ready {
            return;
        }
        let jitter_micros = rand::thread_rng().gen_range(0..400);
        std::thread::sleep(Duration::from_micros(1000 + jitter_micros));
    }
}

/// Decrements the counter for every successor of `task_id` under the single
/// executor mutex (spec §5: "the happens-before edge from predecessor
/// completion to successor readiness").
fn decrement_successors(pending: &Mutex<HashMap<TaskId, i64>>, dag: &Dag, task_id: TaskId) {
    let mut guard = pending.lock().unwrap();
    for &succ in dag.successors(task_id) {
        if let Some(counter) = guard.get_mut(&succ) {
            *counter -= 1;
        }
    }
}

/// Spawns the scheduler's submit command, retrying a handful of times with
/// exponential backoff if the OS refuses to fork (spec §7: "transient"
/// errors, as opposed to a script that runs and exits non-zero, are
/// retryable). Mirrors `facilitator`'s `retry_request` wrapping around its
/// own transient storage-backend calls.
fn spawn_submit(logger: &Logger, program: &str, args: &[&str], script_path: &std::path::Path) -> io::Result<std::process::Child> {
    crate::retries::retry_request(
        logger,
        || {
            Command::new(program)
                .args(args)
                .arg(script_path)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
        },
        |e| matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::Other),
    )
}

fn invoke_submit(
    logger: &Logger,
    submit_command: &str,
    script_path: &std::path::Path,
    timeout: Option<Duration>,
) -> io::Result<(Output, bool)> {
    let mut parts = submit_command.split_whitespace();
    let program = parts.next().unwrap_or("bash");
    let args: Vec<&str> = parts.collect();

    let mut child = spawn_submit(logger, program, &args, script_path)?;

    let start = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return Ok((child.wait_with_output()?, false));
        }
        if let Some(t) = timeout {
            if start.elapsed() >= t {
                let _ = child.kill();
                return Ok((child.wait_with_output()?, true));
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::setup_test_logging;
    use crate::storage::{TierInfo, YamlStorageCatalog};
    use crate::task::Task;
    use std::collections::BTreeMap;
    use std::sync::Arc as StdArc;

    fn catalog(tmp: &std::path::Path) -> StdArc<YamlStorageCatalog> {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "scratch".to_string(),
            TierInfo {
                mount: tmp.to_string_lossy().to_string(),
                persist: "short_term".to_string(),
                interface: "posix".to_string(),
                bandwidth: 700,
            },
        );
        StdArc::new(YamlStorageCatalog::from_tiers(tiers))
    }

    fn madats_home() -> (tempfile::TempDir, MadatsConfig) {
        let home = tempfile::tempdir().unwrap();
        let config = MadatsConfig::from_home(home.path().to_path_buf()).unwrap();
        (home, config)
    }

    #[test]
    fn executes_independent_tasks_and_reports_success() {
        let scratch = tempfile::tempdir().unwrap();
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog(scratch.path()));
        let out = scratch.path().join("out.txt");
        let t = vds.register_task(Task::new_compute("t1", format!("touch {}", out.display())));
        let dag = crate::dag::build(&vds).unwrap();

        let (_home, config) = madats_home();
        let executor = Executor::new(setup_test_logging(), config, SchedulerAdapter::empty(), "wf-test");
        let report = executor.execute(&vds, &dag).unwrap();

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].task_id, t);
        assert!(out.exists());
    }

    #[test]
    fn failed_task_yields_nonzero_exit_code() {
        let scratch = tempfile::tempdir().unwrap();
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog(scratch.path()));
        vds.register_task(Task::new_compute("fail", "exit 7"));
        let dag = crate::dag::build(&vds).unwrap();

        let (_home, config) = madats_home();
        let executor = Executor::new(setup_test_logging(), config, SchedulerAdapter::empty(), "wf-fail");
        let report = executor.execute(&vds, &dag).unwrap();

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failed().count(), 1);
    }

    #[test]
    fn dependent_task_observes_predecessor_completion_p7() {
        let scratch = tempfile::tempdir().unwrap();
        let mut vds = VirtualDataSpace::new(setup_test_logging(), catalog(scratch.path()));
        let marker = scratch.path().join("marker");
        let a = vds.map(marker.to_str().unwrap());
        let producer = vds.register_task(Task::new_compute("producer", format!("sleep 0.05 && echo done > {}", marker.display())));
        let consumer = vds.register_task(Task::new_compute(
            "consumer",
            format!("test -s {}", marker.display()),
        ));
        vds.vdo_mut(a).unwrap().add_producer(producer);
        vds.vdo_mut(a).unwrap().add_consumer(consumer);

        let dag = crate::dag::build(&vds).unwrap();
        let (_home, config) = madats_home();
        let executor = Executor::new(setup_test_logging(), config, SchedulerAdapter::empty(), "wf-dep");
        let report = executor.execute(&vds, &dag).unwrap();

        assert_eq!(report.exit_code(), 0, "{:?}", report.failed().collect::<Vec<_>>());
    }
}
