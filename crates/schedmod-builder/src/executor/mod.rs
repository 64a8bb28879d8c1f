use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use crate::config::{ConfigDoc, RunMode};
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;
use crate::pipeline::{ToolCommand, ToolRunner};
use crate::planner::Plan;
use crate::state::RunState;
use crate::toolroot::{ToolPaths, ToolRootConfig};

pub type TaskExecFn = fn(&ConfigDoc, &mut ExecCtx) -> Result<()>;

#[derive(Default)]
struct SharedExecState {
    // Set by core.init, read by every task that needs the install root.
    tool_paths: Mutex<Option<ToolPaths>>,
    run_state: Mutex<RunState>,
}

#[derive(Debug, Clone)]
pub enum ExecEvent {
    TaskStarted {
        id: String,
    },
    TaskLog {
        id: String,
        line: String,
    },
    TaskFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    started_at: Option<Instant>,
    tasks_started: usize,
    tasks_ok: usize,
    tasks_failed: usize,
    log_lines: usize,
    total_task_ms: u128,
    failed_tasks: Vec<String>,
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::TaskStarted { id } => {
                if let Ok(mut s) = self.state.lock() {
                    s.tasks_started = s.tasks_started.saturating_add(1);
                    if s.started_at.is_none() {
                        s.started_at = Some(Instant::now());
                    }
                }
                println!("RUN: {id}");
            }
            ExecEvent::TaskLog { id, line } => {
                if let Ok(mut s) = self.state.lock() {
                    s.log_lines = s.log_lines.saturating_add(1);
                }
                println!("[{id}] {line}");
            }
            ExecEvent::TaskFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.tasks_ok = s.tasks_ok.saturating_add(1);
                    } else {
                        s.tasks_failed = s.tasks_failed.saturating_add(1);
                        s.failed_tasks.push(id.clone());
                    }
                    s.total_task_ms = s.total_task_ms.saturating_add(elapsed_ms);
                }
                if ok {
                    println!("DONE: {id} ({elapsed_ms}ms)");
                } else {
                    println!("FAIL: {id} ({elapsed_ms}ms) {}", error.unwrap_or_default());
                }
            }
            ExecEvent::ExecutorDone { ok, error } => {
                let mut summary = String::new();
                if let Ok(mut s) = self.state.lock() {
                    let wall = s.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    summary.push_str("SUMMARY:\n");
                    summary.push_str(&format!("  status: {}\n", if ok { "ok" } else { "failed" }));
                    summary.push_str(&format!(
                        "  tasks: started={} ok={} failed={}\n",
                        s.tasks_started, s.tasks_ok, s.tasks_failed
                    ));
                    summary.push_str(&format!("  logs: {}\n", s.log_lines));
                    summary.push_str(&format!(
                        "  elapsed: {}\n",
                        format_elapsed_hms(wall.as_secs())
                    ));
                    if !s.failed_tasks.is_empty() {
                        summary.push_str(&format!("  failed_tasks: {}\n", s.failed_tasks.join(", ")));
                    }
                    *s = StdoutSinkState::default();
                }
                if ok {
                    println!("DONE: ok");
                } else {
                    println!("DONE: failed {}", error.as_deref().unwrap_or_default());
                }
                print!("{summary}");
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_task_id: Option<String>,
    shared: Arc<SharedExecState>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_task_id: None,
            shared: Arc::new(SharedExecState::default()),
        }
    }

    pub fn set_task(&mut self, id: impl Into<String>) {
        self.current_task_id = Some(id.into());
    }

    pub fn set_tool_paths(&self, paths: ToolPaths) -> Result<()> {
        let mut g = self
            .shared
            .tool_paths
            .lock()
            .map_err(|_| Error::msg("tool paths lock poisoned"))?;
        *g = Some(paths);
        Ok(())
    }

    pub fn tool_paths(&self) -> Result<ToolPaths> {
        self.shared
            .tool_paths
            .lock()
            .map_err(|_| Error::msg("tool paths lock poisoned"))?
            .clone()
            .ok_or_else(|| Error::sequence("tool root not resolved; 'core.init' must run first"))
    }

    /// Snapshot of the per-run state.
    pub fn run_state(&self) -> Result<RunState> {
        self.shared
            .run_state
            .lock()
            .map(|g| g.clone())
            .map_err(|_| Error::msg("run state lock poisoned"))
    }

    pub fn update_run_state(&self, f: impl FnOnce(&mut RunState)) -> Result<()> {
        let mut g = self
            .shared
            .run_state
            .lock()
            .map_err(|_| Error::msg("run state lock poisoned"))?;
        f(&mut g);
        Ok(())
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_task_id
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::TaskLog {
            id,
            line: msg.to_string(),
        });
    }

    /// Run an external stage, streaming its output line by line. Output is
    /// sanitized for terminal safety. Stdout goes to a file instead when the
    /// stage captures it.
    pub fn run_command(&self, tc: &ToolCommand) -> Result<()> {
        if self.dry_run {
            self.log(&format!("DRY-RUN: {tc}"));
            return Ok(());
        }
        self.log(&format!("$ {tc}"));
        tracing::debug!(label = %tc.label, cwd = %tc.cwd.display(), "spawning");

        let mut cmd = Command::new(&tc.program);
        cmd.args(&tc.args).current_dir(&tc.cwd).envs(&tc.env);

        match &tc.stdin {
            Some(p) => {
                let f = fs::File::open(p).map_err(|e| {
                    Error::process(format!("{}: failed to open {}: {e}", tc.label, p.display()))
                })?;
                cmd.stdin(Stdio::from(f));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        let capture_stdout = tc.stdout_append.is_none();
        match &tc.stdout_append {
            Some(p) => {
                let f = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(p)
                    .map_err(|e| {
                        Error::process(format!("{}: failed to open {}: {e}", tc.label, p.display()))
                    })?;
                cmd.stdout(Stdio::from(f));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::process(format!("{}: spawn failed: {e}", tc.label)))?;

        let (tx, rx) = mpsc::channel::<String>();
        if capture_stdout && let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_log_line(&line);
            if line.is_empty() {
                continue;
            }
            self.log(&line);
        }

        let status = child
            .wait()
            .map_err(|e| Error::process(format!("{}: wait failed: {e}", tc.label)))?;
        if !status.success() {
            return Err(Error::process(format!("{} failed: {status}", tc.label)));
        }
        Ok(())
    }
}

impl ToolRunner for ExecCtx {
    fn run_tool(&mut self, cmd: &ToolCommand) -> Result<()> {
        self.run_command(cmd)
    }

    fn note(&mut self, line: &str) {
        self.log(line);
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    exec: BTreeMap<&'static str, TaskExecFn>,
}

impl TaskRegistry {
    pub fn add(&mut self, id: &'static str, f: TaskExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate task executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()>;
}

/// Run the plan one task at a time in dependency order, stopping at the
/// first failure. The failing task's error kind is kept.
pub fn execute_plan(
    doc: &ConfigDoc,
    plan: &Plan,
    reg: &TaskRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    for task in plan.ordered()? {
        let Some(exec) = reg.get(&task.id) else {
            return Err(Error::msg(format!(
                "no executor registered for task '{}'",
                task.id
            )));
        };
        ctx.sink.emit(ExecEvent::TaskStarted {
            id: task.id.clone(),
        });
        ctx.set_task(task.id.clone());
        let start = Instant::now();
        let res = exec(doc, ctx);
        let elapsed_ms = start.elapsed().as_millis();
        match res {
            Ok(()) => ctx.sink.emit(ExecEvent::TaskFinished {
                id: task.id.clone(),
                ok: true,
                error: None,
                elapsed_ms,
            }),
            Err(e) => {
                ctx.sink.emit(ExecEvent::TaskFinished {
                    id: task.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
                let e = e.context(format!("task '{}' failed", task.id));
                ctx.sink.emit(ExecEvent::ExecutorDone {
                    ok: false,
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        }
    }
    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: true,
        error: None,
    });
    Ok(())
}

pub fn builtin_registry() -> Result<TaskRegistry> {
    let mut reg = TaskRegistry::default();
    // Keep this list explicit (compiled-in modules).
    reg.add("core.init", core_init)?;
    crate::modules::kernel::KernelModule::register_tasks(&mut reg)?;
    crate::modules::sandbox::SandboxModule::register_tasks(&mut reg)?;
    crate::modules::extract::ExtractModule::register_tasks(&mut reg)?;
    crate::modules::package::PackageModule::register_tasks(&mut reg)?;
    crate::modules::source::SourceModule::register_tasks(&mut reg)?;
    Ok(reg)
}

fn core_init(doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
    let run = doc.run()?;
    ctx.log(&format!("mode = {}", run.mode.as_str()));
    if ctx.dry_run {
        ctx.log("dry run: mutating steps only report what they would do");
    }

    match run.mode {
        RunMode::Init => {
            ctx.log(&format!("release = {}", run.require("release", &run.release)?));
            ctx.log(&format!("kernel_src = {}", run.kernel_src()?.display()));
            ctx.log(&format!("work_dir = {}", run.work_dir()?.display()));
        }
        RunMode::DevInit => {
            ctx.log(&format!("kernel_src = {}", run.kernel_src()?.display()));
            ctx.log(&format!("work_dir = {}", run.work_dir()?.display()));
        }
        RunMode::Build => {
            ctx.log(&format!("work_dir = {}", run.work_dir()?.display()));
        }
        RunMode::ExtractSrc => {
            ctx.log(&format!("kernel_src = {}", run.kernel_src()?.display()));
            ctx.log(&format!(
                "target_dir = {}",
                run.require("target_dir", &run.target_dir)?
            ));
            // Mirroring a source tree needs nothing from the install root.
            return Ok(());
        }
    }

    let cfg: ToolRootConfig = doc.deserialize_path("tool")?.unwrap_or_default();
    let paths = crate::toolroot::load_paths(&cfg)?;
    ctx.log(&format!("tool.root = {}", paths.root.display()));
    ctx.set_tool_paths(paths)?;
    Ok(())
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        for b in &buf[..n] {
            if *b == b'\n' || *b == b'\r' {
                if pending.is_empty() {
                    continue;
                }
                let line = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                let _ = tx.send(line);
            } else {
                pending.push(*b);
            }
        }
    }

    if !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(line);
    }
}

fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
