//! Diagnostic job supervision
//!
//! Runs at most one long-running analysis process, classifies its streamed
//! output into typed log events and reports the idle/running/completed state
//! machine on the `hacking:status` channel. The supervisor never stays in
//! `running` after a failure.

use blackbox_core::types::{DeviceEvent, JobEvent, JobEventKind, JobStatus};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

/// Spawn configuration for the analysis process
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Analysis binary
    pub program: String,
    /// Fixed arguments placed before the instruction text
    pub args: Vec<String>,
    /// Operating directory
    pub cwd: PathBuf,
    /// Instruction text used when the start command carries none
    pub default_system_prompt: String,
    /// How long a stopped process may ignore SIGTERM before SIGKILL
    pub grace: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
            ],
            cwd: PathBuf::from("/root"),
            default_system_prompt:
                "Perform a security assessment of the local network and summarize the findings."
                    .to_string(),
            grace: Duration::from_secs(3),
        }
    }
}

struct RunHandle {
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    cancel: Arc<Notify>,
}

struct JobState {
    status: JobStatus,
    run: Option<RunHandle>,
}

/// Owner of the single diagnostic job slot
pub struct JobSupervisor {
    config: JobConfig,
    events_tx: mpsc::Sender<DeviceEvent>,
    state: Arc<Mutex<JobState>>,
}

impl JobSupervisor {
    pub fn new(config: JobConfig, events_tx: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            config,
            events_tx,
            state: Arc::new(Mutex::new(JobState {
                status: JobStatus::Idle,
                run: None,
            })),
        }
    }

    pub async fn status(&self) -> JobStatus {
        self.state.lock().await.status
    }

    /// Start the analysis process; a start while running is a no-op
    pub async fn start(&self, system_prompt: Option<String>) {
        let mut state = self.state.lock().await;
        if state.status == JobStatus::Running {
            debug!("Job already running, ignoring start");
            return;
        }

        let prompt = system_prompt.unwrap_or_else(|| self.config.default_system_prompt.clone());

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(&prompt)
            .current_dir(&self.config.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Spawn failure: one error event, then completed
                warn!("Failed to start job process: {}", e);
                state.status = JobStatus::Completed;
                state.run = None;
                self.emit(JobEvent::error(format!("failed to start: {}", e)))
                    .await;
                self.emit_status(JobStatus::Completed).await;
                return;
            }
        };

        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let cancel = Arc::new(Notify::new());
        state.status = JobStatus::Running;
        state.run = Some(RunHandle {
            cancelled: cancelled.clone(),
            cancel: cancel.clone(),
        });
        drop(state);

        info!("Job started: {}", self.config.program);
        self.emit_status(JobStatus::Running).await;

        tokio::spawn(stream_run(
            child,
            cancelled,
            cancel,
            Arc::clone(&self.state),
            self.events_tx.clone(),
            self.config.grace,
        ));
    }

    /// Cancel a running job; a stop while idle or completed is a no-op
    ///
    /// The `idle` status is emitted immediately, before process teardown
    /// completes, so cancellation is observer-visible even if the process
    /// has to be force-killed after the grace period.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.status != JobStatus::Running {
            debug!("No job running, ignoring stop");
            return;
        }

        let run = state.run.take();
        state.status = JobStatus::Idle;
        drop(state);

        info!("Job stop requested");
        self.emit_status(JobStatus::Idle).await;

        if let Some(run) = run {
            run.cancelled
                .store(true, std::sync::atomic::Ordering::SeqCst);
            run.cancel.notify_one();
        }
    }

    /// Kill a running job without emitting events (agent shutdown)
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(run) = state.run.take() {
            state.status = JobStatus::Idle;
            run.cancelled
                .store(true, std::sync::atomic::Ordering::SeqCst);
            run.cancel.notify_one();
        }
    }

    async fn emit(&self, event: JobEvent) {
        let _ = self
            .events_tx
            .send(DeviceEvent::HackingOutput(event))
            .await;
    }

    async fn emit_status(&self, status: JobStatus) {
        let _ = self
            .events_tx
            .send(DeviceEvent::HackingStatus(status))
            .await;
    }
}

/// Stream the process output until exit or cancellation
async fn stream_run(
    mut child: Child,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    cancel: Arc<Notify>,
    state: Arc<Mutex<JobState>>,
    events_tx: mpsc::Sender<DeviceEvent>,
    grace: Duration,
) {
    let mut stream_error: Option<String> = None;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.notified() => {
                    terminate_with_grace(&mut child, grace).await;
                    // stop() already reset the state machine and told
                    // observers; a cancelled run emits nothing further
                    return;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let event = classify_line(&line);
                        let _ = events_tx.send(DeviceEvent::HackingOutput(event)).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        stream_error = Some(e.to_string());
                        break;
                    }
                },
            }
        }
    } else {
        stream_error = Some("job stdout unavailable".to_string());
    }

    let outcome = tokio::select! {
        _ = cancel.notified() => {
            terminate_with_grace(&mut child, grace).await;
            return;
        }
        outcome = child.wait() => outcome,
    };

    let mut state = state.lock().await;
    if cancelled.load(std::sync::atomic::Ordering::SeqCst) {
        // Lost the race with stop(); it already owns the transition
        return;
    }
    state.status = JobStatus::Completed;
    state.run = None;
    drop(state);

    // Natural completion: summary then completed; failure: error then
    // completed. Either way the machine leaves `running`.
    let final_event = match (stream_error, outcome) {
        (Some(e), _) => JobEvent::error(format!("job stream failed: {}", e)),
        (None, Ok(status)) => JobEvent::summary(format!("exit status: {}", status)),
        (None, Err(e)) => JobEvent::error(format!("job wait failed: {}", e)),
    };
    let _ = events_tx.send(DeviceEvent::HackingOutput(final_event)).await;
    let _ = events_tx
        .send(DeviceEvent::HackingStatus(JobStatus::Completed))
        .await;
    info!("Job completed");
}

/// SIGTERM first; SIGKILL if the process outlives the grace period
async fn terminate_with_grace(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!("Job exited within grace period"),
        Err(_) => {
            warn!("Job ignored SIGTERM, force-killing");
            let _ = child.kill().await;
        }
    }
}

/// Classify one streamed line into a typed log event
///
/// Structured lines arrive as JSON `{type, content}`; anything unparsable is
/// forwarded verbatim under the `output` kind rather than dropped.
fn classify_line(line: &str) -> JobEvent {
    if let Ok(Value::Object(map)) = serde_json::from_str(line) {
        if let Some(kind) = map
            .get("type")
            .and_then(Value::as_str)
            .and_then(parse_kind)
        {
            let content = match map.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return JobEvent::new(kind, content);
        }
    }
    JobEvent::output(line)
}

fn parse_kind(s: &str) -> Option<JobEventKind> {
    match s {
        "info" => Some(JobEventKind::Info),
        "tool" | "tool_use" => Some(JobEventKind::Tool),
        "output" => Some(JobEventKind::Output),
        "error" => Some(JobEventKind::Error),
        "summary" => Some(JobEventKind::Summary),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    fn shell_config(grace: Duration) -> JobConfig {
        JobConfig {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string()],
            cwd: PathBuf::from("/tmp"),
            default_system_prompt: "true".to_string(),
            grace,
        }
    }

    fn supervisor(grace: Duration) -> (JobSupervisor, mpsc::Receiver<DeviceEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        (
            JobSupervisor::new(shell_config(grace), events_tx),
            events_rx,
        )
    }

    async fn collect_until_completed(rx: &mut mpsc::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                let done = event == DeviceEvent::HackingStatus(JobStatus::Completed);
                events.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("job did not complete in time");
        events
    }

    #[tokio::test]
    async fn test_natural_run_emits_running_events_summary_completed() {
        let (supervisor, mut rx) = supervisor(Duration::from_secs(3));
        supervisor
            .start(Some(
                "printf '{\"type\":\"info\",\"content\":\"probing\"}\\n'; echo raw".to_string(),
            ))
            .await;

        let events = collect_until_completed(&mut rx).await;

        assert_eq!(events[0], DeviceEvent::HackingStatus(JobStatus::Running));
        assert!(events.contains(&DeviceEvent::HackingOutput(JobEvent::info("probing"))));
        assert!(events.contains(&DeviceEvent::HackingOutput(JobEvent::output("raw"))));

        // The final two events are the summary and the completed status
        let n = events.len();
        assert!(matches!(
            &events[n - 2],
            DeviceEvent::HackingOutput(JobEvent {
                kind: JobEventKind::Summary,
                ..
            })
        ));
        assert_eq!(events[n - 1], DeviceEvent::HackingStatus(JobStatus::Completed));
        assert_eq!(supervisor.status().await, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_noop() {
        let (supervisor, mut rx) = supervisor(Duration::from_secs(3));
        supervisor.start(Some("sleep 5".to_string())).await;
        supervisor.start(Some("sleep 5".to_string())).await;

        sleep(Duration::from_millis(200)).await;
        let mut running_events = 0;
        while let Ok(event) = rx.try_recv() {
            if event == DeviceEvent::HackingStatus(JobStatus::Running) {
                running_events += 1;
            }
        }
        assert_eq!(running_events, 1, "no duplicate status:running");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_emits_idle_immediately_and_no_completed() {
        let (supervisor, mut rx) = supervisor(Duration::from_secs(3));
        supervisor.start(Some("sleep 30".to_string())).await;

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(DeviceEvent::HackingStatus(JobStatus::Running)));

        supervisor.stop().await;
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(second, Some(DeviceEvent::HackingStatus(JobStatus::Idle)));
        assert_eq!(supervisor.status().await, JobStatus::Idle);

        // A cancelled run never reports completed
        sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        // A stop with nothing running is a no-op
        supervisor.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_force_kills_after_grace() {
        let (supervisor, mut rx) = supervisor(Duration::from_millis(300));
        supervisor
            .start(Some("trap '' TERM; sleep 30".to_string()))
            .await;

        // Give the shell a moment to install the trap
        sleep(Duration::from_millis(200)).await;
        supervisor.stop().await;

        let mut saw_idle = false;
        timeout(Duration::from_secs(2), async {
            while let Some(event) = rx.recv().await {
                if event == DeviceEvent::HackingStatus(JobStatus::Idle) {
                    saw_idle = true;
                    break;
                }
            }
        })
        .await
        .expect("idle status not observed within grace bound");
        assert!(saw_idle);
        assert_eq!(supervisor.status().await, JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_spawn_failure_emits_error_then_completed() {
        let (events_tx, mut rx) = mpsc::channel(64);
        let config = JobConfig {
            program: "/nonexistent/analysis-binary".to_string(),
            ..shell_config(Duration::from_secs(3))
        };
        let supervisor = JobSupervisor::new(config, events_tx);
        supervisor.start(None).await;

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(matches!(
            first,
            Some(DeviceEvent::HackingOutput(JobEvent {
                kind: JobEventKind::Error,
                ..
            }))
        ));
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(
            second,
            Some(DeviceEvent::HackingStatus(JobStatus::Completed))
        );
        assert_eq!(supervisor.status().await, JobStatus::Completed);

        // Never stuck: a new start is accepted afterwards
        supervisor.start(None).await;
    }

    #[test]
    fn test_classify_structured_line() {
        let event = classify_line("{\"type\":\"tool\",\"content\":\"nmap -sV\"}");
        assert_eq!(event, JobEvent::new(JobEventKind::Tool, "nmap -sV"));

        let alias = classify_line("{\"type\":\"tool_use\",\"content\":\"curl\"}");
        assert_eq!(alias.kind, JobEventKind::Tool);
    }

    #[test]
    fn test_classify_unparsable_line_falls_back_to_output() {
        let event = classify_line("Scanning 192.168.1.0/24 ...");
        assert_eq!(
            event,
            JobEvent::output("Scanning 192.168.1.0/24 ...")
        );

        // JSON with an unknown type is forwarded verbatim too
        let unknown = classify_line("{\"type\":\"telemetry\",\"content\":\"x\"}");
        assert_eq!(unknown.kind, JobEventKind::Output);
        assert_eq!(unknown.content, "{\"type\":\"telemetry\",\"content\":\"x\"}");
    }

    #[test]
    fn test_classify_non_string_content() {
        let event = classify_line("{\"type\":\"summary\",\"content\":{\"findings\":3}}");
        assert_eq!(event.kind, JobEventKind::Summary);
        assert_eq!(event.content, "{\"findings\":3}");
    }
}
