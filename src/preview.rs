//! Preview launcher.
//!
//! Runs a session's generated `main.py` as a local UI process. At most one
//! preview runs per session; launching again replaces the previous process
//! without waiting for it to exit. Readiness is a fixed delay followed by a
//! check that the process has not already died. Nothing probes the port, so a
//! successful launch does not prove the app is serving yet.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::errors::{BuilderError, Result};
use crate::session::UiFramework;
use crate::util::{strip_code_fences, write_atomic};
use crate::workspace::{MAIN_FILE, OutputLayout, PREVIEW_LOG_FILE};

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub streamlit_port: u16,
    pub gradio_port: u16,
    pub readiness_delay: Duration,
    pub streamlit_command: String,
    pub python_command: String,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            streamlit_port: 8501,
            gradio_port: 7860,
            readiness_delay: Duration::from_millis(2000),
            streamlit_command: "streamlit".to_string(),
            python_command: "python".to_string(),
        }
    }
}

/// Classify generated code by the UI library it uses.
pub fn detect_ui_framework(code: &str) -> Option<UiFramework> {
    if code.contains("streamlit") {
        Some(UiFramework::Streamlit)
    } else if code.contains("gr.Interface") || code.contains("gradio") {
        Some(UiFramework::Gradio)
    } else {
        None
    }
}

/// Public view of a running preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewInfo {
    pub session_id: String,
    pub framework: UiFramework,
    pub preview_url: String,
    pub pid: u32,
    pub port: u16,
    pub log_file: PathBuf,
    pub started_at: DateTime<Utc>,
}

struct PreviewHandle {
    child: Child,
    info: PreviewInfo,
}

/// Session-keyed registry of preview processes.
#[derive(Clone)]
pub struct PreviewRegistry {
    settings: PreviewSettings,
    layout: OutputLayout,
    running: Arc<tokio::sync::Mutex<HashMap<String, PreviewHandle>>>,
}

impl PreviewRegistry {
    pub fn new(settings: PreviewSettings, layout: OutputLayout) -> Self {
        Self {
            settings,
            layout,
            running: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &PreviewSettings {
        &self.settings
    }

    fn command_for(&self, framework: UiFramework, port: u16) -> Command {
        match framework {
            UiFramework::Streamlit => {
                let mut cmd = Command::new(&self.settings.streamlit_command);
                cmd.args([
                    "run",
                    MAIN_FILE,
                    "--server.port",
                    &port.to_string(),
                    "--server.headless",
                    "true",
                ]);
                cmd
            }
            UiFramework::Gradio => {
                let mut cmd = Command::new(&self.settings.python_command);
                cmd.arg(MAIN_FILE)
                    .env("GRADIO_SERVER_PORT", port.to_string());
                cmd
            }
        }
    }

    fn port_and_url(&self, framework: UiFramework) -> (u16, String) {
        match framework {
            UiFramework::Streamlit => {
                let port = self.settings.streamlit_port;
                (port, format!("http://localhost:{}", port))
            }
            UiFramework::Gradio => {
                let port = self.settings.gradio_port;
                (port, format!("http://127.0.0.1:{}/", port))
            }
        }
    }

    /// Start (or restart) the preview for a built session.
    pub async fn launch(&self, session_id: &str) -> Result<PreviewInfo> {
        let dir = self.layout.session_dir(session_id)?;
        let main_path = dir.join(MAIN_FILE);
        let code = match tokio::fs::read_to_string(&main_path).await {
            Ok(code) => code,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BuilderError::NotFound(format!(
                    "No generated agent for session '{}'",
                    session_id
                )));
            }
            Err(e) => return Err(BuilderError::io(main_path, e)),
        };

        let cleaned = strip_code_fences(&code);
        if cleaned != code {
            write_atomic(&main_path, &cleaned)?;
            tracing::debug!(session_id, "stripped code fences from main.py");
        }

        let framework = detect_ui_framework(&cleaned).ok_or_else(|| {
            BuilderError::InvalidInput(
                "Could not detect UI framework (streamlit or gradio) in main.py".into(),
            )
        })?;
        let (port, preview_url) = self.port_and_url(framework);

        self.terminate_prior(session_id).await;
        free_port(port).await;

        let log_file = dir.join(PREVIEW_LOG_FILE);
        let log = std::fs::File::create(&log_file).map_err(|e| BuilderError::io(&log_file, e))?;
        let log_err = log.try_clone().map_err(|e| BuilderError::io(&log_file, e))?;

        let mut child = self
            .command_for(framework, port)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuilderError::Process(format!("failed to launch {}: {}", framework, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| BuilderError::Process("preview process exited immediately".into()))?;

        tokio::time::sleep(self.settings.readiness_delay).await;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                tracing::warn!(session_id, pid, %status, "preview exited during startup");
                return Err(BuilderError::Process(format!(
                    "{} preview exited with {}; see {}",
                    framework,
                    status,
                    log_file.display()
                )));
            }
            Err(e) => {
                let _ = child.start_kill();
                return Err(BuilderError::Process(format!(
                    "could not poll preview process {}: {}",
                    pid, e
                )));
            }
        }

        let info = PreviewInfo {
            session_id: session_id.to_string(),
            framework,
            preview_url,
            pid,
            port,
            log_file,
            started_at: Utc::now(),
        };
        tracing::info!(session_id, pid, port, %framework, "preview started");

        self.running
            .lock()
            .await
            .insert(session_id.to_string(), PreviewHandle { child, info: info.clone() });
        Ok(info)
    }

    /// Send a kill to the session's previous preview, if any, without waiting.
    async fn terminate_prior(&self, session_id: &str) {
        let prior = self.running.lock().await.remove(session_id);
        if let Some(mut handle) = prior {
            if let Err(e) = handle.child.start_kill() {
                tracing::warn!(session_id, pid = handle.info.pid, error = %e, "failed to signal prior preview");
            } else {
                tracing::info!(session_id, pid = handle.info.pid, "replacing prior preview");
            }
        }
    }

    /// The session's preview, if its process is still alive.
    pub async fn lookup(&self, session_id: &str) -> Option<PreviewInfo> {
        let mut running = self.running.lock().await;
        reap_exited(&mut running);
        running.get(session_id).map(|h| h.info.clone())
    }

    /// Kill the session's preview. Returns whether one was running.
    pub async fn stop(&self, session_id: &str) -> Result<bool> {
        let handle = self.running.lock().await.remove(session_id);
        let Some(mut handle) = handle else {
            return Ok(false);
        };
        handle.child.kill().await.map_err(|e| {
            BuilderError::Process(format!("failed to stop preview {}: {}", handle.info.pid, e))
        })?;
        tracing::info!(session_id, pid = handle.info.pid, "preview stopped");
        Ok(true)
    }

    /// Kill every preview. Called on server shutdown.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        for (session_id, mut handle) in running.drain() {
            tracing::info!(%session_id, pid = handle.info.pid, "shutting down preview");
            if let Err(e) = handle.child.kill().await {
                tracing::warn!(%session_id, error = %e, "failed to kill preview");
            }
        }
    }

    pub async fn running_count(&self) -> usize {
        let mut running = self.running.lock().await;
        reap_exited(&mut running);
        running.len()
    }
}

/// Drop entries whose process has exited, e.g. one killed when another
/// session's preview freed the shared port.
fn reap_exited(running: &mut HashMap<String, PreviewHandle>) {
    running.retain(|session_id, handle| match handle.child.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            tracing::info!(%session_id, pid = handle.info.pid, %status, "preview no longer running");
            false
        }
        Err(e) => {
            tracing::warn!(%session_id, pid = handle.info.pid, error = %e, "could not poll preview");
            true
        }
    });
}

/// Kill whatever holds `port`. Best effort: a missing `lsof` or an empty
/// port is not an error.
async fn free_port(port: u16) {
    let output = Command::new("lsof")
        .args(["-t", &format!("-i:{}", port)])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    let Ok(output) = output else {
        return;
    };
    for pid in String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
    {
        tracing::info!(port, pid, "freeing port");
        let _ = Command::new("kill")
            .args(["-9", pid])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn registry(settings: PreviewSettings) -> (TempDir, PreviewRegistry) {
        let dir = tempdir().unwrap();
        let reg = PreviewRegistry::new(settings, OutputLayout::new(dir.path()));
        (dir, reg)
    }

    fn shell_settings() -> PreviewSettings {
        PreviewSettings {
            streamlit_port: 59_501,
            gradio_port: 59_502,
            readiness_delay: Duration::from_millis(200),
            streamlit_command: "false".into(),
            python_command: "sh".into(),
        }
    }

    fn write_main(dir: &TempDir, session_id: &str, code: &str) {
        let session_dir = dir.path().join(session_id);
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join(MAIN_FILE), code).unwrap();
    }

    #[test]
    fn detects_frameworks_by_signature() {
        assert_eq!(
            detect_ui_framework("import streamlit as st\nst.title('x')"),
            Some(UiFramework::Streamlit)
        );
        assert_eq!(
            detect_ui_framework("demo = gr.Interface(fn=answer, inputs='text')"),
            Some(UiFramework::Gradio)
        );
        assert_eq!(detect_ui_framework("import gradio as gr"), Some(UiFramework::Gradio));
        assert_eq!(detect_ui_framework("print('hello')"), None);
    }

    #[tokio::test]
    async fn launch_without_artifact_is_not_found() {
        let (_dir, reg) = registry(shell_settings());
        let err = reg.launch("s1").await.unwrap_err();
        assert!(matches!(err, BuilderError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_framework_is_rejected() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "print('no ui here')\n");
        let err = reg.launch("s1").await.unwrap_err();
        assert!(matches!(err, BuilderError::InvalidInput(_)));
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test]
    async fn process_that_dies_during_startup_is_a_process_error() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "import streamlit as st\n");
        let err = reg.launch("s1").await.unwrap_err();
        assert!(matches!(err, BuilderError::Process(_)), "{:?}", err);
        assert!(reg.lookup("s1").await.is_none());
    }

    #[tokio::test]
    async fn launch_strips_fences_and_registers_process() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "```python\n# import gradio as gr\nsleep 30\n```\n");

        let info = reg.launch("s1").await.unwrap();
        assert_eq!(info.framework, UiFramework::Gradio);
        assert_eq!(info.preview_url, "http://127.0.0.1:59502/");
        assert!(info.log_file.ends_with(PREVIEW_LOG_FILE));

        let code = std::fs::read_to_string(dir.path().join("s1").join(MAIN_FILE)).unwrap();
        assert!(!code.contains("```"));
        assert_eq!(reg.lookup("s1").await.map(|i| i.pid), Some(info.pid));

        assert!(reg.stop("s1").await.unwrap());
        assert!(!reg.stop("s1").await.unwrap());
    }

    #[tokio::test]
    async fn relaunch_replaces_prior_process() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "# gradio\nsleep 30\n");

        let first = reg.launch("s1").await.unwrap();
        let second = reg.launch("s1").await.unwrap();
        assert_ne!(first.pid, second.pid);
        assert_eq!(reg.running_count().await, 1);

        reg.shutdown().await;
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test]
    async fn externally_killed_preview_is_evicted() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "# gradio\nsleep 30\n");
        let info = reg.launch("s1").await.unwrap();
        assert_eq!(reg.running_count().await, 1);

        // Same effect as another session's launch freeing the shared port.
        let status = std::process::Command::new("kill")
            .args(["-9", &info.pid.to_string()])
            .status()
            .unwrap();
        assert!(status.success());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(reg.lookup("s1").await.is_none());
        assert_eq!(reg.running_count().await, 0);
        assert!(!reg.stop("s1").await.unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropped_registry_kills_its_previews() {
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "# gradio\nsleep 30\n");
        let pid = reg.launch("s1").await.unwrap().pid;
        drop(reg);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Killed processes may linger as zombies until reaped.
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
        let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
        assert!(matches!(state, None | Some("Z") | Some("X")), "still running: {}", stat);
    }

    #[tokio::test]
    async fn launch_success_does_not_prove_the_app_is_serving() {
        // The readiness check only asks whether the process is still alive.
        // A process that never binds its port still counts as launched.
        let (dir, reg) = registry(shell_settings());
        write_main(&dir, "s1", "# gradio\nsleep 30\n");
        let info = reg.launch("s1").await.unwrap();
        let connect = std::net::TcpStream::connect(("127.0.0.1", info.port));
        assert!(connect.is_err());
        reg.shutdown().await;
    }
}
