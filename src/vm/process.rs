//! Launching and reaping the VMM process.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::{config::MonitorConfig, domain::MachineDef, error::TransportError};

/// `{socket_dir}/{name}-socket`
pub fn socket_path(socket_dir: &Path, name: &str) -> PathBuf {
    socket_dir.join(format!("{name}-socket"))
}

/// The binary to run for `def`: its own emulator if it names one, otherwise
/// the configured default.
pub fn vmm_binary(def: &MachineDef, config: &MonitorConfig) -> String {
    match &def.emulator {
        Some(emulator) => emulator.to_string_lossy().into_owned(),
        None => config.vmm_binary.clone(),
    }
}

pub fn vmm_args(socket_path: &Path) -> Vec<String> {
    vec![
        "--api-socket".into(),
        socket_path.to_string_lossy().into_owned(),
    ]
}

/// A running VMM owned by exactly one monitor.
#[derive(Debug)]
pub struct VmmProcess {
    child: Option<Child>,
    pid: Option<u32>,
}

impl VmmProcess {
    /// Spawns the VMM for `def` with its API socket at `socket_path`.
    ///
    /// The socket directory is created first. The process is not waited on;
    /// readiness is up to the caller.
    pub async fn launch(
        def: &MachineDef,
        socket_path: &Path,
        config: &MonitorConfig,
    ) -> Result<Self, TransportError> {
        let binary = vmm_binary(def, config);

        tokio::fs::create_dir_all(&config.socket_dir)
            .await
            .map_err(|source| TransportError::SocketDir {
                path: config.socket_dir.clone(),
                source,
            })?;

        let (stdout, stderr) = match &config.log_dir {
            Some(log_dir) => log_stdio(log_dir, &def.name)?,
            None => (Stdio::null(), Stdio::null()),
        };

        info!(
            instance = %def.name,
            binary = %binary,
            socket = %socket_path.display(),
            "launching VMM"
        );

        let child = Command::new(&binary)
            .args(vmm_args(socket_path))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        let pid = child.id();
        info!(instance = %def.name, pid, "launched VMM");

        Ok(Self {
            child: Some(child),
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is still tracked, i.e. not yet terminated.
    pub fn is_tracked(&self) -> bool {
        self.child.is_some()
    }

    /// Asks the VMM to exit with SIGTERM, giving it `grace` to do so before
    /// it is killed. Does nothing once the process is no longer tracked.
    pub async fn terminate(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Some(pid) = child.id() {
            debug!(pid, "sending SIGTERM to VMM");
            // SAFETY: `pid` is our own child and has not been reaped yet.
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
                warn!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
            }

            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(pid, %status, "VMM exited");
                    return;
                }
                Ok(Err(e)) => warn!(pid, error = %e, "failed waiting for VMM"),
                Err(_) => warn!(pid, "VMM still running after SIGTERM, killing it"),
            }
        }

        if let Err(e) = child.kill().await {
            warn!(pid = self.pid, error = %e, "failed to kill VMM");
        }
    }

    /// Kills the process without waiting for it.
    pub fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(pid = self.pid, error = %e, "failed to kill VMM");
            }
        }
    }
}

fn log_stdio(log_dir: &Path, name: &str) -> Result<(Stdio, Stdio), TransportError> {
    let path = log_dir.join(format!("{name}.log"));
    let open = || -> std::io::Result<std::fs::File> {
        std::fs::create_dir_all(log_dir)?;
        OpenOptions::new().create(true).append(true).open(&path)
    };
    let file = open().map_err(|source| TransportError::LogFile {
        path: path.clone(),
        source,
    })?;
    let stderr = file.try_clone().map_err(|source| TransportError::LogFile {
        path: path.clone(),
        source,
    })?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

/// Removes the API socket, logging rather than failing if that does not work.
pub fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "removed VMM socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            socket = %path.display(),
            error = %e,
            "unable to remove VMM socket file"
        ),
    }
}
