//! The monitor: one VMM process, its API channel, and the instance it runs.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use self::{
    builder::build_vm_json,
    client::{Channel, Endpoint},
    process::{remove_socket, socket_path, VmmProcess},
};
use crate::{
    config::MonitorConfig,
    domain::instance::Instance,
    error::{Result, TransportError},
};

pub mod builder;
pub mod client;
pub mod models;
pub mod process;

pub struct Monitor {
    socket_path: Option<PathBuf>,
    process: Option<VmmProcess>,
    channel: Mutex<Option<Channel>>,
    instance: Option<Arc<Instance>>,
    terminate_grace: Duration,
}

impl Monitor {
    /// Launches a VMM for `instance` with its API socket in `socket_dir`,
    /// using default settings otherwise.
    pub async fn new(instance: Arc<Instance>, socket_dir: &Path) -> Result<Self> {
        Self::with_config(instance, &MonitorConfig::new(socket_dir)).await
    }

    /// Launches a VMM for `instance` and waits until it answers pings.
    ///
    /// If the VMM never becomes ready, the process is torn down and its
    /// socket removed before the error is returned.
    pub async fn with_config(instance: Arc<Instance>, config: &MonitorConfig) -> Result<Self> {
        let socket_path = socket_path(&config.socket_dir, instance.name());
        let process = VmmProcess::launch(instance.def(), &socket_path, config).await?;

        let mut monitor = Self {
            channel: Mutex::new(Some(Channel::new(&socket_path))),
            socket_path: Some(socket_path),
            process: Some(process),
            instance: Some(instance),
            terminate_grace: config.terminate_grace,
        };

        if let Err(e) = monitor
            .wait_ready(config.readiness_attempts, config.readiness_interval)
            .await
        {
            monitor.close().await;
            return Err(e);
        }

        Ok(monitor)
    }

    async fn wait_ready(&self, attempts: u32, interval: Duration) -> Result<()> {
        for attempt in 1..=attempts {
            match self.ping().await {
                Ok(()) => {
                    debug!(attempt, "VMM is ready");
                    return Ok(());
                }
                Err(e) => debug!(attempt, error = %e, "VMM not ready"),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(TransportError::NotReady { attempts }.into())
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(VmmProcess::pid)
    }

    pub fn instance(&self) -> Option<&Arc<Instance>> {
        self.instance.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.instance.is_none()
    }

    async fn exchange(&self, endpoint: Endpoint, json: Option<String>) -> Result<()> {
        let channel = self.channel.lock().await;
        let channel = channel.as_ref().ok_or(TransportError::Closed)?;
        channel.exchange(endpoint, json).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.exchange(Endpoint::VmmPing, None).await
    }

    /// Sends the configuration built from the instance's definition. Nothing
    /// is sent if the definition cannot be translated.
    pub async fn create(&self) -> Result<()> {
        let instance = self.instance.as_ref().ok_or(TransportError::Closed)?;
        let body = build_vm_json(instance.def())?;
        self.exchange(Endpoint::VmCreate, Some(body)).await
    }

    pub async fn boot(&self) -> Result<()> {
        self.exchange(Endpoint::VmBoot, None).await
    }

    pub async fn reboot(&self) -> Result<()> {
        self.exchange(Endpoint::VmReboot, None).await
    }

    pub async fn shutdown_guest(&self) -> Result<()> {
        self.exchange(Endpoint::VmShutdown, None).await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.exchange(Endpoint::VmPause, None).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.exchange(Endpoint::VmResume, None).await
    }

    /// Asks the VMM process itself to exit.
    pub async fn shutdown_control_plane(&self) -> Result<()> {
        self.exchange(Endpoint::VmmShutdown, None).await
    }

    /// Stops the VMM, drops the channel, removes the socket and lets go of
    /// the instance. Every step happens at most once, so calling this again
    /// is harmless.
    pub async fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate(self.terminate_grace).await;
        }

        self.channel.get_mut().take();

        if let Some(path) = self.socket_path.take() {
            remove_socket(&path);
        }

        if let Some(instance) = self.instance.take() {
            info!(instance = instance.name(), "monitor closed");
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            warn!(pid = process.pid(), "monitor dropped without close, killing VMM");
            process.abort();
        }
        if let Some(path) = self.socket_path.take() {
            remove_socket(&path);
        }
    }
}
