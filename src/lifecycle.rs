//! Guest lifecycle operations, each run as a job on the instance.
//!
//! The instance lock is held from job admission until the job ends, and the
//! job is ended whether or not the monitor call succeeded.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::MonitorConfig,
    domain::instance::{Instance, JobKind, RunStatus},
    error::{Result, TransportError},
    vm::Monitor,
};

fn instance_of(monitor: &Monitor) -> Result<Arc<Instance>> {
    Ok(monitor.instance().cloned().ok_or(TransportError::Closed)?)
}

/// Launches a VMM for `instance`, creates the guest and boots it.
///
/// On failure after launch the monitor is closed again, so nothing is left
/// running.
pub async fn start(instance: &Arc<Instance>, config: &MonitorConfig) -> Result<Monitor> {
    let mut guard = instance.lock().await.begin_job(JobKind::Modify).await?;

    let result = launch_and_boot(instance, config).await;
    if result.is_ok() {
        guard.set_status(RunStatus::Running);
        info!(instance = instance.name(), "guest started");
    }
    guard.end_job();
    result
}

async fn launch_and_boot(instance: &Arc<Instance>, config: &MonitorConfig) -> Result<Monitor> {
    let mut monitor = Monitor::with_config(instance.clone(), config).await?;

    let booted = match monitor.create().await {
        Ok(()) => monitor.boot().await,
        Err(e) => Err(e),
    };
    if let Err(e) = booted {
        monitor.close().await;
        return Err(e);
    }

    Ok(monitor)
}

/// Shuts the guest down, then the VMM, and closes the monitor.
///
/// If the guest refuses, the monitor stays open and the error is returned.
pub async fn shutdown(monitor: &mut Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Modify).await?;

    let result = monitor.shutdown_guest().await;
    if result.is_ok() {
        // The VMM may go away before it answers.
        if let Err(e) = monitor.shutdown_control_plane().await {
            warn!(instance = instance.name(), error = %e, "VMM shutdown request failed");
        }
        monitor.close().await;
        guard.set_status(RunStatus::Shutoff);
        info!(instance = instance.name(), "guest shut down");
    }

    guard.end_job();
    result
}

/// Tears the VMM down without asking the guest.
pub async fn destroy(monitor: &mut Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Destroy).await?;

    monitor.close().await;
    guard.set_status(RunStatus::Shutoff);
    info!(instance = instance.name(), "guest destroyed");

    guard.end_job();
    Ok(())
}

pub async fn reboot(monitor: &Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Modify).await?;

    let result = monitor.reboot().await;
    if result.is_ok() {
        guard.set_status(RunStatus::Running);
    }

    guard.end_job();
    result
}

pub async fn suspend(monitor: &Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Modify).await?;

    let result = monitor.suspend().await;
    if result.is_ok() {
        guard.set_status(RunStatus::Paused);
    }

    guard.end_job();
    result
}

pub async fn resume(monitor: &Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Modify).await?;

    let result = monitor.resume().await;
    if result.is_ok() {
        guard.set_status(RunStatus::Running);
    }

    guard.end_job();
    result
}

/// Checks that the VMM still answers.
pub async fn ping(monitor: &Monitor) -> Result<()> {
    let instance = instance_of(monitor)?;
    let mut guard = instance.lock().await.begin_job(JobKind::Query).await?;

    let result = monitor.ping().await;

    guard.end_job();
    result
}
