//! Per-instance state shared by every caller operating on one machine, and the
//! job slot that admits one state-changing operation at a time.
//!
//! The instance lock is taken with [`Instance::lock`]. A job is started on the
//! resulting guard with [`InstanceGuard::begin_job`], which waits (releasing
//! the lock while it does) until the slot is free or the wait budget runs out.
//! The guard may be held for the whole job or dropped and re-taken for
//! [`InstanceGuard::end_job`]; the slot stays claimed either way.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::{
    sync::{Mutex, MutexGuard, Notify},
    time::Instant,
};
use tracing::{debug, warn};

use super::MachineDef;
use crate::error::JobError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobKind {
    #[default]
    None,
    /// Read-only access to the VMM.
    Query,
    /// Tearing the instance down.
    Destroy,
    /// Anything that changes guest state.
    Modify,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Query => "query",
            Self::Destroy => "destroy",
            Self::Modify => "modify",
        };
        f.write_str(name)
    }
}

/// Identifies the caller that was admitted into a job slot.
///
/// Tasks migrate between runtime threads, so each admission gets its own
/// ticket and the thread it was admitted on is kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOwner {
    ticket: u64,
    thread: Option<String>,
}

impl JobOwner {
    fn claim() -> Self {
        static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

        let current = std::thread::current();
        let thread = current
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        Self {
            ticket: NEXT_TICKET.fetch_add(1, Ordering::Relaxed),
            thread: Some(thread),
        }
    }

    pub fn is_nobody(&self) -> bool {
        self.ticket == 0
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl fmt::Display for JobOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(thread) if !self.is_nobody() => write!(f, "job #{} on {}", self.ticket, thread),
            _ => f.write_str("nobody"),
        }
    }
}

#[derive(Debug, Default)]
struct JobSlot {
    active: JobKind,
    owner: JobOwner,
}

impl JobSlot {
    fn reset(&mut self) {
        self.active = JobKind::None;
        self.owner = JobOwner::default();
    }
}

/// Observed state of the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    Shutoff,
    Running,
    Paused,
}

#[derive(Debug, Default)]
pub struct InstanceState {
    job: JobSlot,
    status: RunStatus,
}

/// One managed machine: its definition plus the state guarded by the
/// instance lock.
#[derive(Debug)]
pub struct Instance {
    def: MachineDef,
    state: Mutex<InstanceState>,
    job_cond: Notify,
    job_wait: Duration,
}

impl Instance {
    pub fn new(def: MachineDef, job_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            def,
            state: Mutex::new(InstanceState::default()),
            job_cond: Notify::new(),
            job_wait,
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &MachineDef {
        &self.def
    }

    pub async fn lock(&self) -> InstanceGuard<'_> {
        InstanceGuard {
            instance: self,
            state: self.state.lock().await,
        }
    }
}

/// Proof that the instance lock is held.
pub struct InstanceGuard<'a> {
    instance: &'a Instance,
    state: MutexGuard<'a, InstanceState>,
}

impl<'a> InstanceGuard<'a> {
    /// Claims the job slot for `kind`.
    ///
    /// While another job holds the slot the instance lock is released and the
    /// caller waits on the slot condition, re-taking the lock on every wake.
    /// If the slot is still busy once the wait budget is spent the lock is
    /// released and a timeout naming the current job and its owner is
    /// returned. The current job is not disturbed.
    pub async fn begin_job(self, kind: JobKind) -> Result<InstanceGuard<'a>, JobError> {
        let InstanceGuard {
            instance,
            mut state,
        } = self;
        let deadline = Instant::now() + instance.job_wait;

        while state.job.active != JobKind::None {
            debug!(
                instance = instance.name(),
                job = %kind,
                "waiting on job condition for starting job"
            );

            let notified = instance.job_cond.notified();
            tokio::pin!(notified);
            // Register before giving up the lock so an end_job in between is
            // not missed.
            notified.as_mut().enable();
            drop(state);

            let woken = tokio::time::timeout_at(deadline, notified).await.is_ok();
            state = instance.state.lock().await;

            if !woken && state.job.active != JobKind::None {
                warn!(
                    instance = instance.name(),
                    requested = %kind,
                    active = %state.job.active,
                    owner = %state.job.owner,
                    "cannot start job"
                );
                return Err(JobError::Timeout {
                    instance: instance.name().to_owned(),
                    requested: kind,
                    active: state.job.active,
                    owner: state.job.owner.clone(),
                });
            }
        }

        // A previous owner may have died without ending its job cleanly.
        state.job.reset();

        debug!(instance = instance.name(), job = %kind, "starting job");
        state.job.active = kind;
        state.job.owner = JobOwner::claim();

        Ok(InstanceGuard { instance, state })
    }

    /// Releases the job slot and wakes one waiter.
    pub fn end_job(&mut self) {
        debug!(
            instance = self.instance.name(),
            job = %self.state.job.active,
            "stopping job"
        );
        self.state.job.reset();
        self.instance.job_cond.notify_one();
    }

    pub fn instance(&self) -> &'a Instance {
        self.instance
    }

    pub fn job(&self) -> JobKind {
        self.state.job.active
    }

    pub fn job_owner(&self) -> &JobOwner {
        &self.state.job.owner
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.state.status = status;
    }
}

/// Name-indexed table of live instances. Anything that is not the owning
/// monitor refers to an instance by name and resolves it here.
#[derive(Debug, Default)]
pub struct InstanceTable {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `instance`, returning the one it replaced, if any.
    pub fn insert(&self, instance: Arc<Instance>) -> Option<Arc<Instance>> {
        self.instances
            .write()
            .insert(instance.name().to_owned(), instance)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Instance>> {
        self.instances.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Instance>> {
        self.instances.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }
}
