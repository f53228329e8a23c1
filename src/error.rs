use std::path::PathBuf;

use thiserror::Error;

use crate::domain::instance::{JobKind, JobOwner};

/// Failures while turning a machine definition into a VMM configuration
/// document. No partial document is ever returned alongside one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("kernel image path in this domain is not defined")]
    MissingKernel,

    #[error("network type '{0}' is not supported, only ethernet and vhost-user are")]
    UnsupportedNetType(&'static str),

    #[error("vhost-user backend must be a unix socket, got '{0}'")]
    VhostUserNotUnix(&'static str),

    #[error("virtio rx_queue_size {rx} does not match tx_queue_size {tx}")]
    QueueSizeMismatch { rx: u32, tx: u32 },

    #[error("failed to translate net prefix {0} to a netmask")]
    InvalidPrefix(u8),

    #[error("memory size of {0} KiB does not fit in bytes")]
    MemoryTooLarge(u64),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot create socket directory '{path}'")]
    SocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn VMM '{binary}'")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open VMM log file '{path}'")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("VMM did not answer a ping after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("failed to build request for {endpoint}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: hyper::http::Error,
    },

    #[error("request to {endpoint} failed")]
    Channel {
        endpoint: &'static str,
        #[source]
        source: hyper::Error,
    },

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("serializing configuration document failed")]
    Encode(#[from] serde_json::Error),

    #[error("monitor is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(
        "cannot acquire state change lock for {instance}: requested {requested}, \
         current job is {active} owned by {owner}"
    )]
    Timeout {
        instance: String,
        requested: JobKind,
        active: JobKind,
        owner: JobOwner,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Job(#[from] JobError),
}

pub type Result<T> = std::result::Result<T, Error>;
