//! HTTP over the VMM's API socket.

use std::path::{Path, PathBuf};

use hyper::{
    header::{ACCEPT, CONTENT_TYPE},
    Body, Client, Method, Request, StatusCode,
};
use hyperlocal::{UnixConnector, Uri};
use tracing::debug;

use crate::error::TransportError;

const URL_ROOT: &str = "/api/v1";

/// The fixed set of API calls the monitor makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    VmmPing,
    VmmShutdown,
    VmCreate,
    VmBoot,
    VmShutdown,
    VmReboot,
    VmPause,
    VmResume,
}

impl Endpoint {
    pub fn name(self) -> &'static str {
        match self {
            Self::VmmPing => "vmm.ping",
            Self::VmmShutdown => "vmm.shutdown",
            Self::VmCreate => "vm.create",
            Self::VmBoot => "vm.boot",
            Self::VmShutdown => "vm.shutdown",
            Self::VmReboot => "vm.reboot",
            Self::VmPause => "vm.pause",
            Self::VmResume => "vm.resume",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Self::VmmPing => Method::GET,
            _ => Method::PUT,
        }
    }

    pub fn path(self) -> String {
        format!("{URL_ROOT}/{}", self.name())
    }
}

/// A connection to one VMM API socket.
///
/// Idle connections are not pooled, so every exchange starts from a fresh
/// connection and a freshly built request; nothing set up for one call can
/// leak into the next.
pub(crate) struct Channel {
    socket_path: PathBuf,
    client: Client<UnixConnector>,
}

impl Channel {
    pub fn new(socket_path: &Path) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build(UnixConnector);
        Self {
            socket_path: socket_path.to_path_buf(),
            client,
        }
    }

    /// Sends one request and waits for its response.
    ///
    /// A JSON body is sent with matching `Accept`/`Content-Type` headers and
    /// without an `Expect: 100-continue` handshake. Only 200 and 204 count as
    /// success.
    pub async fn exchange(
        &self,
        endpoint: Endpoint,
        json: Option<String>,
    ) -> Result<StatusCode, TransportError> {
        let uri: hyper::Uri = Uri::new(&self.socket_path, &endpoint.path()).into();
        let mut request = Request::builder().method(endpoint.method()).uri(uri);

        let body = match json {
            Some(json) => {
                request = request
                    .header(ACCEPT, "application/json")
                    .header(CONTENT_TYPE, "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };
        let request = request.body(body).map_err(|source| TransportError::Request {
            endpoint: endpoint.name(),
            source,
        })?;

        debug!(
            socket = %self.socket_path.display(),
            method = %endpoint.method(),
            endpoint = endpoint.name(),
            "sending request"
        );

        let response = self
            .client
            .request(request)
            .await
            .map_err(|source| TransportError::Channel {
                endpoint: endpoint.name(),
                source,
            })?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|source| TransportError::Channel {
                endpoint: endpoint.name(),
                source,
            })?;

        debug!(endpoint = endpoint.name(), status = status.as_u16(), "got response");

        match status {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(status),
            _ => Err(TransportError::Status {
                endpoint: endpoint.name(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}
