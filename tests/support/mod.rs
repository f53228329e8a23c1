//! A stand-in for the VMM API: a hyper server on the instance socket that
//! records every request it gets.

#![allow(dead_code)]

use std::{
    convert::Infallible,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chvisor_lib::{
    config::MonitorConfig,
    domain::{instance::Instance, MachineDef, OsDef, VcpuDef},
};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use hyperlocal::UnixServerExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub expect: Option<String>,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is JSON")
    }
}

type Responder = Arc<dyn Fn(&Method, &str) -> StatusCode + Send + Sync>;

pub struct FakeVmm {
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl FakeVmm {
    /// Answers every request with 204.
    pub fn start(socket: &Path) -> Self {
        Self::with_responder(socket, |_, _| StatusCode::NO_CONTENT)
    }

    pub fn with_responder(
        socket: &Path,
        respond: impl Fn(&Method, &str) -> StatusCode + Send + Sync + 'static,
    ) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let recorded = requests.clone();
        let make_svc = make_service_fn(move |_| {
            let recorded = recorded.clone();
            let respond = respond.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let recorded = recorded.clone();
                    let respond = respond.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = hyper::body::to_bytes(body).await?;
                        let header = |name: &str| {
                            parts
                                .headers
                                .get(name)
                                .map(|v| v.to_str().unwrap_or_default().to_owned())
                        };
                        let request = Recorded {
                            method: parts.method.clone(),
                            path: parts.uri.path().to_owned(),
                            content_type: header("content-type"),
                            accept: header("accept"),
                            expect: header("expect"),
                            body: String::from_utf8_lossy(&body).into_owned(),
                        };
                        let status = respond(&request.method, &request.path);
                        recorded.lock().push(request);

                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .body(Body::empty())
                                .expect("valid response"),
                        )
                    }
                }))
            }
        });

        let server = Server::bind_unix(socket).expect("bind fake VMM socket");
        let task = tokio::spawn(async move {
            let _ = server.serve(make_svc).await;
        });

        Self { requests, task }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

impl Drop for FakeVmm {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 1 of 1 vcpus online, 128 MiB, a kernel, and `true` standing in for the
/// VMM binary so the fake server is the only thing on the socket.
pub fn minimal_def(name: &str) -> MachineDef {
    MachineDef {
        name: name.into(),
        emulator: Some(PathBuf::from("true")),
        vcpus: vec![VcpuDef { online: true }],
        memory_kib: 128 * 1024,
        os: OsDef {
            kernel: Some(PathBuf::from("/boot/vmlinux")),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn instance(def: MachineDef) -> Arc<Instance> {
    Instance::new(def, Duration::from_secs(5))
}

pub fn monitor_config(socket_dir: &Path) -> MonitorConfig {
    let mut config = MonitorConfig::new(socket_dir);
    config.terminate_grace = Duration::from_millis(500);
    config
}

/// Writes an executable stand-in VMM into `dir` that records its pid in
/// `{dir}/vmm.pid` and then sleeps until killed. With `ignore_term` the
/// process survives SIGTERM and only SIGKILL gets rid of it.
pub fn long_running_vmm(dir: &Path, ignore_term: bool) -> PathBuf {
    let pid_file = dir.join("vmm.pid");
    let trap = if ignore_term { "trap '' TERM\n" } else { "" };
    let script = format!(
        "#!/bin/sh\n{trap}echo $$ > '{}.tmp' && mv '{}.tmp' '{}'\nexec sleep 1000\n",
        pid_file.display(),
        pid_file.display(),
        pid_file.display(),
    );

    let path = dir.join("fake-vmm.sh");
    std::fs::write(&path, script).expect("write stand-in VMM");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make stand-in VMM executable");
    path
}

/// Waits for the pid written by [`long_running_vmm`].
pub fn recorded_pid(dir: &Path) -> i32 {
    let pid_file = dir.join("vmm.pid");
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(text) = std::fs::read_to_string(&pid_file) {
            return text.trim().parse().expect("pid file holds a pid");
        }
        assert!(Instant::now() < deadline, "stand-in VMM never wrote its pid");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Whether `pid` still names a process (zombies included).
pub fn is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
