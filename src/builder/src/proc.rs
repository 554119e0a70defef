//! Container runtime detection.
//!
//! Reports which container runtime (if any) the process is executing
//! inside by inspecting cgroup membership, well-known filesystem paths,
//! the PID 1 command line, the kernel version signature, and environment
//! variables. Surfaced to the caller for logging and feature gating; it
//! does not influence the engine's behavior.

use std::path::Path;

/// Known container runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Rkt,
    Nspawn,
    Lxc,
    LxcLibvirt,
    OpenVz,
    Kubernetes,
    Garden,
    Podman,
    Gvisor,
    Firejail,
    Wsl,
    NotFound,
}

/// All detectable runtimes, in probe order.
pub const CONTAINER_RUNTIMES: [ContainerRuntime; 12] = [
    ContainerRuntime::Docker,
    ContainerRuntime::Rkt,
    ContainerRuntime::Nspawn,
    ContainerRuntime::Lxc,
    ContainerRuntime::LxcLibvirt,
    ContainerRuntime::OpenVz,
    ContainerRuntime::Kubernetes,
    ContainerRuntime::Garden,
    ContainerRuntime::Podman,
    ContainerRuntime::Gvisor,
    ContainerRuntime::Firejail,
    ContainerRuntime::Wsl,
];

impl ContainerRuntime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Rkt => "rkt",
            Self::Nspawn => "systemd-nspawn",
            Self::Lxc => "lxc",
            Self::LxcLibvirt => "lxc-libvirt",
            Self::OpenVz => "openvz",
            Self::Kubernetes => "kubernetes",
            Self::Garden => "garden",
            Self::Podman => "podman",
            Self::Gvisor => "gvisor",
            Self::Firejail => "firejail",
            Self::Wsl => "wsl",
            Self::NotFound => "not-found",
        }
    }

    /// Substring identifying this runtime in cgroup paths, cmdlines, and
    /// the `container` environment variable.
    fn marker(&self) -> &'static str {
        match self {
            Self::Kubernetes => "kube",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detect the container runtime the current process is running in.
pub fn container_runtime() -> ContainerRuntime {
    container_runtime_for(None, None)
}

/// Detect the container runtime for a specific process. With `tgid` set,
/// the per-task cgroup file is consulted; with neither set, "self".
pub fn container_runtime_for(tgid: Option<u32>, pid: Option<u32>) -> ContainerRuntime {
    let cgroup_file = match (tgid, pid) {
        (Some(tgid), Some(pid)) => format!("/proc/{}/task/{}/cgroup", tgid, pid),
        (None, Some(pid)) => format!("/proc/{}/cgroup", pid),
        _ => "/proc/self/cgroup".to_string(),
    };

    if let Some(runtime) = match_runtime(&read_file_string(&cgroup_file)) {
        return runtime;
    }

    // /proc/vz exists inside and outside OpenVZ containers; /proc/bc only
    // outside.
    if file_exists("/proc/vz") && !file_exists("/proc/bc") {
        return ContainerRuntime::OpenVz;
    }

    // gVisor containers expose this directory.
    if file_exists("/__runsc_containers__") {
        return ContainerRuntime::Gvisor;
    }

    // firejail cannot run with argv[0] other than "firejail", so PID 1's
    // cmdline is reliable for it.
    if let Some(runtime) = match_runtime(&read_file_string("/proc/1/cmdline")) {
        return runtime;
    }

    // WSL kernels advertise a Microsoft version signature.
    if read_file_string("/proc/version_signature").starts_with("Microsoft") {
        return ContainerRuntime::Wsl;
    }

    if let Some(runtime) = match_runtime(&std::env::var("container").unwrap_or_default()) {
        return runtime;
    }

    // PID 1 may have recorded the runtime; /run/systemd/container avoids
    // needing CAP_SYS_PTRACE for /proc/1/environ.
    if let Some(runtime) = match_runtime(&read_file_string("/run/systemd/container")) {
        return runtime;
    }

    ContainerRuntime::NotFound
}

fn match_runtime(input: &str) -> Option<ContainerRuntime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    CONTAINER_RUNTIMES
        .iter()
        .copied()
        .find(|runtime| input.contains(runtime.marker()))
}

fn file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

fn read_file_string(path: &str) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(_) => String::new(),
    }
}
