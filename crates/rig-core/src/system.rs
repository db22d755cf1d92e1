//! Host identity of the running agent.
use std::{fs, path::Path, sync::OnceLock, time::Instant};

static AGENT_ID: OnceLock<String> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record the agent start time.
pub fn init_uptime() {
    START_TIME.get_or_init(Instant::now);
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

#[inline]
pub fn platform() -> &'static str {
    std::env::consts::OS
}

#[inline]
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Stable id of this agent process.
///
/// Pods are named after their hostname; containers after their cgroup id; anything else
/// gets a random id for the lifetime of the process.
pub fn agent_id() -> &'static str {
    AGENT_ID.get_or_init(|| {
        if is_kubernetes()
            && let Ok(hostname) = hostname::get()
            && let Some(name) = hostname.to_str()
        {
            return name.to_string();
        }
        if let Some(id) = container_id() {
            return id;
        }
        uuid::Uuid::new_v4().to_string()
    })
}

pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_kubernetes() -> bool {
    std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
        || Path::new("/var/run/secrets/kubernetes.io/serviceaccount").exists()
}

fn container_id() -> Option<String> {
    let cgroup = fs::read_to_string("/proc/self/cgroup").ok()?;
    parse_container_id(&cgroup)
}

/// Scope prefixes used by docker, containerd and cri-o for a container's cgroup.
const SCOPE_PREFIXES: [&str; 3] = ["docker-", "cri-containerd-", "crio-"];

/// Container id from `/proc/self/cgroup`: a 64-char hex path segment, with an optional
/// runtime scope prefix and `.scope` suffix.
fn parse_container_id(cgroup: &str) -> Option<String> {
    cgroup
        .lines()
        .filter_map(|line| line.rsplit(':').next())
        .flat_map(|path| path.split('/'))
        .map(|segment| {
            let segment = segment.strip_suffix(".scope").unwrap_or(segment);
            SCOPE_PREFIXES
                .iter()
                .find_map(|p| segment.strip_prefix(*p))
                .unwrap_or(segment)
        })
        .find(|id| id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit()))
        .map(str::to_string)
}
