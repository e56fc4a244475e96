//! cgroup v2 discovery and setup

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::core::utils::{clean_path, join_rooted};

pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Cgroup of the current process, resolved under [`CGROUP_ROOT`]
pub fn current_cgroup() -> Result<PathBuf> {
    let content =
        std::fs::read_to_string("/proc/self/cgroup").context("Failed to read /proc/self/cgroup")?;
    parse_proc_cgroup(&content)
}

/// Find the unified hierarchy entry (`0::/path`) in `/proc/<pid>/cgroup`
fn parse_proc_cgroup(content: &str) -> Result<PathBuf> {
    for line in content.lines() {
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() < 3 {
            bail!("Invalid cgroup line: {:?}", line);
        }
        if parts[1].is_empty() {
            return Ok(join_rooted(Path::new(CGROUP_ROOT), Path::new(parts[2])));
        }
    }
    bail!("Cannot find cgroup path")
}

/// Resolve the sandbox cgroup: absolute names are taken from the cgroup root,
/// relative ones from the current cgroup.
pub fn resolve_cgroup(current: &Path, name: &str) -> Result<PathBuf> {
    let base = if name.starts_with('/') {
        Path::new(CGROUP_ROOT)
    } else {
        current
    };
    let path = clean_path(&join_rooted(base, Path::new(name)));
    if !path.starts_with(CGROUP_ROOT) {
        bail!("Invalid cgroup path: {:?}", path);
    }
    if path == Path::new(CGROUP_ROOT) {
        bail!("Cannot use root cgroup");
    }
    Ok(path)
}

/// Create the cgroup and delegate all available controllers to its children
pub fn setup_cgroup(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err).with_context(|| format!("Failed to create cgroup {:?}", path)),
    }
    let controllers = std::fs::read_to_string(path.join("cgroup.controllers"))
        .with_context(|| format!("Failed to read controllers of {:?}", path))?;
    let subtree_control = path.join("cgroup.subtree_control");
    for controller in controllers.split_whitespace() {
        debug!("Enabling cgroup controller {} in {:?}", controller, path);
        std::fs::write(&subtree_control, format!("+{}", controller))
            .with_context(|| format!("Failed to enable controller {}", controller))?;
    }
    Ok(())
}

/// Whether the cgroup exposes the given interface file
pub fn has_feature(path: &Path, name: &str) -> Result<bool> {
    match std::fs::metadata(path.join(name)) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("Failed to stat {}", name)),
    }
}
