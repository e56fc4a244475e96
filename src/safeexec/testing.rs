//! Stand-in for the sandbox binary used by tests
//!
//! Accepts the same flags as `safeexec`, but instead of mounting an overlay it
//! copies the lower layers into the upper directory (without overwriting staged
//! files) and runs the command there on the host. A program can report its
//! memory usage by writing a byte count into `.memory` in its working directory.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::Manager;

const FAKE_SAFEEXEC: &str = r#"#!/bin/sh
lower=""
upper=""
report=""
workdir="/"
while [ $# -gt 0 ]; do
    case "$1" in
        --overlay-lowerdir) lower="$2"; shift 2 ;;
        --overlay-upperdir) upper="$2"; shift 2 ;;
        --report) report="$2"; shift 2 ;;
        --workdir) workdir="$2"; shift 2 ;;
        --env) export "$2"; shift 2 ;;
        --time-limit|--memory-limit|--cpu-limit|--pids-limit|--overlay-workdir|--rootfs|--cgroup-path|--flags) shift 2 ;;
        *) break ;;
    esac
done
old_ifs="$IFS"
IFS=":"
for layer in $lower; do
    if [ -d "$layer" ]; then
        cp -Rn "$layer/." "$upper/" 2>/dev/null
    fi
done
IFS="$old_ifs"
mkdir -p "$upper$workdir"
cd "$upper$workdir" || exit 1
"$@"
code=$?
memory=0
if [ -f .memory ]; then
    memory=$(cat .memory)
fi
printf 'exit_code %s\ntime 1\nreal_time 1\nmemory %s\n' "$code" "$memory" > "$report"
exit 0
"#;

/// Path of the fake sandbox script, written once per test binary
pub(crate) fn fake_safeexec_path() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("invoker-fake-safeexec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("safeexec");
        std::fs::write(&path, FAKE_SAFEEXEC).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
    .clone()
}

/// Sandbox manager backed by the fake script, keeping run dirs under `dir`
pub(crate) fn fake_manager(dir: &Path) -> Manager {
    Manager::without_cgroup(
        fake_safeexec_path(),
        dir.join("safeexec"),
        dir.join("cgroup"),
    )
}
