//! Kernel-path to user-path translation.
//!
//! The kernel names files the way the object manager sees them
//! (`\Device\HarddiskVolume4\Windows\...`, `\SystemRoot\...`,
//! `\??\C:\...`), which is useless to anything that wants to open the file
//! afterwards. The mapper rewrites those spellings into drive-letter paths
//! using a per-session rule table plus a couple of heuristics for the
//! spellings no rule covers.

use anyhow::{bail, Result};
use sysinfo::Disks;

/// How this session's rule table was populated. Live enumeration describes
/// the local machine; mapping records embedded in a trace describe the
/// machine the trace was captured on. They cannot describe the same session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RuleSource {
    Live,
    Trace,
}

struct PathRule {
    kernel: String,
    user: String,
}

/// Host-installable replacement for the whole translation.
pub type PathHook = Box<dyn Fn(&str) -> String>;

// A host OS volume reported through a container's SMB share looks like
// \Device\vmsmb\VSMB-{guid}\os\Windows\...; everything through the os
// segment stands for the host system volume.
const CONTAINER_SHARE_MARKER: &str = "\\vsmb-";
const CONTAINER_OS_SEGMENT: &str = "\\os\\";

const DEFAULT_SYSTEM_DRIVE: &str = "C:";

#[derive(Default)]
pub struct PathMapper {
    rules: Vec<PathRule>,
    source: Option<RuleSource>,
    system_drive: Option<String>,
    hook: Option<PathHook>,
}

impl PathMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a full replacement for the translation logic. Every
    /// subsequent [`translate`] call goes through the hook and nothing else.
    ///
    /// [`translate`]: PathMapper::translate
    pub fn set_override(&mut self, hook: PathHook) {
        self.hook = Some(hook);
    }

    /// Remember the system drive ("C:") used by the drive-less heuristics.
    pub fn set_system_drive(&mut self, drive: &str) {
        let drive = drive.trim_end_matches(['\\', '/']);
        if !drive.is_empty() {
            self.system_drive = Some(drive.to_string());
        }
    }

    pub fn system_drive(&self) -> &str {
        self.system_drive
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_DRIVE)
    }

    /// Add a rule from a mapping record embedded in an offline trace.
    pub fn add_trace_rule(&mut self, kernel: &str, user: &str) -> Result<()> {
        if self.source == Some(RuleSource::Live) {
            bail!("path rules for this session already came from live volume enumeration");
        }
        self.source = Some(RuleSource::Trace);
        self.push_rule(kernel, user);
        Ok(())
    }

    /// Populate the rule table from the volumes mounted on this machine,
    /// for sessions consuming a live capture of the local system.
    pub fn populate_live(&mut self) -> Result<()> {
        if self.source == Some(RuleSource::Trace) {
            bail!("path rules for this session already came from trace mapping records");
        }
        self.source = Some(RuleSource::Live);
        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            let device = disk.name().to_string_lossy();
            let mount = disk.mount_point().to_string_lossy();
            if device.is_empty() || mount.is_empty() {
                continue;
            }
            self.push_rule(&device, &mount);
        }
        Ok(())
    }

    fn push_rule(&mut self, kernel: &str, user: &str) {
        let mut kernel = kernel.to_string();
        // Kernel prefixes always name a directory; a missing trailing
        // separator would let "\Device\HarddiskVolume1" swallow
        // "\Device\HarddiskVolume10\...".
        if !kernel.ends_with('\\') && !kernel.ends_with('/') {
            kernel.push('\\');
        }
        self.rules.push(PathRule {
            kernel,
            user: user.to_string(),
        });
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rewrite a kernel-reported path into a user-openable one. Never
    /// fails: an unrecognized path comes back unchanged, which is the best
    /// available answer.
    pub fn translate(&self, path: &str) -> String {
        if let Some(hook) = &self.hook {
            return hook(path);
        }

        // Longest matching rule wins, not first match: both "\??\" and
        // "\??\C:\" style rules can be installed at once.
        let mut best: Option<&PathRule> = None;
        for rule in &self.rules {
            if starts_with_ignore_ascii_case(path, &rule.kernel)
                && best.map_or(true, |b| rule.kernel.len() > b.kernel.len())
            {
                best = Some(rule);
            }
        }
        if let Some(rule) = best {
            return format!("{}{}", rule.user, &path[rule.kernel.len()..]);
        }

        if let Some(rest) = container_host_path(path) {
            return format!("{}\\{}", self.system_drive(), rest);
        }

        // A rooted path with no drive letter is almost always relative to
        // the system drive.
        if path.starts_with('\\') && !path.starts_with("\\\\") {
            return format!("{}{}", self.system_drive(), path);
        }

        path.to_string()
    }
}

/// The remainder of a container-indirected host path, if `path` is one.
fn container_host_path(path: &str) -> Option<&str> {
    let lower = path.to_ascii_lowercase();
    let share = lower.find(CONTAINER_SHARE_MARKER)?;
    let os = lower[share..].find(CONTAINER_OS_SEGMENT)? + share;
    Some(&path[os + CONTAINER_OS_SEGMENT.len()..])
}

fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}
