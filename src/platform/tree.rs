use std::collections::{HashMap, HashSet, VecDeque};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::ProcessTree;

/// Walks the process table and collects `root` plus all of its descendants, parents first.
///
/// Best effort: when the table cannot be read, or `root` is no longer listed (so orphaned
/// descendants cannot be attributed to it), only `root` is returned with `complete = false`.
pub fn snapshot_tree(root: u32) -> ProcessTree {
    if !sysinfo::IS_SUPPORTED_SYSTEM {
        debug!("Process table is not available on this system");
        return ProcessTree::root_only(root, None, false);
    }

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    if system.process(Pid::from_u32(root)).is_none() {
        debug!("PID {root} is not in the process table");
        return ProcessTree::root_only(root, None, false);
    }

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut members = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        // PIDs can be recycled into cycles across a racy snapshot.
        if !seen.insert(pid) {
            continue;
        }
        members.push(pid);
        if let Some(kids) = children.get_mut(&pid) {
            kids.sort_unstable();
            queue.extend(kids.iter().copied());
        }
    }

    ProcessTree {
        root,
        group: None,
        members,
        complete: true,
    }
}
