//! The two-level parent/child registry and the periodic sweep that reaps
//! orphans out of it.
//!
//! The top level maps a parent PID to its own child registry; each child
//! registry maps a child PID to the start-time token captured when the
//! relationship was registered. Both levels are [`HashTable`] instances. The
//! sweep walks the top level, liveness-checks each parent, and signals the
//! still-registered children of parents that have died, re-checking every
//! child's start time so a recycled PID is never signaled.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::procstat::{self, ProcStatError};
use crate::table::{HashTable, Key};

/// Bucket count of the top-level parent registry.
pub const PARENT_BUCKET_COUNT: usize = 4096;

/// Bucket count of each per-parent child registry.
pub const CHILD_BUCKET_COUNT: usize = 64;

/// Child registry: child PID → start-time token.
pub type ChildTable = HashTable<u64>;

/// Result of a parent liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists.
    Alive,
    /// No such process.
    Dead,
    /// The probe failed for another reason (e.g. EPERM).
    Indeterminate(Errno),
}

/// The sweep's window onto the process table.
///
/// Production code uses [`SystemProbe`]; tests substitute a fake population
/// so fencing and reaping behavior can be exercised without real processes.
pub trait ProcessProbe {
    /// Zero-effect signal probe for process existence.
    fn liveness(&self, pid: u32) -> Liveness;

    /// Current start-time token for `pid`.
    fn start_time(&self, pid: u32) -> Result<u64, ProcStatError>;

    /// Delivers `sig` to `pid`.
    fn signal(&self, pid: u32, sig: Signal) -> Result<(), Errno>;
}

/// [`ProcessProbe`] backed by the real process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn liveness(&self, pid: u32) -> Liveness {
        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => Liveness::Alive,
            Err(Errno::ESRCH) => Liveness::Dead,
            Err(err) => Liveness::Indeterminate(err),
        }
    }

    fn start_time(&self, pid: u32) -> Result<u64, ProcStatError> {
        procstat::query(pid).map(|stat| stat.start_time)
    }

    fn signal(&self, pid: u32, sig: Signal) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(pid as i32), sig)
    }
}

/// Parent→child registration state.
pub struct Registry {
    parents: HashTable<Option<Box<ChildTable>>>,
    fence: bool,
}

impl Registry {
    /// Creates an empty registry. When `fence` is false, start-time tokens
    /// are neither captured at registration nor re-checked by the sweep.
    pub fn new(fence: bool) -> Self {
        Registry {
            parents: HashTable::new(PARENT_BUCKET_COUNT),
            fence,
        }
    }

    /// Whether start-time fencing is enabled.
    pub fn fences(&self) -> bool {
        self.fence
    }

    /// Fetches the child table for `parent`, creating the parent entry and
    /// an empty child table on first sight.
    fn child_table_or_create(&mut self, parent: u32) -> &mut ChildTable {
        self.parents
            .entry(Key::Int(parent))
            .get_or_insert_with(|| Box::new(HashTable::new(CHILD_BUCKET_COUNT)))
    }

    /// Fetches the child table for `parent` without creating anything.
    fn child_table(&mut self, parent: u32) -> Option<&mut ChildTable> {
        self.parents
            .get_mut(&Key::Int(parent))
            .and_then(|slot| slot.as_deref_mut())
    }

    /// Registers `child` under `parent`, capturing the child's current
    /// start-time token.
    ///
    /// If the metadata query fails the registration is abandoned and logged.
    /// The parent entry itself remains, possibly with an empty child table;
    /// the sweep disposes of it once the parent dies.
    pub fn register<P: ProcessProbe>(&mut self, parent: u32, child: u32, probe: &P) {
        let fence = self.fence;
        let table = self.child_table_or_create(parent);

        let token = if fence {
            match probe.start_time(child) {
                Ok(token) => token,
                Err(err) => {
                    warn!("abandoning registration of {child} under {parent}: {err}");
                    return;
                }
            }
        } else {
            0
        };

        *table.entry(Key::Int(child)) = token;
        debug!("registered child {child} under parent {parent}");
    }

    /// Removes `child` from `parent`'s registry, if both are present. An
    /// empty child table is left in place; the sweep disposes of it when the
    /// parent dies.
    pub fn unregister(&mut self, parent: u32, child: u32) {
        if let Some(table) = self.child_table(parent) {
            debug!("unregistering child {child} from parent {parent}");
            table.remove(&Key::Int(child));
        }
    }

    /// Number of registered parents.
    pub fn parent_count(&self) -> usize {
        self.parents.stats().items
    }

    /// Start-time token recorded for `child` under `parent`, if registered.
    pub fn child_token(&self, parent: u32, child: u32) -> Option<u64> {
        self.parents
            .get(&Key::Int(parent))
            .and_then(|slot| slot.as_deref())
            .and_then(|table| table.get(&Key::Int(child)))
            .copied()
    }
}

/// What the sweep decided to do with one parent entry.
enum Disposition {
    /// Parent is alive; leave the entry untouched.
    Keep,
    /// Parent is confirmed dead; signal its children, then drop the entry.
    Reap,
    /// Entry is corrupt or the parent is unprobeable; drop without signaling.
    Drop,
}

/// Totals from one sweep pass, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Children that were sent the reaping signal.
    pub signaled: usize,
    /// Parent entries removed from the registry.
    pub removed_parents: usize,
}

/// Periodic reaper over a [`Registry`].
pub struct Sweeper {
    reap_signal: Signal,
}

impl Sweeper {
    /// Creates a sweeper that delivers `reap_signal` to orphans.
    pub fn new(reap_signal: Signal) -> Self {
        Sweeper { reap_signal }
    }

    /// Runs one full pass over the parent registry.
    ///
    /// Liveness outcomes: an alive parent is skipped without mutation; a
    /// dead parent has its children reaped and its entry removed; a parent
    /// whose liveness cannot be determined is dropped *without* signaling
    /// anything: never signal on uncertain evidence, and do not retain the
    /// entry forever either.
    pub fn sweep<P: ProcessProbe>(
        &self,
        registry: &mut Registry,
        probe: &P,
    ) -> SweepOutcome {
        let fence = registry.fence;
        let mut outcome = SweepOutcome::default();

        let mut parents = registry.parents.cursor();
        while parents.advance() {
            let parent = parents.key().as_int().unwrap_or(0);

            let disposition = if parent == 0 {
                error!("found a parent entry with pid {parent}; dropping it");
                Disposition::Drop
            } else {
                match probe.liveness(parent) {
                    Liveness::Alive => Disposition::Keep,
                    Liveness::Dead => Disposition::Reap,
                    Liveness::Indeterminate(err) => {
                        warn!("couldn't determine whether {parent} is alive: {err}");
                        Disposition::Drop
                    }
                }
            };

            if matches!(disposition, Disposition::Keep) {
                debug!("parent {parent} still alive");
                continue;
            }

            // Safe deletion of the current element; the child table comes
            // back owned so it is destroyed when this iteration ends.
            let children = parents.remove_current();
            outcome.removed_parents += 1;

            if matches!(disposition, Disposition::Reap)
                && let Some(children) = children
            {
                for (key, token) in children.iter() {
                    let child = match key.as_int() {
                        Some(pid) if pid > 0 => pid,
                        _ => continue,
                    };

                    if fence {
                        match probe.start_time(child) {
                            Err(err) => {
                                debug!("skipping child {child}: {err}");
                                continue;
                            }
                            Ok(current) if current != *token => {
                                info!(
                                    "pid {child} found but start times differ; not signaling"
                                );
                                continue;
                            }
                            Ok(_) => {}
                        }
                    }

                    info!("dead parent {parent}: signaling {child}");
                    match probe.signal(child, self.reap_signal) {
                        Ok(()) => outcome.signaled += 1,
                        Err(err) => warn!("failed to signal {child}: {err}"),
                    }
                }
            }
        }

        if outcome.removed_parents > 0 {
            debug!(
                "sweep removed {} parent(s), signaled {} orphan(s)",
                outcome.removed_parents, outcome.signaled
            );
        }
        outcome
    }
}
