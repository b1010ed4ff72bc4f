//! `(instance, role, queue?)` -> opaque handle lookup (§4.10, §9 "Cyclic
//! supervision graph").
//!
//! Backed by `dashmap::DashMap`, matching the teacher's choice of
//! `dashmap` for concurrent lookup tables. No component owns another
//! directly; every cross-component reference is resolved through here, so
//! wiring is lazy and components can be restarted independently.

use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;

/// The role a registered handle plays within an instance, paired with an
/// optional queue name for per-queue components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Peer,
    Sonar,
    Stager,
    Midwife,
    Producer(String),
    Watchman(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Peer => write!(f, "peer"),
            Role::Sonar => write!(f, "sonar"),
            Role::Stager => write!(f, "stager"),
            Role::Midwife => write!(f, "midwife"),
            Role::Producer(queue) => write!(f, "producer[{queue}]"),
            Role::Watchman(queue) => write!(f, "watchman[{queue}]"),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Key {
    instance: String,
    role: Role,
}

/// A clonable handle to an actor's command channel. The registry never
/// interprets `T`; it just stores and returns clones of the sender.
pub type CommandSender<T> = mpsc::Sender<T>;

/// The process/handle lookup table (§2 Registry, §4.10). One `Registry`
/// is shared (`Arc`) across an entire supervisor tree.
#[derive(Default)]
pub struct Registry {
    handles: DashMap<Key, Box<dyn std::any::Any + Send + Sync>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under `(instance, role)`, overwriting any prior
    /// registration — this is the expected shape for a restart, not a
    /// double-registration bug.
    pub fn register<T: Send + Sync + 'static>(&self, instance: &str, role: Role, handle: T) {
        self.handles.insert(
            Key {
                instance: instance.to_string(),
                role,
            },
            Box::new(handle),
        );
    }

    /// Deregister on shutdown. A no-op if nothing was registered.
    pub fn deregister(&self, instance: &str, role: &Role) {
        self.handles.remove(&Key {
            instance: instance.to_string(),
            role: role.clone(),
        });
    }

    /// Look up a handle, downcasting it back to `T`. Returns `None` if
    /// nothing is registered under that key, or if it was registered with
    /// a different type (a programmer error that should never trigger in
    /// practice, since each `Role` variant is only ever paired with one
    /// handle type by convention).
    pub fn get<T: Clone + Send + Sync + 'static>(&self, instance: &str, role: &Role) -> Option<T> {
        self.handles
            .get(&Key {
                instance: instance.to_string(),
                role: role.clone(),
            })
            .and_then(|entry| entry.downcast_ref::<T>().cloned())
    }

    pub fn contains(&self, instance: &str, role: &Role) -> bool {
        self.handles.contains_key(&Key {
            instance: instance.to_string(),
            role: role.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
