//! Identity of debugged entities.
//!
//! Contexts are plain values with structural equality. Relaxed equality for not yet known
//! process ids is provided by explicit `matches` functions, used only at lookup sites.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Unique id of a debug session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend handle of an inferior (thread group), like `i1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    /// Group used by backends that don't report groups at all (single process).
    pub const DEFAULT: &'static str = "i1";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn default_group() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// OS process id as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend thread number. Reused by the backend once a thread exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Id used for the main thread of a process when the backend reports no threads.
    pub const FAKE: ThreadId = ThreadId(0);
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compare two process ids where `None` is a wildcard equal to any id.
pub fn pid_matches(a: Option<&ProcessId>, b: Option<&ProcessId>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcessContext {
    pub session: SessionId,
    /// `None` until the backend reports an OS process id.
    pub pid: Option<ProcessId>,
}

impl ProcessContext {
    pub fn is_wildcard(&self) -> bool {
        self.pid.is_none()
    }

    pub fn matches(&self, other: &ProcessContext) -> bool {
        self.session == other.session && pid_matches(self.pid.as_ref(), other.pid.as_ref())
    }
}

impl Display for ProcessContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.pid {
            None => f.write_str("process(*)"),
            Some(pid) => write!(f, "process({pid})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContainerContext {
    pub process: ProcessContext,
    pub group: GroupId,
}

impl ContainerContext {
    pub fn session(&self) -> SessionId {
        self.process.session
    }

    pub fn matches(&self, other: &ContainerContext) -> bool {
        self.group == other.group && self.process.matches(&other.process)
    }
}

impl Display for ContainerContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.process, self.group)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadContext {
    pub container: ContainerContext,
    pub thread: ThreadId,
}

impl ThreadContext {
    pub fn process(&self) -> &ProcessContext {
        &self.container.process
    }

    pub fn group(&self) -> &GroupId {
        &self.container.group
    }

    pub fn matches(&self, other: &ThreadContext) -> bool {
        self.thread == other.thread && self.container.matches(&other.container)
    }
}

impl Display for ThreadContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.thread({})", self.container, self.thread)
    }
}

/// Something that can be resumed or suspended: a single thread or a whole process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    Container(ContainerContext),
    Thread(ThreadContext),
}

impl ExecutionContext {
    pub fn container(&self) -> &ContainerContext {
        match self {
            ExecutionContext::Container(c) => c,
            ExecutionContext::Thread(t) => &t.container,
        }
    }

    pub fn as_thread(&self) -> Option<&ThreadContext> {
        match self {
            ExecutionContext::Thread(t) => Some(t),
            ExecutionContext::Container(_) => None,
        }
    }

    /// Return true if `other` is this context or one of its descendants.
    /// Process ids are compared with wildcard semantic.
    pub fn covers(&self, other: &ExecutionContext) -> bool {
        match (self, other) {
            (ExecutionContext::Container(c), other) => c.matches(other.container()),
            (ExecutionContext::Thread(t), ExecutionContext::Thread(o)) => t.matches(o),
            (ExecutionContext::Thread(_), ExecutionContext::Container(_)) => false,
        }
    }
}

impl From<ThreadContext> for ExecutionContext {
    fn from(ctx: ThreadContext) -> Self {
        ExecutionContext::Thread(ctx)
    }
}

impl From<ContainerContext> for ExecutionContext {
    fn from(ctx: ContainerContext) -> Self {
        ExecutionContext::Container(ctx)
    }
}

impl Display for ExecutionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionContext::Container(c) => Display::fmt(c, f),
            ExecutionContext::Thread(t) => Display::fmt(t, f),
        }
    }
}
