use crate::session::context::{GroupId, ProcessId, ThreadId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, EnumString};

/// Opaque per-request token, the backend echoes it back with a command completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u64);

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    StepOver,
    StepInto,
    StepReturn,
    InstructionStepOver,
    InstructionStepInto,
}

/// Target of an execution command.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Thread(ThreadId),
    Group(GroupId),
    /// Whole target, used by backends without thread group support.
    All,
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Thread(t) => write!(f, " --thread {t}"),
            Scope::Group(g) => write!(f, " --thread-group {g}"),
            Scope::All => Ok(()),
        }
    }
}

/// Commands the session core issues to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Continue(Scope),
    Interrupt(Scope),
    Step {
        thread: ThreadId,
        kind: StepKind,
    },
    Jump {
        thread: ThreadId,
        location: String,
    },
    BreakInsert {
        location: String,
        thread: Option<ThreadId>,
        temporary: bool,
    },
    BreakDelete(Vec<u32>),
    StackDepth {
        thread: ThreadId,
        max_depth: Option<u32>,
    },
    StackFrame {
        thread: ThreadId,
        level: u32,
    },
    ListThreadGroups {
        group: Option<GroupId>,
        available: bool,
    },
    ThreadInfo {
        thread: Option<ThreadId>,
    },
    TargetAttach(ProcessId),
    TargetDetach(GroupId),
}

/// How results of a command may be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always sent to the backend.
    Uncached,
    /// Cached per owning context while that context is suspended.
    PerContext,
    /// Never cached, but concurrent identical requests share one round-trip.
    SingleFlight,
}

impl Command {
    pub fn cache_policy(&self) -> CachePolicy {
        match self {
            Command::StackDepth { .. } | Command::StackFrame { .. } => CachePolicy::PerContext,
            Command::ThreadInfo { thread: Some(_) } => CachePolicy::PerContext,
            Command::ListThreadGroups {
                available: false, ..
            } => CachePolicy::PerContext,
            Command::ListThreadGroups {
                available: true, ..
            } => CachePolicy::SingleFlight,
            Command::ThreadInfo { thread: None } => CachePolicy::SingleFlight,
            _ => CachePolicy::Uncached,
        }
    }
}

/// Render command in GDB/MI syntax (without a token).
impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Continue(scope) => write!(f, "-exec-continue{scope}"),
            Command::Interrupt(scope) => write!(f, "-exec-interrupt{scope}"),
            Command::Step { thread, kind } => {
                let op = match kind {
                    StepKind::StepOver => "-exec-next",
                    StepKind::StepInto => "-exec-step",
                    StepKind::StepReturn => "-exec-finish",
                    StepKind::InstructionStepOver => "-exec-next-instruction",
                    StepKind::InstructionStepInto => "-exec-step-instruction",
                };
                write!(f, "{op} --thread {thread}")?;
                if *kind == StepKind::StepReturn {
                    // finish always operates on the stop frame
                    f.write_str(" --frame 0")?;
                }
                Ok(())
            }
            Command::Jump { thread, location } => {
                write!(f, "-exec-jump --thread {thread} {location}")
            }
            Command::BreakInsert {
                location,
                thread,
                temporary,
            } => {
                f.write_str("-break-insert")?;
                if *temporary {
                    f.write_str(" -t")?;
                }
                if let Some(thread) = thread {
                    write!(f, " -p {thread}")?;
                }
                write!(f, " {location}")
            }
            Command::BreakDelete(numbers) => {
                write!(f, "-break-delete {}", numbers.iter().join(" "))
            }
            Command::StackDepth { thread, max_depth } => {
                write!(f, "-stack-info-depth --thread {thread}")?;
                if let Some(max) = max_depth {
                    write!(f, " {max}")?;
                }
                Ok(())
            }
            Command::StackFrame { thread, level } => {
                write!(f, "-stack-info-frame --thread {thread} --frame {level}")
            }
            Command::ListThreadGroups { group, available } => {
                f.write_str("-list-thread-groups")?;
                if *available {
                    f.write_str(" --available")?;
                }
                if let Some(group) = group {
                    write!(f, " {group}")?;
                }
                Ok(())
            }
            Command::ThreadInfo { thread } => {
                f.write_str("-thread-info")?;
                if let Some(thread) = thread {
                    write!(f, " {thread}")?;
                }
                Ok(())
            }
            Command::TargetAttach(pid) => write!(f, "-target-attach {pid}"),
            Command::TargetDetach(group) => write!(f, "-target-detach {group}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub number: u32,
    /// Address as reported by the backend, may be `<MULTIPLE>` or `<PENDING>`.
    pub address: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameInfo {
    pub level: u32,
    pub address: String,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Argument types of the function, if known.
    pub args: Option<Vec<String>>,
}

impl FrameInfo {
    /// Return location in `file:line` form.
    pub fn file_location(&self) -> Option<String> {
        Some(format!("{}:{}", self.file.as_ref()?, self.line?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    /// OS level thread id, like `Thread 0x7ffff7d89740 (LWP 4242)`.
    pub target_id: Option<String>,
    pub group: Option<GroupId>,
    pub state: ThreadState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadGroupInfo {
    pub id: GroupId,
    pub pid: Option<ProcessId>,
    /// Executable or command line.
    pub name: Option<String>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
}

/// Typed result of a successfully completed command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutput {
    Done,
    Breakpoint(BreakpointInfo),
    StackDepth(u32),
    Frame(FrameInfo),
    ThreadGroups(Vec<ThreadGroupInfo>),
    Threads(Vec<ThreadInfo>),
}

impl CommandOutput {
    pub fn into_breakpoint(self) -> Option<BreakpointInfo> {
        match self {
            CommandOutput::Breakpoint(bp) => Some(bp),
            _ => None,
        }
    }

    pub fn into_stack_depth(self) -> Option<u32> {
        match self {
            CommandOutput::StackDepth(depth) => Some(depth),
            _ => None,
        }
    }

    pub fn into_frame(self) -> Option<FrameInfo> {
        match self {
            CommandOutput::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn into_thread_groups(self) -> Option<Vec<ThreadGroupInfo>> {
        match self {
            CommandOutput::ThreadGroups(groups) => Some(groups),
            _ => None,
        }
    }

    pub fn into_threads(self) -> Option<Vec<ThreadInfo>> {
        match self {
            CommandOutput::Threads(threads) => Some(threads),
            _ => None,
        }
    }
}

/// Command submission channel to the backend.
///
/// Implementations only send the command. The completion (success or backend error) must be
/// posted back to the session with the same token, see [`crate::session::Session::post`].
pub trait Backend: Send {
    fn submit(&mut self, token: Token, command: &Command) -> anyhow::Result<()>;
}
