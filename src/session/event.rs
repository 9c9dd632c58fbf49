use crate::session::command::{FrameInfo, StepKind};
use crate::session::context::{
    ContainerContext, ExecutionContext, GroupId, ProcessId, ThreadContext, ThreadId,
};
use crate::session::processes::ExitedProcess;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Why a thread changed its execution state last time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateChangeReason {
    #[default]
    Unknown,
    UserRequest,
    Step,
    Breakpoint,
    Watchpoint,
    Signal,
    SharedLibrary,
    Error,
}

/// Command that caused a resume, as correlated by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    Continue,
    Next,
    NextInstruction,
    Step,
    StepInstruction,
    Finish,
    Until,
    Jump,
    Unknown,
}

impl ResumeKind {
    pub fn is_step(self) -> bool {
        matches!(
            self,
            ResumeKind::Next
                | ResumeKind::NextInstruction
                | ResumeKind::Step
                | ResumeKind::StepInstruction
                | ResumeKind::Finish
        )
    }

    pub fn reason(self) -> StateChangeReason {
        match self {
            ResumeKind::Continue => StateChangeReason::UserRequest,
            kind if kind.is_step() => StateChangeReason::Step,
            _ => StateChangeReason::Unknown,
        }
    }
}

impl From<StepKind> for ResumeKind {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::StepOver => ResumeKind::Next,
            StepKind::StepInto => ResumeKind::Step,
            StepKind::StepReturn => ResumeKind::Finish,
            StepKind::InstructionStepOver => ResumeKind::NextInstruction,
            StepKind::InstructionStepInto => ResumeKind::StepInstruction,
        }
    }
}

/// Fields of a `*stopped` record relevant for stop classification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopPayload {
    /// Raw `reason` field, like `breakpoint-hit` or `end-stepping-range`.
    pub reason: Option<String>,
    /// Number of the breakpoint that was hit.
    pub breakpoint: Option<u32>,
    /// Watched expression.
    pub watchpoint: Option<String>,
    pub signal_name: Option<String>,
    pub signal_meaning: Option<String>,
    /// Library (un)loaded on a shared library event.
    pub library: Option<String>,
    pub error: Option<String>,
}

impl StopPayload {
    /// Classify stop reason and its details.
    /// When a payload matches several classes the first one in order breakpoint, watchpoint,
    /// signal, step completion, shared library event, error, user request wins.
    pub fn classify(&self) -> (StateChangeReason, Option<String>) {
        let reason = self.reason.as_deref().unwrap_or_default();

        if self.breakpoint.is_some() || reason == "breakpoint-hit" {
            return (
                StateChangeReason::Breakpoint,
                self.breakpoint.map(|n| n.to_string()),
            );
        }
        if self.watchpoint.is_some() || reason.contains("watchpoint") {
            return (StateChangeReason::Watchpoint, self.watchpoint.clone());
        }
        if self.signal_name.is_some() || reason == "signal-received" {
            let details = self.signal_name.as_ref().map(|name| match &self.signal_meaning {
                Some(meaning) => format!("{name}:{meaning}"),
                None => name.clone(),
            });
            return (StateChangeReason::Signal, details);
        }
        if matches!(
            reason,
            "end-stepping-range" | "function-finished" | "location-reached"
        ) {
            return (StateChangeReason::Step, None);
        }
        if self.library.is_some() || reason == "solib-event" {
            return (StateChangeReason::SharedLibrary, self.library.clone());
        }
        if self.error.is_some() {
            return (StateChangeReason::Error, self.error.clone());
        }
        if reason.is_empty() {
            return (StateChangeReason::UserRequest, None);
        }
        (StateChangeReason::Unknown, None)
    }
}

/// Typed out-of-band notification produced by the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ThreadCreated {
        thread: ThreadId,
        group: Option<GroupId>,
    },
    ThreadExited {
        thread: ThreadId,
        group: Option<GroupId>,
    },
    GroupStarted {
        group: GroupId,
        pid: Option<ProcessId>,
    },
    GroupExited {
        group: GroupId,
        exit_code: Option<i32>,
    },
    Resumed {
        thread: ThreadId,
        kind: ResumeKind,
    },
    Stopped {
        thread: ThreadId,
        #[serde(default)]
        payload: StopPayload,
        frame: Option<FrameInfo>,
    },
    /// Backend process is gone.
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResumedEvent {
    pub ctx: ExecutionContext,
    pub reason: StateChangeReason,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SuspendedEvent {
    pub ctx: ExecutionContext,
    pub reason: StateChangeReason,
    pub details: Option<String>,
    pub frame: Option<FrameInfo>,
}

/// Public broadcasts of a session.
pub trait EventHook: Send {
    fn on_thread_started(&self, thread: &ThreadContext);
    fn on_thread_exited(&self, thread: &ThreadContext);
    fn on_process_started(&self, container: &ContainerContext);
    /// Called when a process exits or is detached; `record` is `None` for detached ones.
    fn on_process_exited(&self, container: &ContainerContext, record: Option<&ExitedProcess>);
    fn on_resumed(&self, event: &ResumedEvent);
    fn on_suspended(&self, event: &SuspendedEvent);
}

#[derive(Default)]
pub struct NopHook {}

impl EventHook for NopHook {
    fn on_thread_started(&self, _: &ThreadContext) {}
    fn on_thread_exited(&self, _: &ThreadContext) {}
    fn on_process_started(&self, _: &ContainerContext) {}
    fn on_process_exited(&self, _: &ContainerContext, _: Option<&ExitedProcess>) {}
    fn on_resumed(&self, _: &ResumedEvent) {}
    fn on_suspended(&self, _: &SuspendedEvent) {}
}
