//! Scripted session replay.
//!
//! Drives a [`Session`] from a script of JSON lines. A line is either a backend notification
//! (`{"event": "stopped", ...}`) or a front-end request (`{"request": "resume", ...}`).
//! Commands issued by the session are acknowledged by an in-process backend, public events and
//! request results are written as JSON lines.

use crate::session::command::{
    Backend, BreakpointInfo, Command, CommandOutput, FrameInfo, StepKind, Token,
};
use crate::session::context::{
    ContainerContext, ExecutionContext, GroupId, ProcessId, ThreadContext, ThreadId,
};
use crate::session::error::Error;
use crate::session::event::{EventHook, Notification, ResumedEvent, SuspendedEvent};
use crate::session::{
    ExitedProcess, FunctionSignature, Session, SessionBuilder, TargetStep,
};
use crate::weak_error;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

pub type Sink = Arc<Mutex<dyn Write + Send>>;

fn write_line(sink: &Sink, value: Value) {
    if let Ok(mut sink) = sink.lock() {
        _ = writeln!(sink, "{value}");
    }
}

type Outbox = Arc<Mutex<VecDeque<(Token, Result<CommandOutput, String>)>>>;

/// Backend that successfully completes every command.
pub struct AckBackend {
    outbox: Outbox,
    next_breakpoint: u32,
}

impl AckBackend {
    fn reply(&mut self, command: &Command) -> CommandOutput {
        match command {
            Command::BreakInsert { location, .. } => {
                let number = self.next_breakpoint;
                self.next_breakpoint += 1;
                let (file, line) = match location.rsplit_once(':') {
                    Some((file, line)) if !location.starts_with('*') => {
                        (Some(file.to_string()), line.parse().ok())
                    }
                    _ => (None, None),
                };
                CommandOutput::Breakpoint(BreakpointInfo {
                    number,
                    address: location
                        .strip_prefix('*')
                        .unwrap_or("<PENDING>")
                        .to_string(),
                    file,
                    line,
                })
            }
            Command::StackDepth { .. } => CommandOutput::StackDepth(1),
            Command::StackFrame { level, .. } => CommandOutput::Frame(FrameInfo {
                level: *level,
                ..FrameInfo::default()
            }),
            Command::ListThreadGroups { .. } => CommandOutput::ThreadGroups(vec![]),
            Command::ThreadInfo { .. } => CommandOutput::Threads(vec![]),
            _ => CommandOutput::Done,
        }
    }
}

impl Backend for AckBackend {
    fn submit(&mut self, token: Token, command: &Command) -> anyhow::Result<()> {
        let output = self.reply(command);
        self.outbox
            .lock()
            .map_err(|_| anyhow::anyhow!("backend outbox poisoned"))?
            .push_back((token, Ok(output)));
        Ok(())
    }
}

/// Write public session events into a sink.
pub struct PrintHook {
    sink: Sink,
}

impl PrintHook {
    pub fn new(sink: Sink) -> Self {
        Self { sink }
    }
}

impl EventHook for PrintHook {
    fn on_thread_started(&self, thread: &ThreadContext) {
        write_line(
            &self.sink,
            json!({"event": "thread_started", "ctx": thread.to_string()}),
        );
    }

    fn on_thread_exited(&self, thread: &ThreadContext) {
        write_line(
            &self.sink,
            json!({"event": "thread_exited", "ctx": thread.to_string()}),
        );
    }

    fn on_process_started(&self, container: &ContainerContext) {
        write_line(
            &self.sink,
            json!({"event": "process_started", "ctx": container.to_string()}),
        );
    }

    fn on_process_exited(&self, container: &ContainerContext, record: Option<&ExitedProcess>) {
        write_line(
            &self.sink,
            json!({"event": "process_exited", "ctx": container.to_string(), "record": record}),
        );
    }

    fn on_resumed(&self, event: &ResumedEvent) {
        write_line(
            &self.sink,
            json!({"event": "resumed", "ctx": event.ctx.to_string(), "reason": event.reason}),
        );
    }

    fn on_suspended(&self, event: &SuspendedEvent) {
        write_line(
            &self.sink,
            json!({
                "event": "suspended",
                "ctx": event.ctx.to_string(),
                "reason": event.reason,
                "details": event.details,
                "frame": event.frame,
            }),
        );
    }
}

/// Front-end request of a replay script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    Resume {
        thread: Option<ThreadId>,
        group: Option<GroupId>,
    },
    Suspend {
        thread: Option<ThreadId>,
        group: Option<GroupId>,
    },
    Step {
        thread: ThreadId,
        kind: StepKind,
    },
    RunToLine {
        thread: ThreadId,
        file: String,
        line: u32,
        #[serde(default)]
        skip_breakpoints: bool,
    },
    StepIntoSelection {
        thread: ThreadId,
        file: String,
        line: u32,
        function: String,
        #[serde(default)]
        skip_breakpoints: bool,
    },
    Attach {
        pid: ProcessId,
    },
    Detach {
        group: GroupId,
    },
    Flush {
        thread: Option<ThreadId>,
        group: Option<GroupId>,
    },
    /// Run an empty batch with every process available.
    Available,
    Exited,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptLine {
    Notification(Notification),
    Request(Request),
}

pub struct Replay {
    session: Session,
    outbox: Outbox,
    sink: Sink,
}

impl Replay {
    pub fn new(builder: SessionBuilder, sink: Sink) -> Self {
        let outbox = Outbox::default();
        let backend = AckBackend {
            outbox: outbox.clone(),
            next_breakpoint: 1,
        };
        let session = builder
            .with_hooks(PrintHook::new(sink.clone()))
            .build(backend);

        Self {
            session,
            outbox,
            sink,
        }
    }

    /// Execute a script. Malformed lines are skipped.
    pub fn run(&mut self, script: impl BufRead) -> anyhow::Result<()> {
        for line in script.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(script_line) = weak_error!(
                serde_json::from_str::<ScriptLine>(line),
                "malformed script line:"
            ) else {
                continue;
            };
            match script_line {
                ScriptLine::Notification(notification) => {
                    self.session.post_notification(notification)
                }
                ScriptLine::Request(request) => self.request(request),
            }
            self.settle();
        }
        Ok(())
    }

    /// Run the session until no command completion is left.
    fn settle(&mut self) {
        loop {
            self.session.run_pending();
            let replies: Vec<_> = match self.outbox.lock() {
                Ok(mut outbox) => outbox.drain(..).collect(),
                Err(_) => return,
            };
            if replies.is_empty() && !self.session.has_pending_tasks() {
                return;
            }
            for (token, result) in replies {
                self.session.post_completion(token, result);
            }
        }
    }

    fn target(&self, thread: Option<ThreadId>, group: Option<GroupId>) -> ExecutionContext {
        match (thread, group) {
            (Some(thread), _) => ExecutionContext::Thread(self.session.thread_context(thread)),
            (None, group) => ExecutionContext::Container(
                self.session
                    .container_for_group(&group.unwrap_or_else(GroupId::default_group)),
            ),
        }
    }

    fn reporter<T: Debug + Send + 'static>(
        &self,
        request: &'static str,
    ) -> Box<dyn FnOnce(&mut Session, Result<T, Error>) + Send> {
        let sink = self.sink.clone();
        Box::new(move |_, result| {
            let result = match result {
                Ok(value) => json!({"ok": format!("{value:?}")}),
                Err(e) => json!({"error": e.to_string()}),
            };
            write_line(&sink, json!({"request": request, "result": result}));
        })
    }

    fn request(&mut self, request: Request) {
        match request {
            Request::Resume { thread, group } => {
                let ctx = self.target(thread, group);
                let done = self.reporter("resume");
                self.session.resume(&ctx, done);
            }
            Request::Suspend { thread, group } => {
                let ctx = self.target(thread, group);
                let done = self.reporter("suspend");
                self.session.suspend(&ctx, done);
            }
            Request::Step { thread, kind } => {
                let ctx = self.target(Some(thread), None);
                let done = self.reporter("step");
                self.session.step(&ctx, kind, done);
            }
            Request::RunToLine {
                thread,
                file,
                line,
                skip_breakpoints,
            } => {
                let ctx = self.target(Some(thread), None);
                let done = self.reporter("run_to_line");
                self.session
                    .run_to_line(&ctx, &file, line, skip_breakpoints, done);
            }
            Request::StepIntoSelection {
                thread,
                file,
                line,
                function,
                skip_breakpoints,
            } => {
                let ctx = self.target(Some(thread), None);
                let done = self.reporter("step_into_selection");
                self.session.step_into_selection(
                    &ctx,
                    &file,
                    line,
                    skip_breakpoints,
                    FunctionSignature::new(function),
                    done,
                );
            }
            Request::Attach { pid } => {
                let done = self.reporter("attach");
                self.session.attach(pid, done);
            }
            Request::Detach { group } => {
                let container = self.session.container_for_group(&group);
                let done = self.reporter("detach");
                self.session.detach(&container, done);
            }
            Request::Flush { thread, group } => {
                let ctx = (thread.is_some() || group.is_some()).then(|| self.target(thread, group));
                self.session.flush_cache(ctx.as_ref());
            }
            Request::Available => {
                let steps: Vec<TargetStep> = vec![];
                let done = self.reporter("available");
                self.session.execute_with_target_available(steps, done);
            }
            Request::Exited => {
                write_line(
                    &self.sink,
                    json!({"request": "exited", "result": self.session.exited_processes()}),
                );
            }
        }
    }
}
