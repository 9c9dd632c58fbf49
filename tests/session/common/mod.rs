use gdb_session::config::{Capabilities, SessionConfig};
use gdb_session::session::command::{Backend, Command, CommandOutput, FrameInfo, Token};
use gdb_session::session::context::{
    ContainerContext, ExecutionContext, GroupId, ProcessId, ThreadContext, ThreadId,
};
use gdb_session::session::error::Error;
use gdb_session::session::event::{
    EventHook, Notification, ResumeKind, ResumedEvent, StopPayload, SuspendedEvent,
};
use gdb_session::session::{Callback, ExitedProcess, Session, SessionBuilder};
use std::sync::{Arc, Mutex};

/// Backend recording submitted commands.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub commands: Arc<Mutex<Vec<(Token, Command)>>>,
}

impl Backend for FakeBackend {
    fn submit(&mut self, token: Token, command: &Command) -> anyhow::Result<()> {
        self.commands.lock().unwrap().push((token, command.clone()));
        Ok(())
    }
}

/// Backend that fails every submission.
pub struct BrokenBackend;

impl Backend for BrokenBackend {
    fn submit(&mut self, _: Token, _: &Command) -> anyhow::Result<()> {
        anyhow::bail!("pipe closed")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HookEvent {
    ThreadStarted(ThreadContext),
    ThreadExited(ThreadContext),
    ProcessStarted(ContainerContext),
    ProcessExited(ContainerContext, Option<ExitedProcess>),
    Resumed(ResumedEvent),
    Suspended(SuspendedEvent),
}

#[derive(Clone, Default)]
pub struct TestInfo {
    pub events: Arc<Mutex<Vec<HookEvent>>>,
}

impl TestInfo {
    pub fn take_events(&self) -> Vec<HookEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn suspended(&self) -> Vec<SuspendedEvent> {
        self.take_events()
            .into_iter()
            .filter_map(|e| match e {
                HookEvent::Suspended(e) => Some(e),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct TestHooks {
    info: TestInfo,
}

impl TestHooks {
    pub fn new(info: TestInfo) -> Self {
        Self { info }
    }

    fn push(&self, event: HookEvent) {
        self.info.events.lock().unwrap().push(event);
    }
}

impl EventHook for TestHooks {
    fn on_thread_started(&self, thread: &ThreadContext) {
        self.push(HookEvent::ThreadStarted(thread.clone()))
    }

    fn on_thread_exited(&self, thread: &ThreadContext) {
        self.push(HookEvent::ThreadExited(thread.clone()))
    }

    fn on_process_started(&self, container: &ContainerContext) {
        self.push(HookEvent::ProcessStarted(container.clone()))
    }

    fn on_process_exited(&self, container: &ContainerContext, record: Option<&ExitedProcess>) {
        self.push(HookEvent::ProcessExited(container.clone(), record.cloned()))
    }

    fn on_resumed(&self, event: &ResumedEvent) {
        self.push(HookEvent::Resumed(event.clone()))
    }

    fn on_suspended(&self, event: &SuspendedEvent) {
        self.push(HookEvent::Suspended(event.clone()))
    }
}

/// Receiver of an operation result.
pub struct Slot<T>(Arc<Mutex<Option<Result<T, Error>>>>);

impl<T> Slot<T> {
    pub fn take(&self) -> Option<Result<T, Error>> {
        self.0.lock().unwrap().take()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_none()
    }
}

pub fn slot<T: Send + 'static>() -> (Slot<T>, Callback<T>) {
    let inner = Arc::new(Mutex::new(None));
    let callback_inner = inner.clone();
    let callback: Callback<T> = Box::new(move |_, result| {
        let mut guard = callback_inner.lock().unwrap();
        assert!(guard.is_none(), "continuation called twice");
        *guard = Some(result);
    });
    (Slot(inner), callback)
}

pub struct Harness {
    pub session: Session,
    pub backend: FakeBackend,
    pub info: TestInfo,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn all_stop() -> Self {
        Self::with_config(SessionConfig {
            capabilities: Capabilities {
                non_stop: false,
                multi_process: false,
            },
            ..SessionConfig::default()
        })
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let backend = FakeBackend::default();
        let info = TestInfo::default();
        let session = SessionBuilder::new()
            .with_config(config)
            .with_hooks(TestHooks::new(info.clone()))
            .build(backend.clone());
        Self {
            session,
            backend,
            info,
        }
    }

    pub fn notify(&mut self, notification: Notification) {
        self.session.post_notification(notification);
        self.session.run_pending();
    }

    pub fn run(&mut self) {
        self.session.run_pending();
    }

    /// Drain submitted commands.
    pub fn take_commands(&self) -> Vec<(Token, Command)> {
        std::mem::take(&mut *self.backend.commands.lock().unwrap())
    }

    /// Drain submitted commands, expect exactly one.
    pub fn take_command(&self) -> (Token, Command) {
        let mut commands = self.take_commands();
        assert_eq!(commands.len(), 1, "unexpected commands: {commands:?}");
        commands.remove(0)
    }

    pub fn reply(&mut self, token: Token, output: CommandOutput) {
        self.session.post_completion(token, Ok(output));
        self.session.run_pending();
    }

    pub fn reply_error(&mut self, token: Token, message: &str) {
        self.session.post_completion(token, Err(message.to_string()));
        self.session.run_pending();
    }

    /// Start a process with given threads, all threads are running.
    pub fn start_process(&mut self, group: &str, pid: &str, threads: &[u32]) {
        self.notify(Notification::GroupStarted {
            group: GroupId::new(group),
            pid: Some(ProcessId::new(pid)),
        });
        for thread in threads {
            self.notify(Notification::ThreadCreated {
                thread: ThreadId(*thread),
                group: Some(GroupId::new(group)),
            });
        }
        self.info.take_events();
    }

    pub fn thread(&self, thread: u32) -> ExecutionContext {
        ExecutionContext::Thread(self.session.thread_context(ThreadId(thread)))
    }

    pub fn container(&self, group: &str) -> ExecutionContext {
        ExecutionContext::Container(self.session.container_for_group(&GroupId::new(group)))
    }
}

pub fn stopped(thread: u32, reason: &str) -> Notification {
    Notification::Stopped {
        thread: ThreadId(thread),
        payload: StopPayload {
            reason: Some(reason.to_string()),
            ..StopPayload::default()
        },
        frame: None,
    }
}

pub fn stopped_at(thread: u32, reason: &str, frame: FrameInfo) -> Notification {
    Notification::Stopped {
        thread: ThreadId(thread),
        payload: StopPayload {
            reason: Some(reason.to_string()),
            ..StopPayload::default()
        },
        frame: Some(frame),
    }
}

pub fn breakpoint_hit(thread: u32, number: u32, frame: FrameInfo) -> Notification {
    Notification::Stopped {
        thread: ThreadId(thread),
        payload: StopPayload {
            reason: Some("breakpoint-hit".to_string()),
            breakpoint: Some(number),
            ..StopPayload::default()
        },
        frame: Some(frame),
    }
}

pub fn interrupted(thread: u32) -> Notification {
    Notification::Stopped {
        thread: ThreadId(thread),
        payload: StopPayload {
            reason: Some("signal-received".to_string()),
            signal_name: Some("SIGINT".to_string()),
            ..StopPayload::default()
        },
        frame: None,
    }
}

pub fn resumed(thread: u32, kind: ResumeKind) -> Notification {
    Notification::Resumed {
        thread: ThreadId(thread),
        kind,
    }
}

pub fn frame(file: &str, line: u32, function: &str) -> FrameInfo {
    FrameInfo {
        level: 0,
        address: format!("0x{:x}", 0x401000 + line),
        function: Some(function.to_string()),
        file: Some(file.to_string()),
        line: Some(line),
        args: None,
    }
}
