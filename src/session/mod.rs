//! Session-state core.
//!
//! A [`Session`] owns every table of a debug session: identifier maps, thread run states,
//! command cache and active compound operations. All mutation happens on a single logical
//! queue drained by [`Session::run_pending`]. Backend notifications, command completions and
//! caller continuations are all dispatched through this queue, so handlers never run
//! concurrently and a continuation is never invoked from the call that registered it.

mod availability;
mod cache;
pub mod command;
pub mod context;
pub mod error;
pub mod event;
mod processes;
mod run_control;
mod run_to_line;
mod step_into;

pub use availability::TargetStep;
pub use processes::{ExitedProcess, RunningProcess, ThreadData};
pub use run_control::ExecutionData;
pub use run_to_line::{AbandonReason, RunToLineOutcome};
pub use step_into::{FunctionSignature, StepIntoOutcome};

use crate::config::SessionConfig;
use crate::gs_debug;
use crate::session::availability::{Sequencer, Silencer};
use crate::session::cache::CommandCache;
use crate::session::command::{Backend, Command, CommandOutput, Token};
use crate::session::context::SessionId;
use crate::session::error::Error;
use crate::session::event::{EventHook, NopHook, Notification};
use crate::session::processes::ProcessTable;
use crate::session::run_control::RunStateTracker;
use crate::session::run_to_line::RunToLineOperation;
use crate::session::step_into::StepIntoOperation;
use context::ThreadId;
use log::warn;
use std::collections::{HashMap, VecDeque};

/// Continuation of an asynchronous session operation.
/// Invoked exactly once, from the session queue.
pub type Callback<T> = Box<dyn FnOnce(&mut Session, Result<T, Error>) + Send>;

/// Input produced by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Notification(Notification),
    /// Completion of a previously submitted command, `Err` holds the backend error message.
    Completion {
        token: Token,
        result: Result<CommandOutput, String>,
    },
}

enum Task {
    Notification(Notification),
    Completion {
        token: Token,
        result: Result<CommandOutput, String>,
        turns_left: u32,
    },
    Deferred(Box<dyn FnOnce(&mut Session) + Send>),
}

struct PendingCommand {
    command: Command,
    done: Callback<CommandOutput>,
}

pub struct Session {
    id: SessionId,
    config: SessionConfig,
    backend: Box<dyn Backend>,
    hooks: Box<dyn EventHook>,

    queue: VecDeque<Task>,
    next_token: u64,
    pending: HashMap<Token, PendingCommand>,

    processes: ProcessTable,
    tracker: RunStateTracker,
    cache: CommandCache,
    silencer: Silencer,
    sequencer: Sequencer,
    run_to_line: HashMap<ThreadId, RunToLineOperation>,
    step_into: HashMap<ThreadId, StepIntoOperation>,
    next_operation_id: u64,
}

pub struct SessionBuilder {
    config: SessionConfig,
    hooks: Option<Box<dyn EventHook>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            hooks: None,
        }
    }

    pub fn with_config(self, config: SessionConfig) -> Self {
        Self { config, ..self }
    }

    pub fn with_hooks(self, hooks: impl EventHook + 'static) -> Self {
        Self {
            hooks: Some(Box::new(hooks)),
            ..self
        }
    }

    pub fn build(self, backend: impl Backend + 'static) -> Session {
        let hooks = self
            .hooks
            .unwrap_or_else(|| Box::new(NopHook::default()));
        Session {
            id: SessionId::new(),
            processes: ProcessTable::new(self.config.exited_capacity),
            config: self.config,
            backend: Box::new(backend),
            hooks,
            queue: VecDeque::new(),
            next_token: 1,
            pending: HashMap::new(),
            tracker: RunStateTracker::default(),
            cache: CommandCache::default(),
            silencer: Silencer::default(),
            sequencer: Sequencer::default(),
            run_to_line: HashMap::new(),
            step_into: HashMap::new(),
            next_operation_id: 0,
        }
    }
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Queue transport input. Nothing is processed until [`Session::run_pending`].
    ///
    /// Command completions are delayed by `result_buffer_turns` scheduling turns, so
    /// notifications sent by the backend before a result are handled before that result.
    pub fn post(&mut self, input: Input) {
        match input {
            Input::Notification(notification) => {
                self.queue.push_back(Task::Notification(notification))
            }
            Input::Completion { token, result } => self.queue.push_back(Task::Completion {
                token,
                result,
                turns_left: self.config.result_buffer_turns,
            }),
        }
    }

    pub fn post_notification(&mut self, notification: Notification) {
        self.post(Input::Notification(notification))
    }

    pub fn post_completion(&mut self, token: Token, result: Result<CommandOutput, String>) {
        self.post(Input::Completion { token, result })
    }

    /// Process queued tasks until the queue is empty. Return number of processed tasks.
    pub fn run_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Some(task) = self.queue.pop_front() {
            processed += 1;
            match task {
                Task::Notification(notification) => self.handle_notification(notification),
                Task::Completion {
                    token,
                    result,
                    turns_left,
                } if turns_left > 0 => self.queue.push_back(Task::Completion {
                    token,
                    result,
                    turns_left: turns_left - 1,
                }),
                Task::Completion { token, result, .. } => self.handle_completion(token, result),
                Task::Deferred(f) => f(self),
            }
        }
        processed
    }

    /// Return true if there are tasks waiting for [`Session::run_pending`].
    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of submitted commands waiting for completion.
    pub fn commands_in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Run `f` on the queue later.
    pub(crate) fn defer(&mut self, f: impl FnOnce(&mut Session) + Send + 'static) {
        self.queue.push_back(Task::Deferred(Box::new(f)))
    }

    /// Complete a continuation asynchronously.
    pub(crate) fn complete<T: Send + 'static>(&mut self, done: Callback<T>, result: Result<T, Error>) {
        self.defer(move |session| done(session, result))
    }

    /// Submit a command to the backend, `done` is called on its completion.
    pub(crate) fn queue_command(
        &mut self,
        command: Command,
        done: impl FnOnce(&mut Session, Result<CommandOutput, Error>) + Send + 'static,
    ) {
        let token = Token(self.next_token);
        self.next_token += 1;

        gs_debug!(target: "session", "{token}{command}");

        let submit_result = self.backend.submit(token, &command);
        self.pending.insert(
            token,
            PendingCommand {
                command,
                done: Box::new(done),
            },
        );
        if let Err(e) = submit_result {
            self.queue.push_back(Task::Completion {
                token,
                result: Err(format!("{e:#}")),
                turns_left: 0,
            });
        }
    }

    fn handle_completion(&mut self, token: Token, result: Result<CommandOutput, String>) {
        let Some(pending) = self.pending.remove(&token) else {
            warn!(target: "session", "completion for unknown token {token}");
            return;
        };

        let result = result.map_err(|message| Error::Backend {
            command: pending.command.to_string(),
            message,
        });
        if let Err(e) = &result {
            gs_debug!(target: "session", "{token}: {e}");
        }
        (pending.done)(self, result)
    }

    fn handle_notification(&mut self, notification: Notification) {
        gs_debug!(target: "session", "notification: {notification:?}");

        match notification {
            Notification::ThreadCreated { thread, group } => self.on_thread_created(thread, group),
            Notification::ThreadExited { thread, group } => self.on_thread_exited(thread, group),
            Notification::GroupStarted { group, pid } => self.on_group_started(group, pid),
            Notification::GroupExited { group, exit_code } => self.on_group_exited(group, exit_code),
            Notification::Resumed { thread, kind } => self.on_resumed(thread, kind),
            Notification::Stopped {
                thread,
                payload,
                frame,
            } => self.on_stopped(thread, payload, frame),
            Notification::Shutdown => self.on_shutdown(),
        }
    }

    fn next_operation_id(&mut self) -> u64 {
        self.next_operation_id += 1;
        self.next_operation_id
    }
}
