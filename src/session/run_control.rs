use crate::session::availability::SilencedStop;
use crate::session::command::{Command, FrameInfo, Scope, StepKind, ThreadState};
use crate::session::context::{ContainerContext, ExecutionContext, ThreadContext, ThreadId};
use crate::session::error::Error;
use crate::session::event::{
    ResumeKind, ResumedEvent, StateChangeReason, StopPayload, SuspendedEvent,
};
use crate::session::run_to_line::AbandonReason;
use crate::session::{Callback, Session};
use crate::{gs_debug, gs_info, weak_error};
use indexmap::IndexMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub(super) struct ThreadRunState {
    pub(super) suspended: bool,
    pub(super) resume_pending: bool,
    pub(super) stepping: bool,
    pub(super) reason: StateChangeReason,
    pub(super) details: Option<String>,
}

impl ThreadRunState {
    fn resumed(&mut self, reason: StateChangeReason, stepping: bool) {
        self.suspended = false;
        self.resume_pending = false;
        self.stepping = stepping;
        self.reason = reason;
        self.details = None;
    }

    fn stopped(&mut self, reason: StateChangeReason, details: Option<String>) {
        self.suspended = true;
        self.resume_pending = false;
        self.stepping = false;
        self.reason = reason;
        self.details = details;
    }
}

struct TrackedThread {
    ctx: ThreadContext,
    state: ThreadRunState,
}

/// Per-thread run states and their per-process aggregation.
#[derive(Default)]
pub(super) struct RunStateTracker {
    threads: IndexMap<ThreadId, TrackedThread>,
    terminated: bool,
}

impl RunStateTracker {
    /// Allocate a run state for a thread if none exists.
    pub(super) fn thread_started(&mut self, ctx: ThreadContext) {
        self.ensure(&ctx);
    }

    pub(super) fn thread_exited(&mut self, thread: ThreadId) {
        self.threads.shift_remove(&thread);
    }

    pub(super) fn terminate(&mut self) {
        self.terminated = true;
    }

    pub(super) fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn ensure(&mut self, ctx: &ThreadContext) -> &mut ThreadRunState {
        let entry = self
            .threads
            .entry(ctx.thread)
            .or_insert_with(|| TrackedThread {
                ctx: ctx.clone(),
                state: ThreadRunState::default(),
            });
        // thread ids are reused by the backend, context may be refined with a concrete pid
        entry.ctx = ctx.clone();
        &mut entry.state
    }

    pub(super) fn state(&self, ctx: &ThreadContext) -> Option<&ThreadRunState> {
        self.threads
            .get(&ctx.thread)
            .filter(|t| t.ctx.matches(ctx))
            .map(|t| &t.state)
    }

    fn state_mut(&mut self, ctx: &ThreadContext) -> Option<&mut ThreadRunState> {
        self.threads
            .get_mut(&ctx.thread)
            .filter(|t| t.ctx.matches(ctx))
            .map(|t| &mut t.state)
    }

    pub(super) fn threads_in<'a>(
        &'a self,
        container: &'a ContainerContext,
    ) -> impl Iterator<Item = (&'a ThreadContext, &'a ThreadRunState)> + 'a {
        self.threads
            .values()
            .filter(|t| t.ctx.container.matches(container))
            .map(|t| (&t.ctx, &t.state))
    }

    fn contexts_in(&self, container: &ContainerContext) -> Vec<ThreadContext> {
        self.threads_in(container)
            .map(|(ctx, _)| ctx.clone())
            .collect()
    }

    pub(super) fn is_suspended(&self, ctx: &ExecutionContext) -> bool {
        if self.terminated {
            return false;
        }
        match ctx {
            ExecutionContext::Thread(t) => self.state(t).is_some_and(|s| s.suspended),
            ExecutionContext::Container(c) => {
                let mut threads = self.threads_in(c).peekable();
                // a process without threads is not running anything
                threads.peek().is_none() || threads.any(|(_, s)| s.suspended)
            }
        }
    }

    fn is_stepping(&self, ctx: &ExecutionContext) -> bool {
        if self.terminated {
            return false;
        }
        match ctx {
            ExecutionContext::Thread(t) => self.state(t).is_some_and(|s| s.stepping),
            ExecutionContext::Container(c) => self.threads_in(c).any(|(_, s)| s.stepping),
        }
    }

    fn can_resume(&self, ctx: &ExecutionContext) -> bool {
        if self.terminated {
            return false;
        }
        match ctx {
            ExecutionContext::Thread(t) => self
                .state(t)
                .is_some_and(|s| s.suspended && !s.resume_pending),
            ExecutionContext::Container(c) => {
                self.threads_in(c).any(|(_, s)| s.suspended)
                    && self.threads_in(c).all(|(_, s)| !s.resume_pending)
            }
        }
    }

    fn can_suspend(&self, ctx: &ExecutionContext) -> bool {
        if self.terminated {
            return false;
        }
        match ctx {
            ExecutionContext::Thread(t) => self
                .state(t)
                .is_some_and(|s| !s.suspended && !s.resume_pending),
            ExecutionContext::Container(c) => self
                .threads_in(c)
                .any(|(_, s)| !s.suspended && !s.resume_pending),
        }
    }

    fn set_resume_pending(&mut self, ctx: &ExecutionContext, pending: bool) {
        match ctx {
            ExecutionContext::Thread(t) => {
                if let Some(state) = self.state_mut(t) {
                    state.resume_pending = pending;
                }
            }
            ExecutionContext::Container(c) => {
                for thread in self.threads.values_mut() {
                    if thread.ctx.container.matches(c)
                        && (!pending || thread.state.suspended)
                    {
                        thread.state.resume_pending = pending;
                    }
                }
            }
        }
    }
}

/// Last state change of an execution context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionData {
    pub reason: StateChangeReason,
    pub details: Option<String>,
}

/// Return thread context or an invalid context error.
pub(super) fn require_thread<'a>(
    ctx: &'a ExecutionContext,
    operation: &str,
) -> Result<&'a ThreadContext, Error> {
    ctx.as_thread().ok_or_else(|| {
        Error::InvalidContext(format!("{operation} requires a thread context, got {ctx}"))
    })
}

impl Session {
    pub fn is_suspended(&self, ctx: &ExecutionContext) -> bool {
        self.tracker.is_suspended(ctx)
    }

    pub fn is_stepping(&self, ctx: &ExecutionContext) -> bool {
        self.tracker.is_stepping(ctx)
    }

    pub fn can_resume(&self, ctx: &ExecutionContext) -> bool {
        self.tracker.can_resume(ctx)
    }

    pub fn can_suspend(&self, ctx: &ExecutionContext) -> bool {
        self.tracker.can_suspend(ctx)
    }

    /// Return true if the backend process is gone.
    pub fn is_terminated(&self) -> bool {
        self.tracker.is_terminated()
    }

    /// Check that a step of `kind` may be issued for `ctx`.
    /// Step return requires a caller frame.
    pub fn can_step(&mut self, ctx: &ExecutionContext, kind: StepKind, done: Callback<bool>) {
        let Some(thread) = ctx.as_thread() else {
            self.complete(done, Ok(false));
            return;
        };
        if kind != StepKind::StepReturn || !self.can_resume(ctx) {
            let can_resume = self.can_resume(ctx);
            self.complete(done, Ok(can_resume));
            return;
        }

        let command = Command::StackDepth {
            thread: thread.thread,
            max_depth: Some(2),
        };
        let ctx = ctx.clone();
        self.execute_cached(Some(ctx.clone()), command, move |session, result| {
            let can_step = result.map(|output| {
                output.into_stack_depth().unwrap_or_default() >= 2 && session.can_resume(&ctx)
            });
            done(session, can_step)
        });
    }

    /// Context must be present in the tracker or, for a container, in the process table.
    fn check_known(&self, ctx: &ExecutionContext) -> Result<(), Error> {
        match ctx {
            ExecutionContext::Thread(t) if self.tracker.state(t).is_none() => {
                Err(Error::UnknownThread(t.thread))
            }
            ExecutionContext::Container(c)
                if self.processes.pid_of(&c.group).is_none()
                    && self.tracker.threads_in(c).next().is_none() =>
            {
                Err(Error::UnknownGroup(c.group.clone()))
            }
            _ => Ok(()),
        }
    }

    fn check_suspend(&self, ctx: &ExecutionContext) -> Result<(), Error> {
        if self.tracker.is_terminated() {
            return Err(Error::Terminated);
        }
        self.check_known(ctx)?;
        if !self.can_suspend(ctx) {
            return Err(Error::AlreadySuspended(ctx.to_string()));
        }
        Ok(())
    }

    pub(super) fn check_resume(&self, ctx: &ExecutionContext) -> Result<(), Error> {
        if self.tracker.is_terminated() {
            return Err(Error::Terminated);
        }
        self.check_known(ctx)?;
        if !self.can_resume(ctx) {
            return Err(Error::AlreadyRunning(ctx.to_string()));
        }
        Ok(())
    }

    fn scope_of(&self, ctx: &ExecutionContext) -> Scope {
        match ctx {
            ExecutionContext::Thread(t) => Scope::Thread(t.thread),
            ExecutionContext::Container(c) if self.config.capabilities.multi_process => {
                Scope::Group(c.group.clone())
            }
            ExecutionContext::Container(_) => Scope::All,
        }
    }

    pub fn suspend(&mut self, ctx: &ExecutionContext, done: Callback<()>) {
        if let Err(e) = self.check_suspend(ctx) {
            self.complete(done, Err(e));
            return;
        }

        let command = Command::Interrupt(self.scope_of(ctx));
        self.queue_command(command, move |session, result| {
            done(session, result.map(|_| ()))
        });
    }

    pub fn resume(&mut self, ctx: &ExecutionContext, done: Callback<()>) {
        if let Err(e) = self.check_resume(ctx) {
            self.complete(done, Err(e));
            return;
        }

        let command = Command::Continue(self.scope_of(ctx));
        self.submit_resume(ctx.clone(), command, done);
    }

    /// Submit a command that resumes `ctx`. Pending flag is set until the command completes.
    fn submit_resume(&mut self, ctx: ExecutionContext, command: Command, done: Callback<()>) {
        self.tracker.set_resume_pending(&ctx, true);
        self.queue_command(command, move |session, result| {
            session.tracker.set_resume_pending(&ctx, false);
            done(session, result.map(|_| ()))
        });
    }

    pub fn step(&mut self, ctx: &ExecutionContext, kind: StepKind, done: Callback<()>) {
        let thread = match require_thread(ctx, "step") {
            Ok(thread) => thread.clone(),
            Err(e) => {
                self.complete(done, Err(e));
                return;
            }
        };
        if let Err(e) = self.check_resume(ctx) {
            self.complete(done, Err(e));
            return;
        }

        if let Some(state) = self.tracker.state_mut(&thread) {
            state.resume_pending = true;
            state.stepping = true;
        }
        let command = Command::Step {
            thread: thread.thread,
            kind,
        };
        self.queue_command(command, move |session, result| {
            if let Some(state) = session.tracker.state_mut(&thread) {
                state.resume_pending = false;
                if result.is_err() {
                    state.stepping = false;
                }
            }
            done(session, result.map(|_| ()))
        });
    }

    /// Move the program counter of a stopped thread to a source line.
    ///
    /// # Arguments
    ///
    /// * `ctx`: thread context
    /// * `file`: source file
    /// * `line`: line number
    /// * `resume`: if false thread stops right at new location
    /// * `done`: continuation
    pub fn move_to_line(
        &mut self,
        ctx: &ExecutionContext,
        file: &str,
        line: u32,
        resume: bool,
        done: Callback<()>,
    ) {
        self.move_to_location(ctx, format!("{file}:{line}"), resume, done)
    }

    /// Like [`Session::move_to_line`] but for an instruction address.
    pub fn move_to_address(
        &mut self,
        ctx: &ExecutionContext,
        address: u64,
        resume: bool,
        done: Callback<()>,
    ) {
        self.move_to_location(ctx, format!("*0x{address:x}"), resume, done)
    }

    fn move_to_location(
        &mut self,
        ctx: &ExecutionContext,
        location: String,
        resume: bool,
        done: Callback<()>,
    ) {
        let thread = match require_thread(ctx, "jump") {
            Ok(thread) => thread.thread,
            Err(e) => {
                self.complete(done, Err(e));
                return;
            }
        };
        if let Err(e) = self.check_resume(ctx) {
            self.complete(done, Err(e));
            return;
        }

        let jump = Command::Jump {
            thread,
            location: location.clone(),
        };
        if resume {
            self.submit_resume(ctx.clone(), jump, done);
            return;
        }

        let ctx = ctx.clone();
        let command = Command::BreakInsert {
            location,
            thread: Some(thread),
            temporary: true,
        };
        self.queue_command(command, move |session, result| match result {
            Ok(_) => {
                if let Err(e) = session.check_resume(&ctx) {
                    done(session, Err(e));
                    return;
                }
                session.submit_resume(ctx, jump, done)
            }
            Err(e) => done(session, Err(e)),
        });
    }

    /// Return reason of the last state change.
    pub fn execution_data(&self, ctx: &ExecutionContext) -> Result<ExecutionData, Error> {
        let data = |state: &ThreadRunState| ExecutionData {
            reason: state.reason,
            details: state.details.clone(),
        };
        match ctx {
            ExecutionContext::Thread(t) => self
                .tracker
                .state(t)
                .map(data)
                .ok_or(Error::UnknownThread(t.thread)),
            ExecutionContext::Container(c) => Ok(self
                .tracker
                .threads_in(c)
                .find(|(_, s)| s.suspended)
                .map(|(_, s)| data(s))
                .unwrap_or(ExecutionData {
                    reason: StateChangeReason::Unknown,
                    details: None,
                })),
        }
    }

    /// Flush cached results of `ctx` and its descendants (whole cache if `ctx` is `None`),
    /// then reconcile tracked thread states with the backend.
    pub fn flush_cache(&mut self, ctx: Option<&ExecutionContext>) {
        self.cache.flush(ctx);
        self.refresh_thread_states();
    }

    /// Query states of all threads and broadcast synthetic events for threads whose tracked
    /// state disagrees with the backend.
    fn refresh_thread_states(&mut self) {
        if self.tracker.is_terminated() {
            return;
        }

        self.execute_cached(None, Command::ThreadInfo { thread: None }, |session, result| {
            let Some(output) = weak_error!(result, "thread state refresh:") else {
                return;
            };
            let Some(threads) = output.into_threads() else {
                return;
            };

            for info in threads {
                if session.silencer.is_silenced(info.id) {
                    continue;
                }
                let ctx = session.thread_context(info.id);
                let Some(state) = session.tracker.state(&ctx) else {
                    continue;
                };
                match (info.state, state.suspended) {
                    (ThreadState::Running, true) => {
                        gs_debug!(target: "session", "thread {} is running, refresh state", info.id);
                        session.apply_resumed(&ctx, StateChangeReason::Unknown, false);
                    }
                    (ThreadState::Stopped, false) => {
                        gs_debug!(target: "session", "thread {} is stopped, refresh state", info.id);
                        session.apply_stopped(&ctx, StateChangeReason::Unknown, None, None);
                    }
                    _ => {}
                }
            }
        });
    }

    pub(super) fn on_resumed(&mut self, thread: ThreadId, kind: ResumeKind) {
        if self.silencer.next_running.remove(&thread) {
            gs_debug!(target: "session", "resume of thread {thread} silenced");
            return;
        }

        let ctx = self.thread_context(thread);
        self.apply_resumed(&ctx, kind.reason(), kind.is_step());
    }

    /// Update run state after a resume and broadcast it.
    /// Without non-stop mode the whole process is resumed.
    fn apply_resumed(&mut self, ctx: &ThreadContext, reason: StateChangeReason, stepping: bool) {
        self.tracker.ensure(ctx).resumed(reason, stepping);

        let flush_scope = if self.config.capabilities.non_stop {
            ExecutionContext::Thread(ctx.clone())
        } else {
            for other in self.tracker.contexts_in(&ctx.container) {
                if other.thread != ctx.thread {
                    self.tracker.ensure(&other).resumed(reason, false);
                }
            }
            ExecutionContext::Container(ctx.container.clone())
        };
        self.cache.flush(Some(&flush_scope));

        self.hooks.on_resumed(&ResumedEvent {
            ctx: ExecutionContext::Thread(ctx.clone()),
            reason,
        });
    }

    pub(super) fn on_stopped(
        &mut self,
        thread: ThreadId,
        payload: StopPayload,
        frame: Option<FrameInfo>,
    ) {
        let (reason, details) = payload.classify();
        if matches!(
            reason,
            StateChangeReason::Signal | StateChangeReason::UserRequest
        ) && self.silencer.next_signal.remove(&thread)
        {
            gs_debug!(target: "session", "stop of thread {thread} silenced");
            self.silencer
                .stops
                .insert(thread, SilencedStop { payload, frame });
            return;
        }

        let ctx = self.thread_context(thread);
        if self.run_to_line_on_stopped(&ctx, &payload, frame.as_ref()) {
            return;
        }

        self.apply_stopped(&ctx, reason, details, frame.clone());
        self.step_into_on_stopped(&ctx, reason, frame);
    }

    /// Update run state after a stop and broadcast it.
    /// Without non-stop mode the whole process is stopped.
    pub(super) fn apply_stopped(
        &mut self,
        ctx: &ThreadContext,
        reason: StateChangeReason,
        details: Option<String>,
        frame: Option<FrameInfo>,
    ) {
        self.tracker.ensure(ctx).stopped(reason, details.clone());
        if !self.config.capabilities.non_stop {
            for other in self.tracker.contexts_in(&ctx.container) {
                if other.thread != ctx.thread {
                    self.tracker.ensure(&other).stopped(reason, None);
                }
            }

            // operations of other threads will never see a stop of their own
            let stopped_by_other =
                |t: &ThreadContext| t.thread != ctx.thread && t.container.matches(&ctx.container);
            self.abandon_run_to_line(stopped_by_other, AbandonReason::StoppedElsewhere(reason));
            self.miss_step_into(stopped_by_other);
        }

        self.hooks.on_suspended(&SuspendedEvent {
            ctx: ExecutionContext::Thread(ctx.clone()),
            reason,
            details,
            frame,
        });
    }

    pub(super) fn on_shutdown(&mut self) {
        gs_info!(target: "session", "backend is gone, terminate session {}", self.id);
        self.tracker.terminate();
        self.cache.flush(None);

        self.abandon_run_to_line(|_| true, AbandonReason::ProcessExited);
        self.abort_step_into(|_| true, Error::Terminated);

        // completions of in-flight commands will never arrive
        let pending: Vec<_> = self.pending.drain().collect();
        for (_, command) in pending {
            self.complete(command.done, Err(Error::Terminated));
        }
    }
}
