//! Run a thread to a source line or an address using a temporary breakpoint.

use crate::muted_error;
use crate::session::command::{Command, FrameInfo, Scope};
use crate::session::context::{ExecutionContext, ThreadContext};
use crate::session::error::Error;
use crate::session::event::{StateChangeReason, StopPayload};
use crate::session::run_control::require_thread;
use crate::session::{Callback, Session};
use crate::gs_debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbandonReason {
    /// Thread stopped before reaching the location.
    StoppedElsewhere(StateChangeReason),
    ProcessExited,
    ThreadExited,
    /// Another run-to-line operation started for the same thread.
    Replaced,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunToLineOutcome {
    Arrived,
    Abandoned(AbandonReason),
}

pub(super) struct RunToLineOperation {
    thread: ThreadContext,
    breakpoint: u32,
    /// Location in `file:line` form, empty for address targets.
    file_location: String,
    /// Breakpoint address as reported by the backend.
    address: String,
    skip_breakpoints: bool,
    done: Callback<RunToLineOutcome>,
}

impl RunToLineOperation {
    /// Any match is enough: address may be a multi-location sentinel and a line
    /// may be non-executable.
    fn is_arrived(&self, payload: &StopPayload, frame: Option<&FrameInfo>) -> bool {
        let location_match = frame
            .and_then(FrameInfo::file_location)
            .is_some_and(|location| location == self.file_location);
        let address_match = frame.is_some_and(|f| f.address == self.address);
        location_match || address_match || payload.breakpoint == Some(self.breakpoint)
    }
}

impl Session {
    /// Resume a thread until it reaches a source line.
    ///
    /// # Arguments
    ///
    /// * `ctx`: thread context
    /// * `file`: source file
    /// * `line`: line number
    /// * `skip_breakpoints`: if true, other breakpoints hit on the way are ignored
    /// * `done`: called when the operation is resolved
    pub fn run_to_line(
        &mut self,
        ctx: &ExecutionContext,
        file: &str,
        line: u32,
        skip_breakpoints: bool,
        done: Callback<RunToLineOutcome>,
    ) {
        self.run_to_location(ctx, format!("{file}:{line}"), skip_breakpoints, done)
    }

    /// Resume a thread until it reaches an instruction address.
    pub fn run_to_address(
        &mut self,
        ctx: &ExecutionContext,
        address: u64,
        skip_breakpoints: bool,
        done: Callback<RunToLineOutcome>,
    ) {
        self.run_to_location(ctx, format!("*0x{address:x}"), skip_breakpoints, done)
    }

    fn run_to_location(
        &mut self,
        ctx: &ExecutionContext,
        location: String,
        skip_breakpoints: bool,
        done: Callback<RunToLineOutcome>,
    ) {
        let thread = match require_thread(ctx, "run to line") {
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

        let command = Command::BreakInsert {
            location: location.clone(),
            thread: Some(thread.thread),
            temporary: true,
        };
        self.queue_command(command, move |session, result| {
            let breakpoint = match result {
                Ok(output) => match output.into_breakpoint() {
                    Some(bp) => bp,
                    None => {
                        done(session, Err(Error::UnexpectedOutput("-break-insert".to_string())));
                        return;
                    }
                },
                Err(e) => {
                    done(session, Err(e));
                    return;
                }
            };

            if let Some(previous) = session.run_to_line.remove(&thread.thread) {
                session.delete_breakpoint(previous.breakpoint);
                session.complete(
                    previous.done,
                    Ok(RunToLineOutcome::Abandoned(AbandonReason::Replaced)),
                );
            }

            let file_location = if location.starts_with('*') {
                String::new()
            } else {
                location
            };
            gs_debug!(target: "session", "run thread {} to {file_location}{}, breakpoint {}", thread.thread, breakpoint.address, breakpoint.number);

            let tid = thread.thread;
            let number = breakpoint.number;
            session.run_to_line.insert(
                tid,
                RunToLineOperation {
                    thread: thread.clone(),
                    breakpoint: number,
                    file_location,
                    address: breakpoint.address,
                    skip_breakpoints,
                    done,
                },
            );

            session.resume(
                &ExecutionContext::Thread(thread),
                Box::new(move |session, result| {
                    let Err(e) = result else {
                        return;
                    };
                    // the operation may be already resolved by a stop
                    if session
                        .run_to_line
                        .get(&tid)
                        .is_some_and(|op| op.breakpoint == number)
                    {
                        if let Some(op) = session.run_to_line.remove(&tid) {
                            session.delete_breakpoint(op.breakpoint);
                            (op.done)(session, Err(e));
                        }
                    }
                }),
            );
        });
    }

    /// Delete a breakpoint ignoring errors, temporary breakpoints may already be gone.
    pub(super) fn delete_breakpoint(&mut self, number: u32) {
        self.queue_command(Command::BreakDelete(vec![number]), |_, result| {
            muted_error!(result, "delete temporary breakpoint:");
        });
    }

    /// Resolve an active run-to-line operation against a stop.
    /// Return true if the stop is consumed and must not be applied.
    pub(super) fn run_to_line_on_stopped(
        &mut self,
        thread: &ThreadContext,
        payload: &StopPayload,
        frame: Option<&FrameInfo>,
    ) -> bool {
        if !self
            .run_to_line
            .get(&thread.thread)
            .is_some_and(|op| op.thread.matches(thread))
        {
            return false;
        }
        let Some(op) = self.run_to_line.remove(&thread.thread) else {
            return false;
        };

        if op.is_arrived(payload, frame) {
            // a temporary breakpoint is removed by the backend only when it is hit
            if payload.breakpoint != Some(op.breakpoint) {
                self.delete_breakpoint(op.breakpoint);
            }
            self.complete(op.done, Ok(RunToLineOutcome::Arrived));
            return false;
        }

        let (reason, _) = payload.classify();
        if op.skip_breakpoints && reason == StateChangeReason::Breakpoint {
            gs_debug!(target: "session", "skip breakpoint on the way to {}{}", op.file_location, op.address);
            self.continue_silently(thread.clone(), op.breakpoint, payload.clone(), frame.cloned());
            self.run_to_line.insert(thread.thread, op);
            return true;
        }

        self.delete_breakpoint(op.breakpoint);
        self.complete(
            op.done,
            Ok(RunToLineOutcome::Abandoned(AbandonReason::StoppedElsewhere(
                reason,
            ))),
        );
        false
    }

    /// Resume a thread whose stop was consumed. If resume fails the operation is abandoned
    /// and the stop is applied as is.
    fn continue_silently(
        &mut self,
        thread: ThreadContext,
        breakpoint: u32,
        payload: StopPayload,
        frame: Option<FrameInfo>,
    ) {
        self.silencer.next_running.insert(thread.thread);
        self.queue_command(
            Command::Continue(Scope::Thread(thread.thread)),
            move |session, result| {
                let Err(e) = result else {
                    return;
                };
                session.silencer.next_running.remove(&thread.thread);
                if session
                    .run_to_line
                    .get(&thread.thread)
                    .is_some_and(|op| op.breakpoint == breakpoint)
                {
                    if let Some(op) = session.run_to_line.remove(&thread.thread) {
                        session.delete_breakpoint(op.breakpoint);
                        session.complete(op.done, Err(e));
                    }
                }

                let (reason, details) = payload.classify();
                session.apply_stopped(&thread, reason, details, frame);
            },
        );
    }

    /// Abandon run-to-line operations of threads selected by `pred`.
    pub(super) fn abandon_run_to_line(
        &mut self,
        pred: impl Fn(&ThreadContext) -> bool,
        reason: AbandonReason,
    ) {
        let threads: Vec<_> = self
            .run_to_line
            .iter()
            .filter(|(_, op)| pred(&op.thread))
            .map(|(tid, _)| *tid)
            .collect();

        for tid in threads {
            let Some(op) = self.run_to_line.remove(&tid) else {
                continue;
            };
            if !self.tracker.is_terminated() {
                self.delete_breakpoint(op.breakpoint);
            }
            self.complete(op.done, Ok(RunToLineOutcome::Abandoned(reason.clone())));
        }
    }
}
