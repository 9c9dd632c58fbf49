//! Step into a selected function call of a source line.
//!
//! The thread is first moved to the line (using run-to-line if needed), then stepped into
//! until a frame exactly one level deeper than the line's frame matches the target function.
//! Calls of other functions are left with step-return.

use crate::session::command::{Command, FrameInfo, StepKind};
use crate::session::context::{ExecutionContext, ThreadContext, ThreadId};
use crate::session::error::Error;
use crate::session::event::StateChangeReason;
use crate::session::run_control::require_thread;
use crate::session::run_to_line::{AbandonReason, RunToLineOutcome};
use crate::session::{Callback, Session};
use crate::gs_debug;

/// Function selected for step into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    /// Parameter types, `None` if any overload matches.
    pub parameters: Option<Vec<String>>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(self, parameters: Vec<String>) -> Self {
        Self {
            parameters: Some(parameters),
            ..self
        }
    }

    /// Return true if frame function is this function.
    pub fn matches(&self, frame: &FrameInfo) -> bool {
        let Some(function) = frame.function.as_deref() else {
            return false;
        };
        // backends may render a function with its argument list
        let function = function.split('(').next().unwrap_or(function).trim();
        if function != self.name {
            return false;
        }

        match (&self.parameters, &frame.args) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepIntoOutcome {
    /// Thread is stopped at the first line of the target function.
    Reached(FrameInfo),
    /// Target function was not called, thread stopped at `frame`.
    Missed { frame: Option<FrameInfo> },
}

pub(super) struct StepIntoOperation {
    id: u64,
    thread: ThreadContext,
    target: FunctionSignature,
    base_depth: u32,
    base_line: Option<u32>,
    /// True between a step submission and the following stop.
    awaiting_stop: bool,
    done: Callback<StepIntoOutcome>,
}

/// Return true if frame is at a source line. File names are compared by suffix, frames
/// may report full paths.
fn frame_at(frame: &FrameInfo, file: &str, line: u32) -> bool {
    if frame.line != Some(line) {
        return false;
    }
    frame.file.as_deref().is_some_and(|frame_file| {
        frame_file == file
            || frame_file.ends_with(&format!("/{file}"))
            || file.ends_with(&format!("/{frame_file}"))
    })
}

impl Session {
    /// Step into a function called at a source line.
    ///
    /// # Arguments
    ///
    /// * `ctx`: thread context
    /// * `file`: source file of the line with the call
    /// * `line`: line with the call
    /// * `skip_breakpoints`: ignore breakpoints while running to the line
    /// * `target`: called function
    /// * `done`: called when the function is reached or missed
    pub fn step_into_selection(
        &mut self,
        ctx: &ExecutionContext,
        file: &str,
        line: u32,
        skip_breakpoints: bool,
        target: FunctionSignature,
        done: Callback<StepIntoOutcome>,
    ) {
        let thread = match require_thread(ctx, "step into selection") {
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
        self.abort_step_into(
            |op_thread| op_thread.matches(&thread),
            Error::Abandoned("replaced by a new step into selection".to_string()),
        );

        let command = Command::StackFrame {
            thread: thread.thread,
            level: 0,
        };
        let file = file.to_string();
        self.execute_cached(Some(ctx.clone()), command, move |session, result| {
            let frame = match result.and_then(|output| {
                output
                    .into_frame()
                    .ok_or_else(|| Error::UnexpectedOutput("-stack-info-frame".to_string()))
            }) {
                Ok(frame) => frame,
                Err(e) => {
                    done(session, Err(e));
                    return;
                }
            };

            if frame_at(&frame, &file, line) {
                session.step_into_anchor(thread, target, done);
                return;
            }

            let ctx = ExecutionContext::Thread(thread.clone());
            session.run_to_line(
                &ctx,
                &file,
                line,
                skip_breakpoints,
                Box::new(move |session, result| match result {
                    Ok(RunToLineOutcome::Arrived) => session.step_into_anchor(thread, target, done),
                    Ok(RunToLineOutcome::Abandoned(AbandonReason::StoppedElsewhere(_))) => {
                        done(session, Ok(StepIntoOutcome::Missed { frame: None }))
                    }
                    Ok(RunToLineOutcome::Abandoned(reason)) => done(
                        session,
                        Err(Error::Abandoned(format!("run to line abandoned: {reason:?}"))),
                    ),
                    Err(e) => done(session, Err(e)),
                }),
            );
        });
    }

    /// Thread is at the line of the call, record the baseline and make the first step.
    fn step_into_anchor(
        &mut self,
        thread: ThreadContext,
        target: FunctionSignature,
        done: Callback<StepIntoOutcome>,
    ) {
        let ctx = ExecutionContext::Thread(thread.clone());
        // depth recorded before a run-to-line may be stale
        self.cache.flush(Some(&ctx));

        let command = Command::StackDepth {
            thread: thread.thread,
            max_depth: None,
        };
        self.execute_cached(Some(ctx.clone()), command, move |session, result| {
            let base_depth = match result.and_then(|output| {
                output
                    .into_stack_depth()
                    .ok_or_else(|| Error::UnexpectedOutput("-stack-info-depth".to_string()))
            }) {
                Ok(depth) => depth,
                Err(e) => {
                    done(session, Err(e));
                    return;
                }
            };

            let command = Command::StackFrame {
                thread: thread.thread,
                level: 0,
            };
            session.execute_cached(Some(ctx), command, move |session, result| {
                let base_frame = match result.and_then(|output| {
                    output
                        .into_frame()
                        .ok_or_else(|| Error::UnexpectedOutput("-stack-info-frame".to_string()))
                }) {
                    Ok(frame) => frame,
                    Err(e) => {
                        done(session, Err(e));
                        return;
                    }
                };

                gs_debug!(target: "session", "step into {} from depth {base_depth}", target.name);
                let id = session.next_operation_id();
                let tid = thread.thread;
                session.step_into.insert(
                    tid,
                    StepIntoOperation {
                        id,
                        thread,
                        target,
                        base_depth,
                        base_line: base_frame.line,
                        awaiting_stop: false,
                        done,
                    },
                );
                session.step_into_step(tid, id, StepKind::StepInto);
            });
        });
    }

    fn step_into_step(&mut self, tid: ThreadId, id: u64, kind: StepKind) {
        let Some(op) = self.step_into.get_mut(&tid).filter(|op| op.id == id) else {
            return;
        };
        op.awaiting_stop = true;
        let ctx = ExecutionContext::Thread(op.thread.clone());

        self.step(
            &ctx,
            kind,
            Box::new(move |session, result| {
                if let Err(e) = result {
                    session.step_into_finish(tid, id, Err(e));
                }
            }),
        );
    }

    fn step_into_finish(&mut self, tid: ThreadId, id: u64, result: Result<StepIntoOutcome, Error>) {
        if !self.step_into.get(&tid).is_some_and(|op| op.id == id) {
            return;
        }
        if let Some(op) = self.step_into.remove(&tid) {
            self.complete(op.done, result);
        }
    }

    /// Continue an active step-into-selection after a stop of its thread.
    pub(super) fn step_into_on_stopped(
        &mut self,
        thread: &ThreadContext,
        reason: StateChangeReason,
        frame: Option<FrameInfo>,
    ) {
        let Some(op) = self
            .step_into
            .get_mut(&thread.thread)
            .filter(|op| op.thread.matches(thread) && op.awaiting_stop)
        else {
            return;
        };
        op.awaiting_stop = false;
        let (tid, id) = (thread.thread, op.id);

        if reason != StateChangeReason::Step {
            // stopped by something else (breakpoint, signal, user) before reaching the target
            self.step_into_finish(tid, id, Ok(StepIntoOutcome::Missed { frame }));
            return;
        }

        let ctx = ExecutionContext::Thread(thread.clone());
        let command = Command::StackDepth {
            thread: tid,
            max_depth: None,
        };
        self.execute_cached(Some(ctx.clone()), command, move |session, result| {
            let depth = match result.and_then(|output| {
                output
                    .into_stack_depth()
                    .ok_or_else(|| Error::UnexpectedOutput("-stack-info-depth".to_string()))
            }) {
                Ok(depth) => depth,
                Err(e) => {
                    session.step_into_finish(tid, id, Err(e));
                    return;
                }
            };

            match frame {
                Some(frame) => session.step_into_evaluate(tid, id, depth, frame),
                None => {
                    let command = Command::StackFrame {
                        thread: tid,
                        level: 0,
                    };
                    session.execute_cached(Some(ctx), command, move |session, result| {
                        match result.and_then(|output| {
                            output.into_frame().ok_or_else(|| {
                                Error::UnexpectedOutput("-stack-info-frame".to_string())
                            })
                        }) {
                            Ok(frame) => session.step_into_evaluate(tid, id, depth, frame),
                            Err(e) => session.step_into_finish(tid, id, Err(e)),
                        }
                    });
                }
            }
        });
    }

    fn step_into_evaluate(&mut self, tid: ThreadId, id: u64, depth: u32, frame: FrameInfo) {
        let Some(op) = self.step_into.get(&tid).filter(|op| op.id == id) else {
            return;
        };

        if depth == op.base_depth + 1 && op.target.matches(&frame) {
            self.step_into_finish(tid, id, Ok(StepIntoOutcome::Reached(frame)));
        } else if depth > op.base_depth {
            gs_debug!(target: "session", "step into {:?}, return from it", frame.function);
            self.step_into_step(tid, id, StepKind::StepReturn);
        } else if depth == op.base_depth && frame.line == op.base_line {
            self.step_into_step(tid, id, StepKind::StepInto);
        } else {
            self.step_into_finish(
                tid,
                id,
                Ok(StepIntoOutcome::Missed { frame: Some(frame) }),
            );
        }
    }

    /// End step-into-selection operations of threads selected by `pred` as missed.
    pub(super) fn miss_step_into(&mut self, pred: impl Fn(&ThreadContext) -> bool) {
        let threads: Vec<_> = self
            .step_into
            .iter()
            .filter(|(_, op)| pred(&op.thread))
            .map(|(tid, _)| *tid)
            .collect();

        for tid in threads {
            if let Some(op) = self.step_into.remove(&tid) {
                gs_debug!(target: "session", "step into {} missed, thread {tid} stopped by another thread", op.target.name);
                self.complete(op.done, Ok(StepIntoOutcome::Missed { frame: None }));
            }
        }
    }

    /// Fail step-into-selection operations of threads selected by `pred`.
    pub(super) fn abort_step_into(&mut self, pred: impl Fn(&ThreadContext) -> bool, error: Error) {
        let threads: Vec<_> = self
            .step_into
            .iter()
            .filter(|(_, op)| pred(&op.thread))
            .map(|(tid, _)| *tid)
            .collect();

        for tid in threads {
            if let Some(op) = self.step_into.remove(&tid) {
                self.complete(op.done, Err(error.clone()));
            }
        }
    }
}
