//! Availability sequencer.
//!
//! Runs batches of operations while every debugged process has at least one stopped thread.
//! Processes without a stopped thread are interrupted for the duration of the batches and
//! resumed afterwards. Those interrupts and resumes are hidden from event hooks.

use crate::session::command::{Command, FrameInfo, Scope};
use crate::session::context::{ExecutionContext, ThreadContext, ThreadId};
use crate::session::error::Error;
use crate::session::event::StopPayload;
use crate::session::{Callback, Session};
use crate::gs_debug;
use std::collections::{HashMap, HashSet, VecDeque};

/// Operation executed while the target is available.
/// Must call its continuation exactly once.
pub type TargetStep = Box<dyn FnOnce(&mut Session, Callback<()>) + Send>;

/// Stop notification withheld from hooks.
pub(super) struct SilencedStop {
    pub(super) payload: StopPayload,
    pub(super) frame: Option<FrameInfo>,
}

/// Threads whose next run state notification must not be broadcast.
#[derive(Default)]
pub(super) struct Silencer {
    /// Threads expecting an interrupt stop (signal or user request).
    pub(super) next_signal: HashSet<ThreadId>,
    pub(super) next_running: HashSet<ThreadId>,
    pub(super) stops: HashMap<ThreadId, SilencedStop>,
}

impl Silencer {
    pub(super) fn is_silenced(&self, thread: ThreadId) -> bool {
        self.next_signal.contains(&thread)
            || self.next_running.contains(&thread)
            || self.stops.contains_key(&thread)
    }
}

struct Batch {
    steps: Vec<TargetStep>,
    done: Callback<()>,
}

#[derive(Default)]
pub(super) struct Sequencer {
    ongoing: bool,
    /// Batches run now, a new batch joins them.
    executing: bool,
    /// Guard against finishing the phase while queued batches are being started.
    starting_batches: bool,
    running_batches: usize,
    pending: VecDeque<Batch>,
    /// Threads interrupted by the current sequence.
    interrupted: Vec<ThreadContext>,
    outstanding: usize,
    failure: Option<Error>,
}

impl Session {
    /// Execute `steps` sequentially while every debugged process has a stopped thread.
    ///
    /// Batches requested while other batches execute run concurrently with them. Batches
    /// requested in other phases of a sequence are executed by the next sequence.
    pub fn execute_with_target_available(&mut self, steps: Vec<TargetStep>, done: Callback<()>) {
        let batch = Batch { steps, done };
        if !self.sequencer.ongoing {
            self.sequencer.ongoing = true;
            self.sequencer.pending.push_back(batch);
            self.sequence_start();
        } else if self.sequencer.executing {
            self.sequence_run_batch(batch);
        } else {
            self.sequencer.pending.push_back(batch);
        }
    }

    /// Return true while a sequence is in progress.
    pub fn is_sequence_ongoing(&self) -> bool {
        self.sequencer.ongoing
    }

    fn sequence_start(&mut self) {
        let mut to_interrupt = vec![];
        for container in self.known_containers() {
            if self.is_suspended(&ExecutionContext::Container(container.clone())) {
                continue;
            }
            if let Some((thread, _)) = self.tracker.threads_in(&container).next() {
                to_interrupt.push(thread.clone());
            }
        }
        gs_debug!(target: "sequencer", "interrupt {} thread(s)", to_interrupt.len());

        self.sequencer.interrupted = to_interrupt.clone();
        if to_interrupt.is_empty() {
            self.sequence_execute_pending();
            return;
        }

        self.sequencer.outstanding = to_interrupt.len();
        self.sequencer.failure = None;
        for thread in to_interrupt {
            self.silencer.next_signal.insert(thread.thread);
            let ctx = ExecutionContext::Thread(thread.clone());
            self.suspend(
                &ctx,
                Box::new(move |session, result| {
                    if let Err(e) = result {
                        session.silencer.next_signal.remove(&thread.thread);
                        session.sequencer.interrupted.retain(|t| t != &thread);
                        session.sequencer.failure.get_or_insert(e);
                    }

                    session.sequencer.outstanding -= 1;
                    if session.sequencer.outstanding > 0 {
                        return;
                    }
                    match session.sequencer.failure.take() {
                        None => session.sequence_execute_pending(),
                        Some(e) => session.sequence_restore(Some(e)),
                    }
                }),
            );
        }
    }

    fn sequence_execute_pending(&mut self) {
        self.sequencer.executing = true;
        self.sequencer.starting_batches = true;
        while let Some(batch) = self.sequencer.pending.pop_front() {
            self.sequence_run_batch(batch);
        }
        self.sequencer.starting_batches = false;

        if self.sequencer.running_batches == 0 {
            self.sequencer.executing = false;
            self.sequence_restore(None);
        }
    }

    fn sequence_run_batch(&mut self, batch: Batch) {
        self.sequencer.running_batches += 1;
        let Batch { steps, done } = batch;
        self.run_steps(
            steps.into_iter(),
            Box::new(move |session, result| {
                session.complete(done, result);

                session.sequencer.running_batches -= 1;
                if session.sequencer.running_batches == 0 && !session.sequencer.starting_batches {
                    session.sequencer.executing = false;
                    session.sequence_restore(None);
                }
            }),
        );
    }

    fn run_steps(&mut self, mut steps: std::vec::IntoIter<TargetStep>, finish: Callback<()>) {
        match steps.next() {
            None => self.complete(finish, Ok(())),
            Some(step) => step(
                self,
                Box::new(move |session, result| match result {
                    Ok(()) => session.run_steps(steps, finish),
                    Err(e) => finish(session, Err(e)),
                }),
            ),
        }
    }

    /// Resume interrupted threads, then finish the sequence with `failure` if any.
    fn sequence_restore(&mut self, failure: Option<Error>) {
        let threads = std::mem::take(&mut self.sequencer.interrupted);
        if threads.is_empty() {
            self.sequence_finish(failure);
            return;
        }

        self.sequencer.outstanding = threads.len();
        self.sequencer.failure = failure;
        for thread in threads {
            self.silencer.next_running.insert(thread.thread);
            // plain resume is rejected, tracked state of the thread is still "running"
            self.queue_command(
                Command::Continue(Scope::Thread(thread.thread)),
                move |session, result| {
                    let tid = thread.thread;
                    match result {
                        Ok(_) => {
                            session.silencer.stops.remove(&tid);
                        }
                        Err(e) => {
                            session.silencer.next_running.remove(&tid);
                            match session.silencer.stops.remove(&tid) {
                                Some(stop) => {
                                    let (reason, details) = stop.payload.classify();
                                    session.apply_stopped(&thread, reason, details, stop.frame);
                                }
                                None => {
                                    session.silencer.next_signal.remove(&tid);
                                }
                            }
                            session.sequencer.failure.get_or_insert(e);
                        }
                    }

                    session.sequencer.outstanding -= 1;
                    if session.sequencer.outstanding == 0 {
                        let failure = session.sequencer.failure.take();
                        session.sequence_finish(failure);
                    }
                },
            );
        }
    }

    fn sequence_finish(&mut self, failure: Option<Error>) {
        self.sequencer.ongoing = false;
        match failure {
            None => {
                if !self.sequencer.pending.is_empty() {
                    self.sequencer.ongoing = true;
                    self.sequence_start();
                }
            }
            Some(e) => {
                gs_debug!(target: "sequencer", "sequence failed: {e}");
                let pending: Vec<_> = self.sequencer.pending.drain(..).collect();
                for batch in pending {
                    self.complete(batch.done, Err(e.clone()));
                }
            }
        }
    }
}
