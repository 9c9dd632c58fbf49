//! Session actor.
//!
//! A [`Session`] is owned by a dedicated thread. Other threads talk to it by message passing:
//! the transport posts backend input with a [`SessionPoster`], front-ends run operations
//! with [`SessionHandle`] requests.

use crate::gs_debug;
use crate::session::error::Error;
use crate::session::{Callback, Input, Session};
use anyhow::anyhow;
use std::sync::mpsc;
use std::thread::JoinHandle;

type SessionTask = dyn FnOnce(&mut Session) + Send;

pub enum SessionCommand {
    Input(Input),
    Task(Box<SessionTask>),
    Exit,
}

/// Cloneable sender of backend input.
#[derive(Clone)]
pub struct SessionPoster {
    command_sender: mpsc::Sender<SessionCommand>,
}

impl SessionPoster {
    pub fn post(&self, input: Input) -> anyhow::Result<()> {
        self.command_sender
            .send(SessionCommand::Input(input))
            .map_err(|_| anyhow!("session thread is gone"))
    }
}

pub struct SessionHandle {
    command_sender: mpsc::Sender<SessionCommand>,
    thread: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Move a session into a new thread.
    pub fn spawn(session: Session) -> anyhow::Result<Self> {
        // unbounded: session hooks may post into their own session
        let (command_sender, command_receiver) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(format!("session-{}", session.id()))
            .spawn(move || session_loop(session, command_receiver))?;

        Ok(Self {
            command_sender,
            thread: Some(thread),
        })
    }

    pub fn poster(&self) -> SessionPoster {
        SessionPoster {
            command_sender: self.command_sender.clone(),
        }
    }

    /// Run `f` on the session thread and wait for its result.
    pub fn request_sync<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.command_sender
            .send(SessionCommand::Task(Box::new(move |session| {
                _ = sender.send(f(session));
            })))
            .map_err(|_| anyhow!("session thread is gone"))?;
        let result = receiver.recv()?;
        Ok(result)
    }

    /// Start an asynchronous session operation and wait for its continuation.
    ///
    /// Backend completions the operation depends on must be posted from another thread.
    pub fn request<T, F>(&self, op: F) -> anyhow::Result<Result<T, Error>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session, Callback<T>) + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.command_sender
            .send(SessionCommand::Task(Box::new(move |session| {
                op(
                    session,
                    Box::new(move |_, result| {
                        _ = sender.send(result);
                    }),
                )
            })))
            .map_err(|_| anyhow!("session thread is gone"))?;
        let result = receiver.recv()?;
        Ok(result)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        _ = self.command_sender.send(SessionCommand::Exit);
        if let Some(thread) = self.thread.take() {
            _ = thread.join();
        }
    }
}

fn session_loop(mut session: Session, command_receiver: mpsc::Receiver<SessionCommand>) {
    gs_debug!(target: "service", "session {} started", session.id());

    while let Ok(command) = command_receiver.recv() {
        let mut next = Some(command);
        // take everything already sent, backend input keeps its delivery order
        while let Some(command) = next {
            match command {
                SessionCommand::Input(input) => session.post(input),
                SessionCommand::Task(task) => {
                    // task observes all input sent before it
                    session.run_pending();
                    task(&mut session);
                }
                SessionCommand::Exit => {
                    gs_debug!(target: "service", "session {} stopped", session.id());
                    return;
                }
            }
            next = command_receiver.try_recv().ok();
        }
        session.run_pending();
    }
}
