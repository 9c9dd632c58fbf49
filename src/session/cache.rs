//! Command result cache.
//!
//! Results of [`CachePolicy::PerContext`] commands are stored per owning context and are
//! served only while that context is suspended. [`CachePolicy::SingleFlight`] commands are
//! never stored, but identical requests issued while one is in flight share its result.

use crate::session::command::{CachePolicy, Command, CommandOutput};
use crate::session::context::ExecutionContext;
use crate::session::error::Error;
use crate::session::{Callback, Session};
use std::collections::HashMap;

/// Owning context (`None` for session-wide commands) and command shape.
type CacheKey = (Option<ExecutionContext>, Command);

struct Flight {
    key: CacheKey,
    /// Set if the owning context was flushed while the command was in flight.
    stale: bool,
    waiters: Vec<Callback<CommandOutput>>,
}

#[derive(Default)]
pub(super) struct CommandCache {
    entries: HashMap<CacheKey, CommandOutput>,
    /// In-flight requests new waiters may join.
    joinable: HashMap<CacheKey, u64>,
    flights: HashMap<u64, Flight>,
    next_flight: u64,
}

fn is_covered(scope: Option<&ExecutionContext>, key: &CacheKey) -> bool {
    match (scope, &key.0) {
        (None, _) => true,
        (Some(scope), Some(owner)) => scope.covers(owner),
        (Some(_), None) => false,
    }
}

impl CommandCache {
    /// Drop cached results of `scope` and its descendants, or everything if `scope` is `None`.
    /// Results of requests in flight for flushed contexts are not stored.
    pub(super) fn flush(&mut self, scope: Option<&ExecutionContext>) {
        self.entries.retain(|key, _| !is_covered(scope, key));

        let flights = &mut self.flights;
        self.joinable.retain(|key, id| {
            if !is_covered(scope, key) {
                return true;
            }
            if let Some(flight) = flights.get_mut(id) {
                flight.stale = true;
            }
            false
        });
    }

    fn get(&self, key: &CacheKey) -> Option<&CommandOutput> {
        self.entries.get(key)
    }

    /// Attach a waiter to the in-flight request with the same key.
    /// The waiter is given back if there is nothing to join.
    fn join(
        &mut self,
        key: &CacheKey,
        done: Callback<CommandOutput>,
    ) -> Result<(), Callback<CommandOutput>> {
        let flight = self
            .joinable
            .get(key)
            .and_then(|id| self.flights.get_mut(id));
        match flight {
            Some(flight) => {
                flight.waiters.push(done);
                Ok(())
            }
            None => Err(done),
        }
    }

    fn start(&mut self, key: CacheKey, done: Callback<CommandOutput>) -> u64 {
        let id = self.next_flight;
        self.next_flight += 1;
        self.joinable.insert(key.clone(), id);
        self.flights.insert(
            id,
            Flight {
                key,
                stale: false,
                waiters: vec![done],
            },
        );
        id
    }

    fn finish(&mut self, id: u64) -> Option<Flight> {
        let flight = self.flights.remove(&id)?;
        if self.joinable.get(&flight.key) == Some(&id) {
            self.joinable.remove(&flight.key);
        }
        Some(flight)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Session {
    fn is_cache_available(&self, owner: Option<&ExecutionContext>) -> bool {
        match owner {
            None => !self.tracker.is_terminated(),
            Some(ctx) => self.is_suspended(ctx),
        }
    }

    /// Execute a command honoring its [`CachePolicy`].
    ///
    /// # Arguments
    ///
    /// * `owner`: context the result belongs to, `None` for session-wide commands
    /// * `command`: command to execute
    /// * `done`: continuation
    pub(super) fn execute_cached(
        &mut self,
        owner: Option<ExecutionContext>,
        command: Command,
        done: impl FnOnce(&mut Session, Result<CommandOutput, Error>) + Send + 'static,
    ) {
        let done: Callback<CommandOutput> = Box::new(done);
        let store = match command.cache_policy() {
            CachePolicy::Uncached => {
                self.queue_command(command, done);
                return;
            }
            CachePolicy::PerContext => true,
            CachePolicy::SingleFlight => false,
        };

        let key = (owner, command);
        if store && self.is_cache_available(key.0.as_ref()) {
            if let Some(output) = self.cache.get(&key) {
                let output = output.clone();
                self.complete(done, Ok(output));
                return;
            }
        }

        let done = match self.cache.join(&key, done) {
            Ok(()) => return,
            Err(done) => done,
        };

        let command = key.1.clone();
        let id = self.cache.start(key, done);
        self.queue_command(command, move |session, result| {
            let Some(flight) = session.cache.finish(id) else {
                return;
            };
            if let Ok(output) = &result {
                if store && !flight.stale && session.is_cache_available(flight.key.0.as_ref()) {
                    session.cache.entries.insert(flight.key, output.clone());
                }
            }
            for waiter in flight.waiters {
                waiter(session, result.clone());
            }
        });
    }
}
