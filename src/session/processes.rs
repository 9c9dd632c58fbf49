use crate::session::command::{Command, CommandOutput, ThreadGroupInfo};
use crate::session::context::{
    ContainerContext, ExecutionContext, GroupId, ProcessContext, ProcessId, ThreadContext,
    ThreadId,
};
use crate::session::error::Error;
use crate::session::run_to_line::AbandonReason;
use crate::session::{Callback, Session};
use crate::{gs_debug, gs_info};
use indexmap::IndexMap;
use lru::LruCache;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

/// Fallback name of a process the backend didn't name.
const UNKNOWN_NAME: &str = "Unknown name";

/// Record of a process that exited while being debugged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExitedProcess {
    pub group: GroupId,
    pub pid: Option<ProcessId>,
    pub name: String,
    pub exit_code: Option<i32>,
}

/// Process the backend may attach to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningProcess {
    pub process: ProcessContext,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadData {
    pub thread: ThreadContext,
    /// OS level thread id.
    pub os_id: Option<String>,
}

/// Result of a `thread-group-exited` bookkeeping.
pub(super) struct GroupExit {
    pub(super) pid: Option<ProcessId>,
    /// `None` if exit is caused by a detach.
    pub(super) record: Option<ExitedProcess>,
    pub(super) threads: Vec<ThreadId>,
}

/// Identifier maps of debugged processes.
pub(super) struct ProcessTable {
    thread_to_group: IndexMap<ThreadId, GroupId>,
    group_to_pid: IndexMap<GroupId, ProcessId>,
    names: HashMap<ProcessId, String>,
    /// Bounded, least recently inserted record is evicted first.
    exited: LruCache<GroupId, ExitedProcess>,
    detached: HashSet<GroupId>,
}

impl ProcessTable {
    pub(super) fn new(exited_capacity: usize) -> Self {
        Self {
            thread_to_group: IndexMap::new(),
            group_to_pid: IndexMap::new(),
            names: HashMap::new(),
            exited: LruCache::new(NonZeroUsize::new(exited_capacity).unwrap_or(NonZeroUsize::MIN)),
            detached: HashSet::new(),
        }
    }

    pub(super) fn thread_created(&mut self, thread: ThreadId, group: GroupId) {
        self.thread_to_group.insert(thread, group);
    }

    pub(super) fn thread_exited(&mut self, thread: ThreadId) -> Option<GroupId> {
        self.thread_to_group.shift_remove(&thread)
    }

    /// Register a started group. A restarted group loses its exit record.
    /// Return process id of the group.
    pub(super) fn group_started(&mut self, group: GroupId, pid: Option<ProcessId>) -> ProcessId {
        if self.exited.pop(&group).is_some() {
            gs_debug!(target: "session", "group {group} restarted");
        }
        // backends without multi-process support don't report a pid
        let pid = pid.unwrap_or_else(|| ProcessId::new(group.0.clone()));
        self.names.remove(&pid);
        self.group_to_pid.insert(group, pid.clone());
        pid
    }

    pub(super) fn group_exited(&mut self, group: &GroupId, exit_code: Option<i32>) -> GroupExit {
        let pid = self.group_to_pid.shift_remove(group);

        let record = if self.detached.remove(group) {
            None
        } else {
            let name = pid
                .as_ref()
                .and_then(|pid| self.names.get(pid))
                .cloned()
                .unwrap_or_else(|| UNKNOWN_NAME.to_string());
            let record = ExitedProcess {
                group: group.clone(),
                pid: pid.clone(),
                name,
                exit_code,
            };
            self.exited.push(group.clone(), record.clone());
            Some(record)
        };

        let threads = self.threads_of(group);
        self.thread_to_group.retain(|_, g| g != group);

        GroupExit {
            pid,
            record,
            threads,
        }
    }

    pub(super) fn mark_detached(&mut self, group: GroupId) {
        self.detached.insert(group);
    }

    pub(super) fn unmark_detached(&mut self, group: &GroupId) {
        self.detached.remove(group);
    }

    pub(super) fn group_of(&self, thread: ThreadId) -> Option<&GroupId> {
        self.thread_to_group.get(&thread)
    }

    pub(super) fn pid_of(&self, group: &GroupId) -> Option<&ProcessId> {
        self.group_to_pid.get(group)
    }

    pub(super) fn group_by_pid(&self, pid: &ProcessId) -> Option<&GroupId> {
        self.group_to_pid
            .iter()
            .find_map(|(group, p)| (p == pid).then_some(group))
    }

    pub(super) fn groups(&self) -> impl Iterator<Item = &GroupId> {
        self.group_to_pid.keys()
    }

    pub(super) fn threads_of(&self, group: &GroupId) -> Vec<ThreadId> {
        self.thread_to_group
            .iter()
            .filter_map(|(t, g)| (g == group).then_some(*t))
            .collect()
    }

    pub(super) fn name(&self, pid: &ProcessId) -> Option<&str> {
        self.names.get(pid).map(String::as_str)
    }

    pub(super) fn set_name(&mut self, pid: ProcessId, name: String) {
        self.names.insert(pid, name);
    }

    /// Exit records, oldest first.
    pub(super) fn exited(&self) -> Vec<ExitedProcess> {
        self.exited.iter().rev().map(|(_, p)| p.clone()).collect()
    }

    pub(super) fn is_exited(&self, group: &GroupId) -> bool {
        self.exited.contains(group)
    }
}

impl Session {
    pub fn create_process_context(&self, pid: Option<ProcessId>) -> ProcessContext {
        ProcessContext {
            session: self.id,
            pid,
        }
    }

    pub fn create_container_context(
        &self,
        process: ProcessContext,
        group: GroupId,
    ) -> ContainerContext {
        ContainerContext { process, group }
    }

    pub fn create_thread_context(
        &self,
        container: ContainerContext,
        thread: ThreadId,
    ) -> ThreadContext {
        ThreadContext { container, thread }
    }

    /// Return container context of a thread group. Process id is a wildcard until the group
    /// starts.
    pub fn container_for_group(&self, group: &GroupId) -> ContainerContext {
        let pid = self.processes.pid_of(group).cloned();
        self.create_container_context(self.create_process_context(pid), group.clone())
    }

    /// Return container context of a thread. Threads of unknown groups belong to the default
    /// group.
    pub fn container_for_thread(&self, thread: ThreadId) -> ContainerContext {
        let group = self
            .processes
            .group_of(thread)
            .cloned()
            .unwrap_or_else(GroupId::default_group);
        self.container_for_group(&group)
    }

    pub fn thread_context(&self, thread: ThreadId) -> ThreadContext {
        self.create_thread_context(self.container_for_thread(thread), thread)
    }

    /// Return contexts of known threads of a container.
    pub fn execution_contexts(&self, container: &ContainerContext) -> Vec<ThreadContext> {
        self.processes
            .threads_of(&container.group)
            .into_iter()
            .map(|thread| self.create_thread_context(container.clone(), thread))
            .collect()
    }

    /// Contexts of all started processes, in start order.
    pub fn known_containers(&self) -> Vec<ContainerContext> {
        self.processes
            .groups()
            .map(|group| self.container_for_group(group))
            .collect()
    }

    /// Query the backend for debugged processes.
    pub fn debugged_containers(&mut self, done: Callback<Vec<ContainerContext>>) {
        let command = Command::ListThreadGroups {
            group: None,
            available: false,
        };
        self.execute_cached(None, command, move |session, result| {
            let groups = result.and_then(|output| {
                output
                    .into_thread_groups()
                    .ok_or_else(|| Error::UnexpectedOutput("-list-thread-groups".to_string()))
            });
            let containers = groups.map(|groups| {
                groups
                    .into_iter()
                    .map(|info| {
                        session.remember_name(&info);
                        let pid = info
                            .pid
                            .or_else(|| session.processes.pid_of(&info.id).cloned());
                        session.create_container_context(
                            session.create_process_context(pid),
                            info.id,
                        )
                    })
                    .collect()
            });
            done(session, containers)
        });
    }

    /// Query the backend for threads of a container.
    /// A process without reported threads has a single thread with [`ThreadId::FAKE`] id.
    pub fn debugged_threads(
        &mut self,
        container: &ContainerContext,
        done: Callback<Vec<ThreadContext>>,
    ) {
        let command = Command::ListThreadGroups {
            group: Some(container.group.clone()),
            available: false,
        };
        let container = container.clone();
        let scope = ExecutionContext::Container(container.clone());
        self.execute_cached(Some(scope), command, move |session, result| {
            let threads = result.and_then(|output| match output {
                CommandOutput::Threads(threads) => Ok(threads),
                CommandOutput::ThreadGroups(groups) => Ok(groups
                    .into_iter()
                    .flat_map(|group| group.threads)
                    .collect()),
                _ => Err(Error::UnexpectedOutput(format!(
                    "-list-thread-groups {}",
                    container.group
                ))),
            });
            let threads = threads.map(|threads| {
                if threads.is_empty() {
                    return vec![session.create_thread_context(container.clone(), ThreadId::FAKE)];
                }
                threads
                    .into_iter()
                    .map(|info| session.create_thread_context(container.clone(), info.id))
                    .collect()
            });
            done(session, threads)
        });
    }

    /// Query processes available for attaching.
    pub fn running_processes(&mut self, done: Callback<Vec<RunningProcess>>) {
        let command = Command::ListThreadGroups {
            group: None,
            available: true,
        };
        self.execute_cached(None, command, move |session, result| {
            let groups = result.and_then(|output| {
                output.into_thread_groups().ok_or_else(|| {
                    Error::UnexpectedOutput("-list-thread-groups --available".to_string())
                })
            });
            let processes = groups.map(|groups| {
                groups
                    .into_iter()
                    .map(|info| {
                        session.remember_name(&info);
                        // for available processes the group id is an OS pid
                        let pid = info.pid.unwrap_or_else(|| ProcessId::new(info.id.0));
                        RunningProcess {
                            name: session
                                .processes
                                .name(&pid)
                                .unwrap_or(UNKNOWN_NAME)
                                .to_string(),
                            process: session.create_process_context(Some(pid)),
                        }
                    })
                    .collect()
            });
            done(session, processes)
        });
    }

    /// Return name of a debugged process. Name is resolved lazily by querying available
    /// processes, unresolvable names are reported as `Unknown name`.
    pub fn process_name(&mut self, container: &ContainerContext, done: Callback<String>) {
        let Some(pid) = container
            .process
            .pid
            .clone()
            .or_else(|| self.processes.pid_of(&container.group).cloned())
        else {
            self.complete(done, Ok(UNKNOWN_NAME.to_string()));
            return;
        };

        if let Some(name) = self.processes.name(&pid) {
            let name = name.to_string();
            self.complete(done, Ok(name));
            return;
        }

        self.running_processes(Box::new(move |session, result| {
            let name = result.map(|_| {
                session
                    .processes
                    .name(&pid)
                    .unwrap_or(UNKNOWN_NAME)
                    .to_string()
            });
            done(session, name)
        }));
    }

    /// Return backend data of a thread.
    pub fn thread_data(&mut self, thread: &ThreadContext, done: Callback<ThreadData>) {
        let command = Command::ThreadInfo {
            thread: Some(thread.thread),
        };
        let thread = thread.clone();
        let scope = ExecutionContext::Thread(thread.clone());
        self.execute_cached(Some(scope), command, move |session, result| {
            let data = result.and_then(|output| {
                let threads = output
                    .into_threads()
                    .ok_or_else(|| Error::UnexpectedOutput("-thread-info".to_string()))?;
                let info = threads.into_iter().find(|info| info.id == thread.thread);
                Ok(ThreadData {
                    os_id: info.and_then(|info| info.target_id),
                    thread,
                })
            });
            done(session, data)
        });
    }

    /// Attach to a running process.
    pub fn attach(&mut self, pid: ProcessId, done: Callback<ContainerContext>) {
        if self.tracker.is_terminated() {
            self.complete(done, Err(Error::Terminated));
            return;
        }

        self.queue_command(Command::TargetAttach(pid.clone()), move |session, result| {
            let container = result.map(|_| {
                // the group is known if `thread-group-started` was already received
                let group = session
                    .processes
                    .group_by_pid(&pid)
                    .cloned()
                    .unwrap_or_else(|| GroupId::new(pid.0.clone()));
                session.create_container_context(session.create_process_context(Some(pid)), group)
            });
            done(session, container)
        });
    }

    /// Detach from a process. A detached process leaves no exit record.
    pub fn detach(&mut self, container: &ContainerContext, done: Callback<()>) {
        if self.tracker.is_terminated() {
            self.complete(done, Err(Error::Terminated));
            return;
        }
        if self.processes.pid_of(&container.group).is_none() {
            self.complete(done, Err(Error::UnknownGroup(container.group.clone())));
            return;
        }

        let group = container.group.clone();
        // the exit notification may arrive before the command completion
        self.processes.mark_detached(group.clone());
        self.queue_command(Command::TargetDetach(group.clone()), move |session, result| {
            if result.is_err() {
                session.processes.unmark_detached(&group);
            }
            done(session, result.map(|_| ()))
        });
    }

    /// Records of processes that exited during the session, oldest first.
    pub fn exited_processes(&self) -> Vec<ExitedProcess> {
        self.processes.exited()
    }

    pub fn is_process_exited(&self, container: &ContainerContext) -> bool {
        self.processes.is_exited(&container.group)
    }

    fn remember_name(&mut self, info: &ThreadGroupInfo) {
        let Some(name) = info.name.clone() else {
            return;
        };
        let pid = info
            .pid
            .clone()
            .unwrap_or_else(|| ProcessId::new(info.id.0.clone()));
        self.processes.set_name(pid, name);
    }

    pub(super) fn on_thread_created(&mut self, thread: ThreadId, group: Option<GroupId>) {
        let group = group.unwrap_or_else(GroupId::default_group);
        self.processes.thread_created(thread, group);

        let ctx = self.thread_context(thread);
        self.tracker.thread_started(ctx.clone());
        self.cache
            .flush(Some(&ExecutionContext::Container(ctx.container.clone())));
        self.hooks.on_thread_started(&ctx);
    }

    pub(super) fn on_thread_exited(&mut self, thread: ThreadId, group: Option<GroupId>) {
        let ctx = match group {
            Some(group) if self.processes.group_of(thread).is_none() => {
                self.create_thread_context(self.container_for_group(&group), thread)
            }
            _ => self.thread_context(thread),
        };
        self.processes.thread_exited(thread);
        self.tracker.thread_exited(thread);
        self.cache
            .flush(Some(&ExecutionContext::Container(ctx.container.clone())));

        self.abandon_run_to_line(
            |op_thread| op_thread.matches(&ctx),
            AbandonReason::ThreadExited,
        );
        self.abort_step_into(
            |op_thread| op_thread.matches(&ctx),
            Error::Abandoned(format!("thread {thread} exited")),
        );

        self.hooks.on_thread_exited(&ctx);
    }

    pub(super) fn on_group_started(&mut self, group: GroupId, pid: Option<ProcessId>) {
        let pid = self.processes.group_started(group.clone(), pid);
        gs_info!(target: "session", "process {pid} started, group {group}");

        self.cache.flush(None);
        let container = self.container_for_group(&group);
        self.hooks.on_process_started(&container);
    }

    pub(super) fn on_group_exited(&mut self, group: GroupId, exit_code: Option<i32>) {
        let exit = self.processes.group_exited(&group, exit_code);
        let container =
            self.create_container_context(self.create_process_context(exit.pid), group.clone());
        match &exit.record {
            Some(record) => {
                gs_info!(target: "session", "process of group {group} exited, code {:?}", record.exit_code)
            }
            None => gs_info!(target: "session", "detached from group {group}"),
        }

        for thread in exit.threads {
            self.tracker.thread_exited(thread);
        }
        self.cache.flush(None);

        self.abandon_run_to_line(
            |op_thread| op_thread.group() == &group,
            AbandonReason::ProcessExited,
        );
        self.abort_step_into(
            |op_thread| op_thread.group() == &group,
            Error::ProcessExited(group.clone()),
        );

        self.hooks
            .on_process_exited(&container, exit.record.as_ref());
    }
}
