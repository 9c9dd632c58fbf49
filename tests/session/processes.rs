use crate::common::{slot, Harness, HookEvent};
use gdb_session::config::SessionConfig;
use gdb_session::session::command::{
    Command, CommandOutput, ThreadGroupInfo, ThreadInfo, ThreadState,
};
use gdb_session::session::context::{GroupId, ProcessId, ThreadId};
use gdb_session::session::error::Error;
use gdb_session::session::event::Notification;

fn group_exited(group: &str, code: i32) -> Notification {
    Notification::GroupExited {
        group: GroupId::new(group),
        exit_code: Some(code),
    }
}

#[test]
fn test_exit_records_are_bounded() {
    let mut h = Harness::new();
    for i in 1..=6 {
        let group = format!("i{i}");
        h.start_process(&group, &format!("{}", 100 + i), &[i]);
        h.notify(group_exited(&group, i as i32));
    }

    let exited = h.session.exited_processes();
    assert_eq!(exited.len(), 5);
    assert_eq!(exited[0].group, GroupId::new("i2"));
    assert_eq!(exited[4].group, GroupId::new("i6"));
    assert_eq!(exited[4].pid, Some(ProcessId::new("106")));
    assert_eq!(exited[4].exit_code, Some(6));
    assert_eq!(exited[4].name, "Unknown name");
    assert!(!h.session.is_process_exited(&h.session.container_for_group(&GroupId::new("i1"))));
}

#[test]
fn test_exit_capacity_from_config() {
    let mut h = Harness::with_config(SessionConfig {
        exited_capacity: 1,
        ..SessionConfig::default()
    });
    h.start_process("i1", "100", &[]);
    h.notify(group_exited("i1", 0));
    h.start_process("i2", "200", &[]);
    h.notify(group_exited("i2", 0));

    let exited = h.session.exited_processes();
    assert_eq!(exited.len(), 1);
    assert_eq!(exited[0].group, GroupId::new("i2"));
}

#[test]
fn test_process_exit_broadcast() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1, 2]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    h.notify(group_exited("i1", 3));
    let events = h.info.take_events();
    let [HookEvent::ProcessExited(ctx, Some(record))] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(ctx, &container);
    assert_eq!(record.exit_code, Some(3));

    assert!(h.session.is_process_exited(&container));
    assert!(h.session.execution_contexts(&container).is_empty());
    // threads of the exited process are forgotten
    let (result, done) = slot();
    h.session.resume(&h.thread(1), done);
    h.run();
    assert_eq!(result.take(), Some(Err(Error::UnknownThread(ThreadId(1)))));
}

#[test]
fn test_detached_process_leaves_no_record() {
    let mut h = Harness::new();
    h.start_process("i2", "200", &[3]);
    let container = h.session.container_for_group(&GroupId::new("i2"));

    let (result, done) = slot();
    h.session.detach(&container, done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(command, Command::TargetDetach(GroupId::new("i2")));

    // exit notification arrives before the command result
    h.notify(Notification::GroupExited {
        group: GroupId::new("i2"),
        exit_code: None,
    });
    h.reply(token, CommandOutput::Done);
    assert_eq!(result.take(), Some(Ok(())));

    assert!(h.session.exited_processes().is_empty());
    assert!(!h.session.is_process_exited(&container));
    assert_eq!(
        h.info.take_events(),
        vec![HookEvent::ProcessExited(container, None)]
    );
}

#[test]
fn test_failed_detach_keeps_record() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    let (result, done) = slot();
    h.session.detach(&container, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply_error(token, "Cannot detach");
    assert!(result.take().unwrap().is_err());

    h.notify(group_exited("i1", 0));
    assert_eq!(h.session.exited_processes().len(), 1);
}

#[test]
fn test_detach_unknown_group() {
    let mut h = Harness::new();
    let container = h.session.container_for_group(&GroupId::new("i7"));

    let (result, done) = slot();
    h.session.detach(&container, done);
    h.run();
    assert_eq!(
        result.take(),
        Some(Err(Error::UnknownGroup(GroupId::new("i7"))))
    );
    assert!(h.take_commands().is_empty());
}

#[test]
fn test_restart_purges_exit_record() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    h.notify(group_exited("i1", 1));
    assert!(h.session.is_process_exited(&h.session.container_for_group(&GroupId::new("i1"))));

    h.start_process("i1", "101", &[2]);
    let container = h.session.container_for_group(&GroupId::new("i1"));
    assert_eq!(container.process.pid, Some(ProcessId::new("101")));
    assert!(!h.session.is_process_exited(&container));
    assert!(h.session.exited_processes().is_empty());
}

#[test]
fn test_process_without_reported_pid() {
    let mut h = Harness::new();
    h.notify(Notification::GroupStarted {
        group: GroupId::new("i1"),
        pid: None,
    });

    let events = h.info.take_events();
    let [HookEvent::ProcessStarted(container)] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(container.process.pid, Some(ProcessId::new("i1")));
    assert_eq!(h.session.known_containers(), vec![container.clone()]);
}

#[test]
fn test_thread_lifecycle_broadcast() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[]);
    h.notify(Notification::ThreadCreated {
        thread: ThreadId(1),
        group: Some(GroupId::new("i1")),
    });
    h.notify(Notification::ThreadExited {
        thread: ThreadId(1),
        group: Some(GroupId::new("i1")),
    });

    let t1 = h.session.create_thread_context(
        h.session.container_for_group(&GroupId::new("i1")),
        ThreadId(1),
    );
    assert_eq!(
        h.info.take_events(),
        vec![HookEvent::ThreadStarted(t1.clone()), HookEvent::ThreadExited(t1)]
    );
}

#[test]
fn test_debugged_threads_of_threadless_process() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    let (result, done) = slot();
    h.session.debugged_threads(&container, done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(command.to_string(), "-list-thread-groups i1");
    h.reply(token, CommandOutput::Threads(vec![]));

    let threads = result.take().unwrap().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].thread, ThreadId::FAKE);
    assert_eq!(threads[0].container, container);
}

#[test]
fn test_debugged_threads() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1, 2]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    let (result, done) = slot();
    h.session.debugged_threads(&container, done);
    h.run();
    let (token, _) = h.take_command();
    let info = |id| ThreadInfo {
        id: ThreadId(id),
        target_id: None,
        group: Some(GroupId::new("i1")),
        state: ThreadState::Running,
    };
    h.reply(token, CommandOutput::Threads(vec![info(1), info(2)]));

    let threads: Vec<_> = result
        .take()
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|t| t.thread)
        .collect();
    assert_eq!(threads, vec![ThreadId(1), ThreadId(2)]);
}

#[test]
fn test_process_name_resolved_lazily() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    let (first, done) = slot();
    h.session.process_name(&container, done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(
        command,
        Command::ListThreadGroups {
            group: None,
            available: true,
        }
    );
    h.reply(
        token,
        CommandOutput::ThreadGroups(vec![ThreadGroupInfo {
            id: GroupId::new("100"),
            pid: Some(ProcessId::new("100")),
            name: Some("/usr/bin/calc".to_string()),
            threads: vec![],
        }]),
    );
    assert_eq!(first.take(), Some(Ok("/usr/bin/calc".to_string())));

    let (second, done) = slot();
    h.session.process_name(&container, done);
    h.run();
    assert!(h.take_commands().is_empty());
    assert_eq!(second.take(), Some(Ok("/usr/bin/calc".to_string())));

    // name is remembered in the exit record
    h.notify(group_exited("i1", 0));
    assert_eq!(h.session.exited_processes()[0].name, "/usr/bin/calc");
}

#[test]
fn test_process_name_unknown() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    let container = h.session.container_for_group(&GroupId::new("i1"));

    let (result, done) = slot();
    h.session.process_name(&container, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, CommandOutput::ThreadGroups(vec![]));
    assert_eq!(result.take(), Some(Ok("Unknown name".to_string())));
}

#[test]
fn test_attach() {
    let mut h = Harness::new();

    let (result, done) = slot();
    h.session.attach(ProcessId::new("4242"), done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(command.to_string(), "-target-attach 4242");

    h.notify(Notification::GroupStarted {
        group: GroupId::new("i1"),
        pid: Some(ProcessId::new("4242")),
    });
    h.reply(token, CommandOutput::Done);

    let container = result.take().unwrap().unwrap();
    assert_eq!(container.group, GroupId::new("i1"));
    assert_eq!(container.process.pid, Some(ProcessId::new("4242")));
}

#[test]
fn test_thread_data_without_os_id() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    let t1 = h.session.thread_context(ThreadId(1));

    let (result, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, CommandOutput::Threads(vec![]));

    let data = result.take().unwrap().unwrap();
    assert_eq!(data.thread, t1);
    assert_eq!(data.os_id, None);

    let (result, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, CommandOutput::Done);
    assert_eq!(
        result.take(),
        Some(Err(Error::UnexpectedOutput("-thread-info".to_string())))
    );
}
