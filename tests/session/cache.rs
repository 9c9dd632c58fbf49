use crate::common::{resumed, slot, stopped, Harness};
use gdb_session::session::command::{
    Command, CommandOutput, ThreadGroupInfo, ThreadInfo, ThreadState,
};
use gdb_session::session::context::{GroupId, ProcessId, ThreadId};
use gdb_session::session::error::Error;
use gdb_session::session::event::{Notification, ResumeKind};

fn thread_info(thread: u32, os_id: &str) -> CommandOutput {
    CommandOutput::Threads(vec![ThreadInfo {
        id: ThreadId(thread),
        target_id: Some(os_id.to_string()),
        group: Some(GroupId::new("i1")),
        state: ThreadState::Stopped,
    }])
}

#[test]
fn test_results_cached_while_suspended() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    h.notify(stopped(1, "breakpoint-hit"));
    let t1 = h.session.thread_context(ThreadId(1));

    let (first, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(
        command,
        Command::ThreadInfo {
            thread: Some(ThreadId(1))
        }
    );
    h.reply(token, thread_info(1, "LWP 101"));
    let data = first.take().unwrap().unwrap();
    assert_eq!(data.os_id.as_deref(), Some("LWP 101"));
    assert_eq!(data.thread, t1);

    let (second, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    assert!(h.take_commands().is_empty());
    assert_eq!(second.take().unwrap().unwrap().os_id.as_deref(), Some("LWP 101"));

    // resume flushes the thread scope
    h.notify(resumed(1, ResumeKind::Continue));
    let (third, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, thread_info(1, "LWP 102"));
    assert_eq!(third.take().unwrap().unwrap().os_id.as_deref(), Some("LWP 102"));

    // nothing is stored for a running thread
    let (fourth, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, thread_info(1, "LWP 103"));
    assert_eq!(fourth.take().unwrap().unwrap().os_id.as_deref(), Some("LWP 103"));
}

#[test]
fn test_flush_during_flight_drops_result() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);
    h.notify(stopped(1, "breakpoint-hit"));
    let t1 = h.session.thread_context(ThreadId(1));

    let (before, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (old_token, _) = h.take_command();

    h.notify(resumed(1, ResumeKind::Continue));
    h.notify(stopped(1, "end-stepping-range"));

    // must not join the request issued before the flush
    let (after, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    let (new_token, _) = h.take_command();

    h.reply(old_token, thread_info(1, "stale"));
    assert_eq!(before.take().unwrap().unwrap().os_id.as_deref(), Some("stale"));
    assert!(after.is_empty());

    h.reply(new_token, thread_info(1, "fresh"));
    assert_eq!(after.take().unwrap().unwrap().os_id.as_deref(), Some("fresh"));

    let (cached, done) = slot();
    h.session.thread_data(&t1, done);
    h.run();
    assert!(h.take_commands().is_empty());
    assert_eq!(cached.take().unwrap().unwrap().os_id.as_deref(), Some("fresh"));
}

#[test]
fn test_identical_requests_share_flight() {
    let mut h = Harness::new();

    let (first, done) = slot();
    h.session.running_processes(done);
    let (second, done) = slot();
    h.session.running_processes(done);
    h.run();
    let (token, command) = h.take_command();
    assert_eq!(command.to_string(), "-list-thread-groups --available");

    h.reply_error(token, "Can not fetch data now.");
    for result in [first.take(), second.take()] {
        let Some(Err(Error::Backend { message, .. })) = result else {
            panic!("backend error expected");
        };
        assert_eq!(message, "Can not fetch data now.");
    }

    // failed flight is forgotten, results are never stored
    let (third, done) = slot();
    h.session.running_processes(done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(
        token,
        CommandOutput::ThreadGroups(vec![ThreadGroupInfo {
            id: GroupId::new("4242"),
            pid: None,
            name: Some("calc".to_string()),
            threads: vec![],
        }]),
    );
    let processes = third.take().unwrap().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].name, "calc");
    assert_eq!(processes[0].process.pid, Some(ProcessId::new("4242")));

    let (fourth, done) = slot();
    h.session.running_processes(done);
    h.run();
    assert_eq!(h.take_commands().len(), 1);
    assert!(fourth.is_empty());
}

#[test]
fn test_session_wide_results_flushed_on_process_start() {
    let mut h = Harness::new();
    h.start_process("i1", "100", &[1]);

    let groups = CommandOutput::ThreadGroups(vec![ThreadGroupInfo {
        id: GroupId::new("i1"),
        pid: Some(ProcessId::new("100")),
        name: Some("calc".to_string()),
        threads: vec![],
    }]);

    let (first, done) = slot();
    h.session.debugged_containers(done);
    h.run();
    let (token, _) = h.take_command();
    h.reply(token, groups.clone());
    let containers = first.take().unwrap().unwrap();
    assert_eq!(containers, vec![h.session.container_for_group(&GroupId::new("i1"))]);

    let (second, done) = slot();
    h.session.debugged_containers(done);
    h.run();
    assert!(h.take_commands().is_empty());
    assert_eq!(second.take().unwrap().unwrap(), containers);

    h.notify(Notification::GroupStarted {
        group: GroupId::new("i2"),
        pid: Some(ProcessId::new("200")),
    });
    let (third, done) = slot();
    h.session.debugged_containers(done);
    h.run();
    assert_eq!(h.take_commands().len(), 1);
    assert!(third.is_empty());
}
