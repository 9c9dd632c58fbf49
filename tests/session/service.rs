use crate::common::{resumed, stopped, FakeBackend, TestHooks, TestInfo};
use gdb_session::service::SessionHandle;
use gdb_session::session::command::{Command, CommandOutput, Scope};
use gdb_session::session::context::{ExecutionContext, GroupId, ProcessId, ThreadId};
use gdb_session::session::event::{Notification, ResumeKind};
use gdb_session::session::{Input, SessionBuilder};
use serial_test::serial;
use std::time::Duration;

fn spawn() -> (SessionHandle, FakeBackend, TestInfo) {
    let backend = FakeBackend::default();
    let info = TestInfo::default();
    let session = SessionBuilder::new()
        .with_hooks(TestHooks::new(info.clone()))
        .build(backend.clone());
    let handle = SessionHandle::spawn(session).unwrap();
    (handle, backend, info)
}

fn thread_1_suspended(handle: &SessionHandle) -> bool {
    handle
        .request_sync(|session| {
            let ctx = ExecutionContext::Thread(session.thread_context(ThreadId(1)));
            session.is_suspended(&ctx)
        })
        .unwrap()
}

#[test]
#[serial]
fn test_posted_input_visible_to_requests() {
    let (handle, _, info) = spawn();
    let poster = handle.poster();

    for notification in [
        Notification::GroupStarted {
            group: GroupId::new("i1"),
            pid: Some(ProcessId::new("100")),
        },
        Notification::ThreadCreated {
            thread: ThreadId(1),
            group: Some(GroupId::new("i1")),
        },
        stopped(1, "breakpoint-hit"),
    ] {
        poster.post(Input::Notification(notification)).unwrap();
    }

    assert!(thread_1_suspended(&handle));
    assert_eq!(info.take_events().len(), 3);
}

#[test]
#[serial]
fn test_request_completed_by_transport() {
    let (handle, backend, _) = spawn();
    let poster = handle.poster();
    poster
        .post(Input::Notification(Notification::ThreadCreated {
            thread: ThreadId(1),
            group: None,
        }))
        .unwrap();
    poster
        .post(Input::Notification(stopped(1, "breakpoint-hit")))
        .unwrap();
    assert!(thread_1_suspended(&handle));

    // transport side: answer the first submitted command
    let transport = std::thread::spawn(move || {
        for _ in 0..1000 {
            let submitted = backend.commands.lock().unwrap().pop();
            if let Some((token, command)) = submitted {
                assert_eq!(command, Command::Continue(Scope::Thread(ThreadId(1))));
                poster
                    .post(Input::Notification(resumed(1, ResumeKind::Continue)))
                    .unwrap();
                poster
                    .post(Input::Completion {
                        token,
                        result: Ok(CommandOutput::Done),
                    })
                    .unwrap();
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("command not submitted");
    });

    let result = handle
        .request(|session, done| {
            let ctx = ExecutionContext::Thread(session.thread_context(ThreadId(1)));
            session.resume(&ctx, done)
        })
        .unwrap();
    transport.join().unwrap();

    assert_eq!(result, Ok(()));
    assert!(!thread_1_suspended(&handle));
}

#[test]
#[serial]
fn test_poster_outlives_handle() {
    let (handle, _, _) = spawn();
    let poster = handle.poster();
    drop(handle);

    assert!(poster.post(Input::Notification(Notification::Shutdown)).is_err());
}
