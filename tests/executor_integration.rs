#![cfg(unix)]

use std::sync::Mutex;
use std::time::{Duration, Instant};

use mirrorpilot::transfer::{CancelToken, CommandSpec, Executor, ExitState, ProcessExecutor};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

#[test]
fn stderr_lines_arrive_in_order_and_are_buffered() {
    let exec = ProcessExecutor::with_poll_interval(Duration::from_millis(10));
    let seen = Mutex::new(Vec::new());
    let on_line = |l: &str| seen.lock().unwrap().push(l.to_string());
    let res = exec.execute(
        &sh("echo out; echo one >&2; printf 'two\\rthree\\n' >&2; exit 3"),
        &on_line,
        &CancelToken::new(),
    );

    assert_eq!(res.status, ExitState::Exited(3));
    assert_eq!(res.exit_code(), Some(3));
    assert_eq!(res.stdout.trim(), "out");
    assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
    assert!(res.stderr.contains("one"));
    assert_eq!(res.last_error_line(), "three");
}

#[test]
fn missing_program_is_a_spawn_failure() {
    let exec = ProcessExecutor::new();
    let res = exec.execute(
        &CommandSpec::new("/nonexistent/mirrorpilot-tool"),
        &|_l: &str| {},
        &CancelToken::new(),
    );
    assert_eq!(res.status, ExitState::SpawnFailed);
    assert!(!res.stderr.is_empty());
    assert!(!res.success());
}

#[test]
fn timeout_kills_the_process() {
    let exec = ProcessExecutor::with_poll_interval(Duration::from_millis(10));
    let start = Instant::now();
    let res = exec.execute(
        &sh("sleep 30").timeout(Duration::from_millis(200)),
        &|_l: &str| {},
        &CancelToken::new(),
    );
    assert!(matches!(res.status, ExitState::TimedOut(_)));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancel_kills_the_process_tree() {
    let exec = ProcessExecutor::with_poll_interval(Duration::from_millis(10));
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        trigger.cancel();
    });
    let start = Instant::now();
    // the child shell keeps the pipes open; only a group kill ends the read
    let res = exec.execute(&sh("sleep 30 & sleep 30; wait"), &|_l: &str| {}, &cancel);
    killer.join().unwrap();

    assert_eq!(res.status, ExitState::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancel_reaches_children_left_behind_by_the_tool() {
    let exec = ProcessExecutor::with_poll_interval(Duration::from_millis(10));
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let killer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });
    let start = Instant::now();
    // parent exits at once; the background child keeps stdout/stderr open
    let res = exec.execute(&sh("(sleep 6) & exit 0"), &|_l: &str| {}, &cancel);
    killer.join().unwrap();

    assert_eq!(res.status, ExitState::Cancelled);
    assert!(!res.success());
    assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
}

#[test]
fn timeout_covers_children_left_behind_by_the_tool() {
    let exec = ProcessExecutor::with_poll_interval(Duration::from_millis(10));
    let start = Instant::now();
    let res = exec.execute(
        &sh("(sleep 6) & exit 0").timeout(Duration::from_millis(300)),
        &|_l: &str| {},
        &CancelToken::new(),
    );
    assert!(matches!(res.status, ExitState::TimedOut(_)));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn working_directory_is_applied() {
    let dir = std::env::temp_dir();
    let exec = ProcessExecutor::new();
    let res = exec.execute(&sh("pwd").current_dir(&dir), &|_l: &str| {}, &CancelToken::new());
    assert!(res.success());
    let expected = dir.canonicalize().unwrap_or(dir);
    let got = std::path::PathBuf::from(res.stdout.trim());
    assert_eq!(got.canonicalize().unwrap_or(got), expected);
}
