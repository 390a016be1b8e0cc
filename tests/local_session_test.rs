use std::time::{Duration, Instant};

use serial_test::serial;
use sherlock_core::{Error, Executor, LocalSession, RunOutcome};
use tokio_util::sync::CancellationToken;

fn session_in(dir: &std::path::Path) -> LocalSession {
    LocalSession::with_cwd(dir.canonicalize().unwrap())
}

#[tokio::test]
async fn test_echo_captures_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    let cancel = CancellationToken::new();

    let result = session.execute(&cancel, "echo hello").await;
    assert!(result.error.is_none());
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout_lossy(), "hello\n");
    assert!(result.stderr.is_empty());
}

#[tokio::test]
async fn test_stderr_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    let cancel = CancellationToken::new();

    let result = session.execute(&cancel, "echo oops >&2; exit 3").await;
    assert!(result.error.is_none(), "nonzero exit must not be an engine error");
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stderr_lossy(), "oops\n");
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_unknown_command_exits_127() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());

    let result = session
        .execute(&CancellationToken::new(), "definitely-not-a-command-xyz")
        .await;
    assert!(result.error.is_none());
    assert_eq!(result.exit_code, 127);
}

#[tokio::test]
async fn test_cd_relative_then_pwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut session = LocalSession::with_cwd(&root);
    let cancel = CancellationToken::new();

    let result = session.execute(&cancel, "cd sub").await;
    assert!(result.success());
    assert!(result.stdout.is_empty());
    assert_eq!(session.cwd(), root.join("sub"));

    let pwd = session.execute(&cancel, "pwd").await;
    assert_eq!(pwd.stdout_lossy().trim_end(), root.join("sub").to_str().unwrap());

    session.execute(&cancel, "cd ..").await;
    assert_eq!(session.cwd(), root);
}

#[tokio::test]
async fn test_cd_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let target_path = target.path().canonicalize().unwrap();
    let mut session = session_in(dir.path());

    let result = session
        .execute(&CancellationToken::new(), &format!("cd {}", target_path.display()))
        .await;
    assert!(result.success());
    assert_eq!(session.cwd(), target_path);
}

#[tokio::test]
async fn test_cd_nonexistent_keeps_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut session = LocalSession::with_cwd(&root);

    let result = session
        .execute(&CancellationToken::new(), "cd does-not-exist")
        .await;
    assert!(result.error.is_none());
    assert_eq!(result.exit_code, 1);
    assert_eq!(
        result.stderr_lossy(),
        format!("cd: {}: No such file or directory\n", root.join("does-not-exist").display())
    );
    assert_eq!(session.cwd(), root);
}

#[tokio::test]
async fn test_cd_into_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(root.join("plain.txt"), "x").unwrap();
    let mut session = LocalSession::with_cwd(&root);

    let result = session.execute(&CancellationToken::new(), "cd plain.txt").await;
    assert_eq!(result.exit_code, 1);
    assert!(result.stderr_lossy().contains("Not a directory"));
    assert_eq!(session.cwd(), root);
}

#[tokio::test]
#[serial]
async fn test_bare_cd_and_tilde_go_home() {
    let home = tempfile::tempdir().unwrap();
    let home_path = home.path().canonicalize().unwrap();
    std::fs::create_dir(home_path.join("projects")).unwrap();
    let original = std::env::var_os("HOME");
    std::env::set_var("HOME", &home_path);

    let start = tempfile::tempdir().unwrap();
    let mut session = session_in(start.path());
    let cancel = CancellationToken::new();

    let bare = session.execute(&cancel, "cd").await;
    let after_bare = session.cwd().to_path_buf();
    session.execute(&cancel, "cd /").await;
    let tilde = session.execute(&cancel, "cd ~").await;
    let after_tilde = session.cwd().to_path_buf();
    let sub = session.execute(&cancel, "cd ~/projects").await;
    let after_sub = session.cwd().to_path_buf();

    match original {
        Some(value) => std::env::set_var("HOME", value),
        None => std::env::remove_var("HOME"),
    }

    assert!(bare.success());
    assert_eq!(after_bare, home_path);
    assert!(tilde.success());
    assert_eq!(after_tilde, home_path);
    assert!(sub.success());
    assert_eq!(after_sub, home_path.join("projects"));
}

#[tokio::test]
async fn test_cdrecord_is_not_cd() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let mut session = LocalSession::with_cwd(&root);

    let result = session
        .execute(&CancellationToken::new(), "cdrecord-not-installed")
        .await;
    assert_eq!(result.exit_code, 127);
    assert_eq!(session.cwd(), root);
}

#[tokio::test]
async fn test_missing_cwd_is_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("gone");
    let mut session = LocalSession::with_cwd(&gone);

    let result = session.execute(&CancellationToken::new(), "echo hi").await;
    assert!(matches!(result.error, Some(Error::Spawn { .. })), "{:?}", result.error);
}

#[tokio::test]
async fn test_cancel_stops_long_command() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = session.execute(&cancel, "echo started; sleep 30").await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.error.as_ref().is_some_and(Error::is_cancelled));
}

#[tokio::test]
async fn test_already_cancelled_token() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let mut session = session_in(dir.path());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = session.execute(&cancel, "touch marker").await;
    assert!(result.error.as_ref().is_some_and(Error::is_cancelled));
    assert!(!marker.exists());
}

#[tokio::test]
#[serial]
async fn test_interactive_without_tty() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());

    // a failing command is still a successful interactive run
    session
        .execute_interactive(&CancellationToken::new(), "exit 4")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_run_dispatches_captured() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_in(dir.path());

    match session.run(&CancellationToken::new(), "echo captured").await.unwrap() {
        RunOutcome::Captured(result) => assert_eq!(result.stdout_lossy(), "captured\n"),
        RunOutcome::Attached => panic!("echo should not be attached"),
    }
}

#[tokio::test]
async fn test_connection_state_and_close() {
    let mut session = LocalSession::new();
    assert!(session.is_connected());
    assert!(session.host_info_string().ends_with(":local"));

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(session.is_connected());
}

/// Live (non-zombie) processes whose process group is `pgid`.
#[cfg(target_os = "linux")]
fn live_group_members(pgid: i32) -> Vec<i32> {
    let mut members = Vec::new();
    for entry in std::fs::read_dir("/proc").unwrap().flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // after "pid (comm) ": state ppid pgrp ...
        let Some(close) = stat.rfind(')') else {
            continue;
        };
        let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
        if fields.len() > 2 && fields[0] != "Z" && fields[2].parse() == Ok(pgid) {
            members.push(pid);
        }
    }
    members
}

#[cfg(target_os = "linux")]
#[tokio::test]
#[serial]
async fn test_interactive_cancel_kills_forked_children() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("shell.pid");
    let mut session = session_in(dir.path());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let watched = pid_file.clone();
    tokio::spawn(async move {
        for _ in 0..250 {
            let written = std::fs::read_to_string(&watched).unwrap_or_default();
            if written.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    // `; true` keeps sh from exec-ing sleep, so sleep is a separate process
    let started = Instant::now();
    let err = session
        .execute_interactive(&cancel, "echo $$ > shell.pid; sleep 31337; true")
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));

    let pgid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    let mut survivors = live_group_members(pgid);
    for _ in 0..50 {
        if survivors.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        survivors = live_group_members(pgid);
    }
    assert!(survivors.is_empty(), "still running in group {pgid}: {survivors:?}");
}
