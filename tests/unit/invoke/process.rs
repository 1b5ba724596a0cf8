use super::*;
use crate::FailureKind;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn invoker() -> ToolInvoker {
    ToolInvoker::new(256, Duration::from_millis(5))
}

#[test]
fn read_tail_keeps_last_bytes() {
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let tail = read_tail(&data[..], 100).unwrap();
    assert_eq!(tail, &data[data.len() - 100..]);

    let short = read_tail(&b"abc"[..], 100).unwrap();
    assert_eq!(short, b"abc");
}

#[test]
fn empty_argv_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = invoker()
        .run("s", dir.path(), &[], Duration::from_secs(1), &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Validation);
}

#[test]
fn missing_program_is_a_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["mediajob-definitely-not-a-real-tool"]),
            Duration::from_secs(1),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Tool);
    assert_eq!(err.stage(), Some("encode"));
    assert!(err.to_string().contains("failed to spawn"));
}

#[cfg(unix)]
#[test]
fn runs_in_working_dir_with_literal_arguments() {
    let dir = tempfile::tempdir().unwrap();
    // A name full of shell metacharacters must reach the tool as one literal argument.
    let odd = "a b;$(touch pwned)`x`.txt";
    std::fs::write(dir.path().join("in.raw"), b"payload").unwrap();
    let inv = invoker()
        .run(
            "copy",
            dir.path(),
            &argv(&["cp", "in.raw", odd]),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(inv.exit_code, Some(0));
    assert_eq!(inv.argv[2], odd);
    assert_eq!(std::fs::read(dir.path().join(odd)).unwrap(), b"payload");
    assert!(!dir.path().join("pwned").exists());
}

#[cfg(unix)]
#[test]
fn nonzero_exit_carries_stderr_tail() {
    let dir = tempfile::tempdir().unwrap();
    let err = invoker()
        .run(
            "inspect",
            dir.path(),
            &argv(&["sh", "-c", "echo 'Invalid data found when processing input' >&2; exit 3"]),
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .unwrap_err();
    match err {
        JobFailure::Tool {
            stage,
            program,
            exit_code,
            tail,
        } => {
            assert_eq!(stage, "inspect");
            assert_eq!(program, "sh");
            assert_eq!(exit_code, Some(3));
            assert_eq!(tail, "Invalid data found when processing input");
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[cfg(unix)]
#[test]
fn captured_output_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let inv = ToolInvoker::new(64, Duration::from_millis(5))
        .run(
            "noisy",
            dir.path(),
            &argv(&["sh", "-c", "i=0; while [ $i -lt 2000 ]; do echo line-$i >&2; i=$((i+1)); done"]),
            Duration::from_secs(10),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(inv.stderr_tail.len(), 64);
    assert!(inv.diagnostic_tail().ends_with("line-1999"));
}

#[cfg(unix)]
#[test]
fn timeout_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    let err = invoker()
        .run(
            "palette",
            dir.path(),
            &argv(&["sleep", "5"]),
            Duration::from_millis(100),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(err.is_tool_failure());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn cancellation_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });
    let started = Instant::now();
    let err = invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["sleep", "5"]),
            Duration::from_secs(30),
            &cancel,
        )
        .unwrap_err();
    t.join().unwrap();
    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn background_children_do_not_hold_the_call_open() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["sh", "-c", "sleep 4 & exit 0"]),
            Duration::from_millis(500),
            &CancelToken::new(),
        )
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let started = Instant::now();
    let err = invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["sh", "-c", "sleep 4 & exit 3"]),
            Duration::from_secs(30),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Tool);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[cfg(unix)]
#[test]
fn timeout_kills_the_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let err = invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["sh", "-c", "(sleep 1; touch late.txt) & sleep 5"]),
            Duration::from_millis(200),
            &CancelToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    std::thread::sleep(Duration::from_millis(1500));
    assert!(!dir.path().join("late.txt").exists());
}

#[cfg(unix)]
#[test]
fn cancellation_kills_the_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let t = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });
    let err = invoker()
        .run(
            "encode",
            dir.path(),
            &argv(&["sh", "-c", "(sleep 1; touch late.txt) & sleep 5"]),
            Duration::from_secs(30),
            &cancel,
        )
        .unwrap_err();
    t.join().unwrap();
    assert_eq!(err.kind(), FailureKind::Cancelled);
    std::thread::sleep(Duration::from_millis(1500));
    assert!(!dir.path().join("late.txt").exists());
}

fn open_drains() -> (TailDrains, mpsc::Sender<DrainMsg>) {
    let (tx, rx) = mpsc::channel();
    let drains = TailDrains {
        rx,
        pending: 0,
        stdout: Vec::new(),
        stderr: Vec::new(),
    };
    (drains, tx)
}

#[test]
fn output_collection_gives_up_at_the_deadline() {
    let (reader, _writer) = std::io::pipe().unwrap();
    let (mut drains, tx) = open_drains();
    drains.start(&tx, Stream::Stderr, reader, 64);
    let budget = Budget {
        started: Instant::now(),
        timeout: Duration::from_millis(100),
        poll: Duration::from_millis(5),
    };
    let started = Instant::now();
    assert_eq!(
        drains.finish(&budget, &CancelToken::new()),
        Err(Interrupt::TimedOut)
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn output_collection_stops_on_cancel() {
    let (reader, _writer) = std::io::pipe().unwrap();
    let (mut drains, tx) = open_drains();
    drains.start(&tx, Stream::Stdout, reader, 64);
    let budget = Budget {
        started: Instant::now(),
        timeout: Duration::from_secs(30),
        poll: Duration::from_millis(5),
    };
    let cancel = CancelToken::new();
    cancel.cancel();
    assert_eq!(drains.finish(&budget, &cancel), Err(Interrupt::Cancelled));
}

#[test]
fn output_collection_keeps_each_stream() {
    let (mut drains, tx) = open_drains();
    drains.start(&tx, Stream::Stdout, &b"out"[..], 64);
    drains.start(&tx, Stream::Stderr, &b"err"[..], 64);
    let budget = Budget {
        started: Instant::now(),
        timeout: Duration::from_secs(5),
        poll: Duration::from_millis(5),
    };
    drains.finish(&budget, &CancelToken::new()).unwrap();
    assert_eq!(drains.stdout, b"out");
    assert_eq!(drains.stderr, b"err");
}

#[test]
fn missing_tool_is_not_on_path() {
    assert!(!is_tool_on_path("mediajob-definitely-not-a-real-tool", "-version"));
}
