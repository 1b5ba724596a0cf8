use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        JobFailure::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        JobFailure::resource("x")
            .to_string()
            .contains("resource error:")
    );
    let tool = JobFailure::Tool {
        stage: "encode".to_string(),
        program: "ffmpeg".to_string(),
        exit_code: Some(1),
        tail: "Invalid data found".to_string(),
    };
    let msg = tool.to_string();
    assert!(msg.contains("tool error in stage 'encode'"));
    assert!(msg.contains("exited with code 1"));
    assert!(msg.contains("Invalid data found"));
}

#[test]
fn timeout_and_missing_output_count_as_tool_failures() {
    let timeout = JobFailure::Timeout {
        stage: "palette".to_string(),
        program: "ffmpeg".to_string(),
        timeout: Duration::from_millis(250),
    };
    assert!(timeout.is_tool_failure());
    assert!(timeout.to_string().contains("250ms"));
    assert!(!timeout.permits_fallback());

    let missing = JobFailure::MissingOutput {
        name: "out.gif".to_string(),
        stage: Some("encode".to_string()),
    };
    assert!(missing.is_tool_failure());
    assert!(missing.permits_fallback());
    assert_eq!(missing.stage(), Some("encode"));
    assert_eq!(missing.kind(), FailureKind::MissingOutput);
}

#[test]
fn caller_errors_are_not_tool_failures() {
    assert!(!JobFailure::validation("bad name").is_tool_failure());
    assert!(!JobFailure::resource("disk full").permits_fallback());
    let cancelled = JobFailure::Cancelled { stage: None };
    assert_eq!(cancelled.kind(), FailureKind::Cancelled);
    assert_eq!(cancelled.stage(), None);
    assert_eq!(cancelled.to_string(), "cancelled");
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = JobFailure::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.kind(), FailureKind::Internal);
}
