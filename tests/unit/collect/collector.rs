use super::*;
use crate::FailureKind;
use crate::workspace::manager::WorkspaceManager;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn collects_copies_with_content_types() {
    let root = tempfile::tempdir().unwrap();
    let ws = WorkspaceManager::new(root.path()).acquire().unwrap();
    std::fs::write(ws.path().join("out.gif"), b"GIF89a\x01\x00\x01\x00").unwrap();
    std::fs::write(ws.path().join("doc.pdf"), b"%PDF-1.7\n").unwrap();
    std::fs::write(ws.path().join("notes.bin"), b"\x00\x01").unwrap();

    let out = ResultCollector::new(1024)
        .collect(&ws, &names(&["out.gif", "doc.pdf", "notes.bin"]))
        .unwrap();
    assert_eq!(out["out.gif"].content_type, "image/gif");
    assert_eq!(out["doc.pdf"].content_type, "application/pdf");
    assert_eq!(out["notes.bin"].content_type, "application/octet-stream");
    assert_eq!(out["doc.pdf"].size(), 9);
}

#[test]
fn missing_output_is_classified() {
    let root = tempfile::tempdir().unwrap();
    let ws = WorkspaceManager::new(root.path()).acquire().unwrap();
    let err = ResultCollector::new(1024)
        .collect(&ws, &names(&["out.mp4"]))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::MissingOutput);
    assert!(err.to_string().contains("out.mp4"));
}

#[test]
fn directories_do_not_count_as_outputs() {
    let root = tempfile::tempdir().unwrap();
    let ws = WorkspaceManager::new(root.path()).acquire().unwrap();
    std::fs::create_dir(ws.path().join("frames")).unwrap();
    let err = ResultCollector::new(1024)
        .collect(&ws, &names(&["frames"]))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::MissingOutput);
}

#[test]
fn total_size_budget_is_a_resource_error() {
    let root = tempfile::tempdir().unwrap();
    let ws = WorkspaceManager::new(root.path()).acquire().unwrap();
    std::fs::write(ws.path().join("a.raw"), vec![0u8; 600]).unwrap();
    std::fs::write(ws.path().join("b.raw"), vec![0u8; 600]).unwrap();
    let collector = ResultCollector::new(1000);
    collector.collect(&ws, &names(&["a.raw"])).unwrap();
    let err = collector
        .collect(&ws, &names(&["a.raw", "b.raw"]))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Resource);
}

#[test]
fn sniffs_media_signatures_before_extension() {
    assert_eq!(detect_content_type("x.bin", b"fLaC\0\0\0"), "audio/flac");
    assert_eq!(
        detect_content_type("x.bin", b"\0\0\0\x18ftypisom\0\0\0\0"),
        "video/mp4"
    );
    assert_eq!(
        detect_content_type("x.bin", b"RIFF\0\0\0\0WAVEfmt "),
        "audio/wav"
    );
    assert_eq!(detect_content_type("clip.webm", b""), "video/webm");
    assert_eq!(detect_content_type("track.MP3", b"zz"), "audio/mpeg");
}
