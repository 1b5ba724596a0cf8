use super::*;
use crate::FailureKind;
use serde_json::json;

fn palette_job() -> JobSpec {
    JobSpec::new()
        .input("in.raw", vec![1u8, 2, 3])
        .stage(
            Stage::tool("palettegen", ["cp", "in.raw", "palette.tmp"])
                .reads(["in.raw"])
                .writes(["palette.tmp"]),
        )
        .stage(
            Stage::tool("paletteuse", ["cp", "in.raw", "out.raw"])
                .reads(["in.raw", "palette.tmp"])
                .writes(["out.raw"]),
        )
        .output("out.raw")
}

#[test]
fn two_pass_job_is_valid() {
    palette_job()
        .validate(&CodecRegistry::with_builtin())
        .unwrap();
}

#[test]
fn removing_the_producer_is_a_dependency_failure() {
    let mut job = palette_job();
    job.stages.remove(0);
    let err = job.validate(&CodecRegistry::with_builtin()).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Validation);
    assert!(err.to_string().contains("reads 'palette.tmp'"));
}

#[test]
fn reading_a_later_stage_output_is_rejected() {
    let mut job = palette_job();
    job.stages.swap(0, 1);
    assert!(job.validate(&CodecRegistry::with_builtin()).is_err());
}

#[test]
fn outputs_must_be_produced_and_unique() {
    let reg = CodecRegistry::with_builtin();
    let err = palette_job().output("extra.raw").validate(&reg).unwrap_err();
    assert!(err.to_string().contains("never produced"));

    let err = palette_job().output("out.raw").validate(&reg).unwrap_err();
    assert!(err.to_string().contains("more than once"));

    let mut none = palette_job();
    none.outputs.clear();
    assert!(none.validate(&reg).is_err());
}

#[test]
fn stages_may_not_clobber_existing_files() {
    let job = JobSpec::new()
        .input("in.raw", vec![0u8])
        .stage(Stage::tool("inplace", ["true"]).reads(["in.raw"]).writes(["in.raw"]))
        .output("in.raw");
    let err = job.validate(&CodecRegistry::new()).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn names_and_actions_are_checked() {
    let reg = CodecRegistry::with_builtin();
    let job = JobSpec::new()
        .input("../../etc/passwd", vec![0u8])
        .stage(Stage::tool("s", ["true"]).writes(["o"]))
        .output("o");
    assert!(job.validate(&reg).is_err());

    let empty_argv = JobSpec::new()
        .stage(Stage::tool("s", Vec::<String>::new()).writes(["o"]))
        .output("o");
    assert!(empty_argv.validate(&reg).is_err());

    let zero_timeout = JobSpec::new()
        .stage(
            Stage::tool("s", ["true"])
                .writes(["o"])
                .timeout(Duration::ZERO),
        )
        .output("o");
    assert!(zero_timeout.validate(&reg).is_err());

    let dup_stage = JobSpec::new()
        .stage(Stage::tool("s", ["true"]).writes(["a"]))
        .stage(Stage::tool("s", ["true"]).writes(["b"]))
        .output("b");
    assert!(dup_stage.validate(&reg).is_err());
}

#[test]
fn library_stages_need_a_known_codec_and_one_output() {
    let reg = CodecRegistry::with_builtin();
    let base = JobSpec::new().input("in.png", vec![0u8]);

    let unknown = base
        .clone()
        .stage(
            Stage::library("trace", "potrace", json!({}))
                .reads(["in.png"])
                .writes(["out.svg"]),
        )
        .output("out.svg");
    assert!(
        unknown
            .validate(&reg)
            .unwrap_err()
            .to_string()
            .contains("unknown codec 'potrace'")
    );

    let bad_options = base
        .clone()
        .stage(
            Stage::library("resize", "image", json!({ "format": "png", "quality": 500 }))
                .reads(["in.png"])
                .writes(["out.png"]),
        )
        .output("out.png");
    assert!(bad_options.validate(&reg).is_err());

    let two_outputs = base
        .clone()
        .stage(
            Stage::library("copy", "copy", json!(null))
                .reads(["in.png"])
                .writes(["a.png", "b.png"]),
        )
        .output("a.png");
    assert!(two_outputs.validate(&reg).is_err());

    let fallback_unknown = base
        .stage(
            Stage::tool("decode", ["magick", "in.png", "out.png"])
                .reads(["in.png"])
                .writes(["out.png"])
                .with_fallback(StageAction::library("nope", json!(null))),
        )
        .output("out.png");
    assert!(fallback_unknown.validate(&reg).is_err());
}

#[test]
fn stage_json_round_trips_with_millisecond_timeouts() {
    let json = json!({
        "name": "palettegen",
        "reads": ["in.gif"],
        "writes": ["palette.png"],
        "action": { "kind": "external_tool", "argv": ["ffmpeg", "-i", "in.gif", "palette.png"], "timeout_ms": 1500 },
        "fallbacks": [{ "kind": "library_call", "codec": "copy" }]
    });
    let stage: Stage = serde_json::from_value(json).unwrap();
    match &stage.action {
        StageAction::ExternalTool { argv, timeout } => {
            assert_eq!(argv[0], "ffmpeg");
            assert_eq!(*timeout, Some(Duration::from_millis(1500)));
        }
        other => panic!("unexpected action {other:?}"),
    }
    assert_eq!(
        stage.fallbacks,
        vec![StageAction::library("copy", serde_json::Value::Null)]
    );
    assert_eq!(stage.attempts().count(), 2);
}

#[test]
fn producer_of_finds_declaring_stage() {
    let job = palette_job();
    assert_eq!(job.producer_of("palette.tmp"), Some("palettegen"));
    assert_eq!(job.producer_of("out.raw"), Some("paletteuse"));
    assert_eq!(job.producer_of("in.raw"), None);
}
