//! Build event inspection through a full invocation: a fake tool copies a
//! pre-encoded event stream to the path it is given on the command line.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use buildrig_core::proto::{self, build_event, build_event_id, file};
use buildrig_core::{
    ErrorKind, InvocationBuilder, InvocationResult, RigError, TestStatus, TEST_LOG, TEST_XML,
};
use prost::Message;
use tempfile::{tempdir, TempDir};

const FAKE_TOOL: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --build_event_binary_file=*) cp "$BEP_FIXTURE" "${arg#--build_event_binary_file=}" ;;
  esac
done
exit "${FAKE_EXIT:-0}"
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let tool = dir.path().join("fake-tool");
        fs::write(&tool, FAKE_TOOL).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir_all(dir.path().join("workspace")).unwrap();
        Fixture { dir }
    }

    fn output(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("output/execroot").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    async fn run(&self, events: &[proto::BuildEvent], args: &[&str]) -> InvocationResult {
        let fixture = self.dir.path().join("fixture.bp");
        let bytes: Vec<u8> = events
            .iter()
            .flat_map(|e| e.encode_length_delimited_to_vec())
            .collect();
        fs::write(&fixture, bytes).unwrap();

        InvocationBuilder::new(
            self.dir.path().join("fake-tool"),
            self.dir.path().join("workspace"),
            self.dir.path().join("output"),
            args.iter().map(|s| s.to_string()).collect(),
        )
        .with_env("BEP_FIXTURE", fixture.display().to_string())
        .run_successfully()
        .await
        .unwrap()
    }
}

fn local(name: &str, path: &Path) -> proto::File {
    proto::File {
        name: name.to_string(),
        file: Some(file::File::Uri(
            url::Url::from_file_path(path).unwrap().to_string(),
        )),
        ..Default::default()
    }
}

fn file_set(id: &str, files: Vec<proto::File>) -> proto::BuildEvent {
    proto::BuildEvent {
        id: Some(proto::BuildEventId {
            id: Some(build_event_id::Id::NamedSet(proto::NamedSetOfFilesId {
                id: id.to_string(),
            })),
        }),
        payload: Some(build_event::Payload::NamedSetOfFiles(proto::NamedSetOfFiles {
            files,
            file_sets: vec![],
        })),
        ..Default::default()
    }
}

fn test_result(label: &str, attempt: i32, outputs: Vec<proto::File>) -> proto::BuildEvent {
    proto::BuildEvent {
        id: Some(proto::BuildEventId {
            id: Some(build_event_id::Id::TestResult(proto::TestResultId {
                label: label.to_string(),
                run: 1,
                shard: 1,
                attempt,
            })),
        }),
        payload: Some(build_event::Payload::TestResult(proto::TestResult {
            test_action_output: outputs,
            status: TestStatus::Passed as i32,
            ..Default::default()
        })),
        ..Default::default()
    }
}

#[tokio::test]
async fn artifacts_resolve_to_local_files() {
    let fx = Fixture::new();
    let a = fx.output("bin/BuildMe.out", "a");
    let b = fx.output("bin/BuildMe2.out", "b");

    let result = fx
        .run(
            &[
                proto::BuildEvent::default(),
                file_set("0", vec![local("BuildMe", &a)]),
                file_set("1", vec![local("BuildMe2", &b)]),
            ],
            &["build", "//:all"],
        )
        .await;

    let artifacts = result.artifacts().unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(fs::read_to_string(&artifacts["BuildMe"]).unwrap(), "a");
    assert_eq!(fs::read_to_string(&artifacts["BuildMe2"]).unwrap(), "b");
    assert!(result.artifact("NotBuilt").unwrap().is_none());
    assert_eq!(result.events().unwrap().len(), 3);
    assert_eq!(result.raw_events().unwrap().len(), 3);
}

#[tokio::test]
async fn repeated_test_label_collects_all_outputs() {
    let fx = Fixture::new();
    let log = fx.output("testlogs/t/attempt_1/test.log", "first attempt");
    let xml = fx.output("testlogs/t/test.xml", "<testsuites/>");

    let result = fx
        .run(
            &[
                test_result("//pkg:t", 1, vec![local("test.log", &log)]),
                test_result("//pkg:t", 2, vec![local("test.xml", &xml)]),
            ],
            &["test", "//pkg:t"],
        )
        .await;

    let view = result.test_result().unwrap();
    assert_eq!(view.label(), "//pkg:t");
    assert_eq!(view.files(), &[log, xml]);
    assert_eq!(view.content(TEST_LOG).unwrap(), "first attempt");
    assert_eq!(view.lines(TEST_XML).unwrap(), vec!["<testsuites/>"]);
}

#[tokio::test]
async fn single_result_query_fails_on_two_labels_or_none() {
    let fx = Fixture::new();
    let result = fx
        .run(
            &[
                test_result("//pkg:a_test", 1, vec![]),
                test_result("//pkg:b_test", 1, vec![]),
            ],
            &["test", "//pkg:all"],
        )
        .await;
    let err = result.test_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ambiguity);
    let msg = err.to_string();
    assert!(msg.contains("//pkg:a_test") && msg.contains("//pkg:b_test"), "{msg}");

    let result = fx.run(&[proto::BuildEvent::default()], &["build"]).await;
    assert!(matches!(result.test_result(), Err(RigError::NoTestResult)));
}

#[tokio::test]
async fn shared_basename_is_ambiguous() {
    let fx = Fixture::new();
    let shard1 = fx.output("testlogs/t/shard_1_of_2/test.log", "1");
    let shard2 = fx.output("testlogs/t/shard_2_of_2/test.log", "2");

    let result = fx
        .run(
            &[test_result(
                "//pkg:t",
                1,
                vec![local("test.log", &shard1), local("test.log", &shard2)],
            )],
            &["test", "//pkg:t"],
        )
        .await;

    match result.test_result().unwrap().file(TEST_LOG) {
        Err(RigError::AmbiguousFile { matches, .. }) => {
            assert_eq!(matches, vec![shard1, shard2]);
            assert!(matches.iter().all(|p| p.is_absolute()));
        }
        other => panic!("expected AmbiguousFile, got {other:?}"),
    }
}

#[tokio::test]
async fn truncated_stream_fails_every_query() {
    let fx = Fixture::new();
    let mut bytes = file_set("0", vec![]).encode_length_delimited_to_vec();
    bytes.pop();

    let result = fx.run(&[], &["build"]).await;
    // Replace the event file the tool produced with a cut-short record.
    fs::write(result.event_file().unwrap(), &bytes).unwrap();

    for err in [
        result.events().unwrap_err(),
        result.artifacts().unwrap_err(),
        result.test_results().unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Decode, "{err}");
    }
}
