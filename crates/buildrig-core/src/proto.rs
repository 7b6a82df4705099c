//! Subset of the build event protocol (`build_event_stream.proto`).
//!
//! Only the messages needed to extract artifacts and test results are
//! declared. Tags match the upstream schema; every field not declared here is
//! skipped by the decoder, so any event kind still decodes.

use std::fmt;

/// One record of the build event stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildEvent {
    #[prost(message, optional, tag = "1")]
    pub id: Option<BuildEventId>,
    #[prost(message, repeated, tag = "2")]
    pub children: Vec<BuildEventId>,
    #[prost(bool, tag = "20")]
    pub last_message: bool,
    #[prost(oneof = "build_event::Payload", tags = "4, 10, 15")]
    pub payload: Option<build_event::Payload>,
}

pub mod build_event {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "4")]
        Aborted(super::Aborted),
        #[prost(message, tag = "10")]
        TestResult(super::TestResult),
        #[prost(message, tag = "15")]
        NamedSetOfFiles(super::NamedSetOfFiles),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildEventId {
    #[prost(oneof = "build_event_id::Id", tags = "5, 8")]
    pub id: Option<build_event_id::Id>,
}

pub mod build_event_id {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Id {
        #[prost(message, tag = "5")]
        NamedSet(super::NamedSetOfFilesId),
        #[prost(message, tag = "8")]
        TestResult(super::TestResultId),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NamedSetOfFilesId {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TestResultId {
    #[prost(string, tag = "1")]
    pub label: String,
    #[prost(int32, tag = "2")]
    pub run: i32,
    #[prost(int32, tag = "3")]
    pub shard: i32,
    #[prost(int32, tag = "4")]
    pub attempt: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NamedSetOfFiles {
    #[prost(message, repeated, tag = "1")]
    pub files: Vec<File>,
    #[prost(message, repeated, tag = "2")]
    pub file_sets: Vec<NamedSetOfFilesId>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct File {
    #[prost(string, repeated, tag = "4")]
    pub path_prefix: Vec<String>,
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(oneof = "file::File", tags = "2, 3, 7")]
    pub file: Option<file::File>,
    #[prost(string, tag = "5")]
    pub digest: String,
    #[prost(int64, tag = "6")]
    pub length: i64,
}

pub mod file {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum File {
        #[prost(string, tag = "2")]
        Uri(String),
        #[prost(bytes, tag = "3")]
        Contents(Vec<u8>),
        #[prost(string, tag = "7")]
        SymlinkTargetPath(String),
    }
}

/// Payload of an event that was announced but will never be posted.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Aborted {
    #[prost(int32, tag = "1")]
    pub reason: i32,
    #[prost(string, tag = "2")]
    pub description: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TestResult {
    #[prost(message, repeated, tag = "2")]
    pub test_action_output: Vec<File>,
    #[prost(bool, tag = "4")]
    pub cached_locally: bool,
    #[prost(enumeration = "TestStatus", tag = "5")]
    pub status: i32,
    #[prost(string, tag = "9")]
    pub status_details: String,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    prost::Enumeration,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum TestStatus {
    NoStatus = 0,
    Passed = 1,
    Flaky = 2,
    Timeout = 3,
    Failed = 4,
    Incomplete = 5,
    RemoteFailure = 6,
    FailedToBuild = 7,
    ToolHaltedBeforeTesting = 8,
}

impl TestStatus {
    /// Upstream enum value name.
    pub fn name(&self) -> &'static str {
        match self {
            TestStatus::NoStatus => "NO_STATUS",
            TestStatus::Passed => "PASSED",
            TestStatus::Flaky => "FLAKY",
            TestStatus::Timeout => "TIMEOUT",
            TestStatus::Failed => "FAILED",
            TestStatus::Incomplete => "INCOMPLETE",
            TestStatus::RemoteFailure => "REMOTE_FAILURE",
            TestStatus::FailedToBuild => "FAILED_TO_BUILD",
            TestStatus::ToolHaltedBeforeTesting => "TOOL_HALTED_BEFORE_TESTING",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
