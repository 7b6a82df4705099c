//! Build event stream decoding.
//!
//! The build tool writes one protobuf `BuildEvent` per record, each prefixed
//! by its varint-encoded length. [`EventStreamDecoder`] reads records from
//! any `Read` until end of file; a record cut short anywhere (inside the
//! length prefix or the payload) is a [`DecodeError::Truncated`], never a
//! silently shorter stream.
//!
//! [`EventStream`] holds the decoded sequence in file order and derives the
//! artifact and test-result maps from it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use prost::Message;
use tracing::debug;

use crate::error::DecodeError;
use crate::proto::{self, build_event, build_event_id, file, TestStatus};
use crate::test_result::TestResultView;

/// Longest possible varint encoding of a 64-bit length.
const MAX_PREFIX_LEN: usize = 10;

/// Where an output file's bytes can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    /// A URI, normally `file://` for local builds.
    Uri(String),
    /// Content inlined in the event itself.
    Inline(Vec<u8>),
    /// A symlink artifact and its target.
    Symlink(String),
    /// No location was reported.
    Unspecified,
}

/// A file reported by a file-set or test-result event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub location: FileLocation,
}

impl OutputFile {
    /// Local filesystem path of this file.
    ///
    /// `None` for files with no URI; an error for URIs that do not name a
    /// local file (remote `bytestream://` outputs, for example).
    pub fn local_path(&self) -> Result<Option<PathBuf>, DecodeError> {
        match &self.location {
            FileLocation::Uri(uri) => uri_to_path(uri).map(Some),
            _ => Ok(None),
        }
    }
}

impl From<&proto::File> for OutputFile {
    fn from(f: &proto::File) -> Self {
        let location = match &f.file {
            Some(file::File::Uri(uri)) => FileLocation::Uri(uri.clone()),
            Some(file::File::Contents(bytes)) => FileLocation::Inline(bytes.clone()),
            Some(file::File::SymlinkTargetPath(target)) => FileLocation::Symlink(target.clone()),
            None => FileLocation::Unspecified,
        };
        OutputFile {
            name: f.name.clone(),
            location,
        }
    }
}

/// A decoded event, reduced to the kinds this crate inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A named set of produced files.
    FileSet { id: String, files: Vec<OutputFile> },
    /// The outputs of one test attempt.
    TestResult {
        label: String,
        status: TestStatus,
        outputs: Vec<OutputFile>,
    },
    /// Any other event kind.
    Other,
}

/// Events are classified by their id. A test-result id whose payload is not
/// a test result (an aborted test) still yields a [`BuildEvent::TestResult`],
/// with [`TestStatus::NoStatus`] and no outputs.
impl From<&proto::BuildEvent> for BuildEvent {
    fn from(event: &proto::BuildEvent) -> Self {
        match event.id.as_ref().and_then(|id| id.id.as_ref()) {
            Some(build_event_id::Id::TestResult(id)) => match &event.payload {
                Some(build_event::Payload::TestResult(result)) => BuildEvent::TestResult {
                    label: id.label.clone(),
                    status: result.status(),
                    outputs: result
                        .test_action_output
                        .iter()
                        .map(OutputFile::from)
                        .collect(),
                },
                _ => BuildEvent::TestResult {
                    label: id.label.clone(),
                    status: TestStatus::NoStatus,
                    outputs: Vec::new(),
                },
            },
            id => match &event.payload {
                Some(build_event::Payload::NamedSetOfFiles(set)) => {
                    let id = match id {
                        Some(build_event_id::Id::NamedSet(named)) => named.id.clone(),
                        _ => String::new(),
                    };
                    BuildEvent::FileSet {
                        id,
                        files: set.files.iter().map(OutputFile::from).collect(),
                    }
                }
                _ => BuildEvent::Other,
            },
        }
    }
}

/// Streaming reader of length-delimited event records.
pub struct EventStreamDecoder<R> {
    reader: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> EventStreamDecoder<R> {
    /// Wrap a reader positioned at the start of a record.
    pub fn new(reader: R) -> Self {
        EventStreamDecoder {
            reader,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record, or `None` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<proto::BuildEvent>, DecodeError> {
        let start = self.offset;

        let mut prefix = [0u8; MAX_PREFIX_LEN];
        let mut prefix_len = 0;
        loop {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(0) if prefix_len == 0 => return Ok(None),
                Ok(0) => {
                    return Err(DecodeError::Truncated {
                        offset: start,
                        detail: "end of file inside length prefix".to_string(),
                    })
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            prefix[prefix_len] = byte[0];
            prefix_len += 1;
            self.offset += 1;
            if byte[0] & 0x80 == 0 {
                break;
            }
            if prefix_len == MAX_PREFIX_LEN {
                return Err(DecodeError::InvalidLength { offset: start });
            }
        }

        let len = prost::decode_length_delimiter(&prefix[..prefix_len])
            .map_err(|source| DecodeError::Malformed {
                offset: start,
                source,
            })?;

        let mut payload = Vec::new();
        (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut payload)?;
        if payload.len() < len {
            return Err(DecodeError::Truncated {
                offset: start,
                detail: format!(
                    "payload has {} of {} declared bytes",
                    payload.len(),
                    len
                ),
            });
        }
        self.offset += len as u64;

        proto::BuildEvent::decode(payload.as_slice())
            .map(Some)
            .map_err(|source| DecodeError::Malformed {
                offset: start,
                source,
            })
    }
}

impl<R: Read> Iterator for EventStreamDecoder<R> {
    type Item = Result<proto::BuildEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.next_record().transpose();
        if matches!(next, Some(Err(_))) {
            self.failed = true;
        }
        next
    }
}

/// A fully decoded build event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream {
    raw: Vec<proto::BuildEvent>,
    events: Vec<BuildEvent>,
}

impl EventStream {
    /// Decode every record of the file at `path`.
    pub fn read(path: &Path) -> Result<Self, DecodeError> {
        let file = fs::File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DecodeError::Missing(path.to_path_buf()),
            _ => DecodeError::Io(e),
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Decode every record from `reader`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DecodeError> {
        let raw = EventStreamDecoder::new(reader).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_raw(raw))
    }

    /// Wrap already-decoded protobuf events.
    pub fn from_raw(raw: Vec<proto::BuildEvent>) -> Self {
        let events = raw.iter().map(BuildEvent::from).collect();
        EventStream { raw, events }
    }

    /// Typed events, in file order.
    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }

    /// Protobuf events, in file order.
    pub fn raw(&self) -> &[proto::BuildEvent] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Artifact name to local path, flattened over all file sets.
    ///
    /// When several files share a name, the one appearing last in the stream
    /// wins. Files without a URI have no local path and are left out.
    pub fn artifacts(&self) -> Result<BTreeMap<String, PathBuf>, DecodeError> {
        let mut artifacts = BTreeMap::new();
        for event in &self.events {
            let BuildEvent::FileSet { files, .. } = event else {
                continue;
            };
            for file in files {
                let Some(path) = file.local_path()? else {
                    debug!("Artifact {} has no local path", file.name);
                    continue;
                };
                if let Some(previous) = artifacts.insert(file.name.clone(), path) {
                    debug!("Artifact {} redeclared, dropping {:?}", file.name, previous);
                }
            }
        }
        Ok(artifacts)
    }

    /// Test label to its outputs, merged across every result for that label.
    pub fn test_results(&self) -> Result<BTreeMap<String, TestResultView>, DecodeError> {
        let mut results: BTreeMap<String, TestResultView> = BTreeMap::new();
        for event in &self.events {
            let BuildEvent::TestResult {
                label,
                status,
                outputs,
            } = event
            else {
                continue;
            };
            let mut paths = Vec::with_capacity(outputs.len());
            for output in outputs {
                if let Some(path) = output.local_path()? {
                    paths.push(path);
                }
            }
            results
                .entry(label.clone())
                .or_insert_with(|| TestResultView::new(label.clone(), Vec::new()))
                .record_attempt(*status, paths);
        }
        Ok(results)
    }
}

fn uri_to_path(uri: &str) -> Result<PathBuf, DecodeError> {
    let unsupported = || DecodeError::UnsupportedUri {
        uri: uri.to_string(),
    };
    let url = url::Url::parse(uri).map_err(|_| unsupported())?;
    if url.scheme() != "file" {
        return Err(unsupported());
    }
    url.to_file_path().map_err(|_| unsupported())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri_file(name: &str, uri: &str) -> proto::File {
        proto::File {
            name: name.to_string(),
            file: Some(file::File::Uri(uri.to_string())),
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

    fn encode(events: &[proto::BuildEvent]) -> Vec<u8> {
        events
            .iter()
            .flat_map(|e| e.encode_length_delimited_to_vec())
            .collect()
    }

    #[test]
    fn test_empty_input_is_empty_stream() {
        let stream = EventStream::from_reader(io::empty()).unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn test_events_preserve_file_order() {
        let bytes = encode(&[
            file_set("0", vec![uri_file("a", "file:///out/a")]),
            proto::BuildEvent::default(),
            file_set("1", vec![uri_file("b", "file:///out/b")]),
        ]);
        let stream = EventStream::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(stream.len(), 3);
        assert!(matches!(&stream.events()[0], BuildEvent::FileSet { id, .. } if id == "0"));
        assert_eq!(stream.events()[1], BuildEvent::Other);
        assert!(matches!(&stream.events()[2], BuildEvent::FileSet { id, .. } if id == "1"));
        assert_eq!(stream.raw().len(), 3);
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut bytes = encode(&[file_set("0", vec![uri_file("a", "file:///out/a")])]);
        bytes.truncate(bytes.len() - 3);

        let err = EventStream::from_reader(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 0, .. }), "{err:?}");
    }

    #[test]
    fn test_truncated_length_prefix_is_an_error() {
        let mut bytes = encode(&[file_set("0", vec![uri_file("a", "file:///out/a")])]);
        // A continuation byte with nothing after it.
        bytes.push(0x80);

        let err = EventStream::from_reader(bytes.as_slice()).unwrap_err();
        match err {
            DecodeError::Truncated { offset, .. } => assert!(offset > 0),
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_overlong_prefix_is_rejected() {
        let bytes = [0xffu8; 11];
        let err = EventStream::from_reader(&bytes[..]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength { offset: 0 }));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        // Length 2, then a field header with wire type 7 (invalid).
        let bytes = [0x02u8, 0x0f, 0x00];
        let err = EventStream::from_reader(&bytes[..]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }), "{err:?}");
    }

    #[test]
    fn test_decoder_stops_after_error() {
        let bytes = [0x05u8, 0x01];
        let mut decoder = EventStreamDecoder::new(&bytes[..]);
        assert!(matches!(decoder.next(), Some(Err(_))));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_duplicate_artifact_last_wins() {
        let bytes = encode(&[
            file_set("0", vec![uri_file("out.txt", "file:///first/out.txt")]),
            file_set("1", vec![uri_file("out.txt", "file:///second/out.txt")]),
        ]);
        let stream = EventStream::from_reader(bytes.as_slice()).unwrap();
        let artifacts = stream.artifacts().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts["out.txt"], PathBuf::from("/second/out.txt"));
    }

    #[test]
    fn test_inline_files_have_no_path() {
        let inline = proto::File {
            name: "stamp".to_string(),
            file: Some(file::File::Contents(b"1".to_vec())),
            ..Default::default()
        };
        let bytes = encode(&[file_set("0", vec![inline, uri_file("bin", "file:///out/bin")])]);
        let stream = EventStream::from_reader(bytes.as_slice()).unwrap();
        let artifacts = stream.artifacts().unwrap();
        assert_eq!(artifacts.keys().collect::<Vec<_>>(), vec!["bin"]);
    }

    #[test]
    fn test_remote_uri_is_unsupported() {
        let bytes = encode(&[file_set(
            "0",
            vec![uri_file("lib.a", "bytestream://remote.example/blobs/abc/12")],
        )]);
        let stream = EventStream::from_reader(bytes.as_slice()).unwrap();
        let err = stream.artifacts().unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedUri { .. }));
    }

    #[test]
    fn test_aborted_test_keeps_its_label() {
        let aborted = proto::BuildEvent {
            id: Some(proto::BuildEventId {
                id: Some(build_event_id::Id::TestResult(proto::TestResultId {
                    label: "//pkg:t".to_string(),
                    run: 1,
                    shard: 1,
                    attempt: 1,
                })),
            }),
            payload: Some(build_event::Payload::Aborted(proto::Aborted {
                reason: 1,
                description: "interrupted".to_string(),
            })),
            ..Default::default()
        };
        let stream = EventStream::from_reader(encode(&[aborted]).as_slice()).unwrap();

        assert_eq!(
            stream.events(),
            &[BuildEvent::TestResult {
                label: "//pkg:t".to_string(),
                status: TestStatus::NoStatus,
                outputs: vec![],
            }]
        );
        let results = stream.test_results().unwrap();
        let view = &results["//pkg:t"];
        assert!(view.files().is_empty());
        assert_eq!(view.status(), TestStatus::NoStatus);
    }

    #[test]
    fn test_file_set_payload_without_named_set_id() {
        let mut event = file_set("0", vec![uri_file("a", "file:///out/a")]);
        event.id = None;
        let stream = EventStream::from_reader(encode(&[event]).as_slice()).unwrap();
        assert!(matches!(&stream.events()[0], BuildEvent::FileSet { id, .. } if id.is_empty()));
    }

    #[test]
    fn test_percent_encoded_uri() {
        let path = uri_to_path("file:///out/with%20space.txt").unwrap();
        assert_eq!(path, PathBuf::from("/out/with space.txt"));
    }
}
