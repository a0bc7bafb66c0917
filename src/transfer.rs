//! File transfer over chat frames.
//!
//! A transfer is three kinds of frame on one connection:
//! 1. `FileInfo` with a JSON header (`{"filename": .., "filesize": ..}`)
//! 2. zero or more `FileChunk` frames of at most [`FILE_CHUNK_SIZE`] bytes
//! 3. an empty `FileEnd`
//!
//! The sending side is [`ClientHandle::send_file`](crate::ClientHandle::send_file);
//! [`FileAssembler`] rebuilds the file on the receiving side.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChatwireError, Result};
use crate::protocol::{Frame, MessageType};

/// Content bytes per `FileChunk` frame.
pub const FILE_CHUNK_SIZE: usize = 4096;

/// Header announcing a file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub filesize: u64,
}

impl FileInfo {
    /// Header for `path`, named by its final component.
    pub fn for_path(path: &Path, filesize: u64) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { filename, filesize }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A fully received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub info: FileInfo,
    pub data: Vec<u8>,
}

/// Reassembles one transfer at a time from incoming frames.
#[derive(Debug, Default)]
pub struct FileAssembler {
    current: Option<ReceivedFile>,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transfer is in progress.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Feed one frame. Frames that are not part of a transfer are ignored.
    ///
    /// Returns the file once its `FileEnd` arrives. A chunk outside a
    /// transfer, a new header mid-transfer or a size mismatch is an error
    /// and discards the partial file.
    pub fn accept(&mut self, frame: &Frame) -> Result<Option<ReceivedFile>> {
        match frame.message_type() {
            Some(MessageType::FileInfo) => {
                if let Some(partial) = self.current.take() {
                    return Err(ChatwireError::Protocol(format!(
                        "new file header while receiving {}",
                        partial.info.filename
                    )));
                }
                let info = FileInfo::from_payload(frame.payload())?;
                let capacity = usize::try_from(info.filesize).unwrap_or(0);
                self.current = Some(ReceivedFile {
                    info,
                    data: Vec::with_capacity(capacity.min(64 * FILE_CHUNK_SIZE)),
                });
                Ok(None)
            }
            Some(MessageType::FileChunk) => {
                let Some(file) = self.current.as_mut() else {
                    return Err(ChatwireError::Protocol("file chunk without header".into()));
                };
                file.data.extend_from_slice(frame.payload());
                if file.data.len() as u64 > file.info.filesize {
                    let file = self.current.take();
                    return Err(ChatwireError::Protocol(format!(
                        "file {} exceeds announced size",
                        file.map(|f| f.info.filename).unwrap_or_default()
                    )));
                }
                Ok(None)
            }
            Some(MessageType::FileEnd) => {
                let Some(file) = self.current.take() else {
                    return Err(ChatwireError::Protocol("file end without header".into()));
                };
                if file.data.len() as u64 != file.info.filesize {
                    return Err(ChatwireError::Protocol(format!(
                        "file {} truncated: {} of {} bytes",
                        file.info.filename,
                        file.data.len(),
                        file.info.filesize
                    )));
                }
                Ok(Some(file))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg_type: MessageType, payload: &[u8]) -> Frame {
        Frame::from_parts(msg_type.wire_code(), payload)
    }

    #[test]
    fn test_file_info_json_shape() {
        let info = FileInfo {
            filename: "notes.txt".into(),
            filesize: 12,
        };
        let payload = info.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["filename"], "notes.txt");
        assert_eq!(value["filesize"], 12);
        assert_eq!(FileInfo::from_payload(&payload).unwrap(), info);
    }

    #[test]
    fn test_for_path_uses_file_name() {
        let info = FileInfo::for_path(Path::new("/tmp/dir/report.pdf"), 3);
        assert_eq!(info.filename, "report.pdf");
    }

    #[test]
    fn test_from_payload_rejects_garbage() {
        assert!(matches!(
            FileInfo::from_payload(b"{not json"),
            Err(ChatwireError::Json(_))
        ));
    }

    #[test]
    fn test_assembler_rebuilds_file() {
        let info = FileInfo {
            filename: "a.bin".into(),
            filesize: 6,
        };
        let mut assembler = FileAssembler::new();

        assert!(assembler
            .accept(&frame(MessageType::FileInfo, &info.to_payload().unwrap()))
            .unwrap()
            .is_none());
        assert!(assembler.in_progress());
        assembler.accept(&frame(MessageType::FileChunk, b"abc")).unwrap();
        assembler.accept(&frame(MessageType::ChatText, b"interleaved")).unwrap();
        assembler.accept(&frame(MessageType::FileChunk, b"def")).unwrap();

        let file = assembler
            .accept(&frame(MessageType::FileEnd, &[]))
            .unwrap()
            .unwrap();
        assert_eq!(file.info, info);
        assert_eq!(file.data, b"abcdef");
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_assembler_rejects_orphan_chunk() {
        let mut assembler = FileAssembler::new();
        assert!(assembler.accept(&frame(MessageType::FileChunk, b"x")).is_err());
    }

    #[test]
    fn test_assembler_rejects_short_file() {
        let info = FileInfo {
            filename: "short".into(),
            filesize: 10,
        };
        let mut assembler = FileAssembler::new();
        assembler
            .accept(&frame(MessageType::FileInfo, &info.to_payload().unwrap()))
            .unwrap();
        assembler.accept(&frame(MessageType::FileChunk, b"abc")).unwrap();

        let err = assembler.accept(&frame(MessageType::FileEnd, &[])).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn test_assembler_rejects_oversized_file() {
        let info = FileInfo {
            filename: "big".into(),
            filesize: 2,
        };
        let mut assembler = FileAssembler::new();
        assembler
            .accept(&frame(MessageType::FileInfo, &info.to_payload().unwrap()))
            .unwrap();
        assert!(assembler.accept(&frame(MessageType::FileChunk, b"abc")).is_err());
        assert!(!assembler.in_progress());
    }
}
