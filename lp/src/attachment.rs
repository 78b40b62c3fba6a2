//! File transfers embedded in record streams
//!
//! A transfer is a `Start` frame, any number of `Data` frames and an `End`
//! frame, all sharing a serial number. Frames of different transfers may
//! interleave.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ParserError, ParserResult};
use crate::parser::{ParseOutcome, Parser};
use crate::record::{RecordKind, RecordParser, RecordParserOptions};

/// A decoded file-transfer frame
#[derive(Debug, Clone, PartialEq)]
pub enum TransferFrame {
    Start {
        serial: u32,
        size: u64,
        created: String,
        name: String,
    },
    Data {
        serial: u32,
        data: Vec<u8>,
    },
    End {
        serial: u32,
    },
}

impl TransferFrame {
    pub fn serial(&self) -> u32 {
        match self {
            TransferFrame::Start { serial, .. } | TransferFrame::Data { serial, .. } | TransferFrame::End { serial } => {
                *serial
            }
        }
    }

    /// Payload layout per kind:
    ///
    /// ```text
    /// start: serial u32 | size u64 | created_len u16 | created | name
    /// data:  serial u32 | bytes
    /// end:   serial u32
    /// ```
    pub fn encode(&self) -> (RecordKind, Vec<u8>) {
        match self {
            TransferFrame::Start {
                serial,
                size,
                created,
                name,
            } => {
                let mut out = Vec::with_capacity(14 + created.len() + name.len());
                out.extend_from_slice(&serial.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&(created.len() as u16).to_le_bytes());
                out.extend_from_slice(created.as_bytes());
                out.extend_from_slice(name.as_bytes());
                (RecordKind::TransferStart, out)
            }
            TransferFrame::Data { serial, data } => {
                let mut out = Vec::with_capacity(4 + data.len());
                out.extend_from_slice(&serial.to_le_bytes());
                out.extend_from_slice(data);
                (RecordKind::TransferData, out)
            }
            TransferFrame::End { serial } => (RecordKind::TransferEnd, serial.to_le_bytes().to_vec()),
        }
    }

    pub fn decode(kind: RecordKind, payload: &[u8]) -> ParserResult<Self> {
        if payload.len() < 4 {
            return Err(ParserError::Transfer("frame shorter than serial".to_string()));
        }
        let serial = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        match kind {
            RecordKind::TransferStart => {
                if payload.len() < 14 {
                    return Err(ParserError::Transfer("start frame too short".to_string()));
                }
                let mut size = [0u8; 8];
                size.copy_from_slice(&payload[4..12]);
                let created_len = u16::from_le_bytes([payload[12], payload[13]]) as usize;
                if payload.len() < 14 + created_len {
                    return Err(ParserError::Transfer("start frame truncated".to_string()));
                }
                let created = String::from_utf8_lossy(&payload[14..14 + created_len]).into_owned();
                let name = String::from_utf8_lossy(&payload[14 + created_len..]).into_owned();
                if name.is_empty() {
                    return Err(ParserError::Transfer("start frame without file name".to_string()));
                }
                Ok(TransferFrame::Start {
                    serial,
                    size: u64::from_le_bytes(size),
                    created,
                    name,
                })
            }
            RecordKind::TransferData => Ok(TransferFrame::Data {
                serial,
                data: payload[4..].to_vec(),
            }),
            RecordKind::TransferEnd => Ok(TransferFrame::End { serial }),
            RecordKind::Log => Err(ParserError::Transfer("log record is not a transfer frame".to_string())),
        }
    }

    /// Short human readable form used when rendering the record
    pub fn describe(&self) -> String {
        match self {
            TransferFrame::Start {
                serial,
                size,
                created,
                name,
            } => format!("FLST {} {} {} bytes {}", serial, name, size, created),
            TransferFrame::Data { serial, data } => format!("FLDA {} {} bytes", serial, data.len()),
            TransferFrame::End { serial } => format!("FLFI {}", serial),
        }
    }
}

/// Metadata of a file found in a record stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub created: String,
    /// Indexes (in emitted-message order) of the records carrying the transfer
    pub messages: Vec<u64>,
}

/// A completely received file
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub info: FileInfo,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct PartialTransfer {
    info: FileInfo,
    data: Vec<u8>,
}

/// Assembles attachments out of interleaved frames
#[derive(Debug, Default)]
pub struct FileTransferCollector {
    pending: HashMap<u32, PartialTransfer>,
    keep_data: bool,
}

impl FileTransferCollector {
    /// Collector that keeps file contents
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            keep_data: true,
        }
    }

    /// Collector that only tracks metadata
    pub fn metadata_only() -> Self {
        Self {
            pending: HashMap::new(),
            keep_data: false,
        }
    }

    /// Feed one frame; returns the attachment when its `End` frame arrives
    pub fn feed(&mut self, frame: TransferFrame, message_index: u64) -> Option<Attachment> {
        match frame {
            TransferFrame::Start {
                serial,
                size,
                created,
                name,
            } => {
                if self.pending.contains_key(&serial) {
                    warn!("FileTransferCollector: restarting transfer {}", serial);
                }
                self.pending.insert(
                    serial,
                    PartialTransfer {
                        info: FileInfo {
                            name,
                            size,
                            created,
                            messages: vec![message_index],
                        },
                        data: Vec::new(),
                    },
                );
                None
            }
            TransferFrame::Data { serial, data } => {
                match self.pending.get_mut(&serial) {
                    Some(partial) => {
                        partial.info.messages.push(message_index);
                        if self.keep_data {
                            partial.data.extend_from_slice(&data);
                        }
                    }
                    None => debug!("FileTransferCollector: data for unknown transfer {}", serial),
                }
                None
            }
            TransferFrame::End { serial } => {
                let mut partial = self.pending.remove(&serial)?;
                partial.info.messages.push(message_index);
                if self.keep_data && partial.data.len() as u64 != partial.info.size {
                    warn!(
                        "FileTransferCollector: {} declared {} bytes, received {}",
                        partial.info.name,
                        partial.info.size,
                        partial.data.len()
                    );
                }
                Some(Attachment {
                    info: partial.info,
                    data: partial.data,
                })
            }
        }
    }

    /// Transfers started but not finished
    pub fn incomplete(&self) -> usize {
        self.pending.len()
    }
}

fn walk_transfers(
    path: &Path,
    options: &RecordParserOptions,
    keep_data: bool,
    cancel: &dyn Fn() -> bool,
    mut on_attachment: impl FnMut(Attachment) -> ParserResult<()>,
) -> ParserResult<()> {
    let bytes = fs::read(path)?;
    let mut parser = RecordParser::new(options.clone())?;
    let mut collector = if keep_data {
        FileTransferCollector::new()
    } else {
        FileTransferCollector::metadata_only()
    };
    let mut offset = 0usize;
    let mut index = 0u64;
    while offset < bytes.len() {
        if cancel() {
            return Err(ParserError::Interrupted);
        }
        match parser.parse(&bytes[offset..], true)? {
            ParseOutcome::Parsed { consumed, output } => {
                offset += consumed;
                let Some(output) = output else { continue };
                let (message, frame) = output.into_parts();
                if let Some(frame) = frame
                    && let Some(attachment) = collector.feed(frame, index)
                {
                    on_attachment(attachment)?;
                }
                if message.is_some() {
                    index += 1;
                }
            }
            ParseOutcome::Incomplete => break,
        }
    }
    if collector.incomplete() > 0 {
        warn!("walk_transfers: {} unfinished transfers in {}", collector.incomplete(), path.display());
    }
    Ok(())
}

/// List the files transferred inside a record file
pub fn scan_contained_files(
    path: &Path,
    options: &RecordParserOptions,
    cancel: impl Fn() -> bool,
) -> ParserResult<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_transfers(path, options, false, &cancel, |attachment| {
        files.push(attachment.info);
        Ok(())
    })?;
    info!("scan_contained_files: {} files in {}", files.len(), path.display());
    Ok(files)
}

/// Write transferred files to `out_dir`, optionally only those in `names`
///
/// Returns the number of bytes written.
pub fn extract_files(
    path: &Path,
    out_dir: &Path,
    names: Option<&[String]>,
    options: &RecordParserOptions,
    cancel: impl Fn() -> bool,
) -> ParserResult<u64> {
    fs::create_dir_all(out_dir)?;
    let mut written = 0u64;
    walk_transfers(path, options, true, &cancel, |attachment| {
        if let Some(names) = names
            && !names.iter().any(|n| n == &attachment.info.name)
        {
            return Ok(());
        }
        let target = attachment_path(out_dir, &attachment.info.name);
        fs::write(&target, &attachment.data)?;
        debug!("extract_files: wrote {}", target.display());
        written += attachment.data.len() as u64;
        Ok(())
    })?;
    Ok(written)
}

/// Destination for an attachment, confined to `dir` and never overwriting
pub fn attachment_path(dir: &Path, name: &str) -> PathBuf {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "attachment".to_string());
    let mut target = dir.join(&file_name);
    let mut n = 1;
    while target.exists() {
        target = dir.join(format!("{}-{}", n, file_name));
        n += 1;
    }
    target
}
