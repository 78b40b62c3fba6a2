//! Observed sources and the byte sources behind them

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use logparse::ParserType;

use crate::error::{ComputationError, ComputationResult};

/// Largest datagram accepted from a UDP source
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Transport {
    Process {
        command: String,
        cwd: Option<PathBuf>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Tcp {
        addr: String,
    },
    Udp {
        bind_addr: String,
    },
}

impl Transport {
    pub fn validate(&self) -> ComputationResult<()> {
        match self {
            Transport::Process { command, cwd, .. } => {
                if command.trim().is_empty() {
                    return Err(ComputationError::InvalidArgs("Process command is empty".to_string()));
                }
                if let Some(cwd) = cwd
                    && !cwd.is_dir()
                {
                    return Err(ComputationError::InvalidArgs(format!(
                        "Working folder does not exist: {}",
                        cwd.display()
                    )));
                }
                Ok(())
            }
            Transport::Tcp { addr } | Transport::Udp { bind_addr: addr } => addr
                .parse::<SocketAddr>()
                .map(|_| ())
                .map_err(|e| ComputationError::InvalidArgs(format!("Invalid address '{}': {}", addr, e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObserveOrigin {
    File { alias: String, path: PathBuf },
    Concat { files: Vec<(String, PathBuf)> },
    Stream { alias: String, transport: Transport },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveOptions {
    pub origin: ObserveOrigin,
    pub parser: ParserType,
}

impl ObserveOptions {
    pub fn file(path: impl Into<PathBuf>, parser: ParserType) -> Self {
        let path = path.into();
        Self {
            origin: ObserveOrigin::File {
                alias: path.display().to_string(),
                path,
            },
            parser,
        }
    }

    pub fn concat(paths: &[PathBuf], parser: ParserType) -> Self {
        Self {
            origin: ObserveOrigin::Concat {
                files: paths.iter().map(|p| (p.display().to_string(), p.clone())).collect(),
            },
            parser,
        }
    }

    pub fn stream(alias: impl Into<String>, transport: Transport, parser: ParserType) -> Self {
        Self {
            origin: ObserveOrigin::Stream {
                alias: alias.into(),
                transport,
            },
            parser,
        }
    }

    /// Check the options without touching any file or socket
    pub fn validate(&self) -> ComputationResult<()> {
        match &self.origin {
            ObserveOrigin::File { path, .. } if path.as_os_str().is_empty() => {
                Err(ComputationError::InvalidArgs("File path is empty".to_string()))
            }
            ObserveOrigin::File { .. } => Ok(()),
            ObserveOrigin::Concat { files } if files.is_empty() => {
                Err(ComputationError::InvalidArgs("Nothing to concat".to_string()))
            }
            ObserveOrigin::Concat { .. } => Ok(()),
            ObserveOrigin::Stream { transport, .. } => transport.validate(),
        }?;
        if let ParserType::Record(options) = &self.parser {
            options.validate()?;
        }
        Ok(())
    }

    /// Files the origin reads, in order
    pub fn files(&self) -> Vec<&Path> {
        match &self.origin {
            ObserveOrigin::File { path, .. } => vec![path.as_path()],
            ObserveOrigin::Concat { files } => files.iter().map(|(_, p)| p.as_path()).collect(),
            ObserveOrigin::Stream { .. } => Vec::new(),
        }
    }
}

/// A producer of raw bytes
///
/// `read` returns `Ok(0)` once the source has ended.
#[async_trait]
pub trait ByteSource: Send {
    fn is_finite(&self) -> bool;

    async fn read(&mut self, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize>;

    /// Release whatever the source holds
    async fn close(&mut self) {}
}

async fn read_into<R: AsyncRead + Unpin + Send>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize> {
    let start = buf.len();
    buf.resize(start + max, 0);
    let result = reader.read(&mut buf[start..]).await;
    let read = *result.as_ref().unwrap_or(&0);
    buf.truncate(start + read);
    result
}

struct FileSource {
    file: File,
}

#[async_trait]
impl ByteSource for FileSource {
    fn is_finite(&self) -> bool {
        true
    }

    async fn read(&mut self, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize> {
        read_into(&mut self.file, buf, max).await
    }
}

struct ProcessSource {
    child: Child,
    stdout: tokio::process::ChildStdout,
}

#[async_trait]
impl ByteSource for ProcessSource {
    fn is_finite(&self) -> bool {
        false
    }

    async fn read(&mut self, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize> {
        read_into(&mut self.stdout, buf, max).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "ProcessSource::close: process already gone");
        }
    }
}

struct TcpSource {
    stream: TcpStream,
}

#[async_trait]
impl ByteSource for TcpSource {
    fn is_finite(&self) -> bool {
        false
    }

    async fn read(&mut self, buf: &mut Vec<u8>, max: usize) -> std::io::Result<usize> {
        read_into(&mut self.stream, buf, max).await
    }
}

struct UdpSource {
    socket: UdpSocket,
}

#[async_trait]
impl ByteSource for UdpSource {
    fn is_finite(&self) -> bool {
        false
    }

    async fn read(&mut self, buf: &mut Vec<u8>, _max: usize) -> std::io::Result<usize> {
        let start = buf.len();
        buf.resize(start + MAX_DATAGRAM, 0);
        let result = self.socket.recv(&mut buf[start..]).await;
        let read = *result.as_ref().unwrap_or(&0);
        buf.truncate(start + read);
        result
    }
}

pub async fn open_file(path: &Path) -> std::io::Result<Box<dyn ByteSource>> {
    debug!(path = %path.display(), "open_file: called");
    let file = File::open(path).await?;
    Ok(Box::new(FileSource { file }))
}

pub async fn open_stream(transport: &Transport) -> std::io::Result<Box<dyn ByteSource>> {
    debug!(?transport, "open_stream: called");
    match transport {
        Transport::Process { command, cwd, envs } => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(command)
                .envs(envs)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            if let Some(cwd) = cwd {
                cmd.current_dir(cwd);
            }
            let mut child = cmd.spawn()?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| std::io::Error::other("process stdout is not captured"))?;
            info!(%command, "open_stream: process spawned");
            Ok(Box::new(ProcessSource { child, stdout }))
        }
        Transport::Tcp { addr } => {
            let stream = TcpStream::connect(addr).await?;
            info!(%addr, "open_stream: connected");
            Ok(Box::new(TcpSource { stream }))
        }
        Transport::Udp { bind_addr } => {
            let socket = UdpSocket::bind(bind_addr).await?;
            match socket.local_addr() {
                Ok(local) => info!(%local, "open_stream: listening"),
                Err(e) => warn!(error = %e, "open_stream: bound socket has no local address"),
            }
            Ok(Box::new(UdpSource { socket }))
        }
    }
}
