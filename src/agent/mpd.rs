//! Minimal MPD protocol client
//!
//! MPD speaks a line protocol over TCP (default port 6600):
//!
//! ```text
//! <- OK MPD 0.23.5
//! -> playlistinfo 3
//! <- file: NAS/Music/a.flac
//! <- Pos: 3
//! <- OK
//! -> delete 99
//! <- ACK [2@0] {delete} Bad song index
//! ```
//!
//! One connection is opened per operation; MPD drops idle clients anyway.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::MpdConfig;

/// MPD error code for a bad argument (e.g. out-of-range position)
pub const ACK_ERROR_ARG: u32 = 2;
/// MPD error code for a missing object
pub const ACK_ERROR_NO_EXIST: u32 = 50;

#[derive(Error, Debug)]
pub enum MpdError {
    #[error("MPD I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MPD did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected MPD greeting: {0}")]
    Greeting(String),

    #[error("MPD rejected {command}: {message} (code {code})")]
    Ack {
        code: u32,
        command: String,
        message: String,
    },

    #[error("MPD closed the connection")]
    Closed,
}

impl MpdError {
    /// Whether this ACK means the addressed position does not exist
    pub fn is_missing_item(&self) -> bool {
        matches!(
            self,
            MpdError::Ack { code, .. } if *code == ACK_ERROR_ARG || *code == ACK_ERROR_NO_EXIST
        )
    }
}

/// A queue entry as reported by `currentsong` / `playlistinfo`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Song {
    pub file: String,
    pub pos: Option<u32>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<f64>,
}

impl Song {
    fn from_pairs(pairs: &[(String, String)]) -> Option<Self> {
        let mut song = Song::default();
        for (key, value) in pairs {
            match key.as_str() {
                "file" => {
                    // A second file: line starts the next entry
                    if !song.file.is_empty() {
                        break;
                    }
                    song.file = value.clone();
                }
                "Pos" => song.pos = value.parse().ok(),
                "Title" => song.title = Some(value.clone()),
                "Artist" => song.artist = Some(value.clone()),
                "Album" => song.album = Some(value.clone()),
                "duration" => song.duration = value.parse().ok(),
                "Time" if song.duration.is_none() => song.duration = value.parse().ok(),
                _ => {}
            }
        }
        (!song.file.is_empty()).then_some(song)
    }
}

/// Fields of `status` the agent needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MpdStatus {
    pub state: String,
    pub song: Option<u32>,
    pub elapsed: Option<f64>,
    pub duration: Option<f64>,
}

impl MpdStatus {
    fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut status = MpdStatus::default();
        for (key, value) in pairs {
            match key.as_str() {
                "state" => status.state = value.clone(),
                "song" => status.song = value.parse().ok(),
                "elapsed" => status.elapsed = value.parse().ok(),
                "duration" => status.duration = value.parse().ok(),
                _ => {}
            }
        }
        status
    }
}

/// Connection settings for MPD
#[derive(Debug, Clone)]
pub struct MpdClient {
    addr: String,
    password: Option<String>,
    timeout: Duration,
}

impl MpdClient {
    pub fn new(host: &str, port: u16, password: Option<String>, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            password,
            timeout,
        }
    }

    pub fn from_config(config: &MpdConfig) -> Self {
        Self::new(
            &config.host,
            config.port,
            config.password.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open a connection, check the greeting and authenticate if configured
    pub async fn connect(&self) -> Result<MpdConnection, MpdError> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))??;
        let (read_half, write_half) = stream.into_split();
        let mut conn = MpdConnection {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: self.timeout,
        };

        let greeting = conn.read_line().await?;
        if !greeting.starts_with("OK MPD") {
            return Err(MpdError::Greeting(greeting));
        }
        debug!(addr = %self.addr, greeting = %greeting, "MPD connected");

        if let Some(password) = &self.password {
            conn.command(&format!("password {}", quote(password))).await?;
        }

        Ok(conn)
    }
}

pub struct MpdConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl MpdConnection {
    async fn read_line(&mut self) -> Result<String, MpdError> {
        let mut line = String::new();
        let n = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| MpdError::Timeout(self.timeout))??;
        if n == 0 {
            return Err(MpdError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send one command and collect its `key: value` response lines
    pub async fn command(&mut self, command: &str) -> Result<Vec<(String, String)>, MpdError> {
        debug!(command = %redact(command), "MPD command");
        timeout(
            self.timeout,
            self.writer.write_all(format!("{}\n", command).as_bytes()),
        )
        .await
        .map_err(|_| MpdError::Timeout(self.timeout))??;

        let mut pairs = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(pairs);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Err(parse_ack(ack));
            }
            if let Some((key, value)) = line.split_once(": ") {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }

    pub async fn current_song(&mut self) -> Result<Option<Song>, MpdError> {
        let pairs = self.command("currentsong").await?;
        Ok(Song::from_pairs(&pairs))
    }

    pub async fn status(&mut self) -> Result<MpdStatus, MpdError> {
        let pairs = self.command("status").await?;
        Ok(MpdStatus::from_pairs(&pairs))
    }

    /// Entry at `pos`, or `None` when the position is out of range
    pub async fn playlist_item(&mut self, pos: u32) -> Result<Option<Song>, MpdError> {
        match self.command(&format!("playlistinfo {}", pos)).await {
            Ok(pairs) => Ok(Song::from_pairs(&pairs)),
            Err(e) if e.is_missing_item() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&mut self, pos: u32) -> Result<(), MpdError> {
        self.command(&format!("delete {}", pos)).await.map(|_| ())
    }

    pub async fn play(&mut self) -> Result<(), MpdError> {
        self.command("play").await.map(|_| ())
    }

    pub async fn stop(&mut self) -> Result<(), MpdError> {
        self.command("stop").await.map(|_| ())
    }
}

/// Parse `[code@index] {command} message`
fn parse_ack(ack: &str) -> MpdError {
    let code = ack
        .strip_prefix('[')
        .and_then(|rest| rest.split_once('@'))
        .and_then(|(code, _)| code.parse().ok())
        .unwrap_or(0);
    let command = ack
        .split_once('{')
        .and_then(|(_, rest)| rest.split_once('}'))
        .map(|(cmd, _)| cmd.to_string())
        .unwrap_or_default();
    let message = ack
        .split_once("} ")
        .map(|(_, msg)| msg.to_string())
        .unwrap_or_else(|| ack.to_string());
    MpdError::Ack {
        code,
        command,
        message,
    }
}

/// Quote an argument for the MPD protocol
pub fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

fn redact(command: &str) -> &str {
    if command.starts_with("password") {
        "password ***"
    } else {
        command
    }
}
