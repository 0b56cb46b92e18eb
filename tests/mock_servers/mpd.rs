//! Mock MPD for testing
//!
//! Speaks enough of the MPD line protocol for the queue agent: greeting,
//! `password`, `currentsong`, `status`, `playlistinfo`, `delete`, `play`,
//! `stop`. Deleting the current entry while stopped leaves MPD without a
//! current song until the next `play`, which is what the prime step is for.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct MpdState {
    queue: Vec<String>,
    current: Option<usize>,
    /// Position `play` resumes from when there is no current song
    cursor: usize,
    playing: bool,
    password: Option<String>,
    commands: Vec<String>,
}

pub struct MockMpd {
    addr: SocketAddr,
    state: Arc<Mutex<MpdState>>,
    handle: JoinHandle<()>,
}

impl MockMpd {
    pub async fn start(queue: &[&str], current: Option<usize>) -> Self {
        Self::start_with_password(queue, current, None).await
    }

    pub async fn start_with_password(
        queue: &[&str],
        current: Option<usize>,
        password: Option<&str>,
    ) -> Self {
        let state = Arc::new(Mutex::new(MpdState {
            queue: queue.iter().map(|s| s.to_string()).collect(),
            current,
            cursor: current.unwrap_or(0),
            playing: false,
            password: password.map(String::from),
            commands: Vec::new(),
        }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn queue(&self) -> Vec<String> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn current(&self) -> Option<usize> {
        self.state.lock().unwrap().current
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Every command received, across connections
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<MpdState>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    if write_half.write_all(b"OK MPD 0.23.5\n").await.is_err() {
        return;
    }
    while let Ok(Some(line)) = lines.next_line().await {
        let response = handle_command(&state, &line);
        if write_half.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn song(out: &mut String, file: &str, pos: usize) {
    out.push_str(&format!(
        "file: {}\nTitle: Track {}\nArtist: Mock Artist\nAlbum: Mock Album\nduration: 180.000\nPos: {}\nId: {}\n",
        file,
        pos,
        pos,
        pos + 100
    ));
}

fn handle_command(state: &Arc<Mutex<MpdState>>, line: &str) -> String {
    let mut state = state.lock().unwrap();
    state.commands.push(line.to_string());

    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, Some(a)),
        None => (line, None),
    };
    let position = arg.and_then(|a| a.trim_matches('"').parse::<usize>().ok());
    let mut out = String::new();

    match command {
        "password" => {
            let given = arg.map(|a| a.trim_matches('"'));
            if state.password.as_deref() != given {
                return "ACK [3@0] {password} incorrect password\n".to_string();
            }
        }
        "currentsong" => {
            if let Some(pos) = state.current.filter(|p| *p < state.queue.len()) {
                let file = state.queue[pos].clone();
                song(&mut out, &file, pos);
            }
        }
        "status" => {
            out.push_str(if state.playing {
                "state: play\n"
            } else {
                "state: stop\n"
            });
            out.push_str(&format!("playlistlength: {}\n", state.queue.len()));
            if let Some(pos) = state.current {
                out.push_str(&format!("song: {}\nelapsed: 1.500\nduration: 180.000\n", pos));
            }
        }
        "playlistinfo" => match position {
            Some(pos) if pos < state.queue.len() => {
                let file = state.queue[pos].clone();
                song(&mut out, &file, pos);
            }
            _ => return "ACK [2@0] {playlistinfo} Bad song index\n".to_string(),
        },
        "delete" => match position {
            Some(pos) if pos < state.queue.len() => {
                state.queue.remove(pos);
                match state.current {
                    Some(cur) if cur == pos => {
                        state.current = None;
                        state.cursor = pos;
                    }
                    Some(cur) if cur > pos => state.current = Some(cur - 1),
                    _ => {}
                }
            }
            _ => return "ACK [2@0] {delete} Bad song index\n".to_string(),
        },
        "play" => {
            if state.current.is_none() && state.cursor < state.queue.len() {
                state.current = Some(state.cursor);
            }
            state.playing = state.current.is_some();
        }
        "stop" => state.playing = false,
        other => return format!("ACK [5@0] {{{}}} unknown command\n", other),
    }

    out.push_str("OK\n");
    out
}
