// Line-by-line output streaming for `tool`, `build`, and `download` steps
// (§4.5). Lines are tagged by stream and flushed on newline or after a
// 100ms quiet period for a dangling partial line; the last 200 lines of
// each stream are retained as the step result's tails.

use std::io::Read;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

pub const TAIL_LINES: usize = 200;
const QUIET_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Spawns a reader thread over `source`, emitting `OutputLine`s to the
/// returned channel. The thread exits when the source returns EOF.
pub fn spawn_reader<R: Read + Send + 'static>(mut source: R, stream: StreamKind) -> Receiver<OutputLine> {
    let (tx, rx) = channel();
    thread::spawn(move || {
        read_loop(&mut source, stream, &tx);
    });
    rx
}

fn read_loop<R: Read>(source: &mut R, stream: StreamKind, tx: &Sender<OutputLine>) {
    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();
    let mut last_byte_at = Instant::now();

    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                flush_pending(&mut pending, stream, tx);
                break;
            }
            Ok(n) => {
                last_byte_at = Instant::now();
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    emit(&line, stream, tx);
                }
            }
            Err(_) => break,
        }

        if !pending.is_empty() && last_byte_at.elapsed() >= QUIET_PERIOD {
            flush_pending(&mut pending, stream, tx);
        }
    }
}

fn flush_pending(pending: &mut Vec<u8>, stream: StreamKind, tx: &Sender<OutputLine>) {
    if pending.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(pending).trim_end_matches('\n').to_string();
    let _ = tx.send(OutputLine { stream, text });
    pending.clear();
}

fn emit(raw_line: &[u8], stream: StreamKind, tx: &Sender<OutputLine>) {
    let text = String::from_utf8_lossy(raw_line).trim_end_matches(['\n', '\r']).to_string();
    let _ = tx.send(OutputLine { stream, text });
}

/// A bounded ring buffer of the last N lines, used for `stdout_tail`/
/// `stderr_tail`.
#[derive(Debug, Default, Clone)]
pub struct Tail {
    lines: std::collections::VecDeque<String>,
    cap: usize,
}

impl Tail {
    pub fn new(cap: usize) -> Self {
        Tail { lines: std::collections::VecDeque::with_capacity(cap), cap }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.lines.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_drops_oldest_past_capacity() {
        let mut tail = Tail::new(3);
        for i in 0..5 {
            tail.push(format!("line{i}"));
        }
        assert_eq!(tail.into_vec(), vec!["line2", "line3", "line4"]);
    }

    #[test]
    fn reader_splits_on_newlines() {
        let data = b"first\nsecond\nthird".to_vec();
        let rx = spawn_reader(std::io::Cursor::new(data), StreamKind::Stdout);
        let mut lines = Vec::new();
        while let Ok(line) = rx.recv_timeout(Duration::from_secs(1)) {
            lines.push(line.text);
        }
        assert_eq!(lines, vec!["first", "second", "third"]);
    }
}
