use serde::Serialize;
use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

/// Line-oriented output shared by the command loop and job workers.
///
/// Each message is rendered up front and written as one line under the lock,
/// so lines from different threads never interleave.
#[derive(Clone)]
pub struct LineSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LineSink {
    pub fn new(w: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(w))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn emit<T: Serialize>(&self, msg: &T) -> io::Result<()> {
        let line = serde_json::to_string(msg)?;
        self.emit_line(&line)
    }

    pub fn emit_line(&self, line: &str) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()
    }
}

/// In-memory writer whose contents stay readable after being handed to a
/// [`LineSink`].
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Every line parsed as JSON; lines that are not JSON are skipped.
    pub fn json_lines(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_emits_produce_whole_lines() {
        let buf = CaptureBuffer::new();
        let sink = LineSink::new(buf.clone());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        sink.emit(&serde_json::json!({ "thread": t, "i": i })).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let lines = buf.json_lines();
        assert_eq!(lines.len(), 400);
        assert_eq!(buf.lines().len(), 400);
    }
}
