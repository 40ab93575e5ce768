//! Content-Length framing of DAP messages.

use crate::dap::tracer::FileTracer;
use anyhow::anyhow;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;

/// Largest message body accepted from a client.
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

/// Reading half of a DAP connection.
pub struct DapReader<R> {
    reader: R,
    tracer: Option<FileTracer>,
}

/// Writing half of a DAP connection.
pub struct DapWriter<W> {
    writer: W,
    tracer: Option<FileTracer>,
}

/// Split a client socket into framed halves. The tracer is used only when `trace` is set.
pub fn split(
    stream: TcpStream,
    tracer: Option<FileTracer>,
    trace: bool,
) -> anyhow::Result<(DapReader<BufReader<TcpStream>>, DapWriter<TcpStream>)> {
    stream.set_nodelay(true)?;
    let tracer = tracer.filter(|_| trace);
    let reader = DapReader::new(BufReader::new(stream.try_clone()?), tracer.clone());
    Ok((reader, DapWriter::new(stream, tracer)))
}

impl<R: BufRead> DapReader<R> {
    pub fn new(reader: R, tracer: Option<FileTracer>) -> Self {
        Self { reader, tracer }
    }

    pub fn read_message(&mut self) -> anyhow::Result<Value> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(anyhow!("DAP connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if content_length.is_some() {
                    break;
                }
                continue;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse()?);
            }
        }

        let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
        if len > MAX_CONTENT_LENGTH {
            return Err(anyhow!(
                "Content-Length {len} exceeds the {MAX_CONTENT_LENGTH} bytes limit"
            ));
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        if let Some(tracer) = &self.tracer
            && let Ok(line) = serde_json::to_string(&msg)
        {
            tracer.line(&format!("<- {line}"));
        }
        Ok(msg)
    }
}

impl<W: Write> DapWriter<W> {
    pub fn new(writer: W, tracer: Option<FileTracer>) -> Self {
        Self { writer, tracer }
    }

    pub fn write_message<T: Serialize>(&mut self, v: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(v)?;
        if let Some(tracer) = &self.tracer
            && let Ok(line) = std::str::from_utf8(&payload)
        {
            tracer.line(&format!("-> {line}"));
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
