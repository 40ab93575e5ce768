//! Runtime transport: CDP JSON text frames over a WebSocket.

use crate::error::Error;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// Interval the connection thread waits for an incoming frame before flushing outgoing ones.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Trait for runtime message transport.
pub trait RuntimeTransport: Send {
    /// Write a single text message.
    fn send_text(&mut self, text: &str) -> Result<(), Error>;

    /// Wait up to one poll interval for a text message, `Ok(None)` if nothing arrived.
    fn poll_text(&mut self) -> Result<Option<String>, Error>;

    fn close(&mut self);
}

/// WebSocket client transport.
pub struct WebSocketTransport {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    pub fn connect(address: &str) -> Result<Self, Error> {
        let (mut socket, _response) = tungstenite::connect(address)?;
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(POLL_INTERVAL))?;
        }
        Ok(Self { socket })
    }
}

impl RuntimeTransport for WebSocketTransport {
    fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.socket.send(Message::Text(text.to_string()))?;
        Ok(())
    }

    fn poll_text(&mut self) -> Result<Option<String>, Error> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Binary(data)) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            Ok(Message::Close(_)) => Err(Error::RuntimeClosed),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(Error::RuntimeClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

/// What the connection thread reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeSignal {
    Message(String),
    Closed,
}

enum Outbound {
    Text(String),
    Close,
}

/// Owner side of a running connection thread.
pub struct RuntimeConnection {
    outbound: Sender<Outbound>,
    thread: Option<JoinHandle<()>>,
}

impl RuntimeConnection {
    /// Move `transport` onto its own thread. Incoming messages and the final close are
    /// delivered through `signal`, in arrival order.
    pub fn spawn<T, F>(mut transport: T, mut signal: F) -> Self
    where
        T: RuntimeTransport + 'static,
        F: FnMut(RuntimeSignal) + Send + 'static,
    {
        let (outbound, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            if pump(&mut transport, &rx, &mut signal) {
                signal(RuntimeSignal::Closed);
            }
        });
        Self {
            outbound,
            thread: Some(thread),
        }
    }

    pub fn send(&self, text: String) -> Result<(), Error> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::RuntimeClosed)
    }

    /// Close the socket and wait for the connection thread.
    pub fn close(mut self) {
        let _ = self.outbound.send(Outbound::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Returns true when the socket went away on its own, false on a requested close.
fn pump<T: RuntimeTransport>(
    transport: &mut T,
    outbound: &Receiver<Outbound>,
    signal: &mut impl FnMut(RuntimeSignal),
) -> bool {
    loop {
        loop {
            match outbound.try_recv() {
                Ok(Outbound::Text(text)) => {
                    if let Err(e) = transport.send_text(&text) {
                        log::warn!(target: "cdp", "runtime write failed: {e:#}");
                        return true;
                    }
                }
                Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                    transport.close();
                    return false;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match transport.poll_text() {
            Ok(Some(text)) => signal(RuntimeSignal::Message(text)),
            Ok(None) => {}
            Err(e) => {
                log::debug!(target: "cdp", "runtime connection ended: {e:#}");
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedTransport {
        incoming: VecDeque<String>,
        written: Arc<Mutex<Vec<String>>>,
    }

    impl RuntimeTransport for ScriptedTransport {
        fn send_text(&mut self, text: &str) -> Result<(), Error> {
            self.written.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn poll_text(&mut self) -> Result<Option<String>, Error> {
            match self.incoming.pop_front() {
                Some(text) => Ok(Some(text)),
                None if self.written.lock().unwrap().is_empty() => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(None)
                }
                None => Err(Error::RuntimeClosed),
            }
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_messages_then_close_are_signalled() {
        let written = Arc::new(Mutex::new(vec![]));
        let transport = ScriptedTransport {
            incoming: VecDeque::from(["a".to_string(), "b".to_string()]),
            written: written.clone(),
        };
        let (tx, rx) = mpsc::channel();
        let connection = RuntimeConnection::spawn(transport, move |s| {
            let _ = tx.send(s);
        });
        connection.send("hello".to_string()).unwrap();

        let signals: Vec<_> = rx.iter().take(3).collect();
        assert_eq!(
            signals,
            vec![
                RuntimeSignal::Message("a".to_string()),
                RuntimeSignal::Message("b".to_string()),
                RuntimeSignal::Closed,
            ]
        );
        assert_eq!(written.lock().unwrap().as_slice(), &["hello".to_string()]);
        connection.close();
    }
}
