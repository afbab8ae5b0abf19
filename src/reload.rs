//! Live reload is implemented as a fan-out of a single signal:
//!
//! 1. **Reloader**: a cloneable handle shared by every compiler. Calling
//!    [`Reloader::signal`] delivers one message to each subscriber.
//! 2. **WebSocket server**: a dedicated thread using `tungstenite` keeps
//!    persistent connections with open browser tabs and subscribes to the
//!    reloader.
//! 3. **Client script**: the dev server injects [`client_script`] into served
//!    pages; it connects to the websocket and reloads on `"reload"`.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

/// Maximum number of browser connections kept open.
const MAX_CLIENTS: usize = 10;

#[derive(Clone, Default)]
pub struct Reloader {
    subscribers: Arc<Mutex<Vec<Sender<()>>>>,
    signals: Arc<AtomicUsize>,
}

impl Reloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every connected browser to reload.
    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(()).is_ok());

        tracing::debug!(subscribers = subscribers.len(), "reload signal");
    }

    /// Returns a receiver which gets one message per signal sent from now on.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Total number of signals sent so far.
    pub fn count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    /// Accepts websocket clients on `listener` and forwards every signal to
    /// them as a `"reload"` text message.
    pub(crate) fn serve_websocket(&self, listener: TcpListener) -> (JoinHandle<()>, JoinHandle<()>) {
        let clients = Arc::new(Mutex::new(vec![]));
        let incoming = new_thread_ws_incoming(listener, clients.clone());
        let outgoing = new_thread_ws_reload(self.subscribe(), clients);
        (incoming, outgoing)
    }
}

/// Browser side of the reload protocol.
pub fn client_script(port: u16) -> String {
    format!(
        r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
    )
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else { continue };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap().push(socket),
                Err(e) => tracing::warn!("rejected websocket client: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(
    rx: Receiver<()>,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_signal_reaches_every_subscriber() {
        let reloader = Reloader::new();
        let a = reloader.subscribe();
        let b = reloader.subscribe();

        reloader.signal();

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
        assert!(a.try_recv().is_err());
        assert_eq!(reloader.count(), 1);
    }

    #[test]
    fn test_signal_without_subscribers() {
        let reloader = Reloader::new();
        reloader.signal();
        reloader.signal();
        assert_eq!(reloader.count(), 2);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let reloader = Reloader::new();
        let rx = reloader.subscribe();
        drop(rx);

        reloader.signal();

        assert!(reloader.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_client_script_uses_port() {
        let script = client_script(4242);
        assert!(script.contains("ws://localhost:4242"));
        assert!(script.contains("window.location.reload()"));
    }

    #[test]
    fn test_websocket_receives_reload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let reloader = Reloader::new();
        let _threads = reloader.serve_websocket(listener);

        let (mut socket, _) =
            tungstenite::connect(format!("ws://127.0.0.1:{port}")).expect("handshake");

        // The client is registered by another thread, keep signalling until
        // the message arrives.
        if let tungstenite::stream::MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream
                .set_read_timeout(Some(Duration::from_millis(50)))
                .unwrap();
        }

        let mut received = None;
        for _ in 0..100 {
            reloader.signal();
            match socket.read() {
                Ok(msg) => {
                    received = Some(msg);
                    break;
                }
                Err(_) => continue,
            }
        }

        assert_eq!(received.unwrap().into_text().unwrap().as_str(), "reload");
    }
}
