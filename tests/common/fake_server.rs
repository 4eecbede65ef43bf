//! Threaded fake cache server
//!
//! Accepts connections on 127.0.0.1 and answers line-based requests according
//! to a [`Behavior`]. Everything it receives is recorded so tests can check
//! exactly which bytes went over the wire.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer `version` with `VERSION <text>`
    Version(String),
    /// Send every request line straight back
    Echo,
    /// Read whatever arrives first, then close the connection
    CloseAfterRequest,
    /// Record requests and never answer
    Silent,
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    received: Mutex<Vec<u8>>,
    live: Mutex<Vec<TcpStream>>,
}

pub struct FakeServer {
    address: SocketAddr,
    state: Arc<ServerState>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start(behavior: Behavior) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), behavior)
    }

    /// Listen on a specific address, e.g. to come back after [`stop`](Self::stop).
    pub fn start_on(address: SocketAddr, behavior: Behavior) -> Self {
        let listener = TcpListener::bind(address).expect("Failed to bind fake server");
        listener
            .set_nonblocking(true)
            .expect("Failed to make listener non-blocking");
        let address = listener.local_addr().unwrap();

        let state = Arc::new(ServerState::default());
        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || accept_loop(listener, behavior, state, stop))
        };

        Self {
            address,
            state,
            stop,
            acceptor: Some(acceptor),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Every byte received, across all connections, in arrival order.
    pub fn received(&self) -> Vec<u8> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn received_text(&self) -> String {
        String::from_utf8_lossy(&self.received()).into_owned()
    }

    /// Wait until at least `count` connections have been accepted.
    pub fn wait_for_connections(&self, count: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.connection_count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Close every client connection but keep listening.
    pub fn drop_connections(&self) {
        for stream in self.state.live.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Stop listening and close every connection; returns the freed address.
    pub fn stop(mut self) -> SocketAddr {
        self.shutdown();
        self.address
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        self.drop_connections();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    behavior: Behavior,
    state: Arc<ServerState>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nonblocking(false);
                state.connections.fetch_add(1, Ordering::SeqCst);
                if let Ok(clone) = stream.try_clone() {
                    state.live.lock().unwrap().push(clone);
                }
                let behavior = behavior.clone();
                let state = Arc::clone(&state);
                thread::spawn(move || serve(stream, behavior, state));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(2));
            }
            Err(_) => return,
        }
    }
}

fn serve(stream: TcpStream, behavior: Behavior, state: Arc<ServerState>) {
    let record = |bytes: &[u8]| state.received.lock().unwrap().extend_from_slice(bytes);

    match behavior {
        Behavior::Silent => {
            let mut stream = stream;
            let mut buf = [0u8; 1024];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                record(&buf[..n]);
            }
        }
        Behavior::CloseAfterRequest => {
            let mut stream = stream;
            let mut buf = [0u8; 1024];
            if let Ok(n) = stream.read(&mut buf) {
                record(&buf[..n]);
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
        Behavior::Version(_) | Behavior::Echo => {
            let Ok(mut writer) = stream.try_clone() else {
                return;
            };
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                record(line.as_bytes());
                let request = line.trim_end_matches(['\r', '\n']);
                let reply = match &behavior {
                    Behavior::Version(text) if request == "version" => {
                        format!("VERSION {}\r\n", text)
                    }
                    Behavior::Version(_) => "ERROR\r\n".to_string(),
                    _ => format!("{}\r\n", request),
                };
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
        }
    }
}
