//! TCP fan-out of encoded delta frames.
//!
//! Each frame is a little-endian length prefix followed by the bincode
//! payload. A freshly connected client is primed with the most recent
//! frame so it has an anchor for interpolation; clients that stop reading
//! are dropped on the next write, never waited on.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use sim_proto::{encode_delta, TickDelta};

/// The set of connected delta subscribers plus the catch-up frame.
#[derive(Default)]
struct ClientPool {
    streams: Vec<TcpStream>,
    latest_frame: Option<Vec<u8>>,
}

impl ClientPool {
    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for {}: {}", addr, err);
        }
        if let Some(frame) = &self.latest_frame {
            if let Err(err) = write_frame(&mut stream, frame) {
                log::warn!("Catch-up frame to {} failed: {}", addr, err);
                return;
            }
        }
        log::info!("Delta client connected: {}", addr);
        self.streams.push(stream);
    }

    fn fan_out(&mut self, frame: &[u8]) {
        self.latest_frame = Some(frame.to_vec());
        self.streams.retain_mut(|stream| match write_frame(stream, frame) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Dropping delta client: {}", err);
                false
            }
        });
    }
}

fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&(frame.len() as u32).to_le_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)
}

/// Serve encoded deltas from `receiver` to every TCP subscriber on
/// `bind_addr`. Spawns the accept/fan-out thread and returns immediately;
/// `None` when the port cannot be bound (broadcasting is then disabled,
/// the simulation keeps running).
pub fn serve_deltas(bind_addr: SocketAddr, receiver: Receiver<TickDelta>) -> Option<()> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            log::warn!(
                "Delta server bind failed at {}: {}. Broadcasting disabled.",
                bind_addr,
                err
            );
            return None;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        log::warn!("set_nonblocking failed for delta listener: {}", err);
        return None;
    }

    let pool = Arc::new(Mutex::new(ClientPool::default()));
    let accept_pool = Arc::clone(&pool);
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                accept_pool
                    .lock()
                    .expect("delta client pool mutex poisoned")
                    .admit(stream, addr);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("Error accepting delta client: {}", err);
                thread::sleep(Duration::from_millis(200));
            }
        }
    });

    thread::spawn(move || {
        while let Ok(delta) = receiver.recv() {
            match encode_delta(&delta) {
                Ok(frame) => pool
                    .lock()
                    .expect("delta client pool mutex poisoned")
                    .fan_out(&frame),
                Err(err) => log::error!("Delta encode failed: {}", err),
            }
        }
    });

    Some(())
}
