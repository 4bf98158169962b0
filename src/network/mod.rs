use crate::config::{Config, IdentityMode};
use crate::daemon::LockDaemon;
use crate::error::ProtocolError;
use crate::prelude::*;
use polling::Event;
use std::io::Write;
use std::net::{SocketAddr, TcpListener};

mod inboxes;
pub mod client;
pub mod request;
pub mod response;
pub mod wire;

pub use inboxes::Inboxes;
pub use request::{Opcode, Request};
pub use response::Response;

/// Why a connection was torn down.
#[derive(Debug)]
pub enum Disconnection {
    Closed,
    Transport(io::Error),
    Protocol(ProtocolError),
}

/// Single-threaded reactor: one listener and every client socket on one poller.
#[derive(Debug)]
pub struct Network {
    listener: TcpListener,
    scratch_buffer: Vec<u8>,

    poller: polling::Poller,
    events: Vec<Event>,

    clients: SlotMap<client::Client>,
    identity: IdentityMode,
    max_frame_len: u32,
    max_pending: usize,
}

const LISTENER: usize = usize::MAX - 1;
impl Network {
    pub fn bind(config: &Config) -> io::Result<Self> {
        let poller = polling::Poller::new()?;

        let listener = TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;
        poller.add(&listener, Event::readable(LISTENER))?;
        log::info!("listening at {}", listener.local_addr()?);
        Ok(Self {
            listener,
            scratch_buffer: vec![0; 16 * 1024],

            poller,
            events: vec![],

            clients: SlotMap::new(),
            identity: config.identity,
            max_frame_len: config.max_frame_len,
            max_pending: config.max_pending,
        })
    }
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
    pub fn connections(&self) -> usize {
        self.clients.len()
    }

    pub fn run(&mut self, daemon: &mut LockDaemon) -> io::Result<()> {
        loop {
            self.poll(None, daemon)?;
        }
    }

    /// Waits once, then services every ready socket before returning.
    pub fn poll(
        &mut self,
        timeout: Option<time::Duration>,
        daemon: &mut LockDaemon,
    ) -> io::Result<usize> {
        self.events.clear();
        match self.poller.wait(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }
        let events = core::mem::take(&mut self.events);
        for event in &events {
            if event.key == LISTENER {
                self.poller.modify(&self.listener, Event::readable(LISTENER))?;
                self.accept_clients(daemon);
                continue;
            }
            if let Some(client) = self.clients.get(event.key) {
                client.armed = false;
            }
            if event.readable {
                self.receive(event.key, daemon);
            }
        }
        let ready = events.len();
        self.events = events;
        self.flush_clients(daemon);
        Ok(ready)
    }

    fn accept_clients(&mut self, daemon: &mut LockDaemon) {
        loop {
            match self.listener.accept() {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    break;
                }
                Ok((conn, peer)) => self.admit(conn, peer, daemon),
            }
        }
    }

    fn admit(&mut self, conn: TcpStream, peer: SocketAddr, daemon: &mut LockDaemon) {
        let identity = self.identity.identity(&peer);
        let key = self.clients.next_idx();
        let greeting = match daemon.connect(key, &identity) {
            Ok(greeting) => greeting,
            Err(rejection) => {
                let mut frame = vec![];
                rejection.write(&mut frame);
                let sent = conn
                    .set_write_timeout(Some(time::Duration::from_secs(1)))
                    .and_then(|()| (&conn).write_all(&frame));
                if let Err(e) = sent {
                    log::debug!("could not tell {peer} it was rejected: {e}");
                }
                return;
            }
        };
        let mut client = match client::Client::accept(conn, identity, self.max_pending) {
            Ok(client) => client,
            Err(e) => {
                log::warn!("dropping connection from {peer}: {e}");
                daemon.disconnect(key);
                return;
            }
        };
        if let Err(e) = self.poller.add(client.conn(), Event::readable(key)) {
            log::error!("cannot watch connection from {peer}: {e}");
            daemon.disconnect(key);
            return;
        }
        client.submit(&greeting);
        let idx = self.clients.insert(client);
        debug_assert_eq!(idx, key);
        log::debug!("new client connected as {idx} from {peer}, {} live", self.connections());
    }

    fn receive(&mut self, key: usize, daemon: &mut LockDaemon) {
        let Some(client) = self.clients.get(key) else {
            return;
        };
        let received = client.read(&mut self.scratch_buffer, self.max_frame_len);
        for incoming in received.incoming {
            match incoming {
                client::Incoming::Request(request) => {
                    log::debug!("from {key}: {request:?}");
                    daemon.handle(key, request, &mut Inboxes(&mut self.clients));
                }
                client::Incoming::Malformed { error, frame } => {
                    daemon.protocol_error(key, &error, &frame)
                }
            }
        }
        if let Some(reason) = received.hangup {
            if let Disconnection::Protocol(ref error) = reason {
                daemon.protocol_error(key, error, &[]);
            }
            self.drop_client(key, daemon, reason);
        }
    }

    /// Pushes queued frames out and re-arms interest for every connection that needs it.
    fn flush_clients(&mut self, daemon: &mut LockDaemon) {
        let mut dead = vec![];
        for (key, client) in self.clients.iter_mut() {
            if client.armed && !client.waiting_for_write {
                continue;
            }
            if let Err(reason) = client.flush() {
                dead.push((key, reason));
                continue;
            }
            let interest = Event {
                key,
                readable: true,
                writable: client.waiting_for_write,
            };
            if let Err(e) = self.poller.modify(client.conn(), interest) {
                dead.push((key, Disconnection::Transport(e)));
                continue;
            }
            client.armed = true;
        }
        for (key, reason) in dead {
            self.drop_client(key, daemon, reason);
        }
    }

    fn drop_client(&mut self, key: usize, daemon: &mut LockDaemon, reason: Disconnection) {
        let Some(client) = self.clients.release(key) else {
            return;
        };
        match reason {
            Disconnection::Closed => log::debug!("client {key} ({}) hung up", client.identity()),
            reason => log::warn!("dropping client {key} ({}): {reason:?}", client.identity()),
        }
        if let Err(e) = self.poller.delete(client.conn()) {
            log::debug!("poller did not know client {key}: {e}");
        }
        daemon.disconnect(key);
        log::debug!("{} live connections", self.connections());
    }
}
