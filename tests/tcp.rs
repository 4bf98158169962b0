use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chunklockd::config::{Config, IdentityMode};
use chunklockd::network::response::{HostLocks, Notification};
use chunklockd::network::Request;
use chunklockd::store::{JsonStore, Store};
use chunklockd::types::Rect;
use chunklockd::{LockDaemon, Network};
use tempfile::tempdir;

struct Daemon {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}
impl Daemon {
    fn start(dir: &Path, identity: IdentityMode) -> Self {
        Self::start_with(dir, identity, |_| {})
    }
    fn start_with(
        dir: &Path,
        identity: IdentityMode,
        tweak: impl FnOnce(&mut Config) + Send + 'static,
    ) -> Self {
        let dir: PathBuf = dir.to_owned();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut config = Config {
                bind_address: "127.0.0.1".into(),
                port: 0,
                data_dir: dir.clone(),
                identity,
                ..Config::default()
            };
            tweak(&mut config);
            let store = JsonStore::open(&dir).unwrap();
            let mut daemon = LockDaemon::open(Box::new(store), 100, "test");
            let mut network = Network::bind(&config).unwrap();
            tx.send(network.local_addr().unwrap()).unwrap();
            while !flag.load(Ordering::Relaxed) {
                network.poll(Some(Duration::from_millis(20)), &mut daemon).unwrap();
            }
        });
        let addr = rx.recv().unwrap();
        Daemon { addr, stop, thread: Some(thread) }
    }
    fn stop(mut self) {
        self.shutdown();
    }
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}
impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Frame {
    opcode: u8,
    ok: bool,
    payload: Vec<u8>,
}
impl Frame {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct Peer {
    conn: TcpStream,
}
impl Peer {
    fn raw(addr: SocketAddr) -> Self {
        let conn = TcpStream::connect(addr).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Peer { conn }
    }
    fn connect(addr: SocketAddr) -> Self {
        let mut peer = Self::raw(addr);
        let hello = peer.next();
        assert_eq!(hello.opcode, b'C');
        assert!(hello.ok, "{}", hello.text());
        assert!(hello.text().starts_with("hello from"));
        peer
    }
    fn send(&mut self, request: Request) {
        let mut buf = vec![];
        request.encode(&mut buf);
        self.conn.write_all(&buf).unwrap();
    }
    fn next(&mut self) -> Frame {
        let mut len = [0; 4];
        self.conn.read_exact(&mut len).unwrap();
        let mut rest = vec![0; u32::from_le_bytes(len) as usize - 4];
        self.conn.read_exact(&mut rest).unwrap();
        Frame { opcode: rest[0], ok: rest[1] == 0, payload: rest[2..].to_vec() }
    }
    fn call(&mut self, request: Request) -> Frame {
        self.send(request);
        self.next()
    }
    fn login(&mut self, user: &str, space: &str) {
        assert!(self.call(Request::Authenticate(user.into())).ok);
        assert!(self.call(Request::SetSpace(space.into())).ok);
    }
}

const FENCE: Rect = Rect::new(1, 2, 3, 4);

#[test]
fn lock_is_pushed_to_other_editors_and_survives_restart() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::start(dir.path(), IdentityMode::Endpoint);

    let mut bob = Peer::connect(daemon.addr);
    bob.login("bob", "town");
    let mut alice = Peer::connect(daemon.addr);
    alice.login("alice", "town");

    let reply = alice.call(Request::Lock { rect: FENCE, description: "fence".into() });
    assert_eq!(reply.opcode, b'L');
    assert!(reply.ok, "{}", reply.text());
    assert_eq!(reply.text(), "locked rect 1 2 3 4");

    let pushed = bob.next();
    assert_eq!(pushed.opcode, b'l');
    let note = Notification::decode(&pushed.payload).unwrap();
    assert_eq!(note.rect, FENCE);
    assert_eq!(note.owner, "alice");
    assert_eq!(note.description, "fence");
    let alice_host = note.host.clone();

    for peer in [&mut bob, &mut alice] {
        let status = peer.call(Request::GetStatus);
        assert_eq!(status.opcode, b'G');
        assert!(status.ok);
        let hosts = HostLocks::decode_all(&status.payload).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host, alice_host);
        assert_eq!(hosts[0].locks.len(), 1);
        assert_eq!(hosts[0].locks[0].rect, FENCE);
        assert_eq!(hosts[0].locks[0].owner, "alice");
        assert_eq!(hosts[0].locks[0].description, "fence");
    }

    let shed = Request::Lock { rect: Rect::new(3, 4, 9, 9), description: "shed".into() };
    let conflict = bob.call(shed);
    assert!(!conflict.ok);
    assert_eq!(conflict.text(), format!("conflict with host {alice_host}"));

    drop(alice);
    drop(bob);
    daemon.stop();

    let daemon = Daemon::start(dir.path(), IdentityMode::Endpoint);
    let mut carol = Peer::connect(daemon.addr);
    carol.login("carol", "town");
    let hosts = HostLocks::decode_all(&carol.call(Request::GetStatus).payload).unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].locks[0].rect, FENCE);
}

#[test]
fn bad_requests_leave_the_connection_usable() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::start(dir.path(), IdentityMode::Endpoint);
    let mut peer = Peer::connect(daemon.addr);

    let early = peer.call(Request::Lock { rect: FENCE, description: "fence".into() });
    assert_eq!(early.opcode, b'L');
    assert!(!early.ok);
    assert_eq!(early.text(), "space not set");

    // header claims 5 bytes, less than a frame header
    peer.conn.write_all(&[5, 0, 0, 0, b'G']).unwrap();
    // rect payload cut short
    peer.conn.write_all(&[9, 0, 0, 0, b'L', 0, 1, 0, 2]).unwrap();

    peer.login("alice", "town");
    let reply = peer.call(Request::Lock { rect: FENCE, description: "fence".into() });
    assert!(reply.ok, "{}", reply.text());

    drop(peer);
    daemon.stop();

    let history = JsonStore::open(dir.path()).unwrap().load_history().unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["invalidmessage", "invalidmessage", "login", "lock"]);
}

#[test]
fn second_connection_from_a_workstation_is_refused() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::start(dir.path(), IdentityMode::Address);
    let mut first = Peer::connect(daemon.addr);

    let mut second = Peer::raw(daemon.addr);
    let refused = second.next();
    assert_eq!(refused.opcode, b'C');
    assert!(!refused.ok);
    assert_eq!(refused.text(), "already connected");
    let mut rest = vec![];
    assert_eq!(second.conn.read_to_end(&mut rest).unwrap(), 0);

    // the refused socket never displaced the live session
    first.login("alice", "town");
    assert!(first.call(Request::GetStatus).ok);
}

fn history_of(dir: &Path) -> Vec<(String, String)> {
    let history = JsonStore::open(dir).unwrap().load_history().unwrap();
    history.into_iter().map(|e| (e.action, e.actor)).collect()
}

#[test]
fn oversized_frame_closes_only_that_connection() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::start(dir.path(), IdentityMode::Endpoint);
    let mut alice = Peer::connect(daemon.addr);
    alice.login("alice", "town");
    let mut bob = Peer::connect(daemon.addr);
    bob.login("bob", "town");

    bob.conn.write_all(&u32::MAX.to_le_bytes()).unwrap();
    let mut rest = vec![];
    assert_eq!(bob.conn.read_to_end(&mut rest).unwrap(), 0);

    let reply = alice.call(Request::Lock { rect: FENCE, description: "fence".into() });
    assert!(reply.ok, "{}", reply.text());

    drop(alice);
    daemon.stop();
    let history = history_of(dir.path());
    let history: Vec<_> = history.iter().map(|(a, u)| (a.as_str(), u.as_str())).collect();
    assert_eq!(
        history,
        vec![("login", "alice"), ("login", "bob"), ("invalidmessage", "bob"), ("lock", "alice")]
    );
}

#[test]
fn connection_over_its_outbound_limit_is_dropped() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::start_with(dir.path(), IdentityMode::Endpoint, |config| {
        config.max_pending = 1024;
    });
    let mut bob = Peer::connect(daemon.addr);
    bob.login("bob", "castle");
    let mut alice = Peer::connect(daemon.addr);
    alice.login("alice", "town");

    let long = "x".repeat(2000);
    let reply = alice.call(Request::Lock { rect: FENCE, description: long });
    assert!(reply.ok, "{}", reply.text());

    // the status reply alone is larger than the limit
    alice.send(Request::GetStatus);
    let mut rest = vec![];
    assert_eq!(alice.conn.read_to_end(&mut rest).unwrap(), 0);

    let status = bob.call(Request::GetStatus);
    assert!(status.ok);
    assert!(HostLocks::decode_all(&status.payload).unwrap().is_empty());
}
