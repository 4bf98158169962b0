//! The lock coordinator: sessions, per-workstation registries, conflict checks and fan-out.
//!
//! Nothing in here touches a socket. Replies and notifications go out through a
//! [`Mailbox`], which the network layer implements over its connection table.

use crate::error::{ProtocolError, RequestError};
use crate::history::HistoryLog;
use crate::network::request::{Opcode, Request};
use crate::network::response::{HostLocks, Notification, Response};
use crate::prelude::*;
use crate::registry::{normalize_name, LockRegistry};
use crate::store::Store;
use std::collections::{BTreeMap, HashMap};

/// Delivers a response to the connection with key `session`.
pub trait Mailbox {
    fn submit(&mut self, session: usize, response: Response);
}
impl Mailbox for Vec<(usize, Response)> {
    fn submit(&mut self, session: usize, response: Response) {
        self.push((session, response));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticated,
    SpaceBound,
}

#[derive(Debug, Clone)]
pub struct Session {
    identity: String,
    user: Option<String>,
    space: Option<String>,
}
impl Session {
    pub fn identity(&self) -> &str {
        &self.identity
    }
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
    pub fn space(&self) -> Option<&str> {
        self.space.as_deref()
    }
    /// A space without a user still counts as `Connected`: lock requests need both.
    pub fn state(&self) -> SessionState {
        match (&self.user, &self.space) {
            (None, _) => SessionState::Connected,
            (Some(_), None) => SessionState::Authenticated,
            (Some(_), Some(_)) => SessionState::SpaceBound,
        }
    }
    fn actor(&self) -> &str {
        self.user.as_deref().filter(|u| !u.is_empty()).unwrap_or("(unknown)")
    }
}

/// A session that passed the lock preconditions.
struct Bound {
    identity: String,
    user: String,
    /// `user`, or a placeholder when it is empty. History needs a non-empty actor.
    actor: String,
    space: String,
}

pub struct LockDaemon {
    registries: BTreeMap<String, LockRegistry>,
    sessions: HashMap<usize, Session>,
    history: HistoryLog,
    store: Box<dyn Store>,
    banner: String,
}
impl LockDaemon {
    /// Loads every stored registry and the history log. Loading does not write registries.
    pub fn open(
        mut store: Box<dyn Store>,
        history_capacity: usize,
        banner: impl Into<String>,
    ) -> Self {
        log::info!("loading history");
        let history = HistoryLog::load(&mut *store, history_capacity);
        log::info!("loading registries");
        let mut registries = BTreeMap::new();
        match store.load_registries() {
            Ok(loaded) => {
                for registry in loaded {
                    match registry {
                        Ok(registry) => {
                            let registry = registry.normalized();
                            log::info!("loaded registry {}", registry.name());
                            registries.insert(registry.name().to_owned(), registry);
                        }
                        Err(e) => log::warn!("skipping registry: {e}"),
                    }
                }
            }
            Err(e) => log::error!("cannot list registries: {e}"),
        }
        Self {
            registries,
            sessions: HashMap::new(),
            history,
            store,
            banner: banner.into(),
        }
    }

    pub fn registry(&self, name: &str) -> Option<&LockRegistry> {
        self.registries.get(&normalize_name(name))
    }
    pub fn registries(&self) -> impl Iterator<Item = &LockRegistry> {
        self.registries.values()
    }
    pub fn session(&self, id: usize) -> Option<&Session> {
        self.sessions.get(&id)
    }
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Admits a new connection unless its workstation is already connected.
    ///
    /// `Ok` holds the greeting; `Err` holds the rejection to send before closing.
    /// A rejected connection is not registered.
    pub fn connect(&mut self, id: usize, identity: &str) -> Result<Response, Response> {
        let identity = normalize_name(identity);
        if self.sessions.values().any(|s| s.identity == identity) {
            log::warn!("{identity} already connected, disconnected");
            return Err(Response::failed(Opcode::Connect, "already connected"));
        }
        self.registries
            .entry(identity.clone())
            .or_insert_with(|| LockRegistry::new(&identity));
        log::info!("{identity} connected as {id}");
        self.sessions.insert(id, Session { identity, user: None, space: None });
        Ok(Response::ok(Opcode::Connect, format!("hello from {}", self.banner)))
    }

    pub fn disconnect(&mut self, id: usize) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        log::info!("{} disconnected", session.identity);
        // registries without locks are rebuilt on the next connect
        if self.registries.get(&session.identity).map_or(false, LockRegistry::is_empty) {
            self.registries.remove(&session.identity);
        }
    }

    pub fn handle(&mut self, id: usize, request: Request, mailbox: &mut impl Mailbox) {
        let opcode = request.opcode();
        let result = match request {
            Request::Authenticate(user) => self.authenticate(id, user),
            Request::SetSpace(space) => self.set_space(id, space),
            Request::Lock { rect, description } => self.lock(id, rect, description, mailbox),
            Request::Unlock { rect, description } => self.unlock(id, rect, description, mailbox),
            Request::GetStatus => self.status(id),
        };
        let response = match result {
            Ok(Some(response)) => response,
            Ok(None) => return,
            Err(e) => Response::failed(opcode, e.to_string()),
        };
        log::debug!("to {id}: {response:?}");
        mailbox.submit(id, response);
    }

    /// Records a frame that could not be decoded. The connection stays open.
    pub fn protocol_error(&mut self, id: usize, error: &ProtocolError, frame: &[u8]) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        log::warn!("got invalid message from {}: {error}", session.identity);
        if let ProtocolError::UnknownOpcode(_) = error {
            return;
        }
        let (actor, origin) = (session.actor().to_owned(), session.identity.clone());
        self.record("invalidmessage", &format!("{frame:?}"), &actor, &origin);
    }

    fn record(&mut self, action: &str, description: &str, actor: &str, origin: &str) {
        let appended =
            self.history.append(&mut *self.store, action, description, actor, origin, None);
        if let Err(e) = appended {
            log::error!("history: {e}");
        }
    }

    fn authenticate(&mut self, id: usize, user: String) -> Result<Option<Response>, RequestError> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(None);
        };
        session.user = Some(user);
        let (actor, origin) = (session.actor().to_owned(), session.identity.clone());
        self.record("login", "login succeeded", &actor, &origin);
        Ok(Some(Response::ok(Opcode::Authenticate, "login succeeded")))
    }

    fn set_space(&mut self, id: usize, space: String) -> Result<Option<Response>, RequestError> {
        let Some(session) = self.sessions.get_mut(&id) else {
            return Ok(None);
        };
        let text = format!("set space to {space}");
        session.space = (!space.is_empty()).then_some(space);
        Ok(Some(Response::ok(Opcode::SetSpace, text)))
    }

    /// Checks preconditions in the order clients expect.
    fn bound(&self, id: usize, rect: Option<(&Rect, &str)>) -> Result<Bound, RequestError> {
        let session = self.sessions.get(&id).ok_or(RequestError::UserNotSet)?;
        let space = session.space.clone().ok_or(RequestError::SpaceNotSet)?;
        if let Some((_, description)) = rect {
            if description.is_empty() {
                return Err(RequestError::MissingDescription);
            }
        }
        let user = session.user.clone().ok_or(RequestError::UserNotSet)?;
        if let Some((rect, _)) = rect {
            if !rect.valid() {
                return Err(RequestError::InvalidRect(*rect));
            }
        }
        Ok(Bound {
            identity: session.identity.clone(),
            actor: session.actor().to_owned(),
            user,
            space,
        })
    }

    fn lock(
        &mut self,
        id: usize,
        rect: Rect,
        description: String,
        mailbox: &mut impl Mailbox,
    ) -> Result<Option<Response>, RequestError> {
        let Bound { identity, user, actor, space } = self.bound(id, Some((&rect, &description)))?;
        if let Some(other) = self
            .registries
            .values()
            .find(|r| r.name() != identity && r.intersects_any(&space, &rect))
        {
            return Err(RequestError::Conflict(other.name().to_owned()));
        }
        let registry = self
            .registries
            .entry(identity.clone())
            .or_insert_with(|| LockRegistry::new(&identity));
        let time = unix_time();
        if !registry.add_lock(&mut *self.store, &space, rect, &user, &description, Some(time))? {
            return Err(RequestError::AlreadyLocked(rect));
        }
        let text = format!("locked rect {rect} for {description}");
        self.record("lock", &text, &actor, &identity);
        self.broadcast(id, &space, mailbox, Response::Locked(Notification {
            rect,
            host: identity,
            owner: user,
            description,
            time,
        }));
        Ok(Some(Response::ok(Opcode::Lock, format!("locked rect {rect}"))))
    }

    fn unlock(
        &mut self,
        id: usize,
        rect: Rect,
        description: String,
        mailbox: &mut impl Mailbox,
    ) -> Result<Option<Response>, RequestError> {
        let Bound { identity, user, actor, space } = self.bound(id, Some((&rect, &description)))?;
        let removed = match self.registries.get_mut(&identity) {
            Some(registry) => registry.remove_lock(&mut *self.store, &space, rect)?,
            None => None,
        };
        if removed.is_none() {
            return Err(RequestError::NotLocked(rect));
        }
        let text = format!("unlocked rect {rect} for {description}");
        self.record("unlock", &text, &actor, &identity);
        self.broadcast(id, &space, mailbox, Response::Unlocked(Notification {
            rect,
            host: identity,
            owner: user,
            description,
            time: unix_time(),
        }));
        Ok(Some(Response::ok(Opcode::Unlock, format!("unlocked rect {rect}"))))
    }

    fn status(&mut self, id: usize) -> Result<Option<Response>, RequestError> {
        let Bound { space, .. } = self.bound(id, None)?;
        let hosts = self
            .registries
            .values()
            .filter(|r| r.lock_count(&space) > 0)
            .map(|r| HostLocks {
                host: r.name().to_owned(),
                locks: r.locks(&space).to_vec(),
            })
            .collect();
        Ok(Some(Response::Status(hosts)))
    }

    /// Sends `response` to every other logged-in session currently in `space`.
    fn broadcast(&self, from: usize, space: &str, mailbox: &mut impl Mailbox, response: Response) {
        let mut targets: Vec<_> = self
            .sessions
            .iter()
            .filter(|(&id, s)| id != from && s.user.is_some() && s.space.as_deref() == Some(space))
            .map(|(&id, _)| id)
            .collect();
        targets.sort_unstable();
        for id in targets {
            log::debug!("to {id}: {response:?}");
            mailbox.submit(id, response.clone());
        }
    }
}
