// Sync controller: the state machine tying credentials, the directory, and
// the live channel together. All state here is owned by one driver task and
// mutated only through &mut self; channel events arrive over an mpsc queue
// the driver drains between commands.

use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::channel::{ChannelEvent, ChannelScope, LiveChannel};
use crate::config::{ClientConfig, SyncMode};
use crate::credentials::{CredentialStore, StoredSession};
use crate::directory::DirectoryApi;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{FriendEdge, FriendRequest, Message, RoomInvite, RoomSummary};

pub mod room;
pub mod roster;
pub mod typing;

use room::{ActiveRoom, LiveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Lobby,
    RoomActive,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub token: String,
}

/// What a channel event did to controller state, for the driver to render.
#[derive(Debug, Clone)]
pub enum SyncUpdate {
    MessageAppended(Message),
    /// Cross-room message seen by the background channel.
    Notification(Message),
    PresenceChanged,
    TypingChanged,
    ChannelClosed { reason: String },
}

pub struct SyncController<D> {
    config: ClientConfig,
    store: CredentialStore,
    directory: D,
    state: SessionState,
    session: Option<Session>,
    rooms: Vec<RoomSummary>,
    friends: Vec<FriendEdge>,
    friend_requests: Vec<FriendRequest>,
    room_invites: Vec<RoomInvite>,
    active: Option<ActiveRoom>,
    background: Option<LiveChannel>,
    /// Bumped on every room entry; stale completions are discarded on
    /// mismatch rather than cancelled in flight.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(ChannelScope, ChannelEvent)>,
}

impl<D: DirectoryApi> SyncController<D> {
    /// Returns the controller and the queue its live channels feed. The
    /// driver drains the queue and hands each event back through
    /// [`SyncController::apply_channel_event`].
    pub fn new(
        config: ClientConfig,
        store: CredentialStore,
        directory: D,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<(ChannelScope, ChannelEvent)>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            SyncController {
                config,
                store,
                directory,
                state: SessionState::LoggedOut,
                session: None,
                rooms: Vec::new(),
                friends: Vec::new(),
                friend_requests: Vec::new(),
                room_invites: Vec::new(),
                active: None,
                background: None,
                generation: 0,
                events_tx,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn rooms(&self) -> &[RoomSummary] {
        &self.rooms
    }

    pub fn friends(&self) -> &[FriendEdge] {
        &self.friends
    }

    pub fn friend_requests(&self) -> &[FriendRequest] {
        &self.friend_requests
    }

    pub fn room_invites(&self) -> &[RoomInvite] {
        &self.room_invites
    }

    pub fn active_room(&self) -> Option<&ActiveRoom> {
        self.active.as_ref()
    }

    pub fn has_background_channel(&self) -> bool {
        self.background.is_some()
    }

    // ---- Session lifecycle -------------------------------------------

    /// Revalidate a persisted credential on startup. Returns false when
    /// nothing is stored or the directory rejects the token; the rejected
    /// token is cleared either way.
    pub async fn restore(&mut self) -> DirectoryResult<bool> {
        let stored = match self.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!("could not read stored session: {}", e);
                return Ok(false);
            }
        };

        // The probe is the only expiry detection there is: a 401 on any
        // authenticated call downgrades to logged-out.
        let probe = self.directory.fetch_history(&stored.token, None, 0, 1).await;
        match self.absorb(probe) {
            Ok(_) => {}
            Err(DirectoryError::SessionExpired) => return Ok(false),
            Err(e) => return Err(e),
        }

        info!("restored session for {}", stored.username);
        self.session = Some(Session {
            username: stored.username.clone(),
            token: stored.token.clone(),
        });
        self.enter_lobby().await;
        if self.state == SessionState::LoggedOut {
            return Ok(false);
        }

        if stored.joined {
            if let Some(last_room) = stored.last_room {
                self.enter_room(&last_room).await?;
            }
        }
        Ok(true)
    }

    pub async fn login(&mut self, username: &str, password: &str) -> DirectoryResult<()> {
        self.state = SessionState::Authenticating;
        let token = match self.directory.issue_token(username, password).await {
            Ok(token) => token,
            Err(e) => {
                // No retry scheduling; the user resubmits.
                self.state = SessionState::LoggedOut;
                return Err(e);
            }
        };

        info!("authenticated as {}", username);
        if let Err(e) = self.store.save(&StoredSession::new(username, &token)) {
            warn!("could not persist session: {}", e);
        }
        self.session = Some(Session {
            username: username.to_string(),
            token,
        });
        self.enter_lobby().await;
        Ok(())
    }

    /// Create the identity, then run the normal login exchange.
    pub async fn sign_up(&mut self, username: &str, password: &str) -> DirectoryResult<()> {
        self.directory.create_identity(username, password).await?;
        self.login(username, password).await
    }

    pub fn logout(&mut self) {
        info!("logging out");
        self.drop_session();
    }

    async fn enter_lobby(&mut self) {
        self.state = SessionState::Lobby;
        if let Err(e) = self.refresh_directory().await {
            // Only expiry escapes refresh_directory, and expiry has
            // already reset the controller.
            debug!("lobby entry aborted: {}", e);
            return;
        }
        if self.config.mode == SyncMode::Full {
            self.open_background_channel().await;
        }
    }

    async fn open_background_channel(&mut self) {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => return,
        };
        if self.background.is_some() {
            return;
        }
        match LiveChannel::open(
            &self.config.ws_url,
            &session.token,
            &session.username,
            None,
            ChannelScope::Session,
            self.events_tx.clone(),
        )
        .await
        {
            Ok(channel) => self.background = Some(channel),
            Err(e) => warn!("background notification channel unavailable: {}", e),
        }
    }

    // ---- Room lifecycle ----------------------------------------------

    /// Make `name` the active room: tear down the previous room's channel,
    /// open a fresh one, and replay one page of history. Live events that
    /// arrive before the history page resolves are buffered and spliced.
    pub async fn enter_room(&mut self, name: &str) -> DirectoryResult<()> {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => {
                warn!("enter_room with no session");
                return Ok(());
            }
        };

        // At most one active-room channel: close the prior handle before
        // opening the next.
        if let Some(mut previous) = self.active.take() {
            if let Some(channel) = previous.channel.take() {
                channel.close();
            }
        }

        self.generation += 1;
        let generation = self.generation;
        let mut room = ActiveRoom::new(name, generation);
        info!("entering room {}", name);

        match LiveChannel::open(
            &self.config.ws_url,
            &session.token,
            &session.username,
            Some(name),
            ChannelScope::Room(generation),
            self.events_tx.clone(),
        )
        .await
        {
            Ok(channel) => room.channel = Some(channel),
            // No reconnect logic; re-entering the room restores the feed.
            Err(e) => warn!("live channel unavailable for {}: {}", name, e),
        }
        self.active = Some(room);
        self.state = SessionState::RoomActive;

        let mut stored = StoredSession::new(&session.username, &session.token);
        stored.last_room = Some(name.to_string());
        stored.joined = true;
        if let Err(e) = self.store.save(&stored) {
            warn!("could not persist active room: {}", e);
        }

        let page = self.config.history_page_size;
        let history = self
            .directory
            .fetch_history(&session.token, Some(name), 0, page)
            .await;
        match self.absorb(history) {
            Ok(messages) => self.apply_history(generation, messages),
            Err(DirectoryError::SessionExpired) => return Err(DirectoryError::SessionExpired),
            Err(e) => {
                warn!("history fetch failed for {}: {}", name, e);
                // Degraded entry: whatever was buffered becomes the list.
                self.apply_history(generation, Vec::new());
            }
        }
        Ok(())
    }

    /// Leave the active room and return to the lobby. Local state is
    /// cleared first; the departure notification to the directory is
    /// best-effort.
    pub async fn leave_room(&mut self) -> DirectoryResult<()> {
        let mut room = match self.active.take() {
            Some(room) => room,
            None => return Ok(()),
        };
        if let Some(channel) = room.channel.take() {
            channel.close();
        }
        info!("left room {}", room.name);
        self.state = SessionState::Lobby;

        let session = match &self.session {
            Some(session) => session.clone(),
            None => return Ok(()),
        };
        let mut stored = StoredSession::new(&session.username, &session.token);
        stored.joined = false;
        if let Err(e) = self.store.save(&stored) {
            warn!("could not persist room departure: {}", e);
        }

        let departed = self.directory.leave_room(&session.token, &room.name).await;
        match self.absorb(departed) {
            Ok(()) => Ok(()),
            Err(DirectoryError::SessionExpired) => Err(DirectoryError::SessionExpired),
            Err(e) => {
                warn!("leave notification failed for {}: {}", room.name, e);
                Ok(())
            }
        }
    }

    /// Create a room and enter it. A later failure (say, an invite that
    /// bounces) never rolls the creation back.
    pub async fn create_room(&mut self, name: &str) -> DirectoryResult<RoomSummary> {
        let token = self.token()?;
        let created = self.directory.create_room(&token, name).await;
        let summary = self.absorb(created)?;
        self.rooms.push(summary.clone());
        self.enter_room(name).await?;
        Ok(summary)
    }

    pub async fn search(&mut self, query: &str) -> DirectoryResult<Vec<Message>> {
        let token = self.token()?;
        let found = self.directory.search(&token, query).await;
        self.absorb(found)
    }

    // ---- Outbound live-channel operations (fire-and-forget) ----------

    pub fn send_message(&self, content: &str) {
        match self.active.as_ref().and_then(|room| room.channel.as_ref()) {
            Some(channel) => channel.send(content),
            None => warn!("no live channel; message dropped"),
        }
    }

    pub fn notify_typing(&self) {
        if let Some(channel) = self.active.as_ref().and_then(|room| room.channel.as_ref()) {
            channel.notify_typing();
        }
    }

    pub fn notify_stopped_typing(&self) {
        if let Some(channel) = self.active.as_ref().and_then(|room| room.channel.as_ref()) {
            channel.notify_stopped_typing();
        }
    }

    // ---- Inbound events ----------------------------------------------

    /// Merge one live-channel event into controller state. Events from a
    /// superseded room channel are discarded by generation.
    pub fn apply_channel_event(
        &mut self,
        scope: ChannelScope,
        event: ChannelEvent,
    ) -> Option<SyncUpdate> {
        match scope {
            ChannelScope::Session => self.apply_background_event(event),
            ChannelScope::Room(generation) => self.apply_room_event(generation, event),
        }
    }

    fn apply_background_event(&mut self, event: ChannelEvent) -> Option<SyncUpdate> {
        match event {
            ChannelEvent::Message(message) => {
                // The active room's own channel already delivers these.
                let active = self.active.as_ref().map(|room| room.name.as_str());
                if active == Some(message.room.as_str()) {
                    return None;
                }
                Some(SyncUpdate::Notification(message))
            }
            ChannelEvent::Disconnected { reason } => {
                debug!("background channel closed: {}", reason);
                self.background = None;
                None
            }
            _ => None,
        }
    }

    fn apply_room_event(&mut self, generation: u64, event: ChannelEvent) -> Option<SyncUpdate> {
        let own_username = self.session.as_ref().map(|s| s.username.clone());
        let room = match self.active.as_mut() {
            Some(room) if room.generation() == generation => room,
            _ => {
                debug!("discarding event from superseded channel");
                return None;
            }
        };

        match event {
            ChannelEvent::Connected => None,
            ChannelEvent::Disconnected { reason } => {
                // No automatic reconnect; re-entering the room restores it.
                warn!("live channel lost for {}: {}", room.name, reason);
                room.channel = None;
                Some(SyncUpdate::ChannelClosed { reason })
            }
            ChannelEvent::Message(message) => {
                // A message from an identity also clears its typing state.
                room.typing.remove(&message.username);
                match room.ingest_live(message.clone()) {
                    LiveOutcome::Appended => Some(SyncUpdate::MessageAppended(message)),
                    LiveOutcome::Buffered => {
                        debug!("buffered live message {} ahead of history", message.id);
                        None
                    }
                    LiveOutcome::Duplicate => {
                        debug!("dropped redelivered message {}", message.id);
                        None
                    }
                }
            }
            ChannelEvent::Presence(users) => {
                room.presence = users.into_iter().collect();
                Some(SyncUpdate::PresenceChanged)
            }
            ChannelEvent::TypingStarted(username) => {
                if Some(&username) == own_username.as_ref() {
                    return None;
                }
                room.typing.insert(&username, Instant::now());
                Some(SyncUpdate::TypingChanged)
            }
            ChannelEvent::TypingStopped(username) => {
                if room.typing.remove(&username) {
                    Some(SyncUpdate::TypingChanged)
                } else {
                    None
                }
            }
        }
    }

    /// Expire stale typing indicators; the driver ticks this.
    pub fn prune_typing(&mut self) -> bool {
        let ttl = self.config.typing_ttl;
        match self.active.as_mut() {
            Some(room) => room.typing.prune(ttl, Instant::now()),
            None => false,
        }
    }

    // ---- Internals ---------------------------------------------------

    fn apply_history(&mut self, generation: u64, messages: Vec<Message>) {
        match self.active.as_mut() {
            Some(room) if room.generation() == generation => room.apply_history(messages),
            _ => debug!("discarding stale history page (generation {})", generation),
        }
    }

    /// A 401 on any authenticated call lands here: everything comes down.
    pub(super) fn absorb<T>(&mut self, result: DirectoryResult<T>) -> DirectoryResult<T> {
        if matches!(result, Err(DirectoryError::SessionExpired)) {
            warn!("credential rejected by the directory; dropping session");
            self.drop_session();
        }
        result
    }

    pub(super) fn token(&self) -> DirectoryResult<String> {
        self.session
            .as_ref()
            .map(|session| session.token.clone())
            .ok_or(DirectoryError::SessionExpired)
    }

    fn drop_session(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if let Some(channel) = active.channel.take() {
                channel.close();
            }
        }
        if let Some(background) = self.background.take() {
            background.close();
        }
        if let Err(e) = self.store.clear() {
            warn!("failed to clear stored session: {}", e);
        }
        self.session = None;
        self.active = None;
        self.rooms.clear();
        self.friends.clear();
        self.friend_requests.clear();
        self.room_invites.clear();
        self.state = SessionState::LoggedOut;
    }
}
