// Shared test fixtures: an in-memory directory the controller can be driven
// against, plus a builder wiring it to a temp-file credential store. The
// fake mirrors the real service's behavior closely enough for the state
// machine to be exercised without a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use parley::channel::{ChannelEvent, ChannelScope};
use parley::credentials::CredentialStore;
use parley::directory::DirectoryApi;
use parley::error::{DirectoryError, DirectoryResult};
use parley::models::{FriendEdge, FriendRequest, Message, RoomInvite, RoomSummary};
use parley::{ClientConfig, SyncController, SyncMode};

pub fn setup_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn message(id: i64, room: &str, username: &str, content: &str) -> Message {
    Message {
        id,
        room: room.to_string(),
        username: username.to_string(),
        content: content.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    }
}

#[derive(Default)]
pub struct DirectoryState {
    pub users: HashMap<String, String>,
    pub tokens: HashMap<String, String>,
    pub rooms: Vec<RoomSummary>,
    pub history: HashMap<String, Vec<Message>>,
    pub friends: Vec<FriendEdge>,
    pub friend_requests: Vec<FriendRequest>,
    pub room_invites: Vec<RoomInvite>,
    /// When set, every authenticated call answers as a 401 would.
    pub expire_all: bool,
    /// Inject one failure: (operation name, HTTP status it should mimic).
    pub fail_op: Option<(String, u16)>,
    /// Operation log, for asserting what was (not) called.
    pub calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    pub fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }

    pub fn with_user(username: &str, password: &str) -> Self {
        let fake = FakeDirectory::default();
        fake.state()
            .users
            .insert(username.to_string(), password.to_string());
        fake
    }

    pub fn add_room(&self, id: i64, name: &str) {
        self.state().rooms.push(RoomSummary {
            id,
            name: name.to_string(),
        });
    }

    pub fn seed_history(&self, room: &str, messages: Vec<Message>) {
        self.state().history.insert(room.to_string(), messages);
    }

    pub fn fail_once(&self, op: &str, status: u16) {
        self.state().fail_op = Some((op.to_string(), status));
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }

    fn record(&self, op: &str) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op.to_string());
        if let Some((target, status)) = state.fail_op.clone() {
            if target == op {
                state.fail_op = None;
                return Err(match status {
                    401 => DirectoryError::SessionExpired,
                    400 | 409 => DirectoryError::Conflict("injected conflict".to_string()),
                    404 => DirectoryError::NotFound("injected not-found".to_string()),
                    other => DirectoryError::Unexpected {
                        status: other,
                        detail: "injected failure".to_string(),
                    },
                });
            }
        }
        Ok(())
    }

    fn authed(&self, token: &str) -> DirectoryResult<String> {
        let state = self.state.lock().unwrap();
        if state.expire_all {
            return Err(DirectoryError::SessionExpired);
        }
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or(DirectoryError::SessionExpired)
    }
}

#[async_trait]
impl DirectoryApi for FakeDirectory {
    async fn issue_token(&self, username: &str, password: &str) -> DirectoryResult<String> {
        self.record("issue_token")?;
        let mut state = self.state.lock().unwrap();
        match state.users.get(username) {
            Some(stored) if stored == password => {
                let token = format!("tok-{}", username);
                state.tokens.insert(token.clone(), username.to_string());
                Ok(token)
            }
            _ => Err(DirectoryError::Auth(
                "Incorrect username or password".to_string(),
            )),
        }
    }

    async fn create_identity(&self, username: &str, password: &str) -> DirectoryResult<()> {
        self.record("create_identity")?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(username) {
            return Err(DirectoryError::Conflict(
                "Username already registered".to_string(),
            ));
        }
        state
            .users
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn list_rooms(&self, token: &str) -> DirectoryResult<Vec<RoomSummary>> {
        self.record("list_rooms")?;
        self.authed(token)?;
        Ok(self.state().rooms.clone())
    }

    async fn create_room(&self, token: &str, name: &str) -> DirectoryResult<RoomSummary> {
        self.record("create_room")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        if state.rooms.iter().any(|room| room.name == name) {
            return Err(DirectoryError::Conflict("Room already exists".to_string()));
        }
        let summary = RoomSummary {
            id: state.rooms.len() as i64 + 1,
            name: name.to_string(),
        };
        state.rooms.push(summary.clone());
        Ok(summary)
    }

    async fn leave_room(&self, token: &str, _name: &str) -> DirectoryResult<()> {
        self.record("leave_room")?;
        self.authed(token)?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        token: &str,
        room: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> DirectoryResult<Vec<Message>> {
        self.record("fetch_history")?;
        self.authed(token)?;
        let state = self.state.lock().unwrap();
        let messages: Vec<Message> = match room {
            Some(room) => state.history.get(room).cloned().unwrap_or_default(),
            None => state.history.values().flatten().cloned().collect(),
        };
        Ok(messages.into_iter().skip(skip).take(limit).collect())
    }

    async fn search(&self, token: &str, query: &str) -> DirectoryResult<Vec<Message>> {
        self.record("search")?;
        self.authed(token)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .values()
            .flatten()
            .filter(|m| m.content.contains(query))
            .cloned()
            .collect())
    }

    async fn list_friends(&self, token: &str) -> DirectoryResult<Vec<FriendEdge>> {
        self.record("list_friends")?;
        self.authed(token)?;
        Ok(self.state().friends.clone())
    }

    async fn add_friend(&self, token: &str, username: &str) -> DirectoryResult<FriendEdge> {
        self.record("add_friend")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        let edge = FriendEdge {
            id: state.friends.len() as i64 + 1,
            username: username.to_string(),
            room_name: format!("private_1_{}", state.friends.len() + 2),
        };
        state.friends.push(edge.clone());
        Ok(edge)
    }

    async fn remove_friend(&self, token: &str, username: &str) -> DirectoryResult<()> {
        self.record("remove_friend")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        state.friends.retain(|friend| friend.username != username);
        Ok(())
    }

    async fn list_friend_requests(&self, token: &str) -> DirectoryResult<Vec<FriendRequest>> {
        self.record("list_friend_requests")?;
        self.authed(token)?;
        Ok(self.state().friend_requests.clone())
    }

    async fn send_friend_request(
        &self,
        token: &str,
        username: &str,
    ) -> DirectoryResult<FriendRequest> {
        self.record("send_friend_request")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        let request = FriendRequest {
            id: state.friend_requests.len() as i64 + 1,
            from_username: username.to_string(),
            status: "pending".to_string(),
        };
        state.friend_requests.push(request.clone());
        Ok(request)
    }

    async fn respond_friend_request(
        &self,
        token: &str,
        id: i64,
        _accept: bool,
    ) -> DirectoryResult<()> {
        self.record("respond_friend_request")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        if !state.friend_requests.iter().any(|r| r.id == id) {
            return Err(DirectoryError::NotFound(
                "No such pending request".to_string(),
            ));
        }
        state.friend_requests.retain(|r| r.id != id);
        Ok(())
    }

    async fn list_room_invites(&self, token: &str) -> DirectoryResult<Vec<RoomInvite>> {
        self.record("list_room_invites")?;
        self.authed(token)?;
        Ok(self.state().room_invites.clone())
    }

    async fn send_room_invite(
        &self,
        token: &str,
        room: &str,
        _username: &str,
    ) -> DirectoryResult<RoomInvite> {
        self.record("send_room_invite")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        let invite = RoomInvite {
            id: state.room_invites.len() as i64 + 1,
            room_name: room.to_string(),
            from_user_id: 1,
            status: "pending".to_string(),
        };
        state.room_invites.push(invite.clone());
        Ok(invite)
    }

    async fn respond_room_invite(
        &self,
        token: &str,
        id: i64,
        accept: bool,
    ) -> DirectoryResult<RoomInvite> {
        self.record("respond_room_invite")?;
        self.authed(token)?;
        let mut state = self.state.lock().unwrap();
        let position = state
            .room_invites
            .iter()
            .position(|invite| invite.id == id)
            .ok_or_else(|| DirectoryError::NotFound("No such invite".to_string()))?;
        let mut invite = state.room_invites.remove(position);
        invite.status = if accept { "accepted" } else { "rejected" }.to_string();
        if accept && !state.rooms.iter().any(|r| r.name == invite.room_name) {
            let summary = RoomSummary {
                id: state.rooms.len() as i64 + 1,
                name: invite.room_name.clone(),
            };
            state.rooms.push(summary);
        }
        Ok(invite)
    }
}

pub struct Fixture {
    pub controller: SyncController<FakeDirectory>,
    pub events: UnboundedReceiver<(ChannelScope, ChannelEvent)>,
    pub directory: FakeDirectory,
    pub store_path: std::path::PathBuf,
    _store_dir: TempDir,
}

/// Controller over the fake directory and a throwaway credential store.
/// The default live-channel endpoint points at a closed local port, so
/// channel opens fail fast and tests inject events through
/// apply_channel_event; tests that want a real socket override ws_url.
pub fn fixture(mode: SyncMode) -> Fixture {
    fixture_with(mode, |_| {})
}

pub fn fixture_with(mode: SyncMode, tweak: impl FnOnce(&mut ClientConfig)) -> Fixture {
    setup_logging();
    let directory = FakeDirectory::with_user("alice", "p1");
    let store_dir = tempfile::tempdir().unwrap();
    let store_path = store_dir.path().join("session.json");
    let store = CredentialStore::at(store_path.clone());

    let mut config = ClientConfig::new("http://127.0.0.1:9", "ws://127.0.0.1:9", mode);
    config.typing_ttl = Duration::from_secs(10);
    tweak(&mut config);
    let (controller, events) = SyncController::new(config, store, directory.clone());

    Fixture {
        controller,
        events,
        directory,
        store_path,
        _store_dir: store_dir,
    }
}
