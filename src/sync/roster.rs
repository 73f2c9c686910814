// Friend, friend-request, and room-invite projections. The directory owns
// all of these; after every mutating call the affected lists are re-fetched
// rather than merged locally (beyond dropping the acted-on entry).

use log::warn;

use crate::config::SyncMode;
use crate::directory::DirectoryApi;
use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{FriendEdge, FriendRequest, RoomInvite};

use super::{SessionState, SyncController};

impl<D: DirectoryApi> SyncController<D> {
    /// Fetch the directory lists for the current mode. Runs once per lobby
    /// entry, never on a poll; a transient failure keeps whatever was
    /// cached before. Only session expiry escapes as an error.
    pub async fn refresh_directory(&mut self) -> DirectoryResult<()> {
        let token = self.token()?;

        let listed = self.directory.list_rooms(&token).await;
        match self.absorb(listed) {
            Ok(rooms) => self.rooms = rooms,
            Err(DirectoryError::SessionExpired) => return Err(DirectoryError::SessionExpired),
            Err(e) => warn!("could not refresh rooms: {}", e),
        }

        if self.config.mode != SyncMode::Full {
            return Ok(());
        }

        let listed = self.directory.list_friends(&token).await;
        match self.absorb(listed) {
            Ok(friends) => self.friends = friends,
            Err(DirectoryError::SessionExpired) => return Err(DirectoryError::SessionExpired),
            Err(e) => warn!("could not refresh friends: {}", e),
        }

        let listed = self.directory.list_friend_requests(&token).await;
        match self.absorb(listed) {
            Ok(requests) => self.friend_requests = requests,
            Err(DirectoryError::SessionExpired) => return Err(DirectoryError::SessionExpired),
            Err(e) => warn!("could not refresh friend requests: {}", e),
        }

        let listed = self.directory.list_room_invites(&token).await;
        match self.absorb(listed) {
            Ok(invites) => self.room_invites = invites,
            Err(DirectoryError::SessionExpired) => return Err(DirectoryError::SessionExpired),
            Err(e) => warn!("could not refresh room invites: {}", e),
        }

        Ok(())
    }

    pub async fn add_friend(&mut self, username: &str) -> DirectoryResult<FriendEdge> {
        let token = self.token()?;
        let added = self.directory.add_friend(&token, username).await;
        let edge = self.absorb(added)?;
        self.refresh_friend_lists().await;
        Ok(edge)
    }

    pub async fn remove_friend(&mut self, username: &str) -> DirectoryResult<()> {
        let token = self.token()?;
        let removed = self.directory.remove_friend(&token, username).await;
        self.absorb(removed)?;
        self.friends.retain(|friend| friend.username != username);
        self.refresh_friend_lists().await;
        Ok(())
    }

    pub async fn send_friend_request(&mut self, username: &str) -> DirectoryResult<FriendRequest> {
        let token = self.token()?;
        let sent = self.directory.send_friend_request(&token, username).await;
        self.absorb(sent)
    }

    pub async fn respond_friend_request(&mut self, id: i64, accept: bool) -> DirectoryResult<()> {
        let token = self.token()?;
        let responded = self.directory.respond_friend_request(&token, id, accept).await;
        self.absorb(responded)?;
        self.friend_requests.retain(|request| request.id != id);
        // Acceptance creates the friendship and its private room.
        self.refresh_friend_lists().await;
        if accept {
            self.refresh_room_list().await;
        }
        Ok(())
    }

    pub async fn send_room_invite(
        &mut self,
        room: &str,
        username: &str,
    ) -> DirectoryResult<RoomInvite> {
        let token = self.token()?;
        let sent = self.directory.send_room_invite(&token, room, username).await;
        self.absorb(sent)
    }

    /// Accepting an invite unlocks the room server-side and enters it;
    /// rejecting only clears the invite. Returns the room name on accept.
    pub async fn respond_room_invite(
        &mut self,
        id: i64,
        accept: bool,
    ) -> DirectoryResult<Option<String>> {
        let token = self.token()?;
        let responded = self.directory.respond_room_invite(&token, id, accept).await;
        let invite = self.absorb(responded)?;
        self.room_invites.retain(|pending| pending.id != id);

        if !accept {
            return Ok(None);
        }

        self.refresh_room_list().await;
        if self.state == SessionState::LoggedOut {
            return Err(DirectoryError::SessionExpired);
        }
        self.enter_room(&invite.room_name).await?;
        Ok(Some(invite.room_name))
    }

    async fn refresh_room_list(&mut self) {
        let token = match self.token() {
            Ok(token) => token,
            Err(_) => return,
        };
        let listed = self.directory.list_rooms(&token).await;
        match self.absorb(listed) {
            Ok(rooms) => self.rooms = rooms,
            Err(e) => warn!("could not refresh rooms: {}", e),
        }
    }

    /// Read-back after a friend mutation. Failures only leave stale
    /// projections; they are not surfaced past the log.
    async fn refresh_friend_lists(&mut self) {
        let token = match self.token() {
            Ok(token) => token,
            Err(_) => return,
        };

        let listed = self.directory.list_friends(&token).await;
        match self.absorb(listed) {
            Ok(friends) => self.friends = friends,
            Err(e) => warn!("could not refresh friends: {}", e),
        }
        if self.state == SessionState::LoggedOut {
            return;
        }

        let listed = self.directory.list_friend_requests(&token).await;
        match self.absorb(listed) {
            Ok(requests) => self.friend_requests = requests,
            Err(e) => warn!("could not refresh friend requests: {}", e),
        }
    }
}
