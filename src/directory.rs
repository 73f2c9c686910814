// Directory client: thin REST caller for auth, rooms, friends, invites,
// history, and search. The service owns every entity here; the client only
// holds read projections of what these calls return.

use async_trait::async_trait;
use log::debug;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::{DirectoryError, DirectoryResult};
use crate::models::{FriendEdge, FriendRequest, Message, RoomInvite, RoomSummary, TokenResponse};

/// The directory operations the sync controller consumes. A trait so tests
/// can drive the controller against an in-memory implementation.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn issue_token(&self, username: &str, password: &str) -> DirectoryResult<String>;
    async fn create_identity(&self, username: &str, password: &str) -> DirectoryResult<()>;

    async fn list_rooms(&self, token: &str) -> DirectoryResult<Vec<RoomSummary>>;
    async fn create_room(&self, token: &str, name: &str) -> DirectoryResult<RoomSummary>;
    async fn leave_room(&self, token: &str, name: &str) -> DirectoryResult<()>;

    /// One page of room history, oldest first. `room` of `None` is the
    /// credential probe form: any page at all proves the token is live.
    async fn fetch_history(
        &self,
        token: &str,
        room: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> DirectoryResult<Vec<Message>>;

    async fn search(&self, token: &str, query: &str) -> DirectoryResult<Vec<Message>>;

    async fn list_friends(&self, token: &str) -> DirectoryResult<Vec<FriendEdge>>;
    async fn add_friend(&self, token: &str, username: &str) -> DirectoryResult<FriendEdge>;
    async fn remove_friend(&self, token: &str, username: &str) -> DirectoryResult<()>;

    async fn list_friend_requests(&self, token: &str) -> DirectoryResult<Vec<FriendRequest>>;
    async fn send_friend_request(&self, token: &str, username: &str)
        -> DirectoryResult<FriendRequest>;
    async fn respond_friend_request(&self, token: &str, id: i64, accept: bool)
        -> DirectoryResult<()>;

    async fn list_room_invites(&self, token: &str) -> DirectoryResult<Vec<RoomInvite>>;
    async fn send_room_invite(&self, token: &str, room: &str, username: &str)
        -> DirectoryResult<RoomInvite>;
    async fn respond_room_invite(&self, token: &str, id: i64, accept: bool)
        -> DirectoryResult<RoomInvite>;
}

/// HTTP implementation over reqwest.
pub struct HttpDirectory {
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

impl HttpDirectory {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        HttpDirectory {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Resolve a response into the deserialized body or a mapped error.
    /// `auth_exchange` marks the token endpoint, where a 401 means bad
    /// credentials rather than an expired session.
    async fn resolve<T: serde::de::DeserializeOwned>(
        request: RequestBuilder,
        auth_exchange: bool,
    ) -> DirectoryResult<T> {
        let response = request.send().await?;
        let response = Self::check(response, auth_exchange).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check(response: Response, auth_exchange: bool) -> DirectoryResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.detail)
            .unwrap_or_else(|_| status.to_string());
        debug!("directory call failed: {} ({})", status, detail);

        Err(match status.as_u16() {
            401 if auth_exchange => DirectoryError::Auth(detail),
            401 => DirectoryError::SessionExpired,
            400 | 409 => DirectoryError::Conflict(detail),
            404 => DirectoryError::NotFound(detail),
            code => DirectoryError::Unexpected {
                status: code,
                detail,
            },
        })
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectory {
    async fn issue_token(&self, username: &str, password: &str) -> DirectoryResult<String> {
        let request = self
            .http
            .post(self.endpoint("/token"))
            .form(&[("username", username), ("password", password)]);
        let token: TokenResponse = Self::resolve(request, true).await?;
        debug!("issued {} token for {}", token.token_type, username);
        Ok(token.access_token)
    }

    async fn create_identity(&self, username: &str, password: &str) -> DirectoryResult<()> {
        let request = self
            .http
            .post(self.endpoint("/users/"))
            .json(&json!({ "username": username, "password": password }));
        let response = request.send().await?;
        Self::check(response, true).await?;
        Ok(())
    }

    async fn list_rooms(&self, token: &str) -> DirectoryResult<Vec<RoomSummary>> {
        let request = self.http.get(self.endpoint("/rooms/")).bearer_auth(token);
        Self::resolve(request, false).await
    }

    async fn create_room(&self, token: &str, name: &str) -> DirectoryResult<RoomSummary> {
        let request = self
            .http
            .post(self.endpoint("/rooms/"))
            .bearer_auth(token)
            .json(&json!({ "name": name }));
        Self::resolve(request, false).await
    }

    async fn leave_room(&self, token: &str, name: &str) -> DirectoryResult<()> {
        let request = self
            .http
            .delete(self.endpoint(&format!("/rooms/{}/leave", name)))
            .bearer_auth(token);
        let response = request.send().await?;
        Self::check(response, false).await?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        token: &str,
        room: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> DirectoryResult<Vec<Message>> {
        let mut request = self
            .http
            .get(self.endpoint("/messages/"))
            .bearer_auth(token)
            .query(&[("skip", skip), ("limit", limit)]);
        if let Some(room) = room {
            request = request.query(&[("room", room)]);
        }
        Self::resolve(request, false).await
    }

    async fn search(&self, token: &str, query: &str) -> DirectoryResult<Vec<Message>> {
        let request = self
            .http
            .get(self.endpoint("/search"))
            .bearer_auth(token)
            .query(&[("q", query)]);
        Self::resolve(request, false).await
    }

    async fn list_friends(&self, token: &str) -> DirectoryResult<Vec<FriendEdge>> {
        let request = self.http.get(self.endpoint("/friends/")).bearer_auth(token);
        Self::resolve(request, false).await
    }

    async fn add_friend(&self, token: &str, username: &str) -> DirectoryResult<FriendEdge> {
        let request = self
            .http
            .post(self.endpoint("/friends/"))
            .bearer_auth(token)
            .json(&json!({ "username": username }));
        Self::resolve(request, false).await
    }

    async fn remove_friend(&self, token: &str, username: &str) -> DirectoryResult<()> {
        let request = self
            .http
            .delete(self.endpoint(&format!("/friends/{}", username)))
            .bearer_auth(token);
        let response = request.send().await?;
        Self::check(response, false).await?;
        Ok(())
    }

    async fn list_friend_requests(&self, token: &str) -> DirectoryResult<Vec<FriendRequest>> {
        let request = self
            .http
            .get(self.endpoint("/friend_requests/"))
            .bearer_auth(token);
        Self::resolve(request, false).await
    }

    async fn send_friend_request(
        &self,
        token: &str,
        username: &str,
    ) -> DirectoryResult<FriendRequest> {
        let request = self
            .http
            .post(self.endpoint("/friend_requests/"))
            .bearer_auth(token)
            .json(&json!({ "to_username": username }));
        Self::resolve(request, false).await
    }

    async fn respond_friend_request(
        &self,
        token: &str,
        id: i64,
        accept: bool,
    ) -> DirectoryResult<()> {
        let action = if accept { "accept" } else { "reject" };
        let request = self
            .http
            .post(self.endpoint(&format!("/friend_requests/{}/respond", id)))
            .bearer_auth(token)
            .json(&json!({ "action": action }));
        let response = request.send().await?;
        Self::check(response, false).await?;
        Ok(())
    }

    async fn list_room_invites(&self, token: &str) -> DirectoryResult<Vec<RoomInvite>> {
        let request = self
            .http
            .get(self.endpoint("/room_invites/"))
            .bearer_auth(token);
        Self::resolve(request, false).await
    }

    async fn send_room_invite(
        &self,
        token: &str,
        room: &str,
        username: &str,
    ) -> DirectoryResult<RoomInvite> {
        let request = self
            .http
            .post(self.endpoint("/room_invites/"))
            .bearer_auth(token)
            .json(&json!({ "room_name": room, "to_username": username }));
        Self::resolve(request, false).await
    }

    async fn respond_room_invite(
        &self,
        token: &str,
        id: i64,
        accept: bool,
    ) -> DirectoryResult<RoomInvite> {
        let action = if accept { "accept" } else { "reject" };
        let request = self
            .http
            .post(self.endpoint(&format!("/room_invites/{}/respond", id)))
            .bearer_auth(token)
            .json(&json!({ "action": action }));
        Self::resolve(request, false).await
    }
}
