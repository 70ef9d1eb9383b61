use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use wolfpack_types::api::{
    DirectConversationResponse, ErrorBody, FeedResponse, LikeCountResponse, MembersResponse,
    ToggleFollowResponse, ToggleLikeResponse,
};

use crate::error::ServiceError;

/// Operations the client screens need from the Wolfpack API.
#[async_trait]
pub trait WolfpackService: Send + Sync {
    /// Returns the new liked flag.
    async fn toggle_like(&self, post_id: Uuid) -> Result<bool, ServiceError>;

    async fn like_count(&self, post_id: Uuid) -> Result<LikeCountResponse, ServiceError>;

    async fn toggle_follow(&self, user_id: Uuid) -> Result<ToggleFollowResponse, ServiceError>;

    async fn open_direct_conversation(
        &self,
        other_user_id: Uuid,
    ) -> Result<DirectConversationResponse, ServiceError>;

    async fn members(&self, search: Option<&str>) -> Result<MembersResponse, ServiceError>;

    async fn feed(&self, limit: u32, offset: u32) -> Result<FeedResponse, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `https://api.wolfpack.example`
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// `WolfpackService` over the REST API.
#[derive(Clone)]
pub struct HttpService {
    client: Client,
    config: ClientConfig,
}

impl HttpService {
    pub fn new(config: ClientConfig) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Attach the bearer token; calls without one fail before touching the network.
    fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, ServiceError> {
        let token = self.config.token.as_deref().ok_or(ServiceError::Unauthenticated)?;
        Ok(req.bearer_auth(token))
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ServiceError> {
        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            return resp.json::<T>().await.map_err(|e| ServiceError::Decode(e.to_string()));
        }

        let body = resp.json::<ErrorBody>().await.ok();
        debug!("Request failed with {}: {:?}", status, body);
        Err(match status {
            StatusCode::UNAUTHORIZED => ServiceError::Unauthenticated,
            StatusCode::NOT_FOUND => ServiceError::NotFound(
                body.map(|b| b.error).unwrap_or_else(|| "Resource not found".to_string()),
            ),
            _ => ServiceError::Server {
                status: status.as_u16(),
                message: body.map(|b| b.error).unwrap_or_default(),
            },
        })
    }
}

#[async_trait]
impl WolfpackService for HttpService {
    async fn toggle_like(&self, post_id: Uuid) -> Result<bool, ServiceError> {
        let req = self.authed(self.client.post(self.url(&format!("/posts/{}/like", post_id))))?;
        let resp: ToggleLikeResponse = self.execute(req).await?;
        Ok(resp.liked)
    }

    async fn like_count(&self, post_id: Uuid) -> Result<LikeCountResponse, ServiceError> {
        let req = self.authed(self.client.get(self.url(&format!("/posts/{}/likes", post_id))))?;
        self.execute(req).await
    }

    async fn toggle_follow(&self, user_id: Uuid) -> Result<ToggleFollowResponse, ServiceError> {
        let req = self.authed(self.client.post(self.url(&format!("/users/{}/follow", user_id))))?;
        self.execute(req).await
    }

    async fn open_direct_conversation(
        &self,
        other_user_id: Uuid,
    ) -> Result<DirectConversationResponse, ServiceError> {
        let req = self
            .authed(self.client.post(self.url("/conversations/direct")))?
            .json(&json!({ "otherUserId": other_user_id }));
        self.execute(req).await
    }

    async fn members(&self, search: Option<&str>) -> Result<MembersResponse, ServiceError> {
        let mut req = self.authed(self.client.get(self.url("/members")))?;
        if let Some(search) = search {
            req = req.query(&[("search", search)]);
        }
        self.execute(req).await
    }

    async fn feed(&self, limit: u32, offset: u32) -> Result<FeedResponse, ServiceError> {
        let req = self
            .authed(self.client.get(self.url("/feed")))?
            .query(&[("limit", limit), ("offset", offset)]);
        self.execute(req).await
    }
}
