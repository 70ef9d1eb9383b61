use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use wolfpack_types::api::{
    DirectConversationResponse, FeedResponse, LikeCountResponse, MembersResponse,
    ToggleFollowResponse,
};

use crate::error::ServiceError;
use crate::service::WolfpackService;

/// Scripted `WolfpackService` for unit tests. With `gated` set, `toggle_like`
/// parks until `gate` is notified.
pub struct MockService {
    pub toggle_result: Mutex<Result<bool, ServiceError>>,
    pub count_result: Mutex<Result<LikeCountResponse, ServiceError>>,
    pub gated: AtomicBool,
    pub gate: Notify,
    pub toggles: AtomicU32,
    pub member_queries: Mutex<Vec<Option<String>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            toggle_result: Mutex::new(Ok(true)),
            count_result: Mutex::new(Ok(LikeCountResponse {
                count: 0,
                liked: false,
            })),
            gated: AtomicBool::new(false),
            gate: Notify::new(),
            toggles: AtomicU32::new(0),
            member_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_toggle(&self, result: Result<bool, ServiceError>) {
        *self.toggle_result.lock().unwrap() = result;
    }

    pub fn set_count(&self, result: Result<LikeCountResponse, ServiceError>) {
        *self.count_result.lock().unwrap() = result;
    }

    pub fn toggles(&self) -> u32 {
        self.toggles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WolfpackService for MockService {
    async fn toggle_like(&self, _post_id: Uuid) -> Result<bool, ServiceError> {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.toggle_result.lock().unwrap().clone()
    }

    async fn like_count(&self, _post_id: Uuid) -> Result<LikeCountResponse, ServiceError> {
        self.count_result.lock().unwrap().clone()
    }

    async fn toggle_follow(&self, _user_id: Uuid) -> Result<ToggleFollowResponse, ServiceError> {
        Err(ServiceError::NotFound("User not found".into()))
    }

    async fn open_direct_conversation(
        &self,
        _other_user_id: Uuid,
    ) -> Result<DirectConversationResponse, ServiceError> {
        Err(ServiceError::NotFound("Other user not found".into()))
    }

    async fn members(&self, search: Option<&str>) -> Result<MembersResponse, ServiceError> {
        self.member_queries
            .lock()
            .unwrap()
            .push(search.map(str::to_string));
        Ok(MembersResponse {
            members: Vec::new(),
            total_count: 0,
            current_user_id: None,
            message: String::new(),
        })
    }

    async fn feed(&self, _limit: u32, _offset: u32) -> Result<FeedResponse, ServiceError> {
        Ok(FeedResponse {
            posts: Vec::new(),
            has_more: false,
            message: String::new(),
        })
    }
}
