use std::sync::{Arc, Mutex};
use std::time::Duration;

use wolfpack_types::api::MembersResponse;

use crate::debounce::Debouncer;
use crate::resource::{Resource, Snapshot};
use crate::service::WolfpackService;

/// Keystroke coalescing window for the member search box.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Member list with a debounced search query.
pub struct MemberDirectory {
    service: Arc<dyn WolfpackService>,
    resource: Resource<MembersResponse>,
    query: Arc<Mutex<Option<String>>>,
    search: Debouncer<Option<String>>,
}

impl MemberDirectory {
    pub fn new(service: Arc<dyn WolfpackService>) -> Self {
        let resource = Resource::new();
        let query = Arc::new(Mutex::new(None));

        let search = {
            let service = service.clone();
            let resource = resource.clone();
            let query = query.clone();
            Debouncer::new(SEARCH_DEBOUNCE, move |search: Option<String>| {
                let service = service.clone();
                let resource = resource.clone();
                *query.lock().unwrap_or_else(|p| p.into_inner()) = search.clone();
                async move {
                    resource
                        .load(async move { service.members(search.as_deref()).await })
                        .await
                }
            })
        };

        Self {
            service,
            resource,
            query,
            search,
        }
    }

    /// Queue a search; blank input lists everyone.
    pub fn set_search(&self, input: &str) {
        let trimmed = input.trim();
        let search = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self.search.push(search);
    }

    /// Reload with the last applied query.
    pub async fn refresh(&self) {
        let search = self
            .query
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let service = self.service.clone();
        self.resource
            .load(async move { service.members(search.as_deref()).await })
            .await
    }

    pub fn snapshot(&self) -> Snapshot<MembersResponse> {
        self.resource.snapshot()
    }

    pub fn unmount(&self) {
        self.resource.unmount();
    }
}
