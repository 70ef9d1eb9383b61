/// Database row types — these map directly to SQLite rows.
/// Distinct from wolfpack-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub auth_id: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
    pub wolfpack_status: String,
    pub is_online: bool,
    pub last_activity: Option<String>,
    pub created_at: String,
}

/// Input for `Database::create_user`.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub auth_id: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub display_name: &'a str,
}

pub struct ConversationRow {
    pub id: String,
    pub conversation_type: String,
    pub name: Option<String>,
    pub last_message_at: Option<String>,
}

/// Participant of a conversation, as listed next to it.
pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub display_name: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub content: String,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub caption: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub shares_count: i64,
    pub liked_by_viewer: bool,
    pub created_at: String,
}

pub struct MenuCategoryRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub icon: Option<String>,
    pub color: Option<String>,
}

pub struct MenuItemRow {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub is_available: bool,
    pub image_url: Option<String>,
}
