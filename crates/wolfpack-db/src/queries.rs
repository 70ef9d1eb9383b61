use crate::Database;
use crate::models::{
    ConversationRow, MenuCategoryRow, MenuItemRow, MessageRow, NewUser, ParticipantRow, PostRow,
    UserRow,
};
use anyhow::{Result, bail};
use rusqlite::{Connection, Row, TransactionBehavior, params};
use tracing::debug;

const USER_COLUMNS: &str = "id, auth_id, email, password, display_name, first_name, last_name, \
     avatar_url, role, wolfpack_status, is_online, last_activity, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, auth_id, email, password, display_name) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.id, user.auth_id, user.email, user.password_hash, user.display_name],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_auth_id(&self, auth_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "auth_id", auth_id))
    }

    /// Look a user up by primary key first, then by auth subject.
    /// Callers pass ids whose provenance is unknown (profile links, old clients).
    pub fn resolve_user(&self, key: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            if let Some(user) = query_user(conn, "id", key)? {
                return Ok(Some(user));
            }
            query_user(conn, "auth_id", key)
        })
    }

    pub fn set_presence(&self, user_id: &str, online: bool, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2, last_activity = ?3 WHERE id = ?1",
                params![user_id, online, at],
            )?;
            Ok(())
        })
    }

    /// Marks the user offline only if `last_activity` still holds `since`, the
    /// stamp this connection wrote when it came online. Returns whether it did.
    pub fn set_offline_if_unchanged(&self, user_id: &str, since: &str, at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = 0, last_activity = ?3
                 WHERE id = ?1 AND last_activity = ?2",
                params![user_id, since, at],
            )?;
            Ok(changed > 0)
        })
    }

    /// Active, non-deleted members other than `exclude_id`, online first.
    pub fn list_active_members(
        &self,
        exclude_id: &str,
        search: Option<&str>,
        limit: u32,
    ) -> Result<Vec<UserRow>> {
        let pattern = search.map(like_pattern);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE wolfpack_status = 'active' AND deleted_at IS NULL AND id <> ?1
                   AND (?2 IS NULL OR display_name LIKE ?2 ESCAPE '\\')
                 ORDER BY is_online DESC, display_name COLLATE NOCASE
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![exclude_id, pattern, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_active_members(&self, exclude_id: &str, search: Option<&str>) -> Result<usize> {
        let pattern = search.map(like_pattern);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users
                 WHERE wolfpack_status = 'active' AND deleted_at IS NULL AND id <> ?1
                   AND (?2 IS NULL OR display_name LIKE ?2 ESCAPE '\\')",
                params![exclude_id, pattern],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Follows --

    /// Follow `target_id` if not already following, otherwise unfollow.
    /// Returns the new following state.
    pub fn toggle_follow(&self, follower_id: &str, target_id: &str) -> Result<bool> {
        if follower_id == target_id {
            bail!("users cannot follow themselves");
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower_id, target_id],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO follows (follower_id, following_id) VALUES (?1, ?2)",
                    params![follower_id, target_id],
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    /// Returns (followers, following) for a user.
    pub fn follow_counts(&self, user_id: &str) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let followers: i64 = conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE following_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            let following: i64 = conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok((followers as u64, following as u64))
        })
    }

    pub fn is_following(&self, follower_id: &str, target_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                    params![follower_id, target_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(exists)
        })
    }

    // -- Conversations --

    /// Return the direct conversation between two users, creating it if needed.
    /// The pair is unordered: (a, b) and (b, a) resolve to the same conversation.
    /// `new_id` is only used when a conversation has to be created.
    pub fn find_or_create_direct_conversation(
        &self,
        new_id: &str,
        caller_id: &str,
        other_id: &str,
    ) -> Result<String> {
        if caller_id == other_id {
            bail!("a direct conversation needs two distinct users");
        }
        let key = direct_key(caller_id, other_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok(id);
            }

            tx.execute(
                "INSERT INTO conversations (id, conversation_type, direct_key, created_by) VALUES (?1, 'direct', ?2, ?3)",
                params![new_id, key, caller_id],
            )?;
            for user_id in [caller_id, other_id] {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                    params![new_id, user_id],
                )?;
            }
            tx.commit()?;

            debug!("Created direct conversation {} ({})", new_id, key);
            Ok(new_id.to_string())
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(exists)
        })
    }

    /// Conversations the user takes part in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.conversation_type, c.name, c.last_message_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        conversation_type: row.get(1)?,
                        name: row.get(2)?,
                        last_message_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch participants for a set of conversation IDs.
    pub fn get_participants(&self, conversation_ids: &[String]) -> Result<Vec<ParticipantRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT p.conversation_id, p.user_id, u.display_name
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id IN ({})",
                placeholders(conversation_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids.iter()), |row| {
                    Ok(ParticipantRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, conversation_id, sender_id, content, created_at],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                params![conversation_id, created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Newest first. `before` is the `created_at` of the oldest message on the
    /// previous page, in the stored millisecond format; `before_id` breaks
    /// ties between messages sharing that timestamp.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
        before_id: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_id, limit, before, before_id))
    }

    // -- Feed --

    pub fn insert_post(
        &self,
        id: &str,
        user_id: &str,
        caption: Option<&str>,
        video_url: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, caption, video_url, thumbnail_url) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, user_id, caption, video_url, thumbnail_url],
            )?;
            Ok(())
        })
    }

    /// Active posts, newest first, with the viewer's like flag.
    pub fn list_feed(&self, viewer_id: &str, limit: u32, offset: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.user_id, u.display_name, u.avatar_url, p.caption, p.video_url,
                        p.thumbnail_url, p.likes_count, p.comments_count, p.shares_count,
                        EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?1),
                        p.created_at
                 FROM posts p
                 JOIN users u ON u.id = p.user_id
                 WHERE p.is_active = 1
                 ORDER BY p.created_at DESC, p.id
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![viewer_id, limit, offset], |row| {
                    Ok(PostRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        display_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        caption: row.get(4)?,
                        video_url: row.get(5)?,
                        thumbnail_url: row.get(6)?,
                        likes_count: row.get(7)?,
                        comments_count: row.get(8)?,
                        shares_count: row.get(9)?,
                        liked_by_viewer: row.get(10)?,
                        created_at: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn post_exists(&self, post_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM posts WHERE id = ?1 AND is_active = 1",
                    [post_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(exists)
        })
    }

    /// Toggle a like: removes if exists, inserts if not, and keeps
    /// `posts.likes_count` in step within the same transaction.
    /// Returns (liked, likes_count).
    pub fn toggle_post_like(&self, post_id: &str, user_id: &str) -> Result<(bool, u64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, user_id],
            )?;
            let liked = removed == 0;
            if liked {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
                    params![post_id, user_id],
                )?;
                tx.execute(
                    "UPDATE posts SET likes_count = likes_count + 1 WHERE id = ?1",
                    [post_id],
                )?;
            } else {
                tx.execute(
                    "UPDATE posts SET likes_count = MAX(likes_count - 1, 0) WHERE id = ?1",
                    [post_id],
                )?;
            }

            let count: i64 =
                tx.query_row("SELECT likes_count FROM posts WHERE id = ?1", [post_id], |row| {
                    row.get(0)
                })?;
            tx.commit()?;
            Ok((liked, count.max(0) as u64))
        })
    }

    /// Returns (likes_count, liked by `user_id`), or None if the post is gone.
    pub fn post_like_state(&self, post_id: &str, user_id: &str) -> Result<Option<(u64, bool)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT p.likes_count,
                        EXISTS(SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?2)
                 FROM posts p WHERE p.id = ?1 AND p.is_active = 1",
                params![post_id, user_id],
                |row| Ok((row.get::<_, i64>(0)?.max(0) as u64, row.get::<_, bool>(1)?)),
            )
            .optional()
        })
    }

    // -- Menu --

    pub fn list_menu_categories(&self, kind: Option<&str>) -> Result<Vec<MenuCategoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, kind, icon, color FROM menu_categories
                 WHERE is_active = 1 AND (?1 IS NULL OR kind = ?1)
                 ORDER BY kind, display_order, name",
            )?;
            let rows = stmt
                .query_map([kind], |row| {
                    Ok(MenuCategoryRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        icon: row.get(3)?,
                        color: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch items for a set of category IDs, in display order.
    pub fn get_menu_items(&self, category_ids: &[String]) -> Result<Vec<MenuItemRow>> {
        if category_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT id, category_id, name, description, price_cents, is_available, image_url
                 FROM menu_items WHERE category_id IN ({})
                 ORDER BY display_order, name",
                placeholders(category_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(category_ids.iter()), |row| {
                    Ok(MenuItemRow {
                        id: row.get(0)?,
                        category_id: row.get(1)?,
                        name: row.get(2)?,
                        description: row.get(3)?,
                        price_cents: row.get(4)?,
                        is_available: row.get(5)?,
                        image_url: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn insert_menu_item(
        &self,
        id: &str,
        category_id: &str,
        name: &str,
        description: Option<&str>,
        price_cents: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO menu_items (id, category_id, name, description, price_cents) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, category_id, name, description, price_cents],
            )?;
            Ok(())
        })
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        auth_id: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        display_name: row.get(4)?,
        first_name: row.get(5)?,
        last_name: row.get(6)?,
        avatar_url: row.get(7)?,
        role: row.get(8)?,
        wolfpack_status: row.get(9)?,
        is_online: row.get(10)?,
        last_activity: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// `column` is always one of our own literals, never caller input.
fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1 AND deleted_at IS NULL");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], map_user).optional()
}

fn query_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: u32,
    before: Option<&str>,
    before_id: Option<&str>,
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the sender name in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.conversation_id, m.sender_id, u.display_name, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.conversation_id = ?1
           AND (?2 IS NULL
                OR m.created_at < ?2
                OR (m.created_at = ?2 AND ?4 IS NOT NULL AND m.id < ?4))
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(params![conversation_id, before, limit, before_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_display_name: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
