use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            auth_id         TEXT NOT NULL UNIQUE,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            first_name      TEXT,
            last_name       TEXT,
            avatar_url      TEXT,
            role            TEXT NOT NULL DEFAULT 'user',
            wolfpack_status TEXT NOT NULL DEFAULT 'active',
            is_online       INTEGER NOT NULL DEFAULT 0,
            last_activity   TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            deleted_at      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_users_status
            ON users(wolfpack_status, display_name);

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            conversation_type   TEXT NOT NULL DEFAULT 'direct',
            name                TEXT,
            direct_key          TEXT UNIQUE,
            created_by          TEXT NOT NULL REFERENCES users(id),
            created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            last_message_at     TEXT
        );

        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            user_id         TEXT NOT NULL REFERENCES users(id),
            joined_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE TABLE IF NOT EXISTS posts (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL REFERENCES users(id),
            caption         TEXT,
            video_url       TEXT,
            thumbnail_url   TEXT,
            likes_count     INTEGER NOT NULL DEFAULT 0,
            comments_count  INTEGER NOT NULL DEFAULT 0,
            shares_count    INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(is_active, created_at);

        CREATE TABLE IF NOT EXISTS post_likes (
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS follows (
            follower_id     TEXT NOT NULL REFERENCES users(id),
            following_id    TEXT NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (follower_id, following_id),
            CHECK (follower_id <> following_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_following
            ON follows(following_id);

        CREATE TABLE IF NOT EXISTS menu_categories (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL,
            display_order   INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            icon            TEXT,
            color           TEXT
        );

        CREATE TABLE IF NOT EXISTS menu_items (
            id              TEXT PRIMARY KEY,
            category_id     TEXT NOT NULL REFERENCES menu_categories(id),
            name            TEXT NOT NULL,
            description     TEXT,
            price_cents     INTEGER NOT NULL,
            is_available    INTEGER NOT NULL DEFAULT 1,
            display_order   INTEGER NOT NULL DEFAULT 0,
            image_url       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_menu_items_category
            ON menu_items(category_id, display_order);

        -- Seed the default menu sections
        INSERT OR IGNORE INTO menu_categories (id, name, kind, display_order, icon)
            VALUES ('00000000-0000-0000-0000-00000000f001', 'Tacos', 'food', 1, 'taco');
        INSERT OR IGNORE INTO menu_categories (id, name, kind, display_order, icon)
            VALUES ('00000000-0000-0000-0000-00000000d001', 'House Cocktails', 'drink', 1, 'cocktail');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
