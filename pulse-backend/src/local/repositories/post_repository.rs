use anyhow::{Context, Result};
use rusqlite::types::Value;
use uuid::Uuid;

use pulse_types::{NewPost, Post, PostLike, ProfileSummary};

use super::{like_pattern, opt_uuid_at, timestamp, timestamp_at, uuid_at};
use crate::backend::PostFilter;
use crate::local::DbPool;

const POST_SELECT: &str = "SELECT p.id, p.user_id, p.content, p.image_url, p.video_url, p.audio_url, p.created_at,
        pr.id, pr.username, pr.display_name, pr.avatar_url, pr.is_verified,
        (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id)
    FROM posts p
    LEFT JOIN profiles pr ON pr.id = p.user_id";

fn map_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let author = match opt_uuid_at(row, 7)? {
        Some(author_id) => Some(ProfileSummary {
            id: Some(author_id),
            username: row.get(8)?,
            display_name: row.get(9)?,
            avatar_url: row.get(10)?,
            is_verified: row.get(11)?,
        }),
        None => None,
    };

    Ok(Post {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        content: row.get(2)?,
        image_url: row.get(3)?,
        video_url: row.get(4)?,
        audio_url: row.get(5)?,
        created_at: timestamp_at(row, 6)?,
        author,
        likes_count: row.get(12)?,
    })
}

pub struct PostRepository {
    pool: DbPool,
}

impl PostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Posts matching the filter, newest first, with author and like count
    pub fn list(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(author_id) = &filter.author_id {
            conditions.push("p.user_id = ?");
            params.push(Value::Text(author_id.to_string()));
        }
        if let Some(term) = &filter.content_contains {
            conditions.push("p.content LIKE ? ESCAPE '\\'");
            params.push(Value::Text(like_pattern(term)));
        }
        params.push(Value::Integer(filter.limit as i64));

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "{} {} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?",
            POST_SELECT, where_clause
        ))?;
        let posts = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), map_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Create a new post
    pub fn create(&self, post: &NewPost) -> Result<Post> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO posts (id, user_id, content, image_url, video_url, audio_url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                post.user_id.to_string(),
                &post.content,
                &post.image_url,
                &post.video_url,
                &post.audio_url,
                timestamp(&post.created_at),
            ),
        )
        .context("Failed to create post")?;

        Ok(Post {
            id,
            user_id: post.user_id,
            content: post.content.clone(),
            image_url: post.image_url.clone(),
            video_url: post.video_url.clone(),
            audio_url: post.audio_url.clone(),
            created_at: post.created_at,
            author: None,
            likes_count: 0,
        })
    }

    /// Delete a post and its likes. Returns whether the post existed.
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM post_likes WHERE post_id = ?", [id.to_string()])
            .context("Failed to delete post likes")?;
        let deleted = tx
            .execute("DELETE FROM posts WHERE id = ?", [id.to_string()])
            .context("Failed to delete post")?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Record a like; liking twice is a no-op
    pub fn like(&self, like: &PostLike) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO post_likes (post_id, user_id, created_at) VALUES (?, ?, ?)",
            (
                like.post_id.to_string(),
                like.user_id.to_string(),
                timestamp(&chrono::Utc::now()),
            ),
        )
        .context("Failed to like post")?;
        Ok(())
    }

    pub fn unlike(&self, like: &PostLike) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM post_likes WHERE post_id = ? AND user_id = ?",
            (like.post_id.to_string(), like.user_id.to_string()),
        )
        .context("Failed to unlike post")?;
        Ok(())
    }
}
