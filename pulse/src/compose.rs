use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_backend::{Backend, POSTS_BUCKET};
use pulse_types::{MediaKind, NewPost, Post};

use crate::error::{logged, ClientError, ClientResult};

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;
pub const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;

/// A file attached to a post draft
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its content type from the extension
    pub fn from_path(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::validation(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let content_type = guess_content_type(&file_name).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

pub fn guess_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// Post being written. At most one attachment of each kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub content: String,
    pub image: Option<Attachment>,
    pub video: Option<Attachment>,
    pub audio: Option<Attachment>,
}

impl Draft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with(mut self, kind: MediaKind, attachment: Attachment) -> Self {
        match kind {
            MediaKind::Image => self.image = Some(attachment),
            MediaKind::Video => self.video = Some(attachment),
            MediaKind::Audio => self.audio = Some(attachment),
        }
        self
    }

    pub fn attachments(&self) -> impl Iterator<Item = (MediaKind, &Attachment)> {
        [
            (MediaKind::Image, self.image.as_ref()),
            (MediaKind::Video, self.video.as_ref()),
            (MediaKind::Audio, self.audio.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, attachment)| attachment.map(|a| (kind, a)))
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.content.trim().is_empty() {
            return Err(ClientError::validation("Post content cannot be empty"));
        }
        if self.attachments().next().is_none() {
            return Err(ClientError::validation(
                "Attach at least one file (image, video or audio)",
            ));
        }
        for (kind, attachment) in self.attachments() {
            validate_attachment(kind, attachment)?;
        }
        Ok(())
    }
}

fn validate_attachment(kind: MediaKind, attachment: &Attachment) -> ClientResult<()> {
    match kind {
        MediaKind::Image if attachment.size() > MAX_IMAGE_BYTES => {
            Err(ClientError::validation("Images must be smaller than 5MB"))
        }
        MediaKind::Video if attachment.size() > MAX_VIDEO_BYTES => {
            Err(ClientError::validation("Videos must be smaller than 100MB"))
        }
        MediaKind::Video if !attachment.content_type.starts_with("video/") => {
            Err(ClientError::validation("Please choose a valid video file"))
        }
        MediaKind::Audio if attachment.size() > MAX_AUDIO_BYTES => {
            Err(ClientError::validation("Audio must be smaller than 10MB"))
        }
        _ => Ok(()),
    }
}

/// `<folder>/<unix-millis>-<random>-<file name>` inside the posts bucket
pub fn object_path(kind: MediaKind, file_name: &str, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}-{}-{}",
        kind.folder(),
        now.timestamp_millis(),
        &random[..8],
        file_name
    )
}

pub struct Composer {
    backend: Arc<dyn Backend>,
}

impl Composer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Upload the draft's attachments and create the post
    pub async fn publish(&self, author_id: Uuid, draft: &Draft) -> ClientResult<Post> {
        draft.validate()?;

        let mut post = NewPost {
            user_id: author_id,
            content: draft.content.trim().to_string(),
            image_url: None,
            video_url: None,
            audio_url: None,
            created_at: Utc::now(),
        };

        for (kind, attachment) in draft.attachments() {
            let path = object_path(kind, &attachment.file_name, Utc::now());
            log::debug!("Uploading {} ({} bytes) to {}", kind.as_str(), attachment.size(), path);
            let url = logged(
                "uploading file",
                self.backend
                    .upload_object(POSTS_BUCKET, &path, attachment.bytes.clone(), &attachment.content_type)
                    .await,
            )?;
            match kind {
                MediaKind::Image => post.image_url = Some(url),
                MediaKind::Video => post.video_url = Some(url),
                MediaKind::Audio => post.audio_url = Some(url),
            }
        }

        let created = logged("creating post", self.backend.insert_post(&post).await)?;
        log::info!("Published post {}", created.id);
        Ok(created)
    }
}
