use serde::{Deserialize, Serialize};

/// Emoji flag bit: the emoji is animated.
pub const EMOJI_FLAG_ANIMATED: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub discriminator: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerKind {
    Server,
    Group,
    DirectMessage,
}

impl ServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerKind::Server => "server",
            ServerKind::Group => "group",
            ServerKind::DirectMessage => "dm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("server") {
            Some(ServerKind::Server)
        } else if value.eq_ignore_ascii_case("group") {
            Some(ServerKind::Group)
        } else if value.eq_ignore_ascii_case("dm") {
            Some(ServerKind::DirectMessage)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub kind: ServerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: u64,
    pub server_id: u64,
    pub name: String,
    pub parent_id: Option<u64>,
    pub position: Option<i64>,
    pub topic: Option<String>,
    pub nsfw: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub sender_id: u64,
    pub channel_id: u64,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub edit_timestamp: Option<i64>,
    pub replied_to_id: Option<u64>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reactions: Vec<Reaction>,
    pub poll: Option<Poll>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: u64,
    pub message_id: u64,
    pub name: String,
    pub mime_type: Option<String>,
    pub normalized_url: String,
    pub download_url: String,
    pub size: u64,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// An opaque embed payload, stored verbatim as submitted by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Embed {
    pub json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji_id: Option<u64>,
    pub emoji_name: Option<String>,
    pub emoji_flags: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub question: String,
    pub multi_select: bool,
    pub expiry_timestamp: i64,
    pub answers: Vec<PollAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollAnswer {
    pub answer_id: i64,
    pub text: String,
    pub emoji_id: Option<u64>,
    pub emoji_name: Option<String>,
    pub emoji_flags: Option<i64>,
}

/// State machine of a download item. HTTP failures keep their status code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadStatus {
    Enqueued,
    Downloading,
    Success,
    GenericError,
    SizeCapSkipped,
    HttpError(u16),
}

const HTTP_STATUS_BASE: i64 = 1000;

impl DownloadStatus {
    pub fn to_code(self) -> i64 {
        match self {
            DownloadStatus::Enqueued => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Success => 2,
            DownloadStatus::GenericError => 3,
            DownloadStatus::SizeCapSkipped => 4,
            DownloadStatus::HttpError(code) => HTTP_STATUS_BASE + code as i64,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(DownloadStatus::Enqueued),
            1 => Some(DownloadStatus::Downloading),
            2 => Some(DownloadStatus::Success),
            3 => Some(DownloadStatus::GenericError),
            4 => Some(DownloadStatus::SizeCapSkipped),
            c if (HTTP_STATUS_BASE..HTTP_STATUS_BASE + 1000).contains(&c) => {
                Some(DownloadStatus::HttpError((c - HTTP_STATUS_BASE) as u16))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadItem {
    pub normalized_url: String,
    pub download_url: String,
    pub status: DownloadStatus,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// Terminal result of one download attempt, as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    SkippedTooLarge {
        size: Option<u64>,
    },
    HttpError(u16),
    Failed,
}

impl DownloadOutcome {
    pub fn status(&self) -> DownloadStatus {
        match self {
            DownloadOutcome::Success { .. } => DownloadStatus::Success,
            DownloadOutcome::SkippedTooLarge { .. } => DownloadStatus::SizeCapSkipped,
            DownloadOutcome::HttpError(code) => DownloadStatus::HttpError(*code),
            DownloadOutcome::Failed => DownloadStatus::GenericError,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadBucket {
    pub count: u64,
    pub total_bytes: u64,
}

/// Snapshot of the download queue, bucketed by status family.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadStatistics {
    pub enqueued: DownloadBucket,
    pub successful: DownloadBucket,
    pub failed: DownloadBucket,
    pub skipped: DownloadBucket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_kind_parses_case_insensitively() {
        assert_eq!(ServerKind::parse("SERVER"), Some(ServerKind::Server));
        assert_eq!(ServerKind::parse("dm"), Some(ServerKind::DirectMessage));
        assert_eq!(ServerKind::parse("Group"), Some(ServerKind::Group));
        assert_eq!(ServerKind::parse("guild"), None);
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            DownloadStatus::Enqueued,
            DownloadStatus::Downloading,
            DownloadStatus::Success,
            DownloadStatus::GenericError,
            DownloadStatus::SizeCapSkipped,
            DownloadStatus::HttpError(404),
            DownloadStatus::HttpError(503),
        ] {
            assert_eq!(DownloadStatus::from_code(status.to_code()), Some(status));
        }
        assert_eq!(DownloadStatus::from_code(999), None);
    }
}
