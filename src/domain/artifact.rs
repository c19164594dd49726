use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which pipeline mode produced an artifact; fixes its file naming and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    #[serde(alias = "image")]
    StillImage,
    #[serde(alias = "frame")]
    StreamFrame,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::StillImage => "detected_image_",
            ArtifactKind::StreamFrame => "detected_frame_",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::StillImage => "png",
            ArtifactKind::StreamFrame => "jpg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ArtifactKind::StillImage => "image/png",
            ArtifactKind::StreamFrame => "image/jpeg",
        }
    }

    pub fn file_name(self, sequence: u64) -> String {
        format!("{}{}.{}", self.prefix(), sequence, self.extension())
    }

    /// Sequence number embedded in `name` if it follows this kind's pattern.
    pub fn parse_sequence(self, name: &str) -> Option<u64> {
        let digits = name
            .strip_prefix(self.prefix())?
            .strip_suffix(self.extension())?
            .strip_suffix('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Kind whose naming pattern `name` matches.
    pub fn classify(name: &str) -> Option<(ArtifactKind, u64)> {
        [ArtifactKind::StillImage, ArtifactKind::StreamFrame]
            .into_iter()
            .find_map(|kind| kind.parse_sequence(name).map(|seq| (kind, seq)))
    }
}

/// How `latest()` decides which artifact is the most recent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatestScope {
    /// Newest matching file in the output directory, whoever wrote it.
    #[default]
    Directory,
    /// Newest artifact written by this store during the current session.
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub sequence: u64,
    pub path: PathBuf,
}

impl StoredArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.kind.file_name(self.sequence))
    }
}
