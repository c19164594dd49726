use image::{codecs::jpeg::JpegEncoder, ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::domain::{
    artifact::{ArtifactKind, LatestScope, StoredArtifact},
    errors::{DomainError, DomainResult},
    frame::Raster,
};

const JPEG_QUALITY: u8 = 90;

/// Per-session counter. Starts at 1 and only advances on [`commit`](Self::commit).
#[derive(Debug, Default)]
struct SequenceGenerator {
    last: u64,
    last_written: Option<StoredArtifact>,
}

impl SequenceGenerator {
    fn peek(&self) -> u64 {
        self.last + 1
    }

    fn commit(&mut self, artifact: StoredArtifact) {
        self.last = artifact.sequence;
        self.last_written = Some(artifact);
    }
}

/// Sequence-numbered annotated images of one [`ArtifactKind`] in one directory.
pub struct ArtifactStore {
    dir: PathBuf,
    kind: ArtifactKind,
    scope: LatestScope,
    sequence: Mutex<SequenceGenerator>,
}

/// An opened artifact ready to be streamed to a client.
#[derive(Debug)]
pub struct ArtifactDownload {
    pub file_name: String,
    pub mime: &'static str,
    pub file: File,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, kind: ArtifactKind, scope: LatestScope) -> Self {
        Self {
            dir: dir.into(),
            kind,
            scope,
            sequence: Mutex::new(SequenceGenerator::default()),
        }
    }

    pub fn persist(&self, raster: &impl Raster) -> DomainResult<StoredArtifact> {
        let mut sequence = self
            .sequence
            .lock()
            .map_err(|_| DomainError::Write("sequence lock poisoned".into()))?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| DomainError::Write(format!("create {}: {e}", self.dir.display())))?;

        let next = sequence.peek();
        let name = self.kind.file_name(next);
        let path = self.dir.join(&name);
        let staging = self.dir.join(format!(".{name}.tmp"));

        if let Err(e) = self.encode_to(&staging, raster.rgb()) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        fs::rename(&staging, &path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            DomainError::Write(format!("rename into {}: {e}", path.display()))
        })?;

        let artifact = StoredArtifact { kind: self.kind, sequence: next, path };
        sequence.commit(artifact.clone());
        debug!(file = %artifact.path.display(), "artifact persisted");
        Ok(artifact)
    }

    fn encode_to(&self, path: &Path, image: &RgbImage) -> DomainResult<()> {
        let write_err = |e: &dyn std::fmt::Display| DomainError::Write(format!("{}: {e}", path.display()));
        let file = File::create(path).map_err(|e| write_err(&e))?;
        let mut out = BufWriter::new(file);
        match self.kind {
            ArtifactKind::StillImage => image
                .write_to(&mut out, ImageFormat::Png)
                .map_err(|e| write_err(&e))?,
            ArtifactKind::StreamFrame => JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
                .encode_image(image)
                .map_err(|e| write_err(&e))?,
        }
        out.flush().map_err(|e| write_err(&e))?;
        out.get_ref().sync_all().map_err(|e| write_err(&e))?;
        Ok(())
    }

    pub fn latest(&self) -> DomainResult<StoredArtifact> {
        match self.scope {
            LatestScope::Session => self
                .sequence
                .lock()
                .ok()
                .and_then(|s| s.last_written.clone())
                .ok_or_else(|| self.nothing_yet()),
            LatestScope::Directory => self.scan_latest(),
        }
    }

    fn scan_latest(&self) -> DomainResult<StoredArtifact> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(self.nothing_yet()),
            Err(e) => return Err(DomainError::NotFound(format!("{}: {e}", self.dir.display()))),
        };

        let mut best: Option<(SystemTime, u64, PathBuf)> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(sequence) = self.kind.parse_sequence(&name.to_string_lossy()) else {
                continue;
            };
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Some(stamp) = meta.created().or_else(|_| meta.modified()).ok() else {
                warn!(file = ?name, "no timestamp available, skipping");
                continue;
            };
            let newer = match &best {
                None => true,
                Some((t, s, _)) => (stamp, sequence) > (*t, *s),
            };
            if newer {
                best = Some((stamp, sequence, entry.path()));
            }
        }

        best.map(|(_, sequence, path)| StoredArtifact { kind: self.kind, sequence, path })
            .ok_or_else(|| self.nothing_yet())
    }

    /// Looks up an artifact by file name, refusing anything outside the naming pattern.
    pub fn resolve(&self, file_name: &str) -> DomainResult<StoredArtifact> {
        let sequence = self.kind.parse_sequence(file_name).ok_or_else(|| {
            DomainError::InvalidInput(format!("{file_name} is not a {} artifact name", self.kind.prefix()))
        })?;
        let path = self.dir.join(file_name);
        if !path.is_file() {
            return Err(DomainError::NotFound(format!("{file_name} does not exist")));
        }
        Ok(StoredArtifact { kind: self.kind, sequence, path })
    }

    pub fn open_for_download(&self, artifact: &StoredArtifact) -> DomainResult<ArtifactDownload> {
        let file = File::open(&artifact.path).map_err(|e| {
            info!(file = %artifact.path.display(), "artifact vanished before download");
            DomainError::NotFound(format!("{}: {e}", artifact.file_name()))
        })?;
        Ok(ArtifactDownload {
            file_name: artifact.file_name(),
            mime: artifact.kind.mime(),
            file,
        })
    }

    fn nothing_yet(&self) -> DomainError {
        DomainError::NotFound(format!(
            "nothing detected yet: no {}*.{} in {}",
            self.kind.prefix(),
            self.kind.extension(),
            self.dir.display()
        ))
    }
}
