//! Artifact loading: verify, install, confirm, then consume the archive.
//!
//! Installing is one-shot at the file level. After a successful install the
//! archive (and its `.sha256` sidecar) is deleted, so a second run fails
//! with `ArtifactNotFound` instead of silently reusing a stale copy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_runtime::{ContainerRuntime, RuntimeError};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::domain::{ContentDigest, DeployError, Result};
use crate::obs::emit_artifact_installed;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Sidecar holding the expected digest of `artifact`.
pub fn digest_sidecar(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Installs packaged images into the local runtime.
#[derive(Clone)]
pub struct ArtifactLoader {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ArtifactLoader {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Verify and install `artifact`, confirm `image` is present, then
    /// delete the archive. Returns the installed image reference.
    pub async fn install(&self, artifact: &Path, image: &str) -> Result<String> {
        if !tokio::fs::try_exists(artifact).await? {
            return Err(DeployError::ArtifactNotFound(artifact.to_path_buf()));
        }

        verify_integrity(artifact).await?;

        let loaded = match self.runtime.load_image(artifact).await {
            Ok(images) => images,
            Err(RuntimeError::CommandFailed { stderr, .. }) => {
                return Err(DeployError::CorruptArtifact {
                    path: artifact.to_path_buf(),
                    reason: stderr,
                })
            }
            Err(RuntimeError::Parse(reason)) => {
                return Err(DeployError::CorruptArtifact {
                    path: artifact.to_path_buf(),
                    reason,
                })
            }
            Err(other) => return Err(other.into()),
        };
        debug!(artifact = %artifact.display(), images = ?loaded, "archive loaded");
        if !loaded.iter().any(|i| i == image) {
            warn!(
                expected = %image,
                loaded = ?loaded,
                "archive did not report the expected image; checking the runtime directly"
            );
        }

        if !self.runtime.image_exists(image).await? {
            return Err(DeployError::InstallVerificationFailed {
                image: image.to_string(),
            });
        }

        tokio::fs::remove_file(artifact).await?;
        let sidecar = digest_sidecar(artifact);
        if tokio::fs::try_exists(&sidecar).await? {
            tokio::fs::remove_file(&sidecar).await?;
        }
        info!(artifact = %artifact.display(), "removed installed artifact");

        emit_artifact_installed(image);
        Ok(image.to_string())
    }
}

/// Check the archive against its `.sha256` sidecar when present, otherwise
/// require a non-empty gzip or tar stream.
pub async fn verify_integrity(artifact: &Path) -> Result<()> {
    let corrupt = |reason: String| DeployError::CorruptArtifact {
        path: artifact.to_path_buf(),
        reason,
    };

    let sidecar = digest_sidecar(artifact);
    if tokio::fs::try_exists(&sidecar).await? {
        let recorded = tokio::fs::read_to_string(&sidecar).await?;
        // `sha256sum` format: "<hex>  <file name>".
        let expected = recorded
            .split_whitespace()
            .next()
            .and_then(ContentDigest::parse)
            .ok_or_else(|| corrupt(format!("unreadable digest in {}", sidecar.display())))?;
        let actual = digest_file(artifact).await?;
        if actual != expected {
            return Err(corrupt(format!(
                "sha256 mismatch: expected {}, got {}",
                expected.short(),
                actual.short()
            )));
        }
        return Ok(());
    }

    let mut file = tokio::fs::File::open(artifact).await?;
    let mut header = vec![0u8; TAR_MAGIC_OFFSET + TAR_MAGIC.len()];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);

    if header.is_empty() {
        return Err(corrupt("archive is empty".to_string()));
    }
    let gzip = header.starts_with(&GZIP_MAGIC);
    let tar = header.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC;
    if !gzip && !tar {
        return Err(corrupt("not a gzip or tar archive".to_string()));
    }
    Ok(())
}

async fn digest_file(path: &Path) -> Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentDigest::from_hasher(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_runtime::fakes::MemoryRuntime;

    const IMAGE: &str = "chat-service:latest";

    fn gzip_bytes() -> Vec<u8> {
        let mut bytes = vec![0x1f, 0x8b, 0x08, 0x00];
        bytes.extend_from_slice(&[0u8; 32]);
        bytes
    }

    fn tar_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 512];
        bytes[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5].copy_from_slice(b"ustar");
        bytes
    }

    fn loader_with_image() -> (Arc<MemoryRuntime>, ArtifactLoader) {
        let runtime = Arc::new(MemoryRuntime::new());
        runtime.set_archive_images(vec![IMAGE.to_string()]);
        let loader = ArtifactLoader::new(runtime.clone());
        (runtime, loader)
    }

    #[tokio::test]
    async fn test_install_consumes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chat-service.tar.gz");
        std::fs::write(&archive, gzip_bytes()).unwrap();

        let (runtime, loader) = loader_with_image();
        let image = loader.install(&archive, IMAGE).await.expect("install");
        assert_eq!(image, IMAGE);
        assert!(runtime.has_image(IMAGE));
        assert!(!archive.exists());

        let err = loader.install(&archive, IMAGE).await.expect_err("second run");
        assert!(matches!(err, DeployError::ArtifactNotFound(p) if p == archive));
    }

    #[tokio::test]
    async fn test_plain_tar_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chat-service.tar");
        std::fs::write(&archive, tar_bytes()).unwrap();
        verify_integrity(&archive).await.expect("tar archive");
    }

    #[tokio::test]
    async fn test_empty_and_garbage_archives_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.tar");
        std::fs::write(&empty, b"").unwrap();
        let garbage = dir.path().join("garbage.tar");
        std::fs::write(&garbage, b"definitely not an archive").unwrap();

        for path in [&empty, &garbage] {
            let err = verify_integrity(path).await.expect_err("corrupt");
            assert!(matches!(err, DeployError::CorruptArtifact { .. }));
        }
    }

    #[tokio::test]
    async fn test_sidecar_digest_checked() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chat-service.tar.gz");
        let bytes = gzip_bytes();
        std::fs::write(&archive, &bytes).unwrap();

        let good = ContentDigest::from_bytes(&bytes);
        std::fs::write(
            digest_sidecar(&archive),
            format!("{good}  chat-service.tar.gz\n"),
        )
        .unwrap();
        verify_integrity(&archive).await.expect("matching digest");

        let wrong = ContentDigest::from_bytes(b"something else");
        std::fs::write(digest_sidecar(&archive), wrong.as_str()).unwrap();
        let err = verify_integrity(&archive).await.expect_err("mismatch");
        assert!(err.to_string().contains("sha256 mismatch"));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_not_loaded_or_removed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chat-service.tar.gz");
        std::fs::write(&archive, b"junk").unwrap();

        let (runtime, loader) = loader_with_image();
        let err = loader.install(&archive, IMAGE).await.expect_err("corrupt");
        assert!(matches!(err, DeployError::CorruptArtifact { .. }));
        assert!(archive.exists());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_after_load_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("chat-service.tar.gz");
        std::fs::write(&archive, gzip_bytes()).unwrap();

        let (runtime, loader) = loader_with_image();
        runtime.discard_loaded_images();
        let err = loader.install(&archive, IMAGE).await.expect_err("absent");
        assert!(matches!(
            err,
            DeployError::InstallVerificationFailed { image } if image == IMAGE
        ));
        assert!(archive.exists());
    }
}
