//! Append-only journal of deployment attempts.
//!
//! Layout: `<root>/<service>/<attempt-id>.json` with a
//! `<attempt-id>.digest` sidecar holding the SHA-256 of the JSON. Entries are
//! created once and never rewritten; reads verify the digest.

use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::domain::{ContentDigest, DeployError, DeploymentAttempt, Result};

#[derive(Debug, Clone)]
pub struct AttemptJournal {
    root: PathBuf,
}

impl AttemptJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_paths(&self, service_id: &str, id: Uuid) -> (PathBuf, PathBuf) {
        let dir = self.root.join(service_id);
        (dir.join(format!("{id}.json")), dir.join(format!("{id}.digest")))
    }

    /// Persist a finished attempt. Fails if the attempt was already recorded.
    pub fn record(&self, attempt: &DeploymentAttempt) -> Result<PathBuf> {
        let (json_path, digest_path) = self.entry_paths(&attempt.service_id, attempt.id);
        if let Some(dir) = json_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_vec_pretty(attempt)?;
        let digest = ContentDigest::from_bytes(&json);

        write_new(&json_path, &json)?;
        write_new(&digest_path, digest.as_str().as_bytes())?;
        Ok(json_path)
    }

    /// Read one attempt back, verifying its digest.
    pub fn read(&self, service_id: &str, id: Uuid) -> Result<DeploymentAttempt> {
        let (json_path, digest_path) = self.entry_paths(service_id, id);
        let json = std::fs::read(&json_path)?;
        let recorded = std::fs::read_to_string(&digest_path)?;
        let actual = ContentDigest::from_bytes(&json);
        if recorded.trim() != actual.as_str() {
            return Err(DeployError::DigestMismatch {
                expected: recorded.trim().to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(serde_json::from_slice(&json)?)
    }

    /// Every recorded attempt of a service, oldest first.
    pub fn history(&self, service_id: &str) -> Result<Vec<DeploymentAttempt>> {
        let dir = self.root.join(service_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut attempts = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            attempts.push(self.read(service_id, id)?);
        }
        attempts.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(attempts)
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttemptOutcome, HealthProbeResult};

    fn finished_attempt(sequence: u32) -> DeploymentAttempt {
        let mut attempt = DeploymentAttempt::new("chat-service", sequence);
        attempt.instance_id = Some("fake-1".to_string());
        attempt.record_probe(HealthProbeResult::not_running(1));
        attempt.transition(AttemptOutcome::Unhealthy).unwrap();
        attempt
    }

    #[test]
    fn test_record_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AttemptJournal::new(dir.path());
        let attempt = finished_attempt(1);

        let path = journal.record(&attempt).expect("record");
        assert!(path.starts_with(dir.path().join("chat-service")));

        let back = journal.read("chat-service", attempt.id).expect("read");
        assert_eq!(back, attempt);
    }

    #[test]
    fn test_entries_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AttemptJournal::new(dir.path());
        let attempt = finished_attempt(1);

        journal.record(&attempt).unwrap();
        let err = journal.record(&attempt).expect_err("second write");
        assert!(matches!(err, DeployError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn test_tampering_detected() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AttemptJournal::new(dir.path());
        let attempt = finished_attempt(1);
        let path = journal.record(&attempt).unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("unhealthy", "healthy");
        std::fs::write(&path, tampered).unwrap();

        let err = journal.read("chat-service", attempt.id).expect_err("tampered");
        assert!(matches!(err, DeployError::DigestMismatch { .. }));
    }

    #[test]
    fn test_history_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AttemptJournal::new(dir.path());
        let first = finished_attempt(1);
        let mut second = finished_attempt(2);
        second.transition(AttemptOutcome::Failed).unwrap();

        journal.record(&second).unwrap();
        journal.record(&first).unwrap();

        let history = journal.history("chat-service").unwrap();
        assert_eq!(
            history.iter().map(|a| a.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(journal.history("auth-service").unwrap().is_empty());
    }
}
