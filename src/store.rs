use crate::convo::{CallOutput, Item, Transcript};
use crate::error::StoreError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

/// Persistence boundary between turns: the ordered conversation record plus
/// the captured screenshot blobs, keyed by a session/branch identifier.
/// Implementations are best-effort sinks; the orchestrator never fails a
/// turn over a store error.
#[async_trait]
pub trait TrajectoryStore: Send + Sync {
    async fn save_transcript(
        &self,
        session: &str,
        transcript: &Transcript,
    ) -> Result<(), StoreError>;

    /// `seq` is `None` for the pre-action start state.
    async fn save_screenshot(
        &self,
        session: &str,
        seq: Option<usize>,
        png_b64: &str,
    ) -> Result<(), StoreError>;
}

pub struct NullStore;

#[async_trait]
impl TrajectoryStore for NullStore {
    async fn save_transcript(
        &self,
        _session: &str,
        _transcript: &Transcript,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_screenshot(
        &self,
        _session: &str,
        _seq: Option<usize>,
        _png_b64: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Filesystem store: `{base}/{session}/trajectory.json` plus numbered PNGs.
/// Screenshot payloads are elided from the JSON record; the blobs carry
/// them.
pub struct DiskStore {
    base_dir: PathBuf,
}

impl DiskStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base_dir: base.as_ref().to_path_buf(),
        }
    }

    fn sanitized(transcript: &Transcript) -> Vec<Item> {
        transcript
            .items()
            .iter()
            .map(|item| match item {
                Item::ComputerCallOutput {
                    call_id,
                    acknowledged_safety_checks,
                    output: CallOutput::InputImage { current_url, .. },
                } => Item::ComputerCallOutput {
                    call_id: call_id.clone(),
                    acknowledged_safety_checks: acknowledged_safety_checks.clone(),
                    output: CallOutput::InputImage {
                        image_url: "<image omitted>".into(),
                        current_url: current_url.clone(),
                    },
                },
                other => other.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl TrajectoryStore for DiskStore {
    async fn save_transcript(
        &self,
        session: &str,
        transcript: &Transcript,
    ) -> Result<(), StoreError> {
        let dir = self.base_dir.join(session);
        async_fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(&Self::sanitized(transcript))?;
        async_fs::write(dir.join("trajectory.json"), json).await?;
        Ok(())
    }

    async fn save_screenshot(
        &self,
        session: &str,
        seq: Option<usize>,
        png_b64: &str,
    ) -> Result<(), StoreError> {
        let dir = self.base_dir.join(session);
        async_fs::create_dir_all(&dir).await?;
        let png = B64.decode(png_b64)?;
        let name = match seq {
            Some(s) => format!("step_{:03}.png", s),
            None => "start.png".to_string(),
        };
        async_fs::write(dir.join(name), &png).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoid::nanoid;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("waldo-store-{}", nanoid!()))
    }

    #[tokio::test]
    async fn writes_sanitized_trajectory_and_blobs() {
        let base = scratch_dir();
        let store = DiskStore::new(&base);

        let mut t = Transcript::opening("click the button");
        t.push(Item::ComputerCallOutput {
            call_id: "c1".into(),
            acknowledged_safety_checks: vec![],
            output: CallOutput::screenshot("aGVsbG8=", Some("https://example.com".into())),
        });

        store.save_transcript("run-a", &t).await.unwrap();
        store
            .save_screenshot("run-a", Some(0), "aGVsbG8=")
            .await
            .unwrap();
        store.save_screenshot("run-a", None, "aGVsbG8=").await.unwrap();

        let json = async_fs::read_to_string(base.join("run-a/trajectory.json"))
            .await
            .unwrap();
        assert!(json.contains("<image omitted>"));
        assert!(!json.contains("base64"));
        assert!(json.contains("https://example.com"));

        let png = async_fs::read(base.join("run-a/step_000.png")).await.unwrap();
        assert_eq!(png, b"hello");
        assert!(base.join("run-a/start.png").exists());

        let _ = async_fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn invalid_base64_is_a_decode_error() {
        let base = scratch_dir();
        let store = DiskStore::new(&base);
        let err = store
            .save_screenshot("run-b", Some(0), "not base64!!!")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        let _ = async_fs::remove_dir_all(&base).await;
    }
}
