//! Model staging.
//!
//! The detection model ships in a read-only asset root and must be copied to
//! writable storage before the engine can load it. `ModelStaging` performs the
//! copy as a cooperative task:
//! - filesystem asset roots copy directly in a single poll
//! - `http://` / `https://` roots fetch on a helper thread (feature:
//!   asset-fetch) and write once the bytes arrive
//!
//! Either way the staged file must be byte-identical to the asset; the task
//! compares SHA-256 digests before reporting success.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

use crate::task::TaskState;

/// Where the bundled model lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetLocation {
    File(PathBuf),
    Remote(String),
}

impl AssetLocation {
    /// Join `relative_path` onto an asset root.
    pub fn resolve(asset_root: &str, relative_path: &str) -> Self {
        if is_remote(asset_root) {
            AssetLocation::Remote(format!(
                "{}/{}",
                asset_root.trim_end_matches('/'),
                relative_path.trim_start_matches('/')
            ))
        } else {
            AssetLocation::File(Path::new(asset_root).join(relative_path))
        }
    }
}

impl std::fmt::Display for AssetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetLocation::File(path) => write!(f, "{}", path.display()),
            AssetLocation::Remote(url) => f.write_str(url),
        }
    }
}

fn is_remote(root: &str) -> bool {
    root.starts_with("http://") || root.starts_with("https://")
}

/// Copies the model into writable storage.
pub struct ModelStaging {
    source: AssetLocation,
    destination: PathBuf,
    state: TaskState,
    fetch: Option<Receiver<Result<Vec<u8>>>>,
}

impl ModelStaging {
    pub fn new(asset_root: &str, writable_dir: &Path, relative_path: &str) -> Self {
        Self {
            source: AssetLocation::resolve(asset_root, relative_path),
            destination: writable_dir.join(relative_path),
            state: if relative_path.trim().is_empty() {
                log::error!("model path is empty; detector will not be initialized");
                TaskState::Failed
            } else {
                TaskState::Pending
            },
            fetch: None,
        }
    }

    pub fn source(&self) -> &AssetLocation {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Path of the staged model once the task succeeded.
    pub fn staged_path(&self) -> Option<&Path> {
        (self.state == TaskState::Succeeded).then_some(self.destination.as_path())
    }

    /// Advance the task by one refresh.
    pub fn poll(&mut self) -> TaskState {
        let result = match self.state {
            TaskState::Pending => self.begin(),
            TaskState::Awaiting => self.check_fetch(),
            TaskState::Succeeded | TaskState::Failed => return self.state,
        };
        self.state = match result {
            Ok(state) => state,
            Err(err) => {
                log::error!("failed to stage model from {}: {:#}", self.source, err);
                TaskState::Failed
            }
        };
        self.state
    }

    fn begin(&mut self) -> Result<TaskState> {
        log::info!(
            "copying model from {} to {}",
            self.source,
            self.destination.display()
        );
        match &self.source {
            AssetLocation::File(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("failed to read model asset {}", path.display()))?;
                self.write_verified(&bytes)?;
                Ok(TaskState::Succeeded)
            }
            AssetLocation::Remote(url) => {
                self.fetch = Some(spawn_fetch(url.clone())?);
                Ok(TaskState::Awaiting)
            }
        }
    }

    fn check_fetch(&mut self) -> Result<TaskState> {
        let rx = self
            .fetch
            .as_ref()
            .ok_or_else(|| anyhow!("model fetch was not started"))?;
        let bytes = match rx.try_recv() {
            Ok(result) => result?,
            Err(TryRecvError::Empty) => return Ok(TaskState::Awaiting),
            Err(TryRecvError::Disconnected) => return Err(anyhow!("model fetch thread exited")),
        };
        self.fetch = None;
        self.write_verified(&bytes)?;
        Ok(TaskState::Succeeded)
    }

    fn write_verified(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.destination, bytes)
            .with_context(|| format!("failed to write {}", self.destination.display()))?;

        let expected: [u8; 32] = Sha256::digest(bytes).into();
        let staged = fs::read(&self.destination)
            .with_context(|| format!("failed to re-read {}", self.destination.display()))?;
        let actual: [u8; 32] = Sha256::digest(&staged).into();
        if expected != actual {
            return Err(anyhow!(
                "staged model digest {} does not match asset digest {}",
                hex::encode(actual),
                hex::encode(expected)
            ));
        }
        log::info!(
            "model copied to {} ({} bytes, sha256 {})",
            self.destination.display(),
            bytes.len(),
            hex::encode(actual)
        );
        Ok(())
    }
}

#[cfg(feature = "asset-fetch")]
fn spawn_fetch(url: String) -> Result<Receiver<Result<Vec<u8>>>> {
    use std::io::Read;

    let parsed = url::Url::parse(&url).with_context(|| format!("invalid model url {}", url))?;
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("model-fetch".to_string())
        .spawn(move || {
            let result = ureq::get(parsed.as_str())
                .call()
                .with_context(|| format!("fetch model from {}", parsed))
                .and_then(|response| {
                    let mut bytes = Vec::new();
                    response
                        .into_reader()
                        .read_to_end(&mut bytes)
                        .context("read model body")?;
                    if bytes.is_empty() {
                        return Err(anyhow!("empty model body from {}", parsed));
                    }
                    Ok(bytes)
                });
            let _ = tx.send(result);
        })
        .context("spawn model fetch thread")?;
    Ok(rx)
}

#[cfg(not(feature = "asset-fetch"))]
fn spawn_fetch(url: String) -> Result<Receiver<Result<Vec<u8>>>> {
    Err(anyhow!(
        "fetching {} requires the asset-fetch feature",
        url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_model_byte_identical() -> Result<()> {
        let assets = tempfile::tempdir()?;
        let data = tempfile::tempdir()?;
        fs::create_dir_all(assets.path().join("models"))?;
        let model: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        fs::write(assets.path().join("models/detect.tflite"), &model)?;

        let root = assets.path().to_str().unwrap().to_string();
        let mut task = ModelStaging::new(&root, data.path(), "models/detect.tflite");
        assert_eq!(task.staged_path(), None);
        assert_eq!(task.poll(), TaskState::Succeeded);

        let staged = task.staged_path().unwrap();
        assert_eq!(staged, data.path().join("models/detect.tflite"));
        assert_eq!(fs::read(staged)?, model);
        Ok(())
    }

    #[test]
    fn overwrites_stale_copy() -> Result<()> {
        let assets = tempfile::tempdir()?;
        let data = tempfile::tempdir()?;
        fs::write(assets.path().join("m.bin"), b"fresh")?;
        fs::write(data.path().join("m.bin"), b"stale model bytes")?;

        let root = assets.path().to_str().unwrap().to_string();
        let mut task = ModelStaging::new(&root, data.path(), "m.bin");
        assert_eq!(task.poll(), TaskState::Succeeded);
        assert_eq!(fs::read(data.path().join("m.bin"))?, b"fresh");
        Ok(())
    }

    #[test]
    fn missing_asset_fails_permanently() -> Result<()> {
        let assets = tempfile::tempdir()?;
        let data = tempfile::tempdir()?;
        let root = assets.path().to_str().unwrap().to_string();
        let mut task = ModelStaging::new(&root, data.path(), "absent.bin");
        assert_eq!(task.poll(), TaskState::Failed);
        assert_eq!(task.poll(), TaskState::Failed);
        assert!(task.staged_path().is_none());
        Ok(())
    }

    #[test]
    fn empty_model_path_fails_immediately() {
        let task = ModelStaging::new("assets", Path::new("data"), "  ");
        assert_eq!(task.state(), TaskState::Failed);
    }

    #[test]
    fn resolves_remote_roots() {
        assert_eq!(
            AssetLocation::resolve("https://cdn.example/models/", "/yolo.bin"),
            AssetLocation::Remote("https://cdn.example/models/yolo.bin".to_string())
        );
        assert_eq!(
            AssetLocation::resolve("assets", "yolo.bin"),
            AssetLocation::File(PathBuf::from("assets/yolo.bin"))
        );
    }

    #[cfg(not(feature = "asset-fetch"))]
    #[test]
    fn remote_roots_need_fetch_feature() {
        let data = tempfile::tempdir().unwrap();
        let mut task = ModelStaging::new("http://127.0.0.1:9/assets", data.path(), "m.bin");
        assert_eq!(task.poll(), TaskState::Failed);
    }
}
