//! `MediaStore`: a small interface over "persist this PNG somewhere
//! fetchable by URL" so the forge's dedicated media branch is one
//! implementation and a local-filesystem-backed implementation can stand
//! in for tests (§9 Design Notes, "Screenshot upload coupling").

use crate::adapters::ForgeDyn;
use crate::error::Result;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

pub trait MediaStore: Send + Sync + 'static {
    fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

pub trait MediaStoreDyn: Send + Sync + 'static {
    fn upload<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>>;
}

impl<T: MediaStore> MediaStoreDyn for T {
    fn upload<'a>(
        &'a self,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(MediaStore::upload(self, filename, bytes))
    }
}

/// Uploads to the code forge's dedicated media branch.
pub struct ForgeMediaStore {
    forge: Arc<dyn ForgeDyn>,
}

impl ForgeMediaStore {
    pub fn new(forge: Arc<dyn ForgeDyn>) -> Self {
        Self { forge }
    }
}

impl MediaStore for ForgeMediaStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        self.forge.upload_to_media_branch(filename, bytes).await
    }
}

/// Writes to a local directory and returns a `file://` URL; stands in for
/// the forge-backed store in tests and local development.
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl MediaStore for LocalMediaStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(format!("file://{}", path.display()))
    }
}
