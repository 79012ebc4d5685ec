use crate::error::Result;
use crate::storage_utils::DatasetStore;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// A pipeline step that persists exactly one dataset per execution timestamp.
///
/// `run` is idempotent-by-existence: if the output already exists the step is
/// skipped and later steps read the existing file.
#[async_trait]
pub trait Stage: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    fn output_path(&self) -> PathBuf;

    fn store(&self) -> &DatasetStore;

    /// Computes and writes the dataset. Only called when the output is absent.
    async fn generate(&self) -> Result<Self::Output>;

    async fn run(&self) -> Result<Option<Self::Output>> {
        let path = self.output_path();
        if self.store().exists(&path).await? {
            info!(
                "{} dataset already exists at '{}'. Using pre-existing dataset instead of generating new dataset. If you desire to generate a new dataset re-run without providing a timestamp.",
                self.name(),
                path.display()
            );
            return Ok(None);
        }

        info!("Generating {} dataset", self.name());
        let output = self.generate().await?;
        info!("{} dataset written to '{}'", self.name(), path.display());
        Ok(Some(output))
    }
}
