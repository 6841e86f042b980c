//! Run progress sink: persists counts and drives a terminal spinner.

use std::sync::Arc;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use marketcrawl_core::ProgressStore;
use marketcrawl_shared::{Result, RunId};
use marketcrawl_storage::Storage;

/// Writes each progress update to storage and shows it on a spinner.
pub(crate) struct StoreProgress {
    storage: Arc<Storage>,
    spinner: ProgressBar,
}

impl StoreProgress {
    pub(crate) fn new(storage: Arc<Storage>, name: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.set_message(format!("{name}: estimating catalog"));
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { storage, spinner }
    }

    pub(crate) fn stopping(&self) {
        self.spinner
            .set_message("stopping, waiting for in-flight requests");
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

#[async_trait]
impl ProgressStore for StoreProgress {
    async fn update(&self, run_id: &RunId, collected_links: u64, collected_items: u64) -> Result<()> {
        self.storage
            .update_progress(run_id, collected_links, collected_items)
            .await?;
        self.spinner
            .set_message(format!("links: {collected_links}  items: {collected_items}"));
        Ok(())
    }
}
