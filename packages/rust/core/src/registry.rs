//! In-process registry of running crawls, keyed by run id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use marketcrawl_crawler::StopSignal;
use marketcrawl_shared::{MarketCrawlError, Result, RunId, RunParameters, RunStatus};

use crate::controller::{RunController, RunState};

struct RunHandle {
    stop: StopSignal,
    task: JoinHandle<RunState>,
}

/// Launches runs as independent tasks and keeps their stop signals.
pub struct RunRegistry {
    controller: RunController,
    runs: Mutex<HashMap<RunId, RunHandle>>,
}

impl RunRegistry {
    pub fn new(controller: RunController) -> Self {
        Self {
            controller,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `params` and start the run in the background.
    pub fn start(&self, run_id: RunId, params: RunParameters) -> Result<()> {
        params.validate()?;

        let mut runs = self.lock();
        if runs.contains_key(&run_id) {
            return Err(MarketCrawlError::validation(format!(
                "run {run_id} is already registered"
            )));
        }

        let stop = StopSignal::new();
        let controller = self.controller.clone();
        let task = {
            let stop = stop.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move { controller.run(&run_id, &params, &stop).await })
        };

        info!(%run_id, "run launched");
        runs.insert(run_id, RunHandle { stop, task });
        Ok(())
    }

    /// Ask a run to stop. Returns `false` for an unknown run.
    pub fn stop(&self, run_id: &RunId) -> bool {
        match self.lock().get(run_id) {
            Some(handle) => {
                info!(%run_id, "stop requested");
                handle.stop.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every registered run.
    pub fn stop_all(&self) {
        for handle in self.lock().values() {
            handle.stop.stop();
        }
    }

    pub fn is_running(&self, run_id: &RunId) -> bool {
        self.lock()
            .get(run_id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Ids of runs that have not reached a terminal state yet.
    pub fn running(&self) -> Vec<RunId> {
        self.lock()
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Wait for a run to end and unregister it. `None` for an unknown run.
    pub async fn wait(&self, run_id: &RunId) -> Option<RunState> {
        let handle = self.lock().remove(run_id)?;
        let state = match handle.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(%run_id, error = %e, "run task did not complete");
                RunState {
                    status: RunStatus::Error,
                    collected_links: 0,
                    collected_items: 0,
                    filename: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Some(state)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use marketcrawl_shared::{CrawlConfig, DelayRange};
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn registry(tag: &str) -> (RunRegistry, std::path::PathBuf) {
        let config = CrawlConfig {
            page_delay: DelayRange::ZERO,
            batch_delay: DelayRange::ZERO,
            ..CrawlConfig::default()
        };
        let dir = std::env::temp_dir().join(format!("mc-registry-{tag}-{}", uuid::Uuid::now_v7()));
        (RunRegistry::new(RunController::new(config, &dir)), dir)
    }

    fn params(name: &str, categories: Vec<&str>) -> RunParameters {
        RunParameters {
            name: name.into(),
            categories: categories.iter().map(|c| c.parse().unwrap()).collect(),
            cities: Vec::new(),
            proxies: Vec::new(),
            max_workers: 2,
            price_split: false,
        }
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let (registry, _) = registry("invalid");
        let err = registry.start(RunId::new(), params("  ", vec![])).unwrap_err();
        assert!(matches!(err, MarketCrawlError::Validation { .. }));
        assert!(registry.running().is_empty());
    }

    #[tokio::test]
    async fn duplicate_run_id_is_rejected() {
        let (registry, dir) = registry("dup");
        let id = RunId::new();
        registry.start(id.clone(), params("a", vec![])).unwrap();
        assert!(registry.start(id.clone(), params("b", vec![])).is_err());
        registry.wait(&id).await.unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn runs_finish_independently() {
        let (registry, dir) = registry("parallel");
        let first = RunId::new();
        let second = RunId::new();
        registry.start(first.clone(), params("first", vec![])).unwrap();
        registry.start(second.clone(), params("second", vec![])).unwrap();

        let a = registry.wait(&first).await.unwrap();
        let b = registry.wait(&second).await.unwrap();
        assert_eq!(a.status, RunStatus::Finished);
        assert_eq!(b.status, RunStatus::Finished);
        assert!(registry.wait(&first).await.is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn stop_ends_run_as_stopped() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<p>slow</p>")
                    .set_delay(std::time::Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let (registry, dir) = registry("stop");
        let id = RunId::new();
        let category = format!("{}/c/rings", server.uri());
        registry
            .start(id.clone(), params("stoppable", vec![&category, &category, &category]))
            .unwrap();

        assert!(registry.is_running(&id));
        assert!(registry.stop(&id));
        assert!(!registry.stop(&RunId::new()));

        let state = registry.wait(&id).await.unwrap();
        assert_eq!(state.status, RunStatus::Stopped);
        assert_eq!(state.collected_items, 0);

        let _ = std::fs::remove_dir_all(dir);
    }
}
