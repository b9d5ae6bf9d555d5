//! Batch scheduler (C9): drives keyword sets through the ingest pipeline
//! with bounded concurrency, per-keyword retries and task accounting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::acquisition::{AcquireOptions, KeywordIngestor};
use crate::domain::{
    CancelToken, CrawlTask, PharmaOpsError, ProgressEvent, ProgressPhase, Result, TaskStatus,
};
use crate::storage::{TaskRepository, WatchListRepository};
use crate::upstream::{RetryConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent keywords per task.
    pub concurrency: usize,
    /// Retries per keyword on recoverable errors (attempts = retries + 1).
    pub keyword_retries: usize,
    /// Hard budget for one keyword's work, endpoint and browser passes
    /// included.
    pub keyword_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            keyword_retries: 2,
            keyword_timeout: Duration::from_secs(180),
        }
    }
}

pub struct BatchScheduler {
    ingestor: Arc<dyn KeywordIngestor>,
    tasks: Arc<dyn TaskRepository>,
    watch_list: Arc<dyn WatchListRepository>,
    config: SchedulerConfig,
    /// Cancel tokens for in-flight tasks.
    registry: Arc<RwLock<HashMap<Uuid, CancelToken>>>,
    progress: broadcast::Sender<ProgressEvent>,
}

impl BatchScheduler {
    pub fn new(
        ingestor: Arc<dyn KeywordIngestor>,
        tasks: Arc<dyn TaskRepository>,
        watch_list: Arc<dyn WatchListRepository>,
        config: SchedulerConfig,
    ) -> Self {
        let (progress, _) = broadcast::channel(256);
        Self {
            ingestor,
            tasks,
            watch_list,
            config,
            registry: Arc::new(RwLock::new(HashMap::new())),
            progress,
        }
    }

    /// Progress feed for the operator console.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Create a task for the keyword set and start running it.
    pub async fn enqueue(
        self: &Arc<Self>,
        name: &str,
        keywords: Vec<String>,
        opts: AcquireOptions,
    ) -> Result<Uuid> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(PharmaOpsError::validation(
                "batch requires at least one keyword",
            ));
        }

        let task = CrawlTask {
            id: Uuid::new_v4(),
            name: name.to_string(),
            keywords: keywords.clone(),
            status: TaskStatus::Pending,
            total_keywords: keywords.len() as i64,
            completed_keywords: 0,
            failed_keywords: 0,
            total_items: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            created_at: Utc::now(),
        };
        self.tasks.create_task(&task).await?;

        let cancel = CancelToken::new();
        self.registry.write().await.insert(task.id, cancel.clone());

        let scheduler = Arc::clone(self);
        let task_id = task.id;
        tokio::spawn(async move {
            scheduler
                .run_task(task_id, keywords, opts, cancel, false)
                .await;
        });

        info!(task_id = %task_id, "batch task enqueued");
        Ok(task_id)
    }

    /// Run every enabled watch-list keyword as one task, most urgent first.
    /// Returns None when the watch list is empty.
    pub async fn enqueue_watch_list(self: &Arc<Self>, opts: AcquireOptions) -> Result<Option<Uuid>> {
        let items = self.watch_list.list_watch_items(true).await?;
        if items.is_empty() {
            return Ok(None);
        }

        let keywords: Vec<String> = items.into_iter().map(|i| i.keyword).collect();

        let task = CrawlTask {
            id: Uuid::new_v4(),
            name: "watch-list".to_string(),
            keywords: keywords.clone(),
            status: TaskStatus::Pending,
            total_keywords: keywords.len() as i64,
            completed_keywords: 0,
            failed_keywords: 0,
            total_items: 0,
            started_at: None,
            completed_at: None,
            last_error: None,
            created_at: Utc::now(),
        };
        self.tasks.create_task(&task).await?;

        let cancel = CancelToken::new();
        self.registry.write().await.insert(task.id, cancel.clone());

        let scheduler = Arc::clone(self);
        let task_id = task.id;
        tokio::spawn(async move {
            scheduler
                .run_task(task_id, keywords, opts, cancel, true)
                .await;
        });

        Ok(Some(task_id))
    }

    /// Cancel every in-flight task; used on process shutdown.
    pub async fn shutdown(&self) {
        let registry = self.registry.read().await;
        for (task_id, token) in registry.iter() {
            info!(task_id = %task_id, "cancelling task for shutdown");
            token.cancel();
        }
    }

    /// Cancel a task. In-flight keywords observe the token at their next
    /// suspension point.
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        if let Some(token) = self.registry.read().await.get(&task_id) {
            token.cancel();
            info!(task_id = %task_id, "task cancellation requested");
            return Ok(());
        }

        match self.tasks.get_task(task_id).await? {
            Some(task) if task.status.is_terminal() => Ok(()),
            Some(_) => {
                // Known but not registered here: mark it cancelled directly.
                self.tasks.finish_task(task_id, TaskStatus::Cancelled).await
            }
            None => Err(PharmaOpsError::TaskNotFound(task_id.to_string())),
        }
    }

    async fn run_task(
        &self,
        task_id: Uuid,
        keywords: Vec<String>,
        opts: AcquireOptions,
        cancel: CancelToken,
        touch_watch: bool,
    ) {
        if let Err(e) = self.tasks.mark_running(task_id).await {
            error!(task_id = %task_id, "failed to mark task running: {}", e);
        }

        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: self.config.keyword_retries + 1,
            ..RetryConfig::default()
        });

        stream::iter(keywords)
            .for_each_concurrent(self.config.concurrency.max(1), |keyword| {
                let retry = retry.clone();
                let opts = opts.clone();
                let cancel = cancel.clone();
                async move {
                    // Keywords not yet started when the task is cancelled are
                    // neither completed nor failed.
                    if cancel.is_cancelled() {
                        return;
                    }

                    self.emit(task_id, &keyword, ProgressPhase::Endpoint, true, 0);

                    let outcome = tokio::time::timeout(self.config.keyword_timeout, async {
                        retry
                            .execute(|| {
                                let opts = opts.clone();
                                let cancel = cancel.clone();
                                let keyword = keyword.clone();
                                async move {
                                    self.ingestor
                                        .ingest_keyword(&keyword, &opts, &cancel)
                                        .await
                                }
                            })
                            .await
                    })
                    .await;

                    match outcome {
                        Ok(Ok(report)) => {
                            if let Err(e) = self
                                .tasks
                                .record_keyword_success(task_id, report.prices_written as i64)
                                .await
                            {
                                error!(task_id = %task_id, "accounting update failed: {}", e);
                            }
                            if touch_watch {
                                if let Err(e) =
                                    self.watch_list.touch_watch_item(&keyword, Utc::now()).await
                                {
                                    warn!("watch-list touch failed: {}", e);
                                }
                            }
                            self.emit(
                                task_id,
                                &keyword,
                                ProgressPhase::Done,
                                true,
                                report.prices_written,
                            );
                        }
                        Ok(Err(PharmaOpsError::Cancelled)) => {
                            // Aborted cleanly; counted in neither bucket.
                        }
                        Ok(Err(e)) => {
                            warn!(task_id = %task_id, keyword = %keyword, "keyword failed: {}", e);
                            if let Err(e) = self
                                .tasks
                                .record_keyword_failure(task_id, &e.to_string())
                                .await
                            {
                                error!(task_id = %task_id, "accounting update failed: {}", e);
                            }
                            self.emit(task_id, &keyword, ProgressPhase::Done, false, 0);
                        }
                        Err(_) => {
                            let message = format!(
                                "keyword timed out after {:?}",
                                self.config.keyword_timeout
                            );
                            warn!(task_id = %task_id, keyword = %keyword, "{}", message);
                            if let Err(e) =
                                self.tasks.record_keyword_failure(task_id, &message).await
                            {
                                error!(task_id = %task_id, "accounting update failed: {}", e);
                            }
                            self.emit(task_id, &keyword, ProgressPhase::Done, false, 0);
                        }
                    }
                }
            })
            .await;

        let status = if cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            match self.tasks.get_task(task_id).await {
                Ok(Some(task)) if task.completed_keywords == 0 && task.failed_keywords > 0 => {
                    TaskStatus::Failed
                }
                _ => TaskStatus::Succeeded,
            }
        };

        if let Err(e) = self.tasks.finish_task(task_id, status).await {
            error!(task_id = %task_id, "failed to finish task: {}", e);
        }
        self.registry.write().await.remove(&task_id);

        info!(task_id = %task_id, status = status.as_str(), "task finished");
    }

    fn emit(&self, task_id: Uuid, keyword: &str, phase: ProgressPhase, ok: bool, items: usize) {
        let _ = self.progress.send(ProgressEvent {
            task_id,
            keyword: keyword.to_string(),
            phase,
            ok,
            items,
        });
    }
}
