use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub type JobResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: Value) -> JobResult;
}

/// Cheap handle for enqueueing named jobs from anywhere.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl JobQueue {
    pub fn run_now(&self, name: &str, payload: Value) {
        if self.tx.send((name.to_string(), payload)).is_err() {
            tracing::error!("job queue closed, dropping job {name}");
        }
    }
}

/// Task runner in the shape of an agenda: named handlers, on-demand runs and
/// recurring ticks. Every job run is spawned independently; a failing job
/// logs its error and never takes the dispatch loop down.
pub struct JobScheduler {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    queue_tx: mpsc::UnboundedSender<(String, Value)>,
    queue_rx: mpsc::UnboundedReceiver<(String, Value)>,
}

pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SchedulerHandle {
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            handlers: HashMap::new(),
            queue_tx,
            queue_rx,
        }
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue {
            tx: self.queue_tx.clone(),
        }
    }

    pub fn define(&mut self, name: &str, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(name.to_string(), handler).is_some() {
            tracing::warn!("job {name} redefined");
        }
    }

    /// Enqueue `name` on a fixed interval. The first tick fires after one
    /// full interval.
    pub fn run_every(&self, interval: Duration, name: &str) {
        let queue = self.queue();
        let name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick, skip it
            loop {
                ticker.tick().await;
                queue.run_now(&name, Value::Null);
            }
        });
    }

    /// Consume the scheduler and run the dispatch loop in the background.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handlers = self.handlers;
        let mut queue_rx = self.queue_rx;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("job scheduler shutting down");
                        break;
                    }
                    job = queue_rx.recv() => {
                        let Some((name, payload)) = job else { break };
                        match handlers.get(&name) {
                            Some(handler) => {
                                let handler = handler.clone();
                                tokio::spawn(async move {
                                    if let Err(err) = handler.run(payload).await {
                                        tracing::error!("job {name} failed: {err}");
                                    }
                                });
                            }
                            None => tracing::warn!("no handler defined for job {name}"),
                        }
                    }
                }
            }
        });

        SchedulerHandle { shutdown_tx }
    }
}
