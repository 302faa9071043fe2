// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded worker pool for chain-bound work.
//!
//! Workers pull tasks from a shared queue. Each worker builds its own
//! connection context via the `connect` hook and reuses it across tasks;
//! a failed attempt drops the context so the retry reconnects. A task that
//! exhausts its retries is reported as failed without disturbing the rest
//! of the batch, and results are delivered to `on_result` in completion
//! order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use ctc_chain::RetryPolicy;

/// Pool sizing and per-task retry behavior.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
}

/// Run `tasks` across the pool. `connect` builds a worker's connection
/// context; `job` processes one task with a clone of that context.
/// `on_result` receives `(completed_count, task, outcome)` in completion
/// order; a `None` outcome is a task that failed all attempts.
pub async fn run_pool<C, T, R, CF, CFut, JF, JFut>(
    config: &PoolConfig,
    connect: CF,
    job: JF,
    tasks: Vec<T>,
    mut on_result: impl FnMut(usize, T, Option<R>),
) where
    C: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    CF: Fn() -> CFut + Clone + Send + Sync + 'static,
    CFut: Future<Output = Result<C>> + Send,
    JF: Fn(C, T) -> JFut + Clone + Send + Sync + 'static,
    JFut: Future<Output = Result<R>> + Send,
{
    if tasks.is_empty() {
        return;
    }

    let queue: Arc<Mutex<VecDeque<T>>> = Arc::new(Mutex::new(tasks.into_iter().collect()));
    let workers = config.workers.max(1);
    let (tx, mut rx) = mpsc::channel::<(T, Option<R>)>(workers);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let connect = connect.clone();
        let job = job.clone();
        let retry = config.retry;
        set.spawn(async move {
            let context: Arc<Mutex<Option<C>>> = Arc::new(Mutex::new(None));
            loop {
                let task = { queue.lock().await.pop_front() };
                let Some(task) = task else { break };

                let outcome = retry
                    .run(|_attempt| {
                        let task = task.clone();
                        let context = Arc::clone(&context);
                        let connect = connect.clone();
                        let job = job.clone();
                        async move {
                            let ctx = {
                                let mut slot = context.lock().await;
                                match slot.as_ref() {
                                    Some(ctx) => ctx.clone(),
                                    None => {
                                        let ctx = connect().await?;
                                        *slot = Some(ctx.clone());
                                        ctx
                                    }
                                }
                            };
                            match job(ctx, task).await {
                                Ok(result) => Ok(result),
                                Err(err) => {
                                    // Reconnect on the next attempt.
                                    context.lock().await.take();
                                    Err(err)
                                }
                            }
                        }
                    })
                    .await;

                let result = match outcome {
                    Ok(result) => Some(result),
                    Err(err) => {
                        tracing::warn!(
                            "work item failed after {} attempts: {err:#}",
                            retry.attempts.max(1)
                        );
                        None
                    }
                };
                if tx.send((task, result)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut completed = 0;
    while let Some((task, result)) = rx.recv().await {
        completed += 1;
        on_result(completed, task, result);
    }
    while set.join_next().await.is_some() {}
}
