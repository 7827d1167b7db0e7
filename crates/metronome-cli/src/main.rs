use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use std::sync::atomic::{AtomicU32, Ordering};
use metronome_core::app::{SchedulerBuilder, SchedulerConfig};
use metronome_core::domain::{CompletionDecision, SchedulerError};
use metronome_core::impls::InMemoryExecutionStore;
use metronome_core::policy::{DeadExecutionPolicy, FailurePolicy};
use metronome_core::typed::{self, ExecutionContext, Handler, Task};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Task for Hello {
    const NAME: &'static str = "demo.hello";
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(
        &self,
        task: Hello,
        ctx: &ExecutionContext,
    ) -> Result<CompletionDecision, SchedulerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(SchedulerError::handler(format!(
                "intentional failure (left={left})"
            )));
        }

        println!(
            "Hello, {}! (attempt after {} failures, on {})",
            task.name,
            ctx.consecutive_failures(),
            ctx.scheduler_id()
        );
        // one-off なので成功したら行ごと消す
        Ok(CompletionDecision::remove())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // (A) store と設定を用意（デモはすぐ回るよう短い間隔にする）
    let store = Arc::new(InMemoryExecutionStore::new());
    let mut config = SchedulerConfig::new();
    config.polling_interval = Duration::from_millis(200);
    config.heartbeat_interval = Duration::from_millis(500);
    config.stale_threshold = Duration::from_millis(2_000);
    config.worker_capacity = 2;

    // (B) タスクを登録してスケジューラを構築（2 回失敗してから成功する handler）
    let mut scheduler = SchedulerBuilder::new(store.clone())
        .with_config(config)
        .register_with_policies::<Hello, _>(
            HelloHandler::new(2),
            FailurePolicy::fixed(Duration::from_millis(300), Some(5)),
            DeadExecutionPolicy::ReviveNow,
        )
        .expect("task registration")
        .build()
        .expect("valid configuration");

    // (C) インスタンスを投入（TaskName + InstanceId + payload）
    let instance = typed::instance_with_data::<Hello>(
        "greeting-1",
        &Hello {
            name: "metronome".to_string(),
        },
    )
    .expect("payload encodes");
    let key = instance.key();
    scheduler.schedule_now(instance).await.expect("schedule");
    println!("scheduled execution: {key}");

    // (D) ループを起動して、行が消える（= 完了）までポーリングで待つ
    scheduler.start();
    tracing::info!(scheduler_id = %scheduler.scheduler_id(), "scheduler running");
    loop {
        match scheduler.execution(&key).await.expect("store reachable") {
            Some(row) => {
                println!(
                    "status: picked={} failures={} next_run={}",
                    row.picked, row.consecutive_failures, row.execution_time
                );
            }
            None => {
                println!("execution finished and removed");
                break;
            }
        }
        sleep(Duration::from_millis(300)).await;
    }
    println!("counts: {:?}", scheduler.counts().await.expect("counts"));

    // (E) graceful shutdown（claim を止め、in-flight に猶予を与える）
    scheduler.shutdown_and_join().await;
}
