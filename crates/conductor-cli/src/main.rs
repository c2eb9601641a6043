mod config;
mod telemetry;

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use tokio::time::{Duration, sleep};
use tracing::info;

use conductor_core::impls::{InMemoryDurableStore, InMemoryEphemeralStore};
use conductor_core::ports::{IdGenerator, SystemClock, UlidGenerator};
use conductor_core::{
    BatchTracker, ConductorConfig, FanoutExecutor, GenerationError, JobSpec, JobWorkspace,
    ReplyChannel, ReplyPayload, SubTask,
};
use config::CliArgs;
use telemetry::init_telemetry;

/// 画像生成の代役
struct RenderImage {
    prompt: String,
}

#[async_trait]
impl SubTask for RenderImage {
    fn name(&self) -> &str {
        "image"
    }

    async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
        sleep(Duration::from_millis(50)).await;
        let url = format!("https://media.example/{}/{}.png", ws.job_name(), self.prompt.len());
        ws.insert("image_url", json!(url)).await;
        Ok(())
    }
}

/// 台詞 1 行分の音声合成の代役
struct SynthesizeLine {
    index: usize,
    text: String,
    fail: bool,
}

#[async_trait]
impl SubTask for SynthesizeLine {
    fn name(&self) -> &str {
        "tts"
    }

    async fn run(&self, ws: &JobWorkspace) -> Result<(), GenerationError> {
        sleep(Duration::from_millis(20 * (self.index as u64 + 1))).await;
        if self.fail {
            return Err(GenerationError::new(
                "tts",
                format!("line {} rejected by voice model", self.index),
            ));
        }
        let entry = json!({ "index": self.index, "text": self.text });
        ws.update(|out| {
            if let Some(lines) = out
                .entry("lines")
                .or_insert_with(|| json!([]))
                .as_array_mut()
            {
                lines.push(entry);
            }
        })
        .await;
        Ok(())
    }
}

fn scenario_jobs(fail_line: bool) -> Vec<JobSpec> {
    let script = ["Welcome back.", "Today we visit the harbor.", "See you tomorrow."];
    let mut dialogue = JobSpec::new("dialogue");
    for (index, text) in script.iter().enumerate() {
        dialogue = dialogue.with_subtask(SynthesizeLine {
            index,
            text: text.to_string(),
            fail: fail_line && index == 1,
        });
    }

    vec![
        JobSpec::new("cover").with_subtask(RenderImage {
            prompt: "harbor at dawn".into(),
        }),
        dialogue,
        JobSpec::new("thumbnail").with_subtask(RenderImage {
            prompt: "gulls".into(),
        }),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let fail_line = args.fail_line;
    let config = ConductorConfig::try_from(args)?;

    init_telemetry()?;
    info!(?config, "conductor demo starting");

    // (A) store と各コンポーネントを用意
    let store = Arc::new(InMemoryEphemeralStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());
    let ids = UlidGenerator::new(SystemClock);

    let tracker = Arc::new(BatchTracker::new(store.clone(), &config));
    let executor = Arc::new(FanoutExecutor::new(tracker.clone(), durable.clone()));
    let replies = Arc::new(ReplyChannel::new(store.clone(), &config));

    // (B) バッチ投入（即座に batch id が返る）
    let batch_id = executor
        .submit(&ids, "scenario-42", scenario_jobs(fail_line))
        .await?;
    println!("submitted: {batch_id}");

    // (C) poller として終端状態まで観測
    let view = loop {
        match tracker.get_batch(batch_id).await? {
            Some(view) if view.status.is_terminal() && view.result.is_some() => break view,
            Some(view) => info!(
                status = %view.status,
                completed = view.completed_jobs,
                total = view.total_jobs,
                "batch in progress"
            ),
            None => info!("batch not visible yet"),
        }
        sleep(Duration::from_millis(25)).await;
    };
    println!("{}", serde_json::to_string_pretty(&view)?);

    if let Some(resolved) = tracker.resolve_result(durable.as_ref(), batch_id).await? {
        println!("result ({:?}): {}", resolved.source, resolved.payload.as_value());
    }

    // (D) 応答チャネル：生成を切り離して起動し、呼び出し側は上限付きで待つ
    let request_id = ids.generate_request_id();
    replies.spawn_producer(
        request_id,
        async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, GenerationError>(
                ReplyPayload::text("The harbor opens at nine.")
                    .with_audio("https://media.example/reply.mp3"),
            )
        },
        ReplyPayload::text("Sorry, please try again."),
    );
    let reply = replies.consume(request_id, replies.default_timeout()).await?;
    println!("reply {request_id}: {}", reply.ai_text);

    Ok(())
}
