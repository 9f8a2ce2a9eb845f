//! Demo: news digest workflow run against the scripted runner, with a mid-run disconnect.

use std::path::PathBuf;

use blockflow_core::execution::{BlockUpdate, InboxOutcome, abort_pair};
use blockflow_core::graph::{
    ConditionOperator, ForEachConfig, HttpRequestConfig, IfConditionConfig, LlmInferenceConfig,
    WebhookTriggerConfig,
};
use blockflow_core::ports::{JsonFileStore, ScriptedRunner};
use blockflow_core::{
    BlockConfig, BlockId, BlockStatus, EditorSession, Position, RunnerEvent, SessionConfig,
    SessionError, Workflow,
};
use serde_json::{Value, json};

pub struct DemoBlocks {
    pub trigger: BlockId,
    pub fetch: BlockId,
    pub each: BlockId,
    pub summarize: BlockId,
    pub notify_check: BlockId,
}

/// Build the digest graph through the session so every step is undoable.
pub fn build(session: &mut EditorSession) -> Result<DemoBlocks, SessionError> {
    let trigger = session.add_block(
        "Topic Request",
        BlockConfig::WebhookTrigger(WebhookTriggerConfig::default()),
        Position::new(0.0, 0.0),
    )?;
    let fetch = session.add_block(
        "Fetch Headlines",
        BlockConfig::HttpRequest(HttpRequestConfig::get(
            "https://news.example.com/search?q={{input.topic}}",
        )),
        Position::new(240.0, 0.0),
    )?;
    let each = session.add_block(
        "Each Article",
        BlockConfig::ForEach(ForEachConfig {
            array_field: "articles".into(),
            ..Default::default()
        }),
        Position::new(480.0, 0.0),
    )?;
    let summarize = session.add_block(
        "Summarize",
        BlockConfig::LlmInference(LlmInferenceConfig {
            system_prompt: "You write one-line news summaries.".into(),
            user_prompt: "Summarize: {{fetch-headlines.articles.0.title}}".into(),
            ..Default::default()
        }),
        Position::new(720.0, 0.0),
    )?;
    let notify_check = session.add_block(
        "Anything New",
        BlockConfig::IfCondition(IfConditionConfig {
            field: "{{summarize.response}}".into(),
            operator: ConditionOperator::IsNotEmpty,
            value: Value::Null,
        }),
        Position::new(960.0, 0.0),
    )?;
    session.connect(trigger, fetch)?;
    session.connect(fetch, each)?;
    session.connect(each, summarize)?;
    session.connect(summarize, notify_check)?;
    Ok(DemoBlocks {
        trigger,
        fetch,
        each,
        summarize,
        notify_check,
    })
}

/// Event script for one run: three articles, the last summary step fails.
pub fn script(blocks: &DemoBlocks) -> Vec<RunnerEvent> {
    let mut events = vec![
        RunnerEvent::BlockUpdate(
            BlockUpdate::new(blocks.trigger, BlockStatus::Completed)
                .with_output(json!({ "topic": "rust" })),
        ),
        RunnerEvent::block(blocks.fetch, BlockStatus::Running),
        RunnerEvent::BlockUpdate(BlockUpdate::new(blocks.fetch, BlockStatus::Completed).with_output(
            json!({ "articles": [
                { "title": "Rust 1.93 released with faster incremental builds" },
                { "title": "Async closures land on stable" },
                { "title": "A long look at the borrow checker's next generation" }
            ]}),
        )),
        RunnerEvent::block(blocks.each, BlockStatus::Running),
    ];
    for i in 0..3 {
        events.push(RunnerEvent::iteration(blocks.each, i, BlockStatus::Running, 3));
        events.push(RunnerEvent::iteration(blocks.each, i, BlockStatus::Completed, 3));
    }
    events.extend([
        RunnerEvent::block(blocks.each, BlockStatus::Completed),
        RunnerEvent::block(blocks.summarize, BlockStatus::Running),
        RunnerEvent::BlockUpdate(
            BlockUpdate::new(blocks.summarize, BlockStatus::Failed)
                .with_error("HTTP 429: rate limited by model provider"),
        ),
        RunnerEvent::ExecutionComplete { status: None },
    ]);
    events
}

pub async fn run(data_dir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let temp;
    let root = match data_dir {
        Some(dir) => dir,
        None => {
            temp = tempfile::tempdir()?;
            temp.path().to_path_buf()
        }
    };
    let store = JsonFileStore::new(&root);
    let config = SessionConfig::from_env();
    let mut session = EditorSession::new("news-digest", Workflow::new(), config);

    let blocks = build(&mut session)?;
    println!("built {} blocks", session.workflow().blocks().len());
    for warning in session.validate() {
        println!("warning: {}: {}", warning.block_name, warning.reason);
    }

    session.remove_block(blocks.notify_check)?;
    println!("removed a block: {} blocks", session.workflow().blocks().len());
    session.undo()?;
    println!("undo: {} blocks", session.workflow().blocks().len());
    session.redo()?;
    session.undo()?;

    let version = session.save(&store, Some("initial digest"))?;
    println!("saved version {version} to {}", root.display());

    let runner = ScriptedRunner::new(script(&blocks)).disconnect_after(5);
    let (_abort, signal) = abort_pair();
    let outcome = session.run(&runner, json!({ "topic": "rust" }), Some(&store), signal).await?;
    match outcome {
        InboxOutcome::Finished(status) => println!("execution finished: {status:?}"),
        InboxOutcome::Cancelled => println!("execution cancelled"),
        InboxOutcome::Disconnected => println!("execution stream lost"),
    }

    let view = session.view();
    for block in session.workflow().blocks() {
        let Some(state) = view.block(block.id) else {
            continue;
        };
        match &state.error {
            Some(error) => println!("  {:<16} {:?}: {error}", block.normalized_id, state.status),
            None => println!("  {:<16} {:?}", block.normalized_id, state.status),
        }
        if let Some(loop_state) = view.iterations(block.id) {
            println!(
                "  {:<16} {}/{} iterations",
                "",
                loop_state.completed_count(),
                loop_state.total_items
            );
        }
    }
    println!(
        "preview: {}",
        session.preview("Summarize: {{fetch-headlines.articles.0.title}}")
    );

    if let Some(id) = session.tracker().execution_id().cloned() {
        session.open_historical(&store, &id)?;
        println!("viewing stored execution {id}, read-only: {}", session.viewer().is_read_only());
        session.show_live();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::WorkflowStatus;

    #[tokio::test]
    async fn demo_script_ends_in_partial_failure() {
        let mut session = EditorSession::new("t", Workflow::new(), SessionConfig::default());
        let blocks = build(&mut session).unwrap();
        assert!(session.validate().is_empty());

        let runner = ScriptedRunner::new(script(&blocks)).disconnect_after(5);
        let (_abort, signal) = abort_pair();
        let outcome = session.run(&runner, Value::Null, None, signal).await.unwrap();

        assert_eq!(outcome, InboxOutcome::Finished(WorkflowStatus::PartialFailure));
        let view = session.view();
        assert_eq!(view.block(blocks.notify_check).unwrap().status, BlockStatus::Skipped);
        assert_eq!(view.iterations(blocks.each).unwrap().completed_count(), 3);
        assert_eq!(
            session.preview("{{fetch-headlines.articles.1.title}}"),
            "Async closures land on stable"
        );
    }

    #[tokio::test]
    async fn demo_runs_against_a_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        run(Some(dir.path().to_path_buf())).await.unwrap();
        assert!(dir.path().join("agents").join("news-digest").join("versions.json").is_file());
    }
}
