//! LLM-backed stages driven end to end through the engine with scripted
//! generators.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ai_client::{AiError, GenerationRequest, TextGenerator};
use async_trait::async_trait;
use counterspeech_engine::{
    read_json, CorpusOptions, Engine, OutputRecord, PipelineConfig, RecordList, SkippedBatch,
    WorkSource,
};
use counterspeech_stages::stages::{
    CleanedGroups, CommentCleaner, CounterspeechGenerator, FilterOutput, GenerationMode,
    RelevanceFilter, RelevanceSplit,
};
use serde_json::{json, Value};

/// Answers each prompt with whatever the closure returns.
struct Scripted<F> {
    reply: F,
    calls: AtomicUsize,
}

impl<F> Scripted<F>
where
    F: Fn(&str, usize) -> Result<String, AiError> + Send + Sync,
{
    fn new(reply: F) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl<F> TextGenerator for Scripted<F>
where
    F: Fn(&str, usize) -> Result<String, AiError> + Send + Sync,
{
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> ai_client::Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(&request.prompt, n)
    }
}

fn config(dir: &Path, name: &str) -> PipelineConfig {
    let mut config = PipelineConfig::new(
        dir.join(format!("{name}.checkpoint.json")),
        dir.join(format!("{name}.json")),
    );
    config.batch_size = 2;
    config.inter_call_delay_seconds = 0.0;
    config.rate_limit_backoff_seconds = 0.0;
    config
}

fn write(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Pull the JSON array of comments back out of a clean prompt.
fn batch_of(prompt: &str) -> Vec<String> {
    let (_, list) = prompt.rsplit_once("Comments to process:\n").unwrap();
    serde_json::from_str(list).unwrap()
}

fn clean_reply(prompt: &str) -> Result<String, AiError> {
    let comments = batch_of(prompt);
    if comments.iter().any(|c| c.contains("BROKEN")) {
        return Ok("[]".into());
    }
    let entries: Vec<Value> = comments
        .iter()
        .map(|c| {
            let class = if c.contains("kya") { "rom_hindi" } else { "english" };
            json!({"classification": class, "cleaned_text": c.replace(" 😍", "")})
        })
        .collect();
    Ok(serde_json::to_string(&entries).unwrap())
}

#[tokio::test]
async fn clean_groups_results_and_logs_failed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("youtube_comments.json");
    write(
        &corpus,
        &json!([
            {"video_id": "v1", "title": "Goa", "comments": ["Great place 😍", "kya mast jagah hai"]},
            {"video_id": "v2", "title": "Agra", "comments": ["BROKEN reply incoming", "collateral"]}
        ]),
    );

    let mut config = config(dir.path(), "clean");
    config.skipped_batches_path = Some(dir.path().join("skipped_batches.json"));
    let output = config.final_output_path.clone();
    let skipped_path = config.skipped_batches_path.clone().unwrap();

    let generator = Scripted::new(|prompt: &str, _: usize| clean_reply(prompt));
    let engine = Engine::new(CommentCleaner::new(generator), CleanedGroups, config).unwrap();
    let source = WorkSource::new(
        &corpus,
        CorpusOptions {
            text_field: "comments".into(),
            ..Default::default()
        },
    );
    let summary = engine.run(&source).await.unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped_batches, 1);

    let written: Value = read_json(&output).unwrap().unwrap();
    assert_eq!(
        written,
        json!({
            "english": ["Great place"],
            "rom_hindi": ["kya mast jagah hai"],
            "other": [],
            "error": ["BROKEN reply incoming", "collateral"]
        })
    );

    let skipped: Vec<SkippedBatch> = read_json(&skipped_path).unwrap().unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].processor, "clean");
    assert!(skipped[0].reason.contains("shape mismatch"));
    assert_eq!(skipped[0].texts, vec!["BROKEN reply incoming", "collateral"]);
}

#[tokio::test]
async fn clean_output_accumulates_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("comments.json");

    for comments in [json!(["Great place 😍"]), json!(["Great  place 😍", "Loved Kerala"])] {
        write(&corpus, &comments);
        let engine = Engine::new(
            CommentCleaner::new(Scripted::new(|prompt: &str, _: usize| clean_reply(prompt))),
            CleanedGroups,
            config(dir.path(), "clean"),
        )
        .unwrap();
        engine
            .run(&WorkSource::new(&corpus, CorpusOptions::default()))
            .await
            .unwrap();
    }

    let written: Value = read_json(&dir.path().join("clean.json")).unwrap().unwrap();
    assert_eq!(written["english"], json!(["Great place", "Loved Kerala"]));
}

#[tokio::test]
async fn earlier_failure_gives_way_to_a_later_clean() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = dir.path().join("comments.json");
    write(&corpus, &json!(["Great video"]));

    let malformed = Scripted::new(|_: &str, _: usize| Ok(r#"[{"label": "??"}]"#.to_string()));
    let healthy = Scripted::new(|prompt: &str, _: usize| clean_reply(prompt));
    let generators: [Arc<dyn TextGenerator>; 2] = [malformed, healthy];

    for generator in generators {
        Engine::new(CommentCleaner::new(generator), CleanedGroups, config(dir.path(), "clean"))
            .unwrap()
            .run(&WorkSource::new(&corpus, CorpusOptions::default()))
            .await
            .unwrap();
    }

    let written: Value = read_json(&dir.path().join("clean.json")).unwrap().unwrap();
    assert_eq!(written["english"], json!(["Great video"]));
    assert_eq!(written["error"], json!([]));
}

#[tokio::test]
async fn throttled_llm_calls_are_resent() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Scripted::new(|prompt: &str, n: usize| {
        if n < 2 {
            Err(AiError::RateLimited { retry_after: None })
        } else {
            clean_reply(prompt)
        }
    });

    let engine = Engine::new(
        CommentCleaner::new(generator.clone()),
        CleanedGroups,
        config(dir.path(), "clean"),
    )
    .unwrap();
    let source = WorkSource::new(dir.path().join("in.json"), CorpusOptions::default());
    let items = source.from_value(json!(["one", "two"])).unwrap();
    let summary = engine.run_items(items).await.unwrap();

    assert_eq!(summary.failed, 0);
    assert_eq!(summary.throttled, 2);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn filter_then_generate_reads_the_relevant_section() {
    let dir = tempfile::tempdir().unwrap();
    let cleaned = dir.path().join("final_API_data.json");
    write(
        &cleaned,
        &json!({
            "english": ["India is the friendliest country", "What camera is this?", "hmm"],
            "rom_hindi": ["Bharat jaisa koi desh nahi, India best"],
            "other": ["ignored entirely"]
        }),
    );

    let classify = Scripted::new(|prompt: &str, _: usize| {
        let comment = prompt.rsplit_once("Please classify the following comment:").unwrap().1;
        let label = if comment.contains("India") {
            "relevant"
        } else if comment.contains("camera") {
            "irrelevant"
        } else {
            "unsure"
        };
        Ok(format!(r#"{{"comment": "...", "classification": "{label}"}}"#))
    });

    let filter_config = config(dir.path(), "filtered_data");
    let filtered = filter_config.final_output_path.clone();
    Engine::new(RelevanceFilter::new(classify), RelevanceSplit, filter_config)
        .unwrap()
        .run(&WorkSource::new(
            &cleaned,
            CorpusOptions {
                languages: Some(vec!["rom_hindi".into(), "english".into()]),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

    let split: FilterOutput = read_json(&filtered).unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&split).unwrap(),
        json!({
            "relevant": {
                "english": ["India is the friendliest country"],
                "rom_hindi": ["Bharat jaisa koi desh nahi, India best"]
            },
            "irrelevant": {"english": ["What camera is this?"]},
            "error": {"english": ["hmm"]}
        })
    );

    let reply = Scripted::new(|prompt: &str, _: usize| {
        assert!(prompt.contains("respectful counterspeech assistant"));
        Ok(r#"{"counterspeech": "Kindness travels both ways."}"#.to_string())
    });
    let generate_config = config(dir.path(), "responses");
    let responses = generate_config.final_output_path.clone();
    Engine::new(
        CounterspeechGenerator::new(reply, GenerationMode::Item),
        RecordList,
        generate_config,
    )
    .unwrap()
    .run(&WorkSource::new(
        &filtered,
        CorpusOptions {
            section: Some("relevant".into()),
            ..Default::default()
        },
    ))
    .await
    .unwrap();

    let records: Vec<OutputRecord<String>> = read_json(&responses).unwrap().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].language, "english");
    assert_eq!(records[1].comment, "Bharat jaisa koi desh nahi, India best");
    assert!(records
        .iter()
        .all(|r| r.output.as_deref() == Some("Kindness travels both ways.")));
}

/// Native batch endpoint stand-in: drops the last reply when asked.
struct BatchHost;

#[async_trait]
impl TextGenerator for BatchHost {
    fn model(&self) -> &str {
        "batch-host"
    }

    async fn generate(&self, _request: &GenerationRequest) -> ai_client::Result<String> {
        Err(AiError::Config("batch only".into()))
    }

    async fn generate_batch(&self, prompts: &[String], _template: &GenerationRequest) -> ai_client::Result<Vec<String>> {
        let mut replies: Vec<String> = prompts
            .iter()
            .map(|p| {
                let comment = p.split("[COMMENT]: ").nth(1).unwrap_or("").lines().next().unwrap_or("");
                format!("{p} Not everyone in {comment} is like that.\nUser: more please")
            })
            .collect();
        if prompts.iter().any(|p| p.contains("drop-one")) {
            replies.pop();
        }
        Ok(replies)
    }
}

#[tokio::test]
async fn batch_generation_cleans_echoes_and_fails_short_batches() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "responses");
    let output = config.final_output_path.clone();

    let engine = Engine::new(
        CounterspeechGenerator::new(Arc::new(BatchHost), GenerationMode::Batch),
        RecordList,
        config,
    )
    .unwrap();
    let source = WorkSource::new(dir.path().join("in.json"), CorpusOptions::default());
    let items = source
        .from_value(json!({"english": ["Delhi", "Mumbai", "drop-one", "Pune"]}))
        .unwrap();
    let summary = engine.run_items(items).await.unwrap();

    assert_eq!(summary.skipped_batches, 1);
    let records: Vec<OutputRecord<String>> = read_json(&output).unwrap().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].output.as_deref(), Some("Not everyone in Delhi is like that."));
    assert_eq!(records[1].output.as_deref(), Some("Not everyone in Mumbai is like that."));
    assert!(records[2].output.is_none());
    assert!(records[3].error.as_deref().unwrap().contains("shape mismatch"));
}
