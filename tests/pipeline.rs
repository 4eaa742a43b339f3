//! Content Pipeline Integration Tests
//!
//! Runs the scrape -> generate -> schedule pipeline on a live bus with
//! stubbed collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use postflow::adapters::{
    GenerationError, Generator, PromptLibrary, PromptTemplate, ScrapeError, ScrapedArticle,
    Scraper,
};
use postflow::config::ConfigError;
use postflow::core::{BusSettings, EventBus, RecordingContext, Step};
use postflow::domain::payloads::{
    GENERATE_CONTENT, LINKEDIN_SCHEDULE, SCRAPE_ARTICLE, TWITTER_SCHEDULE,
};
use postflow::domain::{
    EventState, FailureReason, GenerateContent, InvocationOutcome, ScheduledContent,
};
use postflow::steps::{pipeline_registry, Collaborators, GenerateStep, Platform};

const URL: &str = "https://example.com/post";

struct StubScraper {
    result: Result<ScrapedArticle, ScrapeError>,
    calls: AtomicUsize,
}

impl StubScraper {
    fn ok(title: &str, content: &str) -> Self {
        Self {
            result: Ok(ScrapedArticle {
                title: title.to_string(),
                content: content.to_string(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(reason: &str) -> Self {
        Self {
            result: Err(ScrapeError::new(reason)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scraper for StubScraper {
    fn name(&self) -> &str {
        "stub"
    }

    async fn scrape(&self, _url: &str) -> Result<ScrapedArticle, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Answers by the platform marker the test templates start with
struct StubGenerator {
    linkedin: Result<String, GenerationError>,
    twitter: Result<String, GenerationError>,
}

#[async_trait]
impl Generator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.starts_with("LINKEDIN") {
            self.linkedin.clone()
        } else {
            self.twitter.clone()
        }
    }
}

fn prompts() -> PromptLibrary {
    PromptLibrary::from_templates([
        PromptTemplate::new("linkedin", "LINKEDIN {{title}}\n{{content}}"),
        PromptTemplate::new("twitter", "TWITTER {{title}}\n{{content}}"),
    ])
}

fn start(scraper: Arc<StubScraper>, generator: StubGenerator) -> EventBus {
    let collaborators = Collaborators {
        scraper,
        generator: Arc::new(generator),
    };
    let registry = pipeline_registry(&collaborators, &prompts()).unwrap();
    EventBus::start(registry, &BusSettings::default())
}

fn scrape_request(request_id: &str, url: &str) -> Value {
    json!({"requestId": request_id, "url": url, "timestamp": 1_700_000_000_000i64})
}

async fn settle(bus: &EventBus) {
    tokio::time::timeout(Duration::from_secs(5), bus.wait_idle())
        .await
        .expect("pipeline did not go idle");
}

fn scheduled(bus: &EventBus, topic: &str) -> Vec<ScheduledContent> {
    bus.journal()
        .on_topic(topic)
        .into_iter()
        .map(|r| serde_json::from_value(r.event.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_run_fans_out_to_both_platforms() {
    let scraper = Arc::new(StubScraper::ok("Rust at scale", "Body of the article"));
    let bus = start(
        scraper.clone(),
        StubGenerator {
            linkedin: Ok("```json\n{\"post\": \"Shipping Rust\"}\n```".into()),
            twitter: Ok("Hello".into()),
        },
    );

    bus.emit(SCRAPE_ARTICLE, scrape_request("r1", URL)).unwrap();
    settle(&bus).await;

    assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);

    let generate = &bus.journal().on_topic(GENERATE_CONTENT)[0];
    assert_eq!(generate.state, EventState::Completed);
    assert_eq!(generate.invocations.len(), 2);
    assert_eq!(generate.event.payload["title"], "Rust at scale");

    let linkedin = scheduled(&bus, LINKEDIN_SCHEDULE);
    assert_eq!(linkedin.len(), 1);
    assert_eq!(linkedin[0].content, json!({"post": "Shipping Rust"}));
    assert_eq!(linkedin[0].original_url, URL);

    let twitter = scheduled(&bus, TWITTER_SCHEDULE);
    assert_eq!(twitter.len(), 1);
    assert_eq!(
        twitter[0].content,
        json!({"thread": [{"tweetNumber": 1, "content": "Hello"}]})
    );
    assert!(chrono::DateTime::parse_from_rfc3339(&twitter[0].generated_at).is_ok());
}

#[tokio::test]
async fn test_request_id_reaches_every_event() {
    let bus = start(
        Arc::new(StubScraper::ok("T", "C")),
        StubGenerator {
            linkedin: Ok("{\"post\": \"p\"}".into()),
            twitter: Ok("{\"thread\": []}".into()),
        },
    );

    bus.emit(SCRAPE_ARTICLE, scrape_request("r1", URL)).unwrap();
    settle(&bus).await;

    let records = bus.journal().for_correlation("r1");
    assert_eq!(records.len(), 4);
    for record in &records {
        assert_eq!(record.event.payload["requestId"], "r1");
        assert_eq!(record.state, EventState::Completed);
    }
}

#[tokio::test]
async fn test_generation_failure_isolated_to_one_platform() {
    let bus = start(
        Arc::new(StubScraper::ok("T", "C")),
        StubGenerator {
            linkedin: Ok("{\"post\": \"p\"}".into()),
            twitter: Err(GenerationError::new("quota exceeded")),
        },
    );

    bus.emit(SCRAPE_ARTICLE, scrape_request("r2", URL)).unwrap();
    settle(&bus).await;

    assert_eq!(scheduled(&bus, LINKEDIN_SCHEDULE).len(), 1);
    assert!(scheduled(&bus, TWITTER_SCHEDULE).is_empty());

    let generate = &bus.journal().on_topic(GENERATE_CONTENT)[0];
    assert_eq!(generate.state, EventState::PartiallyFailed);
    assert_eq!(
        generate.invocation("TwitterGenerate").unwrap().outcome,
        InvocationOutcome::Failed(FailureReason::Generation("quota exceeded".into()))
    );
}

#[tokio::test]
async fn test_scrape_failure_stops_the_run() {
    let bus = start(
        Arc::new(StubScraper::failing("HTTP 500")),
        StubGenerator {
            linkedin: Ok("{}".into()),
            twitter: Ok("{}".into()),
        },
    );

    let id = bus.emit(SCRAPE_ARTICLE, scrape_request("r3", URL)).unwrap();
    settle(&bus).await;

    let record = bus.journal().get(id).unwrap();
    assert_eq!(record.state, EventState::Failed);
    assert_eq!(
        record.invocation("ScrapeArticle").unwrap().outcome,
        InvocationOutcome::Failed(FailureReason::Scrape("HTTP 500".into()))
    );
    assert!(bus.journal().on_topic(GENERATE_CONTENT).is_empty());
}

#[tokio::test]
async fn test_invalid_request_never_reaches_scraper() {
    let scraper = Arc::new(StubScraper::ok("T", "C"));
    let bus = start(
        scraper.clone(),
        StubGenerator {
            linkedin: Ok("{}".into()),
            twitter: Ok("{}".into()),
        },
    );

    let id = bus
        .emit(SCRAPE_ARTICLE, json!({"requestId": "r4", "url": "not a url"}))
        .unwrap();
    settle(&bus).await;

    assert_eq!(scraper.calls.load(Ordering::SeqCst), 0);

    let record = bus.journal().get(id).unwrap();
    match record.invocation("ScrapeArticle").unwrap().outcome.failure() {
        Some(FailureReason::Validation(e)) => assert_eq!(e.fields(), vec!["url", "timestamp"]),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn test_missing_template_is_a_config_error() {
    let collaborators = Collaborators {
        scraper: Arc::new(StubScraper::ok("T", "C")),
        generator: Arc::new(StubGenerator {
            linkedin: Ok(String::new()),
            twitter: Ok(String::new()),
        }),
    };
    let prompts = PromptLibrary::from_templates([PromptTemplate::new("linkedin", "{{title}}")]);

    let err = pipeline_registry(&collaborators, &prompts).unwrap_err();
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::MissingTemplate { platform, .. }) => assert_eq!(platform, "twitter"),
        other => panic!("expected missing template, got {:?}", other),
    }
}

#[test]
fn test_topology_has_no_cycles() {
    let collaborators = Collaborators {
        scraper: Arc::new(StubScraper::ok("T", "C")),
        generator: Arc::new(StubGenerator {
            linkedin: Ok(String::new()),
            twitter: Ok(String::new()),
        }),
    };
    let registry = pipeline_registry(&collaborators, &prompts()).unwrap();
    let report = registry.consistency_report();

    assert!(!report.has_cycles());
    assert_eq!(registry.subscribers_of(GENERATE_CONTENT).len(), 2);
    assert_eq!(report.unconsumed.len(), 2);
    assert_eq!(report.entry_points.len(), 1);
}

#[tokio::test]
async fn test_generate_step_with_recording_context() {
    let step = GenerateStep::new(
        Platform::LinkedIn,
        Arc::new(StubGenerator {
            linkedin: Ok("Plain words".into()),
            twitter: Ok(String::new()),
        }),
        PromptTemplate::new("linkedin", "LINKEDIN {{title}}"),
    );
    let recording = RecordingContext::new("LinkedinGenerate", GENERATE_CONTENT, Some("r5"));

    let input = GenerateContent {
        request_id: "r5".into(),
        url: URL.into(),
        title: "T".into(),
        content: "C".into(),
        timestamp: 1,
    };
    step.handle(input, &recording).await.unwrap();

    let emitted = recording.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].topic.as_str(), LINKEDIN_SCHEDULE);
    assert_eq!(emitted[0].payload["content"], json!({"post": "Plain words"}));
    assert_eq!(emitted[0].payload["requestId"], "r5");

    assert!(recording
        .logs()
        .iter()
        .any(|l| l.message.contains("not a JSON object")));
}

#[tokio::test]
async fn test_scraped_article_is_handed_to_both_generators() {
    let bus = start(
        Arc::new(StubScraper::ok("T", "C")),
        StubGenerator {
            linkedin: Ok("{\"post\": \"p\"}".into()),
            twitter: Ok("Hello".into()),
        },
    );

    bus.emit(
        SCRAPE_ARTICLE,
        json!({"requestId": "r1", "url": "https://example.com/a", "timestamp": 1000}),
    )
    .unwrap();
    settle(&bus).await;

    let generate = &bus.journal().on_topic(GENERATE_CONTENT)[0];
    assert_eq!(
        generate.event.payload,
        json!({
            "requestId": "r1",
            "url": "https://example.com/a",
            "title": "T",
            "content": "C",
            "timestamp": 1000
        })
    );
    assert_eq!(generate.state, EventState::Completed);

    let mut steps: Vec<_> = generate.invocations.iter().map(|i| i.step.as_str()).collect();
    steps.sort();
    assert_eq!(steps, vec!["LinkedinGenerate", "TwitterGenerate"]);
}
