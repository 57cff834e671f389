//! End-to-end scenarios over the full pipeline and HTTP surface, with
//! the model service mocked for determinism.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use mindmesh::cdn::InMemoryCdn;
use mindmesh::model_service::{ChatRequest, ModelService, ModelServiceError};
use mindmesh::{
    router, AppState, InMemoryRepository, Pipeline, PipelineConfig, Source, VectorizeRequest,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Mock model service with a fixed concept vocabulary.
///
/// Chat calls return every vocabulary entry mentioned in the prompt;
/// embedding calls look vectors up by name. Both are deterministic.
struct MockModelService {
    vocabulary: Vec<(String, f32, Vec<f32>)>,
    chat_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    failing_embeds: HashSet<String>,
}

impl MockModelService {
    fn new(vocabulary: &[(&str, f32, Vec<f32>)]) -> Self {
        Self {
            vocabulary: vocabulary
                .iter()
                .map(|(name, importance, vector)| (name.to_string(), *importance, vector.clone()))
                .collect(),
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            failing_embeds: HashSet::new(),
        }
    }

    fn with_failing_embed(mut self, name: &str) -> Self {
        self.failing_embeds.insert(name.to_string());
        self
    }
}

#[async_trait]
impl ModelService for MockModelService {
    async fn chat(&self, request: &ChatRequest) -> Result<String, ModelServiceError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let haystack = request.prompt.to_lowercase();
        let concepts: Vec<serde_json::Value> = self
            .vocabulary
            .iter()
            .filter(|(name, _, _)| haystack.contains(name.as_str()))
            .map(|(name, importance, _)| {
                serde_json::json!({ "name": name, "importance": importance })
            })
            .collect();
        Ok(serde_json::json!({ "concepts": concepts }).to_string())
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ModelServiceError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_embeds.contains(text) {
            return Err(ModelServiceError::transient("503 service unavailable"));
        }
        self.vocabulary
            .iter()
            .find(|(name, _, _)| name == text)
            .map(|(_, _, vector)| vector.clone())
            .ok_or_else(|| ModelServiceError::permanent(format!("unknown concept {text}")))
    }
}

/// One-hot-ish vector in 8 dimensions.
fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; 8];
    v[i % 8] = 1.0;
    v
}

fn topic_vocabulary() -> Vec<(&'static str, f32, Vec<f32>)> {
    vec![
        ("glacier", 0.9, axis(0)),
        ("volcano", 0.8, axis(1)),
        ("monsoon", 0.7, axis(2)),
        ("earthquake", 0.8, axis(3)),
        ("tsunami", 0.6, axis(4)),
        ("drought", 0.5, axis(5)),
        ("aurora", 0.4, axis(6)),
    ]
}

struct Harness {
    service: Arc<MockModelService>,
    repository: Arc<InMemoryRepository>,
    cdn: Arc<InMemoryCdn>,
    pipeline: Arc<Pipeline>,
}

fn harness(service: MockModelService) -> Harness {
    let service = Arc::new(service);
    let repository = Arc::new(InMemoryRepository::new());
    let cdn = Arc::new(InMemoryCdn::new());
    let pipeline = Pipeline::new(
        service.clone(),
        repository.clone(),
        cdn.clone(),
        PipelineConfig::default(),
    )
    .expect("pipeline");
    Harness {
        service,
        repository,
        cdn,
        pipeline: Arc::new(pipeline),
    }
}

fn app(harness: &Harness) -> Router {
    router(AppState { pipeline: harness.pipeline.clone() })
}

async fn post_vectorize(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/vectorize")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let json = serde_json::from_slice(&bytes).expect("json body");
    (status, json)
}

// === Scenario: empty input is rejected at the boundary ===

#[tokio::test]
async fn empty_input_is_an_invalid_request() {
    let harness = harness(MockModelService::new(&topic_vocabulary()));
    let (status, body) = post_vectorize(
        app(&harness),
        serde_json::json!({ "text": "", "user_id": Uuid::new_v4().to_string() }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "invalid_request");
}

// === Scenario: single short text produces positioned groups ===

#[tokio::test]
async fn short_text_produces_groups_with_finite_positions() {
    let vocabulary = vec![
        ("mitochondrion", 0.9, axis(0)),
        ("cell", 0.6, axis(1)),
    ];
    let harness = harness(MockModelService::new(&vocabulary));
    let (status, body) = post_vectorize(
        app(&harness),
        serde_json::json!({
            "text": "The mitochondrion is the powerhouse of the cell. Cells contain mitochondria.",
            "user_id": Uuid::new_v4().to_string(),
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let groups = body["data"].as_array().expect("groups");
    assert!(!groups.is_empty());

    let has_mitochondrion = groups.iter().any(|g| {
        g["concepts"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c.as_str().unwrap().contains("mitochondrion"))
    });
    assert!(has_mitochondrion, "expected a mitochondrion group in {groups:?}");

    for group in groups {
        let position = group["reduced_embedding"].as_array().expect("position");
        assert_eq!(position.len(), 3);
        for coordinate in position {
            assert!(coordinate.as_f64().unwrap().is_finite());
        }
    }
    assert_eq!(harness.service.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.service.embed_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.cdn.upload_count(), 1);
}

// === Scenario: long text runs the extractor in chunked mode ===

#[tokio::test]
async fn long_text_extracts_per_chunk_and_groups_stay_distinct() {
    let harness = harness(MockModelService::new(&topic_vocabulary()));

    // ~20k characters cycling through the topic words.
    let topics = ["glacier", "volcano", "monsoon", "earthquake", "tsunami", "drought", "aurora"];
    let mut text = String::new();
    let mut i = 0;
    while text.len() < 20_000 {
        text.push_str(&format!(
            "The {} shaped the region over many seasons and the records show it clearly. ",
            topics[i % topics.len()]
        ));
        i += 1;
    }

    let groups = harness
        .pipeline
        .vectorize(VectorizeRequest {
            source: Source::Text(text),
            user_id: Uuid::new_v4(),
            filename: None,
        })
        .await
        .expect("vectorize");

    assert!(
        harness.service.chat_calls.load(Ordering::SeqCst) > 1,
        "long input should fan out over chunks"
    );
    assert!(groups.len() >= 5, "got {} groups", groups.len());

    // Every concept appears in exactly one group, and the group array
    // invariants hold.
    let mut seen = HashSet::new();
    for (index, group) in groups.iter().enumerate() {
        assert_eq!(group.group_id, index);
        for name in &group.concepts {
            assert!(seen.insert(name.clone()), "{name} appeared twice");
        }
        let mut sorted = group.connections.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, group.connections, "connections sorted and unique");
        assert!(!group.connections.contains(&group.group_id));
        assert!((0.0..=1.0).contains(&group.importance_score));
    }
}

// === Scenario: near-duplicate concepts merge into one group ===

#[tokio::test]
async fn near_duplicates_share_a_group() {
    let vocabulary = vec![
        ("neural network", 0.9, vec![1.0, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ("neural networks", 0.7, vec![1.0, 0.0, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ("gardening", 0.5, axis(5)),
    ];
    let harness = harness(MockModelService::new(&vocabulary));

    let groups = harness
        .pipeline
        .vectorize(VectorizeRequest {
            source: Source::Text(
                "A neural network learns. Neural networks generalize. Gardening is unrelated."
                    .to_string(),
            ),
            user_id: Uuid::new_v4(),
            filename: None,
        })
        .await
        .expect("vectorize");

    let pair = groups
        .iter()
        .find(|g| g.concepts.iter().any(|c| c == "neural network"))
        .expect("neural network group");
    assert!(
        pair.concepts.iter().any(|c| c == "neural networks"),
        "variants should merge: {groups:?}"
    );
}

// === Scenario: embedding failure past retries surfaces as 500 ===

#[tokio::test]
async fn exhausted_embedding_retries_map_to_model_service_error() {
    let service = MockModelService::new(&topic_vocabulary()).with_failing_embed("volcano");
    let harness = harness(service);
    let (status, body) = post_vectorize(
        app(&harness),
        serde_json::json!({
            "text": "The glacier and the volcano shaped the valley below them.",
            "user_id": Uuid::new_v4().to_string(),
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["kind"], "model_service");
    // Nothing was persisted for the failed request.
    assert_eq!(harness.cdn.upload_count(), 0);
}

// === Scenario: URL input is scraped and the source URL persisted ===

#[tokio::test]
async fn url_input_scrapes_and_persists_source_url() {
    const ARTICLE: &str =
        "<html><head><title>Volcanoes</title></head><body><article>\
         <p>The volcano dominated the valley for centuries, and the glacier on its \
         flank fed the rivers below through every season of every year.</p>\
         <p>Researchers tracked the volcano closely because the glacier's meltwater \
         carried fine sediment that recorded each eruption in the valley floor.</p>\
         </article></body></html>";
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let article_app = Router::new().route("/article", get(|| async { Html(ARTICLE) }));
    tokio::spawn(async move {
        axum::serve(listener, article_app).await.expect("serve");
    });

    let harness = harness(MockModelService::new(&topic_vocabulary()));
    let user_id = Uuid::new_v4();
    let url = format!("http://{addr}/article");

    let groups = harness
        .pipeline
        .vectorize(VectorizeRequest {
            source: Source::Url(url.clone()),
            user_id,
            filename: None,
        })
        .await
        .expect("vectorize");
    assert!(!groups.is_empty());

    let references = harness.repository.references_for(user_id);
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].source_url.as_deref(), Some(url.as_str()));
    assert_eq!(references[0].filename, "volcanoes.txt");
    assert!(references[0].file_size.unwrap() > 0);
}

// === Law: identical inputs produce byte-identical output ===

#[tokio::test]
async fn pipeline_output_is_deterministic() {
    let text = "The glacier advanced while the volcano slept and the monsoon returned.";

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let harness = harness(MockModelService::new(&topic_vocabulary()));
        let groups = harness
            .pipeline
            .vectorize(VectorizeRequest {
                source: Source::Text(text.to_string()),
                user_id: Uuid::nil(),
                filename: None,
            })
            .await
            .expect("vectorize");
        outputs.push(serde_json::to_string(&groups).expect("serialize"));
    }
    assert_eq!(outputs[0], outputs[1]);
}

// === Scenario: stored texts are queryable by concept over HTTP ===

#[tokio::test]
async fn texts_by_concept_returns_stored_references() {
    let harness = harness(MockModelService::new(&topic_vocabulary()));
    let user_id = Uuid::new_v4();

    harness
        .pipeline
        .vectorize(VectorizeRequest {
            source: Source::Text("The glacier carved the fjord over millennia.".to_string()),
            user_id,
            filename: Some("fjords.txt".to_string()),
        })
        .await
        .expect("vectorize");

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri(format!("/api/texts-by-concept?concept=glacier&user_id={user_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(json["success"], true);
    let texts = json["data"].as_array().expect("texts");
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0]["filename"], "fjords.txt");
    assert_eq!(texts[0]["user_id"], user_id.to_string());

    // A concept never extracted finds nothing.
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri(format!("/api/texts-by-concept?concept=jazz&user_id={user_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(json["data"].as_array().expect("texts").len(), 0);
}

// === Law: shuffling extractor output only reorders groups ===

#[tokio::test]
async fn concept_order_does_not_change_group_membership() {
    // Drive the pipeline through texts that mention the same topics in
    // different orders; membership must not depend on mention order.
    let forward = "The glacier and the volcano and the monsoon all mattered here.";
    let backward = "The monsoon and the volcano and the glacier all mattered here.";

    let mut memberships = Vec::new();
    for text in [forward, backward] {
        let harness = harness(MockModelService::new(&topic_vocabulary()));
        let groups = harness
            .pipeline
            .vectorize(VectorizeRequest {
                source: Source::Text(text.to_string()),
                user_id: Uuid::nil(),
                filename: None,
            })
            .await
            .expect("vectorize");
        let mut sets: Vec<Vec<String>> = groups
            .iter()
            .map(|g| {
                let mut names = g.concepts.clone();
                names.sort();
                names
            })
            .collect();
        sets.sort();
        memberships.push(sets);
    }
    assert_eq!(memberships[0], memberships[1]);
}

#[tokio::test]
async fn bad_user_id_is_rejected_with_400() {
    // user_id must be a UUID; a bad one is a 400, not a panic or a 500.
    let harness = harness(MockModelService::new(&topic_vocabulary()));
    let (status, body) = post_vectorize(
        app(&harness),
        serde_json::json!({ "text": "The glacier.", "user_id": "not-a-uuid" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");
}
