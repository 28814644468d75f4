use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use frame_judge::config::{EvalConfig, JudgeConfig, RetryPolicy};
use frame_judge::evidence::NoopFrameRecorder;
use frame_judge::judge::{ArkJudge, JudgeModel};
use frame_judge::orchestrator::{Evaluator, MediaRequest};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn test_config(server: &MockServer) -> EvalConfig {
    EvalConfig {
        judge: JudgeConfig {
            base_url: server.uri(),
            model: "test-model".to_string(),
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(5),
        },
        fetch_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(0),
        },
        max_image_bytes: 64 * 1024 * 1024,
        debug_frame_dir: None,
        decode_parallelism: 2,
    }
}

fn test_evaluator(server: &MockServer) -> Evaluator {
    let config = test_config(server);
    let judge: Arc<dyn JudgeModel> = Arc::new(ArkJudge::new(&config.judge).unwrap());
    Evaluator::new(config, judge, Arc::new(NoopFrameRecorder)).unwrap()
}

fn verdict_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": text } }]
    }))
}

async fn mount_image(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        )
        .mount(server)
        .await;
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn image_verdict_passes_through_verbatim() {
    let server = MockServer::start().await;
    mount_image(&server, "/media/photo.jpg").await;

    // Not JSON on purpose: the verdict is opaque text.
    let verdict = "Borderline exposure but acceptable; no compliance concerns.";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(verdict_response(verdict))
        .mount(&server)
        .await;

    let evaluator = test_evaluator(&server);
    let response = evaluator
        .handle(MediaRequest::image(format!(
            "{}/media/photo.jpg",
            server.uri()
        )))
        .await
        .unwrap();

    assert_eq!(response.image_result.as_deref(), Some(verdict));
    assert!(response.image_error.is_none());
    assert!(response.video_result.is_none());
    assert!(response.video_error.is_none());
}

#[tokio::test]
async fn one_side_failing_never_discards_the_other() {
    let server = MockServer::start().await;
    mount_image(&server, "/media/photo.jpg").await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(verdict_response("image looks clean"))
        .mount(&server)
        .await;

    // No mock for the video route: the GET comes back 404.
    let request = MediaRequest {
        image_url: Some(format!("{}/media/photo.jpg", server.uri())),
        video_url: Some(format!("{}/media/missing.mp4", server.uri())),
    };

    let evaluator = test_evaluator(&server);
    let response = evaluator.handle(request).await.unwrap();

    assert_eq!(response.image_result.as_deref(), Some("image looks clean"));
    assert!(response.video_result.is_none());

    let video_error = response.video_error.expect("expected a video error");
    assert_eq!(video_error.kind, "fetch_error");
    assert!(video_error.message.contains("404"));
}

#[tokio::test]
async fn requests_without_urls_fail_fast() {
    let server = MockServer::start().await;
    let evaluator = test_evaluator(&server);

    let err = evaluator.handle(MediaRequest::default()).await.unwrap_err();
    assert_eq!(err.kind(), "validation_error");

    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn judge_retries_transient_failures() {
    let server = MockServer::start().await;
    mount_image(&server, "/media/photo.jpg").await;

    let first = ResponseTemplate::new(500).set_body_json(json!({
        "error": { "message": "internal error" }
    }));
    let second = verdict_response("ok after retry");
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first,
            second,
        })
        .mount(&server)
        .await;

    let evaluator = test_evaluator(&server);
    let response = evaluator
        .handle(MediaRequest::image(format!(
            "{}/media/photo.jpg",
            server.uri()
        )))
        .await
        .unwrap();

    assert_eq!(response.image_result.as_deref(), Some("ok after retry"));

    let received = server.received_requests().await.unwrap();
    let judge_calls = received
        .iter()
        .filter(|r| r.url.path() == "/chat/completions")
        .count();
    assert_eq!(judge_calls, 2);
}

#[tokio::test]
async fn fetch_retries_transient_failures() {
    let server = MockServer::start().await;

    let first = ResponseTemplate::new(500);
    let second = ResponseTemplate::new(200)
        .insert_header("content-type", "image/jpeg")
        .set_body_bytes(vec![0xFF, 0xD8]);
    Mock::given(method("GET"))
        .and(path("/media/flaky.jpg"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first,
            second,
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(verdict_response("fine"))
        .mount(&server)
        .await;

    let evaluator = test_evaluator(&server);
    let response = evaluator
        .handle(MediaRequest::image(format!(
            "{}/media/flaky.jpg",
            server.uri()
        )))
        .await
        .unwrap();

    assert_eq!(response.image_result.as_deref(), Some("fine"));

    let received = server.received_requests().await.unwrap();
    let fetches = received
        .iter()
        .filter(|r| r.url.path() == "/media/flaky.jpg")
        .count();
    assert_eq!(fetches, 2);
}

#[tokio::test]
async fn evaluation_can_be_cancelled_mid_judge_call() {
    let server = MockServer::start().await;
    mount_image(&server, "/img.jpg").await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(verdict_response("slow").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let evaluator = test_evaluator(&server);
    let request = MediaRequest::image(format!("{}/img.jpg", server.uri()));

    // Dropping the future on timeout must abandon the in-flight call.
    let outcome = tokio::time::timeout(Duration::from_millis(100), evaluator.handle(request)).await;
    assert!(outcome.is_err());
}

#[tokio::test]
async fn mismatched_content_type_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/media/clip.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>not a video</html>"),
        )
        .mount(&server)
        .await;

    let evaluator = test_evaluator(&server);
    let response = evaluator
        .handle(MediaRequest::video(format!(
            "{}/media/clip.mp4",
            server.uri()
        )))
        .await
        .unwrap();

    assert!(response.video_result.is_none());
    let video_error = response.video_error.expect("expected a video error");
    assert_eq!(video_error.kind, "fetch_error");
    assert!(video_error.message.contains("content-type"));

    let received = server.received_requests().await.unwrap();
    let fetches = received
        .iter()
        .filter(|r| r.url.path() == "/media/clip.mp4")
        .count();
    assert_eq!(fetches, 1);
}
