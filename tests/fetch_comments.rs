//! End-to-end comment fetching against a mock API server

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::{Duration, Instant};

use reddit_dl::config::{Credentials, RetryConfig};
use reddit_dl::{
    CommentSort, CommentsFetcher, CommentsRequest, Config, Error, ErrorKind, FailurePolicy,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.client.base_url = server.uri();
    config.client.token_url = format!("{}/api/v1/access_token", server.uri());
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

fn comment(id: &str, parent: &str, replies: Value) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "name": format!("t1_{id}"),
            "body": format!("comment {id}"),
            "author": "someone",
            "parent_id": parent,
            "link_id": "t3_abc123",
            "score": 3,
            "created_utc": 1_650_000_000.0,
            "edited": false,
            "replies": replies
        }
    })
}

fn listing(children: Vec<Value>) -> Value {
    json!({"kind": "Listing", "data": {"children": children, "after": null, "before": null}})
}

fn thread(article: &str) -> Value {
    json!([
        listing(vec![json!({
            "kind": "t3",
            "data": {
                "id": article,
                "name": format!("t3_{article}"),
                "title": format!("Post {article}"),
                "subreddit": "rust",
                "num_comments": 3,
                "score": 10,
                "upvote_ratio": 0.9,
                "created_utc": 1_650_000_000.0
            }
        })]),
        listing(vec![
            comment(
                "c1",
                &format!("t3_{article}"),
                listing(vec![comment("c2", "t1_c1", json!(""))]),
            ),
            comment("c3", &format!("t3_{article}"), json!(null)),
            json!({"kind": "more", "data": {"id": "c9", "parent_id": format!("t3_{article}"), "count": 12, "depth": 0, "children": ["c9", "ca"]}}),
        ]),
    ])
}

async fn mount_thread(server: &MockServer, article: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/comments/{article}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(article)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn fetches_and_decodes_a_thread() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/comments/abc123"))
        .and(query_param("sort", "top"))
        .and(query_param("raw_json", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread("abc123")))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = CommentsFetcher::from_config(&config(&server)).unwrap();
    let request = CommentsRequest::new("abc123")
        .in_subreddit("rust")
        .sort(CommentSort::Top);

    let tree = fetcher
        .fetch(&CancellationToken::new(), &request)
        .await
        .unwrap();

    assert_eq!(tree.post.title, "Post abc123");
    assert_eq!(tree.comments.len(), 2);
    assert_eq!(tree.more.len(), 1);
    assert_eq!(tree.more[0].count, 12);
    let ids: Vec<&str> = tree.walk().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn authenticates_with_password_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-xyz",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer token-xyz"))
        .and(path("/comments/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread("abc123")))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.credentials = Some(Credentials {
        client_id: "app".to_string(),
        client_secret: "secret".to_string(),
        username: "someone".to_string(),
        password: "hunter2".to_string(),
    });
    let fetcher = CommentsFetcher::from_config(&config).unwrap();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        fetcher
            .fetch(&cancel, &CommentsRequest::new("abc123"))
            .await
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_preserves_order_and_reports_missing_threads() {
    let server = MockServer::start().await;
    for article in ["a1", "a2", "a4"] {
        mount_thread(&server, article).await;
    }
    Mock::given(method("GET"))
        .and(path("/comments/a3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = CommentsFetcher::from_config(&config(&server)).unwrap();
    let requests: Vec<CommentsRequest> = ["a1", "a2", "a3", "a4"]
        .into_iter()
        .map(CommentsRequest::new)
        .collect();

    let results = fetcher
        .fetch_many(&CancellationToken::new(), requests)
        .await
        .unwrap();

    let posts: Vec<Option<String>> = results
        .results()
        .iter()
        .map(|r| r.as_ref().ok().map(|t| t.post.id.clone()))
        .collect();
    assert_eq!(
        posts,
        vec![
            Some("a1".to_string()),
            Some("a2".to_string()),
            None,
            Some("a4".to_string())
        ]
    );
    let (index, err) = results.first_error().unwrap();
    assert_eq!(index, 2);
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(fetcher.active_tasks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fail_fast_batch_returns_the_failure() {
    let server = MockServer::start().await;
    mount_thread(&server, "a1").await;
    Mock::given(method("GET"))
        .and(path("/comments/a2"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.fetch.failure_policy = FailurePolicy::FailFast;
    config.fetch.max_concurrency = 1;
    let fetcher = CommentsFetcher::from_config(&config).unwrap();

    let err = fetcher
        .fetch_many(
            &CancellationToken::new(),
            vec![
                CommentsRequest::new("a1"),
                CommentsRequest::new("a2"),
                CommentsRequest::new("a3"),
            ],
        )
        .await
        .unwrap_err();

    match err {
        Error::Batch { index, source } => {
            assert_eq!(index, 1);
            assert_eq!(source.kind(), ErrorKind::Authentication);
        }
        other => panic!("expected Batch, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/comments/abc123"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_thread(&server, "abc123").await;

    let fetcher = CommentsFetcher::from_config(&config(&server)).unwrap();
    let tree = fetcher
        .fetch(&CancellationToken::new(), &CommentsRequest::new("abc123"))
        .await
        .unwrap();

    assert_eq!(tree.post.id, "abc123");
}

#[tokio::test]
async fn exhausted_server_budget_delays_the_next_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/comments/a1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-used", "600")
                .insert_header("x-ratelimit-reset", "1")
                .set_body_json(thread("a1")),
        )
        .mount(&server)
        .await;
    mount_thread(&server, "a2").await;

    let fetcher = CommentsFetcher::from_config(&config(&server)).unwrap();
    let cancel = CancellationToken::new();

    fetcher
        .fetch(&cancel, &CommentsRequest::new("a1"))
        .await
        .unwrap();
    let start = Instant::now();
    fetcher
        .fetch(&cancel, &CommentsRequest::new("a2"))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_batch_of_slow_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(thread("abc123"))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let fetcher = CommentsFetcher::from_config(&config(&server)).unwrap();
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let requests: Vec<CommentsRequest> = (0..20)
        .map(|i| CommentsRequest::new(format!("a{i}")))
        .collect();
    let start = Instant::now();
    let err = fetcher.fetch_many(&cancel, requests).await.unwrap_err();

    assert!(err.is_cancellation());
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(fetcher.active_tasks(), 0);
}

#[tokio::test]
async fn deep_reply_chains_are_truncated() {
    let server = MockServer::start().await;
    let mut chain = comment("z0", "t3_abc123", json!(""));
    for level in 1..200 {
        chain = comment(&format!("z{level}"), "t3_abc123", listing(vec![chain]));
    }
    let body = json!([
        {"kind": "t3", "data": {"id": "abc123", "title": "deep"}},
        listing(vec![chain]),
    ]);
    Mock::given(method("GET"))
        .and(path("/comments/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(serde_json::to_vec(&body).unwrap()))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.fetch.max_depth = 10;
    let fetcher = CommentsFetcher::from_config(&config).unwrap();

    let tree = fetcher
        .fetch(&CancellationToken::new(), &CommentsRequest::new("abc123"))
        .await
        .unwrap();

    assert_eq!(tree.comments.len(), 1);
    assert_eq!(tree.comments[0].tree_depth(), 11);
}
