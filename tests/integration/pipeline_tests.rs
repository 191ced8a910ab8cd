//! Integration tests for the digest pipeline
//!
//! These tests use wiremock to stand in for the article site, its image CDN
//! and the LLM server, and run the full pipeline end-to-end through the
//! HTTP browser backend.

use article_digest::browser::{HttpBrowser, LaunchOptions};
use article_digest::config::{parse_config, Config};
use article_digest::cookies::load_cookie_file;
use article_digest::loader::PaywallVerdict;
use article_digest::output::write_article;
use article_digest::{ErrorCode, PipelineCoordinator};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock servers
fn create_test_config(llm_url: &str, output: &Path) -> Config {
    let toml = format!(
        r#"
[browser]
timeout-ms = 5000
max-retries = 2
min-delay-ms = 1
max-delay-ms = 5

[images]
max-concurrent = 2
max-width = 32

[llm]
base-url = "{}"
model = "llama3.1"
fallback-models = ["mistral"]
length = "short"
timeout-ms = 5000

[output]
directory = "{}"
"#,
        llm_url,
        output.display()
    );
    parse_config(&toml).expect("test config should be valid")
}

fn coordinator(config: &Config) -> PipelineCoordinator {
    let browser = HttpBrowser::launch(LaunchOptions::default()).expect("launch");
    PipelineCoordinator::from_config(config, Arc::new(browser)).expect("coordinator")
}

fn png(color: [u8; 3], width: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 4, Rgb(color)));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn article_page(body: &str) -> String {
    format!(
        r#"<html>
<head><title>Fallback title</title><meta property="og:title" content="The Real Headline"></head>
<body>
<nav>Home | World</nav>
<article>
<h1>The Real Headline</h1>
{}
</article>
</body></html>"#,
        body
    )
}

fn long_paragraphs() -> String {
    (0..8)
        .map(|i| format!("<p>Paragraph {} reports on the events of the day in considerable detail.</p>", i))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn mount_page(server: &MockServer, route: &str, status: u16, html: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_string(html)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(bytes)
                .insert_header("content-type", "image/png"),
        )
        .mount(server)
        .await;
}

async fn mount_llm(server: &MockServer, models: &[&str], summary: &str) {
    let models: Vec<_> = models
        .iter()
        .map(|name| serde_json::json!({"name": name, "size": 1, "digest": "sha256:x", "modified_at": "2024-01-01T00:00:00Z"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "models": models })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"response": summary, "done": true, "prompt_eval_count": 321}),
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_digest_with_images_and_summary() {
    let site = MockServer::start().await;
    let llm = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();

    let body = format!(
        r#"{}
<img src="/img/one.png" alt="One">
<img src="/img/two.png" alt="Two">
<img src="/img/copy-of-one.png" alt="Copy">
<img src="/img/missing.png">
<img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">"#,
        long_paragraphs()
    );

    Mock::given(method("GET"))
        .and(path("/news/story"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_page(&body)))
        .mount(&site)
        .await;
    mount_image(&site, "/img/one.png", png([255, 0, 0], 64)).await;
    mount_image(&site, "/img/two.png", png([0, 255, 0], 8)).await;
    mount_image(&site, "/img/copy-of-one.png", png([255, 0, 0], 64)).await;
    Mock::given(method("GET"))
        .and(path("/img/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;
    mount_llm(&llm, &["mistral:latest"], "  The day in brief.  ").await;

    let cookie_file = out.path().join("cookies.txt");
    std::fs::write(
        &cookie_file,
        "# Netscape HTTP Cookie File\n127.0.0.1\tFALSE\t/\tFALSE\t0\tsession\tabc\n",
    )
    .unwrap();
    let cookies = load_cookie_file(&cookie_file).unwrap();

    let config = create_test_config(&llm.uri(), out.path());
    let coordinator = coordinator(&config);
    let url = format!("{}/news/story", site.uri());

    let result = coordinator.run(&url, &cookies).await.unwrap();

    assert_eq!(result.title.as_deref(), Some("The Real Headline"));
    assert!(result.text.contains("Paragraph 7 reports"));
    assert!(!result.text.contains("Home | World"));
    assert_eq!(result.paywall, PaywallVerdict::None);

    assert_eq!(result.images.len(), 2);
    assert_eq!(result.images_dropped, 1);
    assert_eq!(result.images[0].remote.alt.as_deref(), Some("One"));
    assert_eq!(result.images[0].width, 32);
    assert!(result.images[0].optimized);
    assert_ne!(result.images[0].hash, result.images[1].hash);

    let summary = result.summary.as_ref().unwrap();
    assert_eq!(summary.model, "mistral:latest");
    assert_eq!(summary.summary, "The day in brief.");
    assert_eq!(summary.tokens_used, Some(321));

    let codes: Vec<_> = result.suppressed_errors.iter().map(|e| e.code()).collect();
    assert_eq!(codes, vec![ErrorCode::ImageDownloadFailed]);

    let index = write_article(&result, out.path()).await.unwrap();
    let markdown = std::fs::read_to_string(&index).unwrap();
    assert!(markdown.contains("# The Real Headline"));
    assert!(markdown.contains("## Summary\n\nThe day in brief."));
    let copied = std::fs::read_dir(index.parent().unwrap().join("images"))
        .unwrap()
        .count();
    assert_eq!(copied, 2);
}

#[tokio::test]
async fn test_llm_unreachable_yields_no_summary() {
    let site = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    mount_page(&site, "/story", 200, article_page(&long_paragraphs())).await;

    let config = create_test_config("http://127.0.0.1:1", out.path());
    let result = coordinator(&config)
        .run(&format!("{}/story", site.uri()), &[])
        .await
        .unwrap();

    assert!(result.summary.is_none());
    assert!(!result.text.is_empty());
    assert_eq!(
        result.suppressed_counts(),
        vec![(ErrorCode::LlmServerUnreachable, 1)]
    );
}

#[tokio::test]
async fn test_soft_paywall_is_fatal_with_suggestions() {
    let site = MockServer::start().await;
    let llm = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    let teaser = format!(
        "<p>{}</p><div class=\"overlay\">Subscribe now to continue reading</div>",
        "x".repeat(150)
    );
    mount_page(&site, "/premium", 200, article_page(&teaser)).await;

    let config = create_test_config(&llm.uri(), out.path());
    let err = coordinator(&config)
        .run(&format!("{}/premium", site.uri()), &[])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PaywallDetected);
    assert!(!err.is_recoverable());
    assert!(!err.suggestions().is_empty());
    assert!(llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payment_required_is_server_side_paywall() {
    let site = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    mount_page(&site, "/locked", 402, article_page("<p>Payment required.</p>")).await;

    let config = create_test_config("http://127.0.0.1:1", out.path());
    let err = coordinator(&config)
        .run(&format!("{}/locked", site.uri()), &[])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PaywallDetected);
    assert!(err.message().contains("server_side"));
}

#[tokio::test]
async fn test_expired_cookie_file_stops_run() {
    let site = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    mount_page(&site, "/story", 200, article_page(&long_paragraphs())).await;

    let cookie_file = out.path().join("cookies.json");
    std::fs::write(
        &cookie_file,
        r#"[
            {"name": "session", "value": "abc", "domain": "127.0.0.1", "path": "/", "secure": false, "httpOnly": true, "expirationDate": 1000000000},
            {"name": "prefs", "value": "dark", "domain": "127.0.0.1", "path": "/", "secure": false, "httpOnly": false}
        ]"#,
    )
    .unwrap();
    let cookies = load_cookie_file(&cookie_file).unwrap();

    let config = create_test_config("http://127.0.0.1:1", out.path());
    let err = coordinator(&config)
        .run(&format!("{}/story", site.uri()), &cookies)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::CookieExpired);
    assert!(err.message().contains("session"));
    assert!(!err.message().contains("prefs"));
    assert!(site.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_continues_after_failure() {
    let site = MockServer::start().await;
    let llm = MockServer::start().await;
    let out = tempfile::tempdir().unwrap();
    mount_page(&site, "/good", 200, article_page(&long_paragraphs())).await;
    mount_page(&site, "/gone", 404, "<html><body>Not found</body></html>".to_string()).await;
    mount_llm(&llm, &["llama3.1:8b"], "Summary.").await;

    let config = create_test_config(&llm.uri(), out.path());
    let urls = vec![
        format!("{}/gone", site.uri()),
        format!("{}/good", site.uri()),
    ];

    let results = coordinator(&config).run_batch(&urls, &[], 2).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, urls[0]);
    assert!(results[0].1.is_err());
    let good = results[1].1.as_ref().unwrap();
    assert_eq!(good.summary.as_ref().unwrap().model, "llama3.1:8b");
}
