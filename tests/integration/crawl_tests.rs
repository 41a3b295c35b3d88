//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the upstream APIs and run the
//! coordinator, the attachment downloader and the full pipeline end-to-end.

use policy_trawl::config::{parse_config, Config};
use policy_trawl::crawler::{download_attachments, run_crawl, Coordinator, CrawlHooks, RunOptions};
use policy_trawl::output::{FileOutput, SUMMARY_FILE};
use policy_trawl::source::{PortalSource, ProvincialSource};
use policy_trawl::storage::{open_store, PolicyStore, RunStatus};
use policy_trawl::CrawlPhase;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEARCH_PATH: &str = "/bascdata/nfrr/law-rule!noSession_es_regulation_search.gx";
const DETAIL_PATH: &str = "/bascdata/nfrr/law-rule!noSession_getById.gx";

/// Creates a test configuration with fast retries and the given sources
fn create_test_config(dir: &Path, output_extra: &str, sources: &str) -> Config {
    let out = dir.join("out");
    parse_config(&format!(
        r#"
        [request]
        delay-ms = 0
        timeout-secs = 5
        max-retries = 2
        retry-delay-ms = 10
        rate-limit-delay-ms = 10

        [pagination]
        page-size = 2
        max-empty-pages = 1

        [output]
        directory = "{out}"
        database-path = "{db}"
        {output_extra}

        {sources}
        "#,
        out = out.display(),
        db = out.join("policies.db").display(),
    ))
    .expect("Failed to parse test config")
}

fn provincial_source(base: &str, rule_types: &str) -> String {
    format!(
        r#"
        [[source]]
        name = "gd"
        kind = "provincial"
        base-url = "{base}/bascdata/"
        level = "省级"
        rule-types = [{rule_types}]
        "#
    )
}

fn search_row(id: u64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "passDate": "2021-12-30 00:00:00",
        "timeliness": "现行有效",
        "officeVo": { "groupName": "广东省人民代表大会常务委员会" },
        "formulateMode": "制定",
        "fileType": "地方性法规",
        "tagNames": ""
    })
}

fn search_response(token: &str, rows: Vec<Value>, total: usize) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 200,
        "msg": token,
        "data": { "rows": rows, "total": total }
    }))
}

/// Serves a plain detail payload for every ID not mocked more specifically
async fn mount_default_detail(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(DETAIL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lawRule": { "content": "正文" },
            "list": []
        })))
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer, wanted_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == wanted_path)
        .count()
}

#[tokio::test]
async fn test_provincial_crawl_with_token_and_attachments() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp = TempDir::new().unwrap();
    let config = create_test_config(temp.path(), "", &provincial_source(&base_url, "1"));

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .and(body_partial_json(json!({ "pageNum": 1, "lawRuleType": 1 })))
        .respond_with(search_response(
            "tok-1",
            vec![search_row(101, "广东省土地管理条例"), search_row(102, "广东省矿产资源管理条例")],
            4,
        ))
        .mount(&mock_server)
        .await;

    // The second page is only served when the token from the first is echoed
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .and(body_partial_json(json!({ "pageNum": 2 })))
        .and(header("Q-Token", "tok-1"))
        .respond_with(search_response(
            "tok-2",
            vec![search_row(101, "广东省土地管理条例"), search_row(103, "广东省测绘条例")],
            4,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(DETAIL_PATH))
        .and(body_string_contains("id=101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lawRule": {
                "content": "第一条 为了加强土地管理，制定本条例。",
                "effectiveDate": "2022-01-01 00:00:00",
                "keywords": "土地"
            },
            "list": [
                { "fileName": "附件1.pdf", "filePath": "/up/a(1).pdf", "fileExt": "pdf" }
            ]
        })))
        .mount(&mock_server)
        .await;
    mount_default_detail(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/bascdata/downloadFile"))
        .and(query_param("fileFolder", "/up/aleft1right.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 test".to_vec()))
        .mount(&mock_server)
        .await;

    let source = ProvincialSource::new(&config.sources[0], &config).unwrap();
    let mut coordinator = Coordinator::new(source, config.pagination.clone(), Duration::ZERO);

    let mut emitted = Vec::new();
    let outcome = {
        let hooks = CrawlHooks::new().on_policy(|record| {
            emitted.push(record.title.clone());
            Ok(())
        });
        coordinator.run(hooks).await.unwrap()
    };

    assert_eq!(outcome.final_phase, CrawlPhase::Done);
    assert_eq!(outcome.policies.len(), 3);
    assert_eq!(emitted.len(), 3);
    assert_eq!(outcome.report.total, 4);
    assert_eq!(outcome.report.valid, 3);
    assert_eq!(outcome.report.duplicates, 1);
    assert!(outcome.failed_classifications.is_empty());
    assert_eq!(coordinator.source().q_token(), "tok-2");
    assert_eq!(request_count(&mock_server, SEARCH_PATH).await, 2);
    assert_eq!(request_count(&mock_server, DETAIL_PATH).await, 3);

    let first = &outcome.policies[0];
    assert_eq!(first.category, "地方性法规");
    assert_eq!(first.pub_date.to_string(), "2021-12-30");
    assert!(first.content.starts_with("第一条"));
    assert_eq!(first.effective_date.to_string(), "2022-01-01");
    assert_eq!(first.provincial().unwrap().keywords, "土地");
    assert_eq!(first.attachments.len(), 1);
    assert_eq!(outcome.policies[1].content, "正文");

    // Attachments go through the same adapter once paging is done
    let mut source = coordinator.into_source();
    let output = FileOutput::new(temp.path().join("files"), false, false);
    let downloaded = download_attachments(
        &mut source,
        &outcome.policies,
        &output,
        &[],
        &AtomicBool::new(false),
    )
    .await
    .unwrap();

    assert_eq!(downloaded.len(), 1);
    assert_eq!(downloaded[0].record_key, "id:101");
    assert_eq!(std::fs::read(&downloaded[0].path).unwrap(), b"%PDF-1.4 test");
    assert!(downloaded[0].path.starts_with(output.attachment_dir("gd")));
}

#[tokio::test]
async fn test_provincial_rate_limit_message_recovers() {
    let mock_server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = create_test_config(temp.path(), "", &provincial_source(&mock_server.uri(), "3"));

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 500,
            "msg": "Too many requests"
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(search_response("tok", vec![search_row(7, "规范性文件")], 1))
        .mount(&mock_server)
        .await;
    mount_default_detail(&mock_server).await;

    let source = ProvincialSource::new(&config.sources[0], &config).unwrap();
    let mut coordinator = Coordinator::new(source, config.pagination.clone(), Duration::ZERO);
    let outcome = coordinator.run(CrawlHooks::new()).await.unwrap();

    assert_eq!(outcome.final_phase, CrawlPhase::Done);
    assert_eq!(outcome.policies.len(), 1);
    assert_eq!(outcome.policies[0].category, "规范性文件");
    assert_eq!(request_count(&mock_server, SEARCH_PATH).await, 2);
}

#[tokio::test]
async fn test_portal_json_search_with_detail_backfill() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let temp = TempDir::new().unwrap();
    let config = create_test_config(
        temp.path(),
        "",
        &format!(
            r#"
            [[source]]
            name = "mnr"
            kind = "portal"
            base-url = "{base_url}/"
            search-api = "{base_url}/search"
            channel-id = "216640"
            level = "部级"
            "#
        ),
    );

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("channelid", "216640"))
        .and(query_param("page", "1"))
        .and(query_param("perpage", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "results": [
                { "title": "关于<em>土地</em>管理的通知", "pubdate": "2022-03-01", "url": "/zc/1.html" },
                { "title": "无日期的通知", "url": "/zc/2.html" }
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/zc/1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><body>
                    <table>
                      <tr><td>发布机构</td><td>自然资源部</td></tr>
                      <tr><td>发文字号：自然资发〔2022〕1号</td></tr>
                    </table>
                    <div id="content"><p>第一条 土地管理。</p><p>第二条 附则。</p></div>
                    <a href="/files/notice.pdf">附件</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&mock_server)
        .await;

    let source = PortalSource::new(&config.sources[0], &config).unwrap();
    let mut coordinator = Coordinator::new(source, config.pagination.clone(), Duration::ZERO);

    let mut messages = Vec::new();
    let outcome = {
        let hooks = CrawlHooks::new().on_progress(|message| messages.push(message.to_string()));
        coordinator.run(hooks).await.unwrap()
    };

    assert_eq!(outcome.final_phase, CrawlPhase::Done);
    assert_eq!(outcome.policies.len(), 1);
    assert_eq!(outcome.invalid.len(), 1);
    assert_eq!(outcome.report.invalid, 1);
    assert_eq!(outcome.report.reasons.get("missing_date"), Some(&1));
    assert!(messages.iter().any(|m| m.contains("全部")));

    let record = &outcome.policies[0];
    assert_eq!(record.title, "关于土地管理的通知");
    assert_eq!(record.url, format!("{}/zc/1.html", base_url));
    assert_eq!(record.publisher, "自然资源部");
    assert_eq!(record.doc_number, "自然资发〔2022〕1号");
    assert_eq!(record.level, "部级");
    assert!(record.content.contains("第一条 土地管理。"));
    assert!(record.content.contains("第二条 附则。"));
    assert_eq!(record.attachments.len(), 1);
    assert_eq!(record.attachments[0].extension, "pdf");

    // The invalid record never gets a detail fetch
    assert_eq!(request_count(&mock_server, "/zc/2.html").await, 0);
}

#[tokio::test]
async fn test_full_run_stores_and_renders() {
    let mock_server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = create_test_config(
        temp.path(),
        r#"download-attachments = true
        attachment-extensions = ["pdf"]"#,
        &provincial_source(&mock_server.uri(), "1"),
    );

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(search_response("tok", vec![search_row(201, "广东省湿地保护条例")], 1))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(DETAIL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lawRule": { "content": "第一条 湿地保护。" },
            "list": [
                { "fileName": "说明.pdf", "filePath": "/up/b.pdf", "fileExt": "pdf" },
                { "fileName": "表格.xls", "filePath": "/up/c.xls", "fileExt": "xls" }
            ]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bascdata/downloadFile"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"file body".to_vec()))
        .mount(&mock_server)
        .await;

    let summary = run_crawl(&config, "hash-1", &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.sources.len(), 1);
    let gd = &summary.sources[0];
    assert_eq!(gd.source, "gd");
    assert_eq!(gd.status, RunStatus::Completed);
    assert_eq!(gd.policies, 1);
    assert_eq!(gd.attachments_downloaded, 1);
    assert_eq!(summary.total_policies(), 1);
    assert!(summary.finished_at.is_some());

    // The xls attachment is filtered out before any request is made
    assert_eq!(request_count(&mock_server, "/bascdata/downloadFile").await, 1);

    let store = open_store(Path::new(&config.output.database_path)).unwrap();
    let stored = store.get_policy("gd", "id:201").unwrap().unwrap();
    assert_eq!(stored.title, "广东省湿地保护条例");
    assert_eq!(stored.content, "第一条 湿地保护。");
    assert_eq!(stored.attachment_count, 2);
    assert_eq!(store.count_attachments().unwrap(), (2, 1));

    let run = store.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "hash-1");
    assert_eq!(run.valid, 1);

    let out = Path::new(&config.output.directory);
    let rendered: Vec<String> = std::fs::read_dir(out.join("gd"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(rendered.iter().any(|name| name.ends_with(".json")));
    assert!(rendered.iter().any(|name| name.ends_with(".md")));

    let report = std::fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
    assert!(report.contains("# Policy-Trawl Crawl Summary"));
    assert!(report.contains("gd"));
}

#[tokio::test]
async fn test_stop_before_run_makes_no_requests() {
    let mock_server = MockServer::start().await;
    let temp = TempDir::new().unwrap();
    let config = create_test_config(temp.path(), "", &provincial_source(&mock_server.uri(), ""));

    Mock::given(method("POST"))
        .respond_with(search_response("tok", vec![search_row(1, "不应抓取")], 1))
        .mount(&mock_server)
        .await;

    let options = RunOptions::default();
    options.stop.store(true, Ordering::SeqCst);

    let summary = run_crawl(&config, "hash", &options).await.unwrap();

    assert!(summary.sources.is_empty());
    assert_eq!(mock_server.received_requests().await.unwrap_or_default().len(), 0);
    assert!(Path::new(&config.output.directory).join(SUMMARY_FILE).exists());
}

#[tokio::test]
async fn test_source_without_results_does_not_block_others() {
    let mock_server = MockServer::start().await;
    let temp = TempDir::new().unwrap();

    // Nothing is mounted for the first source, so every search gets a 404
    let sources = format!(
        r#"
        [[source]]
        name = "broken"
        kind = "provincial"
        base-url = "{base}/missing/"
        rule-types = [1]

        {healthy}
        "#,
        base = mock_server.uri(),
        healthy = provincial_source(&mock_server.uri(), "1"),
    );
    let config = create_test_config(temp.path(), "", &sources);

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(search_response("tok", vec![search_row(301, "广东省水利条例")], 1))
        .mount(&mock_server)
        .await;
    mount_default_detail(&mock_server).await;

    let summary = run_crawl(&config, "hash", &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.sources.len(), 2);
    assert_eq!(summary.sources[0].source, "broken");
    assert_eq!(summary.sources[0].policies, 0);
    assert_eq!(summary.sources[0].status, RunStatus::Completed);
    assert_eq!(summary.sources[1].policies, 1);
    assert_eq!(summary.total_policies(), 1);
}
