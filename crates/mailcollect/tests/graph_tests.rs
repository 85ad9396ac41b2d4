//! Graph collector against a mock Graph API.

mod common;

use futures_util::StreamExt;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

use common::*;
use mailcollect::collector::{Collector, GraphCollector};
use mailcollect::model::{CollectOptions, EmailFilter};

const FOLDER: &str = "inbox";

async fn mount_three_pages(harness: &TestHarness, pages_expected: [u64; 2]) {
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param_is_missing("$skiptoken"))
        .and(query_param("$top", "10"))
        .and(header("authorization", format!("Bearer {}", common::harness::TEST_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            graph_messages("msg", 0, 10),
            Some(harness.next_link(FOLDER, "p2")),
        )))
        .expect(1)
        .mount(&harness.server)
        .await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param("$skiptoken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            graph_messages("msg", 10, 10),
            Some(harness.next_link(FOLDER, "p3")),
        )))
        .expect(pages_expected[0])
        .mount(&harness.server)
        .await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param("$skiptoken", "p3"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(odata_page(graph_messages("msg", 20, 5), None)),
        )
        .expect(pages_expected[1])
        .mount(&harness.server)
        .await;
}

#[tokio::test]
async fn test_collect_stops_after_first_page_when_it_satisfies_max_results() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_three_pages(&harness, [0, 0]).await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        max_results: Some(10),
        ..Default::default()
    };
    let result = collector.collect(&filter, &CollectOptions::default()).await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.messages.len(), 10);
    assert_eq!(result.messages[9].id, "msg-9");
}

#[tokio::test]
async fn test_collect_stops_requesting_pages_at_max_results() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_three_pages(&harness, [1, 0]).await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        max_results: Some(15),
        ..Default::default()
    };
    let result = collector.collect(&filter, &CollectOptions::default()).await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.messages.len(), 15);
    assert_eq!(result.filtered_count, 15);
    assert_eq!(result.total_count, 15);
    assert_eq!(result.messages[0].id, "msg-0");
    assert_eq!(result.messages[14].id, "msg-14");
}

#[tokio::test]
async fn test_collect_with_zero_max_results_returns_nothing() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(odata_page(graph_messages("msg", 0, 5), None)),
        )
        .expect(0)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        max_results: Some(0),
        ..Default::default()
    };
    let result = collector.collect(&filter, &CollectOptions::default()).await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert!(result.messages.is_empty());
    assert_eq!(result.filtered_count, 0);
}

#[tokio::test]
async fn test_second_page_asks_only_for_the_remainder() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param_is_missing("$skiptoken"))
        .and(query_param("$top", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            graph_messages("msg", 0, 10),
            Some(harness.next_link(FOLDER, "p2")),
        )))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param("$skiptoken", "p2"))
        .and(query_param("$top", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            graph_messages("msg", 10, 5),
            Some(harness.next_link(FOLDER, "p3")),
        )))
        .expect(1)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        max_results: Some(15),
        ..Default::default()
    };
    let result = collector.collect(&filter, &CollectOptions::default()).await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.messages.len(), 15);
    assert_eq!(result.messages[14].id, "msg-14");
    let requests = harness.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_collect_walks_every_page_without_limit() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_three_pages(&harness, [1, 1]).await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let result = collector
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    assert_eq!(result.messages.len(), 25);
    assert_eq!(result.total_count, 25);
}

#[tokio::test]
async fn test_stream_consumer_stopping_early_fetches_one_page() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_three_pages(&harness, [0, 0]).await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter::default();
    let options = CollectOptions::default();
    let ids: Vec<String> = collector
        .collect_stream(&filter, &options)
        .take(3)
        .map(|item| item.unwrap().id)
        .collect()
        .await;

    assert_eq!(ids, vec!["msg-0", "msg-1", "msg-2"]);
    let requests = harness.server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_throttled_request_is_retried_once() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(odata_page(graph_messages("msg", 0, 2), None)),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let result = collector
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.messages.len(), 2);
}

#[tokio::test]
async fn test_persistent_throttling_fails_the_call() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(2)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let result = collector
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    assert!(result.messages.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("Connection error"));
    assert!(result.errors[0].contains("throttled"));
}

#[tokio::test]
async fn test_rejected_token_is_a_connection_error() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let result = collector
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    assert!(result.messages.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("Authentication failed"));
}

#[tokio::test]
async fn test_subject_filter_uses_search_and_filters_rest_locally() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .and(query_param("$search", "\"invoice\""))
        .and(query_param_is_missing("$filter"))
        .and(query_param_is_missing("$orderby"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![
                GraphMessageBuilder::new("a")
                    .subject("Invoice 42")
                    .from("billing@contoso.com")
                    .build(),
                GraphMessageBuilder::new("b")
                    .subject("Invoice copy")
                    .from("someone@else.org")
                    .build(),
            ],
            None,
        )))
        .expect(1)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        subject_contains: Some("invoice".to_string()),
        sender: Some("billing@".to_string()),
        ..Default::default()
    };
    let result = collector.collect(&filter, &CollectOptions::default()).await;

    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].id, "a");
    assert_eq!(result.total_count, 2);
}

#[tokio::test]
async fn test_sender_filter_is_pushed_to_the_server() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path(harness.messages_path("archive")))
        .and(query_param(
            "$filter",
            "from/emailAddress/address eq 'billing@contoso.com'",
        ))
        .and(query_param("$orderby", "receivedDateTime desc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(odata_page(graph_messages("msg", 0, 1), None)),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let filter = EmailFilter {
        sender: Some("billing@contoso.com".to_string()),
        ..Default::default()
    };
    let options = CollectOptions {
        folder: Some("archive".to_string()),
        ..Default::default()
    };
    let result = collector.collect(&filter, &options).await;

    assert_eq!(result.messages.len(), 1);
}

async fn mount_message_with_attachment(harness: &TestHarness) {
    Mock::given(method("GET"))
        .and(path(harness.messages_path(FOLDER)))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![GraphMessageBuilder::new("AAMk1")
                .attachment("att1", "q1.pdf", "application/pdf", 0)
                .build()],
            None,
        )))
        .mount(&harness.server)
        .await;
}

fn attachment_path() -> &'static str {
    "/v1.0/me/messages/AAMk1/attachments/att1/$value"
}

#[tokio::test]
async fn test_attachment_bytes_are_not_fetched_by_default() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_message_with_attachment(&harness).await;
    Mock::given(method("GET"))
        .and(path(attachment_path()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
        .expect(0)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let result = collector
        .collect(&EmailFilter::default(), &CollectOptions::default())
        .await;

    let attachment = &result.messages[0].attachments[0];
    assert_eq!(attachment.filename, "q1.pdf");
    assert!(!attachment.has_content());
}

#[tokio::test]
async fn test_attachment_bytes_are_fetched_on_request() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_message_with_attachment(&harness).await;
    Mock::given(method("GET"))
        .and(path(attachment_path()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .expect(1)
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let options = CollectOptions {
        include_attachments: true,
        ..Default::default()
    };
    let result = collector.collect(&EmailFilter::default(), &options).await;

    let attachment = &result.messages[0].attachments[0];
    assert_eq!(attachment.content, b"%PDF-1.7");
    assert_eq!(attachment.size_bytes, 8);
}

#[tokio::test]
async fn test_failed_attachment_keeps_the_message() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;
    mount_message_with_attachment(&harness).await;
    Mock::given(method("GET"))
        .and(path(attachment_path()))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    let options = CollectOptions {
        include_attachments: true,
        ..Default::default()
    };
    let result = collector.collect(&EmailFilter::default(), &options).await;

    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("q1.pdf"));
}

#[tokio::test]
async fn test_list_folders_follows_next_link() {
    let harness = TestHarness::new().await;
    harness.seed_access_token().await;

    Mock::given(method("GET"))
        .and(path("/v1.0/me/mailFolders"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![serde_json::json!({"id": "1", "displayName": "Inbox"})],
            Some(format!("{}/v1.0/me/mailFolders?page=2", harness.server.uri())),
        )))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me/mailFolders"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![serde_json::json!({"id": "2", "displayName": "Archive"})],
            None,
        )))
        .mount(&harness.server)
        .await;

    let collector = GraphCollector::new(harness.graph_config(10)).unwrap();
    assert_eq!(collector.list_folders().await.unwrap(), vec!["Inbox", "Archive"]);
}
