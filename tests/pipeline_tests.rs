//! Integration tests for the pipeline stages
//!
//! Each stage runs against a wiremock upstream and in-memory collaborators:
//! the shared queue, the write-once blob store, the watermark store, and the
//! direct egress provider.

use immo_harvest::config::{
    BudgetConfig, Config, FetchConfig, QueueConfig, StorageConfig, UpstreamConfig,
};
use immo_harvest::fetch::DirectEgress;
use immo_harvest::pipeline::{
    Budget, DiscoveryWorker, Dispatcher, ExtractorWorker, IdBatch, PageBatch,
};
use immo_harvest::queue::{BatchQueue, MemoryQueue, QueueMessage};
use immo_harvest::store::{MemoryBlobStore, MemoryWatermarkStore, WatermarkStore};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CATEGORY: &str = "house/for-sale";
const SEARCH_PATH: &str = "/search-results/house/for-sale";

/// A config pointing at the mock upstream, with batch sizes small enough to
/// observe chunking
fn test_config(base_url: &str) -> Config {
    Config {
        upstream: UpstreamConfig {
            base_url: base_url.to_string(),
            items_per_page: 30,
            default_total_items: 60,
            categories: vec![CATEGORY.to_string()],
        },
        queues: QueueConfig {
            page_batch_queue: "page-batches".to_string(),
            id_batch_queue: "id-batches".to_string(),
            page_batch_size: 4,
            id_batch_size: 100,
        },
        storage: StorageConfig {
            database_path: ":memory:".to_string(),
            blob_root: "/tmp/unused".to_string(),
        },
        fetch: FetchConfig::default(),
        budget: BudgetConfig::default(),
    }
}

fn page_batch_message(id: &str, pages: &[u32]) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        body: PageBatch {
            transaction_type: CATEGORY.to_string(),
            page_numbers: pages.to_vec(),
        }
        .to_json()
        .unwrap(),
    }
}

fn id_batch_message(id: &str, listing_ids: &[i64]) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        body: IdBatch {
            transaction_type: CATEGORY.to_string(),
            listing_ids: listing_ids.to_vec(),
        }
        .to_json()
        .unwrap(),
    }
}

async fn mount_search_page(server: &MockServer, page: u32, ids: &[i64]) {
    let results: Vec<_> = ids
        .iter()
        .map(|id| json!({"id": id, "price": {"mainValue": 250_000}}))
        .collect();
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": results})))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, listing_id: i64, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/classified/get-result/{}", listing_id)))
        .respond_with(template)
        .mount(server)
        .await;
}

// --- Dispatcher ---

#[tokio::test]
async fn test_dispatcher_chunks_page_range() {
    let mock_server = MockServer::start().await;

    // 150 items at 30 per page plans pages 1..=6, chunked by 4 into 2 batches
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalItems": 150})))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let rotation = DirectEgress::new();

    let dispatcher = Dispatcher::new(&config, &queue, &rotation);
    let summary = dispatcher
        .run(&Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert_eq!(summary.categories_dispatched, 1);
    assert_eq!(summary.categories_skipped, 0);
    assert_eq!(summary.messages_sent, 2);

    let messages = queue.receive("page-batches", 10).unwrap();
    assert_eq!(messages.len(), 2);

    let first = PageBatch::from_json(&messages[0].body).unwrap();
    assert_eq!(first.transaction_type, CATEGORY);
    assert_eq!(first.page_numbers, vec![1, 2, 3, 4]);

    let second = PageBatch::from_json(&messages[1].body).unwrap();
    assert_eq!(second.page_numbers, vec![5, 6]);
}

#[tokio::test]
async fn test_dispatcher_falls_back_when_total_items_missing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let rotation = DirectEgress::new();

    let dispatcher = Dispatcher::new(&config, &queue, &rotation);
    let summary = dispatcher
        .run(&Budget::from_config(&config.budget))
        .await
        .unwrap();

    // Fallback of 60 items plans pages 1..=3, one batch
    assert_eq!(summary.messages_sent, 1);
    let messages = queue.receive("page-batches", 10).unwrap();
    let batch = PageBatch::from_json(&messages[0].body).unwrap();
    assert_eq!(batch.page_numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_dispatcher_stops_when_budget_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalItems": 150})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let rotation = DirectEgress::new();

    let dispatcher = Dispatcher::new(&config, &queue, &rotation);
    let summary = dispatcher.run(&Budget::new(Duration::ZERO)).await.unwrap();

    assert_eq!(summary.categories_dispatched, 0);
    assert_eq!(summary.categories_skipped, 1);
    assert_eq!(summary.messages_sent, 0);
    assert_eq!(queue.depth("page-batches").unwrap(), 0);
}

#[tokio::test]
async fn test_dispatcher_rotates_egress_after_failed_probe() {
    let mock_server = MockServer::start().await;

    // First probe attempt fails outright, the retry under a fresh egress
    // identity succeeds
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalItems": 30})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let rotation = DirectEgress::new();

    let dispatcher = Dispatcher::new(&config, &queue, &rotation);
    let summary = dispatcher
        .run(&Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert_eq!(summary.categories_dispatched, 1);
    assert_eq!(summary.messages_sent, 1);
}

// --- Discovery ---

#[tokio::test]
async fn test_discovery_forwards_only_ids_above_watermark() {
    let mock_server = MockServer::start().await;
    mount_search_page(&mock_server, 1, &[10, 20, 30]).await;
    mount_search_page(&mock_server, 2, &[5, 40]).await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    watermarks.advance(CATEGORY, 25).unwrap();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let messages = [page_batch_message("1", &[1, 2])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.is_empty());

    // Only ids above the watermark of 25 go forward
    let forwarded = queue.receive("id-batches", 10).unwrap();
    assert_eq!(forwarded.len(), 1);
    let batch = IdBatch::from_json(&forwarded[0].body).unwrap();
    assert_eq!(batch.transaction_type, CATEGORY);
    assert_eq!(batch.listing_ids, vec![30, 40]);

    // Watermark lands on the highest id seen, not the highest forwarded
    assert_eq!(watermarks.get(CATEGORY).unwrap(), 40);

    // The snapshot holds every summary from the batch, old and new
    let keys = blobs.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("snapshots/house/for-sale/"));
    let snapshot: serde_json::Value = serde_json::from_slice(&blobs.get(&keys[0]).unwrap()).unwrap();
    let summaries = snapshot.as_object().unwrap();
    assert_eq!(summaries.len(), 5);
    assert!(summaries.contains_key("5"));
    assert!(summaries.contains_key("40"));
}

#[tokio::test]
async fn test_discovery_chunks_forwarded_ids() {
    let mock_server = MockServer::start().await;
    mount_search_page(&mock_server, 1, &[11, 12, 13, 14, 15]).await;

    let mut config = test_config(&mock_server.uri());
    config.queues.id_batch_size = 2;
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let messages = [page_batch_message("1", &[1])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.is_empty());
    let forwarded = queue.receive("id-batches", 10).unwrap();
    assert_eq!(forwarded.len(), 3);
    let last = IdBatch::from_json(&forwarded[2].body).unwrap();
    assert_eq!(last.listing_ids, vec![15]);
}

#[tokio::test]
async fn test_discovery_exhausted_page_fails_whole_message() {
    let mock_server = MockServer::start().await;
    mount_search_page(&mock_server, 1, &[10, 20]).await;
    Mock::given(method("GET"))
        .and(path(SEARCH_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let messages = [page_batch_message("7", &[1, 2])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    // Nothing from the batch is committed: no snapshot, no forwarded ids,
    // and the watermark stays put so the ids behind page 2 stay discoverable
    assert!(report.contains("7"));
    assert!(blobs.is_empty());
    assert_eq!(queue.depth("id-batches").unwrap(), 0);
    assert_eq!(watermarks.get(CATEGORY).unwrap(), 0);
}

#[tokio::test]
async fn test_discovery_redelivery_is_idempotent() {
    let mock_server = MockServer::start().await;
    mount_search_page(&mock_server, 1, &[10, 20, 30, 40]).await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let budget = Budget::from_config(&config.budget);

    let first = worker.run(&[page_batch_message("1", &[1])], &budget).await.unwrap();
    assert!(first.is_empty());
    assert_eq!(watermarks.get(CATEGORY).unwrap(), 40);
    assert_eq!(queue.depth("id-batches").unwrap(), 1);

    // Redelivered batch: everything is at or below the watermark now, so no
    // ids are forwarded again and the watermark does not move
    let second = worker.run(&[page_batch_message("2", &[1])], &budget).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(watermarks.get(CATEGORY).unwrap(), 40);
    assert_eq!(queue.depth("id-batches").unwrap(), 1);

    // Both runs snapshot what they saw
    assert_eq!(blobs.len(), 2);
}

#[tokio::test]
async fn test_discovery_fails_messages_preemptively_near_deadline() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(&mock_server.uri());
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let messages = [
        page_batch_message("1", &[1]),
        page_batch_message("2", &[2]),
    ];
    let report = worker
        .run(&messages, &Budget::new(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert!(report.contains("1"));
    assert!(report.contains("2"));
}

#[tokio::test]
async fn test_discovery_malformed_message_is_reported() {
    let config = test_config("http://127.0.0.1:9");
    let queue = MemoryQueue::new();
    let blobs = MemoryBlobStore::new();
    let watermarks = MemoryWatermarkStore::new();
    let rotation = DirectEgress::new();

    let worker = DiscoveryWorker::new(&config, &queue, &blobs, &watermarks, &rotation);
    let messages = [QueueMessage {
        id: "3".to_string(),
        body: r#"{"transaction_type": "garage", "pages": [1]}"#.to_string(),
    }];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.contains("3"));
}

// --- Extractor ---

#[tokio::test]
async fn test_extractor_persists_details_and_skips_missing() {
    let mock_server = MockServer::start().await;
    mount_detail(
        &mock_server,
        101,
        ResponseTemplate::new(200).set_body_json(json!({"classified": {"id": 101, "price": 1}})),
    )
    .await;
    // Removed between discovery and extraction
    mount_detail(&mock_server, 102, ResponseTemplate::new(404)).await;
    mount_detail(
        &mock_server,
        103,
        ResponseTemplate::new(200).set_body_json(json!({"classified": {"id": 103, "price": 3}})),
    )
    .await;

    let config = test_config(&mock_server.uri());
    let blobs = MemoryBlobStore::new();
    let rotation = DirectEgress::new();

    let worker = ExtractorWorker::new(&config, &blobs, &rotation);
    let messages = [id_batch_message("1", &[101, 102, 103])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.is_empty());

    let keys = blobs.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("details/house/for-sale/"));
    let details: serde_json::Value = serde_json::from_slice(&blobs.get(&keys[0]).unwrap()).unwrap();
    let records = details.as_object().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records["101"]["price"], 1);
    assert_eq!(records["103"]["price"], 3);
    assert!(!records.contains_key("102"));
}

#[tokio::test]
async fn test_extractor_skips_exhausted_id_without_failing_batch() {
    let mock_server = MockServer::start().await;
    mount_detail(
        &mock_server,
        101,
        ResponseTemplate::new(200).set_body_json(json!({"classified": {"id": 101}})),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/classified/get-result/102"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;
    mount_detail(
        &mock_server,
        103,
        ResponseTemplate::new(200).set_body_json(json!({"classified": {"id": 103}})),
    )
    .await;

    let config = test_config(&mock_server.uri());
    let blobs = MemoryBlobStore::new();
    let rotation = DirectEgress::new();

    let worker = ExtractorWorker::new(&config, &blobs, &rotation);
    let messages = [id_batch_message("1", &[101, 102, 103])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    // Only listing 102 is lost; the batch itself succeeds
    assert!(report.is_empty());
    let keys = blobs.keys();
    let details: serde_json::Value = serde_json::from_slice(&blobs.get(&keys[0]).unwrap()).unwrap();
    let records = details.as_object().unwrap();
    assert_eq!(records.len(), 2);
    assert!(!records.contains_key("102"));
}

#[tokio::test]
async fn test_extractor_null_classified_writes_nothing() {
    let mock_server = MockServer::start().await;
    mount_detail(
        &mock_server,
        101,
        ResponseTemplate::new(200).set_body_json(json!({"classified": null})),
    )
    .await;

    let config = test_config(&mock_server.uri());
    let blobs = MemoryBlobStore::new();
    let rotation = DirectEgress::new();

    let worker = ExtractorWorker::new(&config, &blobs, &rotation);
    let messages = [id_batch_message("1", &[101])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.is_empty());
    assert!(blobs.is_empty());
}

#[tokio::test]
async fn test_extractor_blob_failure_fails_message() {
    let mock_server = MockServer::start().await;
    mount_detail(
        &mock_server,
        101,
        ResponseTemplate::new(200).set_body_json(json!({"classified": {"id": 101}})),
    )
    .await;

    let config = test_config(&mock_server.uri());
    let blobs = MemoryBlobStore::new();
    blobs.fail_writes(true);
    let rotation = DirectEgress::new();

    let worker = ExtractorWorker::new(&config, &blobs, &rotation);
    let messages = [id_batch_message("9", &[101])];
    let report = worker
        .run(&messages, &Budget::from_config(&config.budget))
        .await
        .unwrap();

    assert!(report.contains("9"));
}
