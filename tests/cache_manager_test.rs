use std::sync::Arc;

use piper_cache::{
    config::CacheConfig,
    core::{
        CacheClient, CacheError, CacheManager, HeapBackend, Locality, ManagerExit, MemoryBackend,
        ObjectDescriptor, SegmentId, SharedKind,
    },
};
use tokio::task::JoinHandle;

fn start(config: CacheConfig) -> (CacheClient, JoinHandle<ManagerExit>, HeapBackend) {
    let backend = HeapBackend::new();
    let shared: Arc<dyn MemoryBackend> = Arc::new(backend.clone());
    let (client, handle) = CacheManager::spawn(config, shared).unwrap();
    (client, handle, backend)
}

fn object(backend: &HeapBackend, size: usize) -> ObjectDescriptor {
    let handle = backend.write_segment(vec![1; size]).unwrap();
    ObjectDescriptor::array(handle, size as u64, "uint8", vec![size])
}

/// Round trip through the queue so every earlier message has been applied
async fn sync(client: &CacheClient) {
    client.is_in_cache("__sync__").await;
}

#[tokio::test]
async fn test_end_to_end_eviction_scenario() {
    let (client, handle, backend) = start(CacheConfig::new(100));

    client.put("/job/A", object(&backend, 60), "a", "task");
    assert!(client.is_in_cache("A").await);

    client.put("/job/B", object(&backend, 60), "b", "task");
    assert!(!client.is_in_cache("A").await);
    assert!(client.is_in_cache("B").await);

    let b = client.get("/job/B", "b", "task").expect("B cached");
    assert_eq!(b.size_bytes, 60);
    sync(&client).await;
    assert_eq!(client.replica().get("B").unwrap().hit_count, 1);

    client.put("/job/C", object(&backend, 50), "c", "task");
    assert!(!client.is_in_cache("B").await);
    assert!(client.is_in_cache("C").await);

    client.quit();
    match handle.await.unwrap() {
        ManagerExit::Quit(summary) => {
            assert_eq!(summary.entries, 1);
            assert_eq!(summary.used_size, 50);
            assert_eq!(summary.max_size, 100);
        }
        other => panic!("Expected Quit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hit_count_matches_successful_gets() {
    let (client, _handle, backend) = start(CacheConfig::new(1000));
    client.put("x.npy", object(&backend, 10), "p", "f");
    sync(&client).await;

    for _ in 0..7 {
        assert!(client.get("x.npy", "p", "f").is_some());
    }
    assert!(client.get("missing.npy", "p", "f").is_none());
    sync(&client).await;

    assert_eq!(client.replica().get("x.npy").unwrap().hit_count, 7);
}

#[tokio::test]
async fn test_duplicate_put_keeps_first_entry() {
    let (client, _handle, backend) = start(CacheConfig::new(1000));
    let first = object(&backend, 10);
    let first_handle = first.handle.clone();
    client.put("dup", first, "p", "f");
    client.put("dup", object(&backend, 500), "p", "f");
    sync(&client).await;

    let entry = client.replica().get("dup").unwrap();
    assert_eq!(entry.handle, first_handle);
    assert_eq!(entry.size_bytes, 10);
    assert_eq!(entry.hit_count, 0);
}

#[tokio::test]
async fn test_eviction_prefers_lowest_hits() {
    let (client, _handle, backend) = start(CacheConfig::new(30));
    client.put("e1", object(&backend, 10), "p", "f");
    client.put("e2", object(&backend, 10), "p", "f");
    client.put("e3", object(&backend, 10), "p", "f");
    sync(&client).await;
    for _ in 0..3 {
        client.get("e2", "p", "f");
    }
    client.get("e3", "p", "f");

    client.put("e4", object(&backend, 10), "p", "f");
    assert!(!client.is_in_cache("e1").await);
    assert!(client.is_in_cache("e2").await);
    assert!(client.is_in_cache("e3").await);
    assert!(client.is_in_cache("e4").await);
}

#[tokio::test]
async fn test_locked_entries_survive_eviction() {
    let (client, _handle, backend) = start(CacheConfig::new(100));
    client.put("in_use", object(&backend, 60), "p", "f");
    client.lock("in_use");
    client.put("newcomer", object(&backend, 60), "p", "f");

    // Soft cap: nothing evictable, both entries stay
    assert!(client.is_in_cache("in_use").await);
    assert!(client.is_in_cache("newcomer").await);
    assert!(client.is_locked("in_use").await);

    client.unlock("in_use");
    client.put("third", object(&backend, 10), "p", "f");
    assert!(!client.is_in_cache("in_use").await);
    assert!(!client.is_locked("in_use").await);
}

#[tokio::test]
async fn test_lock_unlock_and_idempotent_queries() {
    let (client, _handle, backend) = start(CacheConfig::new(100));
    client.put("x", object(&backend, 1), "p", "f");
    client.lock("x");
    for _ in 0..5 {
        assert!(client.is_locked("x").await);
        assert!(client.is_in_cache("x").await);
    }
    client.unlock("x");
    for _ in 0..5 {
        assert!(!client.is_locked("x").await);
    }
}

#[tokio::test]
async fn test_double_lock_terminates_manager() {
    let (client, handle, backend) = start(CacheConfig::new(100));
    client.put("x", object(&backend, 1), "p", "f");
    client.lock("x");
    client.lock("x");

    match handle.await.unwrap() {
        ManagerExit::Failed(CacheError::AlreadyLocked { name }) => assert_eq!(name, "x"),
        other => panic!("Expected AlreadyLocked failure, got {:?}", other),
    }

    // Everything degrades to a miss afterwards
    assert!(!client.is_connected());
    assert!(!client.is_in_cache("x").await);
    assert!(!client.is_locked("x").await);
    assert!(client.get("x", "p", "f").is_none());
    assert!(!client.put("y", object(&backend, 1), "p", "f"));
}

#[tokio::test]
async fn test_unlock_without_lock_terminates_manager() {
    let (client, handle, _backend) = start(CacheConfig::new(100));
    client.unlock("never_locked");
    let exit = handle.await.unwrap();
    assert!(exit.is_failure());
    assert!(matches!(exit, ManagerExit::Failed(CacheError::NotLocked { .. })));
}

#[tokio::test]
async fn test_remove_unknown_terminates_manager() {
    let (client, handle, _backend) = start(CacheConfig::new(100));
    client.remove("/tmp/ghost");
    match handle.await.unwrap() {
        ManagerExit::Failed(err) => {
            assert!(err.is_coherence());
            assert!(matches!(err, CacheError::UnknownEntry { ref name } if name == "ghost"));
        }
        other => panic!("Expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_frees_entry_and_segment() {
    let (client, _handle, backend) = start(CacheConfig::new(100));
    let obj = object(&backend, 25);
    let segment = obj.handle.clone();
    client.put("r", obj, "p", "f");
    client.remove("/some/dir/r");
    assert!(!client.is_in_cache("r").await);
    assert!(!client.replica().contains("r"));
    assert!(!backend.contains(&segment));
}

#[tokio::test]
async fn test_replace_swaps_cached_object() {
    let (client, _handle, backend) = start(CacheConfig::new(100));
    client.put("obj", object(&backend, 10), "p", "f");
    sync(&client).await;

    let replacement = ObjectDescriptor::collection(
        backend.write_segment(vec![2; 20]).unwrap(),
        SharedKind::ShareableList,
        20,
    );
    assert!(client.replace("obj", replacement, "p", "f"));
    sync(&client).await;

    let entry = client.replica().get("obj").unwrap();
    assert_eq!(entry.size_bytes, 20);
    assert_eq!(entry.kind, SharedKind::ShareableList);

    // Replacing something the cache never had is a plain put
    assert!(client.replace("fresh", object(&backend, 5), "p", "f"));
    assert!(client.is_in_cache("fresh").await);
}

#[tokio::test]
async fn test_remove_then_replace_back_to_back_keeps_manager_alive() {
    let (client, handle, backend) = start(CacheConfig::new(100));
    client.put("obj", object(&backend, 10), "p", "f");
    sync(&client).await;

    client.remove("obj");
    assert!(client.replace("obj", object(&backend, 15), "p", "f"));
    assert!(client.is_in_cache("obj").await);
    assert_eq!(client.replica().get("obj").unwrap().size_bytes, 15);

    client.quit();
    match handle.await.unwrap() {
        ManagerExit::Quit(summary) => assert_eq!(summary.used_size, 15),
        other => panic!("Expected Quit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_replace_of_same_name() {
    let (client, handle, backend) = start(CacheConfig::new(100));
    client.put("shared", object(&backend, 10), "p", "f");
    sync(&client).await;

    let other = client.clone();
    assert!(client.replace("shared", object(&backend, 20), "p", "f"));
    assert!(other.replace("shared", object(&backend, 30), "p", "f"));
    assert!(client.is_in_cache("shared").await);
    assert_eq!(client.replica().get("shared").unwrap().size_bytes, 30);

    drop(other);
    client.quit();
    assert!(matches!(handle.await.unwrap(), ManagerExit::Quit(_)));
}

#[tokio::test]
async fn test_byte_overflow_fails_fast() {
    let (client, handle, _backend) = start(CacheConfig::new(100));
    let huge = || {
        ObjectDescriptor::collection(SegmentId::new("external"), SharedKind::ShareableList, 1 << 63)
    };
    client.put("a", huge(), "p", "f");
    client.lock("a");
    client.put("b", huge(), "p", "f");

    match handle.await.unwrap() {
        ManagerExit::Failed(CacheError::SizeOverflow { name, used, .. }) => {
            assert_eq!(name, "b");
            assert_eq!(used, 1 << 63);
        }
        other => panic!("Expected SizeOverflow failure, got {:?}", other),
    }
    assert!(!client.is_in_cache("a").await);
}

#[tokio::test]
async fn test_gpu_devices_are_accounted_separately() {
    let config = CacheConfig::builder()
        .cpu_capacity(100)
        .gpu_device(0, "0000:3b:00.0", 40)
        .gpu_device(1, "0000:5e:00.0", 40)
        .build()
        .unwrap();
    let (client, _handle, backend) = start(config);

    client.put("host", object(&backend, 90), "p", "f");
    client.put_gpu("g0_a", object(&backend, 30), "0000:3b:00.0", "p", "f");
    client.put_gpu("g1_a", object(&backend, 30), "0000:5e:00.0", "p", "f");
    client.put_gpu("g0_b", object(&backend, 30), "0000:3b:00.0", "p", "f");

    assert!(client.is_in_cache("host").await);
    assert!(!client.is_in_cache("g0_a").await);
    assert!(client.is_in_cache("g0_b").await);
    assert!(client.is_in_cache("g1_a").await);

    let g0 = client.replica().get("g0_b").unwrap();
    assert_eq!(g0.locality, Locality::Gpu { device_id: 0 });
    assert_eq!(backend.locality_of(&g0.handle), Some(g0.locality));
}

#[tokio::test]
async fn test_put_gpu_on_unknown_bus_terminates_manager() {
    let (client, handle, backend) = start(CacheConfig::new(100));
    client.put_gpu("g", object(&backend, 4), "0000:ff:00.0", "p", "f");
    assert!(matches!(
        handle.await.unwrap(),
        ManagerExit::Failed(CacheError::UnknownDevice { .. })
    ));
}

#[tokio::test]
async fn test_dropping_all_clients_disconnects() {
    let (client, handle, backend) = start(CacheConfig::new(100));
    client.put("a", object(&backend, 10), "p", "f");
    let other = client.clone();
    drop(client);
    assert!(other.is_in_cache("a").await);
    drop(other);

    match handle.await.unwrap() {
        ManagerExit::Disconnected(summary) => assert_eq!(summary.entries, 1),
        other => panic!("Expected Disconnected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_clients_keep_capacity() {
    let capacity = 1_000;
    let (client, handle, backend) = start(CacheConfig::new(capacity));

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let client = client.clone();
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                let name = format!("w{}_{}", worker, i);
                client.put(&name, object(&backend, 40), "p", "f");
                if i % 3 == 0 {
                    client.get(&name, "p", "f");
                }
                client.is_in_cache(&name).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    client.quit();
    match handle.await.unwrap() {
        ManagerExit::Quit(summary) => {
            assert!(summary.used_size <= capacity);
            assert_eq!(summary.used_size, summary.entries as u64 * 40);
        }
        other => panic!("Expected Quit, got {:?}", other),
    }
}
