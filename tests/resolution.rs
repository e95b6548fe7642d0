//! End-to-end resolution pipeline tests over stubbed boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use toolgate::{
    ContainerRuntime, ImageRef, ManifestLoader, ManifestSource, RawManifest, RegistryConfig,
    RegistryError, Result, RetryPolicy, ToolRegistry,
};

const DIGEST_A: &str = "sha256:abcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabcabca";
const DIGEST_B: &str = "sha256:def0def0def0def0def0def0def0def0def0def0def0def0def0def0def0def0";

/// Serves manifest documents from memory, counting loads.
struct MemoryLoader {
    docs: Mutex<HashMap<String, serde_json::Value>>,
    delay: Duration,
    calls: AtomicU32,
}

impl MemoryLoader {
    fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn put(&self, key: &str, doc: serde_json::Value) {
        self.docs.lock().unwrap().insert(key.to_string(), doc);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestLoader for MemoryLoader {
    async fn load(&self, source: &ManifestSource) -> Result<RawManifest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let document = self
            .docs
            .lock()
            .unwrap()
            .get(&source.id())
            .cloned()
            .ok_or_else(|| RegistryError::SourceUnreadable {
                source_id: source.id(),
                reason: "no such key".to_string(),
            })?;
        Ok(RawManifest {
            source_id: source.id(),
            document,
        })
    }
}

/// Reports digests for known references, counting boundary calls.
struct StubRuntime {
    digests: Mutex<HashMap<String, String>>,
    calls: AtomicU32,
}

impl StubRuntime {
    fn new() -> Self {
        Self {
            digests: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn put(&self, reference: &str, digest: &str) {
        self.digests
            .lock()
            .unwrap()
            .insert(reference.to_string(), digest.to_string());
    }

    fn remove(&self, reference: &str) {
        self.digests.lock().unwrap().remove(reference);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.digests.lock().unwrap().contains_key(&image.to_string()))
    }

    async fn resolve_digest(&self, image: &ImageRef) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.digests.lock().unwrap().get(&image.to_string()).cloned())
    }
}

fn ocr_manifest(version: &str) -> serde_json::Value {
    serde_json::json!({
        "tool_id": "ocr-tool",
        "version": version,
        "image_ref": format!("registry.example/ocr:{}", version),
        "input_schema": {
            "type": "object",
            "properties": {"document": {"type": "string"}}
        },
        "output_schema": {
            "type": "object",
            "properties": {"text": {"type": "string"}}
        },
        "parameters": []
    })
}

struct Harness {
    loader: Arc<MemoryLoader>,
    runtime: Arc<StubRuntime>,
    registry: ToolRegistry,
}

fn harness(loader: MemoryLoader) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let loader = Arc::new(loader);
    let runtime = Arc::new(StubRuntime::new());
    let registry = ToolRegistry::new(
        Arc::clone(&loader) as Arc<dyn ManifestLoader>,
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        RegistryConfig::default().with_retry(RetryPolicy::none()),
    );
    Harness {
        loader,
        runtime,
        registry,
    }
}

#[tokio::test]
async fn resolve_pins_tag_to_reported_digest() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);

    let (tool_id, version) = h
        .registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();
    assert_eq!((tool_id.as_str(), version.as_str()), ("ocr-tool", "1.0.0"));

    let descriptor = h.registry.resolve("ocr-tool", Some("1.0.0")).await.unwrap();
    assert_eq!(descriptor.resolved_image.digest, DIGEST_A);
    assert_eq!(descriptor.resolved_image.tag.as_deref(), Some("1.0.0"));
    assert_eq!(
        descriptor.resolved_image.pinned(),
        format!("registry.example/ocr@{}", DIGEST_A)
    );
    assert_eq!(descriptor.parameters.len(), 0);
}

#[tokio::test]
async fn second_resolve_returns_cached_descriptor() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    let first = h.registry.resolve("ocr-tool", None).await.unwrap();
    let second = h.registry.resolve("ocr-tool", None).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    // register + one pipeline
    assert_eq!(h.loader.calls(), 2);
    assert_eq!(h.runtime.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolves_share_one_pipeline() {
    let h = harness(MemoryLoader::with_delay(Duration::from_millis(50)));
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();
    let loads_after_register = h.loader.calls();

    let registry = Arc::new(h.registry);
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.resolve("ocr-tool", Some("1.0.0")).await
        }));
    }

    let mut descriptors = Vec::new();
    for task in tasks {
        descriptors.push(task.await.unwrap().unwrap());
    }

    assert_eq!(h.loader.calls() - loads_after_register, 1);
    assert_eq!(h.runtime.calls(), 1);
    for descriptor in &descriptors[1..] {
        assert!(Arc::ptr_eq(&descriptors[0], descriptor));
    }
}

#[tokio::test]
async fn duplicate_registration_from_different_source_rejected() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/a", ocr_manifest("1.0.0"));
    h.loader.put("tools/b", ocr_manifest("1.0.0"));

    h.registry
        .register(ManifestSource::Key("tools/a".to_string()))
        .await
        .unwrap();

    // Same source again is idempotent.
    h.registry
        .register(ManifestSource::Key("tools/a".to_string()))
        .await
        .unwrap();

    let err = h
        .registry
        .register(ManifestSource::Key("tools/b".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateTool { .. }));
}

#[tokio::test]
async fn missing_image_leaves_entry_registered() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    let err = h.registry.resolve("ocr-tool", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::ImageNotFound { .. }));
    assert!(err.is_availability_error());

    // The failure did not poison anything: once the image appears, the same
    // key resolves through a fresh pipeline.
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    let descriptor = h.registry.resolve("ocr-tool", None).await.unwrap();
    assert_eq!(descriptor.resolved_image.digest, DIGEST_A);
    assert_eq!(h.registry.list().await.len(), 1);
}

#[tokio::test]
async fn broken_manifest_surfaces_all_violations() {
    let h = harness(MemoryLoader::new());
    h.loader.put(
        "tools/broken",
        serde_json::json!({
            "tool_id": "broken-tool",
            "version": "1.0.0",
            "image_ref": "registry.example/broken:1.0.0",
            "input_schema": "not a schema",
            "output_schema": {"type": "object"},
            "parameters": [{"name": "x", "kind": "decimal"}]
        }),
    );
    h.runtime.put("registry.example/broken:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/broken".to_string()))
        .await
        .unwrap();

    let err = h.registry.resolve("broken-tool", None).await.unwrap_err();
    assert!(err.is_definition_error());
    let paths: Vec<&str> = err.violations().iter().map(|v| v.path.as_str()).collect();
    assert_eq!(paths, vec!["input_schema", "parameters/0/kind"]);
    // Validation failed before the runtime boundary was touched.
    assert_eq!(h.runtime.calls(), 0);
}

#[tokio::test]
async fn version_omitted_selects_highest() {
    let h = harness(MemoryLoader::new());
    for version in ["1.0.0", "1.2.0", "1.2.0-rc.1"] {
        let key = format!("tools/ocr-{}", version);
        h.loader.put(&key, ocr_manifest(version));
        h.runtime
            .put(&format!("registry.example/ocr:{}", version), DIGEST_A);
        h.registry
            .register(ManifestSource::Key(key))
            .await
            .unwrap();
    }

    let descriptor = h.registry.resolve("ocr-tool", None).await.unwrap();
    assert_eq!(descriptor.version, "1.2.0");
}

#[tokio::test]
async fn equal_precedence_versions_are_ambiguous() {
    let h = harness(MemoryLoader::new());
    for version in ["1.0.0", "1.0.0+build.1"] {
        let key = format!("tools/ocr-{}", version);
        h.loader.put(&key, ocr_manifest(version));
        h.registry
            .register(ManifestSource::Key(key))
            .await
            .unwrap();
    }

    let err = h.registry.resolve("ocr-tool", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::AmbiguousVersion { .. }));

    // Naming a version explicitly still works.
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .resolve("ocr-tool", Some("1.0.0"))
        .await
        .unwrap();
}

#[tokio::test]
async fn invalidate_forces_fresh_pipeline() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    let first = h.registry.resolve("ocr-tool", None).await.unwrap();
    assert_eq!(first.resolved_image.digest, DIGEST_A);

    // Tag drifts to new content, then the cache is dropped.
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_B);
    h.registry.invalidate("ocr-tool", None).await;

    let second = h.registry.resolve("ocr-tool", None).await.unwrap();
    assert_eq!(second.resolved_image.digest, DIGEST_B);
    assert!(!Arc::ptr_eq(&first, &second));
    // The registration itself survived the invalidation.
    assert_eq!(
        h.registry.list().await,
        vec![("ocr-tool".to_string(), "1.0.0".to_string())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_detaches_in_flight_resolution() {
    let h = harness(MemoryLoader::with_delay(Duration::from_millis(100)));
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();
    let loads_after_register = h.loader.calls();

    let registry = Arc::new(h.registry);
    let waiter = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.resolve("ocr-tool", Some("1.0.0")).await })
    };

    // Let the flight install and block inside the slow loader, then drop
    // the cache slot out from under it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.invalidate("ocr-tool", None).await;

    // The waiter attached before the invalidation still gets its result.
    let first = waiter.await.unwrap().unwrap();
    assert_eq!(first.resolved_image.digest, DIGEST_A);
    assert_eq!(h.loader.calls() - loads_after_register, 1);

    // But the detached flight's descriptor was not cached: the next
    // resolve runs a fresh pipeline instead of serving it.
    let second = registry.resolve("ocr-tool", Some("1.0.0")).await.unwrap();
    assert_eq!(h.loader.calls() - loads_after_register, 2);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn list_reflects_later_registrations() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    assert_eq!(
        h.registry.list().await,
        vec![("ocr-tool".to_string(), "1.0.0".to_string())]
    );

    h.loader.put(
        "tools/translate",
        serde_json::json!({
            "tool_id": "translate-tool",
            "version": "0.4.2",
            "image_ref": "registry.example/translate:0.4.2",
            "input_schema": {"type": "object"},
            "output_schema": {"type": "object"}
        }),
    );
    h.registry
        .register(ManifestSource::Key("tools/translate".to_string()))
        .await
        .unwrap();

    assert_eq!(
        h.registry.list().await,
        vec![
            ("ocr-tool".to_string(), "1.0.0".to_string()),
            ("translate-tool".to_string(), "0.4.2".to_string()),
        ]
    );
}

#[tokio::test]
async fn deregister_removes_entry() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    assert!(h.registry.deregister("ocr-tool", "1.0.0").await);
    assert!(!h.registry.deregister("ocr-tool", "1.0.0").await);
    assert!(h.registry.list().await.is_empty());

    let err = h.registry.resolve("ocr-tool", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::ToolNotFound { .. }));
}

#[tokio::test]
async fn identity_drift_in_source_is_inconsistent() {
    let h = harness(MemoryLoader::new());
    h.loader.put("tools/ocr", ocr_manifest("1.0.0"));
    h.runtime.put("registry.example/ocr:1.0.0", DIGEST_A);
    h.registry
        .register(ManifestSource::Key("tools/ocr".to_string()))
        .await
        .unwrap();

    // The source changes identity between registration and resolution.
    let mut drifted = ocr_manifest("2.0.0");
    drifted["image_ref"] = serde_json::json!("registry.example/ocr:2.0.0");
    h.loader.put("tools/ocr", drifted);

    let err = h.registry.resolve("ocr-tool", Some("1.0.0")).await.unwrap_err();
    assert!(matches!(err, RegistryError::InconsistentResolution { .. }));
    assert!(err.is_definition_error());
}

#[tokio::test]
async fn unregistered_tool_is_not_found() {
    let h = harness(MemoryLoader::new());
    let err = h.registry.resolve("ghost", None).await.unwrap_err();
    assert!(matches!(err, RegistryError::ToolNotFound { .. }));
}
