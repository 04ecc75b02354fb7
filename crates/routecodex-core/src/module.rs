use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError, GatewayResult};

use crate::context::PipelineContext;

pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(300);
const MAX_HASH_DEPTH: usize = 64;

/// One node implementation. Instances are shared across requests, so they
/// hold immutable config only; all per-request state lives in the context.
#[async_trait]
pub trait PipelineModule: Send + Sync {
    fn module_type(&self) -> &str;

    async fn process_incoming(
        &self,
        request: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value>;

    async fn process_outgoing(
        &self,
        response: Value,
        ctx: &mut PipelineContext,
    ) -> GatewayResult<Value>;

    /// Unhealthy instances are evicted from the cache and recreated.
    fn is_healthy(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn PipelineModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineModule")
            .field("module_type", &self.module_type())
            .finish()
    }
}

pub type ModuleFactory =
    Arc<dyn Fn(&Value) -> GatewayResult<Arc<dyn PipelineModule>> + Send + Sync>;

struct CachedInstance {
    module: Arc<dyn PipelineModule>,
    last_used: Instant,
}

/// `moduleType → factory` map with a lazy instance cache keyed by
/// `(moduleType, configHash)`.
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
    instances: Mutex<HashMap<(String, String), CachedInstance>>,
    max_idle: Duration,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
            max_idle,
        }
    }

    pub fn register<F>(&mut self, module_type: &str, factory: F)
    where
        F: Fn(&Value) -> GatewayResult<Arc<dyn PipelineModule>> + Send + Sync + 'static,
    {
        self.factories
            .insert(module_type.to_string(), Arc::new(factory));
    }

    pub fn resolve(
        &self,
        module_type: &str,
        options: &Value,
    ) -> GatewayResult<Arc<dyn PipelineModule>> {
        let factory = self.factories.get(module_type).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::UnsupportedProviderType,
                format!("no factory registered for module type {module_type}"),
            )
        })?;

        let key = (module_type.to_string(), config_hash(options));
        {
            let mut cache = self.instances.lock().expect("module cache lock");
            if let Some(cached) = cache.get_mut(&key) {
                if cached.module.is_healthy() {
                    cached.last_used = Instant::now();
                    return Ok(cached.module.clone());
                }
                cache.remove(&key);
            }
        }

        let module = factory(options)?;
        let mut cache = self.instances.lock().expect("module cache lock");
        cache.insert(
            key,
            CachedInstance {
                module: module.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(module)
    }

    /// Periodic sweep: drop instances idle past `max_idle`. Returns how many
    /// were removed.
    pub fn sweep_idle(&self) -> usize {
        let mut cache = self.instances.lock().expect("module cache lock");
        let before = cache.len();
        let max_idle = self.max_idle;
        cache.retain(|_, cached| cached.last_used.elapsed() <= max_idle);
        before - cache.len()
    }

    pub fn cached_len(&self) -> usize {
        self.instances.lock().expect("module cache lock").len()
    }
}

/// Spawn the periodic idle sweep for a shared registry.
pub fn spawn_idle_sweeper(
    registry: Arc<ModuleRegistry>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_idle();
            if removed > 0 {
                tracing::debug!(removed, "evicted idle module instances");
            }
        }
    })
}

/// Stable structural hash: object keys are visited in sorted order, arrays
/// in sequence. Depth is capped so a hostile document cannot recurse away.
pub fn config_hash(value: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    hash_value(value, &mut hasher, 0);
    format!("{:016x}", hasher.finish())
}

fn hash_value(value: &Value, hasher: &mut DefaultHasher, depth: usize) {
    if depth > MAX_HASH_DEPTH {
        "depth-capped".hash(hasher);
        return;
    }
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher, depth + 1);
            }
        }
        Value::Object(map) => {
            5u8.hash(hasher);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(hasher);
                hash_value(&map[key.as_str()], hasher, depth + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct EchoModule {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PipelineModule for EchoModule {
        fn module_type(&self) -> &str {
            "echo"
        }

        async fn process_incoming(
            &self,
            request: Value,
            _ctx: &mut PipelineContext,
        ) -> GatewayResult<Value> {
            Ok(request)
        }

        async fn process_outgoing(
            &self,
            response: Value,
            _ctx: &mut PipelineContext,
        ) -> GatewayResult<Value> {
            Ok(response)
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn config_hash_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": true}});
        let b = json!({"a": {"x": true, "y": [1, 2]}, "b": 1});
        assert_eq!(config_hash(&a), config_hash(&b));
        assert_ne!(config_hash(&a), config_hash(&json!({"a": 1})));
    }

    #[test]
    fn instances_are_cached_per_config() {
        let built = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicBool::new(true));
        let mut registry = ModuleRegistry::new();
        {
            let built = built.clone();
            let healthy = healthy.clone();
            registry.register("echo", move |_options| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(EchoModule {
                    healthy: healthy.clone(),
                }) as Arc<dyn PipelineModule>)
            });
        }

        registry.resolve("echo", &json!({"a": 1})).unwrap();
        registry.resolve("echo", &json!({"a": 1})).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        registry.resolve("echo", &json!({"a": 2})).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(registry.cached_len(), 2);
    }

    #[test]
    fn unhealthy_instances_are_recreated() {
        let built = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(AtomicBool::new(true));
        let mut registry = ModuleRegistry::new();
        {
            let built = built.clone();
            let healthy = healthy.clone();
            registry.register("echo", move |_options| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(EchoModule {
                    healthy: healthy.clone(),
                }) as Arc<dyn PipelineModule>)
            });
        }

        registry.resolve("echo", &json!({})).unwrap();
        healthy.store(false, Ordering::SeqCst);
        registry.resolve("echo", &json!({})).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn idle_sweep_evicts_old_instances() {
        let mut registry = ModuleRegistry::with_max_idle(Duration::from_millis(0));
        registry.register("echo", |_| {
            Ok(Arc::new(EchoModule {
                healthy: Arc::new(AtomicBool::new(true)),
            }) as Arc<dyn PipelineModule>)
        });
        registry.resolve("echo", &json!({})).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.sweep_idle(), 1);
        assert_eq!(registry.cached_len(), 0);
    }

    #[test]
    fn unknown_module_type_errors() {
        let registry = ModuleRegistry::new();
        let err = registry.resolve("nope", &json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedProviderType);
    }
}
