use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde_json::Value;

use routecodex_common::{ErrorCode, GatewayError, PipelinePhase};
use routecodex_protocol::{ProcessMode, ProviderProtocol, ProviderType};

use crate::blueprint::{BlueprintDocument, PipelineBlueprint};

const SESSION_AFFINITY_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_UNHEALTHY_FOR: Duration = Duration::from_secs(30);

/// Concrete upstream selection for one request.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    /// Raw `<providerId>[.<modelId>[.<keyAlias>]]` key from the route pool.
    pub provider_key: String,
    pub provider_id: String,
    pub provider_type: ProviderType,
    pub provider_protocol: ProviderProtocol,
    pub model_id: Option<String>,
    pub key_alias: Option<String>,
    pub process_mode: ProcessMode,
    pub compatibility_profile: Option<String>,
}

/// Per-provider entry of the router configuration.
#[derive(Debug, Clone)]
pub struct RouterProviderConfig {
    pub provider_type: ProviderType,
    /// Optional declared protocol; must agree with the type's fixed table.
    pub provider_protocol: Option<ProviderProtocol>,
    pub compatibility_profile: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// `routeName → ordered provider keys`.
    pub routes: HashMap<String, Vec<String>>,
    /// `providerId → provider config`.
    pub providers: HashMap<String, RouterProviderConfig>,
}

/// Split `<providerId>[.<modelId>[.<keyAlias>]]`.
pub fn parse_target_key(key: &str) -> (String, Option<String>, Option<String>) {
    let mut parts = key.splitn(3, '.');
    let provider = parts.next().unwrap_or_default().to_string();
    let model = parts.next().map(str::to_string);
    let alias = parts.next().map(str::to_string);
    (provider, model, alias)
}

/// Health bookkeeping for route targets. Marks expire, so a failed provider
/// re-enters rotation by itself.
#[derive(Default)]
pub struct RouteTargetPool {
    unhealthy: Mutex<HashMap<String, Instant>>,
}

impl RouteTargetPool {
    pub fn mark_unhealthy(&self, provider_key: &str, duration: Option<Duration>) {
        let until = Instant::now() + duration.unwrap_or(DEFAULT_UNHEALTHY_FOR);
        self.unhealthy
            .lock()
            .expect("route pool lock")
            .insert(provider_key.to_string(), until);
    }

    pub fn is_healthy(&self, provider_key: &str) -> bool {
        let mut guard = self.unhealthy.lock().expect("route pool lock");
        match guard.get(provider_key) {
            Some(until) if Instant::now() < *until => false,
            Some(_) => {
                guard.remove(provider_key);
                true
            }
            None => true,
        }
    }
}

#[derive(Default)]
struct SessionAffinity {
    disabled: Mutex<HashMap<String, (HashSet<String>, Instant)>>,
}

impl SessionAffinity {
    fn disable(&self, session_id: &str, provider_id: &str) {
        let mut guard = self.disabled.lock().expect("affinity lock");
        let entry = guard
            .entry(session_id.to_string())
            .or_insert_with(|| (HashSet::new(), Instant::now()));
        entry.0.insert(provider_id.to_string());
        entry.1 = Instant::now();
    }

    fn is_disabled(&self, session_id: &str, provider_id: &str) -> bool {
        let mut guard = self.disabled.lock().expect("affinity lock");
        let Some((providers, touched)) = guard.get_mut(session_id) else {
            return false;
        };
        if touched.elapsed() > SESSION_AFFINITY_TTL {
            guard.remove(session_id);
            return false;
        }
        *touched = Instant::now();
        providers.contains(provider_id)
    }
}

struct BlueprintIndex {
    by_endpoint: HashMap<(PipelinePhase, String), Vec<Arc<PipelineBlueprint>>>,
    by_id: HashMap<String, Arc<PipelineBlueprint>>,
}

impl BlueprintIndex {
    fn build(document: BlueprintDocument) -> Result<Self, GatewayError> {
        let mut by_endpoint: HashMap<(PipelinePhase, String), Vec<Arc<PipelineBlueprint>>> =
            HashMap::new();
        let mut by_id = HashMap::new();
        for descriptor in document.pipelines {
            let blueprint = Arc::new(PipelineBlueprint::from_descriptor(descriptor)?);
            by_id.insert(blueprint.id.clone(), blueprint.clone());
            for endpoint in &blueprint.entry_endpoints {
                by_endpoint
                    .entry((blueprint.phase, endpoint.clone()))
                    .or_default()
                    .push(blueprint.clone());
            }
        }
        Ok(Self { by_endpoint, by_id })
    }
}

/// Resolves a blueprint and a provider target per request. Reloadable: the
/// blueprint index and route table swap atomically under in-flight traffic.
pub struct VirtualRouter {
    blueprints: ArcSwap<BlueprintIndex>,
    config: ArcSwap<RouterConfig>,
    pub pool: RouteTargetPool,
    affinity: SessionAffinity,
}

impl std::fmt::Debug for VirtualRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualRouter").finish_non_exhaustive()
    }
}

impl VirtualRouter {
    pub fn new(document: BlueprintDocument, config: RouterConfig) -> Result<Self, GatewayError> {
        validate_config(&config)?;
        Ok(Self {
            blueprints: ArcSwap::from_pointee(BlueprintIndex::build(document)?),
            config: ArcSwap::from_pointee(config),
            pool: RouteTargetPool::default(),
            affinity: SessionAffinity::default(),
        })
    }

    /// Runtime reload: in-flight requests keep the plan they resolved.
    pub fn reload(&self, document: BlueprintDocument, config: RouterConfig) -> Result<(), GatewayError> {
        validate_config(&config)?;
        self.blueprints
            .store(Arc::new(BlueprintIndex::build(document)?));
        self.config.store(Arc::new(config));
        Ok(())
    }

    pub fn blueprint_by_id(&self, id: &str) -> Option<Arc<PipelineBlueprint>> {
        self.blueprints.load().by_id.get(id).cloned()
    }

    /// Endpoint → blueprint. The `#response` suffix (or the explicit phase)
    /// selects response-phase plans. Protocol and process-mode filters fall
    /// back to the previous pool when they would empty it.
    pub fn resolve_blueprint(
        &self,
        endpoint: &str,
        phase: Option<PipelinePhase>,
        protocol: Option<ProviderProtocol>,
        process_mode: Option<ProcessMode>,
    ) -> Option<Arc<PipelineBlueprint>> {
        let mut endpoint = endpoint.trim().to_ascii_lowercase();
        let mut phase = phase.unwrap_or(PipelinePhase::Request);
        if let Some(stripped) = endpoint.strip_suffix("#response") {
            endpoint = stripped.to_string();
            phase = PipelinePhase::Response;
        }

        let index = self.blueprints.load();
        let candidates = index.by_endpoint.get(&(phase, endpoint))?;

        let mut pool: Vec<&Arc<PipelineBlueprint>> = candidates.iter().collect();
        if let Some(protocol) = protocol {
            let filtered: Vec<&Arc<PipelineBlueprint>> = pool
                .iter()
                .copied()
                .filter(|blueprint| blueprint.provider_protocols.contains(&protocol))
                .collect();
            if !filtered.is_empty() {
                pool = filtered;
            }
        }
        if let Some(process_mode) = process_mode {
            let filtered: Vec<&Arc<PipelineBlueprint>> = pool
                .iter()
                .copied()
                .filter(|blueprint| blueprint.process_mode == process_mode)
                .collect();
            if !filtered.is_empty() {
                pool = filtered;
            }
        }
        pool.first().map(|blueprint| (*blueprint).clone())
    }

    /// Route hint → route name, applying `<**#providerId**>` session
    /// disable directives as a side effect.
    pub fn parse_route_hint(&self, hint: Option<&str>, session_id: Option<&str>) -> String {
        let Some(hint) = hint else {
            return "default".to_string();
        };
        let mut route = String::new();
        let mut rest = hint.trim();
        while let Some(start) = rest.find("<**#") {
            route.push_str(&rest[..start]);
            let Some(end) = rest[start..].find("**>") else {
                break;
            };
            let provider = &rest[start + 4..start + end];
            if let Some(session_id) = session_id
                && !provider.is_empty()
            {
                self.affinity.disable(session_id, provider);
            }
            rest = &rest[start + end + 3..];
        }
        route.push_str(rest);
        let route = route.trim();
        if route.is_empty() {
            "default".to_string()
        } else {
            route.to_string()
        }
    }

    /// First healthy, non-disabled target in the route's ordered pool.
    pub fn select_target(
        &self,
        route_name: &str,
        session_id: Option<&str>,
    ) -> Result<ProviderTarget, GatewayError> {
        let config = self.config.load();
        let keys = config
            .routes
            .get(route_name)
            .or_else(|| config.routes.get("default"))
            .ok_or_else(|| no_target(route_name, "route has no provider pool"))?;

        for key in keys {
            let (provider_id, model_id, key_alias) = parse_target_key(key);
            let Some(provider) = config.providers.get(&provider_id) else {
                continue;
            };
            if !self.pool.is_healthy(key) {
                continue;
            }
            if let Some(session_id) = session_id
                && self.affinity.is_disabled(session_id, &provider_id)
            {
                continue;
            }
            return Ok(ProviderTarget {
                provider_key: key.clone(),
                provider_id,
                provider_type: provider.provider_type,
                provider_protocol: provider.provider_type.protocol(),
                model_id,
                key_alias,
                process_mode: ProcessMode::Chat,
                compatibility_profile: provider.compatibility_profile.clone(),
            });
        }
        Err(no_target(route_name, "no healthy provider target"))
    }

    /// Session-affine disable used by re-evaluations within one session.
    pub fn disable_for_session(&self, session_id: &str, provider_id: &str) {
        self.affinity.disable(session_id, provider_id);
    }
}

fn no_target(route_name: &str, message: &str) -> GatewayError {
    GatewayError::new(ErrorCode::NoProviderTarget, message.to_string())
        .with_detail("routeName", route_name)
}

fn validate_config(config: &RouterConfig) -> Result<(), GatewayError> {
    for (provider_id, provider) in &config.providers {
        if let Some(declared) = provider.provider_protocol
            && declared != provider.provider_type.protocol()
        {
            return Err(GatewayError::new(
                ErrorCode::ProtocolMismatch,
                format!(
                    "provider {provider_id} declares {} but type {} speaks {}",
                    declared.as_str(),
                    provider.provider_type.as_str(),
                    provider.provider_type.protocol().as_str()
                ),
            ));
        }
    }
    Ok(())
}

/// Parse a provider entry from a raw config value; unknown types surface
/// `ERR_UNSUPPORTED_PROVIDER_TYPE`.
pub fn provider_config_from_value(value: &Value) -> Result<RouterProviderConfig, GatewayError> {
    let type_name = value
        .get("providerType")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let provider_type = ProviderType::parse(type_name).ok_or_else(|| {
        GatewayError::new(
            ErrorCode::UnsupportedProviderType,
            format!("unknown provider type {type_name:?}"),
        )
    })?;
    let provider_protocol = value
        .get("providerProtocol")
        .and_then(Value::as_str)
        .and_then(ProviderProtocol::parse);
    Ok(RouterProviderConfig {
        provider_type,
        provider_protocol,
        compatibility_profile: value
            .get("compatibilityProfile")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
