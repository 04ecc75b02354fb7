use std::path::{Path, PathBuf};

/// Snapshot capture mode, resolved from `ROUTECODEX_SNAPSHOTS` / `RCC_SNAPSHOTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    #[default]
    Off,
    On,
}

/// Upstream user-agent mode, resolved from `ROUTECODEX_UA_MODE` / `RCC_UA_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserAgentMode {
    #[default]
    Default,
    Codex,
}

/// Resolved on-disk layout for persisted state.
///
/// Resolution order for the root: `ROUTECODEX_BASEDIR`, `RCC_BASEDIR`,
/// then `~/.routecodex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseDirs {
    root: PathBuf,
    pub snapshots: SnapshotMode,
    pub ua_mode: UserAgentMode,
}

impl BaseDirs {
    pub fn resolve() -> Self {
        let root = env_path("ROUTECODEX_BASEDIR")
            .or_else(|| env_path("RCC_BASEDIR"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".routecodex")))
            .unwrap_or_else(|| PathBuf::from(".routecodex"));
        Self {
            root,
            snapshots: snapshot_mode(env_value("ROUTECODEX_SNAPSHOTS").or_else(|| env_value("RCC_SNAPSHOTS"))),
            ua_mode: ua_mode(env_value("ROUTECODEX_UA_MODE").or_else(|| env_value("RCC_UA_MODE"))),
        }
    }

    /// Root all paths under an explicit directory (tests, embedders).
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshots: SnapshotMode::Off,
            ua_mode: UserAgentMode::Default,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/auth` — token store files.
    pub fn auth_dir(&self) -> PathBuf {
        self.root.join("auth")
    }

    /// `<root>/codex-samples/<protocol>` — snapshot files.
    pub fn snapshot_dir(&self, protocol: &str) -> PathBuf {
        self.root.join("codex-samples").join(protocol)
    }

    /// `<root>/pipeline-config.generated.json` — blueprint document.
    pub fn pipeline_config_path(&self) -> PathBuf {
        self.root.join("pipeline-config.generated.json")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_value(key).map(PathBuf::from)
}

fn snapshot_mode(value: Option<String>) -> SnapshotMode {
    match value.as_deref() {
        Some("1") | Some("true") | Some("on") => SnapshotMode::On,
        _ => SnapshotMode::Off,
    }
}

fn ua_mode(value: Option<String>) -> UserAgentMode {
    match value.as_deref() {
        Some("codex") => UserAgentMode::Codex,
        _ => UserAgentMode::Default,
    }
}
