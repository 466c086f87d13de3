//! Bridge configuration.
//!
//! ## Environment Variables
//!
//! - `GCBRIDGE_DISABLE`: `"1"` or `"true"` turns the bridge off; every class
//!   is then transparent and cross-reference passes are no-ops.
//! - `GCBRIDGE_GREF_LOG`: path of the global/weak reference log.
//! - `GCBRIDGE_LREF_LOG`: path of the local reference log.
//! - `GCBRIDGE_WREF`: force the weak reference strategy.
//!   - `"jni"`: native weak global references
//!   - `"java"`: weak references emulated through a host wrapper object
//! - `GCBRIDGE_API_LEVEL`, `GCBRIDGE_VM_NAME`, `GCBRIDGE_VM_VERSION`: identity
//!   of the host runtime, used when no override is given.
//! - `GCBRIDGE_GREF_GC_THRESHOLD`: strong handle count above which the
//!   accounting layer asks for a managed collection.
use serde::Serialize;
use std::{env, path::PathBuf};

/// First host API level with working native weak global references.
pub const MIN_NATIVE_WEAK_API_LEVEL: u32 = 8;

/// Host VMs whose native weak references are known to be broken, by name and
/// optional version prefix.
const BROKEN_WEAK_REF_VMS: &[(&str, Option<&str>)] = &[("lemur", None)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeakRefMode {
    /// The host heap supports weak global references directly.
    Native,
    /// Weak references are host wrapper objects held through strong handles.
    Emulated,
}

impl WeakRefMode {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "jni" | "native" => Some(Self::Native),
            "java" | "emulated" => Some(Self::Emulated),
            _ => None,
        }
    }
}

/// What is known about the host runtime the bridge talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub api_level: Option<u32>,
    pub vm_name: Option<String>,
    pub vm_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub gref_log: Option<PathBuf>,
    pub lref_log: Option<PathBuf>,
    pub weak_ref_override: Option<WeakRefMode>,
    pub runtime: RuntimeIdentity,
    pub gref_gc_threshold: Option<i64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gref_log: None,
            lref_log: None,
            weak_ref_override: None,
            runtime: RuntimeIdentity::default(),
            gref_gc_threshold: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, using the same
    /// keys as [`BridgeConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let weak_ref_override = lookup("GCBRIDGE_WREF").and_then(|v| {
            let mode = WeakRefMode::from_str(&v);
            if mode.is_none() {
                tracing::warn!(
                    "Unsupported GCBRIDGE_WREF value '{}'; supported values are 'jni' and 'java'. Ignoring...",
                    v
                );
            }
            mode
        });

        Self {
            enabled: !flag("GCBRIDGE_DISABLE"),
            gref_log: path("GCBRIDGE_GREF_LOG"),
            lref_log: path("GCBRIDGE_LREF_LOG"),
            weak_ref_override,
            runtime: RuntimeIdentity {
                api_level: lookup("GCBRIDGE_API_LEVEL").and_then(|v| v.trim().parse().ok()),
                vm_name: lookup("GCBRIDGE_VM_NAME"),
                vm_version: lookup("GCBRIDGE_VM_VERSION"),
            },
            gref_gc_threshold: lookup("GCBRIDGE_GREF_GC_THRESHOLD")
                .and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn gref_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.gref_log = Some(path.into());
        self
    }

    pub fn lref_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.lref_log = Some(path.into());
        self
    }

    pub fn weak_ref_mode(mut self, mode: WeakRefMode) -> Self {
        self.weak_ref_override = Some(mode);
        self
    }

    pub fn runtime(mut self, runtime: RuntimeIdentity) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn gref_gc_threshold(mut self, threshold: i64) -> Self {
        self.gref_gc_threshold = Some(threshold);
        self
    }

    /// The weak reference strategy this configuration selects.
    pub fn weak_ref_mode_selected(&self) -> WeakRefMode {
        if platform_supports_native_weak_refs(self) {
            WeakRefMode::Native
        } else {
            WeakRefMode::Emulated
        }
    }
}

/// Capability probe for native weak global references.
///
/// An explicit override wins. Otherwise runtimes known to be broken are
/// rejected, and finally the API level decides. An unknown API level is
/// treated as a modern runtime.
pub fn platform_supports_native_weak_refs(config: &BridgeConfig) -> bool {
    if let Some(mode) = config.weak_ref_override {
        return mode == WeakRefMode::Native;
    }

    let runtime = &config.runtime;
    if let Some(vm_name) = &runtime.vm_name {
        let broken = BROKEN_WEAK_REF_VMS.iter().any(|(name, version)| {
            vm_name.eq_ignore_ascii_case(name)
                && match (version, &runtime.vm_version) {
                    (None, _) => true,
                    (Some(prefix), Some(actual)) => actual.starts_with(prefix),
                    (Some(_), None) => false,
                }
        });
        if broken {
            tracing::info!(
                "host VM `{}` has broken weak global references; emulating them",
                vm_name
            );
            return false;
        }
    }

    match runtime.api_level {
        Some(level) => level >= MIN_NATIVE_WEAK_API_LEVEL,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_lookup(|_| None);
        assert!(config.enabled);
        assert!(config.gref_log.is_none());
        assert!(config.weak_ref_override.is_none());
        assert_eq!(config.weak_ref_mode_selected(), WeakRefMode::Native);
    }

    #[test]
    fn test_env_keys() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("GCBRIDGE_DISABLE", "true"),
            ("GCBRIDGE_GREF_LOG", "/tmp/grefs.txt"),
            ("GCBRIDGE_LREF_LOG", ""),
            ("GCBRIDGE_WREF", "java"),
            ("GCBRIDGE_API_LEVEL", "21"),
            ("GCBRIDGE_GREF_GC_THRESHOLD", "46080"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.gref_log, Some(PathBuf::from("/tmp/grefs.txt")));
        assert_eq!(config.lref_log, None);
        assert_eq!(config.weak_ref_override, Some(WeakRefMode::Emulated));
        assert_eq!(config.runtime.api_level, Some(21));
        assert_eq!(config.gref_gc_threshold, Some(46080));
    }

    #[test]
    fn test_unknown_override_is_ignored() {
        let config = BridgeConfig::from_lookup(lookup_from(&[("GCBRIDGE_WREF", "maybe")]));
        assert_eq!(config.weak_ref_override, None);
    }

    #[test]
    fn test_override_beats_probe() {
        let config = BridgeConfig::new()
            .runtime(RuntimeIdentity {
                api_level: Some(4),
                ..Default::default()
            })
            .weak_ref_mode(WeakRefMode::Native);
        assert!(platform_supports_native_weak_refs(&config));
    }

    #[test]
    fn test_old_api_level_is_emulated() {
        let config = BridgeConfig::new().runtime(RuntimeIdentity {
            api_level: Some(7),
            ..Default::default()
        });
        assert!(!platform_supports_native_weak_refs(&config));

        let config = BridgeConfig::new().runtime(RuntimeIdentity {
            api_level: Some(MIN_NATIVE_WEAK_API_LEVEL),
            ..Default::default()
        });
        assert!(platform_supports_native_weak_refs(&config));
    }

    #[test]
    fn test_broken_vm_is_emulated() {
        let config = BridgeConfig::new().runtime(RuntimeIdentity {
            api_level: Some(19),
            vm_name: Some("Lemur".into()),
            vm_version: Some("2.1".into()),
        });
        assert_eq!(config.weak_ref_mode_selected(), WeakRefMode::Emulated);
    }
}
