//! Named proxy instances.
//!
//! Callers that share a name share one proxy, and with it one cache, one
//! limiter and one breaker.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::backend::{build_backend, BackendError, InferenceBackend};
use crate::config::{BackendProfile, GuardConfig, ProxySettings};
use crate::proxy::resilient::ResilientCallProxy;
use crate::proxy::stats::StatsSnapshot;

/// Directory of live proxies, passed by reference to whoever needs it.
#[derive(Default)]
pub struct ProxyRegistry {
    proxies: DashMap<String, Arc<ResilientCallProxy>>,
    /// Profiles of proxies created from config, with their effective settings.
    profiles: DashMap<String, (BackendProfile, ProxySettings)>,
}

/// What a [`ProxyRegistry::sync_profiles`] pass changed.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the proxy registered under `name`, creating it on first use.
    /// A later call with the same name ignores `backend` and `settings`.
    pub fn get_or_create(
        &self,
        name: &str,
        backend: Arc<dyn InferenceBackend>,
        settings: ProxySettings,
    ) -> Arc<ResilientCallProxy> {
        match self.proxies.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                tracing::info!(proxy = %name, "Registering proxy");
                let proxy = Arc::new(ResilientCallProxy::new(name, backend, settings));
                entry.insert(proxy.clone());
                proxy
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResilientCallProxy>> {
        self.proxies.get(name).map(|entry| entry.value().clone())
    }

    /// Insert or swap the proxy under `name`, returning the previous one.
    pub fn replace(
        &self,
        name: &str,
        proxy: Arc<ResilientCallProxy>,
    ) -> Option<Arc<ResilientCallProxy>> {
        self.profiles.remove(name);
        self.proxies.insert(name.to_string(), proxy)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ResilientCallProxy>> {
        self.profiles.remove(name);
        let removed = self.proxies.remove(name).map(|(_, proxy)| proxy);
        if removed.is_some() {
            tracing::info!(proxy = %name, "Proxy removed");
        }
        removed
    }

    pub fn clear_all(&self) {
        let count = self.proxies.len();
        self.proxies.clear();
        self.profiles.clear();
        tracing::info!(count, "Registry cleared");
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.proxies.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Stats of every proxy, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, StatsSnapshot)> {
        let mut stats: Vec<(String, StatsSnapshot)> = self
            .proxies
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Bring config-created proxies in line with `config`.
    ///
    /// New backends are created, changed ones replaced (losing their state)
    /// and those no longer listed removed. Proxies registered through
    /// [`get_or_create`](Self::get_or_create) are left alone unless a backend
    /// of the same name appears in the config. If any backend fails to build
    /// the registry is not modified.
    pub fn sync_profiles(&self, config: &GuardConfig) -> Result<SyncReport, BackendError> {
        let mut report = SyncReport::default();
        let mut built = Vec::new();

        for profile in &config.backends {
            let settings = config.settings_for(profile);
            let unchanged = self
                .profiles
                .get(&profile.name)
                .is_some_and(|e| e.0 == *profile && e.1 == settings);
            if unchanged {
                report.unchanged.push(profile.name.clone());
                continue;
            }
            let proxy = proxy_from_profile(profile, settings.clone())?;
            built.push((profile.clone(), settings, proxy));
        }

        for (profile, settings, proxy) in built {
            let name = profile.name.clone();
            let previous = self.proxies.insert(name.clone(), Arc::new(proxy));
            self.profiles.insert(name.clone(), (profile, settings));
            if previous.is_some() {
                tracing::info!(proxy = %name, "Proxy replaced from config");
                report.replaced.push(name);
            } else {
                tracing::info!(proxy = %name, "Proxy created from config");
                report.added.push(name);
            }
        }

        let stale: Vec<String> = self
            .profiles
            .iter()
            .filter(|e| config.backend(e.key()).is_none())
            .map(|e| e.key().clone())
            .collect();
        for name in stale {
            self.remove(&name);
            report.removed.push(name);
        }

        Ok(report)
    }
}

/// Build a proxy, its backend and its access policies from a profile.
pub fn proxy_from_profile(
    profile: &BackendProfile,
    settings: ProxySettings,
) -> Result<ResilientCallProxy, BackendError> {
    let backend = build_backend(profile)?;
    Ok(ResilientCallProxy::builder(profile.name.clone(), backend)
        .settings(settings)
        .access_policies(profile.access.build_policies())
        .build())
}
