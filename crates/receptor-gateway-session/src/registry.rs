//! In-memory connection locator.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use receptor_gateway_core::{ConnectionLocator, Receptor};

type NodeSessions = HashMap<String, Arc<dyn Receptor>>;

/// Locator for sessions owned by this gateway process.
///
/// Sessions are indexed per tenant; each tenant's node map sits behind its
/// own shard lock, so lookups for one tenant don't contend with churn in
/// another. State is lost on restart.
#[derive(Default)]
pub struct LocalConnectionLocator {
    tenants: DashMap<String, NodeSessions>,
}

impl LocalConnectionLocator {
    /// Create an empty locator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of registered sessions.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.tenants.iter().map(|nodes| nodes.len()).sum()
    }

    fn prune_tenant(&self, tenant: &str) {
        self.tenants.remove_if(tenant, |_, nodes| nodes.is_empty());
    }
}

#[async_trait]
impl ConnectionLocator for LocalConnectionLocator {
    async fn register(
        &self,
        tenant: &str,
        node_id: &str,
        session: Arc<dyn Receptor>,
    ) -> Option<Arc<dyn Receptor>> {
        let displaced = self
            .tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(node_id.to_string(), session);

        if displaced.is_some() {
            tracing::warn!(%tenant, %node_id, "replacing existing connection");
        } else {
            tracing::debug!(%tenant, %node_id, "connection registered");
        }
        displaced
    }

    async fn remove(&self, tenant: &str, node_id: &str) {
        let removed = self
            .tenants
            .get_mut(tenant)
            .and_then(|mut nodes| nodes.remove(node_id));

        if removed.is_some() {
            tracing::debug!(%tenant, %node_id, "connection removed");
            self.prune_tenant(tenant);
        }
    }

    async fn remove_if(&self, tenant: &str, node_id: &str, session: &Arc<dyn Receptor>) -> bool {
        let removed = self.tenants.get_mut(tenant).is_some_and(|mut nodes| {
            let current = nodes
                .get(node_id)
                .is_some_and(|existing| Arc::ptr_eq(existing, session));
            if current {
                nodes.remove(node_id);
            }
            current
        });

        if removed {
            tracing::debug!(%tenant, %node_id, "connection removed");
            self.prune_tenant(tenant);
        }
        removed
    }

    async fn get(&self, tenant: &str, node_id: &str) -> Option<Arc<dyn Receptor>> {
        self.tenants
            .get(tenant)
            .and_then(|nodes| nodes.get(node_id).cloned())
    }

    async fn get_all(&self) -> HashMap<String, BTreeSet<String>> {
        self.tenants
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().keys().cloned().collect()))
            .collect()
    }

    async fn get_by_tenant(&self, tenant: &str) -> BTreeSet<String> {
        self.tenants
            .get(tenant)
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use receptor_gateway_core::QueueConfig;

    use super::*;
    use crate::session::{ReceptorSession, SessionChannels};

    fn session(tenant: &str, node_id: &str) -> (Arc<dyn Receptor>, SessionChannels) {
        let (session, channels) = ReceptorSession::new(tenant, node_id, &QueueConfig::default());
        let session: Arc<dyn Receptor> = session;
        (session, channels)
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_get_on_empty_locator() {
        let locator = LocalConnectionLocator::new();
        assert!(locator.get("acct1", "nodeX").await.is_none());
        assert!(locator.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_then_get() {
        let locator = LocalConnectionLocator::new();
        let (s, _channels) = session("acct1", "nodeX");

        assert!(locator.register("acct1", "nodeX", Arc::clone(&s)).await.is_none());

        let found = locator.get("acct1", "nodeX").await.unwrap();
        assert!(Arc::ptr_eq(&found, &s));
        assert!(locator.get("acct2", "nodeX").await.is_none());
    }

    #[tokio::test]
    async fn test_register_displaces_previous_session() {
        let locator = LocalConnectionLocator::new();
        let (s1, _c1) = session("acct1", "nodeX");
        let (s2, _c2) = session("acct1", "nodeX");

        locator.register("acct1", "nodeX", Arc::clone(&s1)).await;
        let displaced = locator
            .register("acct1", "nodeX", Arc::clone(&s2))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&displaced, &s1));
        let found = locator.get("acct1", "nodeX").await.unwrap();
        assert!(Arc::ptr_eq(&found, &s2));
        assert_eq!(locator.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let locator = LocalConnectionLocator::new();
        let (s, _channels) = session("acct1", "nodeX");
        locator.register("acct1", "nodeX", s).await;

        locator.remove("acct1", "nodeX").await;
        assert!(locator.get("acct1", "nodeX").await.is_none());

        locator.remove("acct1", "nodeX").await;
        locator.remove("acct9", "nodeZ").await;
        assert!(locator.get_all().await.is_empty());
        assert_eq!(locator.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_if_ignores_replaced_session() {
        let locator = LocalConnectionLocator::new();
        let (s1, _c1) = session("acct1", "nodeX");
        let (s2, _c2) = session("acct1", "nodeX");

        locator.register("acct1", "nodeX", Arc::clone(&s1)).await;
        locator.register("acct1", "nodeX", Arc::clone(&s2)).await;

        assert!(!locator.remove_if("acct1", "nodeX", &s1).await);
        let found = locator.get("acct1", "nodeX").await.unwrap();
        assert!(Arc::ptr_eq(&found, &s2));

        assert!(locator.remove_if("acct1", "nodeX", &s2).await);
        assert!(locator.get("acct1", "nodeX").await.is_none());
    }

    #[tokio::test]
    async fn test_get_by_tenant() {
        let locator = LocalConnectionLocator::new();
        let mut keep = Vec::new();
        for (tenant, node) in [("acct1", "nodeA"), ("acct1", "nodeB"), ("acct2", "nodeC")] {
            let (s, channels) = session(tenant, node);
            locator.register(tenant, node, s).await;
            keep.push(channels);
        }

        assert_eq!(locator.get_by_tenant("acct1").await, set(&["nodeA", "nodeB"]));
        assert_eq!(locator.get_by_tenant("acct2").await, set(&["nodeC"]));
        assert!(locator.get_by_tenant("acct3").await.is_empty());

        let all = locator.get_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["acct1"], set(&["nodeA", "nodeB"]));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let locator = LocalConnectionLocator::new();
        let (s, _channels) = session("acct1", "nodeX");
        locator.register("acct1", "nodeX", s).await;

        let snapshot = locator.get_all().await;
        locator.remove("acct1", "nodeX").await;

        assert_eq!(snapshot["acct1"], set(&["nodeX"]));
        assert!(locator.get_all().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registers_lose_nothing() {
        let locator = Arc::new(LocalConnectionLocator::new());

        let handles: Vec<_> = (0..200)
            .map(|i| {
                let locator = Arc::clone(&locator);
                tokio::spawn(async move {
                    let tenant = format!("acct{}", i % 7);
                    let node = format!("node{i}");
                    let (s, channels) = session(&tenant, &node);
                    locator.register(&tenant, &node, s).await;
                    channels
                })
            })
            .collect();

        let mut keep = Vec::new();
        for handle in handles {
            keep.push(handle.await.unwrap());
        }

        let all = locator.get_all().await;
        let total: usize = all.values().map(BTreeSet::len).sum();
        assert_eq!(total, 200);
        assert!(all["acct3"].contains("node3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_operation_wins_per_key() {
        let locator = LocalConnectionLocator::new();
        let (s, _channels) = session("acct1", "nodeX");

        for round in 0..50 {
            locator.register("acct1", "nodeX", Arc::clone(&s)).await;
            if round % 2 == 0 {
                locator.remove("acct1", "nodeX").await;
                assert!(locator.get("acct1", "nodeX").await.is_none());
            } else {
                assert!(locator.get("acct1", "nodeX").await.is_some());
            }
        }
    }
}
