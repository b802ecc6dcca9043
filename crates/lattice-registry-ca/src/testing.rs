//! In-memory collaborators for unit tests

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use lattice_common::secret_store::secret_coordinates;
use lattice_common::{CreateOutcome, Error, SecretStore};
use tokio::sync::Barrier;

use crate::error::{RegistryCaError, Result};
use crate::remote::ClusterClient;

/// Store operations that can be failed on demand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Apply,
    Update,
}

/// A write observed by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub op: StoreOp,
    pub namespace: String,
    pub name: String,
}

#[derive(Default)]
struct State {
    secrets: BTreeMap<(String, String), Secret>,
    writes: Vec<Write>,
    failing: HashSet<StoreOp>,
    get_barrier: Option<(Arc<Barrier>, usize)>,
}

/// SecretStore with atomic create-or-conflict semantics
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn injected(op: StoreOp) -> Error {
    Error::internal_with_context("memory-store", format!("injected {op:?} failure"))
}

fn not_found(name: &str) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("secrets \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a secret without recording a write
    pub fn insert(&self, secret: Secret) {
        let (name, namespace) = secret_coordinates(&secret).expect("seeded secret needs coordinates");
        self.lock().secrets.insert((namespace, name), secret);
    }

    /// Current contents of a secret
    pub fn secret(&self, name: &str, namespace: &str) -> Option<Secret> {
        self.lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored secrets
    pub fn len(&self) -> usize {
        self.lock().secrets.len()
    }

    /// Writes recorded so far
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Fail every subsequent call of `op`
    pub fn fail_on(&self, op: StoreOp) {
        self.lock().failing.insert(op);
    }

    /// Stop failing `op`
    pub fn heal(&self, op: StoreOp) {
        self.lock().failing.remove(&op);
    }

    /// Hold the next `parties` gets until all of them have arrived
    ///
    /// Each held get returns the state it saw on arrival.
    pub fn synchronize_gets(&self, parties: usize) {
        self.lock().get_barrier = Some((Arc::new(Barrier::new(parties)), parties));
    }

    fn check(&self, op: StoreOp) -> std::result::Result<(), Error> {
        if self.lock().failing.contains(&op) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn record(state: &mut State, op: StoreOp, namespace: &str, name: &str) {
        state.writes.push(Write {
            op,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, name: &str, namespace: &str) -> std::result::Result<Option<Secret>, Error> {
        let barrier = {
            let mut state = self.lock();
            match state.get_barrier.take() {
                Some((barrier, remaining)) => {
                    if remaining > 1 {
                        state.get_barrier = Some((barrier.clone(), remaining - 1));
                    }
                    Some(barrier)
                }
                None => None,
            }
        };
        self.check(StoreOp::Get)?;
        // snapshot before parking so every synchronized caller sees the same state
        let snapshot = self.secret(name, namespace);
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        Ok(snapshot)
    }

    async fn create(&self, secret: &Secret) -> std::result::Result<CreateOutcome, Error> {
        self.check(StoreOp::Create)?;
        let (name, namespace) = secret_coordinates(secret)?;
        let mut state = self.lock();
        let key = (namespace.clone(), name.clone());
        if state.secrets.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.secrets.insert(key, secret.clone());
        Self::record(&mut state, StoreOp::Create, &namespace, &name);
        Ok(CreateOutcome::Created)
    }

    async fn apply(&self, secret: &Secret) -> std::result::Result<(), Error> {
        self.check(StoreOp::Apply)?;
        let (name, namespace) = secret_coordinates(secret)?;
        let mut state = self.lock();
        let key = (namespace.clone(), name.clone());
        let merged = match state.secrets.remove(&key) {
            Some(mut existing) => {
                if secret.data.is_some() {
                    existing.data = secret.data.clone();
                }
                if secret.type_.is_some() {
                    existing.type_ = secret.type_.clone();
                }
                if secret.metadata.labels.is_some() {
                    existing.metadata.labels = secret.metadata.labels.clone();
                }
                if secret.metadata.owner_references.is_some() {
                    existing.metadata.owner_references = secret.metadata.owner_references.clone();
                }
                existing
            }
            None => secret.clone(),
        };
        state.secrets.insert(key, merged);
        Self::record(&mut state, StoreOp::Apply, &namespace, &name);
        Ok(())
    }

    async fn update(&self, secret: &Secret) -> std::result::Result<(), Error> {
        self.check(StoreOp::Update)?;
        let (name, namespace) = secret_coordinates(secret)?;
        let mut state = self.lock();
        let key = (namespace.clone(), name.clone());
        if !state.secrets.contains_key(&key) {
            return Err(not_found(&name));
        }
        state.secrets.insert(key, secret.clone());
        Self::record(&mut state, StoreOp::Update, &namespace, &name);
        Ok(())
    }
}

/// A workload cluster backed by a [`MemoryStore`]
#[derive(Default)]
pub struct MemoryCluster {
    store: Arc<MemoryStore>,
    namespaces: Mutex<Vec<String>>,
    fail_namespaces: Mutex<bool>,
}

impl MemoryCluster {
    /// The cluster's secret store
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// Namespaces ensured so far, in order
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make namespace creation fail
    pub fn fail_namespaces(&self) {
        *self.fail_namespaces.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    fn secrets(&self) -> Arc<dyn SecretStore> {
        self.store.clone()
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        if *self.fail_namespaces.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(RegistryCaError::store(
                "ensure",
                format!("namespace {name}"),
                injected(StoreOp::Apply),
            ));
        }
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        if !namespaces.iter().any(|n| n == name) {
            namespaces.push(name.to_string());
        }
        Ok(())
    }
}

#[tokio::test]
async fn memory_store_create_conflicts_on_existing() {
    let store = MemoryStore::default();
    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some("a".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(
        store.create(&secret).await.expect("create"),
        CreateOutcome::Created
    );
    assert_eq!(
        store.create(&secret).await.expect("create"),
        CreateOutcome::AlreadyExists
    );
    assert_eq!(store.writes().len(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn synchronized_gets_return_state_seen_on_arrival() {
    let store = MemoryStore::default();
    store.synchronize_gets(2);
    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some("a".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let (first, second) = tokio::join!(store.get("a", "ns"), async {
        let seen = store.get("a", "ns").await;
        store.create(&secret).await.expect("create");
        seen
    });

    assert!(first.expect("get").is_none());
    assert!(second.expect("get").is_none());
    assert_eq!(store.len(), 1);
}
