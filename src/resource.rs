//! Fetch-on-identity resources.
//!
//! A [`Resource`] owns one collection (or a small bundle of collections) keyed
//! by an identity such as the signed-in parent's id. Changing the key reloads
//! the data; mutations write through to the store and then reload. State is
//! published on a watch channel so observers can react to every transition.
//!
//! Each load carries the generation it was started under. A load that
//! finishes after a newer one has been started is dropped, so a slow response
//! for an old key never overwrites data for the current key.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::notify::{Notice, Notifier};
use crate::session::Session;
use crate::task::ScopedTask;

#[async_trait]
pub trait Loader: Send + Sync + 'static {
    type Key: Clone + PartialEq + Debug + Send + Sync + 'static;
    type Output: Clone + Default + Send + Sync + 'static;

    /// Label used in logs and notices.
    const NAME: &'static str;

    async fn load(&self, key: &Self::Key) -> Result<Self::Output, StoreError>;
}

#[derive(Debug, Clone)]
pub struct ResourceState<K, T> {
    pub key: Option<K>,
    pub data: T,
    pub loading: bool,
    pub error: Option<String>,
    generation: u64,
}

impl<K, T: Default> Default for ResourceState<K, T> {
    fn default() -> Self {
        Self {
            key: None,
            data: T::default(),
            loading: false,
            error: None,
            generation: 0,
        }
    }
}

impl<K, T> ResourceState<K, T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of a write. Failures are reported here instead of being returned as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> MutationOutcome<T> {
    pub fn succeeded(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self
                .error
                .unwrap_or_else(|| "mutation returned no data".to_string())),
        }
    }
}

pub type StateOf<L> = ResourceState<<L as Loader>::Key, <L as Loader>::Output>;

pub struct Resource<L: Loader> {
    loader: L,
    state: watch::Sender<StateOf<L>>,
    writes: Mutex<()>,
    notifier: Arc<dyn Notifier>,
}

impl<L: Loader> Resource<L> {
    pub fn new(loader: L, notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(ResourceState::default());
        Self {
            loader,
            state,
            writes: Mutex::new(()),
            notifier,
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn snapshot(&self) -> StateOf<L> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> L::Output {
        self.state.borrow().data.clone()
    }

    pub fn key(&self) -> Option<L::Key> {
        self.state.borrow().key.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StateOf<L>> {
        self.state.subscribe()
    }

    /// The current key, or a rejection naming what is missing.
    pub fn require_key(&self) -> Result<L::Key, StoreError> {
        self.key()
            .ok_or_else(|| StoreError::Rejected(format!("no identity selected for {}", L::NAME)))
    }

    /// Switches to a new identity and loads it. Without an identity the data is
    /// cleared and nothing is fetched; the resource reports not loading.
    /// Setting the key it already has is a no-op.
    pub async fn set_key(&self, key: Option<L::Key>) -> bool {
        let mut generation = None;
        let changed = self.state.send_if_modified(|state| {
            if state.key == key && (key.is_none() || state.generation > 0) {
                return false;
            }
            state.generation += 1;
            state.key = key.clone();
            state.data = L::Output::default();
            state.error = None;
            state.loading = key.is_some();
            generation = Some(state.generation);
            true
        });

        match (changed, generation, key) {
            (true, Some(generation), Some(key)) => {
                debug!(resource = L::NAME, ?key, generation, "identity changed");
                self.fetch(generation, key).await
            }
            _ => false,
        }
    }

    /// Reloads the current key. Returns whether this load's result was applied.
    pub async fn refetch(&self) -> bool {
        let mut started = None;
        self.state.send_modify(|state| {
            if let Some(key) = state.key.clone() {
                state.generation += 1;
                state.loading = true;
                started = Some((state.generation, key));
            }
        });

        match started {
            Some((generation, key)) => self.fetch(generation, key).await,
            None => false,
        }
    }

    async fn fetch(&self, generation: u64, key: L::Key) -> bool {
        let result = self.loader.load(&key).await;
        let mut failure = None;

        let applied = self.state.send_if_modified(|state| {
            if state.generation != generation {
                return false;
            }
            state.loading = false;
            match &result {
                Ok(data) => {
                    state.data = data.clone();
                    state.error = None;
                }
                Err(err) => {
                    state.error = Some(err.to_string());
                    failure = Some(err.to_string());
                }
            }
            true
        });

        if !applied {
            debug!(resource = L::NAME, ?key, generation, "discarding stale load");
            return false;
        }

        if let Some(message) = failure {
            warn!(resource = L::NAME, ?key, error = %message, "load failed");
            self.notifier
                .notify(Notice::error(format!("Failed to load {}", L::NAME), message));
            return false;
        }

        true
    }

    /// Runs `write`, then reloads. Writes on one resource run one at a time.
    /// A failed write leaves the data untouched and is not retried.
    pub async fn mutate<T, F>(
        &self,
        action: &str,
        success: Option<&str>,
        write: F,
    ) -> MutationOutcome<T>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
    {
        let _guard = self.writes.lock().await;

        match write.await {
            Ok(data) => {
                info!(resource = L::NAME, action, "write applied");
                self.refetch().await;
                if let Some(message) = success {
                    self.notifier.notify(Notice::success(message));
                }
                MutationOutcome::succeeded(data)
            }
            Err(err) => {
                let message = err.to_string();
                warn!(resource = L::NAME, action, error = %message, "write failed");
                self.state.send_modify(|state| state.error = Some(message.clone()));
                self.notifier
                    .notify(Notice::error(format!("Could not {action}"), message.clone()));
                MutationOutcome::failed(message)
            }
        }
    }
}

/// Calls `on_change` with the current session, then again after every change,
/// until the returned task is dropped or the context goes away.
pub fn follow<F, Fut>(mut identity: watch::Receiver<Option<Session>>, mut on_change: F) -> ScopedTask
where
    F: FnMut(Option<Session>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    ScopedTask::spawn(async move {
        loop {
            let session = identity.borrow_and_update().clone();
            on_change(session).await;
            if identity.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, UserRole};
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::session::SessionContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Loads `vec![key]` after a delay that depends on the key.
    #[derive(Default)]
    struct EchoLoader {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Loader for EchoLoader {
        type Key = u64;
        type Output = Vec<u64>;
        const NAME: &'static str = "echo";

        async fn load(&self, key: &u64) -> Result<Vec<u64>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(*key)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Database("boom".into()));
            }
            Ok(vec![*key])
        }
    }

    fn resource() -> (Arc<Resource<EchoLoader>>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (
            Arc::new(Resource::new(EchoLoader::default(), notifier.clone())),
            notifier,
        )
    }

    #[tokio::test]
    async fn no_identity_means_not_loading_and_no_fetch() {
        let (resource, _) = resource();
        assert!(!resource.set_key(None).await);
        let state = resource.snapshot();
        assert!(!state.loading);
        assert!(state.data.is_empty());
        assert_eq!(resource.loader().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slower_stale_load_does_not_overwrite_newer_key() {
        let (resource, _) = resource();
        let (first, second) = tokio::join!(resource.set_key(Some(60)), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            resource.set_key(Some(1)).await
        });
        assert!(!first);
        assert!(second);
        assert_eq!(resource.data(), vec![1]);
        assert_eq!(resource.key(), Some(1));
        assert!(!resource.is_loading());
    }

    #[tokio::test]
    async fn same_key_does_not_reload() {
        let (resource, _) = resource();
        resource.set_key(Some(1)).await;
        resource.set_key(Some(1)).await;
        assert_eq!(resource.loader().calls.load(Ordering::SeqCst), 1);
        assert!(resource.refetch().await);
        assert_eq!(resource.loader().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_data_and_reports() {
        let (resource, notifier) = resource();
        resource.set_key(Some(1)).await;
        resource.loader().fail.store(true, Ordering::SeqCst);
        assert!(!resource.refetch().await);

        let state = resource.snapshot();
        assert_eq!(state.data, vec![1]);
        assert_eq!(state.error.as_deref(), Some("database error: boom"));
        assert_eq!(notifier.count(NoticeLevel::Error), 1);
    }

    #[tokio::test]
    async fn successful_mutation_reloads_once() {
        let (resource, notifier) = resource();
        resource.set_key(Some(1)).await;

        let outcome = resource
            .mutate("touch", Some("Touched"), async { Ok::<_, StoreError>(7) })
            .await;

        assert_eq!(outcome, MutationOutcome::succeeded(7));
        assert_eq!(resource.loader().calls.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.count(NoticeLevel::Success), 1);
    }

    #[tokio::test]
    async fn failed_mutation_skips_reload_and_keeps_data() {
        let (resource, _) = resource();
        resource.set_key(Some(1)).await;

        let outcome: MutationOutcome<()> = resource
            .mutate("touch", None, async {
                Err(StoreError::Rejected("duplicate row".into()))
            })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("duplicate row"));
        assert_eq!(resource.data(), vec![1]);
        assert_eq!(resource.loader().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follows_session_changes() {
        let (resource, _) = resource();
        let context = SessionContext::new();
        let follower = {
            let resource = resource.clone();
            follow(context.subscribe(), move |session| {
                let resource = resource.clone();
                async move {
                    let key = session.map(|s| s.profile.first_name.len() as u64);
                    resource.set_key(key).await;
                }
            })
        };

        context.sign_in(Session::new(Profile {
            id: Uuid::new_v4(),
            school_id: None,
            role: UserRole::Parent,
            first_name: "Kiara".to_string(),
            last_name: "Patel".to_string(),
            email: "kiara@example.com".to_string(),
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(resource.data(), vec![5]);

        context.sign_out();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(resource.data().is_empty());
        assert!(!resource.is_loading());

        drop(follower);
    }
}
