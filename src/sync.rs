//! Fetch once, then re-fetch on every change the feed reports.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::{Session, User};
use crate::backend::Backend;
use crate::realtime::{ChangeEvent, ChannelHandle, ChannelSpec, TableBinding};

/// Loads one app's view data
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type Output: Clone + Default + Send + Sync + 'static;

    /// Tables whose changes trigger a re-fetch
    fn bindings(&self) -> Vec<TableBinding>;

    /// Re-read everything into `output`. A failed query is logged and
    /// leaves its part of `output` as it was.
    async fn refresh(&self, backend: &dyn Backend, output: &mut Self::Output);
}

/// Published view data
#[derive(Debug, Clone, Default)]
pub struct Synced<T> {
    /// Number of completed fetches, the initial one included
    pub generation: u64,
    pub data: T,
}

/// A running fetch-and-subscribe loop.
///
/// Each change event causes one full re-fetch; re-fetches run one at a
/// time in event order. `stop()` or dropping the value ends it.
pub struct DataSync<T> {
    backend: Arc<dyn Backend>,
    channel: Option<ChannelHandle>,
    state: watch::Receiver<Synced<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Clone + Default + Send + Sync + 'static> DataSync<T> {
    pub async fn start<F>(backend: Arc<dyn Backend>, channel_name: &str, fetcher: F) -> Self
    where
        F: Fetcher<Output = T>,
    {
        let (events_tx, mut events) = mpsc::unbounded_channel::<ChangeEvent>();
        let spec = fetcher
            .bindings()
            .into_iter()
            .fold(ChannelSpec::new(channel_name), ChannelSpec::on);
        let callback = Arc::new(move |event: ChangeEvent| {
            // The loop may already be gone.
            let _ = events_tx.send(event);
        });
        let channel = match backend.subscribe(spec, callback).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("no live updates for {}: {}", channel_name, e);
                None
            }
        };

        let mut data = T::default();
        fetcher.refresh(backend.as_ref(), &mut data).await;
        let (publish, state) = watch::channel(Synced { generation: 1, data });

        let task_backend = backend.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log::debug!("{:?} on {}, re-fetching", event.kind, event.table);
                let mut data = publish.borrow().data.clone();
                fetcher.refresh(task_backend.as_ref(), &mut data).await;
                publish.send_modify(|synced| {
                    synced.generation += 1;
                    synced.data = data;
                });
            }
        });

        Self {
            backend,
            channel,
            state,
            task: Some(task),
        }
    }

    /// The latest published data
    pub fn data(&self) -> T {
        self.state.borrow().data.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    pub fn watch(&self) -> watch::Receiver<Synced<T>> {
        self.state.clone()
    }

    pub fn is_live(&self) -> bool {
        self.channel.is_some()
    }

    /// Unsubscribe and end the re-fetch loop
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            if let Err(e) = self.backend.unsubscribe(&channel).await {
                log::warn!("could not leave {}: {}", channel.topic, e);
            }
        }
    }
}

impl<T> Drop for DataSync<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            let backend = self.backend.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = backend.unsubscribe(&channel).await;
                });
            }
        }
    }
}

/// Decides whether an identity may use an app
#[async_trait]
pub trait Admission: Send + Sync + 'static {
    type Fetcher: Fetcher;
    type Profile: Clone + Send + Sync + 'static;

    /// `Ok` admits the identity, with its profile when there is one.
    /// `Err` carries the message shown for a refusal; the identity is
    /// then signed out.
    async fn admit(&self, backend: &dyn Backend, user: &User) -> Result<Option<Self::Profile>, String>;

    fn fetcher(&self) -> Self::Fetcher;
}

type OutputOf<A> = <<A as Admission>::Fetcher as Fetcher>::Output;

struct Slot<A: Admission> {
    user_id: Option<String>,
    profile: Option<A::Profile>,
    sync: Option<DataSync<OutputOf<A>>>,
    refusal: Option<String>,
}

struct Shared<A: Admission> {
    backend: Arc<dyn Backend>,
    admission: A,
    channel: String,
    identity: watch::Receiver<Option<Session>>,
    slot: Mutex<Slot<A>>,
    /// Serializes reconciliations
    turn: tokio::sync::Mutex<()>,
}

impl<A: Admission> Shared<A> {
    fn slot(&self) -> MutexGuard<'_, Slot<A>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn reconcile(&self) {
        let _turn = self.turn.lock().await;
        let user = self.identity.borrow().as_ref().map(|s| s.user.clone());
        let user_id = user.as_ref().map(|u| u.id.clone());

        let stale = {
            let mut slot = self.slot();
            if slot.user_id == user_id {
                return;
            }
            slot.user_id = None;
            slot.profile = None;
            slot.sync.take()
        };
        if let Some(sync) = stale {
            log::debug!("identity changed, leaving {}", self.channel);
            sync.stop().await;
        }

        let user = match user {
            Some(user) => user,
            None => return,
        };

        match self.admission.admit(self.backend.as_ref(), &user).await {
            Ok(profile) => {
                let sync = DataSync::start(self.backend.clone(), &self.channel, self.admission.fetcher()).await;
                let mut slot = self.slot();
                slot.user_id = Some(user.id);
                slot.profile = profile;
                slot.sync = Some(sync);
                slot.refusal = None;
            }
            Err(reason) => {
                log::warn!("{} refused: {}", user.id, reason);
                if let Err(e) = self.backend.sign_out().await {
                    log::warn!("sign out failed: {}", e);
                }
                self.slot().refusal = Some(reason);
            }
        }
    }
}

/// Keeps a [`DataSync`] in step with the signed-in identity.
///
/// A background task follows the backend's session changes: a new
/// identity goes through [`Admission::admit`] and gets its own sync, and
/// the sync of an identity that went away (sign-out, expiry, a switch to
/// another user) is stopped. [`IdentitySync::reconcile`] does the same
/// step on demand.
pub struct IdentitySync<A: Admission> {
    shared: Arc<Shared<A>>,
    task: JoinHandle<()>,
}

impl<A: Admission> IdentitySync<A> {
    pub async fn start(backend: Arc<dyn Backend>, channel_name: &str, admission: A) -> Self {
        let identity = backend.session_changes();
        let mut changes = identity.clone();
        let shared = Arc::new(Shared {
            backend,
            admission,
            channel: channel_name.to_string(),
            identity,
            slot: Mutex::new(Slot {
                user_id: None,
                profile: None,
                sync: None,
                refusal: None,
            }),
            turn: tokio::sync::Mutex::new(()),
        });
        shared.reconcile().await;

        let follower = shared.clone();
        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                follower.reconcile().await;
            }
        });
        Self { shared, task }
    }

    /// Bring the sync in line with the current identity now
    pub async fn reconcile(&self) {
        self.shared.reconcile().await;
    }

    /// Keeps the follower from reacting to session changes until the
    /// guard is dropped, so a multi-step sign-in is seen only once done.
    pub async fn hold(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.shared.turn.lock().await
    }

    /// Identity the running sync belongs to
    pub fn user_id(&self) -> Option<String> {
        self.shared.slot().user_id.clone()
    }

    pub fn profile(&self) -> Option<A::Profile> {
        self.shared.slot().profile.clone()
    }

    /// Latest data of the running sync
    pub fn data(&self) -> Option<OutputOf<A>> {
        self.shared.slot().sync.as_ref().map(DataSync::data)
    }

    pub fn generation(&self) -> Option<u64> {
        self.shared.slot().sync.as_ref().map(DataSync::generation)
    }

    pub fn is_live(&self) -> bool {
        self.shared.slot().sync.as_ref().map_or(false, DataSync::is_live)
    }

    /// Message of the last refused identity, if not yet taken
    pub fn refusal(&self) -> Option<String> {
        self.shared.slot().refusal.clone()
    }

    pub fn take_refusal(&self) -> Option<String> {
        self.shared.slot().refusal.take()
    }
}

impl<A: Admission> Drop for IdentitySync<A> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
