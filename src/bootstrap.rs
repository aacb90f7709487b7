//! Bringing the backend client up and tracking who is signed in

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::{Session, User};
use crate::backend::Backend;
use crate::error::Error;

/// Lifecycle of the backend client.
///
/// `Uninitialized -> Loading -> Ready | Failed`; the last two are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl BootstrapState {
    pub fn can_transition_to(&self, next: &BootstrapState) -> bool {
        matches!(
            (self, next),
            (BootstrapState::Uninitialized, BootstrapState::Loading)
                | (BootstrapState::Loading, BootstrapState::Ready)
                | (BootstrapState::Loading, BootstrapState::Failed(_))
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapState::Ready | BootstrapState::Failed(_))
    }
}

/// Runs the backend loader once, bounded by a timeout.
pub struct Bootstrap {
    timeout: Duration,
    state: watch::Sender<BootstrapState>,
}

impl Bootstrap {
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(BootstrapState::Uninitialized);
        Self { timeout, state }
    }

    pub fn state(&self) -> BootstrapState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    fn transition(&self, next: BootstrapState) -> Result<(), Error> {
        let current = self.state();
        if !current.can_transition_to(&next) {
            return Err(Error::Bootstrap(format!(
                "illegal transition {:?} -> {:?}",
                current, next
            )));
        }
        log::debug!("bootstrap {:?} -> {:?}", current, next);
        self.state.send_replace(next);
        Ok(())
    }

    /// Await `loader` and hand out the backend it produced.
    ///
    /// A loader error or a timeout leaves the bootstrap `Failed`; there is
    /// no retry.
    pub async fn load<B, F>(&self, loader: F) -> Result<Arc<dyn Backend>, Error>
    where
        B: Backend + 'static,
        F: Future<Output = Result<B, Error>>,
    {
        self.transition(BootstrapState::Loading)?;

        let reason = match tokio::time::timeout(self.timeout, loader).await {
            Ok(Ok(backend)) => {
                self.transition(BootstrapState::Ready)?;
                return Ok(Arc::new(backend));
            }
            Ok(Err(e)) => e.user_message(),
            Err(_) => format!(
                "backend client did not load within {}s",
                self.timeout.as_secs_f32()
            ),
        };

        log::error!("bootstrap failed: {}", reason);
        self.transition(BootstrapState::Failed(reason.clone()))?;
        Err(Error::Bootstrap(reason))
    }
}

/// What an app shows at the top level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppPhase {
    Loading,
    Failed(String),
    SignedOut,
    SignedIn,
}

impl AppPhase {
    pub fn resolve(state: &BootstrapState, signed_in: bool) -> Self {
        match state {
            BootstrapState::Uninitialized | BootstrapState::Loading => AppPhase::Loading,
            BootstrapState::Failed(reason) => AppPhase::Failed(reason.clone()),
            BootstrapState::Ready if signed_in => AppPhase::SignedIn,
            BootstrapState::Ready => AppPhase::SignedOut,
        }
    }
}

/// Restores the session and keeps a synchronous view of the identity
pub struct SessionTracker {
    identity: watch::Receiver<Option<Session>>,
}

impl SessionTracker {
    /// Restore any existing session.
    ///
    /// A failing lookup is logged and treated as signed out.
    pub async fn start(backend: &dyn Backend) -> Self {
        let identity = backend.session_changes();
        if let Err(e) = backend.get_session().await {
            log::warn!("could not restore session: {}", e);
        }
        Self { identity }
    }

    pub fn current_user(&self) -> Option<User> {
        self.identity.borrow().as_ref().map(|s| s.user.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.borrow().is_some()
    }

    pub fn identity(&self) -> watch::Receiver<Option<Session>> {
        self.identity.clone()
    }

    /// Wait until the identity changes, then return it
    pub async fn changed(&mut self) -> Option<User> {
        if self.identity.changed().await.is_err() {
            return None;
        }
        self.current_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn only_forward_transitions_are_legal() {
        use BootstrapState::*;
        assert!(Uninitialized.can_transition_to(&Loading));
        assert!(Loading.can_transition_to(&Ready));
        assert!(Loading.can_transition_to(&Failed("x".into())));
        assert!(!Uninitialized.can_transition_to(&Ready));
        assert!(!Ready.can_transition_to(&Loading));
        assert!(!Failed("x".into()).can_transition_to(&Ready));
        assert!(Ready.is_terminal());
    }

    #[tokio::test]
    async fn load_reaches_ready_once() {
        let bootstrap = Bootstrap::new(Duration::from_secs(1));
        bootstrap.load(async { Ok(MemoryBackend::new()) }).await.unwrap();
        assert_eq!(bootstrap.state(), BootstrapState::Ready);

        let again = bootstrap.load(async { Ok(MemoryBackend::new()) }).await;
        assert!(matches!(again, Err(Error::Bootstrap(_))));
        assert_eq!(bootstrap.state(), BootstrapState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out_instead_of_hanging() {
        let bootstrap = Bootstrap::new(Duration::from_secs(5));
        let result = bootstrap
            .load(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(MemoryBackend::new())
            })
            .await;
        assert!(result.is_err());
        assert!(matches!(bootstrap.state(), BootstrapState::Failed(_)));
        assert_eq!(
            AppPhase::resolve(&bootstrap.state(), false),
            AppPhase::Failed("backend client did not load within 5s".to_string())
        );
    }

    #[tokio::test]
    async fn loader_error_fails() {
        let bootstrap = Bootstrap::new(Duration::from_secs(1));
        let result = bootstrap
            .load(async { Err::<MemoryBackend, _>(Error::Bootstrap("unreachable".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(bootstrap.state(), BootstrapState::Failed("unreachable".into()));
    }

    #[tokio::test]
    async fn tracker_sees_sign_out_synchronously() {
        let backend = MemoryBackend::new();
        backend.sign_up("s@x.io", "pw").await.unwrap();
        let tracker = SessionTracker::start(&backend).await;
        assert_eq!(tracker.current_user().unwrap().email.as_deref(), Some("s@x.io"));

        backend.sign_out().await.unwrap();
        assert!(tracker.current_user().is_none());
        assert!(!tracker.is_signed_in());
    }
}
