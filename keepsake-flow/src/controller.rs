use crate::dispatch::{Delivery, Dispatcher, Subscription};
use crate::error::SessionError;
use crate::session::{AuthenticatedUser, Session, SessionState, SessionStatus, SessionWarning};
use crate::{Configured, Missing};
use chrono::Utc;
use keepsake_core::{AuthError, Identity, IdentityProvider, OAuthToken, ProfileRecord, ProfileStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

struct ControllerState {
    session: Session,
    // Bumped by every logout. A login or refresh that started under an older epoch is stale.
    epoch: u64,
    login_in_flight: bool,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    state: Mutex<ControllerState>,
    dispatcher: Arc<Dispatcher>,
}

impl Inner {
    /// Replace the session and queue its publication. Call with the state lock held and
    /// `flush` once it is released.
    fn publish(&self, state: &mut ControllerState, next: SessionState) -> Session {
        let session = Session::new(state.session.revision() + 1, next);
        state.session = session.clone();
        self.dispatcher.enqueue(Delivery::Session(session.clone()));
        session
    }

    fn warn(&self, warning: SessionWarning) {
        warn!("{warning}");
        self.dispatcher.enqueue(Delivery::Warning(warning));
    }

    fn flush(&self) {
        self.dispatcher.flush();
    }
}

/// The single owner of the current session.
///
/// It runs logins through the configured [`IdentityProvider`], syncs the resulting profile
/// into the [`ProfileStore`] and publishes every change to its subscribers. Cloning the
/// controller yields another handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create a controller from a provider and a profile store.
    pub fn new<P, S>(provider: P, store: S) -> Self
    where
        P: IdentityProvider + 'static,
        S: ProfileStore,
    {
        Self::from_parts(Arc::new(provider), Arc::new(store))
    }

    /// Create a new [`SessionControllerBuilder`].
    pub fn builder() -> SessionControllerBuilder<Missing, Missing> {
        SessionControllerBuilder::default()
    }

    fn from_parts(provider: Arc<dyn IdentityProvider>, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                state: Mutex::new(ControllerState {
                    session: Session::signed_out(),
                    epoch: 0,
                    login_in_flight: false,
                }),
                dispatcher: Arc::new(Dispatcher::default()),
            }),
        }
    }

    /// The identifier of the configured provider.
    pub fn provider_id(&self) -> &str {
        self.inner.provider.provider_id()
    }

    /// The latest published session. Never waits on I/O.
    pub fn current_session(&self) -> Session {
        self.inner.state.lock().session.clone()
    }

    /// Sign in through the identity provider.
    ///
    /// Publishes `Authenticating`, then either `Authenticated` (followed by a second
    /// `Authenticated` carrying the stored profile once the profile sync succeeds) or `Error`
    /// immediately followed by `SignedOut`.
    ///
    /// Fails with [`SessionError::ConcurrentLogin`] while another login is in flight, without
    /// publishing anything. If already authenticated, returns the current session unchanged.
    /// If `logout` is called before the provider answers, the late result is discarded and the
    /// current (signed out) session is returned.
    ///
    /// Dropping the returned future before it resolves releases the login slot; if the
    /// controller is still authenticating for this attempt it publishes `Error(Cancelled)`
    /// and `SignedOut`.
    pub async fn login(&self) -> Result<Session, SessionError> {
        let epoch = {
            let mut state = self.inner.state.lock();
            if state.login_in_flight {
                debug!("login rejected: another login is in flight");
                return Err(SessionError::ConcurrentLogin);
            }
            if state.session.is_authenticated() {
                return Ok(state.session.clone());
            }
            state.login_in_flight = true;
            self.inner.publish(&mut state, SessionState::Authenticating);
            state.epoch
        };
        self.inner.flush();

        let mut attempt = LoginAttempt {
            inner: &self.inner,
            epoch,
            resolved: false,
        };
        let grant = self
            .inner
            .provider
            .authenticate()
            .await
            .and_then(validate_grant);
        attempt.resolved = true;

        match grant {
            Ok((identity, token)) => self.complete_login(epoch, identity, token).await,
            Err(error) => self.fail_login(epoch, error),
        }
    }

    fn fail_login(&self, epoch: u64, error: AuthError) -> Result<Session, SessionError> {
        {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!("discarding failed login that resolved after logout: {error}");
                return Err(SessionError::Auth(error));
            }
            self.inner
                .publish(&mut state, SessionState::Failed(error.clone()));
            self.inner.publish(&mut state, SessionState::SignedOut);
        }
        self.inner.flush();
        warn!("login via {} failed: {error}", self.provider_id());
        Err(SessionError::Auth(error))
    }

    async fn complete_login(
        &self,
        epoch: u64,
        identity: Identity,
        token: OAuthToken,
    ) -> Result<Session, SessionError> {
        let subject = identity.external_id.clone();
        let claims = ProfileRecord::from_identity(&identity);
        {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                let current = state.session.clone();
                drop(state);
                debug!("discarding login for {subject} that resolved after logout");
                self.spawn_provider_sign_out(Some(token));
                return Ok(current);
            }
            let user = AuthenticatedUser {
                identity,
                token,
                profile: claims.clone(),
            };
            self.inner
                .publish(&mut state, SessionState::Authenticated(Box::new(user)));
        }
        self.inner.flush();
        info!("{subject} signed in via {}", self.provider_id());

        let synced = self
            .inner
            .store
            .upsert_merge(&subject, claims.with_last_login(Utc::now()))
            .await;

        let session = {
            let mut state = self.inner.state.lock();
            if state.epoch != epoch {
                debug!("dropping profile sync for {subject}: signed out meanwhile");
                return Ok(state.session.clone());
            }
            match synced {
                Ok(profile) => {
                    if let Some(mut user) = state.session.user().cloned() {
                        user.profile = profile;
                        self.inner
                            .publish(&mut state, SessionState::Authenticated(Box::new(user)));
                    }
                }
                Err(error) => self.inner.warn(SessionWarning::ProfileSync {
                    identity: subject,
                    error,
                }),
            }
            state.session.clone()
        };
        self.inner.flush();
        Ok(session)
    }

    /// Sign out. Idempotent: does nothing while already signed out.
    ///
    /// The local session is cleared in a single publication. The provider-side sign out runs
    /// in the background on the current tokio runtime; its failure is only reported as a
    /// warning.
    pub fn logout(&self) {
        let token = {
            let mut state = self.inner.state.lock();
            let token = match state.session.state() {
                SessionState::SignedOut => return,
                SessionState::Authenticated(user) => Some(user.token.clone()),
                SessionState::Authenticating | SessionState::Failed(_) => None,
            };
            state.epoch += 1;
            self.inner.publish(&mut state, SessionState::SignedOut);
            token
        };
        self.inner.flush();
        info!("signed out of {}", self.provider_id());
        self.spawn_provider_sign_out(token);
    }

    fn spawn_provider_sign_out(&self, token: Option<OAuthToken>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime; provider sign-out skipped, token left unrevoked");
            return;
        };
        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            if let Err(error) = inner.provider.sign_out(token.as_ref()).await {
                inner.warn(SessionWarning::SignOutFailed { error });
                inner.flush();
            }
        });
    }

    /// Re-pull claims and a fresh token for the signed-in user.
    ///
    /// The status stays `Authenticated`. On failure the session is left as it was and a
    /// [`SessionWarning::RefreshFailed`] is reported; the returned session is the unchanged
    /// one. Fails with [`SessionError::NotAuthenticated`] when nobody is signed in.
    pub async fn refresh(&self) -> Result<Session, SessionError> {
        let (epoch, token, subject) = {
            let state = self.inner.state.lock();
            let user = state.session.user().ok_or(SessionError::NotAuthenticated)?;
            (
                state.epoch,
                user.token.clone(),
                user.identity.external_id.clone(),
            )
        };

        let outcome = self
            .inner
            .provider
            .refresh(&token)
            .await
            .and_then(validate_grant)
            .and_then(|(identity, token)| {
                if identity.external_id == subject {
                    Ok((identity, token))
                } else {
                    Err(AuthError::InvalidResponse(
                        "refresh returned a different subject".to_string(),
                    ))
                }
            });

        let session = {
            let mut state = self.inner.state.lock();
            let live = state.epoch == epoch;
            let Some(current) = state.session.user().filter(|_| live).cloned() else {
                let session = state.session.clone();
                drop(state);
                debug!("discarding refresh for {subject}: signed out meanwhile");
                if let Ok((_, token)) = outcome {
                    self.spawn_provider_sign_out(Some(token));
                }
                return Ok(session);
            };
            match outcome {
                Ok((identity, token)) => {
                    let mut user = current;
                    user.profile.merge(ProfileRecord::from_identity(&identity));
                    user.identity = identity;
                    user.token = token;
                    self.inner
                        .publish(&mut state, SessionState::Authenticated(Box::new(user)));
                }
                Err(error) => self.inner.warn(SessionWarning::RefreshFailed {
                    identity: subject,
                    error,
                }),
            }
            state.session.clone()
        };
        self.inner.flush();
        Ok(session)
    }

    /// Register a listener. It is called once with the current session, then with every
    /// published change, in registration order.
    ///
    /// The replay has been delivered when this returns, unless `subscribe` is called from
    /// inside a listener; then it follows the notification being delivered.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let subscription = {
            let state = self.inner.state.lock();
            self.inner
                .dispatcher
                .subscribe_session(Arc::new(listener), state.session.clone())
        };
        self.inner.dispatcher.flush_replay(subscription.id());
        subscription
    }

    /// Remove a listener. Equivalent to dropping the subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Register a listener for [`SessionWarning`]s. There is no replay.
    pub fn subscribe_warnings<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionWarning) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe_warnings(Arc::new(listener))
    }

    /// Channel flavour of [`subscribe`](Self::subscribe), for async consumers.
    pub fn channel(&self) -> SessionReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |session| {
            let _ = tx.send(session.clone());
        });
        SessionReceiver {
            rx,
            _subscription: subscription,
        }
    }

    /// Number of registered listeners, session and warning alike.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dispatcher.listener_count()
    }
}

fn validate_grant(
    (identity, token): (Identity, OAuthToken),
) -> Result<(Identity, OAuthToken), AuthError> {
    if identity.external_id.trim().is_empty() {
        return Err(AuthError::InvalidResponse(
            "provider returned an empty subject".to_string(),
        ));
    }
    if token.access_token.is_empty() {
        return Err(AuthError::InvalidResponse(
            "provider returned an empty access token".to_string(),
        ));
    }
    Ok((identity, token))
}

/// Releases the login slot when a `login` call ends, however it ends.
struct LoginAttempt<'a> {
    inner: &'a Inner,
    epoch: u64,
    resolved: bool,
}

impl Drop for LoginAttempt<'_> {
    fn drop(&mut self) {
        let cancelled = {
            let mut state = self.inner.state.lock();
            state.login_in_flight = false;
            let pending = !self.resolved
                && state.epoch == self.epoch
                && state.session.status() == SessionStatus::Authenticating;
            if pending {
                self.inner
                    .publish(&mut state, SessionState::Failed(AuthError::Cancelled));
                self.inner.publish(&mut state, SessionState::SignedOut);
            }
            pending
        };
        if cancelled {
            self.inner.flush();
            info!("login via {} was abandoned", self.inner.provider.provider_id());
        }
    }
}

/// Session changes delivered over a channel. Dropping it unsubscribes.
pub struct SessionReceiver {
    rx: mpsc::UnboundedReceiver<Session>,
    _subscription: Subscription,
}

impl SessionReceiver {
    /// Wait for the next session. The first one received is the replay of the session
    /// current at subscribe time.
    pub async fn recv(&mut self) -> Option<Session> {
        self.rx.recv().await
    }

    /// Take the next session if one is already queued.
    pub fn try_recv(&mut self) -> Option<Session> {
        self.rx.try_recv().ok()
    }

    /// Wait until a session with the given status arrives.
    pub async fn wait_for(&mut self, status: SessionStatus) -> Option<Session> {
        while let Some(session) = self.rx.recv().await {
            if session.status() == status {
                return Some(session);
            }
        }
        None
    }
}

/// A builder for configuring and creating a [`SessionController`].
pub struct SessionControllerBuilder<P, S> {
    provider: P,
    store: S,
}

impl Default for SessionControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            provider: Missing,
            store: Missing,
        }
    }
}

impl<P, S> SessionControllerBuilder<P, S> {
    /// Set the identity provider.
    pub fn provider<I>(
        self,
        provider: I,
    ) -> SessionControllerBuilder<Configured<Arc<dyn IdentityProvider>>, S>
    where
        I: IdentityProvider + 'static,
    {
        self.shared_provider(Arc::new(provider))
    }

    /// Set an identity provider that is shared with other components.
    pub fn shared_provider(
        self,
        provider: Arc<dyn IdentityProvider>,
    ) -> SessionControllerBuilder<Configured<Arc<dyn IdentityProvider>>, S> {
        SessionControllerBuilder {
            provider: Configured(provider),
            store: self.store,
        }
    }

    /// Set the profile store.
    pub fn profile_store<T>(
        self,
        store: T,
    ) -> SessionControllerBuilder<P, Configured<Arc<dyn ProfileStore>>>
    where
        T: ProfileStore,
    {
        self.shared_profile_store(Arc::new(store))
    }

    /// Set a profile store that is shared with other components.
    pub fn shared_profile_store(
        self,
        store: Arc<dyn ProfileStore>,
    ) -> SessionControllerBuilder<P, Configured<Arc<dyn ProfileStore>>> {
        SessionControllerBuilder {
            provider: self.provider,
            store: Configured(store),
        }
    }
}

impl
    SessionControllerBuilder<Configured<Arc<dyn IdentityProvider>>, Configured<Arc<dyn ProfileStore>>>
{
    /// Build the [`SessionController`].
    pub fn build(self) -> SessionController {
        SessionController::from_parts(self.provider.0, self.store.0)
    }
}
