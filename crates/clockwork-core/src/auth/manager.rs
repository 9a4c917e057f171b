//! Session manager for the signed-in user.
//!
//! The manager restores a cached session on startup and shows it right away,
//! then asks the server who the token belongs to and reconciles in the
//! background. Login, registration and logout update the in-memory state
//! and the persisted copy together.
//!
//! Every state-changing operation takes a ticket from a monotonic sequence
//! when it starts. When it finishes, its result is applied only if no
//! later-started operation has applied one already. A failed sign-in applies
//! nothing, so it never overrides a logout or a startup validation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AuthResponse, IdentityService, LoginRequest, RegisterRequest};
use crate::models::User;
use crate::notify::Notifier;
use crate::store::KeyValueStore;

use super::{SessionData, SessionState, SessionStore};

const LOGIN_SUCCESS: &str = "Login successful!";
const LOGIN_FAILED: &str = "Login failed";
const REGISTER_SUCCESS: &str = "Registration successful!";
const REGISTER_FAILED: &str = "Registration failed";
const LOGOUT_SUCCESS: &str = "Logged out successfully";
const SUPERSEDED: &str = "Superseded by a newer request";

/// Failure of a login or registration, carrying a displayable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthFailure {
    pub message: String,
    superseded: bool,
}

impl AuthFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            superseded: false,
        }
    }

    fn superseded() -> Self {
        Self {
            message: SUPERSEDED.to_string(),
            superseded: true,
        }
    }

    /// True if the request was overtaken by a later one and its outcome dropped
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }
}

pub type AuthResult = Result<User, AuthFailure>;

/// Ticket bookkeeping for overlapping operations
#[derive(Debug, Default)]
struct Sequence {
    /// Ticket handed to the most recently started operation
    started: u64,
    /// Ticket of the operation whose outcome is currently applied
    applied: u64,
}

pub struct SessionManager {
    service: Arc<dyn IdentityService>,
    store: SessionStore,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<SessionState>,
    sequence: Mutex<Sequence>,
}

impl SessionManager {
    /// Create a manager in the `Initializing` state. Call `initialize` to
    /// restore the persisted session.
    pub fn new(
        service: Arc<dyn IdentityService>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Initializing);
        Arc::new(Self {
            service,
            store: SessionStore::new(store),
            notifier,
            state,
            sequence: Mutex::new(Sequence::default()),
        })
    }

    // ===== Read access =====

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn is_initializing(&self) -> bool {
        self.state.borrow().is_initializing()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_confirmed(&self) -> bool {
        self.state.borrow().is_confirmed()
    }

    /// Bearer token of the persisted session, if any
    pub fn token(&self) -> Option<String> {
        match self.store.token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read session token");
                None
            }
        }
    }

    // ===== Sequencing =====

    fn lock_sequence(&self) -> MutexGuard<'_, Sequence> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> u64 {
        let mut sequence = self.lock_sequence();
        sequence.started += 1;
        sequence.started
    }

    /// Lock the sequence and mark `ticket` as applied, unless a later
    /// operation has already applied its outcome. The guard must be held
    /// while the outcome is applied.
    fn claim(&self, ticket: u64) -> Option<MutexGuard<'_, Sequence>> {
        let mut sequence = self.lock_sequence();
        if ticket >= sequence.applied {
            sequence.applied = ticket;
            Some(sequence)
        } else {
            debug!(ticket, applied = sequence.applied, "Discarding superseded session operation");
            None
        }
    }

    /// True if an operation started after `ticket` has applied its outcome
    fn is_overtaken(&self, ticket: u64) -> bool {
        self.lock_sequence().applied > ticket
    }

    // ===== Startup =====

    /// Restore the persisted session.
    ///
    /// A cached user is shown immediately as unconfirmed, and a background
    /// task validates it against the server; its handle is returned. The
    /// `Initializing` state ends here whatever the outcome. Does nothing if
    /// the manager has already left `Initializing`.
    pub fn initialize(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let pending = {
            let mut sequence = self.lock_sequence();
            if !self.state.borrow().is_initializing() {
                debug!("Session already initialized");
                return None;
            }
            sequence.started += 1;
            sequence.applied = sequence.started;
            let ticket = sequence.started;

            let cached = match self.store.load() {
                Ok(cached) => cached,
                Err(e) => {
                    error!(error = %e, "Auth initialization error");
                    None
                }
            };

            match cached {
                Some(session) => {
                    debug!(user_id = session.user.id, "Restored cached session");
                    self.state.send_replace(SessionState::Authenticated {
                        user: session.user.clone(),
                        confirmed: false,
                    });
                    Some((ticket, session))
                }
                None => {
                    debug!("No cached session");
                    self.state.send_replace(SessionState::Unauthenticated);
                    None
                }
            }
        };

        let (ticket, session) = pending?;
        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            manager.validate(ticket, session).await;
        }))
    }

    async fn validate(&self, ticket: u64, cached: SessionData) {
        let result = self.service.current_user(&cached.token).await;
        self.apply_validation(ticket, cached, result);
    }

    fn apply_validation(&self, ticket: u64, cached: SessionData, result: Result<User, ApiError>) {
        let Some(_guard) = self.claim(ticket) else {
            return;
        };

        match result {
            Ok(fresh) if fresh.id != cached.user.id => {
                info!(cached_id = cached.user.id, fresh_id = fresh.id, "Server reports a different user, refreshing cache");
                let data = SessionData {
                    token: cached.token,
                    user: fresh.clone(),
                };
                if let Err(e) = self.store.save(&data) {
                    warn!(error = %e, "Failed to save refreshed user");
                }
                self.state.send_replace(SessionState::Authenticated {
                    user: fresh,
                    confirmed: true,
                });
            }
            Ok(_) => {
                debug!(user_id = cached.user.id, "Cached session confirmed");
                self.state.send_replace(SessionState::Authenticated {
                    user: cached.user,
                    confirmed: true,
                });
            }
            Err(e) => {
                warn!(error = %e, "Cached session rejected, signing out");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "Failed to clear rejected session");
                }
                self.state.send_replace(SessionState::Unauthenticated);
            }
        }
    }

    // ===== Operations =====

    /// Sign in with email and password. Never fails with anything but an
    /// `AuthFailure`; both outcomes are also announced via the notifier.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult {
        let ticket = self.begin();
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let outcome = self.service.login(&request).await;
        self.complete_sign_in(ticket, outcome, LOGIN_SUCCESS, LOGIN_FAILED)
    }

    /// Create an account and sign in to it. Same contract as `login`.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        password_confirmation: &str,
    ) -> AuthResult {
        let ticket = self.begin();
        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            password_confirmation: password_confirmation.to_string(),
        };
        let outcome = self.service.register(&request).await;
        self.complete_sign_in(ticket, outcome, REGISTER_SUCCESS, REGISTER_FAILED)
    }

    fn complete_sign_in(
        &self,
        ticket: u64,
        outcome: Result<AuthResponse, ApiError>,
        success_message: &str,
        fallback_message: &str,
    ) -> AuthResult {
        match outcome {
            Ok(AuthResponse { user, token }) => {
                let Some(guard) = self.claim(ticket) else {
                    return Err(AuthFailure::superseded());
                };

                let data = SessionData {
                    token,
                    user: user.clone(),
                };
                if let Err(e) = self.store.save(&data) {
                    warn!(error = %e, "Failed to save session");
                }
                self.state.send_replace(SessionState::Authenticated {
                    user: user.clone(),
                    confirmed: true,
                });
                drop(guard);

                info!(user_id = user.id, "Signed in");
                self.notifier.success(success_message);
                Ok(user)
            }
            Err(e) => {
                // A failure applies nothing, so it never supersedes another operation
                if self.is_overtaken(ticket) {
                    debug!(ticket, "Discarding superseded sign-in failure");
                    return Err(AuthFailure::superseded());
                }

                let message = e
                    .server_message()
                    .unwrap_or_else(|| fallback_message.to_string());
                warn!(error = %e, "{}", fallback_message);
                self.notifier.error(&message);
                Err(AuthFailure::new(message))
            }
        }
    }

    /// Sign out. The server is told on a best-effort basis; the local
    /// session is cleared regardless.
    pub async fn logout(&self) {
        let ticket = self.begin();

        match self.store.token() {
            Ok(Some(token)) => {
                if let Err(e) = self.service.logout(&token).await {
                    error!(error = %e, "Logout error");
                }
            }
            Ok(None) => debug!("No session token, skipping server logout"),
            Err(e) => warn!(error = %e, "Failed to read session token for logout"),
        }

        let Some(guard) = self.claim(ticket) else {
            return;
        };
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear session");
        }
        self.state.send_replace(SessionState::Unauthenticated);
        drop(guard);

        info!("Signed out");
        self.notifier.success(LOGOUT_SUCCESS);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::auth::session::{TOKEN_KEY, USER_KEY};
    use crate::store::{MemoryStore, StoreError};

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    type Scripted<T> = (Option<oneshot::Receiver<()>>, Result<T, ApiError>);

    /// Identity service that replays scripted responses, optionally waiting
    /// on a gate before answering.
    #[derive(Default)]
    struct FakeService {
        sign_ins: Mutex<VecDeque<Scripted<AuthResponse>>>,
        current_user: Mutex<Option<Scripted<User>>>,
        logout_fails: bool,
        logout_gate: Mutex<Option<oneshot::Receiver<()>>>,
        sign_in_requests: Mutex<Vec<String>>,
        current_user_calls: AtomicUsize,
        logout_calls: AtomicUsize,
    }

    impl FakeService {
        fn push_sign_in(&self, result: Result<AuthResponse, ApiError>) {
            self.sign_ins.lock().unwrap().push_back((None, result));
        }

        fn push_gated_sign_in(&self, result: Result<AuthResponse, ApiError>) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.sign_ins.lock().unwrap().push_back((Some(rx), result));
            tx
        }

        fn set_current_user(&self, result: Result<User, ApiError>) {
            *self.current_user.lock().unwrap() = Some((None, result));
        }

        fn set_gated_current_user(&self, result: Result<User, ApiError>) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.current_user.lock().unwrap() = Some((Some(rx), result));
            tx
        }

        fn gate_logout(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.logout_gate.lock().unwrap() = Some(rx);
            tx
        }

        async fn replay<T>(scripted: Option<Scripted<T>>) -> Result<T, ApiError> {
            let (gate, result) = scripted.expect("unexpected call to fake identity service");
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
    }

    #[async_trait]
    impl IdentityService for FakeService {
        async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
            self.sign_in_requests.lock().unwrap().push(request.email.clone());
            let scripted = self.sign_ins.lock().unwrap().pop_front();
            Self::replay(scripted).await
        }

        async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
            self.sign_in_requests.lock().unwrap().push(request.email.clone());
            let scripted = self.sign_ins.lock().unwrap().pop_front();
            Self::replay(scripted).await
        }

        async fn logout(&self, _token: &str) -> Result<(), ApiError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.logout_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.logout_fails {
                Err(ApiError::ServerError("boom".to_string()))
            } else {
                Ok(())
            }
        }

        async fn current_user(&self, _token: &str) -> Result<User, ApiError> {
            self.current_user_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.current_user.lock().unwrap().take();
            Self::replay(scripted).await
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Note {
        Success(String),
        Error(String),
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notes: Mutex<Vec<Note>>,
    }

    impl RecordingNotifier {
        fn notes(&self) -> Vec<Note> {
            self.notes.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn success(&self, message: &str) {
            self.notes.lock().unwrap().push(Note::Success(message.to_string()));
        }

        fn error(&self, message: &str) {
            self.notes.lock().unwrap().push(Note::Error(message.to_string()));
        }
    }

    struct Harness {
        manager: Arc<SessionManager>,
        service: Arc<FakeService>,
        kv: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness_with(service: FakeService, kv: MemoryStore) -> Harness {
        let service = Arc::new(service);
        let kv = Arc::new(kv);
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = SessionManager::new(service.clone(), kv.clone(), notifier.clone());
        Harness {
            manager,
            service,
            kv,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeService::default(), MemoryStore::new())
    }

    fn user_a() -> User {
        User::new(1).with_name("A")
    }

    fn user_b() -> User {
        User::new(2).with_name("B")
    }

    fn cached_store(token: &str, user: &User) -> MemoryStore {
        let kv = MemoryStore::new();
        kv.set(TOKEN_KEY, token).unwrap();
        kv.set(USER_KEY, &serde_json::to_string(user).unwrap()).unwrap();
        kv
    }

    fn stored_user(kv: &MemoryStore) -> Option<User> {
        kv.get(USER_KEY)
            .unwrap()
            .map(|u| serde_json::from_str(&u).unwrap())
    }

    fn auth_response(user: User, token: &str) -> AuthResponse {
        AuthResponse {
            user,
            token: token.to_string(),
        }
    }

    fn rejected(message: &str) -> ApiError {
        ApiError::Unauthorized {
            message: Some(message.to_string()),
        }
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_startup_server_agrees() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        // Server returns a different name but the same id; the cache is kept
        h.service.set_current_user(Ok(User::new(1).with_name("A (renamed)")));

        assert!(h.manager.is_initializing());
        let validation = h.manager.initialize().expect("validation task");

        assert!(!h.manager.is_initializing());
        assert_eq!(h.manager.current_user(), Some(user_a()));
        assert!(!h.manager.is_confirmed());

        validation.await.unwrap();
        assert_eq!(h.manager.current_user(), Some(user_a()));
        assert!(h.manager.is_confirmed());
        assert_eq!(stored_user(&h.kv), Some(user_a()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t1"));
        assert!(h.notifier.notes().is_empty());
    }

    #[tokio::test]
    async fn test_startup_server_disagrees() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        h.service.set_current_user(Ok(user_b()));

        h.manager.initialize().expect("validation task").await.unwrap();

        assert_eq!(h.manager.current_user(), Some(user_b()));
        assert_eq!(stored_user(&h.kv), Some(user_b()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_startup_invalid_token() {
        let h = harness_with(FakeService::default(), cached_store("expired", &user_a()));
        h.service.set_current_user(Err(ApiError::Unauthorized { message: None }));

        h.manager.initialize().expect("validation task").await.unwrap();

        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.manager.state(), SessionState::Unauthenticated);
        assert!(h.kv.is_empty());
    }

    #[tokio::test]
    async fn test_startup_without_cache_makes_no_request() {
        let h = harness();

        assert!(h.manager.initialize().is_none());

        assert!(!h.manager.is_initializing());
        assert_eq!(h.manager.current_user(), None);
        assert_eq!(h.service.current_user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_startup_with_corrupt_user_degrades() {
        let kv = MemoryStore::new();
        kv.set(TOKEN_KEY, "t1").unwrap();
        kv.set(USER_KEY, "{\"name\":").unwrap();
        let h = harness_with(FakeService::default(), kv);

        assert!(h.manager.initialize().is_none());

        assert!(!h.manager.is_initializing());
        assert_eq!(h.manager.state(), SessionState::Unauthenticated);
        assert_eq!(h.service.current_user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_startup_with_unreadable_store_still_finishes() {
        struct BrokenStore;

        impl KeyValueStore for BrokenStore {
            fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk gone")))
            }
            fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk gone")))
            }
            fn remove(&self, _key: &str) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::other("disk gone")))
            }
        }

        let manager = SessionManager::new(
            Arc::new(FakeService::default()),
            Arc::new(BrokenStore),
            Arc::new(RecordingNotifier::default()),
        );
        assert!(manager.initialize().is_none());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        h.service.set_current_user(Ok(user_a()));

        h.manager.initialize().expect("validation task").await.unwrap();
        assert!(h.manager.initialize().is_none());
        assert_eq!(h.service.current_user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        h.service.set_current_user(Err(ApiError::Unauthorized { message: None }));
        let mut rx = h.manager.subscribe();
        assert!(rx.borrow_and_update().is_initializing());

        let validation = h.manager.initialize().expect("validation task");
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_authenticated());

        validation.await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Unauthenticated);
    }

    // -------------------------------------------------------------------------
    // Login / register
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_success() {
        let h = harness();
        h.manager.initialize();
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));

        let result = h.manager.login("a@example.com", "secret").await;

        assert_eq!(result, Ok(user_a()));
        assert_eq!(h.manager.current_user(), Some(user_a()));
        assert!(h.manager.is_confirmed());
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t1"));
        assert_eq!(stored_user(&h.kv), Some(user_a()));
        assert_eq!(h.manager.token().as_deref(), Some("t1"));
        assert_eq!(
            h.notifier.notes(),
            vec![Note::Success("Login successful!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_login_failure_with_server_message() {
        let h = harness();
        h.manager.initialize();
        h.service.push_sign_in(Err(rejected("Invalid credentials")));

        let result = h.manager.login("a@example.com", "wrong").await;

        let failure = result.expect_err("login should fail");
        assert_eq!(failure.message, "Invalid credentials");
        assert!(!failure.is_superseded());
        assert_eq!(h.manager.current_user(), None);
        assert!(h.kv.is_empty());
        assert_eq!(
            h.notifier.notes(),
            vec![Note::Error("Invalid credentials".to_string())]
        );
    }

    #[tokio::test]
    async fn test_login_failure_falls_back_to_generic_message() {
        let h = harness();
        h.service
            .push_sign_in(Err(ApiError::InvalidResponse("garbage".to_string())));

        let failure = h.manager.login("a@example.com", "pw").await.unwrap_err();
        assert_eq!(failure.message, "Login failed");
    }

    #[tokio::test]
    async fn test_login_failure_keeps_existing_session() {
        let h = harness();
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));
        h.service.push_sign_in(Err(rejected("Invalid credentials")));

        h.manager.login("a@example.com", "secret").await.unwrap();
        h.manager.login("b@example.com", "wrong").await.unwrap_err();

        assert_eq!(h.manager.current_user(), Some(user_a()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_register_success_and_failure() {
        let h = harness();
        h.service.push_sign_in(Err(ApiError::Rejected {
            status: 422,
            message: None,
        }));
        h.service.push_sign_in(Ok(auth_response(user_b(), "t2")));

        let failure = h
            .manager
            .register("B", "b@example.com", "pw", "different")
            .await
            .unwrap_err();
        assert_eq!(failure.message, "Registration failed");
        assert_eq!(h.manager.current_user(), None);

        let user = h
            .manager
            .register("B", "b@example.com", "pw", "pw")
            .await
            .unwrap();
        assert_eq!(user, user_b());
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t2"));
        assert_eq!(
            h.notifier.notes(),
            vec![
                Note::Error("Registration failed".to_string()),
                Note::Success("Registration successful!".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_overtaken_login_is_discarded() {
        let h = harness();
        let release_first = h
            .service
            .push_gated_sign_in(Ok(auth_response(user_a(), "t1")));
        h.service.push_sign_in(Ok(auth_response(user_b(), "t2")));

        let (first, second) = tokio::join!(h.manager.login("a@example.com", "pw"), async {
            let second = h.manager.login("b@example.com", "pw").await;
            release_first.send(()).unwrap();
            second
        });

        assert!(first.unwrap_err().is_superseded());
        assert_eq!(second, Ok(user_b()));
        assert_eq!(h.manager.current_user(), Some(user_b()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t2"));
        assert_eq!(
            h.notifier.notes(),
            vec![Note::Success("Login successful!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_login_during_validation_wins() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        let release_validation = h
            .service
            .set_gated_current_user(Err(ApiError::Unauthorized { message: None }));
        h.service.push_sign_in(Ok(auth_response(user_b(), "t2")));

        let validation = h.manager.initialize().expect("validation task");
        h.manager.login("b@example.com", "pw").await.unwrap();
        release_validation.send(()).unwrap();
        validation.await.unwrap();

        // The stale validation failure must not sign the new user out
        assert_eq!(h.manager.current_user(), Some(user_b()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_failed_login_during_validation_does_not_block_it() {
        let h = harness_with(FakeService::default(), cached_store("expired", &user_a()));
        let release_validation = h
            .service
            .set_gated_current_user(Err(ApiError::Unauthorized { message: None }));
        h.service.push_sign_in(Err(rejected("Invalid credentials")));

        let validation = h.manager.initialize().expect("validation task");
        let failure = h.manager.login("b@example.com", "wrong").await.unwrap_err();
        assert!(!failure.is_superseded());
        assert_eq!(failure.message, "Invalid credentials");
        assert!(!h.manager.is_confirmed());

        release_validation.send(()).unwrap();
        validation.await.unwrap();

        assert_eq!(h.manager.state(), SessionState::Unauthenticated);
        assert!(h.kv.is_empty());
    }

    #[tokio::test]
    async fn test_overtaken_login_failure_is_silent() {
        let h = harness();
        let release_first = h
            .service
            .push_gated_sign_in(Err(rejected("Invalid credentials")));
        h.service.push_sign_in(Ok(auth_response(user_b(), "t2")));

        let (first, second) = tokio::join!(h.manager.login("a@example.com", "wrong"), async {
            let second = h.manager.login("b@example.com", "pw").await;
            release_first.send(()).unwrap();
            second
        });

        assert!(first.unwrap_err().is_superseded());
        assert_eq!(second, Ok(user_b()));
        assert_eq!(h.manager.current_user(), Some(user_b()));
        assert_eq!(
            h.notifier.notes(),
            vec![Note::Success("Login successful!".to_string())]
        );
    }

    #[tokio::test]
    async fn test_concurrent_logins_settle_on_one_user() {
        let h = harness();
        for id in 1..=4 {
            h.service
                .push_sign_in(Ok(auth_response(User::new(id), &format!("t{id}"))));
        }

        let results = futures::future::join_all(
            (1..=4).map(|i| h.manager.login_owned(format!("u{i}@example.com"))),
        )
        .await;

        let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
        assert!(!winners.is_empty());
        let user = h.manager.current_user().expect("someone signed in");
        assert_eq!(stored_user(&h.kv), Some(user.clone()));
        assert_eq!(
            h.kv.get(TOKEN_KEY).unwrap(),
            Some(format!("t{}", user.id))
        );
        assert_eq!(h.service.sign_in_requests.lock().unwrap().len(), 4);
    }

    impl SessionManager {
        async fn login_owned(&self, email: String) -> AuthResult {
            self.login(&email, "pw").await
        }
    }

    // -------------------------------------------------------------------------
    // Logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_logout_clears_session() {
        let h = harness();
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));
        h.manager.login("a@example.com", "pw").await.unwrap();

        h.manager.logout().await;

        assert_eq!(h.manager.current_user(), None);
        assert!(h.kv.is_empty());
        assert_eq!(h.service.logout_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.notifier.notes().last(),
            Some(&Note::Success("Logged out successfully".to_string()))
        );
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let h = harness_with(
            FakeService {
                logout_fails: true,
                ..FakeService::default()
            },
            MemoryStore::new(),
        );
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));
        h.manager.login("a@example.com", "pw").await.unwrap();

        h.manager.logout().await;

        assert_eq!(h.manager.current_user(), None);
        assert!(h.kv.is_empty());
        assert!(!h
            .notifier
            .notes()
            .iter()
            .any(|n| matches!(n, Note::Error(_))));
    }

    #[tokio::test]
    async fn test_logout_when_signed_out_is_harmless() {
        let h = harness();
        h.manager.initialize();

        h.manager.logout().await;
        h.manager.logout().await;

        assert_eq!(h.manager.state(), SessionState::Unauthenticated);
        assert!(h.kv.is_empty());
        assert_eq!(h.service.logout_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_login_during_logout_still_signs_out() {
        let h = harness();
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));
        h.manager.login("a@example.com", "pw").await.unwrap();
        let release_logout = h.service.gate_logout();
        h.service.push_sign_in(Err(rejected("Invalid credentials")));

        let ((), login) = tokio::join!(h.manager.logout(), async {
            let login = h.manager.login("b@example.com", "wrong").await;
            release_logout.send(()).unwrap();
            login
        });

        assert_eq!(login.unwrap_err().message, "Invalid credentials");
        assert_eq!(h.manager.current_user(), None);
        assert!(h.kv.is_empty());
        assert_eq!(
            h.notifier.notes().last(),
            Some(&Note::Success("Logged out successfully".to_string()))
        );
    }

    #[tokio::test]
    async fn test_login_during_logout_wins() {
        let h = harness();
        h.service.push_sign_in(Ok(auth_response(user_a(), "t1")));
        h.manager.login("a@example.com", "pw").await.unwrap();
        let release_logout = h.service.gate_logout();
        h.service.push_sign_in(Ok(auth_response(user_b(), "t2")));

        let ((), login) = tokio::join!(h.manager.logout(), async {
            let login = h.manager.login("b@example.com", "pw").await;
            release_logout.send(()).unwrap();
            login
        });

        assert_eq!(login, Ok(user_b()));
        assert_eq!(h.manager.current_user(), Some(user_b()));
        assert_eq!(h.kv.get(TOKEN_KEY).unwrap().as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_logout_during_validation_wins() {
        let h = harness_with(FakeService::default(), cached_store("t1", &user_a()));
        let release_validation = h.service.set_gated_current_user(Ok(user_b()));

        let validation = h.manager.initialize().expect("validation task");
        h.manager.logout().await;
        release_validation.send(()).unwrap();
        validation.await.unwrap();

        assert_eq!(h.manager.current_user(), None);
        assert!(h.kv.is_empty());
    }
}
