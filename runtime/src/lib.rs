//! # Nursery Runtime
//!
//! Store runtime for the nursery booking workspace.
//!
//! The [`Store`] owns a state value, runs every action through the reducer while
//! holding the state write lock, and executes the returned effects. Actions
//! produced by effects are broadcast to observers and fed back into the reducer,
//! which is what lets a caller send a command and await its reply with
//! [`Store::send_and_wait_for`].
//!
//! ## Example
//!
//! ```ignore
//! use nursery_runtime::Store;
//!
//! let store = Store::new(BookingState::default(), BookingReducer::new(), env);
//!
//! let reply = store
//!     .send_and_wait_for(action, |a| a.is_reply_to(request_id), timeout)
//!     .await?;
//! ```

use nursery_core::{effect::Effect, reducer::Reducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Prometheus metrics helpers
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for a matching action
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn track(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - The runtime for reducers
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Ordering, PendingGuard, Reducer, RwLock,
        StoreError,
    };
    use tokio::sync::broadcast;

    /// Default capacity of the action broadcast channel
    const DEFAULT_BROADCAST_CAPACITY: usize = 256;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; every reduction holds the write lock, so
    ///    actions against one store are linearizable)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Every action produced by an effect is sent here before being fed back.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(
                initial_state,
                reducer,
                environment,
                DEFAULT_BROADCAST_CAPACITY,
            )
        }

        /// Create a new store with a custom action broadcast capacity
        ///
        /// Observers that fall further behind than `capacity` actions lag and
        /// skip the oldest ones.
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Send an action to the store
        ///
        /// The reducer runs under the state write lock; the returned effects are
        /// spawned and this call returns without waiting for them.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] once [`Store::shutdown`] has begun.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.commands.total").increment(1);
            self.reduce_and_execute(action).await;
            Ok(())
        }

        /// Run one action through the reducer and start its effects
        ///
        /// No shutdown check: actions produced by effects that were already
        /// running must still reach the reducer while the store drains.
        async fn reduce_and_execute(&self, action: A) {
            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!(effects = effects.len(), "Reducer completed");
                effects
            };

            for effect in effects {
                self.execute_effect(effect);
            }
        }

        /// Send an action and wait for a matching action produced by its effects
        ///
        /// Subscribes to the action broadcast BEFORE sending, so a reply emitted
        /// immediately by the reducer cannot be missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action within `timeout`
        /// - [`StoreError::ChannelClosed`]: the broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let count = store.state(|s| s.bookings.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Number of future and sequential effects still running
        ///
        /// Delayed actions are not counted: a pending timer does not block shutdown.
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::SeqCst)
        }

        /// Stop accepting actions and wait for running effects to finish
        ///
        /// Actions produced by effects that are already running are still
        /// reduced, so their state transitions complete before this returns.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
        /// when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating store shutdown");
            self.shutdown.store(true, Ordering::Release);

            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let pending = self.pending_effects();
                if pending == 0 {
                    tracing::info!("Store shutdown complete");
                    return Ok(());
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(pending, "Store shutdown timed out");
                    return Err(StoreError::ShutdownTimeout(pending));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        /// Broadcast an effect-produced action and feed it back into the reducer
        ///
        /// Feedback bypasses the shutdown gate so an in-flight effect always
        /// completes its state transition.
        async fn feed_back(&self, action: A) {
            let _ = self.action_broadcast.send(action.clone());
            self.reduce_and_execute(action).await;
        }

        /// Execute an effect
        ///
        /// - `None`: No-op
        /// - `Future`: Spawned; the resulting action (if any) is fed back
        /// - `Delay`: Spawned timer; the action is fed back when it fires
        /// - `Parallel`: Each child executed independently
        /// - `Sequential`: Children run in order, each awaited before the next
        fn execute_effect(&self, effect: Effect<A>) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    let guard = PendingGuard::track(&self.pending_effects);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Some(action) = fut.await {
                            store.feed_back(action).await;
                        }
                    });
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    tracing::trace!(?duration, "Scheduling delayed action");
                    let store = self.clone();

                    tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        store.feed_back(*action).await;
                    });
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect);
                    }
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    let guard = PendingGuard::track(&self.pending_effects);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guard = guard;
                        for effect in effects {
                            store.run_inline(effect).await;
                        }
                    });
                },
            }
        }

        /// Run one effect to completion on the current task (used by `Sequential`)
        fn run_inline(
            &self,
            effect: Effect<A>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        if let Some(action) = fut.await {
                            self.feed_back(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        tokio::time::sleep(duration).await;
                        self.feed_back(*action).await;
                    },
                    Effect::Parallel(effects) => {
                        futures::future::join_all(
                            effects.into_iter().map(|effect| self.run_inline(effect)),
                        )
                        .await;
                    },
                    Effect::Sequential(effects) => {
                        for effect in effects {
                            self.run_inline(effect).await;
                        }
                    },
                }
            })
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nursery_core::{async_effect, delay, emit, smallvec, SmallVec};

    #[derive(Clone, Debug, Default)]
    struct TallyState {
        value: i64,
        log: Vec<&'static str>,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum TallyAction {
        Add(i64),
        AddLater(i64),
        AddTwice(i64),
        Added { value: i64 },
        Step(&'static str),
        RunSteps,
        AddSlowly(i64),
    }

    #[derive(Clone)]
    struct TallyReducer;

    impl Reducer for TallyReducer {
        type State = TallyState;
        type Action = TallyAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut TallyState,
            action: TallyAction,
            _env: &(),
        ) -> SmallVec<[Effect<TallyAction>; 4]> {
            match action {
                TallyAction::Add(n) => {
                    state.value += n;
                    let value = state.value;
                    smallvec![emit!(TallyAction::Added { value })]
                },
                TallyAction::AddLater(n) => smallvec![delay! {
                    duration: Duration::from_millis(20),
                    action: TallyAction::Add(n)
                }],
                TallyAction::AddTwice(n) => smallvec![Effect::merge(vec![
                    async_effect! { Some(TallyAction::Add(n)) },
                    async_effect! { Some(TallyAction::Add(n)) },
                ])],
                TallyAction::Step(name) => {
                    state.log.push(name);
                    SmallVec::new()
                },
                TallyAction::RunSteps => smallvec![Effect::chain(vec![
                    emit!(TallyAction::Step("first")),
                    emit!(TallyAction::Step("second")),
                    emit!(TallyAction::Step("third")),
                ])],
                TallyAction::AddSlowly(n) => smallvec![async_effect! {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Some(TallyAction::Add(n))
                }],
                TallyAction::Added { .. } => SmallVec::new(),
            }
        }
    }

    fn tally_store() -> Store<TallyState, TallyAction, (), TallyReducer> {
        Store::new(TallyState::default(), TallyReducer, ())
    }

    #[tokio::test]
    async fn send_applies_action() {
        let store = tally_store();
        store.send(TallyAction::Add(3)).await.unwrap();
        assert_eq!(store.state(|s| s.value).await, 3);
    }

    #[tokio::test]
    async fn send_and_wait_for_returns_effect_action() {
        let store = tally_store();
        let reply = store
            .send_and_wait_for(
                TallyAction::Add(5),
                |a| matches!(a, TallyAction::Added { .. }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply, TallyAction::Added { value: 5 });
    }

    #[tokio::test]
    async fn delayed_action_is_fed_back() {
        let store = tally_store();
        let reply = store
            .send_and_wait_for(
                TallyAction::AddLater(4),
                |a| matches!(a, TallyAction::Added { .. }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply, TallyAction::Added { value: 4 });
    }

    #[tokio::test]
    async fn parallel_effects_all_feed_back() {
        let store = tally_store();
        let mut rx = store.subscribe_actions();
        store.send(TallyAction::AddTwice(2)).await.unwrap();

        let mut added = 0;
        while added < 2 {
            if let TallyAction::Added { .. } = rx.recv().await.unwrap() {
                added += 1;
            }
        }
        assert_eq!(store.state(|s| s.value).await, 4);
    }

    #[tokio::test]
    async fn sequential_effects_run_in_order() {
        let store = tally_store();
        let mut rx = store.subscribe_actions();
        store.send(TallyAction::RunSteps).await.unwrap();

        let mut seen = 0;
        while seen < 3 {
            if let TallyAction::Step(_) = rx.recv().await.unwrap() {
                seen += 1;
            }
        }
        while store.pending_effects() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            store.state(|s| s.log.clone()).await,
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn wait_times_out_without_matching_action() {
        let store = tally_store();
        let result = store
            .send_and_wait_for(
                TallyAction::Step("quiet"),
                |a| matches!(a, TallyAction::Added { .. }),
                Duration::from_millis(30),
            )
            .await;
        assert_eq!(result, Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_actions() {
        let store = tally_store();
        store.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            store.send(TallyAction::Add(1)).await,
            Err(StoreError::ShutdownInProgress)
        );
    }

    #[tokio::test]
    async fn shutdown_still_reduces_running_effect_results() {
        let store = tally_store();
        let reply = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .send_and_wait_for(
                        TallyAction::AddSlowly(7),
                        |a| matches!(a, TallyAction::Added { .. }),
                        Duration::from_secs(1),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.value).await, 7);
        assert_eq!(reply.await.unwrap(), Ok(TallyAction::Added { value: 7 }));
        assert_eq!(
            store.send(TallyAction::Add(1)).await,
            Err(StoreError::ShutdownInProgress)
        );
    }
}
