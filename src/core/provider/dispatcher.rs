//! Listener dispatch
//!
//! One task per subscription decouples the read loop from the subscriber.
//! States and locations reach it through latest-wins mailboxes, so the
//! producer never waits on a slow callback.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{CachedFix, ListenerParams, LocationListener, ProviderState};
use crate::core::location::Location;
use crate::core::mailbox::Mailbox;

/// Handle to a running dispatch task
pub(crate) struct Dispatcher {
    states: Arc<Mailbox<ProviderState>>,
    locations: Arc<Mailbox<Location>>,
    cancel: CancellationToken,
    location_updates: bool,
}

impl Dispatcher {
    /// Start dispatching to `listener` on `runtime`
    pub(crate) fn spawn(
        runtime: &Handle,
        provider: Arc<str>,
        listener: Arc<dyn LocationListener>,
        params: ListenerParams,
        cache: Arc<RwLock<Option<CachedFix>>>,
    ) -> Self {
        let states = Arc::new(Mailbox::new());
        let locations = Arc::new(Mailbox::new());
        let cancel = CancellationToken::new();

        let task = DispatchTask {
            provider,
            listener,
            params,
            cache,
            states: states.clone(),
            locations: locations.clone(),
            cancel: cancel.clone(),
        };
        runtime.spawn(task.run());

        Self {
            states,
            locations,
            cancel,
            location_updates: params.interval.is_some(),
        }
    }

    pub(crate) fn post_state(&self, state: ProviderState) {
        self.states.post(state);
    }

    pub(crate) fn post_location(&self, location: Location) {
        if self.location_updates {
            self.locations.post(location);
        }
    }

    /// Stop at once, dropping anything not yet delivered
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        self.finish();
    }

    /// Stop after delivering the pending state change
    pub(crate) fn finish(&self) {
        self.states.close();
        self.locations.close();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.finish();
    }
}

struct DispatchTask {
    provider: Arc<str>,
    listener: Arc<dyn LocationListener>,
    params: ListenerParams,
    cache: Arc<RwLock<Option<CachedFix>>>,
    states: Arc<Mailbox<ProviderState>>,
    locations: Arc<Mailbox<Location>>,
    cancel: CancellationToken,
}

impl DispatchTask {
    async fn run(self) {
        let mut last_state: Option<ProviderState> = None;
        let mut held: Option<Location> = None;
        let mut delivered_any = false;
        let mut window_start = Instant::now();

        loop {
            // Next point where something is due: the end of the current
            // window when a location is held, else the timeout after it.
            let deadline = self.params.interval.map(|interval| {
                if held.is_some() {
                    window_start + interval
                } else {
                    window_start + interval + self.params.timeout
                }
            });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                state = self.states.recv() => {
                    let Some(state) = state else { break };
                    if last_state != Some(state) {
                        last_state = Some(state);
                        self.deliver_state(state).await;
                    }
                }
                Some(location) = self.locations.recv(), if self.params.interval.is_some() => {
                    let interval = self.params.interval.unwrap_or_default();
                    if !delivered_any || window_start.elapsed() >= interval {
                        self.deliver_location(location).await;
                        delivered_any = true;
                        window_start = Instant::now();
                    } else {
                        trace!(provider = %self.provider, "throttling location update");
                        held = Some(location);
                    }
                }
                () = sleep_until(deadline), if deadline.is_some() => {
                    let location = match held.take() {
                        Some(location) => location,
                        None => self.timed_out_location(),
                    };
                    self.deliver_location(location).await;
                    delivered_any = true;
                    window_start = Instant::now();
                }
            }
        }

        trace!(provider = %self.provider, "listener dispatch stopped");
    }

    /// Cached fix if fresh enough, else an invalid location
    fn timed_out_location(&self) -> Location {
        let cache = self.cache.read();
        match cache.as_ref() {
            Some(fix) if fix.received.elapsed() <= self.params.max_age => fix.location.clone(),
            _ => Location::invalid(),
        }
    }

    async fn deliver_state(&self, state: ProviderState) {
        let listener = self.listener.clone();
        let provider = self.provider.clone();
        let result = tokio::task::spawn_blocking(move || {
            listener.provider_state_changed(&provider, state);
        })
        .await;

        if let Err(e) = result {
            warn!(provider = %self.provider, %state, error = %e, "location listener failed handling state change");
        }
    }

    async fn deliver_location(&self, location: Location) {
        let listener = self.listener.clone();
        let provider = self.provider.clone();
        let result = tokio::task::spawn_blocking(move || {
            listener.location_updated(&provider, &location);
        })
        .await;

        if let Err(e) = result {
            warn!(provider = %self.provider, error = %e, "location listener failed handling update");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(50);

    #[derive(Default)]
    struct Recorder {
        locations: Mutex<Vec<Location>>,
        states: Mutex<Vec<ProviderState>>,
    }

    impl LocationListener for Recorder {
        fn location_updated(&self, _provider: &str, location: &Location) {
            self.locations.lock().push(location.clone());
        }

        fn provider_state_changed(&self, _provider: &str, state: ProviderState) {
            self.states.lock().push(state);
        }
    }

    struct Panicker;

    impl LocationListener for Panicker {
        fn location_updated(&self, _provider: &str, _location: &Location) {
            panic!("listener bug");
        }

        fn provider_state_changed(&self, _provider: &str, _state: ProviderState) {
            panic!("listener bug");
        }
    }

    fn fix(speed: f64) -> Location {
        Location {
            speed,
            valid: true,
            ..Location::invalid()
        }
    }

    fn params(interval_ms: u64, timeout_ms: u64, max_age_ms: u64) -> ListenerParams {
        ListenerParams {
            interval: Some(Duration::from_millis(interval_ms)),
            timeout: Duration::from_millis(timeout_ms),
            max_age: Duration::from_millis(max_age_ms),
        }
    }

    fn spawn(listener: Arc<dyn LocationListener>, params: ListenerParams) -> (Dispatcher, Arc<RwLock<Option<CachedFix>>>) {
        let cache = Arc::new(RwLock::new(None));
        let dispatcher = Dispatcher::spawn(&Handle::current(), Arc::from("test"), listener, params, cache.clone());
        (dispatcher, cache)
    }

    #[tokio::test]
    async fn test_state_changes_are_deduplicated() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _) = spawn(recorder.clone(), params(10_000, 10_000, 0));

        dispatcher.post_state(ProviderState::Available);
        tokio::time::sleep(SETTLE).await;
        dispatcher.post_state(ProviderState::Available);
        tokio::time::sleep(SETTLE).await;
        dispatcher.post_state(ProviderState::TemporarilyUnavailable);
        tokio::time::sleep(SETTLE).await;

        assert_eq!(
            *recorder.states.lock(),
            vec![ProviderState::Available, ProviderState::TemporarilyUnavailable]
        );
    }

    #[tokio::test]
    async fn test_throttle_delivers_latest_per_window() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _) = spawn(recorder.clone(), params(300, 300, 0));

        // First update goes out immediately
        dispatcher.post_location(fix(1.0));
        tokio::time::sleep(SETTLE).await;
        assert_eq!(recorder.locations.lock().len(), 1);

        // A burst inside the window collapses into its newest member
        for speed in 2..=6 {
            dispatcher.post_location(fix(f64::from(speed)));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.locations.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let delivered = recorder.locations.lock().clone();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].speed, 6.0);
    }

    #[tokio::test]
    async fn test_timeout_delivers_invalid_location() {
        let recorder = Arc::new(Recorder::default());
        let (_dispatcher, _) = spawn(recorder.clone(), params(100, 50, 0));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let delivered = recorder.locations.lock().clone();
        assert!(!delivered.is_empty());
        assert!(!delivered[0].is_valid());
    }

    #[tokio::test]
    async fn test_timeout_delivers_fresh_cache() {
        let recorder = Arc::new(Recorder::default());
        let (_dispatcher, cache) = spawn(recorder.clone(), params(100, 50, 5_000));
        *cache.write() = Some(CachedFix::now(fix(3.0)));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let delivered = recorder.locations.lock().clone();
        assert!(!delivered.is_empty());
        assert!(delivered[0].is_valid());
        assert_eq!(delivered[0].speed, 3.0);
    }

    #[tokio::test]
    async fn test_state_only_subscription_ignores_locations() {
        let recorder = Arc::new(Recorder::default());
        let state_only = ListenerParams {
            interval: None,
            timeout: Duration::ZERO,
            max_age: Duration::ZERO,
        };
        let (dispatcher, _) = spawn(recorder.clone(), state_only);

        dispatcher.post_location(fix(1.0));
        dispatcher.post_state(ProviderState::Available);
        tokio::time::sleep(SETTLE).await;

        assert!(recorder.locations.lock().is_empty());
        assert_eq!(*recorder.states.lock(), vec![ProviderState::Available]);
    }

    #[tokio::test]
    async fn test_finish_delivers_final_state() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _) = spawn(recorder.clone(), params(10_000, 10_000, 0));

        dispatcher.post_state(ProviderState::OutOfService);
        dispatcher.finish();
        tokio::time::sleep(SETTLE).await;

        assert_eq!(*recorder.states.lock(), vec![ProviderState::OutOfService]);
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let recorder = Arc::new(Recorder::default());
        let (dispatcher, _) = spawn(recorder.clone(), params(100, 0, 0));

        dispatcher.cancel();
        dispatcher.post_state(ProviderState::Available);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(recorder.states.lock().is_empty());
        assert!(recorder.locations.lock().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_listener_is_contained() {
        let (dispatcher, _) = spawn(Arc::new(Panicker), params(50, 0, 0));

        dispatcher.post_state(ProviderState::Available);
        dispatcher.post_location(fix(1.0));
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Still accepting work
        dispatcher.post_state(ProviderState::TemporarilyUnavailable);
        tokio::time::sleep(SETTLE).await;
        assert!(!dispatcher.states.is_closed());
    }
}
