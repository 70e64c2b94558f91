//! Caching resolver with background refresh.

use super::{HostLookup, SystemLookup};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, fmt, net::IpAddr, sync::Arc, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle};

/// Shortest refresh interval a [`Resolver`] accepts.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Refresh interval used in place of intervals below [`MIN_REFRESH_INTERVAL`].
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Pause between consecutive lookups of a refresh pass.
pub const LOOKUP_PACING: Duration = Duration::from_secs(1);

/// Resolver that memoizes the addresses of every host it has been asked
/// about and periodically re-resolves them in the background.
///
/// A cache entry is only ever written by a successful lookup that returned at
/// least one address, so a host that stops resolving (or resolves to nothing)
/// keeps serving its last known addresses.
///
/// ```no_run
/// # use h2lb::resolver::{Resolver, SystemLookup};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> std::io::Result<()> {
/// let resolver = Resolver::<SystemLookup>::new(Duration::from_secs(30));
/// let ips = resolver.get("example.com").await?;
/// println!("example.com resolves to {:?}", ips);
/// resolver.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Resolver<L = SystemLookup> {
    shared: Arc<Shared<L>>,
    refresh_interval: Duration,
    task: Mutex<Option<RefreshTask>>,
}

struct Shared<L> {
    lookup: L,
    cache: RwLock<HashMap<String, Arc<[IpAddr]>>>,
}

struct RefreshTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl<L: HostLookup + Default + 'static> Resolver<L> {
    /// Creates a resolver using the default `L` backend.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new(refresh_interval: Duration) -> Self {
        Self::with_lookup(L::default(), refresh_interval)
    }
}

impl<L: HostLookup + 'static> Resolver<L> {
    /// Creates a resolver around `lookup` and starts refreshing its cache every
    /// `refresh_interval`. Intervals shorter than [`MIN_REFRESH_INTERVAL`] are
    /// replaced with [`DEFAULT_REFRESH_INTERVAL`].
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn with_lookup(lookup: L, refresh_interval: Duration) -> Self {
        let refresh_interval = if refresh_interval < MIN_REFRESH_INTERVAL {
            DEFAULT_REFRESH_INTERVAL
        } else {
            refresh_interval
        };
        let shared = Arc::new(Shared {
            lookup,
            cache: RwLock::new(HashMap::new()),
        });
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(Shared::refresh_forever(
            shared.clone(),
            refresh_interval,
            stopped,
        ));
        Self {
            shared,
            refresh_interval,
            task: Mutex::new(Some(RefreshTask { stop, handle })),
        }
    }
}

impl<L: HostLookup> Resolver<L> {
    /// Gets the addresses of `host`, resolving it only if it is not cached.
    pub async fn get(&self, host: &str) -> Result<Arc<[IpAddr]>, L::Error> {
        let cached = self.shared.cache.read().get(host).cloned();
        match cached {
            Some(ips) => Ok(ips),
            None => self.lookup(host).await,
        }
    }

    /// Resolves `host` regardless of the cache, storing the answer if it holds
    /// at least one address.
    pub async fn lookup(&self, host: &str) -> Result<Arc<[IpAddr]>, L::Error> {
        self.shared.lookup(host).await
    }

    /// Re-resolves every cached host, one at a time, pausing
    /// [`LOOKUP_PACING`] between hosts. Failed lookups leave their entry as is.
    pub async fn refresh(&self) {
        self.shared.refresh().await
    }

    /// Gets the cached addresses of `host` without resolving it.
    pub fn cached(&self, host: &str) -> Option<Arc<[IpAddr]>> {
        self.shared.cache.read().get(host).cloned()
    }

    /// Interval between background refreshes.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Gets the backend used for lookups.
    pub fn backend(&self) -> &L {
        &self.shared.lookup
    }

    /// Stops the background refresh task and waits for it to exit.
    ///
    /// Cached entries remain readable; they are simply no longer refreshed.
    pub async fn shutdown(&self) {
        let task = self.task.lock().take();
        if let Some(RefreshTask { stop, handle }) = task {
            let _ = stop.send(());
            let _ = handle.await;
        }
    }
}

impl<L: HostLookup> Shared<L> {
    async fn lookup(&self, host: &str) -> Result<Arc<[IpAddr]>, L::Error> {
        let ips = self.lookup.lookup_host(host).await?;
        if ips.is_empty() {
            #[cfg(feature = "log")]
            tracing::debug!(host, "lookup returned no addresses, keeping cache entry");
            return Ok(Arc::new([]));
        }
        let ips: Arc<[IpAddr]> = ips.into();
        self.cache.write().insert(host.to_owned(), ips.clone());
        Ok(ips)
    }

    #[cfg_attr(not(feature = "log"), allow(unused_variables))]
    async fn refresh(&self) {
        let hosts = self.cache.read().keys().cloned().collect::<Vec<_>>();
        for (i, host) in hosts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(LOOKUP_PACING).await;
            }
            if let Err(err) = self.lookup(host).await {
                #[cfg(feature = "log")]
                tracing::info!(host = %host, error = %err, "refresh failed, keeping stale addresses");
            }
        }
    }

    async fn refresh_forever(
        shared: Arc<Self>,
        interval: Duration,
        mut stop: oneshot::Receiver<()>,
    ) {
        loop {
            // The receiver also completes when the `Resolver` drops the sender.
            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(interval) => {}
            }
            tokio::select! {
                _ = &mut stop => break,
                _ = shared.refresh() => {}
            }
        }
        #[cfg(feature = "log")]
        tracing::debug!("resolver refresh task stopped");
    }
}

impl<L> Drop for Resolver<L> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.stop.send(());
        }
    }
}

impl<L: fmt::Debug> fmt::Debug for Resolver<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("lookup", &self.shared.lookup)
            .field("hosts", &self.shared.cache.read().len())
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::stub::StubLookup;

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|ip| ip.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn get_serves_repeat_calls_from_cache() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.2", "10.0.0.1"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(60));

        let first = resolver.get("svc.local").await.unwrap();
        let second = resolver.get("svc.local").await.unwrap();
        assert_eq!(&first[..], &ips(&["10.0.0.2", "10.0.0.1"])[..]);
        assert_eq!(first, second);
        assert_eq!(resolver.backend().calls("svc.local").len(), 1);
        assert_eq!(resolver.cached("svc.local"), Some(first));
    }

    #[tokio::test]
    async fn empty_answer_is_not_cached() {
        let stub = StubLookup::default();
        stub.answer("empty.local", &[]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(60));

        let result = resolver.get("empty.local").await.unwrap();
        assert!(result.is_empty());
        assert!(resolver.cached("empty.local").is_none());

        // Not cached, so the next `get` resolves again
        resolver.get("empty.local").await.unwrap();
        assert_eq!(stub.calls("empty.local").len(), 2);
    }

    #[tokio::test]
    async fn empty_answer_keeps_existing_entry() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.1"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(60));
        resolver.get("svc.local").await.unwrap();

        stub.answer("svc.local", &[]);
        let result = resolver.lookup("svc.local").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(
            &resolver.cached("svc.local").unwrap()[..],
            &ips(&["10.0.0.1"])[..]
        );
    }

    #[tokio::test]
    async fn failed_lookup_keeps_stale_entry() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.1", "10.0.0.2"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(60));
        resolver.get("svc.local").await.unwrap();

        stub.fail("svc.local");
        assert!(resolver.lookup("svc.local").await.is_err());
        assert_eq!(
            &resolver.cached("svc.local").unwrap()[..],
            &ips(&["10.0.0.1", "10.0.0.2"])[..]
        );
        // Cache hits never touch the backend, even while it is failing
        assert!(resolver.get("svc.local").await.is_ok());
        assert_eq!(stub.calls("svc.local").len(), 2);
    }

    #[tokio::test]
    async fn miss_path_errors_propagate() {
        let stub = StubLookup::default();
        stub.fail("down.local");
        let resolver = Resolver::with_lookup(stub, Duration::from_secs(60));
        assert!(resolver.get("down.local").await.is_err());
        assert!(resolver.cached("down.local").is_none());
    }

    #[tokio::test]
    async fn lookup_overwrites_entry() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.1"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(60));
        resolver.get("svc.local").await.unwrap();

        stub.answer("svc.local", &["10.0.0.3", "10.0.0.4"]);
        resolver.lookup("svc.local").await.unwrap();
        assert_eq!(
            &resolver.get("svc.local").await.unwrap()[..],
            &ips(&["10.0.0.3", "10.0.0.4"])[..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_paces_lookups() {
        let stub = StubLookup::default();
        stub.answer("a.local", &["10.0.0.1"])
            .answer("b.local", &["10.0.0.2"])
            .answer("c.local", &["10.0.0.3"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(3600));
        for host in ["a.local", "b.local", "c.local"] {
            resolver.get(host).await.unwrap();
        }

        stub.fail("b.local");
        resolver.refresh().await;

        let mut refreshed = ["a.local", "b.local", "c.local"]
            .iter()
            .map(|host| stub.calls(host)[1])
            .collect::<Vec<_>>();
        refreshed.sort();
        for pair in refreshed.windows(2) {
            assert!(pair[1] - pair[0] >= LOOKUP_PACING);
        }
        assert_eq!(
            &resolver.cached("b.local").unwrap()[..],
            &ips(&["10.0.0.2"])[..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_refreshes_cached_hosts() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.1"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(5));
        resolver.get("svc.local").await.unwrap();

        stub.answer("svc.local", &["10.0.0.9"]);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(stub.calls("svc.local").len(), 2);
        assert_eq!(
            &resolver.cached("svc.local").unwrap()[..],
            &ips(&["10.0.0.9"])[..]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_background_refresh() {
        let stub = StubLookup::default();
        stub.answer("svc.local", &["10.0.0.1"]);
        let resolver = Resolver::with_lookup(stub.clone(), Duration::from_secs(5));
        resolver.get("svc.local").await.unwrap();

        resolver.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(stub.calls("svc.local").len(), 1);
        // Still usable as a cache
        assert!(resolver.get("svc.local").await.is_ok());
    }

    #[tokio::test]
    async fn short_refresh_interval_falls_back_to_default() {
        let resolver = Resolver::with_lookup(StubLookup::default(), Duration::from_millis(500));
        assert_eq!(resolver.refresh_interval(), DEFAULT_REFRESH_INTERVAL);

        let resolver = Resolver::with_lookup(StubLookup::default(), MIN_REFRESH_INTERVAL);
        assert_eq!(resolver.refresh_interval(), MIN_REFRESH_INTERVAL);
    }
}
