use crate::compositor::{Compositor, KeyImage};
use crate::roblox_client::{GameApi, UniverseId, UNRESOLVED_UNIVERSE};
use crate::settings::{DisplayFormat, SettingsCache};
use crate::streamdeck::Host;
use crate::text_utils::format_count;
use crate::utils::tasks::spawn_logged;
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Instances this cycle actually took on.
    pub refreshed: usize,
    /// Instances dropped because another cycle already had them.
    pub skipped_in_flight: usize,
    /// Distinct resolved universes (excluding the unresolved one).
    pub groups: usize,
    pub renders: usize,
    pub dispatched: usize,
    pub placeholders: usize,
    /// Instances left untouched because their universe had no count.
    pub suppressed: usize,
    pub failed_dispatches: usize,
}

#[derive(Default)]
struct Registry {
    active: HashSet<String>,
    timer: Option<JoinHandle<()>>,
}

/// Unmarks its instances on drop, so a failed or cancelled cycle never
/// leaves them stuck in flight.
struct InFlightClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    contexts: Vec<String>,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            for context in &self.contexts {
                in_flight.remove(context);
            }
        }
    }
}

/// Owns every live key and keeps their images current.
///
/// One shared timer drives periodic refreshes; it runs exactly while at least
/// one instance is registered. `register`, `unregister` and `refresh` must be
/// called from inside a Tokio runtime.
pub struct RefreshCoordinator<A: GameApi, H: Host, C: Compositor> {
    api: A,
    host: Arc<H>,
    compositor: C,
    settings: SettingsCache,
    registry: Mutex<Registry>,
    in_flight: Mutex<HashSet<String>>,
    refresh_interval: Duration,
    self_ref: Weak<Self>,
}

impl<A: GameApi, H: Host, C: Compositor> RefreshCoordinator<A, H, C> {
    pub fn new(api: A, host: Arc<H>, compositor: C, refresh_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            api,
            host,
            compositor,
            settings: SettingsCache::new(),
            registry: Mutex::new(Registry::default()),
            in_flight: Mutex::new(HashSet::new()),
            refresh_interval,
            self_ref: self_ref.clone(),
        })
    }

    pub fn settings(&self) -> &SettingsCache {
        &self.settings
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Subscribes `context` to periodic refresh, starting the timer if needed.
    pub fn register(&self, context: &str) {
        let Ok(mut registry) = self.registry.lock() else {
            warn!("Registry lock poisoned, cannot register {}", context);
            return;
        };
        registry.active.insert(context.to_string());
        if registry.timer.is_none() {
            registry.timer = Some(self.spawn_timer());
            info!(
                "Refresh timer started ({} ms)",
                self.refresh_interval.as_millis()
            );
        }
    }

    /// Removes `context` from periodic refresh, stopping the timer once nothing
    /// is left. A refresh already running for it is allowed to finish.
    pub fn unregister(&self, context: &str) {
        let Ok(mut registry) = self.registry.lock() else {
            warn!("Registry lock poisoned, cannot unregister {}", context);
            return;
        };
        registry.active.remove(context);
        if registry.active.is_empty() {
            if let Some(timer) = registry.timer.take() {
                timer.abort();
                info!("Refresh timer stopped");
            }
        }
    }

    /// Drops every registration and stops the timer.
    pub fn shutdown(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.active.clear();
            if let Some(timer) = registry.timer.take() {
                timer.abort();
            }
        }
    }

    pub fn is_registered(&self, context: &str) -> bool {
        self.registry
            .lock()
            .map(|r| r.active.contains(context))
            .unwrap_or(false)
    }

    pub fn registered_count(&self) -> usize {
        self.registry.lock().map(|r| r.active.len()).unwrap_or(0)
    }

    pub fn timer_active(&self) -> bool {
        self.registry
            .lock()
            .map(|r| r.timer.is_some())
            .unwrap_or(false)
    }

    pub fn is_in_flight(&self, context: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(context))
            .unwrap_or(false)
    }

    /// Registered contexts, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut contexts: Vec<String> = self
            .registry
            .lock()
            .map(|r| r.active.iter().cloned().collect())
            .unwrap_or_default();
        contexts.sort();
        contexts
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let coordinator = self.self_ref.clone();
        let period = self.refresh_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    return;
                };
                let contexts = coordinator.registered();
                // Its own task: stopping the timer must not cancel a running cycle.
                spawn_logged("periodic refresh", async move {
                    coordinator.refresh(contexts).await;
                    Ok(())
                });
            }
        })
    }

    /// Takes the contexts not already in flight and marks them, under one lock.
    fn claim(&self, contexts: Vec<String>) -> (Vec<String>, usize) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return (Vec::new(), contexts.len());
        };
        let mut claimed = Vec::with_capacity(contexts.len());
        let mut skipped = 0;
        for context in contexts {
            if in_flight.insert(context.clone()) {
                claimed.push(context);
            } else if !claimed.contains(&context) {
                skipped += 1;
            }
        }
        (claimed, skipped)
    }

    /// Runs one refresh cycle for `contexts`.
    ///
    /// Contexts already being refreshed are skipped, not queued. Every
    /// external failure degrades to a placeholder or to leaving the key's
    /// current image alone; nothing here aborts the cycle.
    pub async fn refresh(&self, contexts: Vec<String>) -> RefreshReport {
        let (claimed, skipped_in_flight) = self.claim(contexts);
        let mut report = RefreshReport {
            skipped_in_flight,
            ..RefreshReport::default()
        };
        if claimed.is_empty() {
            return report;
        }
        report.refreshed = claimed.len();
        let claim = InFlightClaim {
            in_flight: &self.in_flight,
            contexts: claimed,
        };

        // Settings are read now, not when the refresh was scheduled.
        let members: Vec<(String, u64, DisplayFormat)> = claim
            .contexts
            .iter()
            .map(|context| {
                let settings = self.settings.get(context);
                (context.clone(), settings.place_id, settings.format)
            })
            .collect();

        let universes = self.resolve_places(&members).await;

        let mut groups: BTreeMap<UniverseId, Vec<(String, DisplayFormat)>> = BTreeMap::new();
        for (context, place_id, format) in members {
            let universe = universes
                .get(&place_id)
                .copied()
                .unwrap_or(UNRESOLVED_UNIVERSE);
            groups.entry(universe).or_default().push((context, format));
        }
        let unresolved = groups.remove(&UNRESOLVED_UNIVERSE).unwrap_or_default();

        let universe_ids: BTreeSet<UniverseId> = groups.keys().copied().collect();
        report.groups = universe_ids.len();

        let (icons, counts) = if universe_ids.is_empty() {
            (HashMap::new(), HashMap::new())
        } else {
            tokio::join!(
                self.api.fetch_icons(&universe_ids),
                self.api.fetch_counts(&universe_ids)
            )
        };

        let mut rendered: HashMap<(UniverseId, DisplayFormat), Option<KeyImage>> = HashMap::new();
        for (universe, members) in &groups {
            let Some(&count) = counts.get(universe) else {
                debug!("No player count for universe {}, leaving its keys alone", universe);
                report.suppressed += members.len();
                continue;
            };
            let icon = icons.get(universe).map(Vec::as_slice);

            for (context, format) in members {
                let image = rendered.entry((*universe, *format)).or_insert_with(|| {
                    report.renders += 1;
                    let text = format_count(count, *format);
                    match self.compositor.render(icon, &text) {
                        Ok(image) => Some(image),
                        Err(e) => {
                            warn!("Rendering universe {} failed: {:#}", universe, e);
                            None
                        }
                    }
                });
                match image {
                    Some(image) => self.dispatch(context, image, &mut report),
                    None => report.suppressed += 1,
                }
            }
        }

        if !unresolved.is_empty() {
            let placeholder = KeyImage::placeholder();
            for (context, _) in &unresolved {
                self.dispatch(context, &placeholder, &mut report);
                report.placeholders += 1;
            }
        }

        drop(claim);
        debug!("Refresh cycle finished: {:?}", report);
        report
    }

    /// Resolves each distinct configured place once. Unset places never hit the network.
    async fn resolve_places(
        &self,
        members: &[(String, u64, DisplayFormat)],
    ) -> HashMap<u64, UniverseId> {
        let places: BTreeSet<u64> = members
            .iter()
            .map(|(_, place_id, _)| *place_id)
            .filter(|place_id| *place_id != 0)
            .collect();

        let lookups = places.into_iter().map(|place_id| async move {
            (place_id, self.api.resolve_universe(place_id).await)
        });
        join_all(lookups).await.into_iter().collect()
    }

    fn dispatch(&self, context: &str, image: &KeyImage, report: &mut RefreshReport) {
        match self.host.set_image(context, image) {
            Ok(()) => report.dispatched += 1,
            Err(e) => {
                warn!("Failed to send image to {}: {:#}", context, e);
                report.failed_dispatches += 1;
            }
        }
    }
}
