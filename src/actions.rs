use crate::compositor::Compositor;
use crate::config::PluginConfig;
use crate::managers::refresh::RefreshCoordinator;
use crate::roblox_client::GameApi;
use crate::settings::KeySettings;
use crate::streamdeck::events::InboundEvent;
use crate::streamdeck::Host;
use crate::utils::tasks::spawn_logged;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;

/// The player-count action: turns host lifecycle events into coordinator calls.
pub struct PlayerCountAction<A: GameApi, H: Host, C: Compositor> {
    coordinator: Arc<RefreshCoordinator<A, H, C>>,
    config: PluginConfig,
}

impl<A: GameApi, H: Host, C: Compositor> PlayerCountAction<A, H, C> {
    pub fn new(coordinator: Arc<RefreshCoordinator<A, H, C>>, config: PluginConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator<A, H, C>> {
        &self.coordinator
    }

    pub fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::WillAppear { context, payload } => {
                self.on_will_appear(&context, &payload.settings)
            }
            InboundEvent::WillDisappear { context } => self.on_will_disappear(&context),
            InboundEvent::DidReceiveSettings { context, payload } => {
                self.on_did_receive_settings(&context, &payload.settings)
            }
            InboundEvent::KeyDown { context, payload }
            | InboundEvent::DialDown { context, payload }
            | InboundEvent::TouchTap { context, payload } => {
                self.on_press(&context, &payload.settings)
            }
            InboundEvent::Unknown => {}
        }
    }

    pub fn on_will_appear(&self, context: &str, settings: &Value) {
        let settings = KeySettings::from_json(settings);
        debug!(
            "{} appeared (place {}, {})",
            context,
            settings.place_id,
            settings.format.as_str()
        );
        self.coordinator.settings().set(context, settings);
        self.coordinator.register(context);
        self.refresh_now(context);
    }

    pub fn on_will_disappear(&self, context: &str) {
        debug!("{} disappeared", context);
        self.coordinator.unregister(context);
        self.coordinator.settings().delete(context);
    }

    pub fn on_did_receive_settings(&self, context: &str, settings: &Value) {
        let settings = KeySettings::from_json(settings);
        debug!(
            "{} settings changed (place {}, {})",
            context,
            settings.place_id,
            settings.format.as_str()
        );
        self.coordinator.settings().set(context, settings);
        self.refresh_now(context);
    }

    /// Opens the game's page. Never touches the refresh state.
    pub fn on_press(&self, context: &str, settings: &Value) {
        let settings = KeySettings::from_json(settings);
        if !settings.is_configured() {
            debug!("{} pressed without a place configured", context);
            return;
        }

        let url = self.config.game_page_url(settings.place_id);
        info!("Opening {}", url);
        if let Err(e) = self.coordinator.host().open_url(&url) {
            warn!("Failed to open {}: {:#}", url, e);
        }
    }

    fn refresh_now(&self, context: &str) {
        let coordinator = self.coordinator.clone();
        let contexts = vec![context.to_string()];
        spawn_logged("instance refresh", async move {
            coordinator.refresh(contexts).await;
            Ok(())
        });
    }
}
