use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub settings: Value,
}

/// Events the host sends to the plugin. Anything not listed is `Unknown`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InboundEvent {
    WillAppear {
        context: String,
        #[serde(default)]
        payload: ActionPayload,
    },
    WillDisappear {
        context: String,
    },
    DidReceiveSettings {
        context: String,
        #[serde(default)]
        payload: ActionPayload,
    },
    KeyDown {
        context: String,
        #[serde(default)]
        payload: ActionPayload,
    },
    DialDown {
        context: String,
        #[serde(default)]
        payload: ActionPayload,
    },
    TouchTap {
        context: String,
        #[serde(default)]
        payload: ActionPayload,
    },
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Malformed event from Stream Deck")
    }
}

pub fn register_message(register_event: &str, plugin_uuid: &str) -> String {
    json!({ "event": register_event, "uuid": plugin_uuid }).to_string()
}

/// With no image the host falls back to the image from the manifest.
pub fn set_image_message(context: &str, image: Option<&str>) -> String {
    let payload = match image {
        Some(image) => json!({ "image": image, "target": 0 }),
        None => json!({ "target": 0 }),
    };
    json!({ "event": "setImage", "context": context, "payload": payload }).to_string()
}

pub fn open_url_message(url: &str) -> String {
    json!({ "event": "openUrl", "payload": { "url": url } }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_will_appear_with_settings() {
        let event = InboundEvent::parse(
            r#"{"event":"willAppear","action":"com.example.count","context":"abc",
                "device":"dev","payload":{"settings":{"placeId":"606849621","format":"full"},
                "coordinates":{"column":1,"row":0},"isInMultiAction":false}}"#,
        )
        .expect("parse");

        let InboundEvent::WillAppear { context, payload } = event else {
            panic!("wrong variant: {:?}", event);
        };
        assert_eq!(context, "abc");
        assert_eq!(payload.settings["placeId"], "606849621");
    }

    #[test]
    fn missing_payload_gives_null_settings() {
        let event = InboundEvent::parse(r#"{"event":"keyDown","context":"k"}"#).expect("parse");
        assert_eq!(
            event,
            InboundEvent::KeyDown {
                context: "k".to_string(),
                payload: ActionPayload::default(),
            }
        );
    }

    #[test]
    fn decodes_dial_and_touch_presses() {
        let settings = ActionPayload {
            settings: json!({ "placeId": 5 }),
        };
        assert_eq!(
            InboundEvent::parse(r#"{"event":"dialDown","context":"d","payload":{"settings":{"placeId":5}}}"#)
                .expect("parse"),
            InboundEvent::DialDown {
                context: "d".to_string(),
                payload: settings.clone(),
            }
        );
        assert_eq!(
            InboundEvent::parse(r#"{"event":"touchTap","context":"t","payload":{"settings":{"placeId":5}}}"#)
                .expect("parse"),
            InboundEvent::TouchTap {
                context: "t".to_string(),
                payload: settings,
            }
        );
    }

    #[test]
    fn unrelated_events_are_unknown() {
        for text in [
            r#"{"event":"deviceDidConnect","device":"x","deviceInfo":{}}"#,
            r#"{"event":"keyUp","context":"k","payload":{}}"#,
            r#"{"event":"systemDidWakeUp"}"#,
        ] {
            assert_eq!(InboundEvent::parse(text).expect("parse"), InboundEvent::Unknown);
        }
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(InboundEvent::parse("not json").is_err());
        assert!(InboundEvent::parse(r#"{"context":"no event"}"#).is_err());
    }

    #[test]
    fn encodes_outbound_messages() {
        let register: Value = serde_json::from_str(&register_message("registerPlugin", "uuid-1"))
            .expect("json");
        assert_eq!(register, json!({ "event": "registerPlugin", "uuid": "uuid-1" }));

        let image: Value =
            serde_json::from_str(&set_image_message("ctx", Some("data:image/png;base64,AA==")))
                .expect("json");
        assert_eq!(
            image,
            json!({
                "event": "setImage",
                "context": "ctx",
                "payload": { "image": "data:image/png;base64,AA==", "target": 0 }
            })
        );

        let fallback: Value =
            serde_json::from_str(&set_image_message("ctx", None)).expect("json");
        assert!(fallback["payload"].get("image").is_none());

        let url: Value = serde_json::from_str(&open_url_message("https://www.roblox.com/games/1/"))
            .expect("json");
        assert_eq!(url["payload"]["url"], "https://www.roblox.com/games/1/");
        assert_eq!(url["event"], "openUrl");
    }
}
