//! JSON codec for the simulator stream.
//!
//! Inbound parsing is lenient: a message is classified as
//! status-only, a pose frame, or nothing at all, and individual malformed
//! links or navigation blocks are dropped without discarding the frame.

use std::collections::BTreeMap;

use serde_json::Value;
use strider_types::{
    InboundFrame, LinkPose, NavigationContext, OutboundMessage, PosePayload, RootPose, StriderError,
};
use tracing::debug;

/// Classify one inbound text frame.
///
/// * `Err` – not JSON at all.
/// * `Ok(None)` – JSON, but neither a status nor a usable pose.
/// * `Ok(Some(_))` – a status line or a pose frame.
pub fn decode_inbound(text: &str) -> Result<Option<InboundFrame>, StriderError> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| StriderError::Serialization(e.to_string()))?;

    let kind = json.get("type").and_then(Value::as_str).unwrap_or("");
    let error = json
        .get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty());

    if let Some(error) = error {
        return Ok(Some(InboundFrame::Status(format!("error: {error}"))));
    }
    if kind == "status" {
        let message = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("status")
            .to_string();
        return Ok(Some(InboundFrame::Status(message)));
    }

    let Some(root) = json
        .get("root")
        .and_then(|r| serde_json::from_value::<RootPose>(r.clone()).ok())
        .filter(RootPose::is_valid)
    else {
        return Ok(None);
    };

    let sim_time_s = json.get("simTimeS").and_then(Value::as_f64).filter(|t| t.is_finite());
    let Some(t) = json
        .get("t")
        .and_then(Value::as_f64)
        .filter(|t| t.is_finite())
        .or(sim_time_s)
    else {
        return Ok(None);
    };

    Ok(Some(InboundFrame::Pose(Box::new(PosePayload {
        t,
        sim_time_s,
        root,
        links: decode_links(json.get("links")),
        nav: json
            .get("nav")
            .and_then(|n| serde_json::from_value::<NavigationContext>(n.clone()).ok())
            .map(NavigationContext::sanitized),
    }))))
}

fn decode_links(value: Option<&Value>) -> BTreeMap<String, LinkPose> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(name, raw)| match serde_json::from_value::<LinkPose>(raw.clone()) {
            Ok(link) => Some((name.clone(), link)),
            Err(e) => {
                debug!(joint = %name, error = %e, "skipping malformed link");
                None
            }
        })
        .collect()
}

pub fn encode_outbound(msg: &OutboundMessage) -> Result<String, StriderError> {
    serde_json::to_string(msg).map_err(|e| StriderError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::SessionStart;
    use uuid::Uuid;

    const POSE: &str = r#"{
        "t": 12.5,
        "simTimeS": 40.0,
        "root": {"lat": -33.85, "lon": 151.21, "height": 3.0, "quat": [1, 0, 0, 0]},
        "links": {
            "knee": {"pos": [0.1, 0.2, 0.3], "quat": [1, 0, 0, 0]},
            "broken": {"pos": [0.1], "quat": [1, 0, 0, 0]}
        },
        "nav": {"progressPct": 140.0, "terrainBlockReason": "  ", "remainingWaypoints": 3}
    }"#;

    #[test]
    fn pose_frame_is_decoded() {
        let Some(InboundFrame::Pose(p)) = decode_inbound(POSE).unwrap() else {
            panic!("expected pose");
        };
        assert_eq!(p.t, 12.5);
        assert_eq!(p.sim_time_s, Some(40.0));
        assert_eq!(p.links.len(), 1);
        assert!(p.links.contains_key("knee"));
        let nav = p.nav.unwrap();
        assert_eq!(nav.progress_pct, Some(100.0));
        assert_eq!(nav.terrain_block_reason, None);
        assert_eq!(nav.remaining_waypoints, Some(3));
    }

    #[test]
    fn status_and_error_short_circuit() {
        let s = decode_inbound(r#"{"type": "status", "message": "sim paused", "root": {"lat": 0, "lon": 0, "height": 0, "quat": [1,0,0,0]}, "t": 1}"#)
            .unwrap();
        assert_eq!(s, Some(InboundFrame::Status("sim paused".into())));

        let e = decode_inbound(r#"{"error": "route failed", "t": 1}"#).unwrap();
        assert_eq!(e, Some(InboundFrame::Status("error: route failed".into())));
    }

    #[test]
    fn empty_error_is_not_status() {
        assert_eq!(decode_inbound(r#"{"error": "", "t": 1}"#).unwrap(), None);
    }

    #[test]
    fn missing_or_invalid_root_yields_nothing() {
        assert_eq!(decode_inbound(r#"{"t": 1}"#).unwrap(), None);
        assert_eq!(
            decode_inbound(r#"{"t": 1, "root": {"lat": 0, "lon": 0, "height": 0, "quat": [0,0,0,0]}}"#).unwrap(),
            None
        );
        assert_eq!(
            decode_inbound(r#"{"t": 1, "root": {"lat": "x", "lon": 0, "height": 0, "quat": [1,0,0,0]}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(decode_inbound("not json"), Err(StriderError::Serialization(_))));
    }

    #[test]
    fn outbound_carries_type_tag() {
        let json = encode_outbound(&OutboundMessage::SessionStart(SessionStart {
            session_id: Uuid::nil(),
            t: 0.0,
        }))
        .unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "session_start");
        assert!(v.get("sessionId").is_some());
    }
}
