//! MQTT telemetry publisher.
//!
//! Consumes snapshots from the poll loop and publishes one JSON message per
//! snapshot at QoS 0. The connection is handled by a background event loop
//! task; rumqttc reconnects on its own, so a broker outage only costs the
//! snapshots that overflow the channel in the meantime.
//!
//! The loop ends when the snapshot channel closes, which is how the poll
//! loop hands its own termination down the pipeline.

use crate::error::{AppResult, HydrostatError};
use crate::reader::Snapshot;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use tokio::sync::mpsc;

/// Telemetry topic: `{prefix}/{client_id}/SENSOR`.
pub fn telemetry_topic(prefix: &str, client_id: &str) -> String {
    format!("{prefix}/{client_id}/SENSOR")
}

/// Serialize a snapshot as the telemetry payload.
///
/// Values are rounded to two decimals; every metric key is always present so
/// consumers can rely on the shape.
pub fn payload(snapshot: &Snapshot) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    for (metric, value) in &snapshot.values {
        let rounded = (value * 100.0).round() / 100.0;
        data.insert(metric.key().to_string(), json!(rounded));
    }
    json!({ "data": data })
}

/// Publish snapshots to `topic` until the channel closes.
pub async fn run_publish_loop(
    options: MqttOptions,
    topic: String,
    mut rx: mpsc::Receiver<Snapshot>,
) -> AppResult<()> {
    let (client, mut event_loop) = AsyncClient::new(options, 10);

    // rumqttc requires the event loop to be polled for the client to make
    // progress; it also owns reconnection.
    let driver = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(event) => debug!("mqtt event: {event:?}"),
                Err(e) => {
                    warn!("mqtt connection error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    let result = async {
        while let Some(snapshot) = rx.recv().await {
            let body = serde_json::to_vec(&payload(&snapshot)).map_err(|e| {
                HydrostatError::Telemetry(format!("serialize snapshot: {e}"))
            })?;
            debug!("publish snapshot taken at {}", snapshot.taken_at);
            client
                .publish(&topic, QoS::AtMostOnce, false, body)
                .await
                .map_err(|e| HydrostatError::Telemetry(format!("publish to '{topic}': {e}")))?;
        }
        info!("snapshot channel closed -> stopping publisher");
        let _ = client.disconnect().await;
        Ok(())
    }
    .await;

    driver.abort();
    result
}
