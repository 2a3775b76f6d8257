//! Sensor poll loop: request frames out, decoded snapshots in.
//!
//! Each tick sweeps the five polled registers in order. The probe is
//! half-duplex, so every request waits a settle delay before the response is
//! read. Serial I/O is blocking and runs on the blocking thread pool; the
//! transport is moved into the task and back out each tick.
//!
//! Failure handling is two-tiered: a decode failure affects only that one
//! metric (logged, skipped, sweep continues), while a transport failure ends
//! the loop and drops the snapshot sender, which the publish loop observes
//! as a closed channel and shuts down in turn.

use crate::decode::Decoder;
use crate::error::{AppResult, HydrostatError};
use crate::metric::{Metric, FRAME_LEN, POLLED_METRICS};
use crate::store::SensorStore;
use crate::transport::Transport;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Bound on snapshots queued toward the publish loop. When the broker is
/// unreachable long enough to fill it, the newest snapshot is dropped.
pub const CHANNEL_CAPACITY: usize = 100;

/// Settle time between writing a request and reading its response.
const WRITE_READ_DELAY: Duration = Duration::from_millis(100);

/// A timestamped set of smoothed metric values, one sweep's worth.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: chrono::DateTime<Utc>,
    pub values: Vec<(Metric, f64)>,
}

/// Sweep every polled register once, decoding into `store`.
///
/// Decode failures are logged and skipped. Transport failures abort the
/// sweep, as does a zero-byte read (the device hung up).
pub fn poll_once<T: Transport>(
    transport: &mut T,
    decoder: &Decoder,
    store: &SensorStore,
) -> AppResult<()> {
    for metric in POLLED_METRICS {
        let Some(request) = metric.request_frame() else {
            continue;
        };

        transport.write(request)?;
        std::thread::sleep(WRITE_READ_DELAY);

        let mut buf = [0u8; FRAME_LEN];
        let n = transport.read(&mut buf)?;
        if n == 0 {
            return Err(HydrostatError::Transport(format!(
                "{metric}: device closed the connection"
            )));
        }

        match decoder.decode(metric, &buf[..n], store) {
            Ok(value) => debug!("read {metric}: {value}"),
            Err(e) => warn!("decode {metric} failed: {e}"),
        }
    }
    Ok(())
}

/// Poll the sensor at `interval` until shutdown, pushing a snapshot toward
/// the publish loop after every sweep.
pub async fn run_poll_loop<T>(
    mut transport: T,
    decoder: Decoder,
    store: Arc<SensorStore>,
    interval: Duration,
    tx: mpsc::Sender<Snapshot>,
    mut shutdown: watch::Receiver<bool>,
) -> AppResult<()>
where
    T: Transport + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sweep_store = Arc::clone(&store);
                let (returned, result) = tokio::task::spawn_blocking(move || {
                    let result = poll_once(&mut transport, &decoder, &sweep_store);
                    (transport, result)
                })
                .await
                .map_err(|e| HydrostatError::Transport(format!("poll task panicked: {e}")))?;
                transport = returned;
                result?;

                let snapshot = Snapshot {
                    taken_at: Utc::now(),
                    values: store.snapshot(),
                };
                match tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("snapshot channel full, dropping newest snapshot");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        return Err(HydrostatError::ChannelClosed);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("poll loop: shutdown received -> closing");
                return Ok(());
            }
        }
    }
}
