use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::body::{Bytes, Sender};
use hyper::Body;
use serde::Serialize;
use tokio::sync::watch;

use pathstore::LonLat;

/// Fires once, when the server starts shutting down. Every stream holds a clone and stops as soon
/// as it fires.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// The only way to fire a `CancelToken`. Dropping it also wakes everything waiting in
/// `CancelToken::cancelled`.
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

pub fn cancel_token() -> (CancelTrigger, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelToken { rx })
}

impl CancelTrigger {
    pub fn cancel(self) {
        // If every token is gone, nobody is listening anyway
        let _ = self.tx.send(true);
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token fires.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// How many stream tasks are running right now
#[derive(Clone, Default)]
pub struct LiveStreams(Arc<AtomicUsize>);

impl LiveStreams {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> LiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveGuard(self.0.clone())
    }
}

// Decrements on every way out of a stream task, including panics
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One server-sent event
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionFrame {
    pub device_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub timestamp: f64,
}

impl PositionFrame {
    pub fn to_sse(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
        )
    }
}

/// Endlessly cycles through a stored path: p0, p1, ..., pN, p0, p1, ...
pub struct PositionReplay {
    device_id: String,
    path: Vec<LonLat>,
    idx: usize,
}

impl PositionReplay {
    /// `path` must be non-empty.
    pub fn new(device_id: String, path: Vec<LonLat>) -> PositionReplay {
        assert!(!path.is_empty(), "can't replay an empty path for {}", device_id);
        PositionReplay {
            device_id,
            path,
            idx: 0,
        }
    }
}

impl Iterator for PositionReplay {
    type Item = PositionFrame;

    fn next(&mut self) -> Option<PositionFrame> {
        let pt = self.path[self.idx % self.path.len()];
        self.idx = (self.idx + 1) % self.path.len();
        Some(PositionFrame {
            device_id: self.device_id.clone(),
            longitude: pt.longitude(),
            latitude: pt.latitude(),
            timestamp: crate::unix_timestamp(),
        })
    }
}

/// Spawns the task feeding a replay into a response body. The task ends when the subscriber goes
/// away or `cancel` fires; either way the body's sender is dropped and the connection can close.
pub fn spawn(
    replay: PositionReplay,
    interval: Duration,
    cancel: CancelToken,
    live: &LiveStreams,
) -> Body {
    let (sender, body) = Body::channel();
    tokio::spawn(run(replay, interval, sender, cancel, live.enter()));
    body
}

async fn run(
    replay: PositionReplay,
    interval: Duration,
    mut sender: Sender,
    mut cancel: CancelToken,
    _live: LiveGuard,
) {
    let device_id = replay.device_id.clone();
    info!("Streaming positions for {}", device_id);
    let mut sent: u64 = 0;

    for frame in replay {
        if cancel.is_cancelled() {
            info!("Stream for {} cancelled after {} frames", device_id, sent);
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Stream for {} cancelled after {} frames", device_id, sent);
                return;
            }
            result = sender.send_data(Bytes::from(frame.to_sse())) => {
                if result.is_err() {
                    info!("Subscriber for {} disconnected after {} frames", device_id, sent);
                    return;
                }
            }
        }
        sent += 1;

        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<LonLat> {
        vec![LonLat(1.0, 1.0), LonLat(2.0, 2.0), LonLat(3.0, 3.0)]
    }

    #[test]
    fn replay_cycles() {
        let frames: Vec<(f64, f64)> = PositionReplay::new("d1".to_string(), triangle())
            .take(7)
            .map(|f| (f.longitude, f.latitude))
            .collect();
        assert_eq!(
            frames,
            vec![
                (1.0, 1.0),
                (2.0, 2.0),
                (3.0, 3.0),
                (1.0, 1.0),
                (2.0, 2.0),
                (3.0, 3.0),
                (1.0, 1.0)
            ]
        );
    }

    #[test]
    fn sse_framing() {
        let frame = PositionFrame {
            device_id: "d1".to_string(),
            longitude: 127.5,
            latitude: 37.25,
            timestamp: 100.0,
        };
        assert_eq!(
            frame.to_sse(),
            "data: {\"device_id\":\"d1\",\"longitude\":127.5,\"latitude\":37.25,\"timestamp\":100.0}\n\n"
        );
    }

    #[tokio::test]
    async fn stream_emits_in_order_then_stops_on_cancel() {
        let (trigger, token) = cancel_token();
        let live = LiveStreams::default();
        let mut body = spawn(
            PositionReplay::new("d1".to_string(), triangle()),
            Duration::ZERO,
            token,
            &live,
        );
        assert_eq!(live.count(), 1);

        let mut text = String::new();
        while text.matches("\n\n").count() < 4 {
            let chunk = hyper::body::HttpBody::data(&mut body).await.unwrap().unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        let lons: Vec<f64> = text
            .split("\n\n")
            .filter(|x| !x.is_empty())
            .take(4)
            .map(|x| {
                let json: serde_json::Value =
                    serde_json::from_str(x.strip_prefix("data: ").unwrap()).unwrap();
                assert_eq!(json["device_id"], "d1");
                json["longitude"].as_f64().unwrap()
            })
            .collect();
        assert_eq!(lons, vec![1.0, 2.0, 3.0, 1.0]);

        trigger.cancel();
        // Drain whatever was in flight; the body must end
        while let Some(chunk) = hyper::body::HttpBody::data(&mut body).await {
            chunk.unwrap();
        }
        assert_eq!(live.count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_ends_the_task() {
        let (_trigger, token) = cancel_token();
        let live = LiveStreams::default();
        let (sender, body) = Body::channel();
        drop(body);
        let task = tokio::spawn(run(
            PositionReplay::new("d1".to_string(), triangle()),
            Duration::ZERO,
            sender,
            token,
            live.enter(),
        ));
        assert_eq!(live.count(), 1);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.count(), 0);
    }

    #[tokio::test]
    async fn dropped_trigger_cancels() {
        let (trigger, mut token) = cancel_token();
        assert!(!token.is_cancelled());
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
    }
}
