//! Human-behavior pacing for outbound sends.
//!
//! Before a paced send the session task sleeps, flips presence through
//! `available → composing → paused`, and only then dispatches. Presence
//! failures never block the send.

use rand::Rng;
use tokio::time::{Duration, sleep};

use crate::wa::{PresenceKind, WaSocket};

const READ_DELAY_MS: std::ops::RangeInclusive<u64> = 300..=500;
const TYPING_DELAY_MS: std::ops::RangeInclusive<u64> = 1000..=2000;
const PRE_SEND_DELAY_MS: std::ops::RangeInclusive<u64> = 400..=1000;

/// One set of randomized delays, sampled independently per send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerDelays {
    pub read: Duration,
    pub typing: Duration,
    pub pre_send: Duration,
}

impl PacerDelays {
    pub fn sample() -> Self {
        let mut rng = rand::rng();
        Self {
            read: Duration::from_millis(rng.random_range(READ_DELAY_MS)),
            typing: Duration::from_millis(rng.random_range(TYPING_DELAY_MS)),
            pre_send: Duration::from_millis(rng.random_range(PRE_SEND_DELAY_MS)),
        }
    }

    pub fn total(&self) -> Duration {
        self.read + self.typing + self.pre_send
    }
}

/// Runs the pre-send choreography: read pause, presence online, typing
/// indicator, typing pause, final hesitation.
pub async fn apply_before_send(socket: &dyn WaSocket, to: &str, delays: &PacerDelays) {
    sleep(delays.read).await;
    present(socket, PresenceKind::Available, to).await;
    present(socket, PresenceKind::Composing, to).await;
    sleep(delays.typing).await;
    present(socket, PresenceKind::Paused, to).await;
    sleep(delays.pre_send).await;
}

/// Returns presence to `available` after the send went out.
pub async fn settle_after_send(socket: &dyn WaSocket, to: &str) {
    present(socket, PresenceKind::Available, to).await;
}

async fn present(socket: &dyn WaSocket, presence: PresenceKind, to: &str) {
    if let Err(error) = socket.send_presence(presence, Some(to)).await {
        tracing::debug!(%error, presence = presence.as_str(), "presence update failed");
    }
}
