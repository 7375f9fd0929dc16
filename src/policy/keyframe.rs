use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::engine::PeerSession;

/// run_keyframe_requests sends a picture loss indication for `media_ssrc`
/// every `interval` until the session closes or a request fails. A PLI makes
/// the sender emit a keyframe, so viewers joining mid-stream can start
/// decoding within one interval.
pub async fn run_keyframe_requests(
    peer: Arc<dyn PeerSession + Send + Sync>,
    media_ssrc: u32,
    interval: Duration,
    mut close_rx: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = peer.request_keyframe(media_ssrc).await {
                    log::debug!("keyframe request for ssrc {media_ssrc} failed: {err}");
                    return;
                }
                log::trace!("sent keyframe request for ssrc {media_ssrc}");
            }
            _ = close_rx.changed() => {
                return;
            }
        }
    }
}
