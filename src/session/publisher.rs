use std::sync::Arc;

use tokio::sync::mpsc;

use super::TaskSet;
use crate::engine::{FeedbackReader, InboundMedia, PacketReader, PeerSession};
use crate::error::Error;
use crate::media::io::Writer;
use crate::policy::{run_keyframe_requests, SessionPolicy};
use crate::relay::ProducerGuard;

/// spawn starts the publisher side of a session. The producer slot is held
/// by the spawned task and released when it exits.
pub(crate) async fn spawn(
    tasks: TaskSet,
    guard: ProducerGuard,
    inbound_rx: mpsc::Receiver<InboundMedia>,
    peer: Arc<dyn PeerSession + Send + Sync>,
    policy: Arc<SessionPolicy>,
    max_forward_errors: u32,
) {
    let tasks2 = tasks.clone();
    tasks
        .spawn(async move {
            run(tasks2, guard, inbound_rx, peer, policy, max_forward_errors).await;
        })
        .await;
}

async fn run(
    tasks: TaskSet,
    guard: ProducerGuard,
    mut inbound_rx: mpsc::Receiver<InboundMedia>,
    peer: Arc<dyn PeerSession + Send + Sync>,
    policy: Arc<SessionPolicy>,
    max_forward_errors: u32,
) {
    let mut close_rx = tasks.close_rx();

    let media = tokio::select! {
        media = inbound_rx.recv() => {
            match media {
                Some(media) => media,
                None => {
                    tasks.report(Error::ErrSourceClosed);
                    return;
                }
            }
        }
        _ = close_rx.changed() => {
            return;
        }
    };

    log::info!(
        "publisher track ssrc {} arrived with codec {}",
        media.ssrc,
        media.codec.mime_type
    );
    if let Err(err) = guard.bind_codec(&media.codec) {
        tasks.report(err);
        return;
    }

    let feedback = Arc::clone(&media.feedback);
    let tasks2 = tasks.clone();
    let policy2 = Arc::clone(&policy);
    tasks
        .spawn(async move {
            drain_feedback(tasks2, feedback, policy2).await;
        })
        .await;

    if let Some(interval) = policy.keyframe_interval {
        tasks
            .spawn(run_keyframe_requests(
                peer,
                media.ssrc,
                interval,
                tasks.close_rx(),
            ))
            .await;
    }

    let relay = Arc::clone(guard.relay());
    forward(
        &tasks,
        Arc::clone(&relay) as Arc<dyn Writer + Send + Sync>,
        media.packets,
        max_forward_errors,
    )
    .await;
    log::info!(
        "publisher ssrc {} stopped, relay {:?}",
        media.ssrc,
        relay.stats()
    );
}

/// forward copies every inbound packet to the relay track. Failed writes are
/// tolerated until `max_forward_errors` of them happen in a row; a closed
/// relay ends the loop at once.
pub(super) async fn forward(
    tasks: &TaskSet,
    relay: Arc<dyn Writer + Send + Sync>,
    packets: Arc<dyn PacketReader + Send + Sync>,
    max_forward_errors: u32,
) {
    let mut close_rx = tasks.close_rx();
    let mut failures = 0u32;

    loop {
        tokio::select! {
            result = packets.read_rtp() => {
                let pkt = match result {
                    Ok(pkt) => pkt,
                    Err(err) => {
                        tasks.report(err);
                        return;
                    }
                };

                match relay.write_rtp(&pkt).await {
                    Ok(()) => failures = 0,
                    Err(Error::ErrSinkClosed) => {
                        tasks.report(Error::ErrSinkClosed);
                        return;
                    }
                    Err(err) => {
                        failures += 1;
                        log::warn!(
                            "forwarding seq {} to relay failed ({failures} in a row): {err}",
                            pkt.header.sequence_number
                        );
                        if failures >= max_forward_errors {
                            tasks.report(err);
                            return;
                        }
                    }
                }
            }
            _ = close_rx.changed() => {
                return;
            }
        }
    }
}

/// drain_feedback keeps reading RTCP so the interceptors keep running.
pub(crate) async fn drain_feedback(
    tasks: TaskSet,
    feedback: Arc<dyn FeedbackReader + Send + Sync>,
    policy: Arc<SessionPolicy>,
) {
    let mut close_rx = tasks.close_rx();
    loop {
        tokio::select! {
            result = feedback.read_rtcp() => {
                match result {
                    Ok(pkts) => policy.dump.dump_rtcp(&pkts),
                    Err(err) => {
                        tasks.report(err);
                        return;
                    }
                }
            }
            _ = close_rx.changed() => {
                return;
            }
        }
    }
}
