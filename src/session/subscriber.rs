use std::sync::Arc;

use super::publisher::drain_feedback;
use super::TaskSet;
use crate::engine::OutboundMedia;
use crate::error::Error;
use crate::media::io::Writer;
use crate::policy::SessionPolicy;
use crate::relay::RelayConsumer;

/// spawn starts the subscriber side of a session: one task copies relay
/// packets to the outbound sink, another drains the viewer's feedback.
pub(crate) async fn spawn(
    tasks: TaskSet,
    consumer: RelayConsumer,
    outbound: OutboundMedia,
    policy: Arc<SessionPolicy>,
    max_forward_errors: u32,
) {
    let OutboundMedia { sink, feedback } = outbound;

    let tasks2 = tasks.clone();
    let policy2 = Arc::clone(&policy);
    tasks
        .spawn(async move {
            forward(tasks2, consumer, sink, policy2, max_forward_errors).await;
        })
        .await;

    let tasks2 = tasks.clone();
    tasks
        .spawn(async move {
            drain_feedback(tasks2, feedback, policy).await;
        })
        .await;
}

async fn forward(
    tasks: TaskSet,
    mut consumer: RelayConsumer,
    sink: Arc<dyn Writer + Send + Sync>,
    policy: Arc<SessionPolicy>,
    max_forward_errors: u32,
) {
    let mut close_rx = tasks.close_rx();
    let mut failures = 0u32;

    loop {
        tokio::select! {
            pkt = consumer.recv() => {
                let pkt = match pkt {
                    Some(pkt) => pkt,
                    None => {
                        tasks.report(Error::ErrRelayUnavailable);
                        break;
                    }
                };

                policy.dump.dump_rtp(&pkt);
                match sink.write_rtp(&pkt).await {
                    Ok(()) => failures = 0,
                    Err(Error::ErrSinkClosed) => {
                        tasks.report(Error::ErrSinkClosed);
                        break;
                    }
                    Err(err) => {
                        failures += 1;
                        log::debug!(
                            "consumer {} write of seq {} failed ({failures} in a row): {err}",
                            consumer.id(),
                            pkt.header.sequence_number
                        );
                        if failures >= max_forward_errors {
                            tasks.report(err);
                            break;
                        }
                    }
                }
            }
            _ = close_rx.changed() => {
                break;
            }
        }
    }

    if let Err(err) = sink.close().await {
        log::warn!("closing sink of consumer {}: {err}", consumer.id());
    }
    log::info!(
        "consumer {} stopped, relay {:?}",
        consumer.id(),
        consumer.relay_stats()
    );
}
