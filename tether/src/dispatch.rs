use crate::codec;
use crate::context::Context;
use crate::tracker::InFlightGuard;
use crate::transport::{Channel, Delivery, DeliveryCallback};
use crate::{Handler, HandlerError, Message};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle as RuntimeHandle;
use tokio::time::Instant;
use tracing::{debug, error};

/// Builds the delivery callback of one subscription.
///
/// The callback itself only does the synchronous bookkeeping: it skips empty
/// deliveries, tracks the delivery as in flight, and counts it. The rest of
/// the pipeline runs as an independent task per delivery, so a slow handler
/// never holds up other deliveries.
///
/// Must be called from within a Tokio runtime: the transport may invoke the
/// callback from any thread, and deliveries are spawned onto the captured
/// runtime.
pub(crate) fn callback(
    context: Arc<Context>,
    topic: Arc<str>,
    handler: Arc<dyn Handler>,
    channel: Weak<dyn Channel>,
) -> DeliveryCallback {
    let runtime = RuntimeHandle::current();

    Arc::new(move |delivery: Option<Delivery>| {
        let Some(delivery) = delivery else {
            debug!(
                client = context.name.as_ref(),
                topic = topic.as_ref(),
                "Ignored an empty delivery",
            );
            return;
        };

        let guard = context.tracker.track(&topic);
        context.metrics.record_received();

        runtime.spawn(process(
            Arc::clone(&context),
            Arc::clone(&topic),
            Arc::clone(&handler),
            Weak::clone(&channel),
            delivery,
            guard,
        ));
    })
}

/// Decodes, handles, and finalizes a single delivery. The delivery stays in
/// flight until `guard` drops at the very end, whichever way this goes.
async fn process(
    context: Arc<Context>,
    topic: Arc<str>,
    handler: Arc<dyn Handler>,
    channel: Weak<dyn Channel>,
    delivery: Delivery,
    guard: InFlightGuard,
) {
    let started = Instant::now();
    let outcome = handle(&topic, handler.as_ref(), &guard, &delivery).await;

    match outcome {
        Ok(()) => {
            if complete(&context, &topic, &guard, &channel, &delivery).await {
                context.metrics.record_processed(started.elapsed());
            } else {
                context.metrics.record_error();
            }
        }
        Err(error) => {
            context.metrics.record_error();
            error!(
                client = context.name.as_ref(),
                topic = topic.as_ref(),
                delivery = %guard.id(),
                ?error,
                error_message = %error,
                "Failed to handle an incoming message",
            );
            abandon(&context, &topic, &guard, &channel, &delivery).await;
        }
    }

    drop(guard);
}

/// Runs the decode and handler steps. Decode failures and handler panics come
/// back as ordinary handler errors.
async fn handle(
    topic: &Arc<str>,
    handler: &dyn Handler,
    guard: &InFlightGuard,
    delivery: &Delivery,
) -> Result<(), HandlerError> {
    let payload = codec::decode(delivery.bytes()).map_err(HandlerError::new)?;
    let message = Message::new(Arc::clone(topic), guard.id().clone(), payload);

    AssertUnwindSafe(handler.handle(message))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)))
}

/// Acknowledges the delivery on the channel it arrived on. Reports whether
/// that worked.
async fn complete(
    context: &Context,
    topic: &str,
    guard: &InFlightGuard,
    channel: &Weak<dyn Channel>,
    delivery: &Delivery,
) -> bool {
    let Some(channel) = channel.upgrade() else {
        error!(
            client = context.name.as_ref(),
            topic,
            delivery = %guard.id(),
            "Failed to acknowledge an incoming message: its channel is gone",
        );
        return false;
    };

    match channel.ack(delivery).await {
        Ok(()) => true,
        Err(error) => {
            error!(
                client = context.name.as_ref(),
                topic,
                delivery = %guard.id(),
                ?error,
                error_message = %error,
                byte_preview = String::from_utf8_lossy(delivery.bytes()).as_ref(),
                "Failed to acknowledge an incoming message",
            );
            false
        }
    }
}

/// Rejects the delivery, without re-queueing, on the channel it arrived on.
/// A failure here is only reported: the handler failure is already counted.
async fn abandon(
    context: &Context,
    topic: &str,
    guard: &InFlightGuard,
    channel: &Weak<dyn Channel>,
    delivery: &Delivery,
) {
    let Some(channel) = channel.upgrade() else {
        error!(
            client = context.name.as_ref(),
            topic,
            delivery = %guard.id(),
            "Failed to reject an incoming message: its channel is gone",
        );
        return;
    };

    if let Err(error) = channel.reject(delivery).await {
        error!(
            client = context.name.as_ref(),
            topic,
            delivery = %guard.id(),
            ?error,
            error_message = %error,
            byte_preview = String::from_utf8_lossy(delivery.bytes()).as_ref(),
            "Failed to reject an incoming message",
        );
    }
}
