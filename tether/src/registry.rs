use crate::Handler;
use crate::context::Context;
use crate::dispatch;
use crate::transport::{Channel, QueueOptions, SubscriptionTag, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// The channel currently established by the connection manager, along with
/// the generation (connect counter) it belongs to.
pub(crate) type CurrentChannel = Option<(u64, Arc<dyn Channel>)>;

/// Holds the topic→handler bindings and keeps one subscription per bound
/// topic alive on the current channel.
///
/// A subscription remembers the channel generation it was made on. Bindings
/// whose subscription is missing or older than the current generation are
/// (re)subscribed on the next [`resubscribe_all`](Registry::resubscribe_all).
/// Failures are reported back, so the connection manager can bring about
/// that next connect.
pub(crate) struct Registry {
    context: Arc<Context>,
    bindings: AsyncMutex<BTreeMap<Arc<str>, Binding>>,
}

struct Binding {
    handler: Arc<dyn Handler>,
    subscription: Option<Subscription>,
}

struct Subscription {
    generation: u64,
    tag: SubscriptionTag,
}

impl Registry {
    pub(crate) fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            bindings: AsyncMutex::new(BTreeMap::new()),
        }
    }

    /// Stores the binding for the given topic, replacing any previous one.
    ///
    /// The `current` channel is looked up only after the registry lock is
    /// taken. If there is one, the topic is subscribed right away, after the
    /// previous subscription on the same channel (if any) is cancelled, so
    /// that a topic never has two live subscriptions on one channel.
    ///
    /// Reports the channel generation on which subscribing failed, if it did.
    pub(crate) async fn bind<F>(
        &self,
        topic: &str,
        handler: Arc<dyn Handler>,
        current: F,
    ) -> Option<u64>
    where
        F: FnOnce() -> CurrentChannel,
    {
        let mut bindings = self.bindings.lock().await;
        let topic: Arc<str> = Arc::from(topic);

        let previous = bindings.insert(
            Arc::clone(&topic),
            Binding {
                handler,
                subscription: None,
            },
        );

        let Some((generation, channel)) = current() else {
            debug!(
                client = self.context.name.as_ref(),
                topic = topic.as_ref(),
                "Stored a binding until the next connect",
            );
            return None;
        };

        if let Some(previous) = previous.and_then(|binding| binding.subscription) {
            if previous.generation == generation {
                self.cancel(&topic, channel.as_ref(), &previous.tag).await;
            }
        }

        let binding = bindings.get_mut(&topic)?;

        if self.subscribe(&topic, binding, generation, &channel).await {
            None
        } else {
            Some(generation)
        }
    }

    /// Subscribes every binding that is not yet subscribed on the given
    /// channel generation. Reports whether all of them are subscribed now.
    pub(crate) async fn resubscribe_all(&self, generation: u64, channel: &Arc<dyn Channel>) -> bool {
        let mut bindings = self.bindings.lock().await;
        let mut subscribed = 0usize;
        let mut failed = 0usize;

        for (topic, binding) in bindings.iter_mut() {
            let is_outdated = binding
                .subscription
                .as_ref()
                .is_none_or(|subscription| subscription.generation < generation);
            if !is_outdated {
                continue;
            }

            if self.subscribe(topic, binding, generation, channel).await {
                subscribed += 1;
            } else {
                failed += 1;
            }
        }

        info!(
            client = self.context.name.as_ref(),
            identifier = self.context.identifier.as_ref(),
            bindings = bindings.len(),
            subscribed,
            failed,
            "Re-established consumer subscriptions",
        );

        failed == 0
    }

    /// Declares the topic's queue and subscribes the binding's handler to it.
    /// Failures are reported and counted; the binding stays unsubscribed
    /// until the next connect. Reports whether subscribing worked.
    async fn subscribe(
        &self,
        topic: &Arc<str>,
        binding: &mut Binding,
        generation: u64,
        channel: &Arc<dyn Channel>,
    ) -> bool {
        match self.try_subscribe(topic, binding, channel).await {
            Ok(tag) => {
                debug!(
                    client = self.context.name.as_ref(),
                    topic = topic.as_ref(),
                    tag = tag.as_str(),
                    generation,
                    "Subscribed to a topic",
                );
                binding.subscription = Some(Subscription { generation, tag });
                true
            }
            Err(error) => {
                self.context.metrics.record_error();
                error!(
                    client = self.context.name.as_ref(),
                    topic = topic.as_ref(),
                    generation,
                    ?error,
                    error_message = %error,
                    "Failed to subscribe to a topic; will retry after reconnecting",
                );
                binding.subscription = None;
                false
            }
        }
    }

    async fn try_subscribe(
        &self,
        topic: &Arc<str>,
        binding: &Binding,
        channel: &Arc<dyn Channel>,
    ) -> Result<SubscriptionTag, TransportError> {
        channel
            .declare_queue(topic, QueueOptions::ephemeral())
            .await?;

        let callback = dispatch::callback(
            Arc::clone(&self.context),
            Arc::clone(topic),
            Arc::clone(&binding.handler),
            Arc::downgrade(channel),
        );

        channel.subscribe(topic, callback).await
    }

    async fn cancel(&self, topic: &str, channel: &dyn Channel, tag: &SubscriptionTag) {
        match channel.cancel(tag).await {
            Ok(()) => debug!(
                client = self.context.name.as_ref(),
                topic,
                tag = tag.as_str(),
                "Cancelled the replaced subscription",
            ),
            Err(error) => warn!(
                client = self.context.name.as_ref(),
                topic,
                tag = tag.as_str(),
                ?error,
                error_message = %error,
                "Failed to cancel the replaced subscription",
            ),
        }
    }
}
