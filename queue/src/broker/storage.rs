use super::{Broker, Config};
use crate::{metrics::Metrics, Error, Generator, Id, Message, Queue};
use commonware_codec::{Decode, Encode, RangeCfg};
use prometheus_client::registry::Registry;
use std::{
    marker::PhantomData,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// A [Queue] over an external [Broker].
///
/// The broker owns delivery state, so nothing is tracked in flight here. See the
/// [module documentation](super) for which operations are supported.
pub struct BrokerQueue<B: Broker, I: Id> {
    broker: B,
    cfg: Config,
    generator: Generator,
    metrics: Metrics,
    _id: PhantomData<fn() -> I>,
}

impl<B: Broker, I: Id> BrokerQueue<B, I> {
    /// Wrap `broker`, registering metrics with `registry`.
    pub fn init(registry: &mut Registry, broker: B, cfg: Config) -> Self {
        Self {
            broker,
            cfg,
            generator: Generator::new(),
            metrics: Metrics::init(registry),
            _id: PhantomData,
        }
    }

    /// The wrapped broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    fn id_of(&self, message: &Message<I>) -> I {
        message
            .id()
            .cloned()
            .unwrap_or_else(|| I::generate(&self.generator))
    }

    fn publish(&self, message: &Message<I>) -> Result<(), Error> {
        self.broker.put(message.encode().freeze())
    }
}

impl<B: Broker, I: Id> Queue<I> for BrokerQueue<B, I> {
    fn queue(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.enqueued(self.id_of(message), SystemTime::now());
        self.publish(&message)?;
        debug!(id = ?message.id(), "published message");
        self.metrics.queued.inc();
        Ok(())
    }

    fn take(&self) -> Result<Option<Message<I>>, Error> {
        let Some(payload) = self.broker.poll(self.cfg.poll_timeout)? else {
            return Ok(None);
        };
        let message = Message::decode_cfg(payload, &RangeCfg::from(..=self.cfg.max_payload))?;
        self.metrics.taken.inc();
        Ok(Some(message))
    }

    fn finish(&self, _: &Message<I>) -> Result<(), Error> {
        Ok(())
    }

    fn requeue(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.requeued(self.id_of(message), SystemTime::now());
        self.publish(&message)?;
        debug!(id = ?message.id(), requeues = message.num_requeues(), "republished message");
        self.metrics.requeued.inc();
        Ok(())
    }

    fn requeue_silent(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.requeued_silently(self.id_of(message), SystemTime::now());
        self.publish(&message)?;
        self.metrics.requeued.inc();
        Ok(())
    }

    fn orphans(&self, _: Duration) -> Result<Option<Vec<Message<I>>>, Error> {
        Ok(None)
    }

    fn move_to_queue(&self, _: &Message<I>) -> Result<bool, Error> {
        Err(Error::Unsupported("move_to_queue"))
    }

    fn queue_size(&self) -> Result<Option<usize>, Error> {
        Ok(None)
    }

    fn ephemeral_size(&self) -> Result<Option<usize>, Error> {
        Ok(None)
    }
}
