use anyhow::{
    Error,
    Result,
};
use tokio::sync::watch;

/// A single-fulfillment signal that any number of waiters can observe.
///
/// The signal holds no value until it is fulfilled. Fulfillment is first-writer-wins: later
/// attempts are no-ops. Receivers that subscribe after fulfillment resolve immediately.
#[derive(Debug)]
pub struct Signal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Signal<T>
where
    T: Clone,
{
    /// Creates a new, unfulfilled signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Fulfills the signal, waking all waiters.
    ///
    /// Returns false if the signal was already fulfilled, in which case the value is dropped.
    pub fn fulfill(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(value);
                true
            }
        })
    }

    /// Whether the signal has been fulfilled.
    pub fn fulfilled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Subscribes a new receiver to the signal.
    pub fn subscribe(&self) -> SignalReceiver<T> {
        SignalReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Default for Signal<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of a [`Signal`].
#[derive(Debug, Clone)]
pub struct SignalReceiver<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> SignalReceiver<T>
where
    T: Clone,
{
    /// Waits until the signal is fulfilled and returns its value.
    ///
    /// A fulfilled signal resolves immediately, even if the sender has since been dropped. Fails
    /// only if the sender was dropped before fulfillment.
    pub async fn wait(&mut self) -> Result<T> {
        let value = self
            .rx
            .wait_for(|value| value.is_some())
            .await
            .map_err(|_| Error::msg("signal dropped before fulfillment"))?;
        match value.as_ref() {
            Some(value) => Ok(value.clone()),
            None => Err(Error::msg("signal dropped before fulfillment")),
        }
    }

    /// The fulfilled value, if any, without waiting.
    pub fn value(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}
