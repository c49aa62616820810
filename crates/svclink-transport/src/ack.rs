/// Single-use acknowledgment gate for at-least-once transports.
///
/// Some brokers (AMQP in particular) terminate the connection when the
/// same delivery tag is acknowledged twice. The gate is the correctness
/// boundary: exactly one signal ever reaches the transport binding that
/// owns the delivery handle, no matter how the consumer misbehaves.
use std::sync::Mutex;

use tokio::sync::oneshot;

/// The consumer's verdict on one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSignal {
    /// Processing succeeded — confirm the delivery.
    Ack,
    /// Processing failed. `drop = true` discards the message,
    /// `drop = false` asks the broker to requeue it.
    Nack { drop: bool },
}

/// Attempted to resolve a delivery that is not pending acknowledgment.
#[derive(Debug, thiserror::Error)]
#[error("delivery is not pending acknowledgment")]
pub struct AckMisuse;

/// Mutex-guarded, single-use sender for an [`AckSignal`].
///
/// Created by the transport binding for each delivery that requires manual
/// acknowledgment. The binding keeps the receiving end and performs the
/// transport-specific ack/nack call when the signal arrives.
#[derive(Debug)]
pub struct AckGate {
    tx: Mutex<Option<oneshot::Sender<AckSignal>>>,
}

impl AckGate {
    /// Create a gate and the receiver the transport binding consumes.
    pub fn pair() -> (AckGate, oneshot::Receiver<AckSignal>) {
        let (tx, rx) = oneshot::channel();
        (
            AckGate {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Confirm the delivery. Acking an already-resolved gate is a no-op.
    pub fn ack(&self) {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.take() {
            // Receiver gone means the binding was torn down; nothing to do.
            let _ = tx.send(AckSignal::Ack);
        }
    }

    /// Reject the delivery. Unlike [`ack`](Self::ack), nacking a gate that
    /// was already resolved is a caller bug and surfaces as an error.
    pub fn nack(&self, drop: bool) -> Result<(), AckMisuse> {
        let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.take() {
            Some(tx) => {
                let _ = tx.send(AckSignal::Nack { drop });
                Ok(())
            }
            None => Err(AckMisuse),
        }
    }

    /// Whether the gate still awaits its first resolution.
    pub fn is_pending(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_signals_once() {
        let (gate, rx) = AckGate::pair();
        assert!(gate.is_pending());

        gate.ack();
        assert!(!gate.is_pending());
        assert_eq!(rx.await.unwrap(), AckSignal::Ack);
    }

    #[tokio::test]
    async fn double_ack_is_noop() {
        let (gate, rx) = AckGate::pair();
        gate.ack();
        gate.ack();
        assert_eq!(rx.await.unwrap(), AckSignal::Ack);
    }

    #[tokio::test]
    async fn nack_carries_drop_flag() {
        let (gate, rx) = AckGate::pair();
        gate.nack(true).unwrap();
        assert_eq!(rx.await.unwrap(), AckSignal::Nack { drop: true });

        let (gate, rx) = AckGate::pair();
        gate.nack(false).unwrap();
        assert_eq!(rx.await.unwrap(), AckSignal::Nack { drop: false });
    }

    #[tokio::test]
    async fn nack_after_ack_errors() {
        let (gate, rx) = AckGate::pair();
        gate.ack();
        assert!(gate.nack(true).is_err());
        // Only the original ack crossed the gate.
        assert_eq!(rx.await.unwrap(), AckSignal::Ack);
    }

    #[tokio::test]
    async fn nack_after_nack_errors() {
        let (gate, _rx) = AckGate::pair();
        gate.nack(false).unwrap();
        assert!(gate.nack(false).is_err());
    }

    #[tokio::test]
    async fn ack_after_nack_is_noop() {
        let (gate, rx) = AckGate::pair();
        gate.nack(true).unwrap();
        gate.ack();
        assert_eq!(rx.await.unwrap(), AckSignal::Nack { drop: true });
    }

    #[test]
    fn ack_with_dropped_receiver_does_not_panic() {
        let (gate, rx) = AckGate::pair();
        drop(rx);
        gate.ack();
        assert!(!gate.is_pending());
    }
}
