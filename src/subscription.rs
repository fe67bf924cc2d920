use crate::error::{BridgeError, Result};
use crate::state::StateChange;
use crate::types::UniqueId;
use serde::Serialize;
use tokio::sync::broadcast;

/// Accepted field change of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateUpdate {
    /// Device the change belongs to
    pub unique_id: UniqueId,

    /// The field replacement that was applied
    pub change: StateChange,
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with [`BridgeError::ConnectionClosed`] once the coordinator is
    /// gone.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BridgeError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                BridgeError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is pending.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BridgeError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(BridgeError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lag_and_close_map_to_errors() {
        let (tx, rx) = broadcast::channel(1);
        let mut receiver = StateReceiver::new(rx);
        assert!(receiver.try_recv().unwrap().is_none());

        for level in [0.1, 0.2] {
            tx.send(StateUpdate {
                unique_id: "tv".into(),
                change: StateChange::VolumeLevel(level),
            })
            .unwrap();
        }
        assert!(matches!(receiver.try_recv(), Err(BridgeError::ChannelError(_))));
        assert_eq!(
            receiver.recv().await.unwrap().change,
            StateChange::VolumeLevel(0.2)
        );

        drop(tx);
        assert!(matches!(receiver.recv().await, Err(BridgeError::ConnectionClosed)));
    }
}
