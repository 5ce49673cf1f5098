use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Where the coordinator is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ConnectionStatus {
    /// No transport is held
    Disconnected,

    /// A transport is being opened
    Connecting,

    /// A transport and a client built on it are available
    Ready,

    /// The last connection attempt failed
    Failed,
}

/// The transport and client pair owned by the coordinator.
///
/// The client of `Ready` is always built on the transport stored next to it.
pub(crate) enum Connection<T, C> {
    Disconnected,
    Ready { transport: Arc<T>, client: Arc<C> },
    Failed(Error),
}

impl<T, C> Connection<T, C> {
    pub(crate) fn status(&self) -> ConnectionStatus {
        match self {
            Connection::Disconnected => ConnectionStatus::Disconnected,
            Connection::Ready { .. } => ConnectionStatus::Ready,
            Connection::Failed(_) => ConnectionStatus::Failed,
        }
    }

    pub(crate) fn client(&self) -> Option<Arc<C>> {
        match self {
            Connection::Ready { client, .. } => Some(client.clone()),
            _ => None,
        }
    }

    pub(crate) fn error(&self) -> Option<&Error> {
        match self {
            Connection::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Leaves the slot disconnected, returning the transport that must be closed, if any
    pub(crate) fn take_transport(&mut self) -> Option<Arc<T>> {
        match std::mem::replace(self, Connection::Disconnected) {
            Connection::Ready { transport, .. } => Some(transport),
            _ => None,
        }
    }
}
