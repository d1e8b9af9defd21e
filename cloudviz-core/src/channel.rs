use std::fmt;

use cloudviz_model::StatusUpdate;

use crate::job::{JobFailure, UpdateSource};
use crate::transport::TransportError;

/// What the poller and push channel report to their coordinator.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Update {
        source: UpdateSource,
        update: StatusUpdate,
    },
    /// The poller gave up; the coordinator fails the job with this.
    PollFailed(JobFailure),
    /// The push connection is gone. `None` when the server closed it cleanly
    /// before a terminal event.
    PushLost { error: Option<TransportError> },
}

/// Which activity a finished task was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Poll,
    Push,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Poll => f.write_str("poll"),
            ChannelKind::Push => f.write_str("push"),
        }
    }
}

/// How a channel task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelExit {
    /// Delivered a terminal status.
    Terminal,
    /// Stopped by its cancellation token.
    Cancelled,
    /// Reported a failure to the coordinator.
    Failed,
    /// The coordinator stopped listening.
    Closed,
}
