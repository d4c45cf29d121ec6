//! The outbound half of the control channel.

use std::sync::Arc;

use crate::domain::switch::SwitchId;
use crate::flow::command::Command;

/// A one-way, non-blocking sink for switch commands.
///
/// `send` must return immediately. There is no acknowledgement: a command for a
/// switch that has gone away is dropped by the implementation.
pub trait ControlChannel: Send + Sync {
    /// Queue `command` for delivery to `switch`.
    fn send(&self, switch: SwitchId, command: Command);
}

impl<T: ControlChannel + ?Sized> ControlChannel for Arc<T> {
    fn send(&self, switch: SwitchId, command: Command) {
        (**self).send(switch, command)
    }
}
