//! Output side of the bridge: the bounded event queue, the poster thread
//! draining it and the sink events are posted to

pub mod poster;
pub mod queue;
pub mod sink;

pub use poster::{PostStats, Poster};
pub use queue::{bounded, EventQueue, QueueReceiver, QueueStats};
pub use sink::{NotificationSink, SinkError, SupervisorSink};
