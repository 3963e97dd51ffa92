pub mod broker;
pub mod controller;
pub mod dead_letter;
pub mod delay_queue;
pub mod retry;

pub use broker::{ChannelBroker, EventBroker, EventPublisher};
pub use controller::PipelineController;
pub use dead_letter::DeadLetterRouter;
pub use delay_queue::RetryQueue;
pub use retry::RetryPolicy;
