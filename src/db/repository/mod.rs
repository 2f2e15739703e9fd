pub mod history;
pub mod queue;

pub use history::DeliveryLogRepository;
pub use queue::{ExpiredTask, QueueRepository};
