pub mod config;
pub mod error;
pub mod priority;
pub mod rank;
pub mod stable_queue;

pub use config::{load_dotenv, ContextConfig, SchedulerConfig};
pub use error::CoreError;
pub use priority::{PriorityMap, PriorityOrder};
pub use rank::{Rank, RANK_STEP};
pub use stable_queue::StablePriorityQueue;
