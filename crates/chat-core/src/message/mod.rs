pub mod history;
pub mod types;

pub use history::{context_before, removal_set};
pub use types::{Message, MessageAlternative, Role};
