pub mod accompanist;
pub mod clock;
pub mod differ;
pub mod note;
pub mod oracle;
pub mod scheduler;
pub mod sink;

pub use accompanist::{AccompanistCore, CoreSnapshot, TickOutcome};
pub use scheduler::{AccompanistHandle, TickScheduler};
