pub mod account;
pub mod warmup_log;

pub use account::{EmailProvider, ReceiverAccount, SenderAccount};
pub use warmup_log::{NewWarmupLog, WarmupLog, WarmupStatus};
