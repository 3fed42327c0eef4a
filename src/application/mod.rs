pub mod dispatch;
pub mod error;
pub mod refresh;
pub mod render;
pub mod warmup;
