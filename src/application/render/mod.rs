//! Page rendering.
//!
//! The engine itself sits behind [`PageRenderer`]; this module only knows how
//! to invoke it for a route, share concurrent invocations, bound their run
//! time, and persist successful output into the render cache.

mod invoker;
mod runtime;
mod types;

pub use invoker::RenderInvoker;
pub use runtime::{InFlightRenders, RenderRole};
pub use types::{PageRenderer, RenderError, RenderRequest};
