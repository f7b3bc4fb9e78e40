//! JSON-RPC envelopes and method dispatch (C6).

pub mod message;
mod dispatcher;

pub use dispatcher::dispatch;
pub use message::{Request, Response, ResponseBody};
