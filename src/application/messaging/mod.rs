//! Messaging - Event bus, middleware and command line parsing

pub mod bus;
pub mod middleware;
pub mod parser;

pub use bus::{BusStats, EventBus};
pub use middleware::{
    EventContext, EventMiddleware, LoggingMiddleware, MiddlewareChain, MiddlewareError,
    MiddlewareResult, Next, TransformMiddleware,
};
pub use parser::{CommandLine, CommandParser};
