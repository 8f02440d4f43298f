//! Command execution pipeline.
//!
//! Every externally triggered operation runs as a command:
//!
//! ```text
//! CommandExecutor::execute(op)
//!   -> LogInterceptor
//!   -> TransactionInterceptor   (commit / rollback, deferred listeners)
//!   -> CommandInvoker           (plan op, drain agenda, re-evaluate cases)
//! ```
//!
//! Operations never call each other directly. They plan follow-up work on
//! the context's [`Agenda`], which the invoker drains in FIFO order before
//! the unit of work commits.

pub mod agenda;
pub mod context;
pub mod interceptor;
pub mod invoker;
pub mod transaction;

mod operations;

pub use agenda::{Agenda, Operation};
pub use context::CommandContext;
pub use interceptor::{
    CommandExecutor, CommandExecutorBuilder, CommandInterceptor, LogInterceptor, Next,
};
pub use invoker::CommandInvoker;
pub use transaction::{
    ListenerFailure, TransactionContext, TransactionInterceptor, TransactionListener,
    TransactionPhase,
};
