//! The guarded invocation runtime: every call to an external travel-data
//! provider passes through validation, rate limiting, an approval gate for
//! side-effecting actions, a fail-open response cache, and primary/secondary
//! transport dispatch with bounded retries — in that order, with side
//! effects confined to the success path.
//!
//! Wiring is explicit: construct a [`pipeline::GuardedPipeline`] from a
//! [`config::RuntimeConfig`], a [`tool::ToolRegistry`], a
//! [`dispatch::FallbackDispatcher`] over two [`transport`]s, an optional
//! key-value backend and an [`audit::AuditTrail`]. Multi-item requests go
//! through [`batch::BatchRunner`].

pub mod approval;
pub mod audit;
pub mod batch;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod limiter;
pub mod pipeline;
pub mod retry;
pub mod tool;
pub mod transport;
