//! Script port - one compiled automation unit.
//!
//! Scripts are ordinary Rust types collected in a `ScriptCatalog`. The
//! orchestrator hands each one its own `ScriptContext` and runs all of them
//! concurrently.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ToolboxError;
use crate::orchestrator::ScriptContext;

/// A script body.
///
/// # Example
/// ```ignore
/// struct Heartbeat;
///
/// #[async_trait]
/// impl Script for Heartbeat {
///     async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError> {
///         let clock = ctx.require::<Clock>("clock").await?;
///         ctx.connect().await?;
///         ctx.send(&clock.tick_frame()).await?;
///         ctx.disconnect().await
///     }
/// }
/// ```
#[async_trait]
pub trait Script: Send + Sync {
    async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError>;
}

/// Adapter turning an async closure into a `Script`.
pub struct FnScript<F> {
    body: F,
}

#[async_trait]
impl<F, Fut> Script for FnScript<F>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ToolboxError>> + Send + 'static,
{
    async fn run(&self, ctx: ScriptContext) -> Result<(), ToolboxError> {
        (self.body)(ctx).await
    }
}

pub fn script_fn<F, Fut>(body: F) -> Arc<dyn Script>
where
    F: Fn(ScriptContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ToolboxError>> + Send + 'static,
{
    Arc::new(FnScript { body })
}
