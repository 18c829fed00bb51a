//! Composers that let each pipeline model host middleware of the other.
//!
//! Crossing from the typed model into the environment model reuses the
//! environment behind the context when there is one, and projects a fresh
//! one otherwise. Crossing back wraps the environment in a
//! [`FeatureAdapter`]. A request that goes environment → typed → environment
//! therefore arrives with the very same [`Environment`] handle it left with.
//!
//! # Examples
//!
//! ```
//! use owin_bridge::{handler, keys, Environment, EnvironmentBuilder, HttpContext};
//!
//! let mut builder = EnvironmentBuilder::new();
//! builder.use_pipeline_with(|typed| {
//!     typed.run(handler(|ctx: HttpContext| async move {
//!         ctx.response()?.set_status_code(204);
//!         Ok(())
//!     }));
//! });
//! let pipeline = builder.build();
//!
//! let env = Environment::new();
//! futures::executor::block_on(pipeline(env.clone())).unwrap();
//! assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(204));
//! ```

use std::sync::Arc;

use futures::future;
use futures::FutureExt;
use tracing::Instrument;

use crate::adapter::FeatureAdapter;
use crate::context::HttpContext;
use crate::environment::Environment;
use crate::error::FeatureError;
use crate::logging::{crossing_span, Direction};
use crate::pipeline::{
    AppFunc, EnvironmentBuilder, EnvironmentMiddleware, Middleware, PipelineBuilder,
    RequestHandler,
};
use crate::view;

/// Runs environment middleware inside a typed pipeline.
///
/// The typed context is parked in the environment's context slot for the
/// duration of the request so the exit stage can hand it to the typed
/// `next`. The slot is not an entry, so environment middleware see exactly
/// the entries the caller put in. The previous occupant is restored when the
/// request finishes, fails or is dropped.
pub fn environment_to_typed(middleware: EnvironmentMiddleware) -> Middleware {
    Arc::new(move |next: RequestHandler| -> RequestHandler {
        let entry = middleware(typed_exit(next));
        Arc::new(move |ctx: HttpContext| {
            let entry = entry.clone();
            let (env, projected) = match ctx.environment() {
                Ok(env) => (env, false),
                Err(_) => (view::project(&ctx), true),
            };
            let span = crossing_span(Direction::EnvironmentToTyped, &env);
            async move {
                let result = {
                    let _slot = ContextSlot::stash(&env, &ctx);
                    entry(env.clone()).await
                };
                if projected {
                    view::store(&env, &ctx);
                }
                result
            }
            .instrument(span)
            .boxed()
        })
    })
}

/// Runs typed middleware inside an environment pipeline.
pub fn typed_to_environment(middleware: Middleware) -> EnvironmentMiddleware {
    Arc::new(move |next: AppFunc| typed_entry(middleware(environment_exit(next))))
}

/// Runs a whole typed pipeline inside an environment pipeline.
///
/// `configure` runs once, here. Each `next` the result is applied to gets
/// its own compiled copy of the pipeline with `next` as the last stage.
pub fn typed_pipeline_to_environment<F>(configure: F) -> EnvironmentMiddleware
where
    F: FnOnce(&mut PipelineBuilder),
{
    let mut builder = PipelineBuilder::new();
    configure(&mut builder);
    Arc::new(move |next: AppFunc| typed_entry(builder.build_with(environment_exit(next))))
}

impl PipelineBuilder {
    /// Appends environment middleware.
    pub fn use_environment(&mut self, middleware: EnvironmentMiddleware) -> &mut Self {
        self.use_middleware(environment_to_typed(middleware))
    }

    /// Appends a chain of environment middleware configured by `configure`.
    ///
    /// The chain crosses into the environment model once, however many
    /// stages it has.
    pub fn use_environment_chain<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut EnvironmentBuilder),
    {
        let mut chain = EnvironmentBuilder::new();
        configure(&mut chain);
        self.use_environment(Arc::new(move |next: AppFunc| chain.build_with(next)))
    }
}

impl EnvironmentBuilder {
    /// Appends typed middleware.
    pub fn use_pipeline(&mut self, middleware: Middleware) -> &mut Self {
        self.use_middleware(typed_to_environment(middleware))
    }

    /// Appends a typed pipeline configured by `configure`.
    pub fn use_pipeline_with<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        self.use_middleware(typed_pipeline_to_environment(configure))
    }
}

/// Last environment stage before control returns to the typed `next`.
fn typed_exit(next: RequestHandler) -> AppFunc {
    Arc::new(move |env: Environment| {
        let next = next.clone();
        async move {
            let ctx = env
                .context()
                .ok_or_else(|| FeatureError::key_not_found(Environment::CONTEXT_SLOT))?;
            let projected = ctx.environment().is_err();
            if projected {
                view::store(&env, &ctx);
            }
            let result = next(ctx.clone()).await;
            if projected {
                view::load(&ctx, &env);
            }
            result
        }
        .boxed()
    })
}

/// Last typed stage before control returns to the environment `next`.
fn environment_exit(next: AppFunc) -> RequestHandler {
    Arc::new(move |ctx: HttpContext| match ctx.environment() {
        Ok(env) => next(env),
        Err(e) => future::ready(Err(e.into())).boxed(),
    })
}

fn typed_entry(entry: RequestHandler) -> AppFunc {
    Arc::new(move |env: Environment| {
        let span = crossing_span(Direction::TypedToEnvironment, &env);
        entry(HttpContext::new(FeatureAdapter::new(env)))
            .instrument(span)
            .boxed()
    })
}

/// Holds a context in the environment's context slot until dropped.
///
/// The parked context may hold the environment itself through its features,
/// so it must not outlive the request.
struct ContextSlot {
    env: Environment,
    previous: Option<HttpContext>,
}

impl ContextSlot {
    fn stash(env: &Environment, ctx: &HttpContext) -> Self {
        let previous = env.replace_context(Some(ctx.clone()));
        Self {
            env: env.clone(),
            previous,
        }
    }
}

impl Drop for ContextSlot {
    fn drop(&mut self) {
        self.env.replace_context(self.previous.take());
    }
}
