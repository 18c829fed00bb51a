//! Handler aliases and the two minimal pipeline builders.
//!
//! Both pipeline models compose the same way: a middleware receives the rest
//! of the chain (`next`) and returns the handler for its own stage. The
//! builders here only offer what the composers consume, `use` and `build`.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::HttpContext;
use crate::environment::Environment;
use crate::error::Error;
use crate::keys;

/// Completion of one pipeline stage.
pub type HandlerFuture = BoxFuture<'static, Result<(), Error>>;

/// Terminal handler of the typed pipeline.
pub type RequestHandler = Arc<dyn Fn(HttpContext) -> HandlerFuture + Send + Sync>;

/// Terminal handler of the environment pipeline.
pub type AppFunc = Arc<dyn Fn(Environment) -> HandlerFuture + Send + Sync>;

/// Typed middleware: wraps `next` into the handler for its stage.
pub type Middleware = Arc<dyn Fn(RequestHandler) -> RequestHandler + Send + Sync>;

/// Environment middleware: wraps `next` into the handler for its stage.
pub type EnvironmentMiddleware = Arc<dyn Fn(AppFunc) -> AppFunc + Send + Sync>;

/// Boxes an async closure as a [`RequestHandler`].
pub fn handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Boxes an async closure as an [`AppFunc`].
pub fn app<F, Fut>(f: F) -> AppFunc
where
    F: Fn(Environment) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |env| f(env).boxed())
}

/// Boxes a closure as a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(RequestHandler) -> RequestHandler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Boxes a closure as an [`EnvironmentMiddleware`].
pub fn environment_middleware<F>(f: F) -> EnvironmentMiddleware
where
    F: Fn(AppFunc) -> AppFunc + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builder for a typed pipeline.
///
/// Middleware run in registration order. Building does not consume the
/// builder, so the same configuration can be compiled onto several
/// terminal handlers.
///
/// # Examples
///
/// ```
/// use owin_bridge::{handler, middleware, keys, Environment, FeatureAdapter, HttpContext, PipelineBuilder};
///
/// let mut builder = PipelineBuilder::new();
/// builder.use_middleware(middleware(|next| {
///     handler(move |ctx: HttpContext| {
///         let next = next.clone();
///         async move {
///             ctx.response()?.set_reason_phrase("seen");
///             next(ctx).await
///         }
///     })
/// }));
/// let app = builder.build();
///
/// let env = Environment::new();
/// futures::executor::block_on(app(HttpContext::new(FeatureAdapter::new(env.clone())))).unwrap();
///
/// assert_eq!(env.get_as::<String>(keys::RESPONSE_REASON_PHRASE).as_deref(), Some("seen"));
/// assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(404));
/// ```
#[derive(Clone, Default)]
pub struct PipelineBuilder {
    components: Vec<Middleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.components.push(middleware);
        self
    }

    /// Appends a stage that ignores `next` and always runs `terminal`.
    pub fn run(&mut self, terminal: RequestHandler) -> &mut Self {
        self.use_middleware(Arc::new(move |_next: RequestHandler| terminal.clone()))
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` if no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Compiles the pipeline; unmatched requests get a 404.
    pub fn build(&self) -> RequestHandler {
        self.build_with(not_found())
    }

    /// Compiles the pipeline onto `terminal`.
    pub fn build_with(&self, terminal: RequestHandler) -> RequestHandler {
        self.components
            .iter()
            .rev()
            .fold(terminal, |next, component| component(next))
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("components", &self.components.len())
            .finish()
    }
}

/// Builder for an environment pipeline.
#[derive(Clone, Default)]
pub struct EnvironmentBuilder {
    components: Vec<EnvironmentMiddleware>,
}

impl EnvironmentBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    pub fn use_middleware(&mut self, middleware: EnvironmentMiddleware) -> &mut Self {
        self.components.push(middleware);
        self
    }

    /// Appends a stage that ignores `next` and always runs `terminal`.
    pub fn run(&mut self, terminal: AppFunc) -> &mut Self {
        self.use_middleware(Arc::new(move |_next: AppFunc| terminal.clone()))
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` if no middleware is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Compiles the pipeline; unmatched requests get a 404.
    pub fn build(&self) -> AppFunc {
        self.build_with(app(|env: Environment| async move {
            env.insert(keys::RESPONSE_STATUS_CODE, 404_i64);
            Ok(())
        }))
    }

    /// Compiles the pipeline onto `terminal`.
    pub fn build_with(&self, terminal: AppFunc) -> AppFunc {
        self.components
            .iter()
            .rev()
            .fold(terminal, |next, component| component(next))
    }
}

impl std::fmt::Debug for EnvironmentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentBuilder")
            .field("components", &self.components.len())
            .finish()
    }
}

fn not_found() -> RequestHandler {
    handler(|ctx: HttpContext| async move {
        if let Ok(response) = ctx.response() {
            response.set_status_code(404);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::adapter::FeatureAdapter;
    use crate::feature::FeatureMap;
    use futures::executor::block_on;

    fn tag(log: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Middleware {
        middleware(move |next| {
            let log = log.clone();
            handler(move |ctx| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(name);
                    next(ctx).await
                }
            })
        })
    }

    #[test]
    fn middleware_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = PipelineBuilder::new();
        builder
            .use_middleware(tag(log.clone(), "first"))
            .use_middleware(tag(log.clone(), "second"));

        let app = builder.build();
        block_on(app(HttpContext::new(FeatureMap::new()))).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn default_terminal_sets_not_found() {
        let env = Environment::new();
        let app = PipelineBuilder::new().build();
        block_on(app(HttpContext::new(FeatureAdapter::new(env.clone())))).unwrap();

        assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(404));
    }

    #[test]
    fn default_terminal_tolerates_missing_response() {
        let app = PipelineBuilder::new().build();
        assert!(block_on(app(HttpContext::new(FeatureMap::new()))).is_ok());
    }

    #[test]
    fn run_short_circuits_later_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = PipelineBuilder::new();
        builder
            .run(handler(|_ctx| async { Ok(()) }))
            .use_middleware(tag(log.clone(), "unreachable"));

        block_on(builder.build()(HttpContext::new(FeatureMap::new()))).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn environment_builder_compiles_onto_terminal() {
        let mut builder = EnvironmentBuilder::new();
        builder.use_middleware(environment_middleware(|next| {
            app(move |env: Environment| {
                let next = next.clone();
                async move {
                    env.insert(keys::REQUEST_PATH_BASE, "/base");
                    next(env).await
                }
            })
        }));

        let env = Environment::new();
        block_on(builder.build()(env.clone())).unwrap();

        assert_eq!(env.get_as::<String>(keys::REQUEST_PATH_BASE).as_deref(), Some("/base"));
        assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(404));
    }

    #[test]
    fn errors_propagate_unchanged() {
        let mut builder = EnvironmentBuilder::new();
        builder.run(app(|_env| async { Err(Error::handler("stage failed")) }));

        let err = block_on(builder.build()(Environment::new())).unwrap_err();
        assert_eq!(err.to_string(), "Handler error: stage failed");
    }
}
