//! Interop between a dictionary-based HTTP middleware model and a typed
//! feature-based one.
//!
//! Two pipeline models share one process:
//! - **Environment pipeline**: each request is an [`Environment`], a shared
//!   string-keyed map whose key vocabulary lives in [`keys`]
//! - **Typed pipeline**: each request is an [`HttpContext`] that discovers
//!   its capabilities through a [`FeatureCollection`]
//!
//! The bridge lets middleware written for either model run inside the
//! other without copying request state.
//!
//! # Core Types
//!
//! - [`FeatureAdapter`]: typed features read and written straight through
//!   to an environment
//! - [`environment_to_typed`] / [`typed_to_environment`]: wrap middleware of
//!   one model for use in the other
//! - [`PipelineBuilder`] / [`EnvironmentBuilder`]: minimal pipeline builders
//!   with `use_environment` and `use_pipeline` sugar
//!
//! # Examples
//!
//! ```
//! use owin_bridge::{app, environment_middleware, keys, Environment, EnvironmentBuilder, PipelineBuilder};
//! use owin_bridge::{FeatureAdapter, HttpContext};
//!
//! // Environment middleware that tags every response.
//! let tag = environment_middleware(|next| {
//!     app(move |env: Environment| {
//!         let next = next.clone();
//!         async move {
//!             env.insert(keys::RESPONSE_REASON_PHRASE, "bridged");
//!             next(env).await
//!         }
//!     })
//! });
//!
//! let mut typed = PipelineBuilder::new();
//! typed.use_environment(tag);
//! let pipeline = typed.build();
//!
//! let env = Environment::new();
//! let ctx = HttpContext::new(FeatureAdapter::new(env.clone()));
//! futures::executor::block_on(pipeline(ctx)).unwrap();
//!
//! assert_eq!(env.get_as::<String>(keys::RESPONSE_REASON_PHRASE).as_deref(), Some("bridged"));
//! assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(404));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod cancellation;
mod compose;
mod context;
mod environment;
mod error;
mod feature;
pub mod keys;
mod logging;
mod pipeline;
mod value;
pub mod view;

pub use adapter::FeatureAdapter;
pub use cancellation::CancellationToken;
pub use compose::{environment_to_typed, typed_pipeline_to_environment, typed_to_environment};
pub use context::HttpContext;
pub use environment::Environment;
pub use error::{BoxError, Error, FeatureError, FeatureErrorKind};
pub use feature::{
    ConnectionFeature, EnvironmentFeature, FeatureCollection, FeatureEntry, FeatureKind,
    FeatureMap, FeatureProvider, RequestFeature, ResponseFeature, SendFileFeature, TlsFeature,
};
pub use logging::Direction;
pub use pipeline::{
    app, environment_middleware, handler, middleware, AppFunc, EnvironmentBuilder,
    EnvironmentMiddleware, HandlerFuture, Middleware, PipelineBuilder, RequestHandler,
};
pub use value::{
    Body, BodyStream, ByteStream, CallbackState, ClientCertificate, FromValue, Headers,
    LoadClientCertFn, OnSendingHeadersFn, SendFileFn, SendFileFuture, SendingHeadersCallback,
    Value,
};
