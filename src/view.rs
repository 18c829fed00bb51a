//! Environment projection of a typed context that has no backing environment.
//!
//! A host that builds its own [`FeatureMap`](crate::FeatureMap) has no
//! environment for untyped middleware to share. [`project`] synthesizes one
//! from the context's features, and [`store`] writes whatever the untyped
//! side changed back through the feature setters. Encoding goes through a
//! [`FeatureAdapter`] over the projected map, so both directions agree with
//! the adapter's key layout.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::adapter::FeatureAdapter;
use crate::cancellation::CancellationToken;
use crate::context::HttpContext;
use crate::environment::Environment;
use crate::error::Error;
use crate::feature::{ConnectionFeature, RequestFeature, ResponseFeature, TlsFeature};
use crate::keys;
use crate::value::{LoadClientCertFn, SendFileFn, Value};

/// Contract version written to projected environments.
pub const CONTRACT_VERSION: &str = "1.0";

/// Builds a fresh environment over `ctx`.
pub fn project(ctx: &HttpContext) -> Environment {
    let env = Environment::new();
    env.insert(keys::OWIN_VERSION, CONTRACT_VERSION);
    load(ctx, &env);
    install_delegates(ctx, &env);
    env
}

/// Copies the context's current feature values into `env`.
pub fn load(ctx: &HttpContext, env: &Environment) {
    let view = FeatureAdapter::new(env.clone());

    if let Ok(request) = ctx.request() {
        RequestFeature::set_protocol(&view, &request.protocol());
        RequestFeature::set_scheme(&view, &request.scheme());
        RequestFeature::set_method(&view, &request.method());
        RequestFeature::set_path_base(&view, &request.path_base());
        RequestFeature::set_path(&view, &request.path());
        RequestFeature::set_query_string(&view, &request.query_string());
        if let Some(headers) = request.headers() {
            RequestFeature::set_headers(&view, headers);
        }
        if let Some(body) = request.body() {
            RequestFeature::set_body(&view, body);
        }
    }

    if let Ok(response) = ctx.response() {
        ResponseFeature::set_status_code(&view, response.status_code());
        ResponseFeature::set_reason_phrase(&view, &response.reason_phrase());
        if let Some(headers) = response.headers() {
            ResponseFeature::set_headers(&view, headers);
        }
        if let Some(body) = response.body() {
            ResponseFeature::set_body(&view, body);
        }
    }

    if let Ok(connection) = ctx.connection() {
        if let Some(addr) = connection.remote_ip_address() {
            view.set_remote_ip_address(addr);
        }
        if let Some(addr) = connection.local_ip_address() {
            view.set_local_ip_address(addr);
        }
        view.set_remote_port(connection.remote_port());
        view.set_local_port(connection.local_port());
        view.set_is_local(connection.is_local());
    }

    if let Ok(tls) = ctx.tls() {
        if let Some(cert) = tls.client_certificate() {
            view.set_client_certificate(cert);
        }
    }
}

/// Writes the entries present in `env` back into the context's features.
///
/// Keys the environment does not carry leave the feature untouched.
pub fn store(env: &Environment, ctx: &HttpContext) {
    let view = FeatureAdapter::new(env.clone());
    let has = |key: &str| env.has_non_null(key);

    if let Ok(request) = ctx.request() {
        if has(keys::REQUEST_PROTOCOL) {
            request.set_protocol(&RequestFeature::protocol(&view));
        }
        if has(keys::REQUEST_SCHEME) {
            request.set_scheme(&view.scheme());
        }
        if has(keys::REQUEST_METHOD) {
            request.set_method(&view.method());
        }
        if has(keys::REQUEST_PATH_BASE) {
            request.set_path_base(&view.path_base());
        }
        if has(keys::REQUEST_PATH) {
            request.set_path(&view.path());
        }
        if has(keys::REQUEST_QUERY_STRING) {
            request.set_query_string(&view.query_string());
        }
        if let Some(headers) = RequestFeature::headers(&view) {
            request.set_headers(headers);
        }
        if let Some(body) = RequestFeature::body(&view) {
            request.set_body(body);
        }
    }

    if let Ok(response) = ctx.response() {
        if has(keys::RESPONSE_STATUS_CODE) {
            response.set_status_code(view.status_code());
        }
        if has(keys::RESPONSE_REASON_PHRASE) {
            response.set_reason_phrase(&view.reason_phrase());
        }
        if let Some(headers) = ResponseFeature::headers(&view) {
            response.set_headers(headers);
        }
        if let Some(body) = ResponseFeature::body(&view) {
            response.set_body(body);
        }
    }

    if let Ok(connection) = ctx.connection() {
        if let Some(addr) = view.remote_ip_address() {
            connection.set_remote_ip_address(addr);
        }
        if let Some(addr) = view.local_ip_address() {
            connection.set_local_ip_address(addr);
        }
        if has(keys::REMOTE_PORT) {
            connection.set_remote_port(view.remote_port());
        }
        if has(keys::LOCAL_PORT) {
            connection.set_local_port(view.local_port());
        }
        if has(keys::IS_LOCAL) {
            connection.set_is_local(view.is_local());
        }
    }

    if let Ok(tls) = ctx.tls() {
        if let Some(cert) = view.client_certificate() {
            tls.set_client_certificate(cert);
        }
    }
}

fn install_delegates(ctx: &HttpContext, env: &Environment) {
    if ctx.response().is_ok() {
        let ctx = ctx.clone();
        env.insert(
            keys::ON_SENDING_HEADERS,
            Value::on_sending_headers(move |callback, state| {
                ctx.response()?.on_sending_headers(callback, state)
            }),
        );
    }

    if ctx.send_file().is_ok() {
        let ctx = ctx.clone();
        let send: SendFileFn = Arc::new(
            move |path: String, offset: u64, length: Option<u64>, cancel: CancellationToken| {
                match ctx
                    .send_file()
                    .and_then(|feature| feature.send_file(&path, offset, length, cancel))
                {
                    Ok(transfer) => transfer,
                    Err(e) => failed(e.into()),
                }
            },
        );
        env.insert(keys::SEND_FILE_ASYNC, Value::SendFile(send));
    }

    if ctx.tls().is_ok() {
        let ctx = ctx.clone();
        let load: LoadClientCertFn = Arc::new(move || {
            match ctx.tls().and_then(|tls| tls.load_client_certificate()) {
                Ok(loading) => loading,
                Err(e) => failed(e.into()),
            }
        });
        env.insert(keys::LOAD_CLIENT_CERT_ASYNC, Value::LoadClientCertificate(load));
    }
}

fn failed(err: Error) -> BoxFuture<'static, Result<(), Error>> {
    future::ready(Err(err)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::executor::block_on;

    use crate::error::FeatureErrorKind;
    use crate::feature::{FeatureCollection, FeatureKind, FeatureMap, FeatureProvider};
    use crate::value::{ClientCertificate, Headers, OnSendingHeadersFn};

    /// A native host context: features backed by an environment the bridge
    /// cannot see, registered without the environment feature.
    fn native(host: &Environment) -> HttpContext {
        let adapter = FeatureAdapter::new(host.clone());
        let kinds = adapter.keys();
        let provider: Arc<dyn FeatureProvider> = Arc::new(adapter);
        let map = kinds
            .into_iter()
            .filter(|kind| *kind != FeatureKind::Environment)
            .fold(FeatureMap::new(), |map, kind| map.with(kind, provider.clone()));
        HttpContext::new(map)
    }

    #[test]
    fn project_loads_features_and_version() {
        let host = Environment::new();
        host.insert(keys::REQUEST_METHOD, "PUT");
        host.insert(keys::REQUEST_PATH, "/files/1");
        host.insert(keys::RESPONSE_STATUS_CODE, 201_i64);
        host.insert(keys::REMOTE_IP_ADDRESS, "10.0.0.7");
        host.insert(keys::LOCAL_PORT, "9001");
        let ctx = native(&host);

        let env = project(&ctx);

        assert!(!env.ptr_eq(&host));
        assert_eq!(env.get_as::<String>(keys::OWIN_VERSION).as_deref(), Some("1.0"));
        assert_eq!(env.get_as::<String>(keys::REQUEST_METHOD).as_deref(), Some("PUT"));
        assert_eq!(env.get_as::<String>(keys::REQUEST_PATH).as_deref(), Some("/files/1"));
        assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(201));
        assert_eq!(env.get_as::<String>(keys::REMOTE_IP_ADDRESS).as_deref(), Some("10.0.0.7"));
        assert_eq!(env.get_as::<String>(keys::LOCAL_PORT).as_deref(), Some("9001"));
    }

    #[test]
    fn project_shares_headers_by_reference() {
        let host = Environment::new();
        let headers = Headers::new();
        host.insert(keys::REQUEST_HEADERS, headers.clone());

        let env = project(&native(&host));
        env.get_as::<Headers>(keys::REQUEST_HEADERS)
            .unwrap()
            .append("X-Trace", "1");

        assert_eq!(headers.get_first("x-trace").as_deref(), Some("1"));
    }

    #[test]
    fn store_writes_changes_back() {
        let host = Environment::new();
        host.insert(keys::REQUEST_PATH, "/before");
        let ctx = native(&host);
        let env = project(&ctx);

        env.insert(keys::REQUEST_PATH, "/after");
        env.insert(keys::RESPONSE_STATUS_CODE, 418_i64);
        env.insert(keys::REMOTE_IP_ADDRESS, "192.168.1.2");
        env.insert(keys::IS_LOCAL, true);
        store(&env, &ctx);

        let connection = ctx.connection().unwrap();
        assert_eq!(ctx.request().unwrap().path(), "/after");
        assert_eq!(ctx.response().unwrap().status_code(), 418);
        assert_eq!(
            connection.remote_ip_address(),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)))
        );
        assert!(connection.is_local());
    }

    #[test]
    fn store_leaves_absent_keys_alone() {
        let host = Environment::new();
        host.insert(keys::REQUEST_METHOD, "GET");
        let ctx = native(&host);

        store(&Environment::new(), &ctx);

        assert_eq!(ctx.request().unwrap().method(), "GET");
    }

    #[test]
    fn delegates_forward_to_features() {
        let host = Environment::new();
        let sent = Arc::new(AtomicBool::new(false));
        let flag = sent.clone();
        host.insert(
            keys::SEND_FILE_ASYNC,
            Value::send_file(move |path, _, _, _| {
                let flag = flag.clone();
                async move {
                    assert_eq!(path, "/tmp/a.bin");
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let env = project(&native(&host));

        let send = env.get_as::<SendFileFn>(keys::SEND_FILE_ASYNC).unwrap();
        block_on(send("/tmp/a.bin".into(), 0, None, CancellationToken::new())).unwrap();

        assert!(sent.load(Ordering::SeqCst));
    }

    #[test]
    fn on_sending_headers_delegate_surfaces_unsupported() {
        let env = project(&native(&Environment::new()));

        let register = env.get_as::<OnSendingHeadersFn>(keys::ON_SENDING_HEADERS).unwrap();
        let err = register(Box::new(|_| {}), None).unwrap_err();

        assert_eq!(err.feature_kind(), Some(FeatureErrorKind::UnsupportedOperation));
    }

    #[test]
    fn delegates_are_omitted_for_missing_features() {
        let env = project(&native(&Environment::new()));

        assert!(!env.contains_key(keys::SEND_FILE_ASYNC));
        assert!(!env.contains_key(keys::LOAD_CLIENT_CERT_ASYNC));
    }

    #[test]
    fn tls_certificate_and_loader_are_projected() {
        let host = Environment::new();
        host.insert(keys::REQUEST_SCHEME, "https");
        host.insert(keys::CLIENT_CERTIFICATE, ClientCertificate::new(vec![0x30, 0x82]));
        let env = project(&native(&host));

        assert_eq!(
            env.get_as::<ClientCertificate>(keys::CLIENT_CERTIFICATE),
            Some(ClientCertificate::new(vec![0x30, 0x82]))
        );
        let load = env.get_as::<LoadClientCertFn>(keys::LOAD_CLIENT_CERT_ASYNC).unwrap();
        let err = block_on(load()).unwrap_err();
        assert_eq!(err.feature_kind(), Some(FeatureErrorKind::NotImplemented));
    }

    #[test]
    fn empty_registry_projects_only_version() {
        let env = project(&HttpContext::new(FeatureMap::new()));

        assert_eq!(env.keys(), vec![keys::OWIN_VERSION.to_string()]);
    }
}
