use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::executor::block_on;
use owin_bridge::{
    app, environment_middleware, environment_to_typed, handler, keys, middleware,
    typed_to_environment, CancellationToken, Environment, EnvironmentBuilder, FeatureAdapter,
    FeatureCollection, FeatureErrorKind, FeatureKind, FeatureMap, FeatureProvider, Headers,
    HttpContext, PipelineBuilder, SendFileFeature, Value,
};

#[test]
fn identity_round_trip_delivers_original_environment() {
    let identity = environment_middleware(|next| next);
    let bridged = typed_to_environment(environment_to_typed(identity));

    let delivered = Arc::new(Mutex::new(None));
    let sink = delivered.clone();
    let terminal = app(move |env: Environment| {
        *sink.lock().unwrap() = Some(env);
        async { Ok(()) }
    });

    let env = Environment::new();
    env.insert(keys::REQUEST_METHOD, "GET");
    env.insert(keys::REQUEST_PATH, "/health");
    block_on(bridged(terminal)(env.clone())).unwrap();

    let delivered = delivered.lock().unwrap().take().unwrap();
    assert!(delivered.ptr_eq(&env));
    assert_eq!(delivered.get_as::<String>(keys::REQUEST_PATH).as_deref(), Some("/health"));
    // The context slot does not leak out of the request
    assert!(env.context().is_none());
}

#[test]
fn crossing_adds_no_entries_visible_to_environment_middleware() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = seen.clone();
    let snapshot = environment_middleware(move |next| {
        let seen = inner.clone();
        app(move |env: Environment| {
            let mut keys = env.keys();
            keys.sort();
            seen.lock().unwrap().push(keys);
            next(env)
        })
    });
    let bridged = typed_to_environment(environment_to_typed(snapshot));

    let env = Environment::new();
    env.insert(keys::REQUEST_METHOD, "GET");
    env.insert(keys::REQUEST_PATH, "/health");
    let mut before = env.keys();
    before.sort();

    block_on(bridged(app(|_env: Environment| async { Ok(()) }))(env.clone())).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![before.clone()]);
    let mut after = env.keys();
    after.sort();
    assert_eq!(after, before);
}

#[test]
fn typed_handler_answers_environment_host() {
    let mut host = EnvironmentBuilder::new();
    host.use_pipeline_with(|typed| {
        typed.run(handler(|ctx: HttpContext| async move {
            let request = ctx.request()?;
            let response = ctx.response()?;
            if request.method() == "GET" && request.path() == "/hello" {
                response.set_status_code(200);
                if let Some(headers) = response.headers() {
                    headers.append("Content-Type", "text/plain");
                }
            } else {
                response.set_status_code(405);
            }
            Ok(())
        }));
    });
    let pipeline = host.build();

    let env = Environment::new();
    let response_headers = Headers::new();
    env.insert(keys::REQUEST_METHOD, "GET");
    env.insert(keys::REQUEST_PATH, "/hello");
    env.insert(keys::RESPONSE_HEADERS, response_headers.clone());
    block_on(pipeline(env.clone())).unwrap();

    assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(200));
    assert_eq!(response_headers.get_first("content-type").as_deref(), Some("text/plain"));
}

#[test]
fn environment_middleware_inside_native_host() {
    // A host registry without the environment pass-through
    let backing = Environment::new();
    backing.insert(keys::REQUEST_PATH, "/legacy/report");
    let provider: Arc<dyn FeatureProvider> = Arc::new(FeatureAdapter::new(backing.clone()));
    let features = FeatureMap::new()
        .with(FeatureKind::Request, provider.clone())
        .with(FeatureKind::Response, provider);
    let ctx = HttpContext::new(features);

    let strip_prefix = environment_middleware(|next| {
        app(move |env: Environment| {
            let next = next.clone();
            async move {
                let path = env.get_as::<String>(keys::REQUEST_PATH).unwrap_or_default();
                if let Some(rest) = path.strip_prefix("/legacy") {
                    env.insert(keys::REQUEST_PATH_BASE, "/legacy");
                    env.insert(keys::REQUEST_PATH, rest);
                }
                next(env).await
            }
        })
    });

    let mut typed = PipelineBuilder::new();
    typed.use_environment(strip_prefix);
    let pipeline = typed.build_with(handler(|ctx: HttpContext| async move {
        let request = ctx.request()?;
        assert_eq!(request.path_base(), "/legacy");
        assert_eq!(request.path(), "/report");
        ctx.response()?.set_status_code(200);
        Ok(())
    }));

    block_on(pipeline(ctx)).unwrap();

    assert_eq!(backing.get_as::<String>(keys::REQUEST_PATH).as_deref(), Some("/report"));
    assert_eq!(backing.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(200));
}

#[test]
fn send_file_reaches_host_delegate_through_both_crossings() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();

    let env = Environment::new();
    env.insert(
        keys::SEND_FILE_ASYNC,
        Value::send_file(move |path, offset, length, cancel: CancellationToken| {
            log.lock().unwrap().push((path, offset, length, cancel.is_cancelled()));
            async { Ok(()) }
        }),
    );

    let mut host = EnvironmentBuilder::new();
    host.use_pipeline(middleware(|_next| {
        handler(|ctx: HttpContext| async move {
            ctx.send_file()?
                .send_file("/srv/index.html", 16, Some(128), CancellationToken::new())?
                .await
        })
    }));
    block_on(host.build()(env)).unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![("/srv/index.html".to_string(), 16, Some(128), false)]
    );
}

#[test]
fn conditional_features_follow_environment() {
    let env = Environment::new();
    let adapter = FeatureAdapter::new(env.clone());

    let keys_now = |a: &FeatureAdapter| a.keys().into_iter().collect::<HashSet<_>>();
    let base: HashSet<_> = [
        FeatureKind::Request,
        FeatureKind::Response,
        FeatureKind::Connection,
        FeatureKind::Environment,
    ]
    .into_iter()
    .collect();
    assert_eq!(keys_now(&adapter), base);

    env.insert(keys::REQUEST_SCHEME, "HTTPS");
    env.insert(keys::LOAD_CLIENT_CERT_ASYNC, Value::load_client_certificate(|| async { Ok(()) }));
    assert!(adapter.contains_key(FeatureKind::Tls));

    env.insert(keys::REQUEST_SCHEME, "http");
    assert!(!adapter.contains_key(FeatureKind::Tls));

    let err = adapter
        .send_file("/a", 0, None, CancellationToken::new())
        .err()
        .unwrap();
    assert_eq!(err.kind, FeatureErrorKind::UnsupportedOperation);
}

#[test]
fn registry_view_rejects_mutation() {
    let mut adapter = FeatureAdapter::new(Environment::new());
    let other: Arc<dyn FeatureProvider> = Arc::new(FeatureAdapter::new(Environment::new()));

    let errors = [
        adapter.insert(FeatureKind::Tls, other.clone()).unwrap_err(),
        adapter.set(FeatureKind::Request, other).unwrap_err(),
        adapter.remove(FeatureKind::Request).unwrap_err(),
        adapter.clear().unwrap_err(),
    ];

    for err in errors {
        assert_eq!(err.kind, FeatureErrorKind::UnsupportedOperation);
    }
    assert!(adapter.is_read_only());
    assert_eq!(adapter.len(), 4);
}

#[test]
fn nested_crossings_complete() {
    // environment -> typed -> environment -> typed, all sharing one map
    let order = Arc::new(Mutex::new(Vec::new()));
    let mark = |name: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
        environment_middleware(move |next| {
            let order = order.clone();
            app(move |env: Environment| {
                order.lock().unwrap().push(name);
                next(env)
            })
        })
    };

    let inner_order = order.clone();
    let mut host = EnvironmentBuilder::new();
    host.use_middleware(mark("outer", order.clone()))
        .use_pipeline_with(move |typed| {
            let deepest = inner_order.clone();
            typed
                .use_environment(mark("middle", inner_order.clone()))
                .use_environment_chain(move |chain| {
                    chain.use_pipeline_with(move |innermost| {
                        innermost.run(handler(move |ctx: HttpContext| {
                            deepest.lock().unwrap().push("innermost");
                            async move {
                                ctx.response()?.set_status_code(204);
                                Ok(())
                            }
                        }));
                    });
                });
        });

    let env = Environment::new();
    block_on(host.build()(env.clone())).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["outer", "middle", "innermost"]);
    assert_eq!(env.get_as::<i64>(keys::RESPONSE_STATUS_CODE), Some(204));
    assert!(env.context().is_none());
}
