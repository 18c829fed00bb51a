use std::fmt;

use tracing::Span;

use crate::environment::Environment;
use crate::keys;

/// Which way a request crosses between the two pipeline models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Environment middleware running inside a typed pipeline
    EnvironmentToTyped,
    /// Typed middleware running inside an environment pipeline
    TypedToEnvironment,
}

impl Direction {
    /// Field value recorded on crossing spans.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::EnvironmentToTyped => "environment_to_typed",
            Direction::TypedToEnvironment => "typed_to_environment",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Span covering one request while it runs on the far side of a crossing.
///
/// Method and path are read once from `env` when the span is created. Header
/// and body contents are never recorded.
pub(crate) fn crossing_span(direction: Direction, env: &Environment) -> Span {
    let method = env.get_as::<String>(keys::REQUEST_METHOD).unwrap_or_default();
    let path = env.get_as::<String>(keys::REQUEST_PATH).unwrap_or_default();
    tracing::debug_span!(
        "pipeline_crossing",
        direction = direction.as_str(),
        method = %method,
        path = %path
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::format::FmtSpan;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn crossing_span_records_direction_method_and_path() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_span_events(FmtSpan::NEW)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let env = Environment::new();
        env.insert(keys::REQUEST_METHOD, "GET");
        env.insert(keys::REQUEST_PATH, "/orders");

        tracing::subscriber::with_default(subscriber, || {
            let _span = crossing_span(Direction::TypedToEnvironment, &env);
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("pipeline_crossing"));
        assert!(output.contains("typed_to_environment"));
        assert!(output.contains("method=GET"));
        assert!(output.contains("path=/orders"));
    }

    #[test]
    fn direction_names() {
        assert_eq!(Direction::EnvironmentToTyped.to_string(), "environment_to_typed");
        assert_eq!(Direction::TypedToEnvironment.as_str(), "typed_to_environment");
    }
}
