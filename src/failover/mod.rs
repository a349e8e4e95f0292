//! Endpoint failover
//!
//! Runs caller-supplied remote operations against one endpoint out of an
//! ordered list. Recoverable failures rotate to the next endpoint and back
//! off; anything else is returned at once. The current endpoint is sticky:
//! a call that succeeds leaves it in place for the next one.
//!
//! One client serializes its own attempts (`execute` takes `&mut self`).
//! Use separate clients for concurrent remote work.

pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Opens connections to one endpoint and judges the errors they produce.
#[async_trait]
pub trait EndpointConnector: Send + Sync {
    /// Live handle handed to each operation
    type Connection: Clone + Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to `endpoint`. Calls made through the connection must give up
    /// after `timeout`.
    async fn connect(&self, endpoint: &str, timeout: Duration) -> Result<Self::Connection, Self::Error>;

    /// Whether trying another endpoint could help.
    fn is_recoverable(&self, error: &Self::Error) -> bool;
}

#[derive(Debug, Error)]
pub enum FailoverError<E> {
    #[error("failover client used before initialize()")]
    NotInitialized,

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("{label} failed on {endpoint} after {attempts} attempt(s): {source}")]
    Operation {
        label: String,
        endpoint: String,
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> FailoverError<E> {
    /// The last error the operation produced, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Operation { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Endpoint list plus timeout and backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverSettings {
    pub endpoints: Vec<String>,
    pub timeout: Duration,
    /// Total attempts per `execute`; twice the endpoint count when unset
    pub max_retries: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
}

impl FailoverSettings {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            timeout: Duration::from_millis(10_000),
            max_retries: None,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5_000),
            jitter: Duration::from_millis(100),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration, jitter: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self.jitter = jitter;
        self
    }

    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries
            .unwrap_or_else(|| (self.endpoints.len() as u32).saturating_mul(2))
            .max(1)
    }

    /// `min(base * 2^attempt + jitter, max)` for the 0-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

pub struct FailoverClient<C: EndpointConnector> {
    connector: C,
    settings: FailoverSettings,
    index: usize,
    connection: Option<C::Connection>,
    initialized: bool,
}

impl<C: EndpointConnector> FailoverClient<C> {
    pub fn new(connector: C, settings: FailoverSettings) -> Self {
        Self {
            connector,
            settings,
            index: 0,
            connection: None,
            initialized: false,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.settings.endpoints
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_endpoint(&self) -> Option<&str> {
        self.settings.endpoints.get(self.index).map(String::as_str)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn settings(&self) -> &FailoverSettings {
        &self.settings
    }

    /// Connect to the first reachable endpoint, starting at the current one.
    ///
    /// Must succeed once before [`execute`](Self::execute) is used.
    pub async fn initialize(&mut self) -> Result<(), FailoverError<C::Error>> {
        let count = self.settings.endpoints.len();
        if count == 0 {
            return Err(FailoverError::NoEndpoints);
        }

        let mut last_error = None;
        for attempt in 1..=count as u32 {
            let endpoint = self.settings.endpoints[self.index].clone();
            match self.connector.connect(&endpoint, self.settings.timeout).await {
                Ok(connection) => {
                    tracing::info!(endpoint = %endpoint, attempt, "Connected to endpoint");
                    self.connection = Some(connection);
                    self.initialized = true;
                    return Ok(());
                }
                Err(e) if !self.connector.is_recoverable(&e) => {
                    return Err(FailoverError::Operation {
                        label: "initialize".to_string(),
                        endpoint,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, attempt, error = %e, "Endpoint unavailable");
                    self.index = (self.index + 1) % count;
                    last_error = Some((endpoint, e));
                }
            }
        }

        match last_error {
            Some((endpoint, source)) => Err(FailoverError::Operation {
                label: "initialize".to_string(),
                endpoint,
                attempts: count as u32,
                source,
            }),
            None => Err(FailoverError::NoEndpoints),
        }
    }

    async fn connection(&mut self, endpoint: &str) -> Result<C::Connection, C::Error> {
        if let Some(connection) = &self.connection {
            return Ok(connection.clone());
        }
        let connection = self.connector.connect(endpoint, self.settings.timeout).await?;
        self.connection = Some(connection.clone());
        Ok(connection)
    }

    fn rotate(&mut self) {
        let count = self.settings.endpoints.len();
        if count > 0 {
            self.index = (self.index + 1) % count;
        }
        self.connection = None;
    }

    /// Run `operation` against the current endpoint, rotating on
    /// recoverable failures until it succeeds or the attempt budget is
    /// spent.
    pub async fn execute<T, F, Fut>(&mut self, label: &str, mut operation: F) -> Result<T, FailoverError<C::Error>>
    where
        F: FnMut(C::Connection) -> Fut,
        Fut: Future<Output = Result<T, C::Error>>,
    {
        if !self.initialized {
            return Err(FailoverError::NotInitialized);
        }
        if self.settings.endpoints.is_empty() {
            return Err(FailoverError::NoEndpoints);
        }

        let max_attempts = self.settings.effective_max_retries();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let endpoint = self.settings.endpoints[self.index].clone();

            let outcome = match self.connection(&endpoint).await {
                Ok(connection) => operation(connection).await,
                Err(e) => Err(e),
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, endpoint = %endpoint, attempt, "Operation succeeded after failover");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !self.connector.is_recoverable(&error) {
                tracing::warn!(
                    label,
                    endpoint = %endpoint,
                    attempt,
                    error = %error,
                    "Operation failed with non-recoverable error"
                );
                return Err(FailoverError::Operation {
                    label: label.to_string(),
                    endpoint,
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                tracing::error!(
                    label,
                    endpoint = %endpoint,
                    attempts = attempt,
                    error = %error,
                    "Operation failed on every attempt"
                );
                return Err(FailoverError::Operation {
                    label: label.to_string(),
                    endpoint,
                    attempts: attempt,
                    source: error,
                });
            }

            self.rotate();
            let delay = self.settings.backoff(attempt - 1);
            tracing::warn!(
                label,
                from = %endpoint,
                to = %self.settings.endpoints[self.index],
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Switching endpoint after recoverable error"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Error, Clone, PartialEq)]
    enum FakeError {
        #[error("node down")]
        Down,
        #[error("bad request")]
        Rejected,
    }

    #[derive(Default)]
    struct FakeConnector {
        refuse: Vec<&'static str>,
        connects: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EndpointConnector for FakeConnector {
        type Connection = String;
        type Error = FakeError;

        async fn connect(&self, endpoint: &str, _timeout: Duration) -> Result<String, FakeError> {
            self.connects.lock().unwrap().push(endpoint.to_string());
            if self.refuse.iter().any(|r| *r == endpoint) {
                return Err(FakeError::Down);
            }
            Ok(endpoint.to_string())
        }

        fn is_recoverable(&self, error: &FakeError) -> bool {
            matches!(error, FakeError::Down)
        }
    }

    fn settings() -> FailoverSettings {
        FailoverSettings::new(["a", "b", "c"])
    }

    #[test]
    fn backoff_is_capped() {
        let settings = settings();
        let first = settings.backoff(0);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(600));
        assert_eq!(settings.backoff(10), Duration::from_millis(5_000));
        assert_eq!(settings.effective_max_retries(), 6);
    }

    #[tokio::test]
    async fn execute_requires_initialize() {
        let mut client = FailoverClient::new(FakeConnector::default(), settings());
        let err = client
            .execute("noop", |_conn: String| async { Ok::<_, FakeError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::NotInitialized));
    }

    #[tokio::test]
    async fn initialize_without_endpoints_fails() {
        let mut client = FailoverClient::new(FakeConnector::default(), FailoverSettings::new(Vec::<String>::new()));
        assert!(matches!(client.initialize().await, Err(FailoverError::NoEndpoints)));
    }

    #[tokio::test]
    async fn initialize_skips_unreachable_endpoints() {
        let connector = FakeConnector {
            refuse: vec!["a"],
            ..FakeConnector::default()
        };
        let mut client = FailoverClient::new(connector, settings());
        client.initialize().await.unwrap();
        assert_eq!(client.current_endpoint(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_until_success_and_stays_there() {
        let mut client = FailoverClient::new(FakeConnector::default(), settings());
        client.initialize().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let result = client
            .execute("submit", |conn: String| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(conn.clone());
                    if conn == "c" {
                        Ok(42)
                    } else {
                        Err(FakeError::Down)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(client.current_endpoint(), Some("c"));

        // sticky: the next call starts on c
        let next = client
            .execute("submit", |conn: String| async move { Ok::<_, FakeError>(conn) })
            .await
            .unwrap();
        assert_eq!(next, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn non_recoverable_error_is_returned_at_once() {
        let mut client = FailoverClient::new(FakeConnector::default(), settings());
        client.initialize().await.unwrap();

        let mut calls = 0;
        let err = client
            .execute("submit", |_conn: String| {
                calls += 1;
                async { Err::<(), _>(FakeError::Rejected) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.attempts(), 1);
        assert_eq!(client.current_endpoint(), Some("a"));
        assert_eq!(err.into_source(), Some(FakeError::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_returns_last_error() {
        let mut client = FailoverClient::new(FakeConnector::default(), settings().with_max_retries(4));
        client.initialize().await.unwrap();

        let mut calls = 0;
        let err = client
            .execute("submit", |_conn: String| {
                calls += 1;
                async { Err::<(), _>(FakeError::Down) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 4);
        match err {
            FailoverError::Operation { endpoint, attempts, .. } => {
                assert_eq!(attempts, 4);
                // a, b, c, a
                assert_eq!(endpoint, "a");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_rotation() {
        let connects = Arc::new(Mutex::new(Vec::new()));
        let connector = FakeConnector {
            refuse: vec!["b"],
            connects: Arc::clone(&connects),
        };
        let mut client = FailoverClient::new(connector, settings());
        client.initialize().await.unwrap();

        let value = client
            .execute("submit", |conn: String| async move {
                if conn == "a" {
                    Err(FakeError::Down)
                } else {
                    Ok(conn)
                }
            })
            .await
            .unwrap();

        // a fails, connecting to b fails, c works
        assert_eq!(value, "c");
        assert_eq!(*connects.lock().unwrap(), vec!["a", "b", "c"]);
    }
}
