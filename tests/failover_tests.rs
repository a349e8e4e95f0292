//! Failover integration tests

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use thiserror::Error;

    use oracle_feeder::failover::http::EndpointError;
    use oracle_feeder::failover::{EndpointConnector, FailoverClient, FailoverError, FailoverSettings};

    // ============================================================================
    // Test doubles
    // ============================================================================

    #[derive(Debug, Clone, PartialEq, Error)]
    enum NodeError {
        #[error("timeout talking to {0}")]
        Timeout(String),
        #[error("malformed transaction")]
        Malformed,
    }

    /// Connection is just the endpoint name.
    struct NodeConnector;

    #[async_trait]
    impl EndpointConnector for NodeConnector {
        type Connection = String;
        type Error = NodeError;

        async fn connect(&self, endpoint: &str, _timeout: Duration) -> Result<String, NodeError> {
            Ok(endpoint.to_string())
        }

        fn is_recoverable(&self, error: &NodeError) -> bool {
            matches!(error, NodeError::Timeout(_))
        }
    }

    async fn client() -> FailoverClient<NodeConnector> {
        let mut client = FailoverClient::new(NodeConnector, FailoverSettings::new(["A", "B", "C"]));
        client.initialize().await.unwrap();
        client
    }

    // ============================================================================
    // Rotation
    // ============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fails_on_a_and_b_then_sticks_to_c() {
        let mut client = client().await;
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let receipt = client
            .execute("submit_price", |node: String| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.lock().unwrap().push(node.clone());
                    match node.as_str() {
                        "C" => Ok(format!("receipt from {}", node)),
                        _ => Err(NodeError::Timeout(node)),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(receipt, "receipt from C");
        assert_eq!(attempts.lock().unwrap().len(), 3);
        assert_eq!(client.current_endpoint(), Some("C"));
        assert_eq!(client.current_index(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_recoverable_error_skips_other_endpoints() {
        let mut client = client().await;
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let err = client
            .execute("submit_price", |node: String| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.lock().unwrap().push(node);
                    Err::<(), _>(NodeError::Malformed)
                }
            })
            .await
            .unwrap_err();

        assert_eq!(*attempts.lock().unwrap(), vec!["A".to_string()]);
        assert_eq!(client.current_endpoint(), Some("A"));
        assert!(err.to_string().contains("submit_price failed on A after 1 attempt"));
        assert_eq!(err.into_source(), Some(NodeError::Malformed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_budget_is_twice_the_endpoints() {
        let mut client = client().await;
        let mut calls = 0u32;

        let err = client
            .execute("submit_price", |node: String| {
                calls += 1;
                async move { Err::<(), _>(NodeError::Timeout(node)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 6);
        assert_eq!(err.attempts(), 6);
        // last error observed on C after two full cycles
        assert_eq!(err.into_source(), Some(NodeError::Timeout("C".to_string())));
    }

    #[tokio::test]
    async fn test_execute_before_initialize() {
        let mut client = FailoverClient::new(NodeConnector, FailoverSettings::new(["A"]));
        let err = client
            .execute("submit_price", |_node: String| async { Ok::<_, NodeError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::NotInitialized));
    }

    // ============================================================================
    // HTTP endpoint errors
    // ============================================================================

    #[test]
    fn test_http_status_recoverability() {
        assert!(EndpointError::from_status("https://a", 503, "").is_recoverable());
        assert!(EndpointError::from_status("https://a", 429, "").is_recoverable());
        assert!(!EndpointError::from_status("https://a", 400, "invalid signature").is_recoverable());
    }
}
