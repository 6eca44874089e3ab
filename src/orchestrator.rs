// src/orchestrator.rs
//! Turns one prompt into at most one request against the inference service
//! and records what came back in the session's conversation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chart::ChartBinder;
use crate::conversation::Turn;
use crate::data_types::{typed_records, Dataset};
use crate::error::TransportError;
use crate::query_client::{QueryReply, QueryRequest, QueryTransport};
use crate::session::Session;

pub const NO_DATASET_MESSAGE: &str = "Please insert a CSV file to continue.";
pub const CANCELLED_MESSAGE: &str = "Request cancelled.";
pub const FETCH_ERROR_PREFIX: &str = "Error fetching data: ";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How a call to [`QueryOrchestrator::send`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty prompt; nothing appended.
    Ignored,
    /// Another request is in flight; nothing appended.
    Busy,
    /// Prompt recorded, but there is no dataset to ask about.
    NoDataset,
    /// The service reported an error for this prompt.
    Rejected,
    /// A chart turn was appended.
    Charted,
    /// Transport, status, decode or timeout failure.
    Failed,
    /// The caller cancelled while the request was in flight.
    Cancelled,
}

pub struct QueryOrchestrator {
    transport: Arc<dyn QueryTransport>,
    request_timeout: Duration,
    sample_limit: Option<usize>,
}

impl QueryOrchestrator {
    pub fn new(transport: Arc<dyn QueryTransport>) -> Self {
        QueryOrchestrator {
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sample_limit: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Send only the first `limit` typed rows as the sample. Charts still bind every row.
    pub fn with_sample_limit(mut self, limit: Option<usize>) -> Self {
        self.sample_limit = limit;
        self
    }

    pub async fn send(&self, session: &Session, prompt: &str) -> SendOutcome {
        self.send_with_cancel(session, prompt, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), with a token that aborts the in-flight request.
    ///
    /// At most one request runs per session. A call made while another is
    /// `Sending` returns [`SendOutcome::Busy`] without touching the log.
    pub async fn send_with_cancel(
        &self,
        session: &Session,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> SendOutcome {
        if prompt.is_empty() {
            return SendOutcome::Ignored;
        }

        let Some(_guard) = session.try_begin_request() else {
            warn!("prompt refused: a request is already in flight");
            return SendOutcome::Busy;
        };

        let log = session.log();
        log.append(Turn::UserText(prompt.to_string()));

        let Some(dataset) = session.dataset() else {
            log.append(Turn::SystemText(NO_DATASET_MESSAGE.to_string()));
            return SendOutcome::NoDataset;
        };

        let request = self.build_request(prompt, &dataset);
        info!(
            prompt_len = prompt.len(),
            sample_rows = request.sample.len(),
            "sending query"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("query cancelled");
                log.append(Turn::SystemText(CANCELLED_MESSAGE.to_string()));
                return SendOutcome::Cancelled;
            }
            result = tokio::time::timeout(self.request_timeout, self.transport.query(&request)) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout(self.request_timeout)))
            }
        };

        match result.and_then(QueryReply::from_body) {
            Err(err) => {
                warn!(error = ?err, "query failed");
                log.append(Turn::SystemText(format!("{FETCH_ERROR_PREFIX}{err}")));
                SendOutcome::Failed
            }
            Ok(QueryReply::Rejected { error }) => {
                debug!(%error, "service rejected prompt");
                log.append(Turn::SystemText(error));
                SendOutcome::Rejected
            }
            Ok(QueryReply::Chart { description, spec }) => {
                if let Some(description) = description {
                    log.append(Turn::SystemText(description));
                }
                let bound = ChartBinder::bind(&spec, dataset.columns(), dataset.typed_rows());
                log.append(Turn::SystemChart(Arc::new(bound)));
                debug!("chart appended");
                SendOutcome::Charted
            }
        }
    }

    fn build_request(&self, prompt: &str, dataset: &Dataset) -> QueryRequest {
        let rows = dataset.typed_rows();
        let rows = match self.sample_limit {
            Some(limit) => &rows[..limit.min(rows.len())],
            None => rows,
        };
        QueryRequest {
            prompt: prompt.to_string(),
            headers: dataset.columns().to_vec(),
            sample: typed_records(dataset.columns(), rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    use crate::data_types::Upload;
    use crate::session::RequestState;

    /// Replays canned results and records every request.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Value, TransportError>>>,
        requests: Mutex<Vec<QueryRequest>>,
    }

    impl Scripted {
        fn with(reply: Result<Value, TransportError>) -> Arc<Self> {
            let s = Scripted::default();
            s.replies.lock().unwrap().push_back(reply);
            Arc::new(s)
        }

        fn requests(&self) -> Vec<QueryRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryTransport for Scripted {
        async fn query(&self, request: &QueryRequest) -> Result<Value, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("no scripted reply".into())))
        }
    }

    /// Holds every request open until released.
    #[derive(Default)]
    struct Gated {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl QueryTransport for Gated {
        async fn query(&self, _request: &QueryRequest) -> Result<Value, TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(json!({"response": {"mark": "bar"}}))
        }
    }

    struct Stalled;

    #[async_trait]
    impl QueryTransport for Stalled {
        async fn query(&self, _request: &QueryRequest) -> Result<Value, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({"response": {}}))
        }
    }

    fn loaded_session(body: &str) -> Arc<Session> {
        let session = Arc::new(Session::new());
        session
            .upload(&Upload::new("d.csv", "text/csv", body.as_bytes().to_vec()))
            .unwrap();
        session
    }

    const CSV: &str = "region,sales\nnorth,10\nsouth,\n";

    #[tokio::test]
    async fn empty_prompt_is_a_no_op() {
        let transport = Scripted::with(Ok(json!({"response": {}})));
        let orch = QueryOrchestrator::new(transport.clone());
        let session = loaded_session(CSV);

        assert_eq!(orch.send(&session, "").await, SendOutcome::Ignored);
        assert!(session.log().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn no_dataset_appends_user_and_hint_without_request() {
        let transport = Scripted::with(Ok(json!({"response": {}})));
        let orch = QueryOrchestrator::new(transport.clone());
        let session = Session::new();

        assert_eq!(orch.send(&session, "plot it").await, SendOutcome::NoDataset);
        assert_eq!(
            session.log().snapshot(),
            vec![
                Turn::UserText("plot it".into()),
                Turn::SystemText(NO_DATASET_MESSAGE.into()),
            ]
        );
        assert!(transport.requests().is_empty());
        assert_eq!(session.request_state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn request_carries_prompt_headers_and_typed_sample() {
        let transport = Scripted::with(Ok(json!({"response": {"mark": "bar"}})));
        let orch = QueryOrchestrator::new(transport.clone());
        let session = loaded_session(CSV);

        orch.send(&session, "sales by region").await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "sales by region");
        assert_eq!(requests[0].headers, vec!["region", "sales"]);
        assert_eq!(
            requests[0].sample,
            vec![
                json!({"region": "north", "sales": 10}),
                json!({"region": "south", "sales": null}),
            ]
        );
    }

    #[tokio::test]
    async fn chart_reply_binds_current_typed_rows() {
        let transport = Scripted::with(Ok(json!({
            "response": {"mark": "bar", "encoding": {"x": {"field": "region"}}}
        })));
        let orch = QueryOrchestrator::new(transport);
        let session = loaded_session(CSV);

        assert_eq!(orch.send(&session, "bar chart").await, SendOutcome::Charted);

        let turns = session.log().snapshot();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::UserText("bar chart".into()));
        let Turn::SystemChart(spec) = &turns[1] else {
            panic!("expected chart, got {:?}", turns[1]);
        };
        let expected = session.dataset().unwrap().typed_records();
        assert_eq!(spec.values().unwrap(), expected.as_slice());
        assert_eq!(spec.as_json()["mark"], "bar");
        assert_eq!(session.request_state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn error_reply_suppresses_chart() {
        let transport = Scripted::with(Ok(json!({
            "response": {"error": "bad prompt", "description": "x", "mark": "bar"}
        })));
        let orch = QueryOrchestrator::new(transport);
        let session = loaded_session(CSV);

        assert_eq!(orch.send(&session, "tell me a joke").await, SendOutcome::Rejected);
        assert_eq!(
            session.log().snapshot(),
            vec![
                Turn::UserText("tell me a joke".into()),
                Turn::SystemText("bad prompt".into()),
            ]
        );
    }

    #[tokio::test]
    async fn description_precedes_chart() {
        let transport = Scripted::with(Ok(json!({
            "response": {"description": "Sales per region", "mark": "bar"}
        })));
        let orch = QueryOrchestrator::new(transport);
        let session = loaded_session(CSV);

        orch.send(&session, "bar").await;
        let turns = session.log().snapshot();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1], Turn::SystemText("Sales per region".into()));
        assert!(matches!(turns[2], Turn::SystemChart(_)));
    }

    #[tokio::test]
    async fn transport_failures_become_fetch_errors() {
        let cases = [
            (
                Err(TransportError::Network("connection refused".into())),
                "Error fetching data: connection refused",
            ),
            (
                Err(TransportError::Status(500)),
                "Error fetching data: Network response failed.",
            ),
            (
                Ok(json!({"unexpected": true})),
                "Error fetching data: response body has no `response` object",
            ),
        ];
        for (reply, expected) in cases {
            let orch = QueryOrchestrator::new(Scripted::with(reply));
            let session = loaded_session(CSV);
            assert_eq!(orch.send(&session, "q").await, SendOutcome::Failed);
            let turns = session.log().snapshot();
            assert_eq!(turns.last(), Some(&Turn::SystemText(expected.into())));
            assert_eq!(session.request_state(), RequestState::Idle);
        }
    }

    #[tokio::test]
    async fn second_send_while_sending_is_refused() {
        let transport = Arc::new(Gated::default());
        let orch = Arc::new(QueryOrchestrator::new(transport.clone()));
        let session = loaded_session(CSV);

        let first = {
            let orch = Arc::clone(&orch);
            let session = Arc::clone(&session);
            tokio::spawn(async move { orch.send(&session, "first").await })
        };
        transport.entered.notified().await;
        assert_eq!(session.request_state(), RequestState::Sending);

        assert_eq!(orch.send(&session, "second").await, SendOutcome::Busy);
        assert_eq!(session.log().snapshot(), vec![Turn::UserText("first".into())]);

        transport.release.notify_one();
        assert_eq!(first.await.unwrap(), SendOutcome::Charted);
        assert_eq!(session.request_state(), RequestState::Idle);

        let texts: Vec<_> = session.log().snapshot().iter().filter(|t| t.is_user()).cloned().collect();
        assert_eq!(texts, vec![Turn::UserText("first".into())]);
    }

    #[tokio::test]
    async fn in_flight_request_keeps_its_dataset_snapshot() {
        let transport = Arc::new(Gated::default());
        let orch = Arc::new(QueryOrchestrator::new(transport.clone()));
        let session = loaded_session(CSV);
        let original = session.dataset().unwrap().typed_records();

        let task = {
            let orch = Arc::clone(&orch);
            let session = Arc::clone(&session);
            tokio::spawn(async move { orch.send(&session, "chart").await })
        };
        transport.entered.notified().await;
        session
            .upload(&Upload::new("n.csv", "text/csv", b"other\n1\n".to_vec()))
            .unwrap();
        transport.release.notify_one();
        task.await.unwrap();

        let turns = session.log().snapshot();
        let Some(Turn::SystemChart(spec)) = turns.last() else {
            panic!("expected chart");
        };
        assert_eq!(spec.values().unwrap(), original.as_slice());
    }

    #[tokio::test]
    async fn timeout_appends_terminal_turn() {
        let orch = QueryOrchestrator::new(Arc::new(Stalled))
            .with_request_timeout(Duration::from_millis(20));
        let session = loaded_session(CSV);

        assert_eq!(orch.send(&session, "slow").await, SendOutcome::Failed);
        assert_eq!(
            session.log().snapshot().last(),
            Some(&Turn::SystemText(
                "Error fetching data: request timed out after 20ms".into()
            ))
        );
        assert_eq!(session.request_state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn cancellation_appends_terminal_turn() {
        let transport = Arc::new(Gated::default());
        let orch = Arc::new(QueryOrchestrator::new(transport.clone()));
        let session = loaded_session(CSV);
        let token = CancellationToken::new();

        let task = {
            let orch = Arc::clone(&orch);
            let session = Arc::clone(&session);
            let token = token.clone();
            tokio::spawn(async move { orch.send_with_cancel(&session, "q", &token).await })
        };
        transport.entered.notified().await;
        token.cancel();

        assert_eq!(task.await.unwrap(), SendOutcome::Cancelled);
        assert_eq!(
            session.log().snapshot(),
            vec![
                Turn::UserText("q".into()),
                Turn::SystemText(CANCELLED_MESSAGE.into()),
            ]
        );
        assert_eq!(session.request_state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn sample_limit_trims_request_but_not_chart() {
        let transport = Scripted::with(Ok(json!({"response": {"mark": "bar"}})));
        let orch = QueryOrchestrator::new(transport.clone()).with_sample_limit(Some(1));
        let session = loaded_session(CSV);

        orch.send(&session, "bar").await;
        assert_eq!(transport.requests()[0].sample.len(), 1);
        let turns = session.log().snapshot();
        let Some(Turn::SystemChart(spec)) = turns.last() else {
            panic!("expected chart");
        };
        assert_eq!(spec.values().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn parse_failure_then_send_behaves_as_no_dataset() {
        let transport = Scripted::with(Ok(json!({"response": {"mark": "bar"}})));
        let orch = QueryOrchestrator::new(transport.clone());
        let session = loaded_session(CSV);
        session
            .upload(&Upload::new("bad.csv", "text/csv", b"a,b\n1\n".to_vec()))
            .unwrap_err();

        assert_eq!(orch.send(&session, "chart").await, SendOutcome::NoDataset);
        assert!(transport.requests().is_empty());
    }
}
