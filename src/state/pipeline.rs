//! State-Pipeline Evaluator.
//!
//! # Responsibilities
//! - Run each state API of a forwarder in declared order
//! - Gate calls with `pre` expressions, judge results with `post`
//! - Stop the whole request when an expression answers with a status
//!
//! # Design Decisions
//! - Per state API: Idle → PreEvaluating → (Skipped | Calling) →
//!   PostEvaluating → Done; a status from pre or post aborts the pipeline
//! - Expression and call failures are logged and recorded, never fatal
//! - A `pre` expression that fails to evaluate counts as `false`: the
//!   API's call and its `post` expressions are skipped, even when an
//!   earlier `pre` marked it to run, and the next API proceeds
//! - State APIs never run concurrently within one request

use crate::expression::{Expression, Value};
use crate::observability::metrics;
use crate::state::api::StateApi;
use crate::state::client::StateTransport;
use crate::state::outcome::{PostOutcome, PreOutcome};
use crate::state::scope::{EvaluationScope, StateApiScope, StateRecord};

/// Result of running the pipeline for one request.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every state API completed; forward the request with this scope.
    Proceed(StateApiScope),
    /// An expression answered with `status`; the backend is not contacted.
    Abort {
        status: u16,
        state_api: String,
        scope: StateApiScope,
    },
}

impl PipelineOutcome {
    pub fn scope(&self) -> &StateApiScope {
        match self {
            PipelineOutcome::Proceed(scope) | PipelineOutcome::Abort { scope, .. } => scope,
        }
    }
}

fn scope_for(api: &StateApi, states: &StateApiScope, error: Value, request: &Value, response: &Value) -> EvaluationScope {
    EvaluationScope {
        data: api.data.clone(),
        error,
        request: request.clone(),
        response: response.clone(),
        state_api: states.get(&api.name).map(StateRecord::to_value).unwrap_or_default(),
        state_apis: states.to_value(),
    }
}

fn evaluate(expression: &Expression, scope: &EvaluationScope, api: &str, phase: &str, index: usize) -> Option<Value> {
    match scope.evaluate(expression) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(
                state_api = api,
                phase,
                index = index + 1,
                error = %error,
                "State API expression failed"
            );
            None
        }
    }
}

/// Run `apis` in order against `request`/`response`.
pub async fn run<T: StateTransport>(
    transport: &T,
    apis: &[StateApi],
    request: &Value,
    response: &Value,
) -> PipelineOutcome {
    let mut states = StateApiScope::default();

    for api in apis {
        states.insert(&api.name, StateRecord::new(api.configuration(None)));

        // Pre-evaluation: decide whether to call.
        let mut use_api = false;
        for (index, expression) in api.pre.iter().enumerate() {
            let scope = scope_for(api, &states, Value::Null, request, response);
            let outcome = match evaluate(expression, &scope, &api.name, "pre", index) {
                Some(value) => PreOutcome::from(&value),
                None => PreOutcome::Skip,
            };
            match outcome {
                PreOutcome::Respond(status) => {
                    tracing::info!(state_api = %api.name, status, "Request aborted by state API");
                    metrics::record_state_api_call("aborted");
                    return PipelineOutcome::Abort { status, state_api: api.name.clone(), scope: states };
                }
                PreOutcome::Break => break,
                PreOutcome::Use => use_api = true,
                PreOutcome::Skip => {
                    use_api = false;
                    break;
                }
                PreOutcome::Continue => {}
            }
        }

        if !use_api {
            tracing::debug!(state_api = %api.name, "Skipping state API");
            metrics::record_state_api_call("skipped");
            continue;
        }

        // Call.
        let url = match &api.url_expression {
            Some(expression) => {
                let scope = scope_for(api, &states, Value::Null, request, response);
                match evaluate(expression, &scope, &api.name, "url", 0) {
                    Some(Value::Null) | None => api.url.clone(),
                    Some(value) => Some(value.to_string()),
                }
            }
            None => api.url.clone(),
        };

        let mut record = StateRecord::new(api.configuration(url.as_deref()));
        match url {
            Some(url) => {
                tracing::info!(state_api = %api.name, url = %url, "Using state API");
                let result = transport.call(&url, &api.options).await;
                record.response = result.response;
                if let Some(error) = result.error {
                    tracing::warn!(state_api = %api.name, error = %error, "State API call failed");
                    record.error = Some(error.to_string());
                }
            }
            None => record.error = Some("state api has no url".to_string()),
        }
        metrics::record_state_api_call(if record.error.is_some() { "failed" } else { "called" });
        let error = Value::from(record.error.clone());
        states.insert(&api.name, record);

        // Post-evaluation: decide whether to continue.
        for (index, expression) in api.post.iter().enumerate() {
            let scope = scope_for(api, &states, error.clone(), request, response);
            let Some(value) = evaluate(expression, &scope, &api.name, "post", index) else {
                continue;
            };
            match PostOutcome::from(&value) {
                PostOutcome::Respond(status) => {
                    tracing::info!(state_api = %api.name, status, "Request aborted by state API");
                    metrics::record_state_api_call("aborted");
                    return PipelineOutcome::Abort { status, state_api: api.name.clone(), scope: states };
                }
                PostOutcome::Break => break,
                PostOutcome::Continue => {}
            }
        }
    }

    PipelineOutcome::Proceed(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use crate::state::api::RequestOptions;
    use crate::state::client::{CallResult, StateCallError};
    use crate::state::scope::{StateResponse, EVALUATION_SCOPE_NAMES};

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StateTransport for FakeTransport {
        async fn call(&self, url: &str, _options: &RequestOptions) -> CallResult {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail {
                let source = url::Url::parse("::").unwrap_err();
                return CallResult {
                    response: None,
                    error: Some(StateCallError::InvalidUrl { url: url.to_string(), source }),
                };
            }
            CallResult {
                response: Some(StateResponse {
                    status: 200,
                    headers: BTreeMap::new(),
                    data: Value::from(serde_json::json!({"score": 0.2, "url": url})),
                }),
                error: None,
            }
        }
    }

    fn api(name: &str, pre: &[&str], post: &[&str]) -> StateApi {
        let compile = |s: &&str| Expression::compile(s, &EVALUATION_SCOPE_NAMES).unwrap();
        StateApi {
            name: name.to_string(),
            url: Some(format!("http://state.local/{name}")),
            url_expression: None,
            options: RequestOptions::default(),
            pre: pre.iter().map(compile).collect(),
            post: post.iter().map(compile).collect(),
            data: Value::from(serde_json::json!({"threshold": 0.5})),
        }
    }

    fn request() -> Value {
        Value::from(serde_json::json!({"path": "/login", "headers": {}}))
    }

    #[tokio::test]
    async fn pre_status_stops_everything() {
        let transport = FakeTransport::default();
        let apis = [api("first", &["403"], &[]), api("second", &["true"], &[])];
        let outcome = run(&transport, &apis, &request(), &Value::Null).await;
        assert!(matches!(outcome, PipelineOutcome::Abort { status: 403, ref state_api, .. } if state_api == "first"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn pre_false_skips_only_that_api() {
        let transport = FakeTransport::default();
        let apis = [
            api("first", &["true", "false"], &["500"]),
            api("second", &["true"], &[]),
        ];
        let outcome = run(&transport, &apis, &request(), &Value::Null).await;
        assert!(matches!(outcome, PipelineOutcome::Proceed(_)));
        assert_eq!(transport.calls(), vec!["http://state.local/second"]);
    }

    #[tokio::test]
    async fn break_stops_pre_chain_without_calling() {
        let transport = FakeTransport::default();
        let apis = [api("only", &["'break'", "true"], &[])];
        run(&transport, &apis, &request(), &Value::Null).await;
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn post_sees_response_and_can_abort() {
        let transport = FakeTransport::default();
        let apis = [
            api(
                "captcha",
                &["request.path === '/login'", "true"],
                &["stateAPI.response.data.score < data.threshold ? 403 : null"],
            ),
            api("later", &["true"], &[]),
        ];
        let outcome = run(&transport, &apis, &request(), &Value::Null).await;
        assert!(matches!(outcome, PipelineOutcome::Abort { status: 403, .. }));
        assert_eq!(transport.calls(), vec!["http://state.local/captcha"]);
    }

    #[tokio::test]
    async fn call_errors_are_visible_to_post() {
        let transport = FakeTransport { fail: true, ..Default::default() };
        let apis = [api("check", &["true"], &["error ? 502 : null"])];
        let outcome = run(&transport, &apis, &request(), &Value::Null).await;
        assert!(matches!(outcome, PipelineOutcome::Abort { status: 502, .. }));
        assert!(outcome.scope().get("check").unwrap().error.is_some());
    }

    #[tokio::test]
    async fn url_expression_and_scope_accumulate() {
        let transport = FakeTransport::default();
        let mut first = api("first", &["true"], &[]);
        first.url_expression = Some(
            Expression::compile("`http://state.local/dynamic${request.path}`", &EVALUATION_SCOPE_NAMES).unwrap(),
        );
        let second = api("second", &["stateAPIs.first.response.status === 200"], &[]);
        let outcome = run(&transport, &[first, second], &request(), &Value::Null).await;

        let PipelineOutcome::Proceed(scope) = outcome else { panic!("expected proceed") };
        assert_eq!(
            transport.calls(),
            vec!["http://state.local/dynamic/login", "http://state.local/second"]
        );
        let first = scope.get("first").unwrap();
        assert_eq!(
            first.configuration.get("url").and_then(Value::as_str),
            Some("http://state.local/dynamic/login")
        );
    }

    #[tokio::test]
    async fn failing_pre_expression_skips_the_api() {
        let transport = FakeTransport::default();
        let apis = [
            api("check", &["true", "request.nothing.here", "true"], &["500"]),
            api("next", &["true"], &[]),
        ];
        let outcome = run(&transport, &apis, &request(), &Value::Null).await;
        assert!(matches!(outcome, PipelineOutcome::Proceed(_)));
        assert_eq!(transport.calls(), vec!["http://state.local/next"]);
    }
}
