// ============================================
// Remote Annealing Gateway
// ============================================
//
// Submits the objective to an external annealing service:
//
//   POST {endpoint}/v1/solve
//   Authorization: Bearer <token>
//   { "num_variables", "linear", "quadratic": [[i, j, w]], "offset", "timeout_ms" }
//
// The first entry of `solutions` is taken as the best result.

use super::{Assignment, SolverCredentials, SolverError, SolverGateway};
use crate::services::objective::QuboObjective;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Extra wall-clock allowance over the solver's own budget for the HTTP round trip
const NETWORK_GRACE: Duration = Duration::from_secs(5);

pub struct RemoteAnnealingGateway {
    client: HttpClient,
    endpoint: String,
    network_grace: Duration,
}

#[derive(Debug, Serialize)]
pub(crate) struct SolveRequest<'a> {
    num_variables: usize,
    linear: &'a [f64],
    quadratic: Vec<(usize, usize, f64)>,
    offset: f64,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SolveResponse {
    #[serde(default)]
    solutions: Vec<RemoteSolution>,
}

#[derive(Debug, Deserialize)]
struct RemoteSolution {
    values: Vec<u8>,
    #[serde(default)]
    energy: Option<f64>,
}

impl RemoteAnnealingGateway {
    pub fn new(endpoint: &str) -> Result<Self, SolverError> {
        let client = HttpClient::builder()
            .build()
            .map_err(|e| SolverError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            network_grace: NETWORK_GRACE,
        })
    }

    fn solve_url(&self) -> String {
        format!("{}/v1/solve", self.endpoint)
    }

    pub(crate) fn request_body<'a>(
        objective: &'a QuboObjective,
        timeout: Duration,
    ) -> SolveRequest<'a> {
        SolveRequest {
            num_variables: objective.num_variables(),
            linear: &objective.linear,
            quadratic: objective
                .quadratic
                .iter()
                .map(|t| (t.i, t.j, t.weight))
                .collect(),
            offset: objective.offset,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    fn decode(objective: &QuboObjective, response: SolveResponse) -> Result<Assignment, SolverError> {
        let best = response
            .solutions
            .into_iter()
            .next()
            .ok_or_else(|| SolverError::NoResult("service returned no solutions".to_string()))?;

        if best.values.len() != objective.num_variables() {
            return Err(SolverError::NoResult(format!(
                "expected {} values, got {}",
                objective.num_variables(),
                best.values.len()
            )));
        }

        debug!(energy = ?best.energy, "Remote solution received");

        let bits: Vec<bool> = best.values.iter().map(|v| *v == 1).collect();
        Ok(Assignment::from_bits(&objective.variable_ids, &bits))
    }
}

#[async_trait]
impl SolverGateway for RemoteAnnealingGateway {
    async fn solve(
        &self,
        objective: &QuboObjective,
        credentials: &SolverCredentials,
        timeout: Duration,
    ) -> Result<Assignment, SolverError> {
        if credentials.is_empty() {
            return Err(SolverError::AuthFailure("missing solver token".to_string()));
        }

        let response = self
            .client
            .post(self.solve_url())
            .bearer_auth(&credentials.token)
            .timeout(timeout + self.network_grace)
            .json(&Self::request_body(objective, timeout))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SolverError::Timeout(timeout)
                } else {
                    SolverError::Transport(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(status = %response.status(), "Annealing service rejected token");
                return Err(SolverError::AuthFailure(format!(
                    "service responded {}",
                    response.status()
                )));
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                return Err(SolverError::Timeout(timeout));
            }
            status if !status.is_success() => {
                return Err(SolverError::Transport(format!("service responded {}", status)));
            }
            _ => {}
        }

        let body: SolveResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SolverError::Timeout(timeout)
            } else {
                SolverError::NoResult(format!("invalid response body: {}", e))
            }
        })?;

        Self::decode(objective, body)
    }

    fn name(&self) -> &'static str {
        "remote-annealing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SelectionError;
    use crate::services::objective::{ObjectiveMode, QuadraticTerm};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn objective() -> QuboObjective {
        QuboObjective {
            mode: ObjectiveMode::ColdStart,
            variable_ids: vec![3, 5],
            linear: vec![-1.0, 2.0],
            quadratic: vec![QuadraticTerm {
                i: 0,
                j: 1,
                weight: 0.5,
            }],
            offset: 250.0,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let obj = objective();
        let body =
            serde_json::to_value(RemoteAnnealingGateway::request_body(&obj, Duration::from_millis(3000)))
                .unwrap();

        assert_eq!(body["num_variables"], 2);
        assert_eq!(body["quadratic"][0], serde_json::json!([0, 1, 0.5]));
        assert_eq!(body["timeout_ms"], 3000);
    }

    #[test]
    fn test_decode_takes_first_solution() {
        let response: SolveResponse = serde_json::from_value(serde_json::json!({
            "solutions": [
                {"values": [0, 1], "energy": 1.0},
                {"values": [1, 1], "energy": 2.0}
            ]
        }))
        .unwrap();

        let assignment = RemoteAnnealingGateway::decode(&objective(), response).unwrap();
        assert_eq!(assignment.selected_ids(), vec![5]);
    }

    #[test]
    fn test_decode_empty_is_no_result() {
        let response: SolveResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        let result = RemoteAnnealingGateway::decode(&objective(), response);
        assert!(matches!(result, Err(SolverError::NoResult(_))));
    }

    #[test]
    fn test_decode_wrong_width_is_no_result() {
        let response: SolveResponse =
            serde_json::from_value(serde_json::json!({"solutions": [{"values": [1]}]})).unwrap();
        let result = RemoteAnnealingGateway::decode(&objective(), response);
        assert!(matches!(result, Err(SolverError::NoResult(_))));
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_failure() {
        let gateway = RemoteAnnealingGateway::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(gateway.solve_url(), "http://127.0.0.1:9/v1/solve");

        let result = gateway
            .solve(&objective(), &SolverCredentials::default(), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(SolverError::AuthFailure(_))));
    }

    // ============================================
    // HTTP round trips against a stub service
    // ============================================

    async fn stub_service(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/solve"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    async fn solve_against(server: &MockServer, timeout: Duration) -> Result<Assignment, SolverError> {
        let mut gateway = RemoteAnnealingGateway::new(&server.uri()).unwrap();
        gateway.network_grace = Duration::ZERO;
        gateway
            .solve(&objective(), &SolverCredentials::new("tok"), timeout)
            .await
    }

    #[tokio::test]
    async fn test_success_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/solve"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "solutions": [{"values": [1, 0], "energy": -1.0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let assignment = solve_against(&server, Duration::from_secs(2)).await.unwrap();
        assert_eq!(assignment.selected_ids(), vec![3]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_failure() {
        let server = stub_service(ResponseTemplate::new(401)).await;

        let err = solve_against(&server, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, SolverError::AuthFailure(_)));
        assert!(matches!(
            SelectionError::from(err),
            SelectionError::SolverAuthFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_forbidden_is_auth_failure() {
        let server = stub_service(ResponseTemplate::new(403)).await;

        let err = solve_against(&server, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, SolverError::AuthFailure(_)));
    }

    #[tokio::test]
    async fn test_gateway_timeout_status_is_timeout() {
        let server = stub_service(ResponseTemplate::new(504)).await;
        let budget = Duration::from_secs(2);

        let err = solve_against(&server, budget).await.unwrap_err();
        assert!(matches!(err, SolverError::Timeout(d) if d == budget));
        assert!(matches!(
            SelectionError::from(err),
            SelectionError::SolverTimeout(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_service_is_timeout() {
        let server = stub_service(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"solutions": [{"values": [1, 1]}]}))
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let err = solve_against(&server, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, SolverError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_solutions_is_no_result() {
        let server = stub_service(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"solutions": []})),
        )
        .await;

        let err = solve_against(&server, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, SolverError::NoResult(_)));
        assert!(matches!(
            SelectionError::from(err),
            SelectionError::SolverNoResult(_)
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = stub_service(ResponseTemplate::new(500)).await;

        let err = solve_against(&server, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, SolverError::Transport(_)));
    }
}
