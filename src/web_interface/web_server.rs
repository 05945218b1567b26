use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::routes::*;
use super::types::ApiError;
use crate::error_handling::types::WebError;
use crate::monitoring::aggregator::Aggregator;
use crate::session_management::session_registry::SessionRegistry;
use crate::violations::channel::ViolationChannel;

/// Web server for the taker API, violation ingress and the supervisor dashboard
pub struct WebServer {
    registry: Arc<SessionRegistry>,
    aggregator: Arc<Aggregator>,
    channel: Arc<ViolationChannel>,
}

impl WebServer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        aggregator: Arc<Aggregator>,
        channel: Arc<ViolationChannel>,
    ) -> Self {
        Self {
            registry,
            aggregator,
            channel,
        }
    }

    /// Every route, with rejections rendered as [`ApiError`] JSON.
    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let taker = create_session_route(self.registry.clone())
            .or(get_session_route(self.registry.clone()))
            .or(admit_route(self.registry.clone()))
            .or(begin_route(self.registry.clone()))
            .or(write_answer_route(self.registry.clone()))
            .or(acknowledge_route(self.registry.clone()))
            .or(submit_route(self.registry.clone()));

        let supervisor = monitoring_list_route(self.aggregator.clone())
            .or(monitoring_stats_route(self.aggregator.clone()))
            .or(warn_route(self.aggregator.clone()))
            .or(dismiss_route(self.aggregator.clone()))
            .or(terminate_route(self.aggregator.clone()));

        dashboard_route()
            .or(static_route())
            .or(taker)
            .or(report_violation_route(self.channel.clone()))
            .or(supervisor)
            .recover(handle_rejection)
    }

    /// Serves until the task is dropped. Bind errors are returned, not raised.
    pub async fn start(&self, bind_address: &str, port: u16) -> Result<(), WebError> {
        let addr: SocketAddr = format!("{}:{}", bind_address, port)
            .parse()
            .map_err(|e| WebError::BindFailed(format!("{}:{}: {}", bind_address, port, e)))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("Web interface listening on http://{}", addr);
        warp::serve(self.routes()).incoming(listener).run().await;
        Ok(())
    }
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, format!("Invalid query: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Unhandled rejection: {:?}", err))
    };
    Ok(reply::with_status(reply::json(&ApiError::new(message)), status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::types::AnswerValue;
    use crate::capability::probe::ReportedCapabilities;
    use crate::configuration::catalog::ExamCatalog;
    use crate::configuration::types::{ExamConfig, QuestionConfig, QuestionKind};
    use crate::grading::service::{GradingService, InMemoryGrading};
    use crate::session_management::session_controller::{ControllerContext, ControllerSettings};
    use crate::storage::memory_storage::MemoryStorage;
    use crate::violations::types::{Severity, Violation, ViolationKind};
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::time::Duration;
    use uuid::Uuid;
    use warp::http::Response;
    use warp::hyper::body::Bytes;

    fn server() -> (WebServer, Arc<InMemoryGrading>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let catalog = Arc::new(ExamCatalog::new(vec![ExamConfig {
            id: "math".into(),
            title: "Mathematics".into(),
            duration_secs: 3600,
            grace_secs: 0,
            max_violations: 3,
            questions: vec![QuestionConfig {
                id: "q1".into(),
                kind: QuestionKind::Single,
                options: vec!["a".into(), "b".into()],
                max_length: None,
                correct: Some(AnswerValue::Single("a".into())),
            }],
        }]));
        let grading = Arc::new(InMemoryGrading::new(Arc::clone(&catalog)));
        let channel = Arc::new(ViolationChannel::default());
        let context = ControllerContext {
            storage: Arc::new(MemoryStorage::new()),
            grading: grading.clone() as Arc<dyn GradingService>,
            channel: Arc::clone(&channel),
            settings: ControllerSettings {
                submit_retry: Duration::from_secs(5),
                suspend_on_high_severity: true,
                command_capacity: 8,
            },
        };
        let registry = Arc::new(SessionRegistry::new(catalog, context, 10));
        let aggregator = Arc::new(Aggregator::new(Arc::clone(&registry), Duration::ZERO));
        (WebServer::new(registry, aggregator, channel), grading)
    }

    fn body(res: &Response<Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    async fn post(server: &WebServer, path: &str, payload: Value) -> Response<Bytes> {
        warp::test::request()
            .method("POST")
            .path(path)
            .json(&payload)
            .reply(&server.routes())
            .await
    }

    /// Creates, admits and begins a session; returns its id.
    async fn started(server: &WebServer, taker_id: &str) -> String {
        let res = post(
            server,
            "/api/sessions",
            json!({
                "exam_id": "math",
                "taker": {"id": taker_id, "name": "Ada", "department": "Science"}
            }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = body(&res);
        assert_eq!(created["session"]["state"], "pending");
        let id = created["session"]["id"].as_str().unwrap().to_string();

        let res = post(
            server,
            &format!("/api/sessions/{}/admit", id),
            json!({"capabilities": ReportedCapabilities::all_working(), "consent": true}),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["session"]["state"], "admitted");

        let res = post(
            server,
            &format!("/api/sessions/{}/begin", id),
            json!({"entered": true}),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res)["deadline"].is_string());
        id
    }

    #[tokio::test]
    async fn taker_flow_over_http() {
        let (server, grading) = server();
        let id = started(&server, "t1").await;

        let res = warp::test::request()
            .method("PUT")
            .path(&format!("/api/sessions/{}/answers/q1", id))
            .json(&json!({"kind": "single", "value": "a"}))
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/sessions/{}", id))
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["answered"], 1);

        let res = post(&server, &format!("/api/sessions/{}/submit", id), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        let submitted = body(&res);
        assert_eq!(submitted["already_submitted"], false);
        assert_eq!(submitted["receipt"]["score"], 1.0);

        let res = post(&server, &format!("/api/sessions/{}/submit", id), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["already_submitted"], true);
        assert_eq!(grading.accepted(), 1);

        // a second attempt is allowed once the first has been submitted
        started(&server, "t1").await;
    }

    #[tokio::test]
    async fn transient_grading_failure_is_retryable() {
        let (server, grading) = server();
        let id = started(&server, "t1").await;
        grading.fail_next(1);

        let res = post(&server, &format!("/api/sessions/{}/submit", id), json!({})).await;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(&res)["retryable"], true);

        let res = post(&server, &format!("/api/sessions/{}/submit", id), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res)["already_submitted"], false);
    }

    #[tokio::test]
    async fn violations_for_unmonitored_sessions_are_gone() {
        let (server, _) = server();
        let stray = Violation::new("v1", Uuid::new_v4(), ViolationKind::CopyPaste, Severity::Low);
        let res = post(&server, "/api/violations", json!(stray)).await;
        assert_eq!(res.status(), StatusCode::GONE);
        assert_eq!(body(&res)["retryable"], false);

        let id = started(&server, "t1").await;
        let live = Violation::new(
            "v2",
            id.parse::<Uuid>().unwrap(),
            ViolationKind::CopyPaste,
            Severity::Low,
        );
        let res = post(&server, "/api/violations", json!(live)).await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn monitoring_list_carries_last_updated() {
        let (server, _) = server();
        let id = started(&server, "t1").await;
        let before = Utc::now();

        let res = warp::test::request()
            .method("GET")
            .path("/api/monitoring/sessions?status=active")
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let list = body(&res);
        let last_updated: DateTime<Utc> =
            serde_json::from_value(list["last_updated"].clone()).unwrap();
        assert!(last_updated >= before);
        let sessions = list["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["session_id"], id.as_str());
        assert_eq!(sessions[0]["status"], "active");

        let res = warp::test::request()
            .method("GET")
            .path("/api/monitoring/sessions?status=submitted")
            .reply(&server.routes())
            .await;
        assert!(body(&res)["sessions"].as_array().unwrap().is_empty());

        let res = warp::test::request()
            .method("GET")
            .path("/api/monitoring/sessions?status=bogus")
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejections_render_as_api_errors() {
        let (server, _) = server();
        let res = warp::test::request()
            .method("GET")
            .path("/api/sessions/not-a-uuid")
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .method("GET")
            .path("/api/nowhere")
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body(&res)["message"].is_string());

        let res = warp::test::request()
            .method("POST")
            .path("/api/sessions")
            .body("{not json")
            .reply(&server.routes())
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
