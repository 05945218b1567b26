use std::sync::Arc;

use log::debug;
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use warp::{http::StatusCode, reply, reply::Response, Filter, Rejection, Reply};

use super::types::*;
use crate::answers::types::AnswerValue;
use crate::capability::probe::{CapabilityProbe, ReportedCommit};
use crate::error_handling::types::SessionError;
use crate::monitoring::aggregator::Aggregator;
use crate::monitoring::types::MonitoringFilter;
use crate::session_management::session_registry::SessionRegistry;
use crate::violations::channel::ViolationChannel;
use crate::violations::types::Violation;

/// Largest JSON body accepted by any route.
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/static/"]
struct Assets;

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn parse_id(id_str: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id_str).map_err(|_| {
        reply::with_status(
            reply::json(&ApiError::new("Invalid session id")),
            StatusCode::BAD_REQUEST,
        )
        .into_response()
    })
}

fn asset_reply(path: &str) -> Response {
    match Assets::get(path) {
        Some(file) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            reply::with_header(file.data.into_owned(), "Content-Type", mime.as_ref())
                .into_response()
        }
        None => reply::with_status(
            reply::json(&ApiError::new("Asset not found")),
            StatusCode::NOT_FOUND,
        )
        .into_response(),
    }
}

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and_then(|| async move { Ok::<_, Rejection>(asset_reply("index.html")) })
}

/// GET /static/<file>
pub fn static_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("static")
        .and(warp::path::tail())
        .and(warp::get())
        .and_then(|tail: warp::path::Tail| async move {
            Ok::<_, Rejection>(asset_reply(tail.as_str()))
        })
}

/// POST /api/sessions
pub fn create_session_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::post())
        .and(json_body::<CreateSessionRequest>())
        .and_then(move |body: CreateSessionRequest| {
            let registry = registry.clone();
            async move {
                let result = registry
                    .create_session(&body.exam_id, body.taker)
                    .map(|handle| handle.view());
                Ok::<_, Rejection>(json_reply(result, StatusCode::CREATED))
            }
        })
}

/// GET /api/sessions/:id
pub fn get_session_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String)
        .and(warp::get())
        .and_then(move |id_str: String| {
            let registry = registry.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = registry.get(id).map(|handle| handle.view());
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/sessions/:id/admit
pub fn admit_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "admit")
        .and(warp::post())
        .and(json_body::<AdmitRequest>())
        .and_then(move |id_str: String, body: AdmitRequest| {
            let registry = registry.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = match registry.get(id) {
                    Ok(handle) => {
                        let report = body.capabilities.run();
                        match handle.admit(report, body.consent).await {
                            Ok(()) => Ok(handle.view()),
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                };
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/sessions/:id/begin
pub fn begin_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "begin")
        .and(warp::post())
        .and(json_body::<ReportedCommit>())
        .and_then(
            move |id_str: String, commit: ReportedCommit| {
                let registry = registry.clone();
                async move {
                    let id = match parse_id(&id_str) {
                        Ok(id) => id,
                        Err(res) => return Ok::<_, Rejection>(res),
                    };
                    let result = match registry.get(id) {
                        Ok(handle) => handle
                            .begin(commit)
                            .await
                            .map(|deadline| BeginResponse { deadline }),
                        Err(e) => Err(e),
                    };
                    Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
                }
            },
        )
}

/// PUT /api/sessions/:id/answers/:question_id
pub fn write_answer_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "answers" / String)
        .and(warp::put())
        .and(json_body::<AnswerValue>())
        .and_then(move |id_str: String, question_id: String, value: AnswerValue| {
            let registry = registry.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = match registry.get(id) {
                    Ok(handle) => handle.write_answer(question_id, value).await,
                    Err(e) => Err(e),
                };
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/sessions/:id/acknowledge
pub fn acknowledge_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "acknowledge")
        .and(warp::post())
        .and_then(move |id_str: String| {
            let registry = registry.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = match registry.get(id) {
                    Ok(handle) => handle.acknowledge().await.map(|()| handle.view()),
                    Err(e) => Err(e),
                };
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/sessions/:id/submit
pub fn submit_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "submit")
        .and(warp::post())
        .and_then(move |id_str: String| {
            let registry = registry.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = match registry.get(id) {
                    Ok(handle) => handle.submit().await.map(SubmitResponse::from),
                    Err(e) => Err(e),
                };
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/violations
///
/// Ingress for client-side detectors. Answers 202 once the event is queued for its
/// session, 410 when nothing monitors that session any more.
pub fn report_violation_route(
    channel: Arc<ViolationChannel>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "violations")
        .and(warp::post())
        .and(json_body::<Violation>())
        .and_then(move |violation: Violation| {
            let channel = channel.clone();
            async move {
                debug!(
                    "[{}] Violation {} reported over HTTP",
                    violation.session_id, violation.id
                );
                let result = channel
                    .publish(violation)
                    .await
                    .map_err(SessionError::from);
                Ok::<_, Rejection>(json_reply(result, StatusCode::ACCEPTED))
            }
        })
}

/// GET /api/monitoring/sessions?exam_id=&department=&status=&search=
pub fn monitoring_list_route(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "monitoring" / "sessions")
        .and(warp::get())
        .and(warp::query::<MonitoringFilter>())
        .and_then(move |filter: MonitoringFilter| {
            let aggregator = aggregator.clone();
            async move {
                Ok::<_, Rejection>(reply::with_status(
                    reply::json(&aggregator.list(&filter)),
                    StatusCode::OK,
                ))
            }
        })
}

/// GET /api/monitoring/stats
pub fn monitoring_stats_route(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "monitoring" / "stats")
        .and(warp::get())
        .and_then(move || {
            let aggregator = aggregator.clone();
            async move {
                Ok::<_, Rejection>(reply::with_status(
                    reply::json(&aggregator.stats()),
                    StatusCode::OK,
                ))
            }
        })
}

/// POST /api/monitoring/sessions/:id/warn
pub fn warn_route(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "monitoring" / "sessions" / String / "warn")
        .and(warp::post())
        .and(json_body::<WarnRequest>())
        .and_then(move |id_str: String, body: WarnRequest| {
            let aggregator = aggregator.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = aggregator
                    .warn(id, &body.violation_id, &body.message)
                    .await;
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/monitoring/sessions/:id/dismiss
pub fn dismiss_route(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "monitoring" / "sessions" / String / "dismiss")
        .and(warp::post())
        .and(json_body::<DismissRequest>())
        .and_then(move |id_str: String, body: DismissRequest| {
            let aggregator = aggregator.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = aggregator
                    .dismiss(id, &body.violation_id)
                    .await
                    .map(|changed| DismissResponse { changed });
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}

/// POST /api/monitoring/sessions/:id/terminate
pub fn terminate_route(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "monitoring" / "sessions" / String / "terminate")
        .and(warp::post())
        .and(json_body::<TerminateRequest>())
        .and_then(move |id_str: String, body: TerminateRequest| {
            let aggregator = aggregator.clone();
            async move {
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok::<_, Rejection>(res),
                };
                let result = aggregator.terminate(id, body.reason).await;
                Ok::<_, Rejection>(json_reply(result, StatusCode::OK))
            }
        })
}
