use std::sync::Arc;

use log::error;
use subtle::ConstantTimeEq;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::admission::pipeline::AdmissionPipeline;
use crate::admission::types::BatchRequest;
use crate::credentials::claims::Claims;
use crate::credentials::dev_issuer::DevTokenIssuer;
use crate::error_handling::types::{AdmissionError, SessionError};
use crate::credentials::verifier::CredentialVerifier;
use crate::session_management::session_store::SessionStore;
use crate::storage::blob_store::BlobStore;
use crate::storage::storage_trait::Storage;
use crate::summary::builder::SummaryBuilder;
use crate::web_interface::auth::with_claims;
use crate::web_interface::types::{
    AlertListResponse, AlertView, DevTokenRequest, DevTokenResponse, ErrorBody,
    EventListResponse, EventView, HeartbeatResponse, SessionResponse, StartSessionRequest,
};

fn json_error(status: StatusCode, tag: &str, message: impl Into<String>) -> warp::reply::Response {
    reply::with_status(reply::json(&ErrorBody::new(tag, message)), status).into_response()
}

fn not_found() -> warp::reply::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "no such resource")
}

fn session_failure(e: SessionError) -> warp::reply::Response {
    let status = match e {
        SessionError::NotFound => StatusCode::NOT_FOUND,
        SessionError::Ended => StatusCode::BAD_REQUEST,
        SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, e.kind(), e.to_string())
}

/// POST /proctoring/sessions/start
pub fn start_session_route(
    verifier: Arc<CredentialVerifier>,
    sessions: Arc<SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / "start")
        .and(warp::post())
        .and(with_claims(verifier))
        .and(warp::body::bytes())
        .and_then(move |claims: Claims, body: warp::hyper::body::Bytes| {
            let sessions = sessions.clone();
            async move {
                // The body is optional; an absent or empty one means an
                // empty exam config.
                let request: StartSessionRequest = if body.is_empty() {
                    StartSessionRequest::default()
                } else {
                    match serde_json::from_slice(&body) {
                        Ok(request) => request,
                        Err(e) => {
                            return Ok::<_, Rejection>(json_error(
                                StatusCode::BAD_REQUEST,
                                "payload_invalid",
                                e.to_string(),
                            ))
                        }
                    }
                };
                match sessions
                    .start(&claims, request.exam_config.unwrap_or_default())
                    .await
                {
                    Ok(session) => Ok(reply::with_status(
                        reply::json(&SessionResponse {
                            session_id: session.id,
                            status: session.status.as_str().to_string(),
                        }),
                        StatusCode::OK,
                    )
                    .into_response()),
                    Err(e) => Ok(session_failure(e)),
                }
            }
        })
}

/// POST /proctoring/sessions/end
pub fn end_session_route(
    verifier: Arc<CredentialVerifier>,
    sessions: Arc<SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / "end")
        .and(warp::post())
        .and(with_claims(verifier))
        .and_then(move |claims: Claims| {
            let sessions = sessions.clone();
            async move {
                match sessions.end(&claims).await {
                    Ok(session) => Ok::<_, Rejection>(
                        reply::with_status(
                            reply::json(&SessionResponse {
                                session_id: session.id,
                                status: session.status.as_str().to_string(),
                            }),
                            StatusCode::OK,
                        )
                        .into_response(),
                    ),
                    Err(e) => Ok(session_failure(e)),
                }
            }
        })
}

/// POST /proctoring/sessions/heartbeat
pub fn heartbeat_route(
    verifier: Arc<CredentialVerifier>,
    sessions: Arc<SessionStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / "heartbeat")
        .and(warp::post())
        .and(with_claims(verifier))
        .and_then(move |claims: Claims| {
            let sessions = sessions.clone();
            async move {
                match sessions.heartbeat(&claims).await {
                    Ok(session) => Ok::<_, Rejection>(
                        reply::with_status(
                            reply::json(&HeartbeatResponse {
                                session_id: session.id,
                                last_heartbeat: session.last_heartbeat_at,
                            }),
                            StatusCode::OK,
                        )
                        .into_response(),
                    ),
                    Err(e) => Ok(session_failure(e)),
                }
            }
        })
}

/// POST /proctoring/events/batch
pub fn batch_route(
    verifier: Arc<CredentialVerifier>,
    pipeline: Arc<AdmissionPipeline>,
    max_batch_bytes: usize,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "events" / "batch")
        .and(warp::post())
        .and(with_claims(verifier))
        .and(warp::body::bytes())
        .and_then(move |claims: Claims, body: warp::hyper::body::Bytes| {
            let pipeline = pipeline.clone();
            async move {
                if body.len() > max_batch_bytes {
                    return Ok::<_, Rejection>(json_error(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "batch_too_large",
                        format!("batch of {} bytes exceeds {} bytes", body.len(), max_batch_bytes),
                    ));
                }
                let request: BatchRequest = match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(e) => {
                        return Ok(json_error(
                            StatusCode::BAD_REQUEST,
                            "payload_invalid",
                            e.to_string(),
                        ))
                    }
                };
                match pipeline.process(&claims, body.len(), request).await {
                    Ok(result) => {
                        Ok(reply::with_status(reply::json(&result), StatusCode::OK).into_response())
                    }
                    Err(e @ AdmissionError::BatchTooLarge { .. }) => Ok(json_error(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        e.kind(),
                        e.to_string(),
                    )),
                    Err(e @ AdmissionError::SessionNotFound)
                    | Err(e @ AdmissionError::IdentityMismatch) => {
                        Ok(json_error(StatusCode::NOT_FOUND, e.kind(), e.to_string()))
                    }
                    Err(e) => {
                        error!("batch admission failed: {}", e);
                        Ok(json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            e.kind(),
                            "admission failed",
                        ))
                    }
                }
            }
        })
}

/// Resolve a session for a tenant-scoped read; any mismatch reads as absent.
async fn tenant_session(
    storage: &Arc<dyn Storage>,
    session_id: Uuid,
    claims: &Claims,
) -> Option<crate::session_management::session::Session> {
    match storage.find_session(session_id).await {
        Ok(Some(session)) if session.identity.tenant_id == claims.tenant_id => Some(session),
        Ok(_) => None,
        Err(e) => {
            error!("session lookup for read failed: {}", e);
            None
        }
    }
}

/// GET /proctoring/sessions/:id/alerts
pub fn list_alerts_route(
    verifier: Arc<CredentialVerifier>,
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / Uuid / "alerts")
        .and(warp::get())
        .and(with_claims(verifier))
        .and_then(move |session_id: Uuid, claims: Claims| {
            let storage = storage.clone();
            async move {
                if tenant_session(&storage, session_id, &claims).await.is_none() {
                    return Ok::<_, Rejection>(not_found());
                }
                match storage.list_alerts(session_id).await {
                    Ok(alerts) => Ok(reply::with_status(
                        reply::json(&AlertListResponse {
                            alerts: alerts.into_iter().map(AlertView::from).collect(),
                        }),
                        StatusCode::OK,
                    )
                    .into_response()),
                    Err(e) => {
                        error!("listing alerts failed: {}", e);
                        Ok(json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal_error",
                            "failed to load alerts",
                        ))
                    }
                }
            }
        })
}

/// GET /proctoring/sessions/:id/events
pub fn list_events_route(
    verifier: Arc<CredentialVerifier>,
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "sessions" / Uuid / "events")
        .and(warp::get())
        .and(with_claims(verifier))
        .and_then(move |session_id: Uuid, claims: Claims| {
            let storage = storage.clone();
            async move {
                if tenant_session(&storage, session_id, &claims).await.is_none() {
                    return Ok::<_, Rejection>(not_found());
                }
                match storage.list_events(session_id).await {
                    Ok(events) => Ok(reply::with_status(
                        reply::json(&EventListResponse {
                            events: events.into_iter().map(EventView::from).collect(),
                        }),
                        StatusCode::OK,
                    )
                    .into_response()),
                    Err(e) => {
                        error!("listing events failed: {}", e);
                        Ok(json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal_error",
                            "failed to load events",
                        ))
                    }
                }
            }
        })
}

/// GET /proctoring/evidence/:id
pub fn evidence_route(
    verifier: Arc<CredentialVerifier>,
    storage: Arc<dyn Storage>,
    blobs: Arc<dyn BlobStore>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "evidence" / Uuid)
        .and(warp::get())
        .and(with_claims(verifier))
        .and_then(move |evidence_id: Uuid, claims: Claims| {
            let storage = storage.clone();
            let blobs = blobs.clone();
            async move {
                let evidence = match storage.find_evidence(evidence_id).await {
                    Ok(Some(evidence)) => evidence,
                    Ok(None) => return Ok::<_, Rejection>(not_found()),
                    Err(e) => {
                        error!("evidence lookup failed: {}", e);
                        return Ok(not_found());
                    }
                };
                if tenant_session(&storage, evidence.session_id, &claims).await.is_none() {
                    return Ok(not_found());
                }
                match blobs.get(&evidence.locator).await {
                    Ok(bytes) => {
                        // Integrity check against the stored digest before
                        // the bytes leave the box.
                        let digest = crate::admission::pipeline::hex_digest(&bytes);
                        let matches: bool = digest
                            .as_bytes()
                            .ct_eq(evidence.sha256.as_bytes())
                            .into();
                        if !matches {
                            error!(
                                "evidence {} bytes do not match stored sha256",
                                evidence.id
                            );
                            return Ok(json_error(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "internal_error",
                                "evidence integrity check failed",
                            ));
                        }
                        Ok(reply::with_status(
                            reply::with_header(bytes, "Content-Type", evidence.mime_type),
                            StatusCode::OK,
                        )
                        .into_response())
                    }
                    Err(e) => {
                        error!("evidence blob {} unreadable: {}", evidence.locator, e);
                        Ok(not_found())
                    }
                }
            }
        })
}

/// GET /dashboard/sessions/:id/summary
pub fn summary_route(
    verifier: Arc<CredentialVerifier>,
    summaries: Arc<SummaryBuilder>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("dashboard" / "sessions" / Uuid / "summary")
        .and(warp::get())
        .and(with_claims(verifier))
        .and_then(move |session_id: Uuid, claims: Claims| {
            let summaries = summaries.clone();
            async move {
                match summaries.get_summary(session_id, &claims.tenant_id).await {
                    Ok(Some(summary)) => Ok::<_, Rejection>(
                        reply::with_status(reply::json(&summary), StatusCode::OK).into_response(),
                    ),
                    Ok(None) => Ok(not_found()),
                    Err(e) => {
                        error!("summary for session {} failed: {}", session_id, e);
                        Ok(json_error(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal_error",
                            "failed to build summary",
                        ))
                    }
                }
            }
        })
}

/// POST /proctoring/dev/token
///
/// Development-only issuance; answers 404 whenever minting is not allowed
/// so production deployments do not even acknowledge the endpoint.
pub fn dev_token_route(
    issuer: Option<Arc<DevTokenIssuer>>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("proctoring" / "dev" / "token")
        .and(warp::post())
        .and(warp::body::bytes())
        .and_then(move |body: warp::hyper::body::Bytes| {
            let issuer = issuer.clone();
            async move {
                let Some(issuer) = issuer else {
                    return Ok::<_, Rejection>(not_found());
                };
                let request: DevTokenRequest = if body.is_empty() {
                    DevTokenRequest::default()
                } else {
                    match serde_json::from_slice(&body) {
                        Ok(request) => request,
                        Err(e) => {
                            return Ok(json_error(
                                StatusCode::BAD_REQUEST,
                                "payload_invalid",
                                e.to_string(),
                            ))
                        }
                    }
                };
                let claims = Claims {
                    tenant_id: request.tenant_id.unwrap_or_else(|| "dev-tenant".into()),
                    exam_schedule_id: request
                        .exam_schedule_id
                        .unwrap_or_else(|| "dev-exam".into()),
                    user_id: request
                        .user_id
                        .unwrap_or_else(|| format!("dev-user-{}", Uuid::new_v4())),
                    attempt_no: request.attempt_no.unwrap_or(1),
                };
                match issuer.mint(&claims) {
                    Some((token, expires_at)) => Ok(reply::with_status(
                        reply::json(&DevTokenResponse { token, expires_at }),
                        StatusCode::OK,
                    )
                    .into_response()),
                    None => Ok(not_found()),
                }
            }
        })
}
