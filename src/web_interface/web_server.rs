use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::broadcast;
use warp::http::StatusCode;
use warp::{reply, Filter, Rejection, Reply};

use crate::admission::pipeline::AdmissionPipeline;
use crate::credentials::dev_issuer::DevTokenIssuer;
use crate::credentials::verifier::CredentialVerifier;
use crate::error_handling::types::WebError;
use crate::session_management::session_store::SessionStore;
use crate::storage::blob_store::BlobStore;
use crate::storage::storage_trait::Storage;
use crate::summary::builder::SummaryBuilder;
use crate::web_interface::auth::Unauthorized;
use crate::web_interface::routes;
use crate::web_interface::types::ErrorBody;

/// HTTP server exposing the ingest and dashboard API.
pub struct WebServer {
    verifier: Arc<CredentialVerifier>,
    sessions: Arc<SessionStore>,
    pipeline: Arc<AdmissionPipeline>,
    storage: Arc<dyn Storage>,
    blobs: Arc<dyn BlobStore>,
    summaries: Arc<SummaryBuilder>,
    dev_issuer: Option<Arc<DevTokenIssuer>>,
    max_batch_bytes: usize,
}

impl WebServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: Arc<CredentialVerifier>,
        sessions: Arc<SessionStore>,
        pipeline: Arc<AdmissionPipeline>,
        storage: Arc<dyn Storage>,
        blobs: Arc<dyn BlobStore>,
        summaries: Arc<SummaryBuilder>,
        dev_issuer: Option<Arc<DevTokenIssuer>>,
        max_batch_bytes: usize,
    ) -> Self {
        Self {
            verifier,
            sessions,
            pipeline,
            storage,
            blobs,
            summaries,
            dev_issuer,
            max_batch_bytes,
        }
    }

    /// Serve until the shutdown signal fires, then stop accepting and
    /// drain in-flight requests.
    pub async fn start(
        &self,
        addr: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), WebError> {
        let routes = routes::start_session_route(self.verifier.clone(), self.sessions.clone())
            .or(routes::end_session_route(self.verifier.clone(), self.sessions.clone()))
            .or(routes::heartbeat_route(self.verifier.clone(), self.sessions.clone()))
            .or(routes::batch_route(
                self.verifier.clone(),
                self.pipeline.clone(),
                self.max_batch_bytes,
            ))
            .or(routes::list_alerts_route(self.verifier.clone(), self.storage.clone()))
            .or(routes::list_events_route(self.verifier.clone(), self.storage.clone()))
            .or(routes::evidence_route(
                self.verifier.clone(),
                self.storage.clone(),
                self.blobs.clone(),
            ))
            .or(routes::summary_route(self.verifier.clone(), self.summaries.clone()))
            .or(routes::dev_token_route(self.dev_issuer.clone()))
            .recover(handle_rejection);

        let (bound, serving) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.recv().await;
            })
            .map_err(|e| {
                error!("web server failed to bind {}: {}", addr, e);
                WebError::BindFailed(e.to_string())
            })?;
        info!("web server listening on {}", bound);
        serving.await;
        info!("web server stopped");
        Ok(())
    }
}

/// Map rejections the filters produce into the JSON error shape.
async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Rejection> {
    let (status, body) = if let Some(auth) = rejection.find::<Unauthorized>() {
        (
            StatusCode::UNAUTHORIZED,
            ErrorBody::new("credential_invalid", auth.message.clone()),
        )
    } else if rejection.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            ErrorBody::new("not_found", "no such resource"),
        )
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (
            StatusCode::BAD_REQUEST,
            ErrorBody::new("payload_invalid", e.to_string()),
        )
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorBody::new("batch_too_large", "request body too large"),
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorBody::new("not_found", "method not allowed"),
        )
    } else {
        error!("unhandled rejection: {:?}", rejection);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new("internal_error", "unhandled error"),
        )
    };
    Ok(reply::with_status(reply::json(&body), status))
}
