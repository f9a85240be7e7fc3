use std::sync::Arc;

use warp::{Filter, Rejection};

use crate::credentials::claims::Claims;
use crate::credentials::verifier::CredentialVerifier;

/// Rejection carrying the credential failure message; recovered into a
/// 401 with the `credential_invalid` tag by the server's rejection handler.
#[derive(Debug)]
pub struct Unauthorized {
    pub message: String,
}

impl warp::reject::Reject for Unauthorized {}

fn unauthorized(message: impl ToString) -> Rejection {
    warp::reject::custom(Unauthorized {
        message: message.to_string(),
    })
}

/// Filter extracting verified claims from the `Authorization` header.
pub fn with_claims(
    verifier: Arc<CredentialVerifier>,
) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let verifier = verifier.clone();
        async move {
            let header = header.ok_or_else(|| unauthorized("no bearer token presented"))?;
            let token =
                CredentialVerifier::token_from_header(&header).map_err(|e| unauthorized(e))?;
            verifier
                .verify(token)
                .map_err(|e| unauthorized(e))
        }
    })
}
