//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::{AppState, CurrentUser};
use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use location_tracking_core::{
    ConsentStore, LocateError, PeerLocation, PositionErrorKind, PositionSample, TrackingStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_consent_handler,
        put_consent_handler,
        initialize_handler,
        status_handler,
        location_handler,
        logout_handler,
        peers_handler,
    ),
    components(
        schemas(
            ConsentResponse,
            ConsentRequest,
            ConsentDecisionResponse,
            StatusResponse,
            LocationBody,
            PeerBody
        )
    ),
    tags(
        (name = "Location Tracking API", description = "Consent-gated location tracking for logged-in employees.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The caller's stored consent decision, if any.
#[derive(Serialize, ToSchema)]
pub struct ConsentResponse {
    user_id: String,
    /// `null` when the user has never decided.
    granted: Option<bool>,
    decided_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct ConsentRequest {
    granted: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ConsentDecisionResponse {
    #[schema(value_type = String, example = "active")]
    status: TrackingStatus,
    /// False when the decision applies to this session only because storage failed.
    persisted: bool,
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    #[schema(value_type = String, example = "awaiting_consent")]
    status: TrackingStatus,
    consent_checked: bool,
    latest: Option<LocationBody>,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct LocationBody {
    latitude: f64,
    longitude: f64,
    /// Radius of uncertainty in meters.
    accuracy: f64,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

impl From<PositionSample> for LocationBody {
    fn from(sample: PositionSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            timestamp: sample.timestamp,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PeerBody {
    user_id: String,
    display_name: String,
    location: LocationBody,
}

impl From<PeerLocation> for PeerBody {
    fn from(peer: PeerLocation) -> Self {
        Self {
            user_id: peer.user_id,
            display_name: peer.display_name,
            location: peer.sample.into(),
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Read the caller's stored consent decision.
#[utoipa::path(
    get,
    path = "/tracking/consent",
    responses(
        (status = 200, description = "Stored decision, or null if undecided", body = ConsentResponse),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn get_consent_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    let record = ConsentStore::new(app_state.kv.clone()).load(&user.id).await;
    Json(ConsentResponse {
        user_id: user.id,
        granted: record.as_ref().map(|r| r.granted),
        decided_at: record.map(|r| r.decided_at),
    })
}

/// Record the caller's consent decision and start or stop tracking accordingly.
#[utoipa::path(
    put,
    path = "/tracking/consent",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Decision applied", body = ConsentDecisionResponse),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn put_consent_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<ConsentRequest>,
) -> impl IntoResponse {
    let tracking = app_state.sessions.get_or_create(&user).await;
    let outcome = tracking.session.record_consent(&user.id, payload.granted).await;
    info!(user_id = %user.id, granted = payload.granted, status = ?outcome.status, "Consent decision applied");
    Json(ConsentDecisionResponse {
        status: outcome.status,
        persisted: outcome.persisted,
    })
}

/// Run the post-login consent check for the caller's session.
#[utoipa::path(
    post,
    path = "/tracking/initialize",
    responses(
        (status = 200, description = "Session state after the consent check", body = StatusResponse),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn initialize_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    let tracking = app_state.sessions.get_or_create(&user).await;
    tracking.session.initialize(&user.id).await;
    Json(status_of(&tracking.session))
}

/// Current state of the caller's tracking session.
#[utoipa::path(
    get,
    path = "/tracking/status",
    responses(
        (status = 200, description = "Session state", body = StatusResponse),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    let tracking = app_state.sessions.get_or_create(&user).await;
    Json(status_of(&tracking.session))
}

/// The caller's latest position, reading it once from the device if none is cached yet.
#[utoipa::path(
    get,
    path = "/tracking/location",
    responses(
        (status = 200, description = "Latest position", body = LocationBody),
        (status = 401, description = "Missing user identity"),
        (status = 403, description = "The device denied location permission"),
        (status = 409, description = "Tracking is not active for this session"),
        (status = 503, description = "The device could not determine its position"),
        (status = 504, description = "The device did not report a position in time")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn location_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tracking = app_state.sessions.get_or_create(&user).await;
    if let Some(sample) = tracking.session.latest_sample() {
        return Ok(Json(LocationBody::from(sample)));
    }

    match tracking.session.current_position().await {
        Ok(sample) => Ok(Json(LocationBody::from(sample))),
        Err(LocateError::NotActive) => Err((
            StatusCode::CONFLICT,
            LocateError::NotActive.to_string(),
        )),
        Err(LocateError::Position(e)) => {
            warn!(user_id = %user.id, error = %e, "One-shot location read failed");
            let status = match e.kind {
                PositionErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                PositionErrorKind::PositionUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                PositionErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            };
            Err((status, e.message))
        }
    }
}

/// Stop tracking for the caller and discard the session.
#[utoipa::path(
    post,
    path = "/tracking/logout",
    responses(
        (status = 204, description = "Tracking stopped and session discarded"),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn logout_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    if let Some(tracking) = app_state.sessions.remove(&user.id).await {
        tracking.session.logout().await;
    }
    info!(user_id = %user.id, "User logged out of tracking");
    StatusCode::NO_CONTENT
}

/// Last known positions of the other logged-in users.
#[utoipa::path(
    get,
    path = "/tracking/peers",
    responses(
        (status = 200, description = "Peer positions", body = [PeerBody]),
        (status = 401, description = "Missing user identity")
    ),
    params(
        ("x-user-id" = String, Header, description = "The logged-in user's ID.")
    )
)]
pub async fn peers_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> impl IntoResponse {
    let peers: Vec<PeerBody> = app_state
        .sessions
        .peers(&user.id)
        .await
        .into_iter()
        .map(PeerBody::from)
        .collect();
    Json(peers)
}

fn status_of(session: &location_tracking_core::TrackingSession) -> StatusResponse {
    StatusResponse {
        status: session.status(),
        consent_checked: session.is_consent_checked(),
        latest: session.latest_sample().map(LocationBody::from),
    }
}
