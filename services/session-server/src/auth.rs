//! Credential lifecycle endpoints
//!
//! Login and registration issue a pair; refresh rotates it; logout revokes
//! it and clears both cookies whatever state the caller is in. A refresh for
//! an account behind on its legal documents still rotates (the new cookies
//! are set) but answers 401 `LEGAL_ACCEPTANCE_OUTDATED` with the flags, so
//! the client redirects to re-acceptance instead of replaying traffic.

use axum::extract::{FromRequestParts, State};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::Json;
use common::wire::{ACCESS_COOKIE, LegalFlags, REFRESH_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::cookies::read_cookie;
use crate::error::ApiError;
use crate::metrics;
use crate::session::IssuedCredentials;
use crate::users::{Document, UserId, UserProfile};

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptBody {
    pub document: Document,
}

/// Profile plus the legal flags, returned by login, register, `/me` and
/// `/legal/accept`.
#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub user: UserProfile,
    #[serde(flatten)]
    pub legal: LegalFlags,
}

/// The account behind a live access credential. Rejects with 401
/// `TOKEN_EXPIRED`, which the client answers with a refresh.
pub struct AuthenticatedUser(pub UserId);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = read_cookie(&parts.headers, ACCESS_COOKIE).ok_or(ApiError::TokenExpired)?;
        state
            .sessions
            .authenticate(&token)
            .await
            .map(AuthenticatedUser)
            .ok_or(ApiError::TokenExpired)
    }
}

fn credential_cookies(
    state: &AppState,
    issued: &IssuedCredentials,
) -> Result<AppendHeaders<[(axum::http::HeaderName, HeaderValue); 2]>, ApiError> {
    Ok(AppendHeaders([
        (
            SET_COOKIE,
            state
                .cookies
                .access(issued.access.expose(), state.sessions.access_ttl())?,
        ),
        (
            SET_COOKIE,
            state
                .cookies
                .refresh(issued.refresh.expose(), state.sessions.refresh_ttl())?,
        ),
    ]))
}

fn cleared_cookies(
    state: &AppState,
) -> Result<AppendHeaders<[(axum::http::HeaderName, HeaderValue); 2]>, ApiError> {
    let [access, refresh] = state.cookies.clear_credentials()?;
    Ok(AppendHeaders([(SET_COOKIE, access), (SET_COOKIE, refresh)]))
}

async fn session_body(state: &AppState, user: UserProfile) -> SessionBody {
    let legal = state.users.legal_status(user.id).await;
    SessionBody { user, legal }
}

/// `POST /auth/register` → 201 with a fresh credential pair.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Response, ApiError> {
    let user = state.users.register(&body.email, &body.password).await?;
    let issued = state.sessions.issue(user.id).await;
    let cookies = credential_cookies(&state, &issued)?;
    let body = session_body(&state, user).await;
    Ok((StatusCode::CREATED, cookies, Json(body)).into_response())
}

/// `POST /auth/login` → 200 with a fresh credential pair.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Response, ApiError> {
    let user = state.users.verify(&body.email, &body.password).await?;
    let issued = state.sessions.issue(user.id).await;
    info!(user_id = user.id, "login succeeded");
    let cookies = credential_cookies(&state, &issued)?;
    let body = session_body(&state, user).await;
    Ok((cookies, Json(body)).into_response())
}

/// `POST /auth/refresh`: rotate the pair carried by the refresh cookie.
#[instrument(skip_all)]
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let rotated = match read_cookie(&headers, REFRESH_COOKIE) {
        Some(token) => state.sessions.rotate(&token).await,
        None => None,
    };
    let Some(issued) = rotated else {
        metrics::record_refresh("invalid");
        warn!("refresh rejected, clearing credential cookies");
        return Ok((cleared_cookies(&state)?, ApiError::RefreshTokenInvalid).into_response());
    };

    let cookies = credential_cookies(&state, &issued)?;
    let flags = state.users.legal_status(issued.user_id).await;
    if flags.any() {
        metrics::record_refresh("legal_outdated");
        info!(
            user_id = issued.user_id,
            terms_outdated = flags.terms_outdated,
            privacy_policy_outdated = flags.privacy_policy_outdated,
            "credentials rotated, legal acceptance outdated"
        );
        return Ok((cookies, ApiError::LegalAcceptanceOutdated(flags)).into_response());
    }

    metrics::record_refresh("rotated");
    Ok((StatusCode::NO_CONTENT, cookies).into_response())
}

/// `POST /auth/logout`: revoke whatever pair the cookies name and clear
/// them. Always 204.
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let access = read_cookie(&headers, ACCESS_COOKIE);
    let refresh = read_cookie(&headers, REFRESH_COOKIE);
    state
        .sessions
        .revoke(access.as_deref(), refresh.as_deref())
        .await;
    info!("session revoked");
    Ok((StatusCode::NO_CONTENT, cleared_cookies(&state)?).into_response())
}

/// `GET /me`
pub async fn me(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<SessionBody>, ApiError> {
    let user = state
        .users
        .profile(user_id)
        .await
        .ok_or(ApiError::TokenExpired)?;
    Ok(Json(session_body(&state, user).await))
}

/// `POST /legal/accept`: accept the current version of one document.
pub async fn accept_legal(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(body): Json<AcceptBody>,
) -> Result<Json<SessionBody>, ApiError> {
    let user = state
        .users
        .accept_current(user_id, body.document)
        .await
        .ok_or(ApiError::TokenExpired)?;
    Ok(Json(session_body(&state, user).await))
}
