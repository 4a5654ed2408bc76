//! HTTP surface: display endpoints for the TV and management endpoints for
//! the web UI.

use std::net::{IpAddr, SocketAddr};
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use gallery_model::{
    GroupMap, GroupPatch, ImagePatch, ImageRecord, Group, Settings, SettingsPatch, TvPower,
    TvScheduleSet,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::display::DisplayStatus;
use crate::error::Error;
use crate::gallery::{
    BackfillReport, BulkAction, DEFAULT_DUPLICATE_THRESHOLD, DuplicateMatch, Gallery,
    GalleryListing, RescanReport,
};
use crate::slideshow::{Slideshow, SlidesView};

#[derive(Clone)]
pub struct AppState {
    slideshow: Arc<Slideshow>,
    control_token: Option<Arc<str>>,
    timezone: Tz,
}

impl AppState {
    pub fn new(slideshow: Arc<Slideshow>, control_token: Option<String>, timezone: Tz) -> Self {
        Self {
            slideshow,
            control_token: control_token.map(|t| Arc::from(t.trim())),
            timezone,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/images", get(list_images))
        .route("/api/display/state", get(display_state))
        .route("/api/display/control", post(display_control))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/reorder", post(reorder))
        .route("/api/gallery", get(gallery_listing))
        .route(
            "/api/gallery/{filename}",
            patch(update_image).delete(delete_image),
        )
        .route("/api/gallery/bulk", post(bulk))
        .route("/api/gallery/rescan", post(rescan))
        .route("/api/gallery/backfill-hashes", post(backfill_hashes))
        .route("/api/groups", get(list_groups).post(create_group))
        .route(
            "/api/groups/{group_id}",
            patch(update_group).delete(delete_group),
        )
        .route("/api/duplicates", get(duplicates))
        .route("/api/tv-schedules", get(get_schedules).post(replace_schedules))
        .route("/api/tv/power", get(tv_power))
        .route("/uploads/{filename}", get(serve_upload))
        .with_state(state)
}

/// Serves until `cancel` fires.
pub async fn serve(state: AppState, addr: SocketAddr, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;
    info!(%addr, "slideshow server listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .context("slideshow server exited")?;
    info!("slideshow server stopped");
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Marker extractor for routes that change state. Requests from the local
/// network pass; anyone else needs the bearer token.
pub struct Authorized;

impl FromRequestParts<AppState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if peer.is_some_and(is_local) {
            return Ok(Self);
        }
        if let Some(expected) = state.control_token.as_deref() {
            let presented = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "));
            if presented.is_some_and(|token| tokens_match(token.trim(), expected)) {
                return Ok(Self);
            }
        }
        warn!(?peer, path = %parts.uri.path(), "rejected unauthorized request");
        Err(ApiError::Unauthorized)
    }
}

fn is_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_loopback() || v4.is_private(),
            None => v6.is_loopback() || v6.is_unique_local(),
        },
    }
}

/// Compares without returning early on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Slideshow(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Slideshow(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Slideshow(err @ Error::InvalidArgument(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::Slideshow(err @ Error::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
            Self::Slideshow(err) => {
                error!(error = ?err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct Ack {
    success: bool,
}

const ACK: Ack = Ack { success: true };

async fn list_images(State(state): State<AppState>) -> Json<SlidesView> {
    Json(state.slideshow.slides())
}

async fn display_state(State(state): State<AppState>) -> Json<DisplayStatus> {
    Json(state.slideshow.state())
}

#[derive(Deserialize)]
struct ControlRequest {
    action: String,
}

async fn display_control(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> ApiResult<DisplayStatus> {
    let Json(request) = payload?;
    Ok(Json(state.slideshow.control(&request.action)?))
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.slideshow.gallery().settings())
}

/// Runs a store operation on the blocking pool. Every mutation rewrites a
/// JSON file and syncs it, which must stay off the async workers.
async fn with_gallery<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Gallery) -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let slideshow = Arc::clone(&state.slideshow);
    let outcome = tokio::task::spawn_blocking(move || op(slideshow.gallery()))
        .await
        .map_err(|err| Error::Io(std::io::Error::other(err)))?;
    Ok(outcome?)
}

async fn update_settings(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> ApiResult<Settings> {
    let Json(patch) = payload?;
    with_gallery(&state, move |gallery| gallery.update_settings(patch))
        .await
        .map(Json)
}

#[derive(Deserialize)]
struct ReorderRequest {
    images: Vec<String>,
}

async fn reorder(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> ApiResult<Ack> {
    let Json(request) = payload?;
    with_gallery(&state, move |gallery| gallery.reorder(request.images)).await?;
    Ok(Json(ACK))
}

async fn gallery_listing(_: Authorized, State(state): State<AppState>) -> Json<GalleryListing> {
    Json(state.slideshow.gallery().listing())
}

async fn update_image(
    _: Authorized,
    State(state): State<AppState>,
    Path(filename): Path<String>,
    payload: Result<Json<ImagePatch>, JsonRejection>,
) -> ApiResult<ImageRecord> {
    let Json(patch) = payload?;
    with_gallery(&state, move |gallery| gallery.update_image(&filename, patch))
        .await
        .map(Json)
}

async fn delete_image(
    _: Authorized,
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Ack> {
    with_gallery(&state, move |gallery| gallery.delete_image(&filename)).await?;
    Ok(Json(ACK))
}

#[derive(Deserialize)]
struct BulkRequest {
    action: String,
    #[serde(default)]
    filenames: Vec<String>,
}

#[derive(Serialize)]
struct BulkResponse {
    success: bool,
    count: usize,
}

async fn bulk(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<BulkRequest>, JsonRejection>,
) -> ApiResult<BulkResponse> {
    let Json(request) = payload?;
    let action: BulkAction = request.action.parse()?;
    let count = with_gallery(&state, move |gallery| {
        gallery.bulk(action, &request.filenames)
    })
    .await?;
    Ok(Json(BulkResponse {
        success: true,
        count,
    }))
}

async fn rescan(_: Authorized, State(state): State<AppState>) -> ApiResult<RescanReport> {
    with_gallery(&state, Gallery::rescan).await.map(Json)
}

#[derive(Serialize)]
struct BackfillResponse {
    success: bool,
    #[serde(flatten)]
    report: BackfillReport,
}

async fn backfill_hashes(
    _: Authorized,
    State(state): State<AppState>,
) -> ApiResult<BackfillResponse> {
    let report = with_gallery(&state, Gallery::backfill_hashes).await?;
    Ok(Json(BackfillResponse {
        success: true,
        report,
    }))
}

async fn list_groups(_: Authorized, State(state): State<AppState>) -> Json<GroupMap> {
    Json(state.slideshow.gallery().listing().groups)
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    images: Vec<String>,
    #[serde(default)]
    mat_color: Option<String>,
}

#[derive(Serialize)]
struct CreatedGroup {
    success: bool,
    group_id: String,
}

async fn create_group(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<CreateGroupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedGroup>), ApiError> {
    let Json(request) = payload?;
    let group_id = with_gallery(&state, move |gallery| {
        gallery.create_group(request.images, request.mat_color)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedGroup {
            success: true,
            group_id,
        }),
    ))
}

async fn update_group(
    _: Authorized,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    payload: Result<Json<GroupPatch>, JsonRejection>,
) -> ApiResult<Group> {
    let Json(patch) = payload?;
    with_gallery(&state, move |gallery| gallery.update_group(&group_id, patch))
        .await
        .map(Json)
}

async fn delete_group(
    _: Authorized,
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Ack> {
    with_gallery(&state, move |gallery| gallery.delete_group(&group_id)).await?;
    Ok(Json(ACK))
}

#[derive(Deserialize)]
struct DuplicateQuery {
    hash: String,
    threshold: Option<u32>,
}

async fn duplicates(
    _: Authorized,
    State(state): State<AppState>,
    query: Result<Query<DuplicateQuery>, QueryRejection>,
) -> ApiResult<Vec<DuplicateMatch>> {
    let Query(query) = query?;
    let threshold = query.threshold.unwrap_or(DEFAULT_DUPLICATE_THRESHOLD);
    Ok(Json(
        state
            .slideshow
            .gallery()
            .near_duplicates(&query.hash, threshold)?,
    ))
}

async fn get_schedules(_: Authorized, State(state): State<AppState>) -> Json<TvScheduleSet> {
    Json(state.slideshow.gallery().tv_schedules())
}

async fn replace_schedules(
    _: Authorized,
    State(state): State<AppState>,
    payload: Result<Json<TvScheduleSet>, JsonRejection>,
) -> ApiResult<TvScheduleSet> {
    let Json(schedules) = payload?;
    with_gallery(&state, move |gallery| gallery.replace_tv_schedules(schedules))
        .await
        .map(Json)
}

#[derive(Debug, Serialize)]
struct TvPowerStatus {
    managed: bool,
    power: Option<TvPower>,
    next_change: Option<TvTransition>,
}

#[derive(Debug, Serialize)]
struct TvTransition {
    at: String,
    power: TvPower,
}

async fn tv_power(_: Authorized, State(state): State<AppState>) -> Json<TvPowerStatus> {
    let schedules = state.slideshow.gallery().tv_schedules();
    let now = Utc::now().with_timezone(&state.timezone);
    let next_change = schedules
        .next_transition_after(now)
        .map(|(at, power)| TvTransition {
            at: at.to_rfc3339_opts(SecondsFormat::Secs, false),
            power,
        });
    Json(TvPowerStatus {
        managed: schedules.is_managed(),
        power: schedules.power_at(now),
        next_change,
    })
}

async fn serve_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state
        .slideshow
        .gallery()
        .upload_path(&filename)
        .ok_or_else(|| Error::NotFound(format!("image {filename}")))?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("image {filename}")).into());
        }
        Err(err) => return Err(Error::Io(err).into()),
    };
    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    Ok(response)
}

fn content_type_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn local_addresses_cover_lan_and_loopback() {
        assert!(is_local(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_local(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
        assert!(is_local(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_local(IpAddr::V6(
            Ipv4Addr::new(10, 0, 0, 7).to_ipv6_mapped()
        )));
        assert!(!is_local(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))));
    }

    #[test]
    fn token_comparison_requires_exact_match() {
        assert!(tokens_match("0123456789abcdef", "0123456789abcdef"));
        assert!(!tokens_match("0123456789abcdeX", "0123456789abcdef"));
        assert!(!tokens_match("0123", "0123456789abcdef"));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(FsPath::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(FsPath::new("b.webp")), "image/webp");
        assert_eq!(content_type_for(FsPath::new("c")), "application/octet-stream");
    }
}
