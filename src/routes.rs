use crate::config;
use crate::events::rejections::explain_rejection;
use crate::events::track::TrackPayload;
use crate::middleware;
use crate::middleware::DecodedBody;
use crate::storage::{EventStore, Store, StorageError};
use crate::webstats::{WebStatsEvent, send_stats_event};

use std::convert::Infallible;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use warp;
use warp::{Filter, Reply};
use warp::http::StatusCode;

/// Why a request to /track did not result in a stored event
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("bad json: {0}")]
    BadRequest(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("db fail: {0}")]
    Storage(#[from] StorageError),
}

impl warp::reject::Reject for IngestError {}

impl IngestError {
    /// What the client gets to see: a status and a short plain text body
    pub fn to_response(&self) -> warp::reply::Response {
        match self {
            IngestError::BadRequest(_) => warp::reply::with_status("bad json", StatusCode::BAD_REQUEST).into_response(),
            IngestError::MethodNotAllowed => warp::reply::with_status(warp::reply(), StatusCode::METHOD_NOT_ALLOWED).into_response(),
            IngestError::Storage(_) => warp::reply::with_status("db fail", StatusCode::INTERNAL_SERVER_ERROR).into_response(),
        }
    }
}

fn with_store(store: Store) -> impl Filter<Extract = (Store,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

fn with_stats(stats: mpsc::Sender<WebStatsEvent>) -> impl Filter<Extract = (mpsc::Sender<WebStatsEvent>,), Error = Infallible> + Clone {
    warp::any().map(move || stats.clone())
}

/// All routes: POST /track, GET /static/*
pub fn routes(store: Store, stats: mpsc::Sender<WebStatsEvent>, server: &config::Server) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    /* The method is checked before the body is read */
    let track_route = warp::path!("track")
        .and(middleware::post_only())
        .and(middleware::content_length_filter(server.payload_size_limit))
        .and(middleware::compressible_body(server.payload_size_limit))
        .and(with_store(store))
        .and(with_stats(stats))
        .and_then(track);

    /* warp::path strips the prefix before resolving files */
    let static_route = warp::path("static")
        .and(warp::fs::dir(server.static_dir.clone()));

    track_route.or(static_route)
        .with(middleware::cors(&server.origins))
        .recover(middleware::handle_rejection)
        .with(warp::log::custom(middleware::request_logger))
}

/// Parses, normalises and stores a single event
async fn ingest(body: &str, store: &dyn EventStore) -> Result<i64, IngestError> {
    let payload = TrackPayload::from_body(body).map_err(|e| IngestError::BadRequest(e.to_string()))?;
    let record = payload.normalize(Utc::now());
    Ok(store.insert(&record).await?)
}

/// Event route: the response is only sent once the write has been attempted, failed events are dropped
pub async fn track(body: DecodedBody, store: Store, stats: mpsc::Sender<WebStatsEvent>) -> Result<warp::reply::Response, warp::Rejection> {
    send_stats_event(&stats, WebStatsEvent::EventReceived).await;

    let outcome = match &body {
        Ok(text) => ingest(text, store.as_ref()).await,
        Err(reason) => Err(IngestError::BadRequest(reason.clone())),
    };

    match outcome {
        Ok(id) => {
            log::debug!("stored event {} in {}", id, store);
            send_stats_event(&stats, WebStatsEvent::EventAccepted).await;
            Ok(warp::reply::with_status(warp::reply(), StatusCode::ACCEPTED).into_response())
        },
        Err(e) => {
            match &e {
                IngestError::BadRequest(reason) => {
                    log::debug!("rejecting event: {}", reason);
                    if let (Ok(text), true) = (&body, log::log_enabled!(log::Level::Debug)) {
                        for explanation in explain_rejection(text) {
                            log::debug!("rejected event: {}", explanation);
                        }
                    }
                    send_stats_event(&stats, WebStatsEvent::EventRejected).await;
                },
                IngestError::Storage(err) => {
                    log::warn!("could not store event, dropping it: {}: {}", store, err);
                    send_stats_event(&stats, WebStatsEvent::EventFailed).await;
                },
                IngestError::MethodNotAllowed => {},
            }
            Ok(e.to_response())
        },
    }
}
