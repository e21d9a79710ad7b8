//! Health and metrics HTTP endpoints
//!
//! `GET /health` reports every Device Link's status and the number of attached
//! clients. The relay is `healthy` unless some link is stuck reconnecting.
//! `GET /metrics` exports the global counters.

use crate::observability::metrics::metrics;
use crate::protocol::DeviceId;
use crate::transport::LinkStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

/// Live state the health endpoint reports on
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn link_statuses(&self) -> Vec<(DeviceId, LinkStatus)>;

    async fn client_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub links: BTreeMap<String, LinkStatus>,
    pub clients: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn evaluate(links: Vec<(DeviceId, LinkStatus)>, clients: usize) -> Self {
        let status = if links.iter().any(|(_, s)| *s == LinkStatus::Connecting) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            links: links
                .into_iter()
                .map(|(id, status)| (id.to_string(), status))
                .collect(),
            clients,
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            timestamp: Utc::now(),
        }
    }

    pub async fn collect(source: &dyn HealthSource) -> Self {
        Self::evaluate(source.link_statuses().await, source.client_count().await)
    }

    pub fn status_code(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// `GET /health` and `GET /metrics`
pub fn routes(
    source: Arc<dyn HealthSource>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || source.clone()))
        .and_then(|source: Arc<dyn HealthSource>| async move {
            let report = HealthReport::collect(source.as_ref()).await;
            Ok::<_, Infallible>(warp::reply::with_status(
                warp::reply::json(&report),
                report.status_code(),
            ))
        });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()));

    health.or(metrics_route)
}
