//! HTTP routes
//!
//! ```text
//! GET  /unit                  list units
//! GET  /unit/{unit}/status    active state of one unit
//! POST /unit                  {action, unit, unit_type?, property?, value?}
//! GET  /systemd/{property}    one manager property
//! GET  /timedate              every timedated property
//! GET  /timedate/timezones    ListTimezones
//! GET  /timedate/{property}   one timedated property
//! POST /timedate              {property, value}: invoke a timedated method
//! ```
//!
//! Successful responses are JSON; errors are plain text with the status
//! from [status_code].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::dbus::{Connector, ManagerBus, TimedateBus, TimedateReply};
use crate::error::{Error, Result};
use crate::timedate::{TimeDateQuery, TimeDateRequest, TimeDateSync};
use crate::units::{ActionReply, Property, Unit, UnitAction, UnitController, UnitStatus};

/// Shared between handlers; holds no per-request state
pub struct AppState<C> {
    pub units: Arc<UnitController<C>>,
    pub timedate: Arc<TimeDateSync<C>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            units: Arc::clone(&self.units),
            timedate: Arc::clone(&self.timedate),
        }
    }
}

impl<C> AppState<C>
where
    C: Connector + Clone,
    C::Connection: ManagerBus + TimedateBus,
{
    pub fn new(connector: C, job_timeout: Duration) -> Self {
        Self {
            units: Arc::new(UnitController::new(connector.clone(), job_timeout)),
            timedate: Arc::new(TimeDateSync::new(connector)),
        }
    }
}

/// Status code for an error
pub fn status_code(error: &Error) -> StatusCode {
    match error {
        Error::UnknownProperty(_) | Error::Encode { .. } | Error::Parse { .. } => {
            StatusCode::BAD_REQUEST
        }
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::BusCall { .. }
        | Error::Decode { .. }
        | Error::JobFailed { .. }
        | Error::JobSignalsClosed { .. } => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (status_code(&self), self.to_string()).into_response()
    }
}

pub fn router<C>(state: AppState<C>) -> Router
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    Router::new()
        .route("/unit", get(list_units::<C>).post(unit_action::<C>))
        .route("/unit/{unit}/status", get(unit_status::<C>))
        .route("/systemd/{property}", get(manager_property::<C>))
        .route("/timedate", get(timedate_all::<C>).post(timedate_set::<C>))
        .route("/timedate/timezones", get(timezones::<C>))
        .route("/timedate/{property}", get(timedate_one::<C>))
        .with_state(state)
}

async fn list_units<C>(State(state): State<AppState<C>>) -> Result<Json<Vec<Unit>>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.units.list_units().await.map(Json)
}

async fn unit_status<C>(
    State(state): State<AppState<C>>,
    Path(unit): Path<String>,
) -> Result<Json<UnitStatus>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.units.unit_status(&unit).await.map(Json)
}

async fn unit_action<C>(
    State(state): State<AppState<C>>,
    Json(action): Json<UnitAction>,
) -> Result<Json<ActionReply>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.units.dispatch(action).await.map(Json)
}

async fn manager_property<C>(
    State(state): State<AppState<C>>,
    Path(property): Path<String>,
) -> Result<Json<Property>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.units.manager_property(&property).await.map(Json)
}

async fn timedate_all<C>(State(state): State<AppState<C>>) -> Result<Json<TimeDateQuery>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.timedate.query_snapshot(None).await.map(Json)
}

async fn timedate_one<C>(
    State(state): State<AppState<C>>,
    Path(property): Path<String>,
) -> Result<Json<TimeDateQuery>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.timedate.query_snapshot(Some(&property)).await.map(Json)
}

async fn timezones<C>(State(state): State<AppState<C>>) -> Result<Json<Vec<String>>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state.timedate.list_timezones().await.map(Json)
}

async fn timedate_set<C>(
    State(state): State<AppState<C>>,
    Json(request): Json<TimeDateRequest>,
) -> Result<Json<TimedateReply>>
where
    C: Connector,
    C::Connection: ManagerBus + TimedateBus,
{
    state
        .timedate
        .set_property(&request.property, &request.value)
        .await
        .map(Json)
}
