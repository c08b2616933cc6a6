//! HTTP routes of the volume plugin protocol.
//!
//! Every endpoint is a `POST` whose body is JSON.  Bodies are decoded by hand
//! because Docker sends them with a vendor content type the `Json` extractor
//! rejects; a body that fails to decode yields a response with `Err` set.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Json, State};
use axum::routing::post;
use libfileset::VolumeController;
use libfileset::message::*;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

type Controller = State<Arc<VolumeController>>;

pub(crate) fn create_router(controller: Arc<VolumeController>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(controller)
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &Bytes) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(endpoint, error = %e, "malformed request body");
        format!("malformed {endpoint} request: {e}")
    })
}

async fn activate(State(ctl): Controller) -> Json<ActivateResponse> {
    Json(ctl.activate().await)
}

async fn create(State(ctl): Controller, body: Bytes) -> Json<GenericResponse> {
    match decode::<CreateRequest>("create", &body) {
        Ok(req) => {
            debug!(name = %req.name, "create request");
            Json(ctl.create(req).await)
        }
        Err(err) => Json(GenericResponse { err }),
    }
}

async fn remove(State(ctl): Controller, body: Bytes) -> Json<GenericResponse> {
    match decode::<NameRequest>("remove", &body) {
        Ok(req) => Json(ctl.remove(req).await),
        Err(err) => Json(GenericResponse { err }),
    }
}

async fn mount(State(ctl): Controller, body: Bytes) -> Json<MountResponse> {
    match decode::<MountRequest>("mount", &body) {
        Ok(req) => Json(ctl.mount(req).await),
        Err(err) => Json(MountResponse {
            mountpoint: String::new(),
            err,
        }),
    }
}

async fn unmount(State(ctl): Controller, body: Bytes) -> Json<GenericResponse> {
    match decode::<MountRequest>("unmount", &body) {
        Ok(req) => Json(ctl.unmount(req).await),
        Err(err) => Json(GenericResponse { err }),
    }
}

async fn path(State(ctl): Controller, body: Bytes) -> Json<MountResponse> {
    match decode::<NameRequest>("path", &body) {
        Ok(req) => Json(ctl.path(req).await),
        Err(err) => Json(MountResponse {
            mountpoint: String::new(),
            err,
        }),
    }
}

async fn get(State(ctl): Controller, body: Bytes) -> Json<GetResponse> {
    match decode::<NameRequest>("get", &body) {
        Ok(req) => Json(ctl.get(req).await),
        Err(err) => Json(GetResponse { volume: None, err }),
    }
}

async fn list(State(ctl): Controller) -> Json<ListResponse> {
    Json(ctl.list().await)
}

async fn capabilities(State(ctl): Controller) -> Json<CapabilitiesResponse> {
    Json(ctl.capabilities())
}
