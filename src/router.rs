//! Maps the three control paths onto supervisor operations.

use std::{str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use tracing::{debug, error};

use crate::{
    error::SupervisorError,
    http::{Request, Response},
    supervisor::ProcessControl,
};

/// JSON body returned for every recognized path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: String,
}

impl ResponseEnvelope {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            ok: true,
            result: result.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: String::new(),
            error: error.into(),
        }
    }
}

impl From<Result<String, SupervisorError>> for ResponseEnvelope {
    fn from(outcome: Result<String, SupervisorError>) -> Self {
        match outcome {
            Ok(result) => Self::success(result),
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

/// The fixed set of control endpoints. Targets are matched verbatim, so a
/// query string makes a path unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
pub enum Route {
    #[strum(serialize = "/run")]
    Run,
    #[strum(serialize = "/stop")]
    Stop,
    #[strum(serialize = "/status")]
    Status,
}

/// Dispatches parsed requests to a [`ProcessControl`] implementation.
pub struct Router<C: ProcessControl> {
    control: Arc<C>,
}

impl<C: ProcessControl> Clone for Router<C> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

impl<C: ProcessControl> Router<C> {
    pub fn new(control: Arc<C>) -> Self {
        Self { control }
    }

    pub fn handle(&self, request: &Request) -> Response {
        let Ok(route) = Route::from_str(request.target()) else {
            debug!("No route for {} {}", request.method(), request.target());
            return Response::not_found();
        };

        debug!("Dispatching {} {}", request.method(), route.as_ref());
        let envelope = ResponseEnvelope::from(self.dispatch(route));

        match Response::json(&envelope) {
            Ok(response) => response.with_header("Access-Control-Allow-Origin", "*"),
            Err(err) => {
                error!("Failed to encode response for {}: {err}", route.as_ref());
                Response::internal_error().with_header("Access-Control-Allow-Origin", "*")
            }
        }
    }

    fn dispatch(&self, route: Route) -> Result<String, SupervisorError> {
        match route {
            Route::Run => self.control.start().map(|()| String::new()),
            Route::Stop => self.control.stop().map(|()| String::new()),
            Route::Status => Ok(self.control.status().code().to_string()),
        }
    }
}
