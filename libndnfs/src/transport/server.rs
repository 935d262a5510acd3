//! Unix-socket HTTP server that the container engine talks to, dispatching
//! each plugin request to a [`VolumeDriver`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::driver::VolumeDriver;
use crate::error::NdnfsError;
use crate::message::{PluginMethod, PluginRequest, PluginResponse};

/// Default plugin socket; the engine discovers plugins by socket name.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/ndnfs.sock";

/// Volume-plugin server bound to a unix socket.
pub struct PluginServer {
    listener: UnixListener,
    socket_path: PathBuf,
    driver: Arc<VolumeDriver>,
}

impl PluginServer {
    /// Bind `socket_path`, replacing a stale socket file left by a previous
    /// run.
    pub fn bind(socket_path: impl Into<PathBuf>, driver: Arc<VolumeDriver>) -> Result<Self, NdnfsError> {
        let socket_path = socket_path.into();
        let socket_display = socket_path.to_string_lossy().into_owned();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NdnfsError::exec("mkdir", &socket_display, e))?;
        }
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_display, "removed stale plugin socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(NdnfsError::exec("remove stale socket", &socket_display, e)),
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| NdnfsError::exec("bind", &socket_display, e))?;
        info!(path = %socket_display, "volume plugin listening");
        Ok(Self {
            listener,
            socket_path,
            driver,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve requests until `shutdown` resolves, then remove the socket.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), NdnfsError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.driver);
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(NdnfsError::internal);

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!(path = %self.socket_path.display(), error = %e, "failed to remove plugin socket");
        }
        info!("volume plugin stopped");
        result
    }
}

/// One POST route per [`PluginMethod`].
pub fn router(driver: Arc<VolumeDriver>) -> Router {
    PluginMethod::ALL
        .into_iter()
        .fold(Router::new(), |router, method| {
            router.route(
                method.path(),
                post(
                    move |State(driver): State<Arc<VolumeDriver>>, body: Bytes| async move {
                        Json(dispatch(&driver, method, &body).await)
                    },
                ),
            )
        })
        .with_state(driver)
}

/// Decode `body`, run `method` on `driver` and wrap the outcome. Driver
/// errors are reported in the `Err` field, never as transport failures.
pub async fn dispatch(driver: &VolumeDriver, method: PluginMethod, body: &[u8]) -> PluginResponse {
    let request = match PluginRequest::from_body(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(%method, error = %e, "rejecting plugin request");
            return PluginResponse::error(&e);
        }
    };
    debug!(%method, volume = %request.name, "plugin request received");

    if method.needs_name() && request.name.is_empty() {
        return PluginResponse::error(&NdnfsError::InvalidArgument(format!(
            "{method}: volume name is required"
        )));
    }

    let result = match method {
        PluginMethod::Activate => Ok(PluginResponse::activate()),
        PluginMethod::Capabilities => Ok(PluginResponse {
            capabilities: Some(driver.capabilities()),
            ..Default::default()
        }),
        PluginMethod::Create => {
            let opts = request.opts.unwrap_or_default();
            driver
                .create(&request.name, &opts)
                .await
                .map(|_| PluginResponse::default())
        }
        PluginMethod::Remove => driver
            .remove(&request.name)
            .await
            .map(|()| PluginResponse::default()),
        PluginMethod::Mount => driver.mount(&request.name).await.map(|path| PluginResponse {
            mountpoint: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        }),
        PluginMethod::Path => driver.path(&request.name).map(|path| PluginResponse {
            mountpoint: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        }),
        PluginMethod::Unmount => driver
            .unmount(&request.name)
            .await
            .map(|()| PluginResponse::default()),
        PluginMethod::Get => driver.get(&request.name).await.map(|volume| PluginResponse {
            volume: Some(volume),
            ..Default::default()
        }),
        PluginMethod::List => driver.list().await.map(|volumes| PluginResponse {
            volumes: Some(volumes),
            ..Default::default()
        }),
    };

    result.unwrap_or_else(|e| {
        warn!(%method, volume = %request.name, error = %e, "plugin request failed");
        PluginResponse::error(&e)
    })
}
