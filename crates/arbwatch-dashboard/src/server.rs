//! HTTP server implementation using axum.

use std::net::SocketAddr;
use std::time::Duration;

use arbwatch_telemetry::Metrics;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use crate::broadcast::{run_status_ticker, StatusCadence};
use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::state::DashboardState;
use crate::types::{DashboardSnapshot, UpdateRequest};

const MISSING_FIELDS: &str = "Missing eventName or data";

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    dashboard_state: DashboardState,
    cadence: StatusCadence,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        dashboard_state: DashboardState,
        cadence: StatusCadence,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dashboard_state,
            cadence,
            shutdown,
        }
    }
}

/// Create the axum router.
pub fn create_router(state: AppState, config: &DashboardConfig) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/update", post(post_update))
        .route("/api/snapshot", get(get_snapshot))
        .route("/metrics", get(get_metrics))
        .layer(cors_layer(config))
        .with_state(state)
}

fn cors_layer(config: &DashboardConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if config.any_origin() {
        return layer.allow_origin(AllowOrigin::any());
    }
    match HeaderValue::from_str(config.allowed_origin.trim()) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(e) => {
            warn!(
                origin = %config.allowed_origin,
                error = %e,
                "Invalid CORS origin, cross-origin requests will be refused"
            );
            layer
        }
    }
}

/// Inject an event and broadcast it to all viewers.
async fn post_update(State(state): State<AppState>, body: Bytes) -> Response {
    let parts = serde_json::from_slice::<UpdateRequest>(&body)
        .ok()
        .and_then(UpdateRequest::into_parts);

    let Some((event_name, data)) = parts else {
        debug!(len = body.len(), "Rejected update request");
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": MISSING_FIELDS }))).into_response();
    };

    let receivers = state.dashboard_state.publish(&event_name, &data);
    debug!(event = %event_name, receivers, "Update broadcast");
    Json(json!({ "success": true })).into_response()
}

/// Get current state snapshot as JSON.
async fn get_snapshot(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard_state.collect_snapshot())
}

/// Prometheus text exposition.
async fn get_metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Registration queues the initial snapshot ahead of any broadcast.
    let mut subscription = state.dashboard_state.register_viewer();
    let id = subscription.id();
    info!(
        %id,
        viewers = state.dashboard_state.hub().viewer_count(),
        "Viewer connected"
    );

    // Spawn task to handle incoming messages (for ping/pong and close)
    let mut incoming_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    debug!("Client sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut status_timer = state.cadence.per_viewer_interval().map(status_interval);

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                            debug!(%id, "Failed to send frame, client disconnected");
                            break;
                        }
                    }
                    None => {
                        warn!(%id, "Viewer dropped by hub, closing connection");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = next_tick(&mut status_timer) => {
                state.dashboard_state.send_system_status(id);
            }
            _ = &mut incoming_task => {
                debug!(%id, "Incoming task completed, closing connection");
                break;
            }
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    incoming_task.abort();
    drop(subscription);
    info!(
        %id,
        viewers = state.dashboard_state.hub().viewer_count(),
        "Viewer disconnected"
    );
}

fn status_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Bind the listening socket on all interfaces.
pub async fn bind(port: u16) -> DashboardResult<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| DashboardError::Bind { addr, source })
}

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    dashboard_state: DashboardState,
    config: DashboardConfig,
    cadence: StatusCadence,
    shutdown: CancellationToken,
) -> DashboardResult<()> {
    if let StatusCadence::Broadcast(interval) = cadence {
        let ticker_state = dashboard_state.clone();
        let ticker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_status_ticker(ticker_state, interval, ticker_shutdown).await;
        });
    }

    let state = AppState::new(dashboard_state, cadence, shutdown.clone());
    let app = create_router(state, &config);

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, origin = %config.allowed_origin, "Dashboard server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Dashboard server stopped");
    Ok(())
}

/// Bind and run the dashboard HTTP server.
pub async fn run_server(
    dashboard_state: DashboardState,
    config: DashboardConfig,
    cadence: StatusCadence,
    shutdown: CancellationToken,
) -> DashboardResult<()> {
    info!(port = config.port, "Starting dashboard server");
    let listener = bind(config.port).await?;
    serve(listener, dashboard_state, config, cadence, shutdown).await
}
