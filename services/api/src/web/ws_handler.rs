//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! The browser reports device fixes and consent decisions; the server answers
//! with session events and map draw commands.

use crate::{
    adapters::WsMapWidget,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::{AppState, CurrentUser, UserTracking},
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::USER_AGENT, HeaderMap},
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use location_tracking_core::{
    AmbientEnvironment, MapPresenter, PlatformError, PositionSample, SessionEvent, Subscription,
    TrackingStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often markers are redrawn on an open map.
const PEER_REFRESH: Duration = Duration::from_secs(15);

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user, user_agent))
}

/// What the main loop should do after handling a client message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    RemountMap,
    Close,
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    user: CurrentUser,
    user_agent: Option<String>,
) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, user_id = %user.id, "New WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let closed = CancellationToken::new();

    // Every outbound message goes through the outbox so listeners never block on the socket.
    let writer = {
        let closed = closed.clone();
        tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize server message: {:?}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    warn!(%connection_id, "WebSocket send failed, closing connection");
                    break;
                }
            }
            closed.cancel();
        })
    };

    // --- 1. Initialization Phase ---
    let (environment, container_sized) = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init {
                timezone,
                language,
                screen_width,
                screen_height,
                map_width,
                map_height,
            }) => {
                let environment = AmbientEnvironment {
                    user_agent,
                    screen: screen_width.zip(screen_height),
                    timezone,
                    language,
                };
                (environment, map_width > 0 && map_height > 0)
            }
            _ => {
                error!(%connection_id, "First message was not a valid Init message.");
                let _ = outbox.send(ServerMessage::Error {
                    message: "The first message must be an init message.".to_string(),
                });
                drop(outbox);
                let _ = writer.await;
                return;
            }
        },
        _ => {
            error!(%connection_id, "Client disconnected before sending Init message.");
            return;
        }
    };

    let tracking = app_state.sessions.connect(&user).await;
    tracking.session.set_environment(environment);
    let subscriptions = subscribe_session(&tracking, &outbox);

    let status = tracking.session.initialize(&user.id).await;
    send_status(&outbox, &tracking, status);

    let container_ready = Arc::new(AtomicBool::new(container_sized));
    let mut presenter = mount_map(&app_state, &tracking, &outbox, &container_ready).await;
    presenter.show_peers(&app_state.sessions.peers(&user.id).await);

    // --- 2. Main Message Loop ---
    let mut peer_refresh = interval_at(Instant::now() + PEER_REFRESH, PEER_REFRESH);
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = tracking.ended.cancelled() => {
                info!(%connection_id, "Tracking session ended elsewhere, closing connection.");
                break;
            }
            _ = peer_refresh.tick() => {
                presenter.refresh();
                presenter.show_peers(&app_state.sessions.peers(&user.id).await);
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%connection_id, "Client closed the connection.");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%connection_id, "WebSocket receive error: {:?}", e);
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                let message = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%connection_id, "Failed to parse client message: {}", e);
                        let _ = outbox.send(ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        });
                        continue;
                    }
                };

                match handle_client_message(message, &app_state, &user, &tracking, &outbox, &container_ready, &presenter).await {
                    Flow::Continue => {}
                    Flow::RemountMap => {
                        presenter.unmount();
                        presenter = mount_map(&app_state, &tracking, &outbox, &container_ready).await;
                        presenter.show_peers(&app_state.sessions.peers(&user.id).await);
                    }
                    Flow::Close => break,
                }
            }
        }
    }

    // --- 3. Cleanup ---
    presenter.unmount();
    drop(presenter);
    drop(subscriptions);
    let ended = app_state.sessions.disconnect(&user.id, &tracking).await;
    if !ended && tracking.ended.is_cancelled() {
        // A decision that raced a logout elsewhere may have restarted the old session.
        tracking.session.stop();
    }
    drop(outbox);
    if let Err(e) = writer.await {
        error!(%connection_id, "WebSocket writer task failed: {:?}", e);
    }
    info!(%connection_id, user_id = %user.id, "WebSocket connection closed");
}

async fn handle_client_message(
    message: ClientMessage,
    app_state: &Arc<AppState>,
    user: &CurrentUser,
    tracking: &UserTracking,
    outbox: &UnboundedSender<ServerMessage>,
    container_ready: &AtomicBool,
    presenter: &MapPresenter<WsMapWidget>,
) -> Flow {
    // A logout elsewhere ended this session; a new login owns the user now.
    if tracking.ended.is_cancelled() {
        return Flow::Close;
    }

    match message {
        ClientMessage::Init { .. } => {
            warn!(user_id = %user.id, "Ignoring repeated Init message");
        }

        ClientMessage::Position {
            latitude,
            longitude,
            accuracy,
            timestamp,
        } => {
            // Fixes are only accepted while the user has consented.
            if tracking.session.status() == TrackingStatus::Active {
                tracking.device.report(Ok(PositionSample {
                    latitude,
                    longitude,
                    accuracy,
                    timestamp,
                }));
            } else {
                debug!(user_id = %user.id, "Dropping fix received while tracking is not active");
            }
        }

        ClientMessage::PositionError { code, message } => {
            if tracking.session.status() == TrackingStatus::Active {
                tracking.device.report(Err(PlatformError { code, message }));
            }
        }

        ClientMessage::ConsentDecision { granted } => {
            let outcome = tracking.session.record_consent(&user.id, granted).await;
            if !outcome.persisted {
                let _ = outbox.send(ServerMessage::Error {
                    message: "Your choice could not be saved and applies to this session only."
                        .to_string(),
                });
            }
            send_status(outbox, tracking, outcome.status);
        }

        ClientMessage::MapContainer { width, height } => {
            let ready = width > 0 && height > 0;
            container_ready.store(ready, Ordering::SeqCst);
            if ready && !presenter.is_initialized() {
                return Flow::RemountMap;
            }
        }

        ClientMessage::TileError => presenter.on_tile_error(),

        ClientMessage::Logout => {
            app_state.sessions.remove(&user.id).await;
            tracking.session.logout().await;
            return Flow::Close;
        }
    }
    Flow::Continue
}

/// Forwards the session's samples, errors and lifecycle events to this connection.
fn subscribe_session(
    tracking: &UserTracking,
    outbox: &UnboundedSender<ServerMessage>,
) -> Vec<Subscription> {
    let on_sample = {
        let outbox = outbox.clone();
        tracking.session.on_sample(move |sample| {
            let _ = outbox.send(ServerMessage::Sample { sample: *sample });
        })
    };

    let on_error = {
        let outbox = outbox.clone();
        tracking.session.on_error(move |error| {
            // Permission denial is reported once through the event below.
            if !error.kind.is_terminal() {
                let _ = outbox.send(ServerMessage::LocationError {
                    kind: error.kind,
                    message: error.message.clone(),
                });
            }
        })
    };

    let on_event = {
        let outbox = outbox.clone();
        tracking.session.on_event(move |event| {
            let _ = outbox.send(event_message(event));
        })
    };

    vec![on_sample, on_error, on_event]
}

fn event_message(event: &SessionEvent) -> ServerMessage {
    match event {
        SessionEvent::ConsentPromptRequested { .. } => ServerMessage::ConsentPrompt,
        SessionEvent::TrackingStarted { device, .. } => ServerMessage::TrackingStarted {
            device: device.clone(),
        },
        SessionEvent::TrackingStopped => ServerMessage::TrackingStopped,
        SessionEvent::PermissionDenied { message } => ServerMessage::PermissionDenied {
            message: message.clone(),
        },
        SessionEvent::TrackingUnavailable { reason } => ServerMessage::TrackingUnavailable {
            reason: reason.clone(),
        },
    }
}

fn send_status(outbox: &UnboundedSender<ServerMessage>, tracking: &UserTracking, status: TrackingStatus) {
    let _ = outbox.send(ServerMessage::SessionStatus {
        status,
        consent_checked: tracking.session.is_consent_checked(),
    });
}

async fn mount_map(
    app_state: &AppState,
    tracking: &UserTracking,
    outbox: &UnboundedSender<ServerMessage>,
    container_ready: &Arc<AtomicBool>,
) -> MapPresenter<WsMapWidget> {
    let widget = WsMapWidget::new(outbox.clone(), container_ready.clone());
    MapPresenter::mount(widget, &tracking.session, app_state.config.map_config()).await
}
