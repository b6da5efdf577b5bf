//! C8 over the wire: one WebSocket per subscribed `NamedState`, pushing the
//! "at-least-latest" value every time `Kernel::subscribe`'s `watch::Receiver`
//! observes a change. Split/drain/abort/close on disconnect, same as any
//! other WS route here, but driven by `watch::Receiver::changed()` instead
//! of polling a stream, since a subscription is a single coalescing cell,
//! not a log.

use axum::{
    Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::{kernel_actor::NamedState, state::AppState};

#[derive(Debug, Deserialize)]
struct SchemaQuery {
    schema: Option<String>,
}

async fn run(socket: WebSocket, state: AppState, named: NamedState) {
    let Some((handle, mut rx)) = state.kernel.subscribe(named).await else {
        return;
    };

    let (mut sender, mut receiver) = socket.split();
    let drain_handle = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    loop {
        let value = rx.borrow().clone();
        let json = serde_json::to_string(&value).unwrap_or_default();
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }

    handle.unsubscribe();
    drain_handle.abort();
    let _ = sender.close().await;
}

async fn subscribe_schemas(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, NamedState::Schemas))
}

async fn subscribe_change_ids(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, NamedState::ChangeIds))
}

async fn subscribe_status_list(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, NamedState::StatusList))
}

async fn subscribe_change_status(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SchemaQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, NamedState::ChangeStatus { id, schema: q.schema }))
}

async fn subscribe_schema_detail(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, NamedState::SchemaDetail { name }))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/subscribe",
        Router::new()
            .route("/schemas", get(subscribe_schemas))
            .route("/change-ids", get(subscribe_change_ids))
            .route("/status-list", get(subscribe_status_list))
            .route("/changes/{id}/status", get(subscribe_change_status))
            .route("/schemas/{name}/detail", get(subscribe_schema_detail)),
    )
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as TMessage;

    use super::*;
    use crate::test_support::{FakeCli, test_app_state};

    // `tower::ServiceExt::oneshot` only drives the HTTP request/response
    // cycle, not the hijacked duplex IO a WebSocket upgrade needs, so these
    // bind a real loopback listener and speak the protocol with a
    // `tokio-tungstenite` client instead.
    async fn serve(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router().with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn subscribe_schemas_pushes_the_current_value_on_connect() {
        let (_dir, state) = test_app_state(FakeCli::default());
        state.kernel.ensure(NamedState::Schemas).await.unwrap();
        let base = serve(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/subscribe/schemas"))
            .await
            .unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let TMessage::Text(text) = msg else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kind"], "Schemas");
        assert_eq!(value["value"][0]["name"], "default");
    }

    #[tokio::test]
    async fn subscribe_change_ids_pushes_the_ensured_empty_list() {
        let (_dir, state) = test_app_state(FakeCli::default());
        state.kernel.ensure(NamedState::ChangeIds).await.unwrap();
        let base = serve(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/subscribe/change-ids"))
            .await
            .unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let TMessage::Text(text) = msg else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kind"], "ChangeIds");
        assert_eq!(value["value"], serde_json::Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn subscribe_before_anything_is_ensured_closes_without_a_frame() {
        let (_dir, state) = test_app_state(FakeCli::default());
        let base = serve(state).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("{base}/subscribe/status-list"))
            .await
            .unwrap();

        assert!(ws.next().await.is_none());
    }
}
