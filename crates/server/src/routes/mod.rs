pub mod named_state;
pub mod subscribe;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/api", named_state::router())
        .merge(subscribe::router())
}
