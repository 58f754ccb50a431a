mod browser;
mod chat;
mod docs;
mod files;
mod history;
mod teams;

use axum::Router;
use axum::routing::get;
use axum::routing::post;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/history/sessions", get(history::list_sessions))
        .route(
            "/history/sessions/{id}",
            get(history::get_session).delete(history::delete_session),
        )
        .route("/history/files", get(history::list_files))
        .route("/history/search", get(history::search))
        .route("/files/upload-image", post(files::upload_image))
        .route("/files/upload-file", post(files::upload_file))
        .route("/files/preview/{file_id}", get(files::preview))
        .route("/files/{file_id}", get(files::download))
        .route("/docs/ppt", post(docs::ppt))
        .route("/docs/quote", post(docs::quote))
        .route("/docs/quote-xlsx", post(docs::quote_xlsx))
        .route("/docs/inspection", post(docs::inspection))
        .route("/docs/inspection-xlsx", post(docs::inspection_xlsx))
        .route("/prototype/generate", post(docs::prototype))
        .route("/browser/start", post(browser::start))
        .route("/browser/navigate", post(browser::navigate))
        .route("/browser/screenshot", post(browser::screenshot))
        .route("/teams", get(teams::my_teams))
        .route("/requirements", get(teams::list).post(teams::create))
        .route("/requirements/{id}/deliver", post(teams::deliver))
        .route("/requirements/{id}/accept", post(teams::accept))
        .route("/requirements/{id}/reject", post(teams::reject))
        .with_state(state)
}
