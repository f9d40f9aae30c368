use crate::{
    errors::AppError, handlers::identity::AuthenticatedUser, models::user::User, state::AppState,
};
use axum::{Json, extract::State};

/// `GET /user`: the caller's user record and owned file ids.
pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.vault.get_user(&user.email).await?))
}
