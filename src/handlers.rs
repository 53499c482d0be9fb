use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    error::{AppError, AppResult},
    models::{Fruit, FruitPayload, HelloJson},
    state::AppState,
};

pub async fn hello() -> &'static str {
    "hello"
}

pub async fn hello_json() -> Json<HelloJson> {
    Json(HelloJson::yamada())
}

/// Live implementation of the greeting service's `GET /helloext`.
pub async fn hello_ext() -> &'static str {
    info!("called external service");
    "Hello "
}

pub async fn greeting(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<String> {
    let prefix = state.greeting.hello().await?;
    Ok(prefix + &name)
}

pub async fn list_fruits(State(state): State<AppState>) -> AppResult<Json<Vec<Fruit>>> {
    Ok(Json(state.fruits.list().await?))
}

pub async fn get_fruit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Fruit>> {
    let fruit = state
        .fruits
        .get_by_id(id)
        .await?
        .ok_or_else(|| fruit_not_found(id))?;

    Ok(Json(fruit))
}

pub async fn create_fruit(
    State(state): State<AppState>,
    Json(payload): Json<FruitPayload>,
) -> AppResult<(StatusCode, Json<Fruit>)> {
    if payload.id.is_some() {
        return Err(AppError::validation("id was invalidly set on request"));
    }
    let name = required_name(payload.name)?;

    let fruit = state.fruits.create(name).await?;
    info!(id = fruit.id, name = %fruit.name, "fruit created");

    Ok((StatusCode::CREATED, Json(fruit)))
}

pub async fn update_fruit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<FruitPayload>,
) -> AppResult<Json<Fruit>> {
    let name = required_name(payload.name)?;

    let fruit = state
        .fruits
        .rename(id, name)
        .await?
        .ok_or_else(|| fruit_not_found(id))?;

    Ok(Json(fruit))
}

pub async fn delete_fruit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    if !state.fruits.delete(id).await? {
        return Err(fruit_not_found(id));
    }

    Ok(StatusCode::NO_CONTENT)
}

fn required_name(name: Option<String>) -> AppResult<String> {
    match name {
        Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => Err(AppError::validation("fruit name was not set on request")),
    }
}

fn fruit_not_found(id: i64) -> AppError {
    AppError::not_found(format!("fruit with id {id} does not exist"))
}
