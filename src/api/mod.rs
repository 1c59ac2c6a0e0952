use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::{
    create_pool, get_league_board, get_match_detail, get_prediction_feed, get_upcoming_boards,
    init_database_with_pool,
};
use crate::models::{ApiResponse, LeagueBoard, MatchDetail, PredictionFeedRow};

pub async fn serve(port: u16) -> anyhow::Result<()> {
    let pool = create_pool().await?;
    init_database_with_pool(&pool).await?;

    let app = create_router().with_state(pool);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("ahforge API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn create_router() -> Router<SqlitePool> {
    Router::new()
        .route("/health", get(health_check))
        .route("/matches/upcoming", get(get_upcoming_handler))
        .route("/matches/{match_id}", get(get_match_handler))
        .route("/leagues/{code}", get(get_league_handler))
        .route("/api/predictions", get(get_predictions_feed_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// Health check endpoint
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ahforge API is running"))
}

// GET /matches/upcoming - upcoming matches with lines, grouped by league
async fn get_upcoming_handler(
    State(pool): State<SqlitePool>,
) -> Result<Json<ApiResponse<Vec<LeagueBoard>>>, StatusCode> {
    match get_upcoming_boards(&pool).await {
        Ok(boards) => Ok(Json(ApiResponse::success(boards))),
        Err(e) => {
            tracing::error!("Failed to fetch upcoming matches: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /leagues/{code} - one league's matches with lines
async fn get_league_handler(
    State(pool): State<SqlitePool>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<LeagueBoard>>, StatusCode> {
    match get_league_board(&pool, &code).await {
        Ok(Some(board)) => Ok(Json(ApiResponse::success(board))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch league {}: {}", code, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /matches/{match_id} - one match with every stored prediction row
async fn get_match_handler(
    State(pool): State<SqlitePool>,
    Path(match_id): Path<String>,
) -> Result<Json<ApiResponse<MatchDetail>>, StatusCode> {
    match get_match_detail(&pool, &match_id).await {
        Ok(Some(detail)) => Ok(Json(ApiResponse::success(detail))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch match {}: {}", match_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /api/predictions?league=CODE - flat feed; empty filter result is an
// empty array, never an error
#[derive(Deserialize)]
struct PredictionsFeedQuery {
    league: Option<String>,
}

async fn get_predictions_feed_handler(
    State(pool): State<SqlitePool>,
    Query(params): Query<PredictionsFeedQuery>,
) -> Result<Json<Vec<PredictionFeedRow>>, StatusCode> {
    match get_prediction_feed(&pool, params.league.as_deref()).await {
        Ok(feed) => Ok(Json(feed)),
        Err(e) => {
            tracing::error!("Failed to fetch prediction feed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
