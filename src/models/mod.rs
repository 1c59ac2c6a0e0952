use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct League {
    pub id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: i64,
    pub league_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Match {
    pub id: String, // derived from league code + date + team names
    pub league_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff_utc: DateTime<Utc>,
    pub status: String, // "scheduled", "live", "finished"
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Prediction {
    pub id: String,
    pub match_id: String,
    pub model: String, // "BP-ag", "BP-xg", "WB-ag", "WB-xg", "BP+WB Avg"
    pub ah_line: f64,  // home-side line, negative favors home
    pub p_home_cover: f64,
    pub p_away_cover: f64,
    pub fair_home_decimal: f64,
    pub fair_away_decimal: f64,
    pub edge_home: f64,
    pub edge_away: f64,
    pub created_at: DateTime<Utc>,
}

/// One upcoming match with its per-model handicap lines, as served by the
/// index and league endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLines {
    pub match_id: String,
    pub kickoff_utc: DateTime<Utc>,
    pub home: String,
    pub away: String,
    pub bp_ag: Option<f64>,
    pub bp_xg: Option<f64>,
    pub wb_ag: Option<f64>,
    pub wb_xg: Option<f64>,
    pub avg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueBoard {
    pub league: League,
    pub matches: Vec<MatchLines>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    pub match_info: Match,
    pub league: League,
    pub home: String,
    pub away: String,
    pub predictions: Vec<Prediction>,
}

/// Flat row for the /api/predictions feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionFeedRow {
    pub match_id: String,
    pub kickoff_utc: DateTime<Utc>,
    pub league_code: String,
    pub league_name: String,
    pub model: String,
    pub ah_line: f64,
}

// API Response types
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }
}
