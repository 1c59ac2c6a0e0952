use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::models::*;
use crate::services::combiner::{LeagueForecast, ModelKind, ENSEMBLE_LABEL};
use crate::services::pipeline::PredictionWriteMode;
use crate::utils::{line_or_zero, make_match_id, midnight_utc, today_utc};

pub async fn create_pool() -> Result<SqlitePool> {
    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/ahforge.db".to_string());

    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(&database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database() -> Result<()> {
    let pool = create_pool().await?;
    init_database_with_pool(&pool).await
}

/// Called from the server so schema creation shares the main pool.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leagues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            league_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (league_id, name),
            FOREIGN KEY (league_id) REFERENCES leagues (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            league_id INTEGER NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            kickoff_utc TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            FOREIGN KEY (league_id) REFERENCES leagues (id),
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL,
            model TEXT NOT NULL,
            ah_line REAL NOT NULL,
            p_home_cover REAL NOT NULL DEFAULT 0.5,
            p_away_cover REAL NOT NULL DEFAULT 0.5,
            fair_home_decimal REAL NOT NULL DEFAULT 0.0,
            fair_away_decimal REAL NOT NULL DEFAULT 0.0,
            edge_home REAL NOT NULL DEFAULT 0.0,
            edge_away REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (match_id) REFERENCES matches (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff_utc)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_match ON predictions(match_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

// ── Upserts ──────────────────────────────────────────────────────────────────

/// League rows are created on first sighting (name defaults to the code) and
/// never deleted.
async fn upsert_league(conn: &mut SqliteConnection, code: &str) -> Result<i64> {
    if let Some(row) = sqlx::query("SELECT id FROM leagues WHERE code = ?")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?
    {
        return Ok(row.get("id"));
    }

    let result = sqlx::query("INSERT INTO leagues (code, name) VALUES (?, ?)")
        .bind(code)
        .bind(code)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn upsert_team(conn: &mut SqliteConnection, league_id: i64, name: &str) -> Result<i64> {
    if let Some(row) = sqlx::query("SELECT id FROM teams WHERE league_id = ? AND name = ?")
        .bind(league_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
    {
        return Ok(row.get("id"));
    }

    let result = sqlx::query("INSERT INTO teams (league_id, name) VALUES (?, ?)")
        .bind(league_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert-if-absent only: an existing match keeps its original kickoff and
/// teams, stale or not.
async fn upsert_match(conn: &mut SqliteConnection, match_data: &Match) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO matches
        (id, league_id, home_team_id, away_team_id, kickoff_utc, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&match_data.id)
    .bind(match_data.league_id)
    .bind(match_data.home_team_id)
    .bind(match_data.away_team_id)
    .bind(match_data.kickoff_utc.to_rfc3339())
    .bind(&match_data.status)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_prediction(
    conn: &mut SqliteConnection,
    mode: PredictionWriteMode,
    match_id: &str,
    model: &str,
    ah_line: f64,
) -> Result<()> {
    if mode == PredictionWriteMode::Replace {
        sqlx::query("DELETE FROM predictions WHERE match_id = ? AND model = ?")
            .bind(match_id)
            .bind(model)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO predictions
        (id, match_id, model, ah_line, p_home_cover, p_away_cover,
         fair_home_decimal, fair_away_decimal, edge_home, edge_away, created_at)
        VALUES (?, ?, ?, ?, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(match_id)
    .bind(model)
    .bind(ah_line)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Persist every league forecast in one transaction, committed after the last
/// league: a mid-run crash leaves no partial writes. Returns the number of
/// prediction rows written.
pub async fn store_forecasts(
    pool: &SqlitePool,
    forecasts: &BTreeMap<String, LeagueForecast>,
    mode: PredictionWriteMode,
) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0u64;

    for forecast in forecasts.values() {
        if forecast.is_empty() {
            continue;
        }
        let league_id = upsert_league(&mut tx, &forecast.league).await?;

        for row in &forecast.rows {
            let home_id = upsert_team(&mut tx, league_id, &row.home).await?;
            let away_id = upsert_team(&mut tx, league_id, &row.away).await?;

            let match_id = make_match_id(&forecast.league, row.date, &row.home, &row.away);
            upsert_match(
                &mut tx,
                &Match {
                    id: match_id.clone(),
                    league_id,
                    home_team_id: home_id,
                    away_team_id: away_id,
                    kickoff_utc: midnight_utc(row.date),
                    status: "scheduled".to_string(),
                },
            )
            .await?;

            for kind in ModelKind::ALL {
                write_prediction(&mut tx, mode, &match_id, kind.label(), line_or_zero(row.line(kind)))
                    .await?;
                written += 1;
            }
            write_prediction(&mut tx, mode, &match_id, ENSEMBLE_LABEL, line_or_zero(row.average))
                .await?;
            written += 1;
        }
    }

    tx.commit().await?;
    Ok(written)
}

// ── Read-only queries for the web layer ──────────────────────────────────────

fn lines_from_pairs(pairs: &[(String, f64)]) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let mut lines = (None, None, None, None, None);
    for (model, value) in pairs {
        match model.as_str() {
            "BP-ag" => lines.0 = Some(*value),
            "BP-xg" => lines.1 = Some(*value),
            "WB-ag" => lines.2 = Some(*value),
            "WB-xg" => lines.3 = Some(*value),
            ENSEMBLE_LABEL => lines.4 = Some(*value),
            _ => {}
        }
    }
    lines
}

async fn prediction_pairs(pool: &SqlitePool, match_id: &str) -> Result<Vec<(String, f64)>> {
    let rows = sqlx::query("SELECT model, ah_line FROM predictions WHERE match_id = ?")
        .bind(match_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("model"), r.get("ah_line")))
        .collect())
}

async fn match_lines_from_row(pool: &SqlitePool, row: &sqlx::sqlite::SqliteRow) -> Result<MatchLines> {
    let match_id: String = row.get("id");
    let pairs = prediction_pairs(pool, &match_id).await?;
    let (bp_ag, bp_xg, wb_ag, wb_xg, avg) = lines_from_pairs(&pairs);
    Ok(MatchLines {
        match_id,
        kickoff_utc: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("kickoff_utc"))?
            .with_timezone(&Utc),
        home: row.get("home"),
        away: row.get("away"),
        bp_ag,
        bp_xg,
        wb_ag,
        wb_xg,
        avg,
    })
}

/// Upcoming matches (kickoff today-midnight UTC or later) grouped by league,
/// ordered by league name then kickoff.
pub async fn get_upcoming_boards(pool: &SqlitePool) -> Result<Vec<LeagueBoard>> {
    let midnight = midnight_utc(today_utc()).to_rfc3339();
    let rows = sqlx::query(
        r#"
        SELECT m.id, m.kickoff_utc,
               l.id AS league_id, l.code, l.name AS league_name,
               ht.name AS home, at.name AS away
        FROM matches m
        JOIN leagues l ON l.id = m.league_id
        JOIN teams ht ON ht.id = m.home_team_id
        JOIN teams at ON at.id = m.away_team_id
        WHERE m.kickoff_utc >= ?
        ORDER BY l.name ASC, m.kickoff_utc ASC
        "#,
    )
    .bind(&midnight)
    .fetch_all(pool)
    .await?;

    let mut boards: Vec<LeagueBoard> = Vec::new();
    for row in &rows {
        let league = League {
            id: row.get("league_id"),
            code: row.get("code"),
            name: row.get("league_name"),
        };
        let lines = match_lines_from_row(pool, row).await?;

        match boards.last_mut() {
            Some(board) if board.league.id == league.id => board.matches.push(lines),
            _ => boards.push(LeagueBoard {
                league,
                matches: vec![lines],
            }),
        }
    }
    Ok(boards)
}

pub async fn get_league_by_code(pool: &SqlitePool, code: &str) -> Result<Option<League>> {
    let row = sqlx::query_as::<_, League>("SELECT id, code, name FROM leagues WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Every match for one league, ordered by kickoff ascending, with lines.
pub async fn get_league_board(pool: &SqlitePool, code: &str) -> Result<Option<LeagueBoard>> {
    let Some(league) = get_league_by_code(pool, code).await? else {
        return Ok(None);
    };

    let rows = sqlx::query(
        r#"
        SELECT m.id, m.kickoff_utc, ht.name AS home, at.name AS away
        FROM matches m
        JOIN teams ht ON ht.id = m.home_team_id
        JOIN teams at ON at.id = m.away_team_id
        WHERE m.league_id = ?
        ORDER BY m.kickoff_utc ASC
        "#,
    )
    .bind(league.id)
    .fetch_all(pool)
    .await?;

    let mut matches = Vec::new();
    for row in &rows {
        matches.push(match_lines_from_row(pool, row).await?);
    }
    Ok(Some(LeagueBoard { league, matches }))
}

pub async fn get_match_detail(pool: &SqlitePool, match_id: &str) -> Result<Option<MatchDetail>> {
    let Some(row) = sqlx::query(
        r#"
        SELECT m.id, m.league_id, m.home_team_id, m.away_team_id, m.kickoff_utc, m.status,
               l.code, l.name AS league_name,
               ht.name AS home, at.name AS away
        FROM matches m
        JOIN leagues l ON l.id = m.league_id
        JOIN teams ht ON ht.id = m.home_team_id
        JOIN teams at ON at.id = m.away_team_id
        WHERE m.id = ?
        "#,
    )
    .bind(match_id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let match_info = Match {
        id: row.get("id"),
        league_id: row.get("league_id"),
        home_team_id: row.get("home_team_id"),
        away_team_id: row.get("away_team_id"),
        kickoff_utc: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("kickoff_utc"))?
            .with_timezone(&Utc),
        status: row.get("status"),
    };
    let league = League {
        id: row.get("league_id"),
        code: row.get("code"),
        name: row.get("league_name"),
    };

    let predictions = sqlx::query_as::<_, Prediction>(
        "SELECT * FROM predictions WHERE match_id = ? ORDER BY model ASC",
    )
    .bind(match_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(MatchDetail {
        match_info,
        league,
        home: row.get("home"),
        away: row.get("away"),
        predictions,
    }))
}

/// Flat prediction feed, optionally filtered by league code. An unknown code
/// simply yields an empty list.
pub async fn get_prediction_feed(
    pool: &SqlitePool,
    league_code: Option<&str>,
) -> Result<Vec<PredictionFeedRow>> {
    let base = r#"
        SELECT p.model, p.ah_line, m.id AS match_id, m.kickoff_utc,
               l.code AS league_code, l.name AS league_name
        FROM predictions p
        JOIN matches m ON m.id = p.match_id
        JOIN leagues l ON l.id = m.league_id
    "#;

    let rows = if let Some(code) = league_code {
        sqlx::query(&format!("{base} WHERE l.code = ? ORDER BY m.kickoff_utc ASC"))
            .bind(code)
            .fetch_all(pool)
            .await?
    } else {
        sqlx::query(&format!("{base} ORDER BY m.kickoff_utc ASC"))
            .fetch_all(pool)
            .await?
    };

    let mut feed = Vec::new();
    for row in rows {
        feed.push(PredictionFeedRow {
            match_id: row.get("match_id"),
            kickoff_utc: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("kickoff_utc"))?
                .with_timezone(&Utc),
            league_code: row.get("league_code"),
            league_name: row.get("league_name"),
            model: row.get("model"),
            ah_line: row.get("ah_line"),
        });
    }
    Ok(feed)
}

/// Matches with kickoff inside [today-midnight, today + days]. The refresh
/// job treats zero as a hard failure.
pub async fn count_upcoming_matches(pool: &SqlitePool, days: i64) -> Result<i64> {
    let start = midnight_utc(today_utc());
    let end = start + Duration::days(days);
    let row = sqlx::query("SELECT COUNT(*) AS total FROM matches WHERE kickoff_utc >= ? AND kickoff_utc <= ?")
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_one(pool)
        .await?;
    Ok(row.get("total"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::combiner::CombinedFixture;
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_database_with_pool(&pool).await.unwrap();
        pool
    }

    fn sample_forecasts(date: NaiveDate) -> BTreeMap<String, LeagueForecast> {
        let row = CombinedFixture::new(
            "ENG".to_string(),
            date,
            "Aston Villa".to_string(),
            "West Ham".to_string(),
            [Some(-0.5), Some(-0.7), Some(-0.6), None],
        );
        let mut forecasts = BTreeMap::new();
        forecasts.insert(
            "ENG".to_string(),
            LeagueForecast {
                league: "ENG".to_string(),
                rows: vec![row],
            },
        );
        forecasts
    }

    #[tokio::test]
    async fn test_store_forecasts_replace_mode_is_idempotent() {
        let pool = test_pool().await;
        let date = today_utc() + Duration::days(2);
        let forecasts = sample_forecasts(date);

        store_forecasts(&pool, &forecasts, PredictionWriteMode::Replace)
            .await
            .unwrap();
        store_forecasts(&pool, &forecasts, PredictionWriteMode::Replace)
            .await
            .unwrap();

        let leagues: i64 = sqlx::query("SELECT COUNT(*) AS n FROM leagues")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        let teams: i64 = sqlx::query("SELECT COUNT(*) AS n FROM teams")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        let matches: i64 = sqlx::query("SELECT COUNT(*) AS n FROM matches")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        let predictions: i64 = sqlx::query("SELECT COUNT(*) AS n FROM predictions")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");

        assert_eq!(leagues, 1);
        assert_eq!(teams, 2);
        assert_eq!(matches, 1);
        assert_eq!(predictions, 5); // one row per model label, not per run
    }

    #[tokio::test]
    async fn test_store_forecasts_append_mode_accumulates() {
        let pool = test_pool().await;
        let date = today_utc() + Duration::days(2);
        let forecasts = sample_forecasts(date);

        store_forecasts(&pool, &forecasts, PredictionWriteMode::Append)
            .await
            .unwrap();
        store_forecasts(&pool, &forecasts, PredictionWriteMode::Append)
            .await
            .unwrap();

        let matches: i64 = sqlx::query("SELECT COUNT(*) AS n FROM matches")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        let predictions: i64 = sqlx::query("SELECT COUNT(*) AS n FROM predictions")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");

        assert_eq!(matches, 1, "match upsert stays idempotent in append mode");
        assert_eq!(predictions, 10, "append mode keeps one snapshot per run");
    }

    #[tokio::test]
    async fn test_missing_lines_are_stored_as_zero() {
        let pool = test_pool().await;
        let date = today_utc() + Duration::days(2);
        store_forecasts(&pool, &sample_forecasts(date), PredictionWriteMode::Replace)
            .await
            .unwrap();

        let wb_xg: f64 = sqlx::query("SELECT ah_line FROM predictions WHERE model = 'WB-xg'")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("ah_line");
        assert_eq!(wb_xg, 0.0);

        let avg: f64 = sqlx::query("SELECT ah_line FROM predictions WHERE model = 'BP+WB Avg'")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("ah_line");
        assert!((avg - (-0.6)).abs() < 1e-9); // mean of the three present lines
    }

    #[tokio::test]
    async fn test_integrity_count_sees_near_term_matches() {
        let pool = test_pool().await;
        assert_eq!(count_upcoming_matches(&pool, 7).await.unwrap(), 0);

        let date = today_utc() + Duration::days(2);
        store_forecasts(&pool, &sample_forecasts(date), PredictionWriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(count_upcoming_matches(&pool, 7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_league_and_match_queries() {
        let pool = test_pool().await;
        let date = today_utc() + Duration::days(2);
        store_forecasts(&pool, &sample_forecasts(date), PredictionWriteMode::Replace)
            .await
            .unwrap();

        assert!(get_league_board(&pool, "XXX").await.unwrap().is_none());

        let board = get_league_board(&pool, "ENG").await.unwrap().unwrap();
        assert_eq!(board.league.code, "ENG");
        assert_eq!(board.matches.len(), 1);
        assert_eq!(board.matches[0].home, "Aston Villa");
        assert_eq!(board.matches[0].bp_ag, Some(-0.5));
        assert_eq!(board.matches[0].wb_xg, Some(0.0)); // stored as zero-filled

        let match_id = board.matches[0].match_id.clone();
        let detail = get_match_detail(&pool, &match_id).await.unwrap().unwrap();
        assert_eq!(detail.predictions.len(), 5);
        assert!(get_match_detail(&pool, "nope").await.unwrap().is_none());

        let feed = get_prediction_feed(&pool, Some("ENG")).await.unwrap();
        assert_eq!(feed.len(), 5);
        let empty = get_prediction_feed(&pool, Some("XXX")).await.unwrap();
        assert!(empty.is_empty());

        let boards = get_upcoming_boards(&pool).await.unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].matches.len(), 1);
    }
}
