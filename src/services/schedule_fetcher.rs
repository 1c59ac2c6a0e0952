use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use std::env;

/// One row of the upstream schedule feed, as delivered. Dates and scores are
/// free text here; the normalizer turns them into typed fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFixture {
    pub league: String,
    pub season: i32,
    pub date: String,
    pub home_team: String,
    pub home_xg: Option<f64>,
    pub score: Option<String>,
    pub away_xg: Option<f64>,
    pub away_team: String,
}

pub struct ScheduleFetcher {
    client: Client,
    base_url: Option<String>,
}

impl ScheduleFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: env::var("SCHEDULE_API_URL").ok(),
        }
    }

    pub fn has_source(&self) -> bool {
        self.base_url.is_some()
    }

    /// Pull the schedule for the given league/season sets. The feed may hand
    /// back more than was asked for; rows outside the requested sets are
    /// dropped here so the pipeline only ever sees configured leagues.
    pub async fn read_schedule(&self, leagues: &[String], seasons: &[i32]) -> Result<Vec<RawFixture>> {
        let base_url = self
            .base_url
            .as_ref()
            .ok_or_else(|| anyhow!("SCHEDULE_API_URL not set"))?;

        let season_list = seasons
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(base_url)
            .query(&[("leagues", leagues.join(",")), ("seasons", season_list)])
            .send()
            .await?
            .error_for_status()?;

        let mut fixtures: Vec<RawFixture> = response.json().await?;
        fixtures.retain(|f| leagues.iter().any(|l| l == &f.league) && seasons.contains(&f.season));

        tracing::info!("Fetched {} schedule rows from upstream", fixtures.len());
        Ok(fixtures)
    }
}

impl Default for ScheduleFetcher {
    fn default() -> Self {
        Self::new()
    }
}
