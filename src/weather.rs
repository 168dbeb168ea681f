//! C7 (part 3): Weather cell ingester — named in spec.md's interface
//! table (`/api/weather`, `weather_ttl_s`) but never assigned its own
//! component number; folded in here as a third, structurally identical
//! TTL-cached fetch-on-miss ingester alongside NOTAM/METAR.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::ais::haversine_nm;
use crate::error::RadarError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCell {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_nm: f64,
    pub condition: String,
}

struct CacheEntry {
    fetched_at: Instant,
    items: Vec<WeatherCell>,
}

pub struct WeatherIngester {
    feed_url: String,
    ttl: Duration,
    cache: std::sync::Mutex<Option<CacheEntry>>,
    client: reqwest::Client,
}

impl WeatherIngester {
    pub fn new(feed_url: String, ttl: Duration) -> Self {
        Self {
            feed_url,
            ttl,
            cache: std::sync::Mutex::new(None),
            client: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().expect("reqwest client builds"),
        }
    }

    async fn refresh(&self) -> Result<Vec<WeatherCell>, RadarError> {
        let response = self.client.get(&self.feed_url).send().await?;
        let cells: Vec<WeatherCell> = response.json().await?;
        Ok(cells)
    }

    pub async fn all(&self) -> Result<Vec<WeatherCell>, RadarError> {
        {
            let guard = self.cache.lock().expect("weather cache lock poisoned");
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.items.clone());
                }
            }
        }

        match self.refresh().await {
            Ok(items) => {
                let mut guard = self.cache.lock().expect("weather cache lock poisoned");
                *guard = Some(CacheEntry { fetched_at: Instant::now(), items: items.clone() });
                Ok(items)
            }
            Err(e) => {
                let guard = self.cache.lock().expect("weather cache lock poisoned");
                if let Some(entry) = guard.as_ref() {
                    warn!("Weather refresh failed ({e}); serving stale cache");
                    Ok(entry.items.clone())
                } else {
                    Err(e)
                }
            }
        }
    }

    pub async fn within_radius(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Vec<WeatherCell>, RadarError> {
        let all = self.all().await?;
        Ok(all
            .into_iter()
            .filter(|c| haversine_nm(lat, lon, c.lat, c.lon) <= radius_nm + c.radius_nm)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filters_cells_outside_radius() {
        let ingester = WeatherIngester::new("http://localhost:0/unused".to_string(), Duration::from_secs(600));
        {
            let mut guard = ingester.cache.lock().unwrap();
            *guard = Some(CacheEntry {
                fetched_at: Instant::now(),
                items: vec![
                    WeatherCell { id: "near".to_string(), lat: 55.01, lon: -4.0, radius_nm: 5.0, condition: "TS".to_string() },
                    WeatherCell { id: "far".to_string(), lat: 70.0, lon: 10.0, radius_nm: 5.0, condition: "TS".to_string() },
                ],
            });
        }
        let results = ingester.within_radius(55.0, -4.0, 50.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "near");
    }
}
