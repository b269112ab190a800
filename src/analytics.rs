use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;

use crate::{
    error::{AppError, AppResult},
    models::{
        AdminStats, ButtonMetricsData, ClickEvent, DailyClicks, DailyClicksResponse,
        MetricsResponse, NewClickEvent, UtmParams,
    },
    links::LinkService,
    repository::RepositoryState,
};

pub const DEFAULT_RANGE_DAYS: i64 = 7;
pub const MAX_RANGE_DAYS: i64 = 365;

/// ClickContext
///
/// Attribution captured from the inbound click request. Absent values are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickContext {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub utm: UtmParams,
}

/// AnalyticsService
///
/// Records clicks and derives per-MultiLink reports from the click metrics and the
/// click event log. Ownership of the reported MultiLink is resolved through the
/// link service so both services apply the same guard.
#[derive(Clone)]
pub struct AnalyticsService {
    repo: RepositoryState,
    links: LinkService,
}

impl AnalyticsService {
    pub fn new(repo: RepositoryState, links: LinkService) -> Self {
        Self { repo, links }
    }

    /// record_click
    ///
    /// Logs a ClickEvent for an active button and bumps its ClickMetric, returning
    /// the URL to redirect to. The event is the source of truth: if it cannot be
    /// written the click fails. A failed metric increment afterwards is logged and
    /// counted, but the click still succeeds.
    pub async fn record_click(&self, button_id: i64, ctx: ClickContext) -> AppResult<String> {
        let button = self
            .repo
            .get_button(button_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("button {button_id}")))?;

        if !button.is_active {
            return Err(AppError::ButtonInactive);
        }

        self.repo
            .create_click_event(NewClickEvent {
                button_id,
                ip: ctx.ip,
                user_agent: ctx.user_agent,
                referer: ctx.referer,
                utm: ctx.utm,
            })
            .await?;
        metrics::counter!("multilink_clicks_recorded_total").increment(1);

        if let Err(err) = self.repo.increment_click_metric(button_id, Utc::now()).await {
            metrics::counter!("multilink_click_metric_update_failures_total").increment(1);
            tracing::warn!(
                button_id,
                multilink_id = button.multilink_id,
                error = %err,
                "click logged but metric increment failed; counter will under-report"
            );
        }

        Ok(button.url)
    }

    /// get_multilink_metrics
    ///
    /// Owner-only click report. Buttons whose metric lookup fails are left out of
    /// the report rather than failing it; a button that was never clicked counts as
    /// zero. UTM breakdowns that cannot be computed come back empty.
    pub async fn get_multilink_metrics(
        &self,
        principal_id: i64,
        multilink_id: i64,
    ) -> AppResult<MetricsResponse> {
        let multilink = self.links.owned_multilink(principal_id, multilink_id).await?;
        let buttons = self.repo.list_buttons(multilink.id).await?;

        let mut counted = Vec::with_capacity(buttons.len());
        for button in &buttons {
            match self.repo.get_click_metric(button.id).await {
                Ok(metric) => {
                    counted.push((button, metric.map(|m| m.clicks).unwrap_or(0)));
                }
                Err(err) => {
                    tracing::warn!(
                        button_id = button.id,
                        multilink_id,
                        error = %err,
                        "skipping button with unreadable click metric"
                    );
                }
            }
        }

        let total_clicks: i64 = counted.iter().map(|(_, clicks)| clicks).sum();
        let button_metrics = counted
            .into_iter()
            .map(|(button, clicks)| ButtonMetricsData {
                button_id: button.id,
                button_name: button.title.clone(),
                clicks,
                percentage: percentage(clicks, total_clicks),
            })
            .collect();

        let button_ids: Vec<i64> = buttons.iter().map(|b| b.id).collect();

        let utm_source_stats = self
            .repo
            .utm_source_stats(&button_ids)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(multilink_id, error = %err, "utm_source breakdown unavailable");
                BTreeMap::new()
            });

        let utm_medium_stats = self
            .repo
            .utm_medium_stats(&button_ids)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(multilink_id, error = %err, "utm_medium breakdown unavailable");
                BTreeMap::new()
            });

        Ok(MetricsResponse {
            total_clicks,
            button_metrics,
            utm_source_stats,
            utm_medium_stats,
        })
    }

    /// daily_clicks
    ///
    /// Click events per UTC day over the last `range_days` days (today included),
    /// oldest first, with every day present.
    pub async fn daily_clicks(
        &self,
        principal_id: i64,
        multilink_id: i64,
        range_days: Option<i64>,
    ) -> AppResult<DailyClicksResponse> {
        let multilink = self.links.owned_multilink(principal_id, multilink_id).await?;
        let days = range_days
            .unwrap_or(DEFAULT_RANGE_DAYS)
            .clamp(1, MAX_RANGE_DAYS);

        let today = Utc::now().date_naive();
        let first_day = today - Duration::days(days - 1);
        let from = start_of(first_day);
        let to = start_of(today + Duration::days(1));

        let button_ids = self.button_ids(multilink.id).await?;
        let events = self.repo.list_click_events(&button_ids, from, to).await?;

        let mut per_day: BTreeMap<NaiveDate, i64> = (0..days)
            .map(|offset| (first_day + Duration::days(offset), 0))
            .collect();
        for event in &events {
            if let Some(count) = per_day.get_mut(&event.created_at.date_naive()) {
                *count += 1;
            }
        }

        Ok(DailyClicksResponse {
            daily_clicks: per_day
                .into_iter()
                .map(|(date, clicks)| DailyClicks { date, clicks })
                .collect(),
        })
    }

    /// click_events
    ///
    /// Raw events for the MultiLink's current buttons with `from <= created_at < to`.
    /// Defaults to the last `DEFAULT_RANGE_DAYS` days.
    pub async fn click_events(
        &self,
        principal_id: i64,
        multilink_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<ClickEvent>> {
        let multilink = self.links.owned_multilink(principal_id, multilink_id).await?;

        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
        if from >= to {
            return Err(AppError::InvalidInput(
                "'from' must be earlier than 'to'".to_string(),
            ));
        }

        let button_ids = self.button_ids(multilink.id).await?;
        Ok(self.repo.list_click_events(&button_ids, from, to).await?)
    }

    /// Totals for the admin dashboard. Callers must have passed `require_admin`.
    pub async fn admin_stats(&self) -> AppResult<AdminStats> {
        Ok(self.repo.get_stats().await?)
    }

    async fn button_ids(&self, multilink_id: i64) -> AppResult<Vec<i64>> {
        let buttons = self.repo.list_buttons(multilink_id).await?;
        Ok(buttons.into_iter().map(|b| b.id).collect())
    }
}

/// Share of `total` in percent; 0 when there are no clicks at all.
fn percentage(clicks: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        clicks as f64 / total as f64 * 100.0
    }
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_without_clicks_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn test_percentage_share() {
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(3, 3), 100.0);
    }
}
