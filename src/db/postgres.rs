use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    DailyBar, Instrument, Signal, SignalType, Stage, WeeklyBar, WeeklyOhlcv,
};
use crate::settings::DatabaseSettings;
use crate::store::{MarketStore, SignalStore, WeeklyStore};
use crate::{Error, Result};

/// Postgres-backed store for instruments, bars and signals
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await?;

        tracing::info!("Connected to Postgres at {}", redact(&settings.url));

        Ok(Self { pool })
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("✓ Migrations applied");
        Ok(())
    }

    /// Insert an instrument or refresh its name, returning it
    pub async fn upsert_instrument(&self, symbol: &str, name: Option<&str>) -> Result<Instrument> {
        let row = sqlx::query(
            r#"
            INSERT INTO instruments (symbol, name)
            VALUES ($1, $2)
            ON CONFLICT (symbol) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, instruments.name)
            RETURNING id, symbol, name, active
            "#,
        )
        .bind(symbol)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(instrument_from_row(&row))
    }

    /// Store daily bars, replacing bars with the same date
    pub async fn insert_daily_bars(&self, instrument_id: i64, bars: &[DailyBar]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO daily_bars (instrument_id, date, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (instrument_id, date) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume
                "#,
            )
            .bind(instrument_id)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("Stored {} daily bars for instrument {}", bars.len(), instrument_id);
        Ok(())
    }

    /// Delete every row (testing only)
    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("TRUNCATE signals, weekly_bars, daily_bars, instruments RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_column(
        &self,
        sql: &str,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (week_end, value) in values {
            sqlx::query(sql)
                .bind(instrument_id)
                .bind(week_end)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MarketStore for PostgresStore {
    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query(
            "SELECT id, symbol, name, active FROM instruments WHERE active = TRUE ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(instrument_from_row).collect())
    }

    async fn find_instrument(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row = sqlx::query(
            "SELECT id, symbol, name, active FROM instruments WHERE UPPER(symbol) = UPPER($1)",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(instrument_from_row))
    }

    async fn load_daily_bars(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        let rows = sqlx::query(
            r#"
            SELECT date, open, high, low, close, volume
            FROM daily_bars
            WHERE instrument_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date ASC
            "#,
        )
        .bind(instrument_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DailyBar {
                    date: row.get("date"),
                    open: to_f64(row.get("open"))?,
                    high: to_f64(row.get("high"))?,
                    low: to_f64(row.get("low"))?,
                    close: to_f64(row.get("close"))?,
                    volume: row.get("volume"),
                })
            })
            .collect()
    }

    async fn first_daily_date(&self, instrument_id: i64) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MIN(date) AS first_date FROM daily_bars WHERE instrument_id = $1")
            .bind(instrument_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("first_date"))
    }
}

#[async_trait]
impl WeeklyStore for PostgresStore {
    async fn load_weekly_bars(&self, instrument_id: i64) -> Result<Vec<WeeklyBar>> {
        let rows = sqlx::query(
            r#"
            SELECT instrument_id, week_end_date, open, high, low, close, volume,
                   trend_indicator, trend_slope, stage
            FROM weekly_bars
            WHERE instrument_id = $1
            ORDER BY week_end_date ASC
            "#,
        )
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(weekly_from_row).collect()
    }

    async fn upsert_weekly_ohlcv(
        &self,
        instrument_id: i64,
        weeks: &[(NaiveDate, WeeklyOhlcv)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (week_end, ohlcv) in weeks {
            sqlx::query(
                r#"
                INSERT INTO weekly_bars (instrument_id, week_end_date, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (instrument_id, week_end_date) DO UPDATE SET
                    open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    updated_at = NOW()
                "#,
            )
            .bind(instrument_id)
            .bind(week_end)
            .bind(ohlcv.open)
            .bind(ohlcv.high)
            .bind(ohlcv.low)
            .bind(ohlcv.close)
            .bind(ohlcv.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("Upserted {} weekly bars for instrument {}", weeks.len(), instrument_id);
        Ok(())
    }

    async fn update_trend_indicators(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()> {
        self.update_column(
            "UPDATE weekly_bars SET trend_indicator = $3, updated_at = NOW() \
             WHERE instrument_id = $1 AND week_end_date = $2",
            instrument_id,
            values,
        )
        .await
    }

    async fn update_trend_slopes(
        &self,
        instrument_id: i64,
        values: &[(NaiveDate, Option<f64>)],
    ) -> Result<()> {
        self.update_column(
            "UPDATE weekly_bars SET trend_slope = $3, updated_at = NOW() \
             WHERE instrument_id = $1 AND week_end_date = $2",
            instrument_id,
            values,
        )
        .await
    }

    async fn update_stages(&self, instrument_id: i64, values: &[(NaiveDate, Stage)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (week_end, stage) in values {
            sqlx::query(
                "UPDATE weekly_bars SET stage = $3, updated_at = NOW() \
                 WHERE instrument_id = $1 AND week_end_date = $2",
            )
            .bind(instrument_id)
            .bind(week_end)
            .bind(stage.number())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn latest_weekly_bars(&self) -> Result<Vec<WeeklyBar>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (instrument_id)
                   instrument_id, week_end_date, open, high, low, close, volume,
                   trend_indicator, trend_slope, stage
            FROM weekly_bars
            ORDER BY instrument_id, week_end_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(weekly_from_row).collect()
    }
}

const INSERT_SIGNAL: &str = r#"
    INSERT INTO signals (
        id, instrument_id, signal_date, signal_type, stage_from, stage_to,
        price, trend_indicator, notified
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (instrument_id, signal_date, signal_type) DO NOTHING
"#;

const SELECT_SIGNALS: &str = r#"
    SELECT id, instrument_id, signal_date, signal_type, stage_from, stage_to,
           price, trend_indicator, notified
    FROM signals
"#;

fn bind_signal<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    signal: &'q Signal,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(signal.id)
        .bind(signal.instrument_id)
        .bind(signal.date)
        .bind(signal.signal_type.as_str())
        .bind(signal.stage_from.number())
        .bind(signal.stage_to.number())
        .bind(signal.price)
        .bind(signal.trend_indicator)
        .bind(signal.notified)
}

#[async_trait]
impl SignalStore for PostgresStore {
    async fn insert_signal_if_absent(&self, signal: &Signal) -> Result<bool> {
        let result = bind_signal(sqlx::query(INSERT_SIGNAL), signal)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_signals(&self, signals: &[Signal]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut created = 0;

        for signal in signals {
            let result = bind_signal(sqlx::query(INSERT_SIGNAL), signal)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 1 {
                created += 1;
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn load_signals(&self, instrument_id: i64) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{} WHERE instrument_id = $1 ORDER BY signal_date ASC, signal_type ASC",
            SELECT_SIGNALS
        ))
        .bind(instrument_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn recent_signals(
        &self,
        since: NaiveDate,
        signal_type: Option<SignalType>,
    ) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{} WHERE signal_date >= $1 AND ($2::TEXT IS NULL OR signal_type = $2) \
             ORDER BY signal_date DESC",
            SELECT_SIGNALS
        ))
        .bind(since)
        .bind(signal_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn unnotified_signals(&self) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            "{} WHERE notified = FALSE ORDER BY signal_date DESC",
            SELECT_SIGNALS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn mark_notified(&self, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("UPDATE signals SET notified = TRUE WHERE id = ANY($1) AND notified = FALSE")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn instrument_from_row(row: &PgRow) -> Instrument {
    Instrument {
        id: row.get("id"),
        symbol: row.get("symbol"),
        name: row.get("name"),
        active: row.get("active"),
    }
}

fn weekly_from_row(row: &PgRow) -> Result<WeeklyBar> {
    let trend_indicator: Option<Decimal> = row.get("trend_indicator");
    let trend_slope: Option<Decimal> = row.get("trend_slope");
    let stage: Option<i16> = row.get("stage");

    Ok(WeeklyBar {
        instrument_id: row.get("instrument_id"),
        week_end_date: row.get("week_end_date"),
        open: to_f64(row.get("open"))?,
        high: to_f64(row.get("high"))?,
        low: to_f64(row.get("low"))?,
        close: to_f64(row.get("close"))?,
        volume: row.get("volume"),
        trend_indicator: trend_indicator.map(to_f64).transpose()?,
        trend_slope: trend_slope.map(to_f64).transpose()?,
        stage: stage.map(to_stage).transpose()?,
    })
}

fn signal_from_row(row: &PgRow) -> Result<Signal> {
    let signal_type: String = row.get("signal_type");
    let trend_indicator: Option<Decimal> = row.get("trend_indicator");

    Ok(Signal {
        id: row.get("id"),
        instrument_id: row.get("instrument_id"),
        date: row.get("signal_date"),
        signal_type: signal_type.parse()?,
        stage_from: to_stage(row.get("stage_from"))?,
        stage_to: to_stage(row.get("stage_to"))?,
        price: to_f64(row.get("price"))?,
        trend_indicator: trend_indicator.map(to_f64).transpose()?,
        notified: row.get("notified"),
    })
}

fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| Error::InvalidData(format!("NUMERIC out of f64 range: {}", value)))
}

fn to_stage(value: i16) -> Result<Stage> {
    Stage::from_number(value).ok_or_else(|| Error::InvalidData(format!("Invalid stage: {}", value)))
}

/// Hide the password part of a connection URL for logging
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let credentials = &url[scheme + 3..at];
            match credentials.find(':') {
                Some(colon) => format!("{}{}:***{}", &url[..scheme + 3], &credentials[..colon], &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
