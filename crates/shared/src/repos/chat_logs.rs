use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::{ChatLog, Location};
use crate::risk::RiskAssessment;

use super::{ChatLogFilter, NewChatLog, Store, StoreError, TurnAppend, risk_level_from_db};

const CHAT_LOG_COLUMNS: &str = "session_id, turns, source_address, latitude, longitude, city,
     risk_score, risk_level, created_at, last_updated_at";

impl Store {
    pub(super) async fn find_chat_log_row(
        &self,
        session_id: &str,
    ) -> Result<Option<ChatLog>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CHAT_LOG_COLUMNS}
             FROM chat_logs
             WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(chat_log_from_row).transpose()
    }

    pub(super) async fn list_chat_log_rows(
        &self,
        filter: &ChatLogFilter,
    ) -> Result<Vec<ChatLog>, StoreError> {
        let city_pattern = filter
            .city
            .as_deref()
            .map(|city| format!("%{}%", escape_like(city)));

        let rows = sqlx::query(&format!(
            "SELECT {CHAT_LOG_COLUMNS}
             FROM chat_logs
             WHERE ($1::TEXT IS NULL OR risk_level = $1)
               AND ($2::TEXT IS NULL OR city ILIKE $2)
             ORDER BY last_updated_at DESC, session_id ASC"
        ))
        .bind(filter.risk_level.map(|level| level.as_str()))
        .bind(city_pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_log_from_row).collect()
    }

    pub(super) async fn insert_chat_log_row(
        &self,
        new_log: &NewChatLog,
    ) -> Result<ChatLog, StoreError> {
        let initial = RiskAssessment::initial();
        let (latitude, longitude, city) = location_columns(new_log.location.as_ref());

        sqlx::query(
            "INSERT INTO chat_logs (
                session_id,
                turns,
                source_address,
                latitude,
                longitude,
                city,
                risk_score,
                risk_level,
                created_at,
                last_updated_at
             ) VALUES ($1, '{}', $2, $3, $4, $5, $6, $7, $8, $8)
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&new_log.session_id)
        .bind(new_log.source_address.as_deref())
        .bind(latitude)
        .bind(longitude)
        .bind(city)
        .bind(initial.score)
        .bind(initial.level.as_str())
        .bind(new_log.created_at)
        .execute(&self.pool)
        .await?;

        self.find_chat_log_row(&new_log.session_id)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "chat log {} missing after insert",
                    new_log.session_id
                ))
            })
    }

    pub(super) async fn upsert_turn_row(&self, append: &TurnAppend) -> Result<ChatLog, StoreError> {
        let (latitude, longitude, city) = location_columns(append.location.as_ref());

        let row = sqlx::query(&format!(
            "INSERT INTO chat_logs (
                session_id,
                turns,
                source_address,
                latitude,
                longitude,
                city,
                risk_score,
                risk_level,
                created_at,
                last_updated_at
             ) VALUES ($1, ARRAY[$2::TEXT], $3, $4, $5, $6, $7, $8, $9, $9)
             ON CONFLICT (session_id)
             DO UPDATE SET
               turns = chat_logs.turns || EXCLUDED.turns,
               source_address = COALESCE(chat_logs.source_address, EXCLUDED.source_address),
               latitude = COALESCE(EXCLUDED.latitude, chat_logs.latitude),
               longitude = COALESCE(EXCLUDED.longitude, chat_logs.longitude),
               city = COALESCE(EXCLUDED.city, chat_logs.city),
               risk_score = EXCLUDED.risk_score,
               risk_level = EXCLUDED.risk_level,
               last_updated_at = GREATEST(chat_logs.last_updated_at, EXCLUDED.last_updated_at)
             RETURNING {CHAT_LOG_COLUMNS}"
        ))
        .bind(&append.session_id)
        .bind(&append.turn)
        .bind(append.source_address.as_deref())
        .bind(latitude)
        .bind(longitude)
        .bind(city)
        .bind(append.assessment.score)
        .bind(append.assessment.level.as_str())
        .bind(append.appended_at)
        .fetch_one(&self.pool)
        .await?;

        chat_log_from_row(&row)
    }

    pub(super) async fn update_risk_row(
        &self,
        session_id: &str,
        assessment: RiskAssessment,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE chat_logs
             SET risk_score = $2,
                 risk_level = $3
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(assessment.score)
        .bind(assessment.level.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn location_columns(location: Option<&Location>) -> (Option<f64>, Option<f64>, Option<&str>) {
    match location {
        Some(location) => (
            Some(location.latitude),
            Some(location.longitude),
            Some(location.city.as_str()),
        ),
        None => (None, None, None),
    }
}

fn chat_log_from_row(row: &PgRow) -> Result<ChatLog, StoreError> {
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let city: Option<String> = row.try_get("city")?;
    let location = match (latitude, longitude, city) {
        (Some(latitude), Some(longitude), Some(city)) => Some(Location {
            latitude,
            longitude,
            city,
        }),
        _ => None,
    };
    let risk_level_raw: String = row.try_get("risk_level")?;

    Ok(ChatLog {
        session_id: row.try_get("session_id")?,
        turns: row.try_get("turns")?,
        source_address: row.try_get("source_address")?,
        location,
        risk_score: row.try_get("risk_score")?,
        risk_level: risk_level_from_db(&risk_level_raw)?,
        created_at: row.try_get("created_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
