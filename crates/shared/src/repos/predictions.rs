use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use crate::models::PredictionRecord;

use super::{NewPrediction, Store, StoreError, model_variant_from_db, risk_level_from_db};

const PREDICTION_COLUMNS: &str = "id, session_id, source_address, last_processed_at, risk_score,
     risk_level, model_variant, processed_at";

impl Store {
    pub(super) async fn latest_prediction_row(
        &self,
        session_id: &str,
    ) -> Result<Option<PredictionRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PREDICTION_COLUMNS}
             FROM prediction_results
             WHERE session_id = $1
             ORDER BY last_processed_at DESC, processed_at DESC
             LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(prediction_from_row).transpose()
    }

    pub(super) async fn insert_prediction_row(
        &self,
        prediction: &NewPrediction,
    ) -> Result<PredictionRecord, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO prediction_results (
                id,
                session_id,
                source_address,
                last_processed_at,
                risk_score,
                risk_level,
                model_variant,
                processed_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {PREDICTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&prediction.session_id)
        .bind(prediction.source_address.as_deref())
        .bind(prediction.last_processed_at)
        .bind(prediction.assessment.score)
        .bind(prediction.assessment.level.as_str())
        .bind(prediction.model_variant.as_str())
        .bind(prediction.processed_at)
        .fetch_one(&self.pool)
        .await?;

        prediction_from_row(&row)
    }

    pub(super) async fn list_prediction_rows(
        &self,
        session_id: &str,
    ) -> Result<Vec<PredictionRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PREDICTION_COLUMNS}
             FROM prediction_results
             WHERE session_id = $1
             ORDER BY processed_at DESC, id ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }
}

fn prediction_from_row(row: &PgRow) -> Result<PredictionRecord, StoreError> {
    let risk_level_raw: String = row.try_get("risk_level")?;
    let model_variant_raw: String = row.try_get("model_variant")?;

    Ok(PredictionRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        source_address: row.try_get("source_address")?,
        last_processed_at: row.try_get("last_processed_at")?,
        risk_score: row.try_get("risk_score")?,
        risk_level: risk_level_from_db(&risk_level_raw)?,
        model_variant: model_variant_from_db(&model_variant_raw)?,
        processed_at: row.try_get("processed_at")?,
    })
}
