use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::signature::IngestionSignature;
use crate::repository::errors::RepositoryResult;
use crate::repository::models::{DbIngestionRun, NewDbIngestionRun};
use crate::repository::{DieselRepository, IngestionRun, RunReader, RunWriter};

impl From<DbIngestionRun> for IngestionRun {
    fn from(row: DbIngestionRun) -> Self {
        IngestionRun {
            batch_id: row.batch_id,
            started_at: row.started_at.and_utc(),
            completed_at: row.completed_at.map(|at| at.and_utc()),
            signatures: row.signatures,
        }
    }
}

impl RunReader for DieselRepository {
    fn list_previous_runs(
        &self,
        current_batch_id: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<IngestionRun>> {
        use crate::repository::schema::ingestion_runs;

        let mut conn = self.conn()?;

        let rows = ingestion_runs::table
            .filter(ingestion_runs::completed_at.is_not_null())
            .filter(ingestion_runs::batch_id.ne(current_batch_id))
            .order(ingestion_runs::completed_at.desc())
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .select(DbIngestionRun::as_select())
            .load::<DbIngestionRun>(&mut conn)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

impl RunWriter for DieselRepository {
    fn start_run(&self, batch_id: &str, started_at: DateTime<Utc>) -> RepositoryResult<usize> {
        use crate::repository::schema::ingestion_runs;

        let mut conn = self.conn()?;

        let inserted = diesel::insert_into(ingestion_runs::table)
            .values(&NewDbIngestionRun {
                batch_id,
                started_at: started_at.naive_utc(),
            })
            .execute(&mut conn)?;

        Ok(inserted)
    }

    fn complete_run(
        &self,
        batch_id: &str,
        signatures: &[IngestionSignature],
    ) -> RepositoryResult<usize> {
        use crate::repository::schema::ingestion_runs;

        let encoded = serde_json::to_string(signatures)?;
        let mut conn = self.conn()?;

        let affected =
            diesel::update(ingestion_runs::table.filter(ingestion_runs::batch_id.eq(batch_id)))
                .set((
                    ingestion_runs::completed_at.eq(Utc::now().naive_utc()),
                    ingestion_runs::signatures.eq(encoded),
                ))
                .execute(&mut conn)?;

        Ok(affected)
    }
}
