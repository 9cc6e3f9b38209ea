use quiz_core::model::{
    Certification, CertificationId, Choice, Question, QuestionId, Subtopic, SubtopicId,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    certification_id_from_i64, choice_id_from_i64, conn, id_i64, question_id_from_i64, ser,
    subtopic_id_from_i64,
};
use crate::repository::{QuestionBank, StorageError};

#[async_trait::async_trait]
impl QuestionBank for SqliteRepository {
    async fn certification(
        &self,
        id: CertificationId,
    ) -> Result<Option<Certification>, StorageError> {
        let row = sqlx::query("SELECT id, name FROM certifications WHERE id = ?1")
            .bind(id_i64("certification_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.map(|row| {
            Ok(Certification {
                id: certification_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
                name: row.try_get("name").map_err(ser)?,
            })
        })
        .transpose()
    }

    async fn subtopic(
        &self,
        certification_id: CertificationId,
        id: SubtopicId,
    ) -> Result<Option<Subtopic>, StorageError> {
        let row = sqlx::query(
            "SELECT id, certification_id, name FROM subtopics WHERE id = ?1 AND certification_id = ?2",
        )
        .bind(id_i64("subtopic_id", id.value())?)
        .bind(id_i64("certification_id", certification_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|row| {
            Ok(Subtopic {
                id: subtopic_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
                certification_id: certification_id_from_i64(
                    row.try_get::<i64, _>("certification_id").map_err(ser)?,
                )?,
                name: row.try_get("name").map_err(ser)?,
            })
        })
        .transpose()
    }

    async fn question_pool(
        &self,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
    ) -> Result<Vec<QuestionId>, StorageError> {
        let subtopic = subtopic_id
            .map(|s| id_i64("subtopic_id", s.value()))
            .transpose()?;
        let rows = sqlx::query(
            r"
            SELECT id FROM questions
            WHERE certification_id = ?1 AND (?2 IS NULL OR subtopic_id = ?2)
            ORDER BY id ASC
            ",
        )
        .bind(id_i64("certification_id", certification_id.value())?)
        .bind(subtopic)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?))
            .collect()
    }

    async fn question(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
        let qid = id_i64("question_id", id.value())?;
        let Some(row) = sqlx::query(
            "SELECT id, certification_id, subtopic_id, text, explanation FROM questions WHERE id = ?1",
        )
        .bind(qid)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let choice_rows = sqlx::query(
            r"
            SELECT id, text, is_correct FROM choices
            WHERE question_id = ?1
            ORDER BY position ASC, id ASC
            ",
        )
        .bind(qid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut choices = Vec::with_capacity(choice_rows.len());
        for c in &choice_rows {
            choices.push(Choice {
                id: choice_id_from_i64(c.try_get::<i64, _>("id").map_err(ser)?)?,
                text: c.try_get("text").map_err(ser)?,
                is_correct: c.try_get::<i64, _>("is_correct").map_err(ser)? != 0,
            });
        }

        Ok(Some(Question {
            id: question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
            certification_id: certification_id_from_i64(
                row.try_get::<i64, _>("certification_id").map_err(ser)?,
            )?,
            subtopic_id: row
                .try_get::<Option<i64>, _>("subtopic_id")
                .map_err(ser)?
                .map(subtopic_id_from_i64)
                .transpose()?,
            text: row.try_get("text").map_err(ser)?,
            explanation: row.try_get("explanation").map_err(ser)?,
            choices,
        }))
    }
}

//
// ─── SEEDING ───────────────────────────────────────────────────────────────────
//

impl SqliteRepository {
    /// Insert or replace a certification.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures.
    pub async fn upsert_certification(
        &self,
        certification: &Certification,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO certifications (id, name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            ",
        )
        .bind(id_i64("certification_id", certification.id.value())?)
        .bind(&certification.name)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Insert or replace a subtopic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures.
    pub async fn upsert_subtopic(&self, subtopic: &Subtopic) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO subtopics (id, certification_id, name) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                certification_id = excluded.certification_id,
                name = excluded.name
            ",
        )
        .bind(id_i64("subtopic_id", subtopic.id.value())?)
        .bind(id_i64("certification_id", subtopic.certification_id.value())?)
        .bind(&subtopic.name)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Insert or replace a question and its full choice list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures; the question is left as it
    /// was in that case.
    pub async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let qid = id_i64("question_id", question.id.value())?;
        let subtopic = question
            .subtopic_id
            .map(|s| id_i64("subtopic_id", s.value()))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO questions (id, certification_id, subtopic_id, text, explanation)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                certification_id = excluded.certification_id,
                subtopic_id = excluded.subtopic_id,
                text = excluded.text,
                explanation = excluded.explanation
            ",
        )
        .bind(qid)
        .bind(id_i64("certification_id", question.certification_id.value())?)
        .bind(subtopic)
        .bind(&question.text)
        .bind(&question.explanation)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM choices WHERE question_id = ?1")
            .bind(qid)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, choice) in question.choices.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO choices (id, question_id, position, text, is_correct)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(id_i64("choice_id", choice.id.value())?)
            .bind(qid)
            .bind(i64::try_from(position).map_err(ser)?)
            .bind(&choice.text)
            .bind(i64::from(choice.is_correct))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
