use anyhow::{anyhow, Result};
use courseforge_schema::{GeneratedQuestion, QuestionKind};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::PracticeQuestion;
use crate::{now_sql, Store};

impl Store {
    /// Persists one generated question. The stored kind is decided by the
    /// variant, which the deserializer picked from the presence of the option
    /// fields.
    pub async fn insert_question(
        &self,
        chapter_id: i64,
        question: &GeneratedQuestion,
    ) -> Result<PracticeQuestion> {
        let question = question.clone();
        let id = self
            .with_conn(move |conn| {
                let id = match question {
                    GeneratedQuestion::MultipleChoice {
                        question,
                        answer_a,
                        answer_b,
                        answer_c,
                        answer_d,
                        correct_answer,
                        explanation,
                    } => {
                        conn.execute(
                            r#"
                            INSERT INTO practice_questions
                                (chapter_id, qtype, question, answer_a, answer_b, answer_c, answer_d, correct_answer, explanation, created_at)
                            VALUES (?1, 'mc', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                            "#,
                            params![
                                chapter_id, question, answer_a, answer_b, answer_c, answer_d,
                                correct_answer, explanation, now_sql(),
                            ],
                        )?;
                        conn.last_insert_rowid()
                    }
                    GeneratedQuestion::OpenText {
                        question,
                        correct_answer,
                    } => {
                        conn.execute(
                            r#"
                            INSERT INTO practice_questions (chapter_id, qtype, question, correct_answer, created_at)
                            VALUES (?1, 'ot', ?2, ?3, ?4)
                            "#,
                            params![chapter_id, question, correct_answer, now_sql()],
                        )?;
                        conn.last_insert_rowid()
                    }
                };
                Ok(id)
            })
            .await?;
        self.get_question(id)
            .await?
            .ok_or_else(|| anyhow!("question vanished after insert"))
    }

    pub async fn get_question(&self, question_id: i64) -> Result<Option<PracticeQuestion>> {
        self.with_conn(move |conn| {
            let question = conn
                .query_row(
                    &format!("{SELECT_QUESTION} WHERE id = ?1"),
                    params![question_id],
                    row_to_question,
                )
                .optional()?;
            Ok(question)
        })
        .await
    }

    pub async fn list_questions(&self, chapter_id: i64) -> Result<Vec<PracticeQuestion>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_QUESTION} WHERE chapter_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![chapter_id], row_to_question)?;
            let mut questions = Vec::new();
            for row in rows {
                questions.push(row?);
            }
            Ok(questions)
        })
        .await
    }

    pub async fn save_answer(&self, question_id: i64, users_answer: &str) -> Result<bool> {
        let users_answer = users_answer.to_owned();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE practice_questions SET users_answer = ?2 WHERE id = ?1",
                params![question_id, users_answer],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn save_feedback(
        &self,
        question_id: i64,
        users_answer: &str,
        points: i64,
        feedback: &str,
    ) -> Result<bool> {
        let users_answer = users_answer.to_owned();
        let feedback = feedback.to_owned();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"
                UPDATE practice_questions
                SET users_answer = ?2, points_received = ?3, feedback = ?4
                WHERE id = ?1
                "#,
                params![question_id, users_answer, points, feedback],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

const SELECT_QUESTION: &str = r#"
SELECT id, chapter_id, qtype, question, answer_a, answer_b, answer_c, answer_d,
       correct_answer, explanation, users_answer, points_received, feedback
FROM practice_questions
"#;

fn row_to_question(row: &Row<'_>) -> rusqlite::Result<PracticeQuestion> {
    let kind_raw: String = row.get(2)?;
    Ok(PracticeQuestion {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        kind: QuestionKind::parse(&kind_raw).unwrap_or(QuestionKind::Ot),
        question: row.get(3)?,
        answer_a: row.get(4)?,
        answer_b: row.get(5)?,
        answer_c: row.get(6)?,
        answer_d: row.get(7)?,
        correct_answer: row.get(8)?,
        explanation: row.get(9)?,
        users_answer: row.get(10)?,
        points_received: row.get(11)?,
        feedback: row.get(12)?,
    })
}
