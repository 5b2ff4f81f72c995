//! SQLite implementation of [`Repository`].

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use super::schema;
use super::{Completion, CompletionStep, Repository};
use crate::content::{
    ConversationMessage, Exercise, ExerciseMetadata, ExerciseStep, MessagePart, MessageRole,
    StepContent, StepResponses, User, UserData,
};
use crate::error::{NobleError, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file. `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: &Path) -> Result<Self> {
        if path.as_os_str() == ":memory:" {
            return Self::open_in_memory();
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                NobleError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_schema(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

/// Current time at the precision the database keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn time_column(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, name, e))
}

fn json_column<T: DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, name, e))
}

fn optional_json_column<T: DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(row, name, e)))
        .transpose()
}

fn conversion_error(
    row: &Row,
    name: &str,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(name).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        is_admin: row.get("is_admin")?,
        data: json_column(row, "data")?,
        created_at: time_column(row, "created_at")?,
    })
}

fn exercise_from_row(row: &Row) -> rusqlite::Result<Exercise> {
    Ok(Exercise {
        id: row.get("id")?,
        name: row.get("name")?,
        week_number: row.get("week_number")?,
        buddhism_concept: row.get("buddhism_concept")?,
        metadata: optional_json_column::<ExerciseMetadata>(row, "metadata")?,
        steps: Vec::new(),
    })
}

fn exercise_step_from_row(row: &Row) -> rusqlite::Result<ExerciseStep> {
    Ok(ExerciseStep {
        id: row.get("id")?,
        exercise_id: row.get("exercise_id")?,
        order: row.get("step_order")?,
        title: row.get("title")?,
        content: json_column::<StepContent>(row, "content")?,
    })
}

fn completion_from_row(row: &Row) -> rusqlite::Result<Completion> {
    Ok(Completion {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        exercise_id: row.get("exercise_id")?,
        completion_message: row.get("completion_message")?,
        created_at: time_column(row, "created_at")?,
        steps: Vec::new(),
    })
}

fn completion_step_from_row(row: &Row) -> rusqlite::Result<CompletionStep> {
    Ok(CompletionStep {
        id: row.get("id")?,
        completion_id: row.get("completion_id")?,
        exercise_step_id: row.get("exercise_step_id")?,
        completed: row.get("completed")?,
        result: row.get("result")?,
        responses: optional_json_column::<StepResponses>(row, "responses")?,
        messages: Vec::new(),
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<ConversationMessage> {
    let role: String = row.get("role")?;
    let role = MessageRole::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            row.as_ref().column_index("role").unwrap_or(0),
            Type::Text,
            format!("unknown message role '{}'", role).into(),
        )
    })?;
    Ok(ConversationMessage {
        id: row.get("id")?,
        completion_step_id: row.get("completion_step_id")?,
        role,
        parts: json_column(row, "parts")?,
        created_at: time_column(row, "created_at")?,
    })
}

// =============================================================================
// Queries shared by several operations
// =============================================================================

const COMPLETION_STEPS_QUERY: &str = "
    SELECT cs.id, cs.completion_id, cs.exercise_step_id, cs.completed, cs.result, cs.responses
    FROM completion_steps cs
    LEFT JOIN exercise_steps es ON es.id = cs.exercise_step_id";

fn load_exercise_steps(conn: &Connection, exercise_id: &str) -> Result<Vec<ExerciseStep>> {
    let mut stmt = conn.prepare(
        "SELECT id, exercise_id, step_order, title, content
         FROM exercise_steps WHERE exercise_id = ?1 ORDER BY step_order, id",
    )?;
    let steps = stmt
        .query_map([exercise_id], exercise_step_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(steps)
}

fn load_exercise(conn: &Connection, id: &str) -> Result<Option<Exercise>> {
    let exercise = conn
        .query_row(
            "SELECT id, name, week_number, buddhism_concept, metadata FROM exercises WHERE id = ?1",
            [id],
            exercise_from_row,
        )
        .optional()?;
    match exercise {
        Some(mut exercise) => {
            exercise.steps = load_exercise_steps(conn, id)?;
            Ok(Some(exercise))
        }
        None => Ok(None),
    }
}

fn load_messages(conn: &Connection, completion_step_id: &str) -> Result<Vec<ConversationMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, completion_step_id, role, parts, created_at
         FROM conversation_messages
         WHERE completion_step_id = ?1
         ORDER BY created_at, seq",
    )?;
    let messages = stmt
        .query_map([completion_step_id], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

fn load_completion_steps(conn: &Connection, completion_id: &str) -> Result<Vec<CompletionStep>> {
    let sql = format!(
        "{} WHERE cs.completion_id = ?1 ORDER BY es.step_order, cs.id",
        COMPLETION_STEPS_QUERY
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut steps = stmt
        .query_map([completion_id], completion_step_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for step in &mut steps {
        step.messages = load_messages(conn, &step.id)?;
    }
    Ok(steps)
}

fn load_completion_where(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Completion>> {
    let sql = format!(
        "SELECT id, user_id, exercise_id, completion_message, created_at FROM completions WHERE {}",
        clause
    );
    let completion = conn.query_row(&sql, params, completion_from_row).optional()?;
    match completion {
        Some(mut completion) => {
            completion.steps = load_completion_steps(conn, &completion.id)?;
            Ok(Some(completion))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl Repository for SqliteStore {
    async fn create_user(&self, email: &str, is_admin: bool, data: &UserData) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.trim().to_string(),
            is_admin,
            data: data.clone(),
            created_at: now(),
        };
        let data = serde_json::to_string(&user.data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, is_admin, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.id, user.email, user.is_admin, data, timestamp(user.created_at)],
            )?;
            Ok(())
        })?;
        info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, email, is_admin, data, created_at FROM users WHERE id = ?1",
                    [id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, is_admin, data, created_at FROM users ORDER BY created_at, email",
            )?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }

    async fn save_exercise(&self, exercise: &Exercise) -> Result<()> {
        exercise.validate()?;
        let metadata = exercise
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let steps = exercise
            .steps
            .iter()
            .map(|step| Ok((step, serde_json::to_string(&step.content)?)))
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO exercises (id, name, week_number, buddhism_concept, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    week_number = excluded.week_number,
                    buddhism_concept = excluded.buddhism_concept,
                    metadata = excluded.metadata",
                params![
                    exercise.id,
                    exercise.name,
                    exercise.week_number,
                    exercise.buddhism_concept,
                    metadata,
                    timestamp(Utc::now()),
                ],
            )?;

            // Steps that moved to another exercise keep their id but change owner
            let keep: Vec<&str> = exercise.steps.iter().map(|s| s.id.as_str()).collect();
            let existing: Vec<String> = {
                let mut stmt = tx.prepare("SELECT id FROM exercise_steps WHERE exercise_id = ?1")?;
                let ids = stmt
                    .query_map([&exercise.id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                ids
            };
            for id in existing.iter().filter(|id| !keep.contains(&id.as_str())) {
                tx.execute("DELETE FROM exercise_steps WHERE id = ?1", [id])?;
            }

            for (step, content) in &steps {
                tx.execute(
                    "INSERT INTO exercise_steps (id, exercise_id, step_order, title, content)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        exercise_id = excluded.exercise_id,
                        step_order = excluded.step_order,
                        title = excluded.title,
                        content = excluded.content",
                    params![step.id, exercise.id, step.order, step.title, content],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;
        debug!(exercise_id = %exercise.id, steps = exercise.steps.len(), "Saved exercise");
        Ok(())
    }

    async fn get_exercise(&self, id: &str) -> Result<Option<Exercise>> {
        self.with_conn(|conn| load_exercise(conn, id))
    }

    async fn list_exercises(&self) -> Result<Vec<Exercise>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, week_number, buddhism_concept, metadata FROM exercises
                 ORDER BY week_number IS NULL, week_number, name",
            )?;
            let mut exercises = stmt
                .query_map([], exercise_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for exercise in &mut exercises {
                exercise.steps = load_exercise_steps(conn, &exercise.id)?;
            }
            Ok(exercises)
        })
    }

    async fn get_exercise_step(&self, id: &str) -> Result<Option<ExerciseStep>> {
        self.with_conn(|conn| {
            let step = conn
                .query_row(
                    "SELECT id, exercise_id, step_order, title, content FROM exercise_steps WHERE id = ?1",
                    [id],
                    exercise_step_from_row,
                )
                .optional()?;
            Ok(step)
        })
    }

    async fn delete_exercise(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM exercises WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    async fn find_completion(&self, user_id: &str, exercise_id: &str) -> Result<Option<Completion>> {
        self.with_conn(|conn| {
            load_completion_where(
                conn,
                "user_id = ?1 AND exercise_id = ?2",
                params![user_id, exercise_id],
            )
        })
    }

    async fn get_completion(&self, id: &str) -> Result<Option<Completion>> {
        self.with_conn(|conn| load_completion_where(conn, "id = ?1", params![id]))
    }

    async fn list_completions(&self, user_id: &str) -> Result<Vec<Completion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, exercise_id, completion_message, created_at
                 FROM completions WHERE user_id = ?1 ORDER BY created_at, id",
            )?;
            let mut completions = stmt
                .query_map([user_id], completion_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for completion in &mut completions {
                completion.steps = load_completion_steps(conn, &completion.id)?;
            }
            Ok(completions)
        })
    }

    async fn create_completion(&self, user_id: &str, exercise_id: &str) -> Result<Completion> {
        let completion = Completion {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            exercise_id: exercise_id.to_string(),
            completion_message: None,
            created_at: now(),
            steps: Vec::new(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO completions (id, user_id, exercise_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![completion.id, user_id, exercise_id, timestamp(completion.created_at)],
            )?;
            Ok(())
        })?;
        Ok(completion)
    }

    async fn create_completion_step(&self, completion_id: &str, exercise_step_id: &str) -> Result<CompletionStep> {
        let step = CompletionStep {
            id: Uuid::new_v4().to_string(),
            completion_id: completion_id.to_string(),
            exercise_step_id: exercise_step_id.to_string(),
            completed: false,
            result: None,
            responses: None,
            messages: Vec::new(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO completion_steps (id, completion_id, exercise_step_id) VALUES (?1, ?2, ?3)",
                params![step.id, completion_id, exercise_step_id],
            )?;
            Ok(())
        })?;
        Ok(step)
    }

    async fn get_completion_step(&self, id: &str) -> Result<Option<CompletionStep>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE cs.id = ?1", COMPLETION_STEPS_QUERY);
            let step = conn.query_row(&sql, [id], completion_step_from_row).optional()?;
            match step {
                Some(mut step) => {
                    step.messages = load_messages(conn, &step.id)?;
                    Ok(Some(step))
                }
                None => Ok(None),
            }
        })
    }

    async fn save_step_result(&self, id: &str, result: &str, responses: Option<&StepResponses>) -> Result<()> {
        let responses = responses.map(serde_json::to_string).transpose()?;
        self.with_conn(|conn| {
            let updated = match responses {
                Some(responses) => conn.execute(
                    "UPDATE completion_steps SET result = ?2, responses = ?3 WHERE id = ?1",
                    params![id, result, responses],
                )?,
                None => conn.execute(
                    "UPDATE completion_steps SET result = ?2 WHERE id = ?1",
                    params![id, result],
                )?,
            };
            if updated == 0 {
                return Err(NobleError::not_found("Completion step", id));
            }
            Ok(())
        })
    }

    async fn mark_step_completed(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute("UPDATE completion_steps SET completed = 1 WHERE id = ?1", [id])?;
            if updated == 0 {
                return Err(NobleError::not_found("Completion step", id));
            }
            Ok(())
        })
    }

    async fn set_completion_message_if_unset(&self, completion_id: &str, message: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE completions SET completion_message = ?2
                 WHERE id = ?1 AND completion_message IS NULL",
                params![completion_id, message],
            )?;
            Ok(updated == 1)
        })
    }

    async fn append_message(
        &self,
        completion_step_id: &str,
        role: MessageRole,
        parts: &[MessagePart],
    ) -> Result<ConversationMessage> {
        let parts_json = serde_json::to_string(parts)?;
        self.with_conn(|conn| {
            // Never let a message sort before one already persisted
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM conversation_messages WHERE completion_step_id = ?1",
                [completion_step_id],
                |row| row.get(0),
            )?;
            let current = now();
            let created_at = match latest
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc))
            {
                Some(latest) if latest > current => latest,
                _ => current,
            };

            let message = ConversationMessage {
                id: Uuid::new_v4().to_string(),
                completion_step_id: completion_step_id.to_string(),
                role,
                parts: parts.to_vec(),
                created_at,
            };
            conn.execute(
                "INSERT INTO conversation_messages (id, completion_step_id, role, parts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    completion_step_id,
                    role.as_str(),
                    parts_json,
                    timestamp(created_at)
                ],
            )?;
            Ok(message)
        })
    }

    async fn list_messages(&self, completion_step_id: &str) -> Result<Vec<ConversationMessage>> {
        self.with_conn(|conn| load_messages(conn, completion_step_id))
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM system_settings WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO system_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, timestamp(Utc::now())],
            )?;
            Ok(())
        })
    }
}
