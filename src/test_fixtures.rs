//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::content::{AiBlock, Block, Exercise, ExerciseStep, StepContent, User, UserData};
use crate::store::{Repository, SqliteStore};

pub(crate) struct Fixture {
    pub repo: Arc<SqliteStore>,
    pub user: User,
    pub exercise: Exercise,
}

impl Fixture {
    pub fn repository(&self) -> Arc<dyn Repository> {
        self.repo.clone()
    }
}

/// A step that is completed by saving a result.
pub(crate) fn result_step(id: &str, order: i64) -> ExerciseStep {
    ExerciseStep {
        id: id.to_string(),
        exercise_id: String::new(),
        order,
        title: Some(format!("Step {}", order)),
        content: StepContent {
            blocks: vec![
                Block::text(format!("<p>Reflect on part {}.</p>", order)),
                Block {
                    ai: Some(AiBlock {
                        system_prompt: "Ask about the user's values.".into(),
                        initial_user_prompt: Some("Let's begin".into()),
                    }),
                    ..Default::default()
                },
            ],
            result_prompt: Some("What did you discover?".into()),
        },
    }
}

/// A step with no result requirement.
pub(crate) fn reading_step(id: &str, order: i64) -> ExerciseStep {
    ExerciseStep {
        id: id.to_string(),
        exercise_id: String::new(),
        order,
        title: None,
        content: StepContent {
            blocks: vec![Block::text("<p>Read this slowly.</p>")],
            result_prompt: None,
        },
    }
}

pub(crate) async fn fixture(steps: Vec<ExerciseStep>) -> Fixture {
    let repo = Arc::new(SqliteStore::open_in_memory().unwrap());
    let data: UserData = serde_json::from_value(serde_json::json!({
        "bio": "Gardener and father of two",
        "urls": [{"url": "https://garden.example", "description": "Blog"}]
    }))
    .unwrap();
    let user = repo.create_user("ada@example.com", false, &data).await.unwrap();

    let mut exercise = Exercise {
        id: "ex-1".into(),
        name: "Core values".into(),
        week_number: Some(1),
        buddhism_concept: Some("Right intention".into()),
        metadata: None,
        steps,
    };
    exercise.normalize();
    repo.save_exercise(&exercise).await.unwrap();

    Fixture {
        repo,
        user,
        exercise,
    }
}
