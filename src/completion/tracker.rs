//! Find-or-create of a user's completion record for an exercise.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::content::{Exercise, ExerciseStep};
use crate::error::{NobleError, Result};
use crate::store::{Completion, CompletionStep, Repository};

/// A completion step together with everything needed to act on it.
#[derive(Debug, Clone)]
pub struct OwnedStep {
    pub completion: Completion,
    pub step: CompletionStep,
    pub exercise: Exercise,
    pub exercise_step: ExerciseStep,
}

pub struct CompletionTracker {
    repo: Arc<dyn Repository>,
}

impl CompletionTracker {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Return the user's completion for the exercise, creating it and any
    /// missing step rows. The returned steps match `exercise_steps` exactly,
    /// in the given order, with their messages loaded.
    ///
    /// Existing step rows are never modified. A concurrent first call that
    /// loses the creation race re-reads the winner's row.
    pub async fn ensure_completion(
        &self,
        user_id: &str,
        exercise_id: &str,
        exercise_steps: &[ExerciseStep],
    ) -> Result<Completion> {
        if self.repo.get_exercise(exercise_id).await?.is_none() {
            return Err(NobleError::not_found("Exercise", exercise_id));
        }
        if let Some(foreign) = exercise_steps
            .iter()
            .find(|s| !s.exercise_id.is_empty() && s.exercise_id != exercise_id)
        {
            return Err(NobleError::InvalidContent(format!(
                "step '{}' belongs to exercise '{}'",
                foreign.id, foreign.exercise_id
            )));
        }

        let completion = match self.repo.find_completion(user_id, exercise_id).await? {
            Some(completion) => completion,
            None => match self.repo.create_completion(user_id, exercise_id).await {
                Ok(completion) => {
                    info!(
                        completion_id = %completion.id,
                        user_id,
                        exercise_id,
                        "Created completion"
                    );
                    completion
                }
                Err(NobleError::Conflict(_)) => {
                    debug!(user_id, exercise_id, "Completion created concurrently, re-reading");
                    self.repo
                        .find_completion(user_id, exercise_id)
                        .await?
                        .ok_or_else(|| {
                            NobleError::Internal(
                                "completion vanished after a create conflict".to_string(),
                            )
                        })?
                }
                Err(e) => return Err(e),
            },
        };

        let mut created = 0;
        for exercise_step in exercise_steps {
            if completion.step(&exercise_step.id).is_some() {
                continue;
            }
            match self
                .repo
                .create_completion_step(&completion.id, &exercise_step.id)
                .await
            {
                Ok(_) => created += 1,
                Err(NobleError::Conflict(_)) => {
                    debug!(exercise_step_id = %exercise_step.id, "Completion step created concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        if created > 0 {
            debug!(completion_id = %completion.id, created, "Backfilled completion steps");
        }

        let mut completion = if created > 0 || completion.steps.len() != exercise_steps.len() {
            self.repo
                .get_completion(&completion.id)
                .await?
                .ok_or_else(|| NobleError::not_found("Completion", &completion.id))?
        } else {
            completion
        };

        let mut by_step: HashMap<String, CompletionStep> = completion
            .steps
            .drain(..)
            .map(|s| (s.exercise_step_id.clone(), s))
            .collect();
        completion.steps = exercise_steps
            .iter()
            .filter_map(|es| by_step.remove(&es.id))
            .collect();
        Ok(completion)
    }

    /// Load a completion step on behalf of `user_id`. The returned
    /// completion is backfilled with rows for steps added to the exercise
    /// since it was started.
    ///
    /// Fails with `NotFound` when the step does not exist and `Unauthorized`
    /// when it belongs to another user.
    pub async fn owned_step(&self, user_id: &str, completion_step_id: &str) -> Result<OwnedStep> {
        let step = self
            .repo
            .get_completion_step(completion_step_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Completion step", completion_step_id))?;
        let completion = self
            .repo
            .get_completion(&step.completion_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Completion", &step.completion_id))?;
        if completion.user_id != user_id {
            return Err(NobleError::Unauthorized(
                "completion step belongs to another user".to_string(),
            ));
        }
        let exercise = self
            .repo
            .get_exercise(&completion.exercise_id)
            .await?
            .ok_or_else(|| NobleError::not_found("Exercise", &completion.exercise_id))?;
        let exercise_step = exercise
            .step(&step.exercise_step_id)
            .cloned()
            .ok_or_else(|| NobleError::not_found("Exercise step", &step.exercise_step_id))?;
        let completion = self
            .ensure_completion(user_id, &exercise.id, &exercise.steps)
            .await?;

        Ok(OwnedStep {
            completion,
            step,
            exercise,
            exercise_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{fixture, result_step};

    fn step_ids(completion: &Completion) -> Vec<String> {
        completion.steps.iter().map(|s| s.id.clone()).collect()
    }

    #[tokio::test]
    async fn ensure_completion_is_idempotent() {
        let fx = fixture(vec![result_step("a", 1), result_step("b", 2)]).await;
        let tracker = CompletionTracker::new(fx.repository());

        let first = tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();
        let second = tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.steps.len(), 2);
        assert_eq!(step_ids(&first), step_ids(&second));
        let exercise_step_ids: Vec<&str> = first.steps.iter().map(|s| s.exercise_step_id.as_str()).collect();
        assert_eq!(exercise_step_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn new_exercise_steps_are_backfilled() {
        let fx = fixture(vec![result_step("a", 1), result_step("b", 2)]).await;
        let tracker = CompletionTracker::new(fx.repository());
        let before = tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();
        fx.repo
            .save_step_result(&before.steps[0].id, "kept", None)
            .await
            .unwrap();
        fx.repo.mark_step_completed(&before.steps[0].id).await.unwrap();

        let mut exercise = fx.exercise.clone();
        exercise.steps.push(result_step("c", 3));
        exercise.normalize();
        fx.repo.save_exercise(&exercise).await.unwrap();

        let after = tracker
            .ensure_completion(&fx.user.id, "ex-1", &exercise.steps)
            .await
            .unwrap();

        assert_eq!(after.id, before.id);
        assert_eq!(after.steps.len(), 3);
        assert_eq!(after.steps[0].id, before.steps[0].id);
        assert_eq!(after.steps[1].id, before.steps[1].id);
        assert_eq!(after.steps[2].exercise_step_id, "c");
        assert!(after.steps[0].completed);
        assert_eq!(after.steps[0].result.as_deref(), Some("kept"));
        assert!(!after.steps[2].completed);
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_completion() {
        let fx = fixture(vec![result_step("a", 1), result_step("b", 2)]).await;
        let tracker = Arc::new(CompletionTracker::new(fx.repository()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            let user_id = fx.user.id.clone();
            let steps = fx.exercise.steps.clone();
            handles.push(tokio::spawn(async move {
                tracker.ensure_completion(&user_id, "ex-1", &steps).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            let completion = handle.await.unwrap().unwrap();
            assert_eq!(completion.steps.len(), 2);
            ids.push(completion.id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(fx.repo.list_completions(&fx.user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_exercise_is_not_found() {
        let fx = fixture(vec![result_step("a", 1)]).await;
        let tracker = CompletionTracker::new(fx.repository());

        let err = tracker
            .ensure_completion(&fx.user.id, "missing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, NobleError::NotFound(_)));
    }

    #[tokio::test]
    async fn returned_steps_follow_the_requested_set() {
        let fx = fixture(vec![result_step("a", 1), result_step("b", 2)]).await;
        let tracker = CompletionTracker::new(fx.repository());
        tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();

        let only_b = vec![fx.exercise.steps[1].clone()];
        let completion = tracker
            .ensure_completion(&fx.user.id, "ex-1", &only_b)
            .await
            .unwrap();
        assert_eq!(completion.steps.len(), 1);
        assert_eq!(completion.steps[0].exercise_step_id, "b");
    }

    #[tokio::test]
    async fn owned_step_backfills_added_exercise_steps() {
        let fx = fixture(vec![result_step("a", 1)]).await;
        let tracker = CompletionTracker::new(fx.repository());
        let completion = tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();

        let mut exercise = fx.exercise.clone();
        exercise.steps.push(result_step("b", 2));
        exercise.normalize();
        fx.repo.save_exercise(&exercise).await.unwrap();

        let owned = tracker
            .owned_step(&fx.user.id, &completion.steps[0].id)
            .await
            .unwrap();
        let exercise_step_ids: Vec<&str> = owned
            .completion
            .steps
            .iter()
            .map(|s| s.exercise_step_id.as_str())
            .collect();
        assert_eq!(exercise_step_ids, vec!["a", "b"]);
        let stored = fx.repo.get_completion(&completion.id).await.unwrap().unwrap();
        assert_eq!(stored.steps.len(), 2);
    }

    #[tokio::test]
    async fn owned_step_checks_the_owner() {
        let fx = fixture(vec![result_step("a", 1)]).await;
        let tracker = CompletionTracker::new(fx.repository());
        let completion = tracker
            .ensure_completion(&fx.user.id, "ex-1", &fx.exercise.steps)
            .await
            .unwrap();
        let step_id = completion.steps[0].id.clone();

        let owned = tracker.owned_step(&fx.user.id, &step_id).await.unwrap();
        assert_eq!(owned.exercise_step.id, "a");
        assert_eq!(owned.completion.id, completion.id);

        let other = fx
            .repo
            .create_user("eve@example.com", false, &Default::default())
            .await
            .unwrap();
        assert!(matches!(
            tracker.owned_step(&other.id, &step_id).await,
            Err(NobleError::Unauthorized(_))
        ));
        assert!(matches!(
            tracker.owned_step(&fx.user.id, "missing").await,
            Err(NobleError::NotFound(_))
        ));
    }
}
