//! Data model `Dog` and the Dog Selector (C2).

use crate::error::Result;
use crate::store::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A named agent identity: display name, email (commit attribution), and a
/// per-dog code-forge credential. Immutable for a process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dog {
    pub name: String,
    pub email: String,
    pub credential: String,
}

impl Dog {
    /// Lowercase, hyphenated form used in branch names (`{dog-slug}/...`).
    pub fn slug(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect()
    }
}

/// Lowercase, hyphen-joined slug for free text, used for the task component
/// of a branch name (§6).
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut prev_hyphen = false;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen && !slug.is_empty() {
            slug.push('-');
            prev_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug.chars().take(50).collect()
}

/// Composes the base branch name `"{dog-slug}/{date}-{task-slug}"` (§6).
/// `date` is caller-supplied (`YYYY-MM-DD`) so this stays pure and
/// deterministic; the caller resolves forge conflicts by appending `-2`,
/// `-3`, ….
pub fn branch_base_name(dog: &Dog, date: &str, description: &str) -> String {
    format!("{}/{}-{}", dog.slug(), date, slugify(description))
}

/// Least-busy pick over a static pool, with load counters living in the
/// Coordination Store. Falls back to an in-process round-robin counter when
/// the store is unavailable (decision recorded in `DESIGN.md`).
pub struct DogSelector {
    roster: Vec<Dog>,
    store: Arc<CoordinationStore>,
    fallback_cursor: AtomicUsize,
}

impl DogSelector {
    pub fn new(roster: Vec<Dog>, store: Arc<CoordinationStore>) -> Self {
        Self {
            roster,
            store,
            fallback_cursor: AtomicUsize::new(0),
        }
    }

    /// Pick a dog to run the next task.
    pub async fn select(&self) -> Result<Dog> {
        if self.roster.len() == 1 {
            return Ok(self.roster[0].clone());
        }

        let mut loads = Vec::with_capacity(self.roster.len());
        let mut store_ok = true;
        for dog in &self.roster {
            match self.store.active_task_count(&dog.name).await {
                Ok(count) => loads.push(count),
                Err(_) => {
                    store_ok = false;
                    break;
                }
            }
        }

        if !store_ok {
            let idx = self.fallback_cursor.fetch_add(1, Ordering::Relaxed) % self.roster.len();
            return Ok(self.roster[idx].clone());
        }

        let mut best_idx = 0;
        let mut best_load = loads[0];
        for (idx, &load) in loads.iter().enumerate().skip(1) {
            if load < best_load {
                best_load = load;
                best_idx = idx;
            }
        }

        Ok(self.roster[best_idx].clone())
    }

    /// Mark a dog busy with a task. Idempotent (set-add of an existing
    /// member is a no-op).
    pub async fn mark_busy(&self, dog: &Dog, task_id: &str) -> Result<()> {
        self.store.mark_task_active(&dog.name, task_id).await
    }

    /// Mark a dog free of a task. A no-op (with a warning) if the task was
    /// not a member, so retries are safe (property in §8).
    pub async fn mark_free(&self, dog: &Dog, task_id: &str) -> Result<()> {
        let removed = self.store.mark_task_inactive(&dog.name, task_id).await?;
        if !removed {
            tracing::warn!(dog = %dog.name, task_id, "mark_free called for a task not in active set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dog(name: &str) -> Dog {
        Dog {
            name: name.into(),
            email: format!("{name}@example.com"),
            credential: "token".into(),
        }
    }

    #[test]
    fn slug_replaces_non_alphanumeric() {
        let d = dog("Rex Walker");
        assert_eq!(d.slug(), "rex-walker");
    }

    #[test]
    fn slugify_collapses_punctuation_and_trims_trailing_hyphen() {
        assert_eq!(slugify("Add a hello endpoint!!"), "add-a-hello-endpoint");
    }

    #[test]
    fn branch_base_name_matches_dog_slug_date_task_slug_format() {
        let d = dog("D1");
        let name = branch_base_name(&d, "2026-07-28", "Add a hello endpoint");
        assert_eq!(name, "d1/2026-07-28-add-a-hello-endpoint");
    }
}
