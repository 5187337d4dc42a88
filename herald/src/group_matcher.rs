//! Topic clustering (spec.md §4.5). New in this engine — the teacher has
//! no grouping concept — but the embedding plumbing is grounded on
//! `processing::f32_vec_to_bytes` (`processing.rs`) and the upsert style of
//! `storage.rs`.
//!
//! An article is embedded from its title + AI summary, matched against
//! every existing group centroid the user owns by cosine similarity, and
//! either joins the best match above threshold or seeds a new group.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::embedding;
use crate::llm::LlmClient;
use crate::store::Store;

const NEW_GROUP_TOPIC_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupOutcome {
    Joined,
    Created,
}

#[derive(Debug, Clone)]
pub struct GroupAttachment {
    pub group_id: i64,
    pub outcome: GroupOutcome,
    pub similarity: Option<f32>,
}

pub struct GroupMatcher;

impl GroupMatcher {
    /// Embed `title`/`summary`, find the user's best-matching group above
    /// `similarity_threshold`, and attach the article to it — creating a
    /// new single-member group when nothing matches (spec.md §4.5).
    pub async fn attach_or_create(
        store: &Store,
        llm: &dyn LlmClient,
        embedding_model: &str,
        user_id: i64,
        article_id: i64,
        title: &str,
        summary: &str,
        similarity_threshold: f32,
        now: DateTime<Utc>,
    ) -> Result<GroupAttachment> {
        let text = format!("{}\n{}", title, summary);
        let vector = llm
            .embed(embedding_model, &text)
            .await
            .context("failed to embed article for grouping")?;

        let groups = store.user_groups_with_embeddings(user_id).await?;
        let best = groups
            .iter()
            .map(|(id, centroid)| (*id, embedding::cosine_similarity(&vector, centroid)))
            .filter(|(_, sim)| *sim >= similarity_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let (group_id, outcome, similarity) = match best {
            Some((gid, sim)) => (gid, GroupOutcome::Joined, Some(sim)),
            None => {
                let topic: String = title.chars().take(NEW_GROUP_TOPIC_MAX_CHARS).collect();
                let group = store.create_group(user_id, &topic, now).await?;
                (group.id, GroupOutcome::Created, None)
            }
        };

        // Member insert, prior-count read, prior-centroid read, and centroid
        // write all happen inside one transaction in the Store (spec.md §9),
        // so a concurrent attach to this same group can't read a stale count.
        store
            .attach_member_and_update_centroid(group_id, article_id, &vector, now)
            .await?;

        Ok(GroupAttachment {
            group_id,
            outcome,
            similarity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedClient {
        vectors: Mutex<Vec<Vec<f32>>>,
    }

    #[async_trait]
    impl LlmClient for FixedEmbedClient {
        async fn generate(&self, _model: &str, _prompt: &str, _temperature: f32) -> anyhow::Result<String> {
            unimplemented!()
        }

        async fn embed(&self, _model: &str, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.vectors.lock().unwrap().remove(0))
        }
    }

    async fn test_store() -> Store {
        let pool = common::init_db_pool(":memory:").await.unwrap();
        Store::open(pool).await.unwrap()
    }

    #[tokio::test]
    async fn scenario_3_first_article_creates_group_second_joins() {
        let store = test_store().await;
        let user = store.create_user("u").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();

        let a1 = store
            .add_article(
                feed.id,
                &crate::store::NewArticle {
                    guid: "g1".to_string(),
                    title: "Quantum computing breakthrough".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let a2 = store
            .add_article(
                feed.id,
                &crate::store::NewArticle {
                    guid: "g2".to_string(),
                    title: "Another quantum computing advance".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let llm = FixedEmbedClient {
            vectors: Mutex::new(vec![vec![1.0, 0.0, 0.0], vec![0.95, 0.05, 0.0]]),
        };

        let first = GroupMatcher::attach_or_create(
            &store,
            &llm,
            "nomic-embed-text",
            user.id,
            a1.article_id,
            "Quantum computing breakthrough",
            "",
            0.75,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(first.outcome, GroupOutcome::Created);

        let second = GroupMatcher::attach_or_create(
            &store,
            &llm,
            "nomic-embed-text",
            user.id,
            a2.article_id,
            "Another quantum computing advance",
            "",
            0.75,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(second.outcome, GroupOutcome::Joined);
        assert_eq!(second.group_id, first.group_id);
        assert!(second.similarity.unwrap() >= 0.75);

        let members = store.group_member_article_ids(first.group_id).await.unwrap();
        assert_eq!(members.len(), 2);

        let groups = store.user_groups_with_embeddings(user.id).await.unwrap();
        let (_, centroid) = groups.into_iter().find(|(id, _)| *id == first.group_id).unwrap();
        assert!((centroid[0] - 0.975).abs() < 1e-3);
    }

    #[tokio::test]
    async fn dissimilar_article_creates_a_second_group() {
        let store = test_store().await;
        let user = store.create_user("u").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();

        let a1 = store
            .add_article(feed.id, &crate::store::NewArticle { guid: "g1".to_string(), ..Default::default() })
            .await
            .unwrap();
        let a2 = store
            .add_article(feed.id, &crate::store::NewArticle { guid: "g2".to_string(), ..Default::default() })
            .await
            .unwrap();

        let llm = FixedEmbedClient {
            vectors: Mutex::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
        };

        let first = GroupMatcher::attach_or_create(
            &store, &llm, "m", user.id, a1.article_id, "A", "", 0.75, Utc::now(),
        )
        .await
        .unwrap();
        let second = GroupMatcher::attach_or_create(
            &store, &llm, "m", user.id, a2.article_id, "B", "", 0.75, Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(second.outcome, GroupOutcome::Created);
        assert_ne!(first.group_id, second.group_id);
    }
}
