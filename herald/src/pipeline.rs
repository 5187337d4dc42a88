//! Per-user processing loop (spec.md §4.6): summarize, security-check,
//! curate, group-attach, then a deferred per-cycle group-summary refresh.
//!
//! Grounded on the teacher's `processing::process_single_article` /
//! `batch_process_articles` (per-article try/log/continue shape) and
//! `personalize_worker::personalize_for_users` (per-user loop, continue on
//! a single user's failure without aborting the batch). Unlike the
//! teacher's summarizer, which falls back to an extractive summary on LLM
//! failure, this pipeline leaves an article unsummarized and retries it
//! next cycle (§4.6 step 1) — there is no extractive fallback here because
//! full-text extraction from linked pages is an explicit Non-goal.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::Config;
use tracing::warn;

use crate::group_matcher::GroupMatcher;
use crate::llm::{
    self, parse_curation_response, parse_security_response, LlmClient, CURATION_CONTENT_BUDGET,
    SECURITY_CONTENT_BUDGET, SUMMARIZATION_CONTENT_BUDGET,
};
use crate::prompt_loader::{render, PromptKind, PromptLoader};
use crate::store::Store;

/// Articles processed per (user) invocation (spec.md §4.6).
pub const BATCH_LIMIT: i64 = 100;

/// Outcome of running the Pipeline once for a user.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub considered: usize,
    pub summarized: usize,
    pub security_rejected: usize,
    pub scored: usize,
    pub skipped: usize,
    pub groups_touched: usize,
}

/// Shared dependencies for one Pipeline run. Store and LlmClient are
/// specified as narrow capability sets (spec.md §9); both are mockable.
pub struct Pipeline<'a> {
    pub store: &'a Store,
    pub llm: &'a dyn LlmClient,
    pub prompts: &'a PromptLoader,
    pub config: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a Store,
        llm: &'a dyn LlmClient,
        prompts: &'a PromptLoader,
        config: &'a Config,
    ) -> Self {
        Pipeline {
            store,
            llm,
            prompts,
            config,
        }
    }

    /// Process up to `BATCH_LIMIT` unscored articles for `user_id` (spec.md
    /// §4.6). "Unscored for user U" means no ReadState row exists yet —
    /// idempotent because every downstream write is itself an upsert keyed
    /// on presence of that row (or of ArticleSummary/GroupMember rows), so
    /// re-running after an interrupted cycle reaches the same terminal
    /// state as a clean run.
    pub async fn process_user(&self, user_id: i64, now: DateTime<Utc>) -> Result<PipelineStats> {
        let articles = self
            .store
            .unscored_articles_for_user(user_id, BATCH_LIMIT)
            .await
            .context("failed to list unscored articles")?;

        let mut stats = PipelineStats {
            considered: articles.len(),
            ..Default::default()
        };
        let mut touched_groups: HashSet<i64> = HashSet::new();

        let keywords = self.keyword_preference(user_id).await?;

        for article in articles {
            let content = llm::truncate_chars(&article.content, SUMMARIZATION_CONTENT_BUDGET);

            // Step 1: summarize (skip if already present).
            let ai_summary = match self.store.get_article_summary(user_id, article.id).await? {
                Some(row) => row.ai_summary,
                None => {
                    let resolved = self
                        .prompts
                        .resolve(self.store, self.config, user_id, PromptKind::Summarization)
                        .await?;
                    let prompt = render(
                        &resolved.template,
                        &[("Title", &article.title), ("Content", &content)],
                    );
                    match self
                        .llm
                        .generate(&self.config.ollama.curation_model, &prompt, resolved.temperature)
                        .await
                    {
                        Ok(text) => {
                            self.store
                                .upsert_article_summary(user_id, article.id, &text, now)
                                .await?;
                            stats.summarized += 1;
                            text
                        }
                        Err(e) => {
                            warn!(article_id = article.id, error = %e, "pipeline: summarization failed, will retry next cycle");
                            stats.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            // Step 2: security check. Always uses the embedded default
            // prompt (I7) regardless of any per-user/config override.
            let security_content = llm::truncate_chars(&article.content, SECURITY_CONTENT_BUDGET);
            let security_resolved = self
                .prompts
                .resolve(self.store, self.config, user_id, PromptKind::Security)
                .await?;
            let security_prompt = render(
                &security_resolved.template,
                &[("Title", &article.title), ("Content", &security_content)],
            );
            let security_raw = match self
                .llm
                .generate(
                    &self.config.ollama.security_model,
                    &security_prompt,
                    security_resolved.temperature,
                )
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "pipeline: security check failed, skipping article");
                    stats.skipped += 1;
                    continue;
                }
            };
            let security = parse_security_response(&security_raw, &article.title);

            if !security.safe || security.score < self.config.thresholds.security_threshold {
                self.store
                    .upsert_read_state(user_id, article.id, false, Some(0.0), Some(security.score), now)
                    .await?;
                stats.security_rejected += 1;
                continue;
            }

            // Step 3: curation score.
            let curation_content = llm::truncate_chars(&article.content, CURATION_CONTENT_BUDGET);
            let curation_resolved = self
                .prompts
                .resolve(self.store, self.config, user_id, PromptKind::Curation)
                .await?;
            let curation_prompt = render(
                &curation_resolved.template,
                &[
                    ("Title", &article.title),
                    ("Content", &curation_content),
                    ("Keywords", &keywords),
                ],
            );
            let curation_raw = match self
                .llm
                .generate(
                    &self.config.ollama.curation_model,
                    &curation_prompt,
                    curation_resolved.temperature,
                )
                .await
            {
                Ok(text) => text,
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "pipeline: curation failed, skipping article");
                    stats.skipped += 1;
                    continue;
                }
            };
            let curation = parse_curation_response(&curation_raw);

            // Step 4: write ReadState.
            self.store
                .upsert_read_state(
                    user_id,
                    article.id,
                    false,
                    Some(curation.score),
                    Some(security.score),
                    now,
                )
                .await?;
            stats.scored += 1;

            // Step 5: group attach/create + conditional topic regeneration.
            match GroupMatcher::attach_or_create(
                self.store,
                self.llm,
                &self.config.ollama.embedding_model,
                user_id,
                article.id,
                &article.title,
                &ai_summary,
                self.config.thresholds.similarity_threshold as f32,
                now,
            )
            .await
            {
                Ok(attachment) => {
                    touched_groups.insert(attachment.group_id);
                    if let Err(e) = self
                        .maybe_regenerate_topic(user_id, attachment.group_id, now)
                        .await
                    {
                        warn!(group_id = attachment.group_id, error = %e, "pipeline: topic regeneration failed, keeping existing topic");
                    }
                }
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "pipeline: group attach failed for this article");
                }
            }
        }

        // Step 6: deferred per-cycle group-summary refresh, once per
        // touched group rather than once per article.
        for group_id in &touched_groups {
            if let Err(e) = self.refresh_group_summary(user_id, *group_id, now).await {
                warn!(group_id = *group_id, error = %e, "pipeline: group summary refresh failed");
            }
        }
        stats.groups_touched = touched_groups.len();

        Ok(stats)
    }

    async fn keyword_preference(&self, user_id: i64) -> Result<String> {
        let prefs = self.store.get_all_preferences(user_id).await?;
        Ok(prefs
            .into_iter()
            .find(|p| p.key == "keywords")
            .map(|p| p.value)
            .unwrap_or_default())
    }

    /// spec.md §4.6 step 5: once a group reaches 3+ members and its topic is
    /// still the initial title-derived placeholder, regenerate the topic
    /// (bounded to <=200 chars) from the group's current member narrative.
    async fn maybe_regenerate_topic(
        &self,
        user_id: i64,
        group_id: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .context("group disappeared mid-pipeline")?;

        let tuples = self.store.group_member_tuples(group_id, user_id).await?;
        if tuples.len() < 3 {
            return Ok(());
        }

        let initial_placeholder: String = tuples[0].0.chars().take(100).collect();
        if group.topic != initial_placeholder {
            // Topic was already regenerated (or user-edited) in a prior cycle.
            return Ok(());
        }

        let narrative = self.generate_group_narrative(user_id, &group.topic, &tuples).await?;
        let topic = llm::truncate_chars(&narrative, 200);
        self.store.update_group_topic(group_id, &topic, now).await?;
        Ok(())
    }

    /// spec.md §4.6 step 6: regenerate the narrative from current members
    /// and upsert the GroupSummary row.
    async fn refresh_group_summary(&self, user_id: i64, group_id: i64, now: DateTime<Utc>) -> Result<()> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .context("group disappeared mid-pipeline")?;
        let tuples = self.store.group_member_tuples(group_id, user_id).await?;
        if tuples.is_empty() {
            return Ok(());
        }

        let narrative = self.generate_group_narrative(user_id, &group.topic, &tuples).await?;
        let max_score = tuples.iter().filter_map(|(_, _, s)| *s).fold(None, |acc, s| {
            Some(acc.map_or(s, |a: f64| a.max(s)))
        });

        self.store
            .upsert_group_summary(group_id, &narrative, tuples.len() as i64, max_score, now)
            .await?;
        Ok(())
    }

    async fn generate_group_narrative(
        &self,
        user_id: i64,
        topic: &str,
        tuples: &[(String, String, Option<f64>)],
    ) -> Result<String> {
        let articles_text = tuples
            .iter()
            .map(|(title, summary, score)| {
                let summary = llm::truncate_chars(summary, 400);
                match score {
                    Some(s) => format!("- {} (score {:.1}): {}", title, s, summary),
                    None => format!("- {}: {}", title, summary),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let resolved = self
            .prompts
            .resolve(self.store, self.config, user_id, PromptKind::GroupSummary)
            .await?;
        let prompt = render(&resolved.template, &[("Topic", topic), ("Articles", &articles_text)]);
        self.llm
            .generate(&self.config.ollama.curation_model, &prompt, resolved.temperature)
            .await
            .context("failed to generate group narrative")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A scripted LLM double keyed on which model name is invoked, letting
    /// tests stand in distinct canned responses for security vs curation vs
    /// summarization calls without guessing call order.
    struct ScriptedLlm {
        by_model: Mutex<HashMap<String, Vec<String>>>,
        embedding: Vec<f32>,
    }

    impl ScriptedLlm {
        fn new(embedding: Vec<f32>) -> Self {
            ScriptedLlm {
                by_model: Mutex::new(HashMap::new()),
                embedding,
            }
        }

        fn script(mut self, model: &str, responses: Vec<&str>) -> Self {
            self.by_model.get_mut().unwrap().insert(
                model.to_string(),
                responses.into_iter().map(|s| s.to_string()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, model: &str, _prompt: &str, _temperature: f32) -> anyhow::Result<String> {
            let mut guard = self.by_model.lock().unwrap();
            let queue = guard
                .get_mut(model)
                .unwrap_or_else(|| panic!("no script for model {}", model));
            if queue.is_empty() {
                panic!("script exhausted for model {}", model);
            }
            Ok(queue.remove(0))
        }

        async fn embed(&self, _model: &str, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.embedding.clone())
        }
    }

    fn test_config() -> Config {
        toml::from_str(
            r#"
            [database]
            path = ":memory:"
            "#,
        )
        .unwrap()
    }

    async fn test_store() -> Store {
        let pool = common::init_db_pool(":memory:").await.unwrap();
        Store::open(pool).await.unwrap()
    }

    #[tokio::test]
    async fn scenario_2_security_rejection_zeroes_interest_but_keeps_article_unread() {
        let store = test_store().await;
        let user = store.create_user("u1").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();
        store
            .add_article(
                feed.id,
                &crate::store::NewArticle {
                    guid: "g1".to_string(),
                    title: "T".to_string(),
                    content: "some content".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let llm = ScriptedLlm::new(vec![1.0, 0.0, 0.0])
            .script("llama3", vec!["a summary", r#"{"score":9,"reasoning":"interesting"}"#])
            .script("gemma3:4b", vec![r#"{"safe":false,"score":2,"reasoning":"bad","sanitized":"x"}"#]);
        let prompts = PromptLoader::new();
        let config = test_config();
        let pipeline = Pipeline::new(&store, &llm, &prompts, &config);

        let stats = pipeline.process_user(user.id, Utc::now()).await.unwrap();
        assert_eq!(stats.security_rejected, 1);
        assert_eq!(stats.scored, 0);

        let unread = store.get_unread_articles(user.id, None, false, 50, 0).await.unwrap();
        assert_eq!(unread.len(), 1, "rejection does not mark the article read");

        let candidates = store
            .candidate_articles_by_interest_score(user.id, 8.0)
            .await
            .unwrap();
        assert!(candidates.is_empty(), "interest_score forced to 0.0 by I5");
    }

    #[tokio::test]
    async fn safe_and_curated_article_gets_scored_and_grouped() {
        let store = test_store().await;
        let user = store.create_user("u1").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();
        store
            .add_article(
                feed.id,
                &crate::store::NewArticle {
                    guid: "g1".to_string(),
                    title: "Breaking News".to_string(),
                    content: "some content".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let llm = ScriptedLlm::new(vec![1.0, 0.0, 0.0])
            .script("llama3", vec!["a summary", r#"{"score":9,"reasoning":"interesting"}"#])
            .script("gemma3:4b", vec![r#"{"safe":true,"score":9,"reasoning":"fine","sanitized":"Breaking News"}"#]);
        let prompts = PromptLoader::new();
        let config = test_config();
        let pipeline = Pipeline::new(&store, &llm, &prompts, &config);

        let stats = pipeline.process_user(user.id, Utc::now()).await.unwrap();
        assert_eq!(stats.scored, 1);
        assert_eq!(stats.groups_touched, 1);

        let candidates = store
            .candidate_articles_by_interest_score(user.id, 8.0)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);

        let groups = store.list_user_groups(user.id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].topic, "Breaking News");
    }

    #[tokio::test]
    async fn llm_failure_during_summarization_skips_article_and_writes_no_read_state() {
        let store = test_store().await;
        let user = store.create_user("u1").await.unwrap();
        let feed = store.create_feed("https://x/feed", "Feed", "").await.unwrap();
        store.add_subscription(user.id, feed.id).await.unwrap();
        store
            .add_article(
                feed.id,
                &crate::store::NewArticle {
                    guid: "g1".to_string(),
                    title: "T".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Script has nothing queued for "llama3" -> summarize call panics?
        // Use an LLM stub whose generate always errors instead.
        struct AlwaysFails;
        #[async_trait]
        impl LlmClient for AlwaysFails {
            async fn generate(&self, _model: &str, _prompt: &str, _temperature: f32) -> anyhow::Result<String> {
                anyhow::bail!("llm unavailable")
            }
            async fn embed(&self, _model: &str, _text: &str) -> anyhow::Result<Vec<f32>> {
                anyhow::bail!("llm unavailable")
            }
        }

        let llm = AlwaysFails;
        let prompts = PromptLoader::new();
        let config = test_config();
        let pipeline = Pipeline::new(&store, &llm, &prompts, &config);

        let stats = pipeline.process_user(user.id, Utc::now()).await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.scored, 0);

        let article = store.get_unread_articles(user.id, None, false, 50, 0).await.unwrap();
        let rs = store.get_read_state(user.id, article[0].id).await.unwrap();
        assert!(rs.is_none(), "no ReadState written so the article retries next cycle");
    }
}
