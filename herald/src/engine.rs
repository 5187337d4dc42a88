//! The public façade (spec.md §4.8). Every external collaborator — CLI,
//! web UI, MCP server — talks to the Engine, never to the Store or LLM
//! directly, mirroring the teacher's `AppState`-centered design
//! (`server.rs`) where every Rocket route goes through one managed state
//! struct rather than touching the pool directly.

use std::sync::Arc;

use chrono::Utc;
use common::Config;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{HeraldError, Result};
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::llm::{LlmClient, OllamaClient};
use crate::pipeline::Pipeline;
use crate::poller::PollCycle;
use crate::prompt_loader::{PromptKind, PromptLoader};
use crate::ranking::{self, FilterAxis, FilterRule};
use crate::store::{
    Article, ArticleGroup, Feed, FilterRuleRow, GroupSummaryRow, NewArticle, Store, User,
};

const PREFERENCE_KEYS: &[&str] = &[
    "keywords",
    "interest_threshold",
    "filter_threshold",
    "notify_when",
    "notify_min_score",
];

const NOTIFY_WHEN_VALUES: &[&str] = &["present", "always", "queue"];

/// Summary stats for one feed, for the CLI/web UI `list`/`feeds` views.
#[derive(Debug, Clone)]
pub struct FeedStats {
    pub feed: Feed,
    pub article_count: i64,
}

/// One unread article as surfaced to a caller, carrying the per-user
/// AI summary overlay when one exists (spec.md §4.8 "get by id").
#[derive(Debug, Clone)]
pub struct ArticleView {
    pub article: Article,
    pub read: bool,
    pub starred: bool,
    pub interest_score: Option<f64>,
    pub security_score: Option<f64>,
    pub ai_summary: Option<String>,
}

/// A group as surfaced by `get_group`: members plus their scores and the
/// narrative summary, if one has been generated yet.
#[derive(Debug, Clone)]
pub struct GroupView {
    pub group: ArticleGroup,
    pub summary: Option<GroupSummaryRow>,
    pub member_tuples: Vec<(String, String, Option<f64>)>,
}

/// A ranked article (decayed effective score + boost), the Engine's output
/// for "list above interest threshold" (spec.md §4.8/§4.9).
#[derive(Debug, Clone)]
pub struct RankedArticleView {
    pub article: Article,
    pub raw_score: f64,
    pub effective_score: f64,
    pub boost: i64,
}

/// Prompt status as surfaced by `list_prompts`/`get_prompt` (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct PromptStatus {
    pub kind: PromptKind,
    pub template: String,
    pub temperature: f32,
    pub custom: bool,
}

/// Construction defaults (spec.md §4.8): Ollama base `http://localhost:11434`,
/// security model `gemma3:4b`, curation model `llama3`, interest threshold
/// 8.0, security threshold 7.0. Supplied via `Config`'s own `Default` impls
/// (`common::OllamaConfig`/`ThresholdsConfig`).
pub struct Engine {
    store: Store,
    fetcher: Option<Fetcher>,
    llm: Option<Arc<dyn LlmClient>>,
    prompts: PromptLoader,
    config: RwLock<Config>,
    read_only: bool,
}

impl Engine {
    /// Build an Engine against an already-open Store. In read-only mode,
    /// neither the Fetcher nor the LLM client is instantiated — every write
    /// operation fails with `Unavailable` ("not available in read-only
    /// mode"), mirroring the teacher's `LlmMode`-gated provider construction
    /// (`main.rs::create_llm_provider`), generalized to gate HTTP fetch too.
    pub fn new(store: Store, config: Config) -> Result<Self> {
        let read_only = config.read_only.enabled;

        let (fetcher, llm): (Option<Fetcher>, Option<Arc<dyn LlmClient>>) = if read_only {
            (None, None)
        } else {
            let fetcher = Fetcher::new().map_err(|e| {
                HeraldError::wrap(crate::error::ErrorKind::Internal, "failed to build fetcher", e)
            })?;
            let ollama = OllamaClient::new(&config.ollama.base_url, config.ollama.request_timeout_seconds)
                .map_err(|e| HeraldError::wrap(crate::error::ErrorKind::Internal, "failed to build llm client", e))?;
            let llm: Arc<dyn LlmClient> = Arc::new(ollama);
            (Some(fetcher), Some(llm))
        };

        Ok(Engine {
            store,
            fetcher,
            llm,
            prompts: PromptLoader::new(),
            config: RwLock::new(config),
            read_only,
        })
    }

    fn require_fetcher(&self) -> Result<&Fetcher> {
        self.fetcher
            .as_ref()
            .ok_or_else(|| HeraldError::unavailable("not available in read-only mode"))
    }

    fn require_llm(&self) -> Result<&Arc<dyn LlmClient>> {
        self.llm
            .as_ref()
            .ok_or_else(|| HeraldError::unavailable("not available in read-only mode"))
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    pub async fn register_user(&self, name: &str) -> Result<User> {
        if self.store.get_user_by_name(name).await?.is_some() {
            return Err(HeraldError::conflict(format!("user '{}' already exists", name)));
        }
        Ok(self.store.create_user(name).await?)
    }

    pub async fn resolve_user_by_name(&self, name: &str) -> Result<User> {
        self.store
            .get_user_by_name(name)
            .await?
            .ok_or_else(|| HeraldError::not_found(format!("user '{}' not found", name)))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.store.list_users().await?)
    }

    // ---------------------------------------------------------------
    // Feeds
    // ---------------------------------------------------------------

    /// Subscribe a user to a feed URL. Validates the feed by fetching it
    /// (a feed that doesn't parse is rejected up front rather than stored
    /// and silently failing every cycle thereafter), stores the initial
    /// items, persists conditional-GET validators, and clears any previous
    /// error on the feed.
    pub async fn subscribe_feed(&self, user_id: i64, url: &str) -> Result<Feed> {
        let fetcher = self.require_fetcher()?;

        let existing = self.store.get_feed_by_url(url).await?;
        let feed = match existing {
            Some(feed) => feed,
            None => {
                let result = fetcher
                    .fetch(url, None, None)
                    .await
                    .map_err(|e| HeraldError::wrap(crate::error::ErrorKind::Unavailable, "feed fetch failed", e))?;
                let title = result.feed_title.clone().unwrap_or_default();
                let description = result.feed_description.clone().unwrap_or_default();
                let feed = self.store.create_feed(url, &title, &description).await?;

                for item in &result.items {
                    self.store.add_article(feed.id, item).await?;
                }
                self.store
                    .record_fetch_success(feed.id, result.etag.as_deref(), result.last_modified.as_deref(), Utc::now())
                    .await?;
                feed
            }
        };

        self.store.add_subscription(user_id, feed.id).await?;
        self.store.get_feed(feed.id).await?.ok_or_else(|| HeraldError::internal("feed vanished after subscribe"))
    }

    /// Remove a subscription; deletes the Feed iff it is now orphaned
    /// (spec.md I3).
    pub async fn unsubscribe_feed(&self, user_id: i64, feed_id: i64) -> Result<()> {
        self.store.remove_subscription(user_id, feed_id).await?;
        self.store.delete_feed_if_orphaned(feed_id).await?;
        Ok(())
    }

    pub async fn rename_feed(&self, feed_id: i64, title: &str) -> Result<()> {
        Ok(self.store.rename_feed(feed_id, title).await?)
    }

    pub async fn list_feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        Ok(self.store.list_feeds_for_user(user_id).await?)
    }

    pub async fn feed_stats_for_user(&self, user_id: i64) -> Result<Vec<FeedStats>> {
        let feeds = self.store.list_feeds_for_user(user_id).await?;
        let mut stats = Vec::with_capacity(feeds.len());
        for feed in feeds {
            let article_count = self.store.feed_article_count(feed.id).await?;
            stats.push(FeedStats { feed, article_count });
        }
        Ok(stats)
    }

    // ---------------------------------------------------------------
    // Feed metadata (spec.md §4.8, filter-rule UX)
    // ---------------------------------------------------------------

    pub async fn feed_authors(&self, feed_id: i64) -> Result<Vec<String>> {
        Ok(self.store.feed_authors(feed_id).await?)
    }

    pub async fn feed_categories(&self, feed_id: i64) -> Result<Vec<String>> {
        Ok(self.store.feed_categories(feed_id).await?)
    }

    // ---------------------------------------------------------------
    // Articles
    // ---------------------------------------------------------------

    pub async fn list_unread(
        &self,
        user_id: i64,
        feed_id: Option<i64>,
        starred_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>> {
        Ok(self
            .store
            .get_unread_articles(user_id, feed_id, starred_only, limit, offset)
            .await?)
    }

    pub async fn get_article(&self, user_id: i64, article_id: i64) -> Result<ArticleView> {
        let article = self
            .store
            .get_article(article_id)
            .await?
            .ok_or_else(|| HeraldError::not_found(format!("article {} not found", article_id)))?;
        let read_state = self.store.get_read_state(user_id, article_id).await?;
        let summary = self.store.get_article_summary(user_id, article_id).await?;

        Ok(ArticleView {
            article,
            read: read_state.as_ref().map(|r| r.read).unwrap_or(false),
            starred: read_state.as_ref().map(|r| r.starred).unwrap_or(false),
            interest_score: read_state.as_ref().and_then(|r| r.interest_score),
            security_score: read_state.as_ref().and_then(|r| r.security_score),
            ai_summary: summary.map(|s| s.ai_summary),
        })
    }

    pub async fn mark_read(&self, user_id: i64, article_id: i64, read: bool) -> Result<()> {
        Ok(self.store.set_read(user_id, article_id, read, Utc::now()).await?)
    }

    pub async fn set_starred(&self, user_id: i64, article_id: i64, starred: bool) -> Result<()> {
        Ok(self.store.set_starred(user_id, article_id, starred).await?)
    }

    /// List unread articles above the interest threshold, decay-ranked and
    /// filter-boosted (spec.md §4.9). `limit`/`offset` page the final
    /// decay-sorted list, the same way spec.md §4.1's
    /// `GetArticlesByInterestScore(user, threshold, limit, offset, filter_threshold?)`
    /// names them — paging happens here rather than in SQL since the
    /// decayed score and filter boost are both computed in Rust.
    pub async fn list_by_interest_score(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<RankedArticleView>> {
        let threshold = self.effective_interest_threshold(user_id).await?;
        let candidates = self.store.candidate_articles_by_interest_score(user_id, threshold).await?;

        let rules = self.store.list_filter_rules(user_id, None).await?;
        let filter_rules: Vec<FilterRule> = rules.iter().map(row_to_filter_rule).collect();
        let filter_threshold = self.filter_threshold(user_id).await?;

        let now = Utc::now();
        let mut ranked = Vec::with_capacity(candidates.len());
        for (article, raw_score) in candidates {
            let authors = self.store.get_article_authors(article.id).await?;
            let categories = self.store.get_article_categories(article.id).await?;
            let boost = ranking::filter_boost(&filter_rules, article.feed_id, &authors, &categories, &[]);

            if let Some(threshold) = filter_threshold {
                if boost < threshold {
                    continue;
                }
            }

            let published_at = article.published_at.unwrap_or(article.fetched_at);
            let age = ranking::age_days(published_at, now);
            let effective_score = ranking::decay(raw_score, age) + boost as f64;

            ranked.push(RankedArticleView {
                article,
                raw_score,
                effective_score,
                boost,
            });
        }

        ranked.sort_by(|a, b| b.effective_score.partial_cmp(&a.effective_score).unwrap_or(std::cmp::Ordering::Equal));

        let start = offset.max(0) as usize;
        let end = if limit < 0 {
            ranked.len()
        } else {
            start.saturating_add(limit as usize).min(ranked.len())
        };
        if start >= ranked.len() {
            return Ok(Vec::new());
        }
        Ok(ranked[start..end].to_vec())
    }

    async fn effective_interest_threshold(&self, user_id: i64) -> Result<f64> {
        let prefs = self.store.get_all_preferences(user_id).await?;
        if let Some(p) = prefs.iter().find(|p| p.key == "interest_threshold") {
            if let Ok(v) = p.value.parse::<f64>() {
                return Ok(v);
            }
        }
        Ok(self.config.read().await.thresholds.interest_threshold)
    }

    async fn filter_threshold(&self, user_id: i64) -> Result<Option<i64>> {
        let prefs = self.store.get_all_preferences(user_id).await?;
        Ok(prefs
            .iter()
            .find(|p| p.key == "filter_threshold")
            .and_then(|p| p.value.parse::<i64>().ok()))
    }

    // ---------------------------------------------------------------
    // Pipeline operations
    // ---------------------------------------------------------------

    /// Fetch every subscribed, enabled feed once. Per-feed errors are
    /// recorded against the feed and do not abort the pass (spec.md §7).
    pub async fn fetch_all_feeds(&self) -> Result<(usize, usize, usize)> {
        let fetcher = self.require_fetcher()?;
        let feeds = self.store.list_all_subscribed_feeds().await?;

        let mut fetched = 0usize;
        let mut failed = 0usize;
        let mut new_articles = 0usize;

        for feed in feeds {
            match fetcher.fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref()).await {
                Ok(result) => {
                    let now = Utc::now();
                    match result.outcome {
                        Some(FetchOutcome::NotModified) => {
                            self.store.record_fetch_not_modified(feed.id, now).await?;
                        }
                        Some(FetchOutcome::Fetched) | None => {
                            for item in &result.items {
                                if self.store.add_article(feed.id, item).await?.created {
                                    new_articles += 1;
                                }
                            }
                            self.store
                                .record_fetch_success(feed.id, result.etag.as_deref(), result.last_modified.as_deref(), now)
                                .await?;
                        }
                    }
                    fetched += 1;
                }
                Err(e) => {
                    warn!(feed_id = feed.id, url = %feed.url, error = %e, "engine: feed fetch failed, recording error and continuing");
                    self.store.record_fetch_error(feed.id, &e.to_string()).await?;
                    failed += 1;
                }
            }
        }

        info!(fetched, failed, new_articles, "engine: fetch-all-feeds complete");
        Ok((fetched, failed, new_articles))
    }

    /// Run the Pipeline for one user.
    pub async fn process_new_articles(&self, user_id: i64) -> Result<crate::pipeline::PipelineStats> {
        let llm = self.require_llm()?;
        let config = self.config.read().await;
        let pipeline = Pipeline::new(&self.store, llm.as_ref(), &self.prompts, &config);
        Ok(pipeline.process_user(user_id, Utc::now()).await?)
    }

    /// Run the Pipeline for every user with at least one subscription.
    pub async fn process_all_users(&self) -> Result<usize> {
        let user_ids = self.store.users_with_subscriptions().await?;
        let mut processed = 0usize;
        for user_id in user_ids {
            if let Err(e) = self.process_new_articles(user_id).await {
                warn!(user_id, error = %e, "engine: pipeline failed for this user, continuing with next");
                continue;
            }
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn pending_counts(&self, user_id: i64) -> Result<(i64, i64)> {
        let unscored = self.store.pending_unscored_count(user_id).await?;
        let unsummarized = self.store.pending_unsummarized_count(user_id).await?;
        Ok((unscored, unsummarized))
    }

    /// Markdown briefing of decayed-ranked unread articles above the
    /// interest threshold, with their per-user AI summaries (spec.md §4.8).
    /// Grounded on the teacher's `press_review::generate_press_review`
    /// shape (query-then-render), substituting decayed-score ranking for
    /// the teacher's `last_login`-windowed recency query. Returns an empty
    /// string when nothing qualifies, matching spec.md §7's "empty brief"
    /// contract (an MCP-level wrapper is free to turn that into a
    /// "nothing to brief" message).
    pub async fn generate_briefing(&self, user_id: i64) -> Result<String> {
        let ranked = self.list_by_interest_score(user_id, -1, 0).await?;
        if ranked.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::from("# Briefing\n\n");
        for item in ranked {
            let summary = self
                .store
                .get_article_summary(user_id, item.article.id)
                .await?
                .map(|s| s.ai_summary)
                .unwrap_or_default();

            out.push_str(&format!(
                "## {}\n\n{}\n\n*score: {:.2} (raw {:.1}, boost {})*\n\n",
                item.article.title, summary, item.effective_score, item.raw_score, item.boost
            ));
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Preferences
    // ---------------------------------------------------------------

    pub async fn get_all_preferences(&self, user_id: i64) -> Result<Vec<(String, String)>> {
        let rows = self.store.get_all_preferences(user_id).await?;
        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }

    /// Validate then set a whitelisted preference. `keywords` and
    /// `interest_threshold` affect scoring, so mutating them also updates
    /// the Engine's in-memory config overlay under the write lock
    /// (spec.md §4.8/§5); the other keys are DB-only and read fresh each
    /// time they're consulted, so no overlay update is needed for them.
    pub async fn set_preference(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        if !PREFERENCE_KEYS.contains(&key) {
            return Err(HeraldError::validation(format!("unknown preference key '{}'", key)));
        }

        match key {
            "interest_threshold" | "notify_min_score" => {
                value
                    .parse::<f64>()
                    .map_err(|_| HeraldError::validation(format!("'{}' must be a number", key)))?;
            }
            "filter_threshold" => {
                value
                    .parse::<i64>()
                    .map_err(|_| HeraldError::validation(format!("'{}' must be an integer", key)))?;
            }
            "notify_when" => {
                if !NOTIFY_WHEN_VALUES.contains(&value) {
                    return Err(HeraldError::validation(format!(
                        "'notify_when' must be one of {:?}",
                        NOTIFY_WHEN_VALUES
                    )));
                }
            }
            _ => {}
        }

        self.store.set_preference(user_id, key, value).await?;

        if key == "interest_threshold" {
            if let Ok(parsed) = value.parse::<f64>() {
                let mut config = self.config.write().await;
                config.thresholds.interest_threshold = parsed;
            }
        }

        Ok(())
    }

    // ---------------------------------------------------------------
    // Prompts (security is never reachable through any of these)
    // ---------------------------------------------------------------

    fn require_configurable(kind_str: &str) -> Result<PromptKind> {
        let kind = PromptKind::from_str(kind_str)
            .ok_or_else(|| HeraldError::validation(format!("unknown prompt type '{}'", kind_str)))?;
        if !kind.is_configurable() {
            return Err(HeraldError::permission("the security prompt cannot be read, written, or reset"));
        }
        Ok(kind)
    }

    pub async fn list_prompts(&self, user_id: i64) -> Result<Vec<PromptStatus>> {
        let kinds = [
            PromptKind::Curation,
            PromptKind::Summarization,
            PromptKind::GroupSummary,
            PromptKind::RelatedGroups,
        ];
        let mut out = Vec::with_capacity(kinds.len());
        for kind in kinds {
            out.push(self.get_prompt_status(user_id, kind).await?);
        }
        Ok(out)
    }

    pub async fn get_prompt(&self, user_id: i64, kind_str: &str) -> Result<PromptStatus> {
        let kind = Self::require_configurable(kind_str)?;
        self.get_prompt_status(user_id, kind).await
    }

    async fn get_prompt_status(&self, user_id: i64, kind: PromptKind) -> Result<PromptStatus> {
        let custom_row = self.store.get_user_prompt(user_id, kind.as_str()).await?;
        let custom = custom_row.is_some();
        let config = self.config.read().await;
        let resolved = self.prompts.resolve(&self.store, &config, user_id, kind).await?;
        Ok(PromptStatus {
            kind,
            template: resolved.template,
            temperature: resolved.temperature,
            custom,
        })
    }

    pub async fn set_prompt(
        &self,
        user_id: i64,
        kind_str: &str,
        template: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<()> {
        let kind = Self::require_configurable(kind_str)?;

        let final_template = match template {
            Some(t) => t.to_string(),
            None => {
                let current = self.get_prompt_status(user_id, kind).await?;
                current.template
            }
        };

        self.store
            .set_user_prompt(user_id, kind.as_str(), &final_template, temperature)
            .await?;
        self.prompts.invalidate(user_id, kind);
        Ok(())
    }

    pub async fn reset_prompt(&self, user_id: i64, kind_str: &str) -> Result<()> {
        let kind = Self::require_configurable(kind_str)?;
        self.store.reset_user_prompt(user_id, kind.as_str()).await?;
        self.prompts.invalidate(user_id, kind);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Filter rules
    // ---------------------------------------------------------------

    pub async fn list_filter_rules(&self, user_id: i64, feed_id: Option<i64>) -> Result<Vec<FilterRuleRow>> {
        Ok(self.store.list_filter_rules(user_id, feed_id).await?)
    }

    pub async fn add_filter_rule(
        &self,
        user_id: i64,
        feed_id: Option<i64>,
        axis: &str,
        value: &str,
        score: i64,
    ) -> Result<FilterRuleRow> {
        if !matches!(axis, "author" | "category" | "tag") {
            return Err(HeraldError::validation("axis must be one of author, category, tag"));
        }
        if value.is_empty() {
            return Err(HeraldError::validation("filter rule value must not be empty"));
        }
        Ok(self.store.add_filter_rule(user_id, feed_id, axis, value, score).await?)
    }

    pub async fn update_filter_rule_score(&self, rule_id: i64, score: i64) -> Result<()> {
        Ok(self.store.update_filter_rule_score(rule_id, score).await?)
    }

    pub async fn delete_filter_rule(&self, rule_id: i64) -> Result<()> {
        Ok(self.store.delete_filter_rule(rule_id).await?)
    }

    // ---------------------------------------------------------------
    // Groups
    // ---------------------------------------------------------------

    pub async fn list_groups_for_user(&self, user_id: i64) -> Result<Vec<(ArticleGroup, Option<GroupSummaryRow>)>> {
        let groups = self.store.list_user_groups(user_id).await?;
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let summary = self.store.get_group_summary(group.id).await?;
            out.push((group, summary));
        }
        Ok(out)
    }

    pub async fn get_group(&self, user_id: i64, group_id: i64) -> Result<GroupView> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| HeraldError::not_found(format!("group {} not found", group_id)))?;
        let summary = self.store.get_group_summary(group_id).await?;
        let member_tuples = self.store.group_member_tuples(group_id, user_id).await?;
        Ok(GroupView {
            group,
            summary,
            member_tuples,
        })
    }
}

fn row_to_filter_rule(row: &FilterRuleRow) -> FilterRule {
    let axis = match row.axis.as_str() {
        "author" => FilterAxis::Author,
        "category" => FilterAxis::Category,
        _ => FilterAxis::Tag,
    };
    FilterRule {
        axis,
        value: row.value.clone(),
        score: row.score,
        feed_id: row.feed_id,
    }
}

/// Adapter so `Engine` can drive `poller::Poller` without the Poller
/// needing to know about LLM/Fetcher wiring (spec.md §4.7).
#[async_trait::async_trait]
impl PollCycle for Engine {
    async fn fetch_all_feeds(&self) -> anyhow::Result<(usize, usize, usize)> {
        Ok(Engine::fetch_all_feeds(self).await?)
    }

    async fn process_all_users(&self) -> anyhow::Result<usize> {
        Ok(Engine::process_all_users(self).await?)
    }
}

/// Construct an Engine from a config's database path, bootstrapping the
/// pool and schema (spec.md §6 "database path is a constructor argument").
pub async fn open(config: Config) -> Result<Engine> {
    let pool = common::init_db_pool(&config.database.path)
        .await
        .map_err(|e| HeraldError::wrap(crate::error::ErrorKind::Unavailable, "failed to open database", e))?;
    let store = Store::open(pool)
        .await
        .map_err(|e| HeraldError::wrap(crate::error::ErrorKind::Internal, "failed to initialize schema", e))?;
    Engine::new(store, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        toml::from_str(
            r#"
            [database]
            path = ":memory:"
            [read_only]
            enabled = true
            "#,
        )
        .unwrap()
    }

    async fn test_engine() -> Engine {
        let pool = common::init_db_pool(":memory:").await.unwrap();
        let store = Store::open(pool).await.unwrap();
        Engine::new(store, test_config()).unwrap()
    }

    #[tokio::test]
    async fn register_user_rejects_duplicate_name() {
        let engine = test_engine().await;
        engine.register_user("alice").await.unwrap();
        let err = engine.register_user("alice").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn read_only_engine_rejects_feed_subscription() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let err = engine.subscribe_feed(user.id, "https://x/feed").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn preference_set_rejects_unknown_key() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let err = engine.set_preference(user.id, "favorite_color", "blue").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn preference_set_updates_interest_threshold_overlay() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        engine.set_preference(user.id, "interest_threshold", "6.5").await.unwrap();
        let threshold = engine.effective_interest_threshold(user.id).await.unwrap();
        assert_eq!(threshold, 6.5);
    }

    #[tokio::test]
    async fn scenario_6_security_prompt_always_rejected() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();

        assert_eq!(
            engine.get_prompt(user.id, "security").await.unwrap_err().kind,
            crate::error::ErrorKind::Permission
        );
        assert_eq!(
            engine.set_prompt(user.id, "security", Some("x"), None).await.unwrap_err().kind,
            crate::error::ErrorKind::Permission
        );
        assert_eq!(
            engine.reset_prompt(user.id, "security").await.unwrap_err().kind,
            crate::error::ErrorKind::Permission
        );
    }

    #[tokio::test]
    async fn scenario_6_curation_prompt_set_and_get_roundtrips() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();

        engine.set_prompt(user.id, "curation", Some("X"), Some(0.4)).await.unwrap();
        let status = engine.get_prompt(user.id, "curation").await.unwrap();
        assert_eq!(status.template, "X");
        assert_eq!(status.temperature, 0.4);
        assert!(status.custom);
    }

    #[tokio::test]
    async fn add_filter_rule_validates_axis() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let err = engine.add_filter_rule(user.id, None, "publisher", "Alice", 5).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn generate_briefing_is_empty_when_nothing_qualifies() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let brief = engine.generate_briefing(user.id).await.unwrap();
        assert!(brief.is_empty());
    }

    #[tokio::test]
    async fn list_by_interest_score_honors_limit_and_offset() {
        let engine = test_engine().await;
        let user = engine.register_user("alice").await.unwrap();
        let feed = engine.store.create_feed("https://x/feed", "F", "").await.unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let outcome = engine
                .store
                .add_article(
                    feed.id,
                    &NewArticle {
                        guid: format!("g{i}"),
                        title: format!("t{i}"),
                        url: format!("https://x/{i}"),
                        published_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            engine
                .store
                .upsert_read_state(user.id, outcome.article_id, false, Some(9.0), Some(2.0), Utc::now())
                .await
                .unwrap();
            ids.push(outcome.article_id);
        }

        let all = engine.list_by_interest_score(user.id, -1, 0).await.unwrap();
        assert_eq!(all.len(), 3);

        let page = engine.list_by_interest_score(user.id, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].article.id, all[1].article.id);

        let past_end = engine.list_by_interest_score(user.id, 10, 3).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn scenario_5_orphan_cleanup_via_engine() {
        let engine = test_engine().await;
        // unsubscribe_feed still works in read-only mode since it doesn't fetch.
        let u1 = engine.register_user("u1").await.unwrap();
        let u2 = engine.register_user("u2").await.unwrap();
        let feed = engine.store.create_feed("https://x/feed", "F", "").await.unwrap();
        engine.store.add_subscription(u1.id, feed.id).await.unwrap();
        engine.store.add_subscription(u2.id, feed.id).await.unwrap();
        engine
            .store
            .add_article(
                feed.id,
                &NewArticle {
                    guid: "g".to_string(),
                    title: "T".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        engine.unsubscribe_feed(u1.id, feed.id).await.unwrap();
        assert!(engine.store.get_feed(feed.id).await.unwrap().is_some());

        engine.unsubscribe_feed(u2.id, feed.id).await.unwrap();
        assert!(engine.store.get_feed(feed.id).await.unwrap().is_none());
    }
}
