//! MongoDB-backed stores
//!
//! One client wrapper serving all three persistence seams. Connection uses
//! a short server-selection timeout and a ping so startup fails fast when
//! the database is unreachable. Timestamps are stored as BSON dates so
//! window counts can use native range queries.

use bson::{doc, DateTime as BsonDateTime};
use futures_util::StreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, Database, IndexModel,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::ratelimit::rule::{RateLimitRule, RuleTier};
use crate::trust::signal::{SignalMetadata, SignalType, TrustSignal};
use crate::types::{GateError, Identity, Result};

use super::{ActionLog, RuleStore, SignalStore};

const TRUST_SIGNALS: &str = "trust_signals";
const ACTION_LOG: &str = "action_log";
const PROMPT_RESPONSES: &str = "prompt_responses";
const RATE_LIMIT_RULES: &str = "rate_limit_rules";

// ====== Document schemas ======

#[derive(Debug, Serialize, Deserialize)]
struct SignalDoc {
    #[serde(rename = "_id")]
    id: String,
    subject: String,
    signal_type: SignalType,
    signal_value: f64,
    created_at: BsonDateTime,
    expires_at: Option<BsonDateTime>,
    metadata: SignalMetadata,
}

impl From<&TrustSignal> for SignalDoc {
    fn from(signal: &TrustSignal) -> Self {
        Self {
            id: signal.id.to_string(),
            subject: signal.subject.key(),
            signal_type: signal.signal_type,
            signal_value: signal.signal_value,
            created_at: BsonDateTime::from_chrono(signal.created_at),
            expires_at: signal.expires_at.map(BsonDateTime::from_chrono),
            metadata: signal.metadata.clone(),
        }
    }
}

impl TryFrom<SignalDoc> for TrustSignal {
    type Error = GateError;

    fn try_from(doc: SignalDoc) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&doc.id)
                .map_err(|e| GateError::Database(format!("Malformed signal id: {}", e)))?,
            subject: Identity::from_key(&doc.subject)?,
            signal_type: doc.signal_type,
            signal_value: doc.signal_value,
            created_at: doc.created_at.to_chrono(),
            expires_at: doc.expires_at.map(|at| at.to_chrono()),
            metadata: doc.metadata,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ActionDoc {
    identity: String,
    action_type: String,
    at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseDoc {
    /// `{identity_key}:{prompt_id}`; the unique _id is the dedupe guard
    #[serde(rename = "_id")]
    id: String,
    identity: String,
    prompt_id: String,
    at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct RuleDoc {
    #[serde(rename = "_id")]
    id: String,
    action_type: String,
    tier: RuleTier,
    time_window_secs: i64,
    max_actions: i64,
    block_duration_secs: i64,
    is_active: bool,
    priority: i32,
}

impl From<&RateLimitRule> for RuleDoc {
    fn from(rule: &RateLimitRule) -> Self {
        Self {
            id: rule.id.to_string(),
            action_type: rule.action_type.clone(),
            tier: rule.tier,
            time_window_secs: rule.time_window_secs as i64,
            max_actions: rule.max_actions as i64,
            block_duration_secs: rule.block_duration_secs as i64,
            is_active: rule.is_active,
            priority: rule.priority,
        }
    }
}

impl TryFrom<RuleDoc> for RateLimitRule {
    type Error = GateError;

    fn try_from(doc: RuleDoc) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&doc.id)
                .map_err(|e| GateError::Database(format!("Malformed rule id: {}", e)))?,
            action_type: doc.action_type,
            tier: doc.tier,
            time_window_secs: doc.time_window_secs.max(0) as u64,
            max_actions: doc.max_actions.max(0) as u64,
            block_duration_secs: doc.block_duration_secs.max(0) as u64,
            is_active: doc.is_active,
            priority: doc.priority,
        })
    }
}

// ====== Store ======

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

/// MongoDB implementation of all persistence seams
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect, verify with a ping, and ensure indexes
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // serverSelectionTimeoutMS keeps startup from hanging on an
        // unreachable database
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GateError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GateError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        let store = Self { db };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.signals()
            .create_index(
                IndexModel::builder().keys(doc! { "subject": 1 }).build(),
            )
            .await?;

        self.actions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "identity": 1, "action_type": 1, "at": -1 })
                    .build(),
            )
            .await?;

        // Old action records are only ever read through trailing windows;
        // let the database expire them after a week
        self.actions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "at": 1 })
                    .options(
                        IndexOptions::builder()
                            .expire_after(std::time::Duration::from_secs(7 * 24 * 3600))
                            .build(),
                    )
                    .build(),
            )
            .await?;

        self.rules()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "action_type": 1, "is_active": 1, "priority": -1 })
                    .build(),
            )
            .await?;

        Ok(())
    }

    fn signals(&self) -> Collection<SignalDoc> {
        self.db.collection(TRUST_SIGNALS)
    }

    fn actions(&self) -> Collection<ActionDoc> {
        self.db.collection(ACTION_LOG)
    }

    fn responses(&self) -> Collection<ResponseDoc> {
        self.db.collection(PROMPT_RESPONSES)
    }

    fn rules(&self) -> Collection<RuleDoc> {
        self.db.collection(RATE_LIMIT_RULES)
    }
}

#[async_trait]
impl SignalStore for MongoStore {
    async fn create_signal(&self, signal: TrustSignal) -> Result<()> {
        self.signals().insert_one(SignalDoc::from(&signal)).await?;
        Ok(())
    }

    async fn signals_for(&self, subject: &Identity) -> Result<Vec<TrustSignal>> {
        let cursor = self
            .signals()
            .find(doc! { "subject": subject.key() })
            .await?;

        let docs: Vec<SignalDoc> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading signal document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        docs.into_iter().map(TrustSignal::try_from).collect()
    }

    async fn claim_subject(&self, device: &Identity, user: &Identity) -> Result<u64> {
        let result = self
            .signals()
            .update_many(
                doc! { "subject": device.key() },
                doc! { "$set": { "subject": user.key() } },
            )
            .await?;
        Ok(result.modified_count)
    }
}

#[async_trait]
impl ActionLog for MongoStore {
    async fn record(&self, identity: &Identity, action_type: &str, at: DateTime<Utc>) -> Result<()> {
        self.actions()
            .insert_one(ActionDoc {
                identity: identity.key(),
                action_type: action_type.to_string(),
                at: BsonDateTime::from_chrono(at),
            })
            .await?;
        Ok(())
    }

    async fn count_in_window(
        &self,
        identity: &Identity,
        action_type: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64> {
        let count = self
            .actions()
            .count_documents(doc! {
                "identity": identity.key(),
                "action_type": action_type,
                "at": { "$gte": BsonDateTime::from_chrono(window_start) },
            })
            .await?;
        Ok(count)
    }

    async fn record_response(&self, identity: &Identity, prompt_id: &str) -> Result<()> {
        let result = self
            .responses()
            .insert_one(ResponseDoc {
                id: format!("{}:{}", identity.key(), prompt_id),
                identity: identity.key(),
                prompt_id: prompt_id.to_string(),
                at: BsonDateTime::now(),
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(GateError::Conflict(format!(
                "Identity already responded to prompt {}",
                prompt_id
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RuleStore for MongoStore {
    async fn create(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        let result = self.rules().insert_one(RuleDoc::from(&rule)).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(GateError::Conflict(format!("Rule {} already exists", rule.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, rule: RateLimitRule) -> Result<()> {
        rule.validate()?;
        let result = self
            .rules()
            .replace_one(doc! { "_id": rule.id.to_string() }, RuleDoc::from(&rule))
            .await?;
        if result.matched_count == 0 {
            return Err(GateError::NotFound(format!("Rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = self
            .rules()
            .delete_one(doc! { "_id": id.to_string() })
            .await?;
        if result.deleted_count == 0 {
            return Err(GateError::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    async fn list(&self, action_type: Option<&str>, active_only: bool) -> Result<Vec<RateLimitRule>> {
        let mut filter = doc! {};
        if let Some(action) = action_type {
            filter.insert("action_type", action);
        }
        if active_only {
            filter.insert("is_active", true);
        }

        let cursor = self
            .rules()
            .find(filter)
            .sort(doc! { "priority": -1 })
            .await?;

        let docs: Vec<RuleDoc> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading rule document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        docs.into_iter().map(RateLimitRule::try_from).collect()
    }

    async fn set_active_many(&self, ids: &[Uuid], active: bool) -> Result<u64> {
        let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let result = self
            .rules()
            .update_many(
                doc! { "_id": { "$in": id_strings }, "is_active": { "$ne": active } },
                doc! { "$set": { "is_active": active } },
            )
            .await?;
        Ok(result.modified_count)
    }
}
