//! Shared test doubles: an in-memory Grafana, an in-memory secret store and a
//! manually driven clock.

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use grafana_token_manager::clock::Clock;
use grafana_token_manager::model::{SecretValue, ServiceAccount, Token};
use grafana_token_manager::provider::{CreatedToken, GrafanaAccountApi, SecretStore};
use grafana_token_manager::reconciler::{PrunePolicy, SecretNames, TokenReconciler};

static RUSTLS_INIT: Once = Once::new();

/// Install the rustls crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

pub const SA: &str = "grafana-prod-automation";
pub const VALUE_SECRET: &str = "grafana-sa-token";
pub const NAME_SECRET: &str = "grafana-sa-token-name";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time only moves when a test (or a backoff sleep) moves it
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Grafana
// ---------------------------------------------------------------------------

/// A mutating call observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateAccount(String),
    UpdateRole(String),
    CreateToken(String),
    DeleteToken(String),
}

#[derive(Default)]
struct GrafanaState {
    accounts: Vec<ServiceAccount>,
    tokens: HashMap<String, Vec<Token>>,
    next_id: u64,
    mutations: Vec<Mutation>,
    /// Deleting these fails
    failing_deletes: HashSet<String>,
    /// Deleting these reports success but they stay listed
    stubborn: HashSet<String>,
    omit_secret: bool,
    list_calls: usize,
    /// 1-based `list_tokens` calls that fail
    failing_lists: HashSet<usize>,
}

pub struct FakeGrafana {
    clock: Arc<ManualClock>,
    state: Mutex<GrafanaState>,
}

impl FakeGrafana {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(GrafanaState::default()),
        }
    }

    pub fn seed_account(&self, name: &str, role: &str) -> ServiceAccount {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let account = ServiceAccount {
            id: state.next_id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
        };
        state.accounts.push(account.clone());
        state.tokens.insert(account.id.clone(), Vec::new());
        account
    }

    pub fn seed_token(
        &self,
        account: &ServiceAccount,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
        revoked: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let token = Token {
            id: state.next_id.to_string(),
            name: name.to_string(),
            expires_at,
            revoked,
        };
        state
            .tokens
            .entry(account.id.clone())
            .or_default()
            .push(token);
    }

    pub fn fail_delete_of(&self, token_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(token_name.to_string());
    }

    pub fn make_stubborn(&self, token_name: &str) {
        self.state
            .lock()
            .unwrap()
            .stubborn
            .insert(token_name.to_string());
    }

    /// Make the `call`-th `list_tokens` call (1-based) fail
    pub fn fail_list_call(&self, call: usize) {
        self.state.lock().unwrap().failing_lists.insert(call);
    }

    pub fn omit_secret_on_create(&self) {
        self.state.lock().unwrap().omit_secret = true;
    }

    pub fn account(&self, name: &str) -> Option<ServiceAccount> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .iter()
            .find(|a| a.name == name)
            .cloned()
    }

    pub fn token_names(&self, account_name: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some(account) = state.accounts.iter().find(|a| a.name == account_name) else {
            return Vec::new();
        };
        state
            .tokens
            .get(&account.id)
            .map(|tokens| tokens.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn active_token_names(&self, account_name: &str) -> Vec<String> {
        let now = self.clock.now();
        let state = self.state.lock().unwrap();
        let Some(account) = state.accounts.iter().find(|a| a.name == account_name) else {
            return Vec::new();
        };
        state
            .tokens
            .get(&account.id)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|t| t.is_active(now))
                    .map(|t| t.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn created_tokens(&self) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter_map(|m| match m {
                Mutation::CreateToken(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_tokens(&self) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter_map(|m| match m {
                Mutation::DeleteToken(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GrafanaAccountApi for FakeGrafana {
    async fn find_service_account(&self, name: &str) -> Result<Option<ServiceAccount>> {
        Ok(self.account(name))
    }

    async fn create_service_account(&self, name: &str, role: &str) -> Result<ServiceAccount> {
        self.state
            .lock()
            .unwrap()
            .mutations
            .push(Mutation::CreateAccount(name.to_string()));
        Ok(self.seed_account(name, role))
    }

    async fn update_service_account_role(&self, account: &ServiceAccount, role: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .mutations
            .push(Mutation::UpdateRole(role.to_string()));
        if let Some(existing) = state.accounts.iter_mut().find(|a| a.id == account.id) {
            existing.role = role.to_string();
        }
        Ok(())
    }

    async fn list_tokens(&self, account: &ServiceAccount) -> Result<Vec<Token>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.failing_lists.contains(&state.list_calls) {
            return Err(anyhow!("503 Service Unavailable listing tokens"));
        }
        Ok(state
            .tokens
            .get(&account.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_token(
        &self,
        account: &ServiceAccount,
        name: &str,
        ttl: Duration,
    ) -> Result<CreatedToken> {
        let expires_at = self.clock.now() + chrono::Duration::from_std(ttl)?;
        let mut state = self.state.lock().unwrap();
        state
            .mutations
            .push(Mutation::CreateToken(name.to_string()));
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .tokens
            .entry(account.id.clone())
            .or_default()
            .push(Token {
                id: id.clone(),
                name: name.to_string(),
                expires_at: Some(expires_at),
                revoked: false,
            });
        let secret = if state.omit_secret {
            None
        } else {
            Some(SecretValue::new(format!("glsa_{name}")))
        };
        Ok(CreatedToken {
            id,
            name: name.to_string(),
            secret,
        })
    }

    async fn delete_token(&self, account: &ServiceAccount, token: &Token) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(&token.name) {
            return Err(anyhow!("500 Internal Server Error deleting {}", token.name));
        }
        state
            .mutations
            .push(Mutation::DeleteToken(token.name.clone()));
        if state.stubborn.contains(&token.name) {
            return Ok(());
        }
        if let Some(tokens) = state.tokens.get_mut(&account.id) {
            tokens.retain(|t| t.id != token.id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Secret store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, bool)>>,
    fail_writes: Mutex<bool>,
    failing_names: Mutex<HashSet<String>>,
}

impl MemorySecretStore {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut secrets = store.secrets.lock().unwrap();
            for (k, v) in entries {
                secrets.insert((*k).to_string(), (*v).to_string());
            }
        }
        store
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(name).cloned()
    }

    /// (secret name, sensitive) of every write that changed something
    pub fn writes(&self) -> Vec<(String, bool)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }

    /// Fail writes to one secret only
    pub fn fail_writes_of(&self, secret_name: &str) {
        self.failing_names
            .lock()
            .unwrap()
            .insert(secret_name.to_string());
    }

    pub fn heal(&self) {
        *self.fail_writes.lock().unwrap() = false;
        self.failing_names.lock().unwrap().clear();
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, secret_name: &str) -> Result<Option<String>> {
        Ok(self.get(secret_name))
    }

    async fn set_secret(&self, secret_name: &str, secret_value: &str, sensitive: bool) -> Result<bool> {
        if *self.fail_writes.lock().unwrap()
            || self.failing_names.lock().unwrap().contains(secret_name)
        {
            return Err(anyhow!("403 Forbidden writing {secret_name}"));
        }
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.get(secret_name).map(String::as_str) == Some(secret_value) {
            return Ok(false);
        }
        secrets.insert(secret_name.to_string(), secret_value.to_string());
        self.writes
            .lock()
            .unwrap()
            .push((secret_name.to_string(), sensitive));
        Ok(true)
    }
}

/// `Write` sink shared between a store under test and its assertions
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub grafana: Arc<FakeGrafana>,
    pub store: Arc<MemorySecretStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemorySecretStore::default())
    }

    pub fn with_store(store: MemorySecretStore) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        Self {
            grafana: Arc::new(FakeGrafana::new(Arc::clone(&clock))),
            clock,
            store: Arc::new(store),
        }
    }

    pub fn reconciler(&self) -> TokenReconciler {
        self.reconciler_with(PrunePolicy::default())
    }

    pub fn reconciler_with(&self, policy: PrunePolicy) -> TokenReconciler {
        TokenReconciler::new(
            Arc::clone(&self.grafana) as Arc<dyn GrafanaAccountApi>,
            Arc::clone(&self.store) as Arc<dyn SecretStore>,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
        )
        .with_secret_names(SecretNames {
            value: VALUE_SECRET.to_string(),
            name: NAME_SECRET.to_string(),
        })
        .with_prune_policy(policy)
    }

    pub fn in_days(&self, days: i64) -> Option<DateTime<Utc>> {
        Some(self.clock.now() + chrono::Duration::days(days))
    }
}
