//! pay-config
//!
//! Layered YAML configuration for the payment service.
//!
//! Later documents override earlier ones (deep merge). The effective config is
//! canonicalized and hashed so deployments can be compared by `config_hash`.
//! Secret material (gateway bearer token, DB URL) is **never** read from the
//! config files — files name the env var that carries the secret, and a guard
//! aborts loading if a literal secret-looking value is found in any leaf.

use anyhow::{bail, Context, Result};
use pay_currency::{Currency, CurrencyTable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;

/// Known secret-like prefixes. If any leaf string value in the effective
/// config starts with one of these, loading aborts with CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // Stripe / OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "Bearer ",    // pasted Authorization header values
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "postgres://",
    "postgresql://",
];

/// Default env var for the CardServ bearer token when the config does not
/// name one explicitly.
pub const DEFAULT_BEARER_TOKEN_ENV: &str = "PAY_CARDSERV_BEARER_TOKEN";

// ---------------------------------------------------------------------------
// Loading + hashing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    // Merge YAML docs in order: earlier docs are base, later docs override.
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).context("canonical json serialize failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Secret-literal guard
// ---------------------------------------------------------------------------

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(val) = v.pointer(&ptr) {
            if let Some(s) = val.as_str() {
                if looks_like_secret(s) {
                    bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
                }
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

// ---------------------------------------------------------------------------
// Typed extraction
// ---------------------------------------------------------------------------

/// CardServ connection settings. Constructed here and injected into the
/// gateway client — no call site reads env-keyed globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider base URL, no trailing slash.
    pub base_url: String,
    /// Path segment identifying the API requestor.
    pub requestor_id: String,
    /// Merchant account identifier sent in every sale order.
    pub merchant_id: String,
    /// Bearer token, resolved from env at load time. Never logged.
    pub bearer_token: String,
    /// Where the provider redirects the shopper after 3-D-Secure.
    pub result_url: String,
    /// Where the provider delivers asynchronous callbacks.
    pub webhook_url: String,
}

/// Capped-exponential wait parameters for the synchronous redirect wait loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedirectWaitSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_total_wait_ms: u64,
}

impl Default for RedirectWaitSettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_total_wait_ms: 8_000,
        }
    }
}

/// The fully-typed effective configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub currencies: CurrencyTable,
    pub redirect_wait: RedirectWaitSettings,
    /// Interval between background status sweeps.
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    /// Extract the typed config from a loaded document tree.
    ///
    /// The bearer token is read from the env var named at
    /// `/gateway/bearer_token_env` (default [`DEFAULT_BEARER_TOKEN_ENV`]).
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let v = &loaded.config_json;

        let gateway = GatewayConfig {
            base_url: require_str(v, "/gateway/base_url")?
                .trim_end_matches('/')
                .to_string(),
            requestor_id: require_str(v, "/gateway/requestor_id")?.to_string(),
            merchant_id: require_str(v, "/gateway/merchant_id")?.to_string(),
            bearer_token: resolve_bearer_token(v)?,
            result_url: require_str(v, "/gateway/result_url")?.to_string(),
            webhook_url: require_str(v, "/gateway/webhook_url")?.to_string(),
        };

        let currencies = parse_currency_table(v)?;

        let redirect_wait = match v.pointer("/redirect_wait") {
            Some(rw) => RedirectWaitSettings {
                max_attempts: opt_u64(rw, "/max_attempts")
                    .unwrap_or(RedirectWaitSettings::default().max_attempts as u64)
                    as u32,
                initial_delay_ms: opt_u64(rw, "/initial_delay_ms")
                    .unwrap_or(RedirectWaitSettings::default().initial_delay_ms),
                max_total_wait_ms: opt_u64(rw, "/max_total_wait_ms")
                    .unwrap_or(RedirectWaitSettings::default().max_total_wait_ms),
            },
            None => RedirectWaitSettings::default(),
        };

        let sweep_interval_secs = opt_u64(v, "/sweep/interval_secs").unwrap_or(60);

        Ok(Self {
            gateway,
            currencies,
            redirect_wait,
            sweep_interval_secs,
        })
    }
}

fn resolve_bearer_token(v: &Value) -> Result<String> {
    let env_name = v
        .pointer("/gateway/bearer_token_env")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_BEARER_TOKEN_ENV);
    std::env::var(env_name).with_context(|| format!("missing env var {env_name}"))
}

fn parse_currency_table(v: &Value) -> Result<CurrencyTable> {
    let Some(section) = v.pointer("/currencies") else {
        // No section configured: use the built-in production table.
        return Ok(CurrencyTable::default());
    };

    let base_code = section
        .pointer("/base")
        .and_then(Value::as_str)
        .unwrap_or("GBP");
    let base = Currency::parse(base_code)
        .map_err(|e| anyhow::anyhow!("config /currencies/base: {e}"))?;

    let mut rates: BTreeMap<Currency, f64> = BTreeMap::new();
    let rate_map = section
        .pointer("/rates")
        .and_then(Value::as_object)
        .context("config /currencies/rates must be a map")?;
    for (code, rate) in rate_map {
        let c = Currency::parse(code)
            .map_err(|e| anyhow::anyhow!("config /currencies/rates: {e}"))?;
        let r = rate
            .as_f64()
            .with_context(|| format!("config /currencies/rates/{code} must be numeric"))?;
        if r <= 0.0 {
            bail!("config /currencies/rates/{code} must be positive, got {r}");
        }
        rates.insert(c, r);
    }
    if rates.get(&base) != Some(&1.0) {
        bail!("config /currencies/rates must include the base currency at 1.0");
    }

    let tokens_per_base = section
        .pointer("/tokens_per_base")
        .and_then(Value::as_i64)
        .unwrap_or(100);
    if tokens_per_base <= 0 {
        bail!("config /currencies/tokens_per_base must be positive");
    }

    Ok(CurrencyTable {
        base,
        rates,
        tokens_per_base,
    })
}

fn require_str<'a>(v: &'a Value, pointer: &str) -> Result<&'a str> {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .with_context(|| format!("missing config key {pointer}"))
}

fn opt_u64(v: &Value, pointer: &str) -> Option<u64> {
    v.pointer(pointer).and_then(Value::as_u64)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Each test names its own bearer env var so parallel tests never race on
    // shared process env state.
    fn base_yaml(bearer_env: &str) -> String {
        format!(
            r#"
gateway:
  base_url: "https://test.cardserv.io/"
  requestor_id: "req-123"
  merchant_id: "merch-9"
  bearer_token_env: "{bearer_env}"
  result_url: "https://shop.example/success"
  webhook_url: "https://shop.example/api/webhook"
currencies:
  base: GBP
  rates:
    GBP: 1.0
    EUR: 1.15
    USD: 1.33
  tokens_per_base: 100
sweep:
  interval_secs: 30
"#
        )
    }

    #[test]
    fn later_docs_override_earlier() {
        std::env::set_var("PAY_TEST_BEARER_LAYER", "tok-abc-123");
        let base = base_yaml("PAY_TEST_BEARER_LAYER");
        let over = "sweep:\n  interval_secs: 5\n";
        let loaded = load_layered_yaml_from_strings(&[&base, over]).unwrap();
        let cfg = AppConfig::from_loaded(&loaded).unwrap();
        assert_eq!(cfg.sweep_interval_secs, 5);
        // Untouched keys survive the merge.
        assert_eq!(cfg.gateway.requestor_id, "req-123");
    }

    #[test]
    fn config_hash_is_stable_and_order_independent() {
        let base = base_yaml("PAY_TEST_BEARER_HASH");
        let a = load_layered_yaml_from_strings(&[&base]).unwrap();
        let b = load_layered_yaml_from_strings(&[&base]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);

        let reordered = r#"
sweep:
  interval_secs: 30
gateway:
  webhook_url: "https://shop.example/api/webhook"
  result_url: "https://shop.example/success"
  bearer_token_env: "PAY_TEST_BEARER_HASH"
  merchant_id: "merch-9"
  requestor_id: "req-123"
  base_url: "https://test.cardserv.io/"
currencies:
  tokens_per_base: 100
  rates:
    USD: 1.33
    EUR: 1.15
    GBP: 1.0
  base: GBP
"#;
        let c = load_layered_yaml_from_strings(&[reordered]).unwrap();
        assert_eq!(a.config_hash, c.config_hash, "key order must not matter");
    }

    #[test]
    fn secret_literal_in_config_is_rejected() {
        let bad = r#"
gateway:
  base_url: "https://test.cardserv.io"
  bearer_token: "sk_live_abcdef123456"
"#;
        let err = load_layered_yaml_from_strings(&[bad]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
    }

    #[test]
    fn db_url_literal_is_rejected() {
        let bad = "db:\n  url: \"postgres://user:pw@host/db\"\n";
        let err = load_layered_yaml_from_strings(&[bad]).unwrap_err();
        assert!(err.to_string().contains("CONFIG_SECRET_DETECTED"));
    }

    #[test]
    fn typed_extraction_reads_token_from_env() {
        std::env::set_var("PAY_TEST_BEARER_TYPED", "tok-abc-123");
        let base = base_yaml("PAY_TEST_BEARER_TYPED");
        let loaded = load_layered_yaml_from_strings(&[&base]).unwrap();
        let cfg = AppConfig::from_loaded(&loaded).unwrap();
        assert_eq!(cfg.gateway.bearer_token, "tok-abc-123");
        assert_eq!(cfg.gateway.base_url, "https://test.cardserv.io");
        assert_eq!(cfg.currencies.tokens_per_base, 100);
        assert_eq!(cfg.redirect_wait.max_attempts, 4, "defaults apply");
    }

    #[test]
    fn missing_bearer_env_fails_loudly() {
        let base = base_yaml("PAY_TEST_BEARER_NEVER_SET");
        let loaded = load_layered_yaml_from_strings(&[&base]).unwrap();
        let err = AppConfig::from_loaded(&loaded).unwrap_err();
        assert!(err.to_string().contains("PAY_TEST_BEARER_NEVER_SET"));
    }

    #[test]
    fn rate_table_must_include_base_at_unity() {
        std::env::set_var("PAY_TEST_BEARER_UNITY", "tok-abc-123");
        let bad = r#"
gateway:
  base_url: "u"
  requestor_id: "r"
  merchant_id: "m"
  bearer_token_env: "PAY_TEST_BEARER_UNITY"
  result_url: "s"
  webhook_url: "w"
currencies:
  base: GBP
  rates:
    EUR: 1.15
"#;
        let loaded = load_layered_yaml_from_strings(&[bad]).unwrap();
        let err = AppConfig::from_loaded(&loaded).unwrap_err();
        assert!(err.to_string().contains("base currency"));
    }

    #[test]
    fn unknown_currency_code_in_rates_fails() {
        let bad = r#"
currencies:
  base: GBP
  rates:
    GBP: 1.0
    AUD: 1.85
"#;
        let loaded = load_layered_yaml_from_strings(&[bad]).unwrap();
        let err = parse_currency_table(&loaded.config_json).unwrap_err();
        assert!(err.to_string().contains("unsupported currency"));
    }
}
