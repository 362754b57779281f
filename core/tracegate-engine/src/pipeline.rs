//! The seven-layer loader chain.
//!
//! | Layer | Content | Caching |
//! |-------|---------|---------|
//! | 1 | bootstrap, stamped per request | never |
//! | 2..=5 | loader stages | in-process and persisted, per content version |
//! | 6 | filler blob derived from the version hash | regenerated |
//! | 7 | kick handler | regenerated |
//!
//! The text itself comes from a [`LayerTemplate`]; this module only
//! decides when to generate, what to cache and under which version.

use crate::config::ProtectionFlags;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracegate_crypto::{generate_token, sha256_hex};
use tracegate_guard::DEFAULT_CACHE_CAPACITY;
use tracegate_store::GateStore;
use tracegate_types::{CachedLayer, Clock, GateError, GateResult, ScriptId, ScriptRecord};
use tracing::debug;

/// Number of layers in the chain.
pub const LAYER_COUNT: u8 = 7;

/// Size of the layer 6 filler in characters.
pub const FILLER_LEN: usize = 16 * 1024;

/// Path prefix the loader chain is served under.
pub const LOADER_PATH: &str = "/api/v1/loader";

const VERSION_LEN: usize = 16;

/// Inputs to a template.
#[derive(Debug, Clone)]
pub struct LayerParams<'a> {
    pub script_id: ScriptId,
    pub layer: u8,
    /// Content-hash version of the script source.
    pub version: &'a str,
    /// URL of the next layer, if any.
    pub next_url: Option<String>,
    pub issued_at: i64,
    /// Per-request value; only set for layer 1.
    pub nonce: Option<String>,
    /// Only set for layer 6.
    pub filler: Option<String>,
    pub flags: &'a ProtectionFlags,
}

/// Produces the source text of one layer.
pub trait LayerTemplate: Send + Sync {
    fn generate(&self, params: &LayerParams<'_>) -> String;
}

/// Built-in templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTemplates;

impl LayerTemplate for DefaultTemplates {
    fn generate(&self, p: &LayerParams<'_>) -> String {
        let next = p.next_url.as_deref().unwrap_or("");
        match p.layer {
            1 => format!(
                "-- tracegate bootstrap\nlocal v,n,t=\"{}\",\"{}\",{}\nreturn loadstring(game:HttpGet(\"{next}\"))(v,n,t)\n",
                p.version,
                p.nonce.as_deref().unwrap_or(""),
                p.issued_at,
            ),
            2 => format!(
                "-- stage 2: environment\nlocal f={{debug={},hook={},env={}}}\nreturn function(...) return f,\"{next}\" end\n",
                p.flags.anti_debug, p.flags.anti_hook, p.flags.environment_check,
            ),
            3 => format!(
                "-- stage 3: integrity\nlocal check={}\nreturn function(...) return check,\"{next}\" end\n",
                p.flags.integrity_check,
            ),
            4 => format!(
                "-- stage 4: transport\nlocal interval={}\nreturn function(...) return interval,\"{next}\" end\n",
                p.flags.check_interval_secs,
            ),
            5 => format!(
                "-- stage 5: handoff {}\nreturn function(...) return \"{next}\" end\n",
                p.version,
            ),
            6 => format!(
                "-- stage 6: verification blob\nlocal b=\"{}\"\nreturn function(...) return #b,\"{next}\" end\n",
                p.filler.as_deref().unwrap_or(""),
            ),
            7 => format!(
                "-- stage 7: disconnect handler\nlocal kick={}\nreturn function(reason) if kick then error(reason or \"disconnected\") end end\n",
                p.flags.kick_on_tamper,
            ),
            _ => String::new(),
        }
    }
}

/// One generated layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutput {
    pub layer: u8,
    pub version: String,
    pub body: String,
    /// True if the layer is stored per version and may be cached
    /// indefinitely by clients.
    pub persisted: bool,
}

type CacheKey = (ScriptId, u8, String);

/// Generates and caches loader layers.
pub struct Pipeline {
    store: Arc<dyn GateStore>,
    clock: Arc<dyn Clock>,
    templates: Arc<dyn LayerTemplate>,
    flags: ProtectionFlags,
    cache: RwLock<HashMap<CacheKey, String>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn GateStore>,
        clock: Arc<dyn Clock>,
        templates: Arc<dyn LayerTemplate>,
        flags: ProtectionFlags,
    ) -> Self {
        Self {
            store,
            clock,
            templates,
            flags,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Content-hash version of a script source.
    #[must_use]
    pub fn version_of(source: &str) -> String {
        let mut hash = sha256_hex(source.as_bytes());
        hash.truncate(VERSION_LEN);
        hash
    }

    /// Deterministic filler for `version`.
    #[must_use]
    pub fn filler(version: &str) -> String {
        let mut out = String::with_capacity(FILLER_LEN + 64);
        let mut counter: u64 = 0;
        while out.len() < FILLER_LEN {
            out.push_str(&sha256_hex(format!("{version}:{counter}").as_bytes()));
            counter += 1;
        }
        out.truncate(FILLER_LEN);
        out
    }

    /// Returns layer `layer` of `script`.
    pub fn layer(&self, script: &ScriptRecord, layer: u8) -> GateResult<LayerOutput> {
        if !(1..=LAYER_COUNT).contains(&layer) {
            return Err(GateError::InvalidRequest(format!(
                "layer must be between 1 and {LAYER_COUNT}"
            )));
        }
        let version = Self::version_of(&script.source);

        let (body, persisted) = match layer {
            1 => (
                self.render(script.id, layer, &version, Some(generate_token(8)), None),
                false,
            ),
            2..=5 => (self.cached(script.id, layer, &version)?, true),
            6 => (
                self.render(script.id, layer, &version, None, Some(Self::filler(&version))),
                false,
            ),
            _ => (self.render(script.id, layer, &version, None, None), false),
        };
        Ok(LayerOutput {
            layer,
            version,
            body,
            persisted,
        })
    }

    /// Number of layers held in the in-process cache.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    fn cached(&self, script_id: ScriptId, layer: u8, version: &str) -> GateResult<String> {
        let key = (script_id, layer, version.to_string());
        if let Some(body) = self.cache.read().get(&key) {
            return Ok(body.clone());
        }

        let body = match self.store.get_layer(&script_id, layer, version)? {
            Some(stored) => {
                debug!(script = %script_id, layer, version, "layer loaded from store");
                stored.body
            }
            None => {
                let body = self.render(script_id, layer, version, None, None);
                self.store.put_layer(&CachedLayer {
                    script_id,
                    layer,
                    version: version.to_string(),
                    body: body.clone(),
                    created_at: self.clock.now(),
                })?;
                debug!(script = %script_id, layer, version, "layer generated");
                body
            }
        };

        let mut cache = self.cache.write();
        if cache.len() >= DEFAULT_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(key, body.clone());
        Ok(body)
    }

    fn render(
        &self,
        script_id: ScriptId,
        layer: u8,
        version: &str,
        nonce: Option<String>,
        filler: Option<String>,
    ) -> String {
        let next_url = (layer < LAYER_COUNT)
            .then(|| format!("{LOADER_PATH}/{script_id}?layer={}", layer + 1));
        self.templates.generate(&LayerParams {
            script_id,
            layer,
            version,
            next_url,
            issued_at: self.clock.unix_secs(),
            nonce,
            filler,
            flags: &self.flags,
        })
    }
}
