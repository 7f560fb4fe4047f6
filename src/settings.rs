//! Config file and roles file parsing, and the defaulting ("fill") rules
//! that turn a sparse per-chain config into two fully-specified
//! [`ResolvedHeaderSync`] pipelines per peer.
//!
//! Grounded in `examples/original_source/config/config.go` and
//! `config/roles.go`; JSON wire format kept verbatim (spec §6) even though
//! the teacher's own `Settings` loader uses the `config` crate against
//! TOML — the source system's config file genuinely is JSON.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    chain::{self, ChainId, Direction},
    error::RelayError,
};

/// Build environment this binary was compiled for. Config whose `Env`
/// field doesn't match this is a fatal startup error (spec §6).
pub const BUILD_ENV: &str = "mainnet";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "KeyStore", default)]
    pub key_store: String,
    #[serde(rename = "KeyPwd", default)]
    pub key_pwd: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub chain_id: ChainId,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "ExtraNodes", default)]
    pub extra_nodes: Vec<String>,
    /// Seconds between polls of the source chain's latest height.
    #[serde(rename = "ListenCheck", default)]
    pub listen_check: u64,
    #[serde(rename = "Defer", default)]
    pub defer: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitterConfig {
    #[serde(default)]
    pub chain_id: ChainId,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "ExtraNodes", default)]
    pub extra_nodes: Vec<String>,
    #[serde(rename = "HSContract", default)]
    pub hs_contract: String,
    #[serde(rename = "Wallet", default)]
    pub wallet: Option<WalletConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderSyncConfig {
    #[serde(default)]
    pub batch: usize,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub buffer: usize,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "Submitter", default)]
    pub submitter: Option<SubmitterConfig>,
    #[serde(flatten)]
    pub listener: ListenerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub chain_id: ChainId,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "ExtraNodes", default)]
    pub extra_nodes: Vec<String>,
    #[serde(rename = "HSContract", default)]
    pub hs_contract: String,
    #[serde(rename = "ListenCheck", default)]
    pub listen_check: u64,
    #[serde(rename = "CheckFee", default)]
    pub check_fee: bool,
    #[serde(rename = "Defer", default)]
    pub defer: u64,
    #[serde(rename = "Wallet", default)]
    pub wallet: Option<WalletConfig>,
    /// `[0]` is peer->T, `[1]` is T->peer, matching spec §6 verbatim.
    #[serde(rename = "HeaderSync", default)]
    pub header_sync: [HeaderSyncConfig; 2],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopChainConfig {
    #[serde(default)]
    pub chain_id: ChainId,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(rename = "ExtraNodes", default)]
    pub extra_nodes: Vec<String>,
    #[serde(rename = "HSContract", default)]
    pub hs_contract: String,
    #[serde(rename = "Wallet", default)]
    pub wallet: Option<WalletConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Env", default)]
    pub env: String,
    #[serde(rename = "Top", default)]
    pub top: Option<TopChainConfig>,
    #[serde(rename = "Chains", default)]
    pub chains: HashMap<ChainId, ChainConfig>,
    #[serde(rename = "Host", default)]
    pub host: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "ValidMethods", default)]
    pub valid_methods: Vec<String>,
    #[serde(rename = "Bridge", default)]
    pub bridge: Vec<String>,

    /// Chains marked active by a roles file. Not part of the JSON wire
    /// format; populated by [`Settings::apply_roles`].
    #[serde(skip)]
    active_chains: HashMap<ChainId, bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "HeaderSync", default)]
    pub header_sync: bool,
}

pub type Roles = HashMap<ChainId, Role>;

impl Settings {
    /// Read and validate the config file. Env mismatch is fatal (spec §6).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| RelayError::Fatal(format!("read config file {path:?}: {e}")))?;
        let mut settings: Settings = serde_json::from_str(&data)
            .map_err(|e| RelayError::Fatal(format!("parse config file {path:?}: {e}")))?;

        if settings.env != BUILD_ENV {
            return Err(RelayError::Fatal(format!(
                "config env ({}) and build env ({BUILD_ENV}) do not match",
                settings.env
            )));
        }

        if settings.host.is_empty() {
            settings.host = "0.0.0.0".to_string();
        }
        if settings.port == 0 {
            settings.port = 6500;
        }

        for (id, chain) in settings.chains.iter_mut() {
            if chain.chain_id != 0 && chain.chain_id != *id {
                return Err(RelayError::Fatal(format!(
                    "conflicting chain id in config: {} <> {id}",
                    chain.chain_id
                )));
            }
            chain.chain_id = *id;
        }

        Ok(settings)
    }

    /// Read a roles file and mark the chains it lists as active, enabling
    /// both directions' header sync for each (spec §4.6, `config/roles.go`).
    pub fn load_roles(&mut self, path: impl AsRef<Path>) -> Result<(), RelayError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .map_err(|e| RelayError::Fatal(format!("read roles file {path:?}: {e}")))?;
        let roles: Roles = serde_json::from_str(&data)
            .map_err(|e| RelayError::Fatal(format!("parse roles file {path:?}: {e}")))?;
        self.apply_roles(roles);
        Ok(())
    }

    pub fn apply_roles(&mut self, roles: Roles) {
        for (id, role) in roles {
            self.active_chains.insert(id, true);
            if id == chain::TOP {
                self.top.get_or_insert_with(TopChainConfig::default);
            } else {
                let entry = self.chains.entry(id).or_insert_with(ChainConfig::default);
                entry.chain_id = id;
                entry.header_sync[0].enabled = role.header_sync;
                entry.header_sync[1].enabled = role.header_sync;
            }
        }
    }

    pub fn active(&self, chain: ChainId) -> bool {
        self.active_chains.get(&chain).copied().unwrap_or(false)
    }

    /// Enabled (chain, direction) pairs, in stable order, for the
    /// supervisor to instantiate pipelines for.
    pub fn enabled_pipelines(&self) -> Vec<(ChainId, Direction)> {
        let mut out = Vec::new();
        let mut ids: Vec<&ChainId> = self.chains.keys().collect();
        ids.sort();
        for id in ids {
            if !self.active(*id) {
                continue;
            }
            let chain = &self.chains[id];
            if chain.header_sync[0].enabled {
                out.push((*id, Direction::PeerToPrimary));
            }
            if chain.header_sync[1].enabled {
                out.push((*id, Direction::PrimaryToPeer));
            }
        }
        out
    }

    /// Apply the Go source's "fill" defaulting rules and return a fully
    /// resolved config for one (chain, direction) pipeline.
    pub fn resolve_header_sync(
        &self,
        chain_id: ChainId,
        direction: Direction,
    ) -> Result<ResolvedHeaderSync, RelayError> {
        let top = self
            .top
            .as_ref()
            .ok_or_else(|| RelayError::Fatal("no Top chain config present".into()))?;
        let peer = self
            .chains
            .get(&chain_id)
            .ok_or_else(|| RelayError::Fatal(format!("no config for chain {chain_id}")))?;

        let (raw, listener_chain_id, listener_base, submitter_chain_id, submitter_base) =
            match direction {
                Direction::PeerToPrimary => (
                    &peer.header_sync[0],
                    chain_id,
                    FillBase::from_chain(peer),
                    chain::TOP,
                    FillBase::from_top(top),
                ),
                Direction::PrimaryToPeer => (
                    &peer.header_sync[1],
                    chain::TOP,
                    FillBase::from_top(top),
                    chain_id,
                    FillBase::from_chain(peer),
                ),
            };

        let listener = fill_listener(&raw.listener, listener_chain_id, &listener_base);
        let submitter_raw = raw.submitter.clone().unwrap_or_default();
        let submitter = fill_submitter(&submitter_raw, submitter_chain_id, &submitter_base)?;

        Ok(ResolvedHeaderSync {
            batch: if raw.batch == 0 { 1 } else { raw.batch },
            timeout_secs: if raw.timeout == 0 { 1 } else { raw.timeout },
            buffer: if raw.buffer == 0 {
                2 * if raw.batch == 0 { 1 } else { raw.batch }
            } else {
                raw.buffer
            },
            enabled: raw.enabled,
            listener,
            submitter,
        })
    }
}

/// Node list / wallet shared between a chain-level config and the
/// top-level config, used by [`fill_listener`]/[`fill_submitter`] as the
/// fallback source for unset fields.
struct FillBase {
    nodes: Vec<String>,
    extra_nodes: Vec<String>,
    hs_contract: String,
    wallet: Option<WalletConfig>,
    defer: u64,
    listen_check: u64,
}

impl FillBase {
    fn from_chain(c: &ChainConfig) -> Self {
        Self {
            nodes: c.nodes.clone(),
            extra_nodes: c.extra_nodes.clone(),
            hs_contract: c.hs_contract.clone(),
            wallet: c.wallet.clone(),
            defer: c.defer,
            listen_check: c.listen_check,
        }
    }

    fn from_top(c: &TopChainConfig) -> Self {
        Self {
            nodes: c.nodes.clone(),
            extra_nodes: c.extra_nodes.clone(),
            hs_contract: c.hs_contract.clone(),
            wallet: c.wallet.clone(),
            defer: 0,
            listen_check: 0,
        }
    }
}

fn fill_listener(raw: &ListenerConfig, chain_id: ChainId, base: &FillBase) -> ResolvedListener {
    // The Top chain's listener hardcodes Defer=1 in the source
    // (`top/listener.go`'s `Defer()`); every other chain falls back to the
    // chain- or top-level config value, unset meaning 0 (no confirmation
    // wait beyond the chain client's own poll).
    let defer = if raw.defer != 0 {
        raw.defer
    } else if base.defer != 0 {
        base.defer
    } else if chain_id == chain::TOP {
        1
    } else {
        0
    };
    ResolvedListener {
        chain_id,
        nodes: if raw.nodes.is_empty() { base.nodes.clone() } else { raw.nodes.clone() },
        extra_nodes: if raw.extra_nodes.is_empty() {
            base.extra_nodes.clone()
        } else {
            raw.extra_nodes.clone()
        },
        defer,
        listen_check_secs: if raw.listen_check == 0 { base.listen_check } else { raw.listen_check },
    }
}

fn fill_submitter(
    raw: &SubmitterConfig,
    chain_id: ChainId,
    base: &FillBase,
) -> Result<ResolvedSubmitter, RelayError> {
    if raw.chain_id != 0 && raw.chain_id != chain_id {
        return Err(RelayError::Fatal(format!(
            "conflicting chain id in config for submitters: {} <> {chain_id}",
            raw.chain_id
        )));
    }
    Ok(ResolvedSubmitter {
        chain_id,
        nodes: if raw.nodes.is_empty() { base.nodes.clone() } else { raw.nodes.clone() },
        extra_nodes: if raw.extra_nodes.is_empty() {
            base.extra_nodes.clone()
        } else {
            raw.extra_nodes.clone()
        },
        hs_contract: if raw.hs_contract.is_empty() {
            base.hs_contract.clone()
        } else {
            raw.hs_contract.clone()
        },
        wallet: raw.wallet.clone().or_else(|| base.wallet.clone()),
    })
}

#[derive(Debug, Clone)]
pub struct ResolvedListener {
    pub chain_id: ChainId,
    pub nodes: Vec<String>,
    pub extra_nodes: Vec<String>,
    pub defer: u64,
    pub listen_check_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ResolvedSubmitter {
    pub chain_id: ChainId,
    pub nodes: Vec<String>,
    pub extra_nodes: Vec<String>,
    pub hs_contract: String,
    pub wallet: Option<WalletConfig>,
}

#[derive(Debug, Clone)]
pub struct ResolvedHeaderSync {
    pub batch: usize,
    pub timeout_secs: u64,
    pub buffer: usize,
    pub enabled: bool,
    pub listener: ResolvedListener,
    pub submitter: ResolvedSubmitter,
}

/// Join `path` to the directory containing `base_config_path` when `path`
/// is relative, matching `config.GetConfigPath`.
pub fn resolve_relative_path(base_config_path: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "Env": "mainnet",
            "Top": { "ChainId": 0, "Nodes": ["http://top-node"], "HSContract": "0xTOP" },
            "Chains": {
                "1": {
                    "ChainId": 1,
                    "Nodes": ["http://eth-node"],
                    "HeaderSync": [
                        { "Batch": 1, "Enabled": true },
                        { "Batch": 4, "Timeout": 2, "Enabled": true }
                    ]
                }
            },
            "ValidMethods": ["sync"],
            "Bridge": []
        }"#
    }

    #[test]
    fn rejects_env_mismatch() {
        let bad = sample_json().replace("mainnet", "testnet");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, bad).unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, RelayError::Fatal(_)));
    }

    #[test]
    fn loads_and_resolves_fill_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, sample_json()).unwrap();
        let mut settings = Settings::load(&path).unwrap();

        let roles: Roles = serde_json::from_str(r#"{"0": {"HeaderSync": true}, "1": {"HeaderSync": true}}"#).unwrap();
        settings.apply_roles(roles);

        assert!(settings.active(1));
        assert_eq!(settings.enabled_pipelines().len(), 2);

        let peer_to_top = settings.resolve_header_sync(1, Direction::PeerToPrimary).unwrap();
        assert_eq!(peer_to_top.batch, 1);
        assert_eq!(peer_to_top.listener.chain_id, 1);
        assert_eq!(peer_to_top.listener.nodes, vec!["http://eth-node".to_string()]);
        // Submitter side (destination = Top) fills HSContract from Top config.
        assert_eq!(peer_to_top.submitter.chain_id, 0);
        assert_eq!(peer_to_top.submitter.hs_contract, "0xTOP");

        let top_to_peer = settings.resolve_header_sync(1, Direction::PrimaryToPeer).unwrap();
        assert_eq!(top_to_peer.batch, 4);
        assert_eq!(top_to_peer.timeout_secs, 2);
        assert_eq!(top_to_peer.listener.chain_id, 0);
        assert_eq!(top_to_peer.listener.nodes, vec!["http://top-node".to_string()]);
        // Submitter side (destination = peer) fills HSContract from chain config... which is
        // empty here, so the resolved contract stays empty rather than panicking.
        assert_eq!(top_to_peer.submitter.chain_id, 1);
    }

    #[test]
    fn batch_buffer_timeout_defaults_are_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"Env":"mainnet","Top":{"ChainId":0},"Chains":{"1":{"ChainId":1,"HeaderSync":[{},{}]}}}"#,
        )
        .unwrap();
        let mut settings = Settings::load(&path).unwrap();
        settings.apply_roles(serde_json::from_str(r#"{"1": {"HeaderSync": true}}"#).unwrap());

        let resolved = settings.resolve_header_sync(1, Direction::PeerToPrimary).unwrap();
        assert_eq!(resolved.batch, 1);
        assert_eq!(resolved.timeout_secs, 1);
        assert_eq!(resolved.buffer, 2);
    }
}
