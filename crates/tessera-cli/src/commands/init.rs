// crates/tessera-cli/src/commands/init.rs
//
// `tessera init`: write a config and governance keys, deploy the network,
// and fund the reward reserve through the governor.
//
// An existing config file is reused. If it names no governance owners, fresh
// owner keys are generated, written to the key file, and recorded in the
// config. Otherwise the key file must already hold enough owner keys to
// reach quorum.

use std::error::Error;
use std::fs;
use std::path::Path;

use clap::Args;
use serde::{Deserialize, Serialize};

use tessera_core::crypto::Keypair;
use tessera_core::identity::Address;
use tessera_governance::GovernanceCall;
use tessera_node::{Component, NetworkConfig};

use crate::output::{emit_fields, Field, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Number of governance owners to generate.
    #[arg(long, default_value_t = 3)]
    pub owners: usize,

    /// Owner signatures required to execute a governance call.
    #[arg(long, default_value_t = 2)]
    pub required: usize,

    /// Timestamp of period 0 (defaults to the config's genesis).
    #[arg(long)]
    pub genesis: Option<u64>,

    /// Overwrite an existing state file.
    #[arg(long)]
    pub force: bool,
}

/// One governance owner's key, stored as its hex-encoded ed25519 seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerKey {
    pub address: Address,
    pub seed: String,
}

/// Contents of the key file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyFile {
    pub owners: Vec<OwnerKey>,
}

impl KeyFile {
    pub fn generate(count: usize) -> Self {
        let owners = (0..count)
            .map(|_| {
                let keypair = Keypair::generate();
                OwnerKey {
                    address: keypair.address(),
                    seed: hex::encode(keypair.signing_key.to_bytes()),
                }
            })
            .collect();
        Self { owners }
    }

    pub fn load(path: &str) -> Result<Self, Box<dyn Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("cannot read key file {}: {}", path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &str) -> Result<(), Box<dyn Error>> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Decode every stored key, checking each seed matches its address.
    pub fn keypairs(&self) -> Result<Vec<Keypair>, Box<dyn Error>> {
        self.owners
            .iter()
            .map(|owner| -> Result<Keypair, Box<dyn Error>> {
                let bytes = hex::decode(&owner.seed)?;
                let seed: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| format!("seed for {} is not 32 bytes", owner.address))?;
                let keypair = Keypair::from_seed(&seed);
                if keypair.address() != owner.address {
                    return Err(format!("seed does not match address {}", owner.address).into());
                }
                Ok(keypair)
            })
            .collect()
    }
}

/// Run the init command.
pub fn run(
    config_path: &str,
    state_path: &str,
    keys_path: &str,
    args: &InitArgs,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    if Path::new(state_path).exists() && !args.force {
        return Err(format!("{} already exists; pass --force to replace it", state_path).into());
    }

    let mut config = if Path::new(config_path).exists() {
        NetworkConfig::load(config_path)?
    } else {
        NetworkConfig::default()
    };
    if let Some(genesis) = args.genesis {
        config.genesis = genesis;
    }

    let keys = if config.governance.owners.is_empty() {
        if args.required == 0 || args.required > args.owners {
            return Err(format!(
                "cannot require {} of {} owners",
                args.required, args.owners
            )
            .into());
        }
        let keys = KeyFile::generate(args.owners);
        keys.save(keys_path)?;
        config.governance.owners = keys.owners.iter().map(|k| k.address).collect();
        config.governance.required = args.required;
        keys
    } else {
        KeyFile::load(keys_path)?
    };
    fs::write(config_path, config.to_toml()?)?;

    let signers: Vec<Keypair> = keys
        .keypairs()?
        .into_iter()
        .filter(|k| config.governance.owners.contains(&k.address()))
        .take(config.governance.required)
        .collect();
    let reward_supply = config.economics.to_params()?.reward_supply();

    let mut session = Session::create(config, state_path)?;
    let staking = session.network.component_address(Component::Staking);
    let call = GovernanceCall::InitializeStaking { reward_supply };
    let signatures = signers
        .iter()
        .map(|k| session.network.governor().sign(k, &staking, &call))
        .collect::<Result<Vec<_>, _>>()?;
    session.network.govern(&signatures, &staking, &call)?;
    tracing::info!("Network initialized, reward reserve {}", reward_supply);

    let governor = session.network.governor();
    let fields = vec![
        Field::new("config", config_path),
        Field::new("state", state_path),
        Field::new("keys", keys_path),
        Field::new("genesis", session.config.genesis),
        Field::new("governor", governor.address),
        Field::new(
            "quorum",
            format!("{} of {}", governor.required(), governor.owners().len()),
        ),
        Field::new("reward reserve", reward_supply),
        Field::new("distributor", session.network.state().distributor),
        Field::new("staking", staking),
        Field::new("policy", session.network.component_address(Component::Policy)),
        Field::new(
            "adjudicator",
            session.network.component_address(Component::Adjudicator),
        ),
    ];
    emit_fields(format, &fields, &fields);
    session.save()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_decode() {
        let keys = KeyFile::generate(3);
        let pairs = keys.keypairs().unwrap();
        assert_eq!(pairs.len(), 3);
        for (pair, owner) in pairs.iter().zip(&keys.owners) {
            assert_eq!(pair.address(), owner.address);
        }
    }

    #[test]
    fn test_mismatched_seed_rejected() {
        let mut keys = KeyFile::generate(2);
        keys.owners[0].address = keys.owners[1].address;
        assert!(keys.keypairs().is_err());
    }

    #[test]
    fn test_init_opens_staking() {
        let dir = std::env::temp_dir();
        let tag = format!("{}_init", std::process::id());
        let path = |name: &str| dir.join(format!("tessera_{}_{}", tag, name)).to_string_lossy().to_string();
        let (config, state, keys) = (path("config.toml"), path("state.json"), path("keys.json"));

        let args = InitArgs {
            owners: 3,
            required: 2,
            genesis: None,
            force: false,
        };
        run(&config, &state, &keys, &args, OutputFormat::Json).unwrap();
        assert!(run(&config, &state, &keys, &args, OutputFormat::Json).is_err());

        let session = Session::open(&config, &state).unwrap();
        assert!(session.network.staking().issuer.initialized);
        assert_eq!(session.network.governor().required(), 2);
        assert_eq!(session.network.governor().nonce(), 1);

        for file in [&config, &state, &keys] {
            let _ = fs::remove_file(file);
        }
    }
}
