// crates/tessera-cli/src/session.rs
//
// A CLI session: the network loaded from the state file, plus the manual
// clock that stands in for wall time between invocations.
//
// The state file is JSON holding the clock reading and the full
// `NetworkState`. Time only moves through `tessera advance`, so replaying the
// same commands against the same files gives the same results.

use std::error::Error;
use std::fs;

use serde::{Deserialize, Serialize};

use tessera_core::clock::ManualClock;
use tessera_core::identity::Address;
use tessera_core::traits::TimeSource;
use tessera_core::types::Timestamp;
use tessera_node::{FixedVerdict, Network, NetworkConfig, NetworkState};

#[derive(Serialize, Deserialize)]
struct SessionFile {
    now: Timestamp,
    network: NetworkState,
}

pub struct Session {
    pub config: NetworkConfig,
    pub network: Network,
    clock: ManualClock,
    state_path: String,
}

impl Session {
    /// Deploy a fresh network at the configured genesis.
    pub fn create(config: NetworkConfig, state_path: &str) -> Result<Self, Box<dyn Error>> {
        let clock = ManualClock::new(config.genesis);
        // The CLI never submits slashing evidence.
        let network = Network::new(&config, Box::new(clock.clone()), Box::new(FixedVerdict(false)))?;
        Ok(Self {
            config,
            network,
            clock,
            state_path: state_path.to_string(),
        })
    }

    /// Resume the network persisted at `state_path`.
    pub fn open(config_path: &str, state_path: &str) -> Result<Self, Box<dyn Error>> {
        let config = NetworkConfig::load(config_path)?;
        let contents = fs::read_to_string(state_path).map_err(|e| {
            format!(
                "cannot read state file {}: {} (run `tessera init` first)",
                state_path, e
            )
        })?;
        let file: SessionFile = serde_json::from_str(&contents)?;
        let clock = ManualClock::new(file.now);
        let network = Network::from_state(
            file.network,
            Box::new(clock.clone()),
            Box::new(FixedVerdict(false)),
        );
        tracing::debug!("Loaded state from {} at t={}", state_path, file.now);
        Ok(Self {
            config,
            network,
            clock,
            state_path: state_path.to_string(),
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn advance(&self, seconds: u64) {
        self.clock.advance(seconds);
    }

    /// Write the clock and network back to the state file.
    pub fn save(self) -> Result<(), Box<dyn Error>> {
        let file = SessionFile {
            now: self.clock.now(),
            network: self.network.into_state(),
        };
        fs::write(&self.state_path, serde_json::to_string_pretty(&file)?)?;
        tracing::debug!("Saved state to {}", self.state_path);
        Ok(())
    }
}

/// The caller named by `--from`, for commands that act on someone's behalf.
pub fn caller(from: Option<Address>) -> Result<Address, Box<dyn Error>> {
    from.ok_or_else(|| "this command needs --from <address>".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::crypto::Keypair;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("tessera_cli_{}_{}", std::process::id(), name))
            .to_string_lossy()
            .to_string()
    }

    #[test]
    fn test_session_round_trip_keeps_clock() {
        let mut config = NetworkConfig::default();
        config.governance.owners = vec![Keypair::from_seed(&[1u8; 32]).address()];
        let config_path = temp_path("config.toml");
        let state_path = temp_path("state.json");
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let session = Session::create(config, &state_path).unwrap();
        session.advance(7_200);
        let events = session.network.events().len();
        session.save().unwrap();

        let reopened = Session::open(&config_path, &state_path).unwrap();
        assert_eq!(reopened.now(), 7_200);
        assert_eq!(reopened.network.events().len(), events);

        let _ = fs::remove_file(&config_path);
        let _ = fs::remove_file(&state_path);
    }

    #[test]
    fn test_open_without_state_fails() {
        let config_path = temp_path("missing_config.toml");
        let mut config = NetworkConfig::default();
        config.governance.owners = vec![Keypair::from_seed(&[2u8; 32]).address()];
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        assert!(Session::open(&config_path, &temp_path("nowhere.json")).is_err());
        let _ = fs::remove_file(&config_path);
    }

    #[test]
    fn test_caller_requires_from() {
        assert!(caller(None).is_err());
        let address = Address::from_label("alice");
        assert_eq!(caller(Some(address)).unwrap(), address);
    }
}
