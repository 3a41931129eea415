//! The `Core`: constructs and owns every subsystem, replacing the ad-hoc
//! global singletons the original system relied on (Design Notes item 1).
//!
//! Each piece is reachable through an `Arc` so background tasks ([`crate::runtime`])
//! and the embedding process can share them without a second source of truth.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::autonomy::AutonomyController;
use crate::cml::CausalMemory;
use crate::config::Config;
use crate::economy::Economy;
use crate::evolution::{EvolutionPolicyEngine, Policy, SandboxRunner};
use crate::orchestrator::{Capability, Orchestrator};
use crate::trust::TrustModel;

pub struct Core {
    pub config: Config,
    pub economy: Arc<Economy>,
    pub trust: Arc<TrustModel>,
    pub orchestrator: Arc<Orchestrator>,
    pub cml: Arc<CausalMemory>,
    pub epe: Arc<EvolutionPolicyEngine>,
    pub autonomy: Mutex<AutonomyController>,
}

impl Core {
    /// Build a fresh `Core` from `config`, restoring economy and CML state
    /// from disk if present. `sandbox` is the embedding process's
    /// [`SandboxRunner`] for evaluating proposed self-modifications.
    pub fn new(config: Config, sandbox: Box<dyn SandboxRunner>) -> Self {
        let economy = Arc::new(Economy::new(&config));
        let trust = Arc::new(TrustModel::new());
        let orchestrator = Arc::new(Orchestrator::new(&config, economy.clone(), trust.clone()));
        let cml = Arc::new(
            crate::egress::import_cml_snapshot(std::path::Path::new(&config.cml_path))
                .ok()
                .flatten()
                .unwrap_or_default(),
        );
        let epe = Arc::new(EvolutionPolicyEngine::new(Policy::from_config(&config), sandbox));

        let autonomy = AutonomyController::new(
            economy.clone(),
            trust.clone(),
            orchestrator.clone(),
            cml.clone(),
            epe.clone(),
            config.intent_half_life,
            config.intent_floor,
        );

        Self {
            config,
            economy,
            trust,
            orchestrator,
            cml,
            epe,
            autonomy: Mutex::new(autonomy),
        }
    }

    /// Register an external capability before the autonomy loop starts.
    pub fn register_tool(&self, tool: Arc<dyn Capability>) {
        self.orchestrator.register(tool);
    }

    pub fn reset_economy(&self) {
        self.economy.reset(&self.config);
    }
}
