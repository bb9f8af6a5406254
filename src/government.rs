use crate::config::QLearningConfig;
use crate::model::Status;
use crate::stats::SlidingPair;
use crate::world::World;
use serde::{Deserialize, Serialize};

/// Multiplier applied to every agent's effective infection probability when
/// masks are distributed.
pub const MASK_FACTOR: f64 = 0.5;

/// Beds added or removed per hospital capacity action.
pub const CAPACITY_STEP: i64 = 10;

/// Hospital occupancy at or above which the hospital state reads Tight.
const TIGHT_OCCUPANCY: f64 = 0.8;

/// Finance ratio bounds separating Normal / Recession / Crisis.
const RECESSION_RATIO: f64 = 0.9;
const CRISIS_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfectionTrend {
    BeforePandemic,
    Spread,
    Explosion,
    Pandemic,
    Convergence,
    AfterPandemic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HospitalStatus {
    Normal,
    Tight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EconomyStatus {
    Normal,
    Recession,
    Crisis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskStatus {
    Undistributed,
    Distributed,
}

/// Discretized observation the policy conditions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GovState {
    pub trend: InfectionTrend,
    pub hospital: HospitalStatus,
    pub economy: EconomyStatus,
    pub mask: MaskStatus,
}

impl GovState {
    /// Serialized Q-table row key.
    pub fn key(&self) -> String {
        format!(
            "{:?}.{:?}.{:?}.{:?}",
            self.trend, self.hospital, self.economy, self.mask
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Nop,
    UpHospitalCapacity,
    DownHospitalCapacity,
    DistributeMasks,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Nop,
        Action::UpHospitalCapacity,
        Action::DownHospitalCapacity,
        Action::DistributeMasks,
    ];

    /// Column of this action in a Q-table row.
    pub fn index(self) -> usize {
        match self {
            Action::Nop => 0,
            Action::UpHospitalCapacity => 1,
            Action::DownHospitalCapacity => 2,
            Action::DistributeMasks => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }
}

/// Sliding observation window per compartment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusWindows {
    susceptible: SlidingPair,
    exposed: SlidingPair,
    infected: SlidingPair,
    recovered: SlidingPair,
    dead: SlidingPair,
}

impl StatusWindows {
    fn new(period: usize) -> Self {
        Self {
            susceptible: SlidingPair::new(period),
            exposed: SlidingPair::new(period),
            infected: SlidingPair::new(period),
            recovered: SlidingPair::new(period),
            dead: SlidingPair::new(period),
        }
    }

    fn clear(&mut self) {
        self.susceptible.clear();
        self.exposed.clear();
        self.infected.clear();
        self.recovered.clear();
        self.dead.clear();
    }
}

/// Policy-side observer of the world.
///
/// Collects daily world-wide compartment counts into sliding windows,
/// discretizes them into a [`GovState`], scores them into rewards, and
/// executes the chosen interventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Government {
    cfg: QLearningConfig,
    /// World population, the denominator of the alert threshold.
    population: usize,
    recognition_thresh: f64,
    windows: StatusWindows,
    /// Latches once infections cross the alert threshold; per episode.
    alerted: bool,
    masks_distributed: bool,
}

impl Government {
    pub fn new(cfg: &QLearningConfig, population: usize, recognition_thresh: f64) -> Self {
        Self {
            cfg: cfg.clone(),
            population,
            recognition_thresh,
            windows: StatusWindows::new(cfg.period),
            alerted: false,
            masks_distributed: false,
        }
    }

    /// Forget everything observed this episode.
    pub fn reset(&mut self) {
        self.windows.clear();
        self.alerted = false;
        self.masks_distributed = false;
    }

    /// Record today's world-wide compartment counts.
    pub fn save_data(&mut self, world: &World) {
        self.windows
            .susceptible
            .push(world.count_world(Some(Status::Susceptible)) as f64);
        self.windows
            .exposed
            .push(world.count_world(Some(Status::Exposed)) as f64);
        self.windows
            .infected
            .push(world.count_world(Some(Status::Infected)) as f64);
        self.windows
            .recovered
            .push(world.count_world(Some(Status::Recovered)) as f64);
        self.windows
            .dead
            .push(world.count_world(Some(Status::Dead)) as f64);
    }

    /// Discretize the observed windows and world aggregates.
    pub fn determine_state(&mut self, world: &World) -> GovState {
        GovState {
            trend: self.infection_trend(),
            hospital: Self::hospital_status(world.total_hospital_occupancy()),
            economy: Self::economy_status(
                world.total_finance(),
                world.total_finance_baseline(),
            ),
            mask: if self.masks_distributed {
                MaskStatus::Distributed
            } else {
                MaskStatus::Undistributed
            },
        }
    }

    fn infection_trend(&mut self) -> InfectionTrend {
        let current = self.windows.infected.current_avg().unwrap_or(0.0);
        let past = self.windows.infected.past_avg().unwrap_or(0.0);
        let alert_level = self.population as f64 * self.recognition_thresh;

        if current < alert_level && past < alert_level {
            return if self.alerted {
                InfectionTrend::AfterPandemic
            } else {
                InfectionTrend::BeforePandemic
            };
        }
        self.alerted = true;

        if past <= 0.0 {
            // Rising from nothing within one window.
            return InfectionTrend::Explosion;
        }
        let ratio = current / past;
        if ratio > self.cfg.explosion_thresh {
            InfectionTrend::Explosion
        } else if ratio > self.cfg.spread_thresh {
            InfectionTrend::Spread
        } else if ratio < self.cfg.convergence_thresh {
            InfectionTrend::Convergence
        } else {
            InfectionTrend::Pandemic
        }
    }

    fn hospital_status(occupancy: f64) -> HospitalStatus {
        if occupancy >= TIGHT_OCCUPANCY {
            HospitalStatus::Tight
        } else {
            HospitalStatus::Normal
        }
    }

    fn economy_status(finance: f64, baseline: f64) -> EconomyStatus {
        if baseline <= 0.0 {
            return EconomyStatus::Normal;
        }
        let ratio = finance / baseline;
        if ratio > RECESSION_RATIO {
            EconomyStatus::Normal
        } else if ratio > CRISIS_RATIO {
            EconomyStatus::Recession
        } else {
            EconomyStatus::Crisis
        }
    }

    /// Weighted sum of window-averaged compartment counts plus the economy
    /// bonus or penalty.
    pub fn compute_reward(&self, world: &World) -> f64 {
        let scores = &self.cfg.status_scores;
        let avg = |pair: &SlidingPair| pair.current_avg().unwrap_or(0.0);

        let status_part = scores.susceptible * avg(&self.windows.susceptible)
            + scores.exposed * avg(&self.windows.exposed)
            + scores.infected * avg(&self.windows.infected)
            + scores.recovered * avg(&self.windows.recovered)
            + scores.dead * avg(&self.windows.dead);

        let economy_part = match Self::economy_status(
            world.total_finance(),
            world.total_finance_baseline(),
        ) {
            EconomyStatus::Normal => self.cfg.economy_scores.normal,
            EconomyStatus::Recession => self.cfg.economy_scores.recession,
            EconomyStatus::Crisis => self.cfg.economy_scores.crisis,
        };

        status_part + economy_part
    }

    pub fn is_possible_action(&self, action: Action, world: &World) -> bool {
        match action {
            Action::Nop | Action::UpHospitalCapacity => true,
            Action::DownHospitalCapacity => world
                .environments()
                .iter()
                .any(|env| env.hospital().capacity() > 0),
            Action::DistributeMasks => !self.masks_distributed,
        }
    }

    /// Actions admissible in the present world.
    pub fn get_executable_acts(&self, world: &World) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|&action| self.is_possible_action(action, world))
            .collect()
    }

    /// Execute an intervention. Inadmissible actions must be filtered by the
    /// caller; applying one here is a no-op beyond its admissible part.
    pub fn apply_action(&mut self, action: Action, world: &mut World) {
        match action {
            Action::Nop => {}
            Action::UpHospitalCapacity => world.change_hospital_capacity(CAPACITY_STEP),
            Action::DownHospitalCapacity => world.change_hospital_capacity(-CAPACITY_STEP),
            Action::DistributeMasks => {
                if !self.masks_distributed {
                    world.distribute_masks(MASK_FACTOR);
                    self.masks_distributed = true;
                    log::info!("masks distributed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn government() -> Government {
        let cfg = test_config();
        Government::new(&cfg.qlearning, 100, cfg.infection.recognition_thresh)
    }

    fn push_infected(gov: &mut Government, values: &[f64]) {
        for &v in values {
            gov.windows.infected.push(v);
        }
    }

    #[test]
    fn trend_is_quiet_before_any_alert_and_after_convalescence() {
        let mut gov = government();
        assert_eq!(gov.infection_trend(), InfectionTrend::BeforePandemic);

        // Counts cross the alert level, then die out.
        push_infected(&mut gov, &[20.0; 10]);
        assert_ne!(gov.infection_trend(), InfectionTrend::BeforePandemic);
        push_infected(&mut gov, &[0.0; 10]);
        assert_eq!(gov.infection_trend(), InfectionTrend::AfterPandemic);
    }

    #[test]
    fn trend_classifies_window_ratios() {
        // period = 5: first five values land in past after five more.
        let mut gov = government();
        push_infected(&mut gov, &[10.0; 5]);
        push_infected(&mut gov, &[15.0; 5]);
        // 15/10 = 1.5 > explosion threshold 1.2.
        assert_eq!(gov.infection_trend(), InfectionTrend::Explosion);

        let mut gov = government();
        push_infected(&mut gov, &[10.0; 5]);
        push_infected(&mut gov, &[11.0; 5]);
        // 1.1 between spread 1.05 and explosion 1.2.
        assert_eq!(gov.infection_trend(), InfectionTrend::Spread);

        let mut gov = government();
        push_infected(&mut gov, &[10.0; 5]);
        push_infected(&mut gov, &[9.0; 5]);
        // 0.9 below convergence 0.95.
        assert_eq!(gov.infection_trend(), InfectionTrend::Convergence);

        let mut gov = government();
        push_infected(&mut gov, &[10.0; 5]);
        push_infected(&mut gov, &[10.0; 5]);
        assert_eq!(gov.infection_trend(), InfectionTrend::Pandemic);
    }

    #[test]
    fn hospital_and_economy_discretization() {
        assert_eq!(Government::hospital_status(0.79), HospitalStatus::Normal);
        assert_eq!(Government::hospital_status(0.8), HospitalStatus::Tight);

        assert_eq!(Government::economy_status(95.0, 100.0), EconomyStatus::Normal);
        assert_eq!(
            Government::economy_status(70.0, 100.0),
            EconomyStatus::Recession
        );
        assert_eq!(Government::economy_status(50.0, 100.0), EconomyStatus::Crisis);
    }

    #[test]
    fn mask_distribution_is_one_shot() {
        let mut rng = ChaCha12Rng::seed_from_u64(40);
        let cfg = test_config();
        let mut world = World::new(&cfg, &mut rng).expect("world");
        let mut gov = government();

        assert!(gov.is_possible_action(Action::DistributeMasks, &world));
        gov.apply_action(Action::DistributeMasks, &mut world);
        assert!(!gov.is_possible_action(Action::DistributeMasks, &world));
        assert_eq!(
            gov.determine_state(&world).mask,
            MaskStatus::Distributed
        );

        gov.reset();
        assert!(gov.is_possible_action(Action::DistributeMasks, &world));
    }

    #[test]
    fn capacity_actions_move_every_region() {
        let mut rng = ChaCha12Rng::seed_from_u64(41);
        let cfg = test_config();
        let mut world = World::new(&cfg, &mut rng).expect("world");
        let mut gov = government();

        let before: Vec<usize> = world
            .environments()
            .iter()
            .map(|env| env.hospital().capacity())
            .collect();
        gov.apply_action(Action::UpHospitalCapacity, &mut world);
        for (env, &cap) in world.environments().iter().zip(&before) {
            assert_eq!(env.hospital().capacity(), cap + 10);
        }
    }

    #[test]
    fn reward_weights_windows_and_economy() {
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let cfg = test_config();
        let world = World::new(&cfg, &mut rng).expect("world");
        let mut gov = government();

        push_infected(&mut gov, &[10.0; 5]);
        gov.windows.dead.push(2.0);

        let expected = cfg.qlearning.status_scores.infected * 10.0
            + cfg.qlearning.status_scores.dead * 2.0
            + cfg.qlearning.economy_scores.normal;
        assert!((gov.compute_reward(&world) - expected).abs() < 1e-9);
    }

    #[test]
    fn state_key_is_stable() {
        let state = GovState {
            trend: InfectionTrend::Spread,
            hospital: HospitalStatus::Tight,
            economy: EconomyStatus::Recession,
            mask: MaskStatus::Undistributed,
        };
        assert_eq!(state.key(), "Spread.Tight.Recession.Undistributed");
    }
}
