use crate::config::AgentConfig;
use crate::model::{InfectionModel, Status};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, ChiSquared, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Staged outcome of a decide phase, committed by [`Agent::update_status`].
///
/// Computed against the agent's *current* status while every other agent is
/// still unchanged, so the whole tick has simultaneous-update semantics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagedTransition {
    pub next: Status,
    pub incubation: u32,
}

/// Trade intent proposed during the daily trade step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeIntent {
    Buy,
    Sell,
}

/// One simulated individual.
///
/// Owns its epidemiological, physical, mental, and economic state. The
/// status-affecting fields (`status`, `staged`) are mutated only by the
/// agent's own decide/stage/commit methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: usize,
    code: String,
    home_region: usize,
    current_region: usize,
    stay_period: u32,

    status: Status,
    staged: Option<StagedTransition>,
    incubation_count: u32,
    has_subjective_symptoms: bool,

    age: u32,
    immunity: f64,
    physical_strength: f64,
    mental_strength: f64,
    mental_stabilize_point: f64,
    income: f64,
    income_stabilize_point: f64,

    mask_factor: f64,
    public_official: bool,
    hospitalized: bool,
}

impl Agent {
    /// Create an agent living in `home_region`.
    ///
    /// Draws age (and the immunity of its bracket), the mental and income
    /// stabilization points, and the public-official flag. Initially
    /// infected agents are constructed `Infected` with subjective symptoms.
    pub fn new(
        id: usize,
        home_region: usize,
        home_name: &str,
        status: Status,
        cfg: &AgentConfig,
        rng: &mut ChaCha12Rng,
    ) -> Result<Self> {
        let age = rng.random_range(0..100);
        let immunity = cfg
            .age_brackets
            .iter()
            .find(|b| b.min_age <= age && age <= b.max_age)
            .map(|b| b.immunity)
            .with_context(|| format!("no age bracket covers age {age}"))?;

        let mental_dist =
            Normal::new(0.0, cfg.mental_sigma).context("invalid mental stabilize distribution")?;
        let mental_stabilize_point = mental_dist.sample(rng);

        let income_dist = Normal::new(cfg.income_mean, cfg.income_sigma)
            .context("invalid income stabilize distribution")?;
        let income_stabilize_point = income_dist.sample(rng).max(0.0);

        let official_dist =
            Bernoulli::new(cfg.public_official_rate).context("invalid public official rate")?;

        Ok(Self {
            id,
            code: format!("{home_name}_{id}"),
            home_region,
            current_region: home_region,
            stay_period: 0,
            status,
            staged: None,
            incubation_count: 0,
            has_subjective_symptoms: status == Status::Infected,
            age,
            immunity,
            physical_strength: cfg.physical_strength,
            mental_strength: mental_stabilize_point,
            mental_stabilize_point,
            income: income_stabilize_point,
            income_stabilize_point,
            mask_factor: 1.0,
            public_official: official_dist.sample(rng),
            hospitalized: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Globally unique code, `"{home_region}_{id}"`.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn home_region(&self) -> usize {
        self.home_region
    }

    pub fn current_region(&self) -> usize {
        self.current_region
    }

    pub fn is_traveler(&self) -> bool {
        self.current_region != self.home_region
    }

    pub fn is_stay_in(&self, region: usize) -> bool {
        self.current_region == region
    }

    pub fn stay_period(&self) -> u32 {
        self.stay_period
    }

    pub fn is_public_official(&self) -> bool {
        self.public_official
    }

    pub fn is_hospitalized(&self) -> bool {
        self.hospitalized
    }

    pub fn has_subjective_symptoms(&self) -> bool {
        self.has_subjective_symptoms
    }

    pub fn mental_strength(&self) -> f64 {
        self.mental_strength
    }

    pub fn physical_strength(&self) -> f64 {
        self.physical_strength
    }

    pub fn income(&self) -> f64 {
        self.income
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    /// Whether this agent can infect a co-located neighbor today.
    pub fn is_infectious_contact(&self) -> bool {
        self.status.is_infectious() && !self.hospitalized
    }

    /// Whether this agent may take part in a trade today.
    pub fn is_trade_eligible(&self) -> bool {
        !matches!(self.status, Status::Infected | Status::Dead) && !self.hospitalized
    }

    // --- travel ---

    /// Send the agent to `destination` for `stay` days.
    pub fn depart(&mut self, destination: usize, stay: u32) {
        self.current_region = destination;
        self.stay_period = stay;
    }

    /// Bring the agent back home after a completed stay.
    pub fn return_home(&mut self) {
        self.current_region = self.home_region;
        self.stay_period = 0;
    }

    /// Decrement the remaining stay, floored at zero.
    pub fn forward_time(&mut self) {
        self.stay_period = self.stay_period.saturating_sub(1);
    }

    // --- state machine ---

    /// Decide phase: compute the staged transition from the current status
    /// and the co-present neighbors. Does not mutate any agent.
    pub fn decide_next_status(
        &self,
        neighbors: &[&Agent],
        model: &InfectionModel,
        rng: &mut ChaCha12Rng,
    ) -> Result<StagedTransition> {
        match self.status {
            Status::Susceptible => {
                let contacts = neighbors
                    .iter()
                    .filter(|n| n.is_infectious_contact())
                    .count();
                let p_eff = (model.infection_prob * self.mask_factor).clamp(0.0, 1.0);
                // Probability of at least one successful contact.
                let prob = (1.0 - (1.0 - p_eff).powi(contacts as i32)).clamp(0.0, 1.0);
                let infected = Bernoulli::new(prob)
                    .context("invalid infection probability")?
                    .sample(rng);
                if infected {
                    let lo = model.incubation_period - model.incubation_range;
                    let hi = model.incubation_period + model.incubation_range;
                    let incubation = Uniform::new_inclusive(lo, hi)
                        .context("invalid incubation range")?
                        .sample(rng);
                    Ok(StagedTransition {
                        next: Status::Exposed,
                        incubation,
                    })
                } else {
                    Ok(self.stay_as_is())
                }
            }
            Status::Exposed => {
                let count = self.incubation_count.saturating_sub(1);
                let next = if count == 0 {
                    Status::Infected
                } else {
                    Status::Exposed
                };
                Ok(StagedTransition {
                    next,
                    incubation: count,
                })
            }
            Status::Infected => {
                // Depleted physical strength overrides everything else.
                if self.physical_strength <= 0.0 {
                    return Ok(StagedTransition {
                        next: Status::Dead,
                        incubation: 0,
                    });
                }
                let prob = if self.hospitalized {
                    model.recovery_prob_in_hospital
                } else {
                    model.recovery_prob
                };
                let recovered = Bernoulli::new(prob)
                    .context("invalid recovery probability")?
                    .sample(rng);
                if recovered {
                    Ok(StagedTransition {
                        next: Status::Recovered,
                        incubation: 0,
                    })
                } else {
                    Ok(self.stay_as_is())
                }
            }
            Status::Recovered | Status::Dead => Ok(self.stay_as_is()),
        }
    }

    fn stay_as_is(&self) -> StagedTransition {
        StagedTransition {
            next: self.status,
            incubation: self.incubation_count,
        }
    }

    /// Store the staged transition computed by [`Self::decide_next_status`].
    pub fn stage(&mut self, staged: StagedTransition) {
        self.staged = Some(staged);
    }

    /// Commit phase: apply the staged transition.
    ///
    /// Returns `(old, new)` so the caller can run hospital admission and
    /// discharge on the actual transitions. A no-op when nothing is staged.
    pub fn update_status(
        &mut self,
        model: &InfectionModel,
        rng: &mut ChaCha12Rng,
    ) -> Result<Option<(Status, Status)>> {
        let Some(staged) = self.staged.take() else {
            return Ok(None);
        };

        let old = self.status;
        self.status = staged.next;
        self.incubation_count = staged.incubation;

        if old != Status::Infected && self.status == Status::Infected {
            self.has_subjective_symptoms = Bernoulli::new(model.subjective_symptoms_prob)
                .context("invalid subjective symptoms probability")?
                .sample(rng);
        }

        Ok(Some((old, self.status)))
    }

    // --- physical / mental ---

    /// Deterministic daily physical damage while infected.
    ///
    /// Higher immunity and a mental strength closer to its stabilization
    /// point both reduce the damage.
    pub fn daily_damage(&self, model: &InfectionModel) -> f64 {
        let spread = (model.max_damage - model.min_damage).max(0.0);
        let dev = (self.mental_strength - self.mental_stabilize_point).abs();
        let instability = dev / (1.0 + dev);
        let exposure = (1.0 - self.immunity).clamp(0.0, 1.0);
        model.min_damage + spread * exposure * instability
    }

    /// Apply the daily damage; strength never goes negative.
    pub fn apply_physical_damage(&mut self, model: &InfectionModel) {
        if self.status != Status::Infected {
            return;
        }
        self.physical_strength = (self.physical_strength - self.daily_damage(model)).max(0.0);
    }

    /// Mental-strength random walk.
    ///
    /// A Gaussian draw compared against the stabilization point sets the
    /// direction; the magnitude is a scaled chi-squared draw.
    pub fn update_mental_strength(
        &mut self,
        sigma: f64,
        walk_scale: f64,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        if sigma <= 0.0 || walk_scale <= 0.0 {
            return Ok(());
        }
        let draw = Normal::new(0.0, sigma)
            .context("invalid mental walk distribution")?
            .sample(rng);
        let direction = if draw < self.mental_stabilize_point {
            1.0
        } else {
            -1.0
        };
        let magnitude = ChiSquared::new(1.0)
            .context("invalid mental walk magnitude distribution")?
            .sample(rng)
            * walk_scale;
        self.mental_strength += direction * magnitude;
        Ok(())
    }

    // --- economy ---

    /// Propose a trade side, weighted by how far the current income sits
    /// from its stabilization point (below the point favors selling).
    pub fn propose_trade(&self, rng: &mut ChaCha12Rng) -> Result<TradeIntent> {
        let diff = self.income_stabilize_point - self.income;
        let p_sell = 0.5 + 0.5 * (diff / (1.0 + diff.abs()));
        let sell = Bernoulli::new(p_sell.clamp(0.0, 1.0))
            .context("invalid trade intent probability")?
            .sample(rng);
        Ok(if sell {
            TradeIntent::Sell
        } else {
            TradeIntent::Buy
        })
    }

    /// Name a sale price: Gaussian around the income distance from the
    /// stabilization point, clamped to the configured bounds.
    pub fn name_price(
        &self,
        price_min: f64,
        price_max: f64,
        price_sigma: f64,
        rng: &mut ChaCha12Rng,
    ) -> Result<f64> {
        let center = (self.income_stabilize_point - self.income).abs();
        let price = Normal::new(center, price_sigma)
            .context("invalid price distribution")?
            .sample(rng);
        Ok(price.clamp(price_min, price_max))
    }

    pub fn earn(&mut self, amount: f64) {
        self.income += amount;
    }

    pub fn spend(&mut self, amount: f64) {
        self.income -= amount;
    }

    // --- interventions ---

    /// Scale the effective infection probability (mask distribution).
    pub fn set_mask_effect(&mut self, factor: f64) {
        self.mask_factor = factor.clamp(0.0, 1.0);
    }

    pub fn set_hospitalized(&mut self, hospitalized: bool) {
        self.hospitalized = hospitalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rand::SeedableRng;

    fn test_model() -> InfectionModel {
        test_config().infection_model()
    }

    fn make_agent(status: Status, rng: &mut ChaCha12Rng) -> Agent {
        let cfg = test_config();
        Agent::new(0, 0, "tokio", status, &cfg.agent, rng).expect("agent construction")
    }

    #[test]
    fn isolated_susceptible_never_becomes_exposed() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut model = test_model();
        model.infection_prob = 1.0;
        let agent = make_agent(Status::Susceptible, &mut rng);

        // 1 - (1 - p)^0 == 0: zero eligible neighbors, never infected.
        for _ in 0..50 {
            let staged = agent
                .decide_next_status(&[], &model, &mut rng)
                .expect("decide");
            assert_eq!(staged.next, Status::Susceptible);
        }
    }

    #[test]
    fn certain_infection_with_one_infectious_neighbor() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut model = test_model();
        model.infection_prob = 1.0;
        let agent = make_agent(Status::Susceptible, &mut rng);
        let infected = make_agent(Status::Infected, &mut rng);

        let staged = agent
            .decide_next_status(&[&infected], &model, &mut rng)
            .expect("decide");
        assert_eq!(staged.next, Status::Exposed);
        let lo = model.incubation_period - model.incubation_range;
        let hi = model.incubation_period + model.incubation_range;
        assert!((lo..=hi).contains(&staged.incubation));
    }

    #[test]
    fn hospitalized_neighbor_is_not_an_eligible_contact() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut model = test_model();
        model.infection_prob = 1.0;
        let agent = make_agent(Status::Susceptible, &mut rng);
        let mut infected = make_agent(Status::Infected, &mut rng);
        infected.set_hospitalized(true);

        let staged = agent
            .decide_next_status(&[&infected], &model, &mut rng)
            .expect("decide");
        assert_eq!(staged.next, Status::Susceptible);
    }

    #[test]
    fn incubation_counts_down_exactly() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let model = test_model();
        let mut agent = make_agent(Status::Susceptible, &mut rng);
        agent.stage(StagedTransition {
            next: Status::Exposed,
            incubation: 3,
        });
        agent.update_status(&model, &mut rng).expect("commit");
        assert_eq!(agent.status(), Status::Exposed);

        // Remains exposed for two cycles, infected on the third.
        for expected in [Status::Exposed, Status::Exposed, Status::Infected] {
            let staged = agent
                .decide_next_status(&[], &model, &mut rng)
                .expect("decide");
            agent.stage(staged);
            agent.update_status(&model, &mut rng).expect("commit");
            assert_eq!(agent.status(), expected);
        }
    }

    #[test]
    fn depleted_strength_forces_death() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut model = test_model();
        model.recovery_prob = 1.0;
        let mut agent = make_agent(Status::Infected, &mut rng);
        agent.physical_strength = 0.0;

        // Death short-circuits even a certain recovery.
        let staged = agent
            .decide_next_status(&[], &model, &mut rng)
            .expect("decide");
        assert_eq!(staged.next, Status::Dead);
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_transitions() {
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let mut model = test_model();
        model.infection_prob = 1.0;
        let infectious = make_agent(Status::Infected, &mut rng);

        for status in [Status::Recovered, Status::Dead] {
            let agent = make_agent(status, &mut rng);
            for _ in 0..20 {
                let staged = agent
                    .decide_next_status(&[&infectious], &model, &mut rng)
                    .expect("decide");
                assert_eq!(staged.next, status);
            }
        }
    }

    #[test]
    fn physical_damage_is_clamped_at_zero() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let mut model = test_model();
        model.min_damage = 1e6;
        model.max_damage = 1e6;
        let mut agent = make_agent(Status::Infected, &mut rng);
        agent.apply_physical_damage(&model);
        assert_eq!(agent.physical_strength(), 0.0);
    }

    #[test]
    fn immunity_reduces_daily_damage() {
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let model = test_model();
        let mut weak = make_agent(Status::Infected, &mut rng);
        let mut strong = weak.clone();
        weak.immunity = 0.1;
        strong.immunity = 0.9;
        // Push mental strength off its stabilization point so the
        // instability term is non-zero.
        weak.mental_strength = weak.mental_stabilize_point + 2.0;
        strong.mental_strength = strong.mental_stabilize_point + 2.0;
        assert!(strong.daily_damage(&model) < weak.daily_damage(&model));
    }

    #[test]
    fn travel_round_trip_bookkeeping() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut agent = make_agent(Status::Susceptible, &mut rng);
        assert!(!agent.is_traveler());

        agent.depart(1, 3);
        assert!(agent.is_traveler());
        assert!(agent.is_stay_in(1));

        for _ in 0..3 {
            agent.forward_time();
        }
        assert_eq!(agent.stay_period(), 0);
        agent.forward_time();
        assert_eq!(agent.stay_period(), 0);

        agent.return_home();
        assert!(agent.is_stay_in(0));
        assert!(!agent.is_traveler());
    }

    #[test]
    fn new_agent_starts_with_consistent_bookkeeping() {
        let mut rng = ChaCha12Rng::seed_from_u64(15);
        let agent = make_agent(Status::Susceptible, &mut rng);
        assert_eq!(agent.id(), 0);
        assert_eq!(agent.code(), "tokio_0");
        assert!(agent.age() < 100);
        assert!(!agent.has_subjective_symptoms());
        assert!(!agent.is_hospitalized());
        assert!(agent.is_trade_eligible());
    }

    #[test]
    fn perfect_mask_prevents_infection() {
        let mut rng = ChaCha12Rng::seed_from_u64(16);
        let mut model = test_model();
        model.infection_prob = 1.0;
        let mut agent = make_agent(Status::Susceptible, &mut rng);
        agent.set_mask_effect(0.0);
        let infected = make_agent(Status::Infected, &mut rng);

        for _ in 0..50 {
            let staged = agent
                .decide_next_status(&[&infected], &model, &mut rng)
                .expect("decide");
            assert_eq!(staged.next, Status::Susceptible);
        }
    }

    #[test]
    fn poor_agent_prefers_selling() {
        let mut rng = ChaCha12Rng::seed_from_u64(10);
        let mut agent = make_agent(Status::Susceptible, &mut rng);
        agent.income = agent.income_stabilize_point - 1000.0;

        let sells = (0..200)
            .filter(|_| {
                matches!(
                    agent.propose_trade(&mut rng).expect("propose"),
                    TradeIntent::Sell
                )
            })
            .count();
        assert!(sells > 180);
    }
}
