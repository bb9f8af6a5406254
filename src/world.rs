use crate::agent::Agent;
use crate::config::{AgentConfig, Config, EconomyConfig, EnvironmentConfig, TravelConfig};
use crate::environment::Environment;
use crate::graph::AgentHandle;
use crate::model::{InfectionModel, Status};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Uniform};
use serde::{Deserialize, Serialize};

/// The top-level container: every region, the agent arena, and the
/// inter-region travel protocol.
///
/// Regions reference agents through stable arena handles; a traveling agent
/// is one logical record reachable from both its home graph and the visited
/// graph, never a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    environments: Vec<Environment>,
    agents: Vec<Agent>,
    /// Complete graph over region indices; a fixed iteration structure.
    region_links: Vec<(usize, usize)>,
    model: InfectionModel,
    travel: TravelConfig,
    economy: EconomyConfig,
    agent_cfg: AgentConfig,
    env_cfgs: Vec<EnvironmentConfig>,
    /// Agents that departed from each home region this tick.
    travelers_today: Vec<Vec<AgentHandle>>,
}

impl World {
    pub fn new(cfg: &Config, rng: &mut ChaCha12Rng) -> Result<Self> {
        let n_regions = cfg.environments.len();
        let region_links = (0..n_regions)
            .flat_map(|u| ((u + 1)..n_regions).map(move |v| (u, v)))
            .collect();

        let mut world = Self {
            environments: Vec::new(),
            agents: Vec::new(),
            region_links,
            model: cfg.infection_model(),
            travel: cfg.travel.clone(),
            economy: cfg.economy.clone(),
            agent_cfg: cfg.agent.clone(),
            env_cfgs: cfg.environments.clone(),
            travelers_today: vec![Vec::new(); n_regions],
        };
        world.reset(rng).context("failed to initialize world")?;

        log::info!(
            "initialized world with {} regions and {} agents",
            world.environments.len(),
            world.agents.len()
        );
        Ok(world)
    }

    /// Rebuild every region and the whole agent arena for a new episode.
    pub fn reset(&mut self, rng: &mut ChaCha12Rng) -> Result<()> {
        self.agents.clear();
        self.environments.clear();
        for (region, env_cfg) in self.env_cfgs.iter().enumerate() {
            let env = Environment::new(
                region,
                env_cfg,
                &self.agent_cfg,
                self.economy.tax_rate,
                &mut self.agents,
                rng,
            )
            .with_context(|| format!("failed to build environment {:?}", env_cfg.name))?;
            self.environments.push(env);
        }
        self.travelers_today = vec![Vec::new(); self.environments.len()];
        Ok(())
    }

    /// Run one full simulated day: travel first, then every region tick.
    pub fn simulate_day(&mut self, rng: &mut ChaCha12Rng) -> Result<()> {
        self.forward_time();
        self.process_travel(rng).context("failed to move agents")?;
        for env in self.environments.iter_mut() {
            env.simulate_day(
                &mut self.agents,
                &self.model,
                &self.economy,
                &self.agent_cfg,
                rng,
            )
            .with_context(|| format!("failed to simulate day in {:?}", env.name()))?;
        }
        Ok(())
    }

    /// Decrement every traveler's remaining stay, floored at zero.
    pub fn forward_time(&mut self) {
        for agent in self.agents.iter_mut() {
            agent.forward_time();
        }
    }

    /// Outflow (completed stays return home) then inflow (new departures),
    /// both gated by immigration screening.
    pub fn process_travel(&mut self, rng: &mut ChaCha12Rng) -> Result<()> {
        self.process_outflow(rng)
            .context("failed to process outflow")?;
        self.process_inflow(rng)
            .context("failed to process inflow")?;
        Ok(())
    }

    fn process_outflow(&mut self, rng: &mut ChaCha12Rng) -> Result<()> {
        for region in 0..self.environments.len() {
            let due: Vec<AgentHandle> = self.environments[region]
                .present_handles(&self.agents)
                .into_iter()
                .filter(|&h| {
                    let agent = &self.agents[h];
                    // Admitted visitors stay in the visited hospital until
                    // discharge.
                    agent.is_traveler() && agent.stay_period() == 0 && !agent.is_hospitalized()
                })
                .collect();
            for handle in due {
                // Blocked travelers stay put with an expired counter and
                // are retried the next day.
                if self.screen(region, handle, rng)? {
                    self.agents[handle].return_home();
                }
            }
        }
        Ok(())
    }

    fn process_inflow(&mut self, rng: &mut ChaCha12Rng) -> Result<()> {
        let n_regions = self.environments.len();
        let flow = Bernoulli::new(self.travel.flow_rate).context("invalid flow rate")?;
        let stay_dist = Uniform::new_inclusive(self.travel.stay_min, self.travel.stay_max)
            .context("invalid stay range")?;

        let candidates: Vec<AgentHandle> = (0..self.agents.len())
            .filter(|&h| {
                let agent = &self.agents[h];
                !agent.is_traveler()
                    && agent.status() != Status::Dead
                    && !agent.is_hospitalized()
            })
            .collect();

        let mut outbound: Vec<Vec<AgentHandle>> = vec![Vec::new(); n_regions];
        for handle in candidates {
            if !flow.sample(rng) {
                continue;
            }
            let home = self.agents[handle].home_region();
            if !self.screen(home, handle, rng)? {
                continue;
            }

            // Uniform destination among the other regions.
            let mut destination = rng.random_range(0..n_regions - 1);
            if destination >= home {
                destination += 1;
            }
            let stay = stay_dist.sample(rng);
            let code = self.agents[handle].code().to_owned();
            self.agents[handle].depart(destination, stay);
            self.environments[destination].link_visitor(handle, &code, rng)?;
            outbound[home].push(handle);
        }

        for (region, out) in outbound.iter().enumerate() {
            self.environments[region].set_outflow(out.len());
        }
        self.travelers_today = outbound;
        Ok(())
    }

    /// Immigration screening at `region`; `true` means the traveler passes.
    ///
    /// A caught positive is a normally suppressed action, not an error.
    fn screen(&self, region: usize, handle: AgentHandle, rng: &mut ChaCha12Rng) -> Result<bool> {
        let imm = &self.travel.immigration;

        let inspected = Bernoulli::new(imm.cover_rate)
            .context("invalid cover rate")?
            .sample(rng);
        if !inspected {
            return Ok(true);
        }

        let (infected_ratio, combined_ratio) = self.environments[region].prevalence(&self.agents);
        let status = self.agents[handle].status();
        let caught_by_test = if combined_ratio >= imm.full_test_thresh {
            // Full test: catches exposed and infected.
            status.is_infectious()
        } else if infected_ratio >= imm.symptomatic_test_thresh {
            // Symptomatic-only test: catches infected.
            status == Status::Infected
        } else {
            // No test active.
            return Ok(true);
        };
        if !caught_by_test {
            return Ok(true);
        }

        let false_negative = Bernoulli::new((1.0 - imm.pcr_recall).clamp(0.0, 1.0))
            .context("invalid pcr recall")?
            .sample(rng);
        Ok(false_negative)
    }

    // --- aggregate queries ---

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn region_links(&self) -> &[(usize, usize)] {
        &self.region_links
    }

    /// Count agents present in `region`, optionally by status.
    pub fn count_agents(&self, region: usize, status: Option<Status>) -> usize {
        self.environments[region].count_agents(&self.agents, status)
    }

    /// Count agents world-wide, optionally by status.
    pub fn count_world(&self, status: Option<Status>) -> usize {
        self.agents
            .iter()
            .filter(|a| status.is_none_or(|s| a.status() == s))
            .count()
    }

    pub fn get_average_mental_strength(&self, region: usize) -> f64 {
        self.environments[region].get_average_mental_strength(&self.agents)
    }

    pub fn get_average_income(&self, region: usize) -> f64 {
        self.environments[region].get_average_income(&self.agents)
    }

    pub fn get_finance(&self, region: usize) -> f64 {
        self.environments[region].get_finance()
    }

    pub fn get_tax_revenue(&self, region: usize) -> f64 {
        self.environments[region].get_tax_revenue()
    }

    pub fn get_hospital_occupancy(&self, region: usize) -> f64 {
        self.environments[region].get_hospital_occupancy()
    }

    /// Read-only snapshot of the agents present in `region`.
    pub fn get_agents(&self, region: usize) -> Vec<&Agent> {
        self.environments[region]
            .present_handles(&self.agents)
            .into_iter()
            .map(|h| &self.agents[h])
            .collect()
    }

    /// Agents that departed from `region` this tick.
    pub fn get_travelers(&self, region: usize) -> Vec<&Agent> {
        self.travelers_today[region]
            .iter()
            .map(|&h| &self.agents[h])
            .collect()
    }

    pub fn total_finance(&self) -> f64 {
        self.environments.iter().map(Environment::get_finance).sum()
    }

    pub fn total_finance_baseline(&self) -> f64 {
        self.environments
            .iter()
            .map(Environment::get_finance_baseline)
            .sum()
    }

    /// Pooled hospital occupancy over all regions, in `[0, 1]`.
    pub fn total_hospital_occupancy(&self) -> f64 {
        let capacity: usize = self
            .environments
            .iter()
            .map(|env| env.hospital().capacity())
            .sum();
        if capacity == 0 {
            return 0.0;
        }
        let patients: usize = self
            .environments
            .iter()
            .map(|env| env.hospital().count_patients())
            .sum();
        patients as f64 / capacity as f64
    }

    // --- interventions ---

    pub fn change_hospital_capacity(&mut self, delta: i64) {
        for env in self.environments.iter_mut() {
            env.change_hospital_capacity(delta);
        }
    }

    /// Scale every agent's effective infection probability.
    pub fn distribute_masks(&mut self, factor: f64) {
        for agent in self.agents.iter_mut() {
            agent.set_mask_effect(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rand::SeedableRng;

    fn build_world(rng: &mut ChaCha12Rng) -> World {
        World::new(&test_config(), rng).expect("world construction")
    }

    /// Every agent is present in exactly one region, and the per-region
    /// presence counts sum to the world population.
    fn assert_presence_invariant(world: &World) {
        let n_regions = world.environments().len();
        for agent in world.agents() {
            let presences = (0..n_regions).filter(|&r| agent.is_stay_in(r)).count();
            assert_eq!(presences, 1, "agent {} presence", agent.code());
        }
        let present_total: usize = (0..n_regions).map(|r| world.count_agents(r, None)).sum();
        assert_eq!(present_total, world.agents().len());
    }

    #[test]
    fn world_links_every_region_pair() {
        let mut rng = ChaCha12Rng::seed_from_u64(30);
        let world = build_world(&mut rng);
        // Complete graph over 2 regions.
        assert_eq!(world.region_links(), &[(0, 1)]);
        assert_presence_invariant(&world);
    }

    #[test]
    fn travel_round_trip_takes_exactly_the_stay_period() {
        let mut rng = ChaCha12Rng::seed_from_u64(31);
        let mut cfg = test_config();
        cfg.travel.flow_rate = 1.0;
        cfg.travel.stay_min = 3;
        cfg.travel.stay_max = 3;
        cfg.travel.immigration.cover_rate = 0.0;
        let mut world = World::new(&cfg, &mut rng).expect("world");

        world.process_travel(&mut rng).expect("travel");
        let traveler = world
            .agents()
            .iter()
            .position(Agent::is_traveler)
            .expect("someone must travel at flow rate 1");
        let destination = world.agents()[traveler].current_region();
        let home = world.agents()[traveler].home_region();
        assert_eq!(world.agents()[traveler].stay_period(), 3);
        assert!(
            world
                .get_travelers(home)
                .iter()
                .any(|a| a.code() == world.agents()[traveler].code())
        );
        assert!(
            world
                .get_agents(destination)
                .iter()
                .any(|a| a.code() == world.agents()[traveler].code())
        );

        // No further departures while we watch the round trip.
        world.travel.flow_rate = 0.0;

        for _ in 0..3 {
            assert!(world.agents()[traveler].is_stay_in(destination));
            world.forward_time();
            world.process_travel(&mut rng).expect("travel");
        }
        let agent = &world.agents()[traveler];
        assert!(agent.is_stay_in(agent.home_region()));
        assert_eq!(agent.stay_period(), 0);
        assert_presence_invariant(&world);
    }

    #[test]
    fn certain_screening_blocks_infected_travelers() {
        let mut rng = ChaCha12Rng::seed_from_u64(32);
        let mut cfg = test_config();
        cfg.travel.immigration.cover_rate = 1.0;
        cfg.travel.immigration.pcr_recall = 1.0;
        // The symptomatic-only test is always active, the full test never.
        cfg.travel.immigration.full_test_thresh = 1.0;
        cfg.travel.immigration.symptomatic_test_thresh = 0.0;
        let world = World::new(&cfg, &mut rng).expect("world");

        let infected = world
            .agents()
            .iter()
            .position(|a| a.status() == Status::Infected)
            .expect("region 0 starts with infected agents");
        let susceptible = world
            .agents()
            .iter()
            .position(|a| a.status() == Status::Susceptible)
            .expect("someone is susceptible");

        for _ in 0..20 {
            assert!(!world.screen(0, infected, &mut rng).expect("screen"));
            assert!(world.screen(0, susceptible, &mut rng).expect("screen"));
        }
    }

    #[test]
    fn full_test_catches_infectious_travelers() {
        let mut rng = ChaCha12Rng::seed_from_u64(33);
        let mut cfg = test_config();
        cfg.travel.immigration.cover_rate = 1.0;
        cfg.travel.immigration.pcr_recall = 1.0;
        cfg.travel.immigration.full_test_thresh = 0.0;
        let world = World::new(&cfg, &mut rng).expect("world");

        let infected = world
            .agents()
            .iter()
            .position(|a| a.status() == Status::Infected)
            .expect("infected agent");
        assert!(!world.screen(0, infected, &mut rng).expect("screen"));
    }

    #[test]
    fn uncovered_screening_passes_everyone() {
        let mut rng = ChaCha12Rng::seed_from_u64(34);
        let mut cfg = test_config();
        cfg.travel.immigration.cover_rate = 0.0;
        let world = World::new(&cfg, &mut rng).expect("world");

        let infected = world
            .agents()
            .iter()
            .position(|a| a.status() == Status::Infected)
            .expect("infected agent");
        for _ in 0..20 {
            assert!(world.screen(0, infected, &mut rng).expect("screen"));
        }
    }

    #[test]
    fn hospitalized_traveler_stays_until_discharge() {
        let mut rng = ChaCha12Rng::seed_from_u64(37);
        let mut cfg = test_config();
        cfg.travel.flow_rate = 1.0;
        cfg.travel.stay_min = 1;
        cfg.travel.stay_max = 1;
        cfg.travel.immigration.cover_rate = 0.0;
        let mut world = World::new(&cfg, &mut rng).expect("world");

        world.process_travel(&mut rng).expect("travel");
        let traveler = world
            .agents()
            .iter()
            .position(Agent::is_traveler)
            .expect("someone must travel at flow rate 1");
        let destination = world.agents()[traveler].current_region();
        world.agents[traveler].set_hospitalized(true);
        world.travel.flow_rate = 0.0;

        // The stay expires, but the patient keeps their bed abroad.
        for _ in 0..3 {
            world.forward_time();
            world.process_travel(&mut rng).expect("travel");
            let agent = &world.agents()[traveler];
            assert!(agent.is_stay_in(destination));
            assert!(agent.is_hospitalized());
        }

        world.agents[traveler].set_hospitalized(false);
        world.forward_time();
        world.process_travel(&mut rng).expect("travel");
        let agent = &world.agents()[traveler];
        assert!(agent.is_stay_in(agent.home_region()));
        assert_presence_invariant(&world);
    }

    #[test]
    fn presence_invariant_holds_across_full_days() {
        let mut rng = ChaCha12Rng::seed_from_u64(35);
        let mut cfg = test_config();
        cfg.travel.flow_rate = 0.3;
        let mut world = World::new(&cfg, &mut rng).expect("world");

        let total = world.agents().len();
        for _ in 0..10 {
            world.simulate_day(&mut rng).expect("day");
            assert_presence_invariant(&world);
            // Nobody is created or destroyed mid-episode.
            assert_eq!(world.agents().len(), total);
        }
    }

    #[test]
    fn reset_rebuilds_the_whole_arena() {
        let mut rng = ChaCha12Rng::seed_from_u64(36);
        let mut world = build_world(&mut rng);
        for _ in 0..5 {
            world.simulate_day(&mut rng).expect("day");
        }
        world.reset(&mut rng).expect("reset");
        assert_presence_invariant(&world);
        let infected_total = world.count_world(Some(Status::Infected));
        let expected: usize = test_config()
            .environments
            .iter()
            .map(|e| e.initial_infected)
            .sum();
        assert_eq!(infected_total, expected);
    }
}
