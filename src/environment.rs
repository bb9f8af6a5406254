use crate::agent::{Agent, TradeIntent};
use crate::config::{AgentConfig, EconomyConfig, EnvironmentConfig};
use crate::graph::{AgentHandle, ContactGraph};
use crate::model::{InfectionModel, Status};
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Isolation and treatment beds of one region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    capacity: usize,
    beds: Vec<AgentHandle>,
}

impl Hospital {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            beds: Vec::new(),
        }
    }

    /// A region at exact capacity admits nobody.
    pub fn is_accommodatable(&self) -> bool {
        self.beds.len() < self.capacity
    }

    pub fn accommodate(&mut self, handle: AgentHandle) {
        self.beds.push(handle);
    }

    pub fn count_patients(&self) -> usize {
        self.beds.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_patient(&self, handle: AgentHandle) -> bool {
        self.beds.contains(&handle)
    }

    /// Adjust capacity; never drops below the current patient count.
    pub fn change_capacity(&mut self, delta: i64) {
        let target = self.capacity as i64 + delta;
        self.capacity = target.max(self.beds.len() as i64).max(0) as usize;
    }

    /// Discharge every patient no longer infected.
    fn release_cured(&mut self, agents: &mut [Agent]) {
        let mut kept = Vec::with_capacity(self.beds.len());
        for &handle in &self.beds {
            if agents[handle].status() == Status::Infected {
                kept.push(handle);
            } else {
                agents[handle].set_hospitalized(false);
            }
        }
        self.beds = kept;
    }
}

/// One named region: a contact graph, a hospital, and a financial ledger.
///
/// Drives one simulation day for the agents physically present here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    name: String,
    region: usize,
    population: usize,
    graph: ContactGraph,
    hospital: Hospital,
    finance: f64,
    baseline_finance: f64,
    tax_rate: f64,
    pending_tax_revenue: f64,
    tax_revenue: f64,
    outflow: usize,
}

impl Environment {
    /// Build a fresh region for a new episode, pushing its residents into
    /// the world's agent arena.
    pub fn new(
        region: usize,
        env_cfg: &EnvironmentConfig,
        agent_cfg: &AgentConfig,
        tax_rate: f64,
        agents: &mut Vec<Agent>,
        rng: &mut ChaCha12Rng,
    ) -> Result<Self> {
        // Pick which residents start the episode infected.
        let infected_ids =
            rand::seq::index::sample(rng, env_cfg.population, env_cfg.initial_infected);

        let mut residents = Vec::with_capacity(env_cfg.population);
        for id in 0..env_cfg.population {
            let status = if infected_ids.iter().any(|picked| picked == id) {
                Status::Infected
            } else {
                Status::Susceptible
            };
            let agent = Agent::new(id, region, &env_cfg.name, status, agent_cfg, rng)
                .with_context(|| format!("failed to create agent {id} of {:?}", env_cfg.name))?;
            let handle = agents.len();
            residents.push((handle, agent.code().to_owned()));
            agents.push(agent);
        }

        let graph = ContactGraph::preferential_attachment(&residents, env_cfg.attachment, rng)
            .with_context(|| format!("failed to build contact graph of {:?}", env_cfg.name))?;

        Ok(Self {
            name: env_cfg.name.clone(),
            region,
            population: env_cfg.population,
            graph,
            hospital: Hospital::new(env_cfg.hospital_capacity),
            finance: env_cfg.finance,
            baseline_finance: env_cfg.finance,
            tax_rate,
            pending_tax_revenue: 0.0,
            tax_revenue: 0.0,
            outflow: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> usize {
        self.region
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn graph(&self) -> &ContactGraph {
        &self.graph
    }

    pub fn hospital(&self) -> &Hospital {
        &self.hospital
    }

    /// Run one simulated day for the agents present in this region.
    pub fn simulate_day(
        &mut self,
        agents: &mut Vec<Agent>,
        model: &InfectionModel,
        economy: &EconomyConfig,
        agent_cfg: &AgentConfig,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        self.pay_salary_to_public_officials(agents, economy);
        self.update_finance();
        self.trade(agents, economy, rng)
            .context("failed to run daily trades")?;
        self.update_agents_params(agents, model, agent_cfg, rng)
            .context("failed to update agent parameters")?;
        let transitions = self
            .decide_and_update_agents_status(agents, model, rng)
            .context("failed to update agent statuses")?;
        self.update_hospital(agents, model, &transitions);
        self.consume_hospital_operating_cost(economy);
        Ok(())
    }

    /// Step 1: flat transfer from region finance to officials at home.
    fn pay_salary_to_public_officials(&mut self, agents: &mut [Agent], economy: &EconomyConfig) {
        for node in self.present_nodes(agents) {
            let handle = self.graph.agent_at(node);
            let agent = &agents[handle];
            if agent.is_public_official()
                && !agent.is_traveler()
                && agent.status() != Status::Dead
            {
                self.finance -= economy.official_salary;
                agents[handle].earn(economy.official_salary);
            }
        }
    }

    /// Step 2: flush yesterday's tax revenue into the ledger exactly once.
    fn update_finance(&mut self) {
        self.finance += self.pending_tax_revenue;
        self.tax_revenue = self.pending_tax_revenue;
        self.pending_tax_revenue = 0.0;
    }

    /// Step 3: pairwise trades between co-present eligible neighbors.
    ///
    /// Each agent stages one buy/sell intent for the whole day and holds it
    /// across all of its pairings.
    fn trade(
        &mut self,
        agents: &mut [Agent],
        economy: &EconomyConfig,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        let mut intents: HashMap<AgentHandle, TradeIntent> = HashMap::new();
        for node in self.present_nodes(agents) {
            let handle = self.graph.agent_at(node);
            if agents[handle].is_trade_eligible() {
                intents.insert(handle, agents[handle].propose_trade(rng)?);
            }
        }

        let edges: Vec<(usize, usize)> = self.graph.edges().collect();
        for (u, v) in edges {
            let ha = self.graph.agent_at(u);
            let hb = self.graph.agent_at(v);
            let (Some(&intent_a), Some(&intent_b)) = (intents.get(&ha), intents.get(&hb)) else {
                continue;
            };
            // A pair transacts only on a buy/sell mismatch.
            let (seller, buyer) = match (intent_a, intent_b) {
                (TradeIntent::Sell, TradeIntent::Buy) => (ha, hb),
                (TradeIntent::Buy, TradeIntent::Sell) => (hb, ha),
                _ => continue,
            };

            let price = agents[seller].name_price(
                economy.price_min,
                economy.price_max,
                economy.price_sigma,
                rng,
            )?;
            let tax = (price * self.tax_rate).ceil();
            agents[buyer].spend(price + tax);
            agents[seller].earn(price);
            self.pending_tax_revenue += tax;
        }
        Ok(())
    }

    /// Step 4: mental random walk and physical depletion.
    fn update_agents_params(
        &self,
        agents: &mut [Agent],
        model: &InfectionModel,
        agent_cfg: &AgentConfig,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        for node in self.present_nodes(agents) {
            let handle = self.graph.agent_at(node);
            if agents[handle].status() == Status::Dead {
                continue;
            }
            agents[handle].update_mental_strength(
                agent_cfg.mental_sigma,
                agent_cfg.mental_walk_scale,
                rng,
            )?;
            agents[handle].apply_physical_damage(model);
        }
        Ok(())
    }

    /// Steps 5: two-phase decide/commit over the present agents.
    ///
    /// Every decide completes before any commit runs, so no agent observes
    /// a neighbor's same-day transition.
    fn decide_and_update_agents_status(
        &self,
        agents: &mut [Agent],
        model: &InfectionModel,
        rng: &mut ChaCha12Rng,
    ) -> Result<Vec<(AgentHandle, Status, Status)>> {
        let present = self.present_nodes(agents);

        let mut staged_list = Vec::with_capacity(present.len());
        for &node in &present {
            let handle = self.graph.agent_at(node);
            let agent = &agents[handle];
            if agent.status() == Status::Dead {
                continue;
            }
            let neighbors: Vec<&Agent> = self
                .graph
                .neighbors(node)
                .iter()
                .map(|&nb| &agents[self.graph.agent_at(nb)])
                .filter(|a| a.is_stay_in(self.region) && !a.is_hospitalized())
                .collect();
            let staged = agent.decide_next_status(&neighbors, model, rng)?;
            staged_list.push((handle, staged));
        }

        for &(handle, staged) in &staged_list {
            agents[handle].stage(staged);
        }

        let mut transitions = Vec::new();
        for &(handle, _) in &staged_list {
            if let Some((old, new)) = agents[handle].update_status(model, rng)? {
                if old != new {
                    transitions.push((handle, old, new));
                }
            }
        }
        Ok(transitions)
    }

    /// Step 6: discharge cured patients, admit newly infected agents while
    /// the outbreak is recognized and beds are free.
    fn update_hospital(
        &mut self,
        agents: &mut [Agent],
        model: &InfectionModel,
        transitions: &[(AgentHandle, Status, Status)],
    ) {
        self.hospital.release_cured(agents);

        if !self.outbreak_recognized(agents, model) {
            return;
        }
        for &(handle, _, new) in transitions {
            if new != Status::Infected {
                continue;
            }
            if !self.hospital.is_accommodatable() {
                break;
            }
            self.hospital.accommodate(handle);
            agents[handle].set_hospitalized(true);
        }
    }

    /// Step 7: per-bed operating cost.
    fn consume_hospital_operating_cost(&mut self, economy: &EconomyConfig) {
        self.finance -= self.hospital.count_patients() as f64 * economy.hospital_bed_cost;
    }

    /// Whether the infected share of the present population reaches the
    /// symptomatic-recognition threshold.
    fn outbreak_recognized(&self, agents: &[Agent], model: &InfectionModel) -> bool {
        let present = self.count_agents(agents, None);
        if present == 0 {
            return false;
        }
        let infected = self.count_agents(agents, Some(Status::Infected));
        infected as f64 / present as f64 >= model.recognition_thresh
    }

    // --- travel support ---

    /// Node ids of agents currently present in this region.
    fn present_nodes(&self, agents: &[Agent]) -> Vec<usize> {
        (0..self.graph.node_count())
            .filter(|&node| agents[self.graph.agent_at(node)].is_stay_in(self.region))
            .collect()
    }

    /// Agent handles currently present in this region.
    pub fn present_handles(&self, agents: &[Agent]) -> Vec<AgentHandle> {
        self.present_nodes(agents)
            .into_iter()
            .map(|node| self.graph.agent_at(node))
            .collect()
    }

    /// Link an inbound traveler into the contact graph (node reuse on
    /// repeat visits).
    pub fn link_visitor(
        &mut self,
        handle: AgentHandle,
        code: &str,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        self.graph
            .insert_visitor(handle, code, rng)
            .with_context(|| format!("failed to link visitor {code} into {:?}", self.name))?;
        Ok(())
    }

    /// Infected and exposed+infected shares of the present population,
    /// used by immigration screening. Zero when the region is empty.
    pub fn prevalence(&self, agents: &[Agent]) -> (f64, f64) {
        let present = self.count_agents(agents, None);
        if present == 0 {
            return (0.0, 0.0);
        }
        let infected = self.count_agents(agents, Some(Status::Infected));
        let exposed = self.count_agents(agents, Some(Status::Exposed));
        (
            infected as f64 / present as f64,
            (exposed + infected) as f64 / present as f64,
        )
    }

    pub fn set_outflow(&mut self, outflow: usize) {
        self.outflow = outflow;
    }

    pub fn outflow(&self) -> usize {
        self.outflow
    }

    // --- aggregate queries ---

    /// Count present agents, optionally restricted to one status.
    pub fn count_agents(&self, agents: &[Agent], status: Option<Status>) -> usize {
        self.present_handles(agents)
            .into_iter()
            .filter(|&h| status.is_none_or(|s| agents[h].status() == s))
            .count()
    }

    pub fn get_average_mental_strength(&self, agents: &[Agent]) -> f64 {
        self.average_over_living(agents, |a| a.mental_strength())
    }

    pub fn get_average_income(&self, agents: &[Agent]) -> f64 {
        self.average_over_living(agents, |a| a.income())
    }

    fn average_over_living(&self, agents: &[Agent], value: impl Fn(&Agent) -> f64) -> f64 {
        let living: Vec<f64> = self
            .present_handles(agents)
            .into_iter()
            .filter(|&h| agents[h].status() != Status::Dead)
            .map(|h| value(&agents[h]))
            .collect();
        if living.is_empty() {
            return 0.0;
        }
        living.iter().sum::<f64>() / living.len() as f64
    }

    pub fn get_finance(&self) -> f64 {
        self.finance
    }

    pub fn get_finance_baseline(&self) -> f64 {
        self.baseline_finance
    }

    pub fn get_tax_revenue(&self) -> f64 {
        self.tax_revenue
    }

    pub fn get_hospital_occupancy(&self) -> f64 {
        if self.hospital.capacity() == 0 {
            return 0.0;
        }
        self.hospital.count_patients() as f64 / self.hospital.capacity() as f64
    }

    pub fn change_hospital_capacity(&mut self, delta: i64) {
        self.hospital.change_capacity(delta);
    }
}
