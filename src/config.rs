use crate::model::InfectionModel;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub infection: InfectionConfig,
    pub agent: AgentConfig,
    pub economy: EconomyConfig,
    pub travel: TravelConfig,
    pub qlearning: QLearningConfig,
    pub environments: Vec<EnvironmentConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of training episodes per run.
    pub episodes: usize,
    /// Number of simulated days per episode.
    pub days_per_episode: usize,
    /// RNG seed; omitted means seeded from the OS.
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InfectionConfig {
    pub infection_prob: f64,
    pub incubation_period: u32,
    /// Half-width of the uniform incubation draw; 0 gives a fixed period.
    #[serde(default)]
    pub incubation_range: u32,
    pub recovery_prob: f64,
    pub recovery_prob_in_hospital: f64,
    pub subjective_symptoms_prob: f64,
    pub max_damage: f64,
    pub min_damage: f64,
    /// Infected fraction at which the outbreak counts as recognized.
    pub recognition_thresh: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Initial (and maximum) physical strength.
    pub physical_strength: f64,
    /// Standard deviation of the mental stabilization point draw.
    pub mental_sigma: f64,
    /// Scale applied to the chi-squared mental random-walk magnitude.
    pub mental_walk_scale: f64,
    /// Mean of the income stabilization point draw.
    pub income_mean: f64,
    /// Standard deviation of the income stabilization point draw.
    pub income_sigma: f64,
    /// Fraction of agents employed as public officials.
    pub public_official_rate: f64,
    /// Age brackets assigning immunity; must cover ages 0..=99.
    pub age_brackets: Vec<AgeBracketConfig>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgeBracketConfig {
    pub min_age: u32,
    pub max_age: u32,
    pub immunity: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    /// Sales tax rate applied on top of each trade price.
    pub tax_rate: f64,
    /// Flat daily salary paid to public officials from region finance.
    pub official_salary: f64,
    /// Daily operating cost per occupied hospital bed.
    pub hospital_bed_cost: f64,
    pub price_min: f64,
    pub price_max: f64,
    /// Standard deviation of the seller's price draw.
    pub price_sigma: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TravelConfig {
    /// Per-agent daily probability of attempting a trip.
    pub flow_rate: f64,
    /// Bounds of the uniform stay-duration draw, in days.
    pub stay_min: u32,
    pub stay_max: u32,
    pub immigration: ImmigrationConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ImmigrationConfig {
    /// Probability that a traveler is inspected at all.
    pub cover_rate: f64,
    /// Test sensitivity; `1 - pcr_recall` is the false-negative rate.
    pub pcr_recall: f64,
    /// (E+I)/present ratio activating the full test.
    pub full_test_thresh: f64,
    /// I/present ratio activating the symptomatic-only test.
    pub symptomatic_test_thresh: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct QLearningConfig {
    pub enabled: bool,
    /// Learning rate α.
    pub alpha: f64,
    /// Discount rate γ.
    pub gamma: f64,
    /// ε-greedy exploration parameter.
    pub epsilon: f64,
    /// Observation period in days.
    pub period: usize,
    pub explosion_thresh: f64,
    pub spread_thresh: f64,
    pub convergence_thresh: f64,
    /// Score assigned to choosing an inadmissible action.
    pub impossible_action_score: f64,
    pub status_scores: StatusScores,
    pub economy_scores: EconomyScores,
}

/// Signed reward weight per window-averaged status count.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct StatusScores {
    pub susceptible: f64,
    pub exposed: f64,
    pub infected: f64,
    pub recovered: f64,
    pub dead: f64,
}

/// Fixed reward contribution per discretized economy state.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EconomyScores {
    pub normal: f64,
    pub recession: f64,
    pub crisis: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub population: usize,
    pub initial_infected: usize,
    /// Preferential-attachment parameter `m` of the contact graph.
    pub attachment: usize,
    pub hospital_capacity: usize,
    /// Initial region finance; also the economy baseline.
    pub finance: f64,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.simulation.episodes, 1..10_000).context("invalid number of episodes")?;
        check_num(self.simulation.days_per_episode, 1..100_000)
            .context("invalid number of days per episode")?;

        self.validate_infection()
            .context("invalid infection parameters")?;
        self.validate_agent().context("invalid agent parameters")?;
        self.validate_economy()
            .context("invalid economy parameters")?;
        self.validate_travel().context("invalid travel parameters")?;
        self.validate_qlearning()
            .context("invalid q-learning parameters")?;
        self.validate_environments()
            .context("invalid environment parameters")?;

        Ok(())
    }

    fn validate_infection(&self) -> Result<()> {
        let inf = &self.infection;
        check_prob(inf.infection_prob).context("invalid infection probability")?;
        check_num(inf.incubation_period, 1..1_000).context("invalid incubation period")?;
        if inf.incubation_range >= inf.incubation_period {
            bail!("incubation range must be smaller than the incubation period");
        }
        check_prob(inf.recovery_prob).context("invalid recovery probability")?;
        check_prob(inf.recovery_prob_in_hospital)
            .context("invalid in-hospital recovery probability")?;
        check_prob(inf.subjective_symptoms_prob)
            .context("invalid subjective symptoms probability")?;
        check_num(inf.min_damage, 0.0..1e9).context("invalid minimum damage")?;
        if inf.max_damage < inf.min_damage {
            bail!("maximum damage must not be smaller than minimum damage");
        }
        check_prob(inf.recognition_thresh).context("invalid recognition threshold")?;
        Ok(())
    }

    fn validate_agent(&self) -> Result<()> {
        let agt = &self.agent;
        check_num(agt.physical_strength, 0.0..1e9).context("invalid physical strength")?;
        check_num(agt.mental_sigma, 0.0..1e9).context("invalid mental sigma")?;
        check_num(agt.mental_walk_scale, 0.0..1e9).context("invalid mental walk scale")?;
        check_num(agt.income_sigma, 0.0..1e9).context("invalid income sigma")?;
        check_prob(agt.public_official_rate).context("invalid public official rate")?;

        // The brackets must cover every age an agent can draw.
        if agt.age_brackets.is_empty() {
            bail!("age brackets must not be empty");
        }
        for age in 0..100 {
            let covered = agt
                .age_brackets
                .iter()
                .any(|b| b.min_age <= age && age <= b.max_age);
            if !covered {
                bail!("age {age} is not covered by any age bracket");
            }
        }
        for bracket in &agt.age_brackets {
            check_prob(bracket.immunity)
                .with_context(|| format!("invalid immunity for bracket {bracket:?}"))?;
        }
        Ok(())
    }

    fn validate_economy(&self) -> Result<()> {
        let eco = &self.economy;
        check_prob(eco.tax_rate).context("invalid tax rate")?;
        check_num(eco.official_salary, 0.0..1e12).context("invalid official salary")?;
        check_num(eco.hospital_bed_cost, 0.0..1e12).context("invalid hospital bed cost")?;
        check_num(eco.price_min, 0.0..1e12).context("invalid minimum price")?;
        if eco.price_max < eco.price_min {
            bail!("maximum price must not be smaller than minimum price");
        }
        check_num(eco.price_sigma, 0.0..1e12).context("invalid price sigma")?;
        Ok(())
    }

    fn validate_travel(&self) -> Result<()> {
        let trv = &self.travel;
        check_prob(trv.flow_rate).context("invalid flow rate")?;
        check_num(trv.stay_min, 1..10_000).context("invalid minimum stay")?;
        if trv.stay_max < trv.stay_min {
            bail!("maximum stay must not be smaller than minimum stay");
        }
        check_prob(trv.immigration.cover_rate).context("invalid cover rate")?;
        check_prob(trv.immigration.pcr_recall).context("invalid pcr recall")?;
        check_prob(trv.immigration.full_test_thresh).context("invalid full test threshold")?;
        check_prob(trv.immigration.symptomatic_test_thresh)
            .context("invalid symptomatic test threshold")?;
        Ok(())
    }

    fn validate_qlearning(&self) -> Result<()> {
        let ql = &self.qlearning;
        check_prob(ql.alpha).context("invalid alpha")?;
        check_prob(ql.gamma).context("invalid gamma")?;
        check_prob(ql.epsilon).context("invalid epsilon")?;
        check_num(ql.period, 1..10_000).context("invalid observation period")?;
        if !(ql.explosion_thresh > ql.spread_thresh
            && ql.spread_thresh > 1.0
            && 1.0 > ql.convergence_thresh
            && ql.convergence_thresh > 0.0)
        {
            bail!(
                "trend thresholds must satisfy explosion > spread > 1 > convergence > 0, \
                 but are {} > {} > 1 > {}",
                ql.explosion_thresh,
                ql.spread_thresh,
                ql.convergence_thresh
            );
        }
        Ok(())
    }

    fn validate_environments(&self) -> Result<()> {
        if self.environments.len() < 2 {
            bail!("at least two environments are required for a world");
        }
        for env in &self.environments {
            check_num(env.population, 1..1_000_000)
                .with_context(|| format!("invalid population for {:?}", env.name))?;
            if env.initial_infected > env.population {
                bail!(
                    "initial infected ({}) exceeds population ({}) for {:?}",
                    env.initial_infected,
                    env.population,
                    env.name
                );
            }
            check_num(env.attachment, 1..env.population)
                .with_context(|| format!("invalid attachment parameter for {:?}", env.name))?;
            check_num(env.finance, 0.0..1e15)
                .with_context(|| format!("invalid finance for {:?}", env.name))?;
        }
        let mut names: Vec<_> = self.environments.iter().map(|env| &env.name).collect();
        names.sort();
        names.dedup();
        if names.len() != self.environments.len() {
            bail!("environment names must be unique");
        }
        Ok(())
    }

    /// Build the shared infection parameter bundle.
    pub fn infection_model(&self) -> InfectionModel {
        let inf = &self.infection;
        InfectionModel {
            infection_prob: inf.infection_prob,
            incubation_period: inf.incubation_period,
            incubation_range: inf.incubation_range,
            recovery_prob: inf.recovery_prob,
            recovery_prob_in_hospital: inf.recovery_prob_in_hospital,
            subjective_symptoms_prob: inf.subjective_symptoms_prob,
            max_damage: inf.max_damage,
            min_damage: inf.min_damage,
            recognition_thresh: inf.recognition_thresh,
        }
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_prob(prob: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&prob) {
        bail!("probability must be in the range [0, 1], but is {prob}");
    }
    Ok(())
}
