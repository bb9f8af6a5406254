use crate::config::Config;
use crate::government::{Action, Government};
use crate::qlearn::QLearningAgent;
use crate::recorder::{DailyRecord, EpisodeScore, Recorder};
use crate::stats::Accumulator;
use crate::world::World;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, the world, the learning government, and the
/// random number generator, which together define the complete state of a
/// training run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    world: World,
    government: Government,
    policy: QLearningAgent,
    episode: usize,
    scores: Vec<EpisodeScore>,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Generate the initial condition of a fresh run.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.simulation.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed rng")?,
        };

        let world = World::new(&cfg, &mut rng).context("failed to construct world")?;
        let population = cfg.environments.iter().map(|e| e.population).sum();
        let government = Government::new(
            &cfg.qlearning,
            population,
            cfg.infection.recognition_thresh,
        );
        let policy = QLearningAgent::new(&cfg.qlearning, Action::ALL.len());

        Ok(Self {
            cfg,
            world,
            government,
            policy,
            episode: 0,
            scores: Vec::new(),
            rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn scores(&self) -> &[EpisodeScore] {
        &self.scores
    }

    /// Run the remaining episodes and save the daily records to a binary
    /// trajectory file.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let mut recorder = Recorder::create(file)?;

        let episodes = self.cfg.simulation.episodes;
        while self.episode < episodes {
            let average_reward = self
                .run_episode(&mut recorder)
                .with_context(|| format!("failed to run episode {}", self.episode))?;

            self.scores.push(EpisodeScore {
                episode: self.episode,
                generation: self.policy.generation(),
                average_reward,
            });
            self.episode += 1;

            let progress = 100.0 * self.episode as f64 / episodes as f64;
            log::info!("completed {progress:06.2}%");
        }

        recorder.finish()?;
        Ok(())
    }

    fn run_episode(&mut self, recorder: &mut Recorder) -> Result<f64> {
        self.world.reset(&mut self.rng).context("failed to reset world")?;
        self.government.reset();

        let learning = self.cfg.qlearning.enabled;
        let mut rewards = Accumulator::new();

        if learning {
            let state = self.government.determine_state(&self.world);
            self.policy.observe(&state.key(), None);
            self.select_and_apply_action()
                .context("failed to apply initial action")?;
        }

        for day in 0..self.cfg.simulation.days_per_episode {
            self.world
                .simulate_day(&mut self.rng)
                .with_context(|| format!("failed to simulate day {day}"))?;
            self.government.save_data(&self.world);

            if learning && (day + 1) % self.cfg.qlearning.period == 0 {
                let state = self.government.determine_state(&self.world);
                let reward = self.government.compute_reward(&self.world);
                rewards.add(reward);
                self.policy.observe(&state.key(), Some(reward));
                self.select_and_apply_action()
                    .context("failed to apply action")?;
            }

            for region in 0..self.world.environments().len() {
                recorder.record(&DailyRecord::collect(&self.world, self.episode, day, region))?;
            }
        }

        if learning {
            self.policy.end_episode();
        }
        Ok(rewards.mean())
    }

    /// Choose an action ε-greedily; an inadmissible choice is scored down
    /// and replaced by the best admissible one.
    fn select_and_apply_action(&mut self) -> Result<()> {
        let chosen = self.policy.act(&mut self.rng);
        let mut action = Action::from_index(chosen).context("action index out of range")?;

        if !self.government.is_possible_action(action, &self.world) {
            self.policy
                .penalize(chosen, self.cfg.qlearning.impossible_action_score);
            let executable: Vec<usize> = self
                .government
                .get_executable_acts(&self.world)
                .iter()
                .map(|a| a.index())
                .collect();
            let fallback = self.policy.best_among(&executable);
            action = Action::from_index(fallback).context("action index out of range")?;
            log::debug!("inadmissible action replaced by {action:?}");
        }

        self.government.apply_action(action, &mut self.world);
        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Export the learned Q-table as JSON.
    pub fn save_qtable<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        self.policy.save(file)
    }

    /// Continue training from a previously exported Q-table.
    pub fn load_qtable<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        self.policy.load(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::model::Status;

    fn short_config() -> Config {
        let mut cfg = test_config();
        cfg.simulation.episodes = 2;
        cfg.simulation.days_per_episode = 10;
        cfg
    }

    fn world_counts(days: usize) -> Vec<usize> {
        let mut engine = Engine::generate_initial_condition(short_config()).expect("engine");
        let mut counts = Vec::new();
        for _ in 0..days {
            engine.world.simulate_day(&mut engine.rng).expect("day");
            for status in Status::ALL {
                counts.push(engine.world.count_world(Some(status)));
            }
        }
        counts
    }

    #[test]
    fn same_seed_gives_identical_aggregates() {
        assert_eq!(world_counts(5), world_counts(5));
    }

    #[test]
    fn full_run_records_every_region_day() {
        let mut engine = Engine::generate_initial_condition(short_config()).expect("engine");
        let file = std::env::temp_dir().join("contagio-engine-test.msgpack");
        engine.run_simulation(&file).expect("run");

        let records = crate::recorder::read_trajectory(&file).expect("read");
        // episodes x days x regions
        assert_eq!(records.len(), 2 * 10 * 2);
        assert_eq!(engine.scores().len(), 2);
        std::fs::remove_file(&file).ok();
    }

    #[test]
    fn checkpoint_round_trips_and_resumes() {
        let mut engine = Engine::generate_initial_condition(short_config()).expect("engine");
        let trajectory = std::env::temp_dir().join("contagio-engine-ckpt-trajectory.msgpack");
        let checkpoint = std::env::temp_dir().join("contagio-engine-ckpt.msgpack");

        engine.run_simulation(&trajectory).expect("run");
        engine.save_checkpoint(&checkpoint).expect("save");

        let restored = Engine::load_checkpoint(&checkpoint).expect("load");
        assert_eq!(restored.cfg(), engine.cfg());
        assert_eq!(restored.episode, engine.episode);
        assert_eq!(restored.scores(), engine.scores());
        assert_eq!(
            restored.world().agents().len(),
            engine.world().agents().len()
        );

        std::fs::remove_file(&trajectory).ok();
        std::fs::remove_file(&checkpoint).ok();
    }

    #[test]
    fn exported_qtable_seeds_a_fresh_engine() {
        let mut engine = Engine::generate_initial_condition(short_config()).expect("engine");
        let trajectory = std::env::temp_dir().join("contagio-engine-qtable-trajectory.msgpack");
        let qtable = std::env::temp_dir().join("contagio-engine-qtable.json");

        engine.run_simulation(&trajectory).expect("run");
        engine.save_qtable(&qtable).expect("save qtable");

        let mut fresh = Engine::generate_initial_condition(short_config()).expect("engine");
        fresh.load_qtable(&qtable).expect("load qtable");
        assert_eq!(fresh.policy.generation(), engine.policy.generation());

        std::fs::remove_file(&trajectory).ok();
        std::fs::remove_file(&qtable).ok();
    }
}
