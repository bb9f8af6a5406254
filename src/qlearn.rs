use crate::config::QLearningConfig;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Tabular one-step Q-learner over serialized state keys.
///
/// Rows are grown lazily the first time a state is observed; every row holds
/// one value per action. Updates are immediate, there is no replay buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QLearningAgent {
    alpha: f64,
    gamma: f64,
    epsilon: f64,
    n_actions: usize,
    q_values: HashMap<String, Vec<f64>>,
    /// Episodes this table has been trained over, across resumed runs.
    generation: u64,
    state: String,
    previous: Option<(String, usize)>,
}

/// On-disk form of a trained table.
#[derive(Debug, Serialize, Deserialize)]
struct QTableData {
    generation: u64,
    q_values: HashMap<String, Vec<f64>>,
}

impl QLearningAgent {
    pub fn new(cfg: &QLearningConfig, n_actions: usize) -> Self {
        Self {
            alpha: cfg.alpha,
            gamma: cfg.gamma,
            epsilon: cfg.epsilon,
            n_actions,
            q_values: HashMap::new(),
            generation: 0,
            state: String::new(),
            previous: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn ensure_row(&mut self, state: &str) {
        if !self.q_values.contains_key(state) {
            self.q_values
                .insert(state.to_owned(), vec![0.0; self.n_actions]);
        }
    }

    fn row(&self, state: &str) -> &[f64] {
        // Rows exist for every state passed through observe.
        static EMPTY: [f64; 0] = [];
        self.q_values.get(state).map_or(&EMPTY, Vec::as_slice)
    }

    fn row_max(&self, state: &str) -> f64 {
        let row = self.row(state);
        if row.is_empty() {
            return 0.0;
        }
        row.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn argmax(values: impl Iterator<Item = (usize, f64)>) -> Option<usize> {
        values
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .map(|(index, _)| index)
    }

    /// Move to `state`, learning from the transition out of the previous
    /// state if a reward is supplied.
    pub fn observe(&mut self, state: &str, reward: Option<f64>) {
        self.ensure_row(state);
        if let (Some((prev_state, prev_action)), Some(reward)) = (self.previous.clone(), reward) {
            let next_max = self.row_max(state);
            if let Some(row) = self.q_values.get_mut(&prev_state) {
                let q = &mut row[prev_action];
                *q += self.alpha * (reward + self.gamma * next_max - *q);
            }
        }
        self.state = state.to_owned();
    }

    /// ε-greedy action selection in the current state.
    pub fn act(&mut self, rng: &mut ChaCha12Rng) -> usize {
        let action = if rng.random::<f64>() < self.epsilon {
            rng.random_range(0..self.n_actions)
        } else {
            Self::argmax(self.row(&self.state).iter().copied().enumerate()).unwrap_or(0)
        };
        self.previous = Some((self.state.clone(), action));
        action
    }

    /// Score an inadmissible choice down without leaving the current state.
    pub fn penalize(&mut self, action: usize, score: f64) {
        self.ensure_row(&self.state.clone());
        let alpha = self.alpha;
        if let Some(row) = self.q_values.get_mut(&self.state) {
            let q = &mut row[action];
            *q += alpha * (score - *q);
        }
    }

    /// Best action among `executable` by current Q-value; becomes the action
    /// learned from on the next observation.
    pub fn best_among(&mut self, executable: &[usize]) -> usize {
        let row = self.row(&self.state);
        let best = Self::argmax(
            executable
                .iter()
                .map(|&a| (a, row.get(a).copied().unwrap_or(0.0))),
        )
        .unwrap_or(0);
        self.previous = Some((self.state.clone(), best));
        best
    }

    /// Close out an episode: the next observation starts a fresh trajectory.
    pub fn end_episode(&mut self) {
        self.previous = None;
        self.state.clear();
        self.generation += 1;
    }

    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let data = QTableData {
            generation: self.generation,
            q_values: self.q_values.clone(),
        };
        let contents =
            serde_json::to_string_pretty(&data).context("failed to serialize q-table")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }

    /// Replace this agent's table with one saved by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let data: QTableData =
            serde_json::from_str(&contents).context("failed to deserialize q-table")?;
        self.generation = data.generation;
        self.q_values = data.q_values;
        self.previous = None;
        self.state.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use rand::SeedableRng;

    fn agent() -> QLearningAgent {
        QLearningAgent::new(&test_config().qlearning, 4)
    }

    #[test]
    fn observe_moves_q_toward_the_target() {
        let mut agent = agent();
        agent.observe("calm", None);
        agent.previous = Some(("calm".to_owned(), 2));

        agent.ensure_row("surge");
        if let Some(row) = agent.q_values.get_mut("surge") {
            row.copy_from_slice(&[0.0, 3.0, 1.0, 0.0]);
        }

        agent.observe("surge", Some(1.0));
        let target = 1.0 + agent.gamma * 3.0;
        let q = agent.q_values["calm"][2];
        assert!(q > 0.0);
        assert!(q < target);
        assert!((q - agent.alpha * target).abs() < 1e-9);
    }

    #[test]
    fn greedy_act_picks_the_best_action() {
        let mut agent = agent();
        agent.epsilon = 0.0;
        agent.observe("calm", None);
        if let Some(row) = agent.q_values.get_mut("calm") {
            row.copy_from_slice(&[0.5, 2.0, -1.0, 0.0]);
        }

        let mut rng = ChaCha12Rng::seed_from_u64(50);
        assert_eq!(agent.act(&mut rng), 1);
        assert_eq!(agent.previous, Some(("calm".to_owned(), 1)));
    }

    #[test]
    fn penalize_pushes_the_value_down() {
        let mut agent = agent();
        agent.observe("calm", None);
        agent.penalize(3, -100.0);
        assert!(agent.q_values["calm"][3] < 0.0);
    }

    #[test]
    fn fallback_respects_the_executable_set() {
        let mut agent = agent();
        agent.observe("calm", None);
        if let Some(row) = agent.q_values.get_mut("calm") {
            row.copy_from_slice(&[0.0, 9.0, 1.0, 0.5]);
        }
        // The best overall action is not admissible.
        assert_eq!(agent.best_among(&[0, 2, 3]), 2);
    }

    #[test]
    fn table_round_trips_through_json() {
        let mut agent = agent();
        agent.observe("calm", None);
        agent.previous = Some(("calm".to_owned(), 0));
        agent.observe("surge", Some(2.5));
        agent.end_episode();

        let file = std::env::temp_dir().join("contagio-qtable-test.json");
        agent.save(&file).expect("save");

        let mut restored = QLearningAgent::new(&test_config().qlearning, 4);
        restored.load(&file).expect("load");
        assert_eq!(restored.generation, agent.generation);
        assert_eq!(restored.q_values, agent.q_values);
        std::fs::remove_file(&file).ok();
    }
}
