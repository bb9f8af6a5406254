//! Epidemiological data types shared across the simulation.

use serde::{Deserialize, Serialize};

/// Epidemiological status of an agent.
///
/// Transitions only move along `Susceptible → Exposed → Infected →
/// {Recovered, Dead}`; `Recovered` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Susceptible,
    Exposed,
    Infected,
    Recovered,
    Dead,
}

impl Status {
    /// All statuses, in transition order. Used for counting and reporting.
    pub const ALL: [Status; 5] = [
        Status::Susceptible,
        Status::Exposed,
        Status::Infected,
        Status::Recovered,
        Status::Dead,
    ];

    /// Whether this status can pass the infection on to a neighbor.
    pub fn is_infectious(self) -> bool {
        matches!(self, Status::Exposed | Status::Infected)
    }
}

/// Immutable infection parameter bundle.
///
/// Built once from the configuration and shared by all agents; no field is
/// mutated after construction (mask distribution scales a per-agent factor
/// instead of touching the model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfectionModel {
    /// Per-contact daily infection probability.
    pub infection_prob: f64,
    /// Mean incubation period in days.
    pub incubation_period: u32,
    /// Half-width of the uniform incubation draw (0 gives a fixed period).
    pub incubation_range: u32,
    /// Daily recovery probability outside the hospital.
    pub recovery_prob: f64,
    /// Daily recovery probability while hospitalized.
    pub recovery_prob_in_hospital: f64,
    /// Probability of developing subjective symptoms on becoming infected.
    pub subjective_symptoms_prob: f64,
    /// Largest possible daily physical damage while infected.
    pub max_damage: f64,
    /// Smallest possible daily physical damage while infected.
    pub min_damage: f64,
    /// Fraction of the population at which the outbreak is recognized.
    pub recognition_thresh: f64,
}
