use crate::world::World;
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// One region-day of simulation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub episode: usize,
    pub day: usize,
    pub region: String,
    pub susceptible: usize,
    pub exposed: usize,
    pub infected: usize,
    pub recovered: usize,
    pub dead: usize,
    pub living: usize,
    pub total: usize,
    pub patients: usize,
    pub outflow: usize,
    pub average_mental_strength: f64,
    pub average_income: f64,
    pub finance: f64,
    pub tax_revenue: f64,
}

impl DailyRecord {
    /// Snapshot one region of the world.
    pub fn collect(world: &World, episode: usize, day: usize, region: usize) -> Self {
        use crate::model::Status;
        let env = &world.environments()[region];
        let total = world.count_agents(region, None);
        let dead = world.count_agents(region, Some(Status::Dead));
        Self {
            episode,
            day,
            region: env.name().to_owned(),
            susceptible: world.count_agents(region, Some(Status::Susceptible)),
            exposed: world.count_agents(region, Some(Status::Exposed)),
            infected: world.count_agents(region, Some(Status::Infected)),
            recovered: world.count_agents(region, Some(Status::Recovered)),
            dead,
            living: total - dead,
            total,
            patients: env.hospital().count_patients(),
            outflow: env.outflow(),
            average_mental_strength: world.get_average_mental_strength(region),
            average_income: world.get_average_income(region),
            finance: world.get_finance(region),
            tax_revenue: world.get_tax_revenue(region),
        }
    }
}

/// Per-episode summary of the learned policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeScore {
    pub episode: usize,
    pub generation: u64,
    pub average_reward: f64,
}

/// Streams [`DailyRecord`] frames to a binary trajectory file.
pub struct Recorder {
    writer: BufWriter<File>,
}

impl Recorder {
    pub fn create<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, record: &DailyRecord) -> Result<()> {
        encode::write(&mut self.writer, record).context("failed to serialize record")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

/// Read every frame of a trajectory file.
pub fn read_trajectory<P: AsRef<Path>>(file: P) -> Result<Vec<DailyRecord>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);

    let mut records = Vec::new();
    loop {
        match decode::from_read::<_, DailyRecord>(&mut reader) {
            Ok(record) => records.push(record),
            Err(decode::Error::InvalidMarkerRead(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e).context("failed to read record"),
        }
    }
    Ok(records)
}

/// Save the per-episode policy scores as JSON.
pub fn save_scores<P: AsRef<Path>>(file: P, scores: &[EpisodeScore]) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, scores).context("failed to serialize scores")?;
    Ok(())
}
