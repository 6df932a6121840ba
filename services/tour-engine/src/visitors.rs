//! Visitor group profiles and their seeded generator.

use std::collections::BTreeSet;

use galerie_id::GroupId;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, IteratorRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;

/// How urgently a group needs a guide.
///
/// Declared most-urgent first, so `Ord` sorts the queue head first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Emergency,
    Priority,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeRange {
    Children,
    Students,
    Adults,
    Seniors,
    Mixed,
}

/// What a group tells the coordinator about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProfile {
    pub group_id: GroupId,
    pub size: u32,
    pub nationality: String,
    pub language: String,
    pub interests: BTreeSet<String>,
    pub age_range: AgeRange,
    pub is_vip: bool,
    pub urgency: Urgency,
}

impl GroupProfile {
    /// A plain adult group with no flags.
    pub fn new(size: u32, nationality: impl Into<String>) -> Self {
        let nationality = nationality.into();
        Self {
            group_id: GroupId::new(),
            size,
            language: language_for(&nationality).to_string(),
            nationality,
            interests: BTreeSet::new(),
            age_range: AgeRange::Adults,
            is_vip: false,
            urgency: Urgency::Normal,
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn vip(mut self) -> Self {
        self.is_vip = true;
        self
    }

    /// Queue class this group is entitled to. VIPs ride the priority lane.
    pub fn effective_urgency(&self) -> Urgency {
        match self.urgency {
            Urgency::Normal if self.is_vip => Urgency::Priority,
            other => other,
        }
    }
}

/// Tour language for a nationality; English when there is no mapping.
pub fn language_for(nationality: &str) -> &'static str {
    match nationality {
        "French" | "Belgian" | "Swiss" | "Canadian" => "French",
        "German" | "Austrian" => "German",
        "Spanish" | "Mexican" | "Argentinian" => "Spanish",
        "Italian" => "Italian",
        "Japanese" => "Japanese",
        "Chinese" => "Mandarin",
        "Brazilian" | "Portuguese" => "Portuguese",
        _ => "English",
    }
}

const NATIONALITIES: &[&str] = &[
    "French",
    "German",
    "Spanish",
    "Italian",
    "American",
    "British",
    "Japanese",
    "Chinese",
    "Brazilian",
    "Dutch",
];

const INTERESTS: &[&str] = &[
    "Renaissance",
    "Romantisme",
    "Néoclassicisme",
    "Siècle d'or néerlandais",
    "Caravagisme",
    "portraits",
    "history painting",
];

const GUIDE_NAMES: &[&str] = &[
    "Marie", "Jean", "Camille", "Louis", "Chloé", "Hugo", "Léa", "Arthur", "Inès", "Jules",
];

/// Seeded source of visitor groups and guide names.
pub struct VisitorGenerator {
    rng: StdRng,
    size_min: u32,
    size_max: u32,
    vip_probability: f64,
    priority_probability: f64,
    emergency_probability: f64,
    guides_named: usize,
}

impl VisitorGenerator {
    pub fn new(config: &SimulationConfig, rng: StdRng) -> Self {
        Self {
            rng,
            size_min: config.group_size_min,
            size_max: config.group_size_max,
            vip_probability: config.vip_probability,
            priority_probability: config.priority_probability,
            emergency_probability: config.emergency_probability,
            guides_named: 0,
        }
    }

    pub fn seeded(config: &SimulationConfig, seed: u64) -> Self {
        Self::new(config, StdRng::seed_from_u64(seed))
    }

    /// Next arriving group.
    pub fn next_group(&mut self) -> GroupProfile {
        let size = self.rng.random_range(self.size_min..=self.size_max);
        let nationality = NATIONALITIES
            .choose(&mut self.rng)
            .copied()
            .unwrap_or("British");

        let interest_count = self.rng.random_range(1..=3);
        let interests = INTERESTS
            .iter()
            .choose_multiple(&mut self.rng, interest_count)
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let age_range = match self.rng.random_range(0..5) {
            0 => AgeRange::Children,
            1 => AgeRange::Students,
            2 => AgeRange::Adults,
            3 => AgeRange::Seniors,
            _ => AgeRange::Mixed,
        };

        let urgency = if self.rng.random_bool(self.emergency_probability) {
            Urgency::Emergency
        } else if self.rng.random_bool(self.priority_probability) {
            Urgency::Priority
        } else {
            Urgency::Normal
        };

        let mut profile = GroupProfile::new(size, nationality).with_urgency(urgency);
        profile.interests = interests;
        profile.age_range = age_range;
        profile.is_vip = self.rng.random_bool(self.vip_probability);
        profile
    }

    /// Next guide name; cycles with a numeric suffix once the list runs out.
    pub fn next_guide_name(&mut self) -> String {
        let n = self.guides_named;
        self.guides_named += 1;
        let base = GUIDE_NAMES[n % GUIDE_NAMES.len()];
        match n / GUIDE_NAMES.len() {
            0 => base.to_string(),
            round => format!("{base} {}", round + 1),
        }
    }
}
