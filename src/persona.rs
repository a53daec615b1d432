//! Seed personas and the variants derived from them.

use std::{collections::BTreeSet, fs, path::Path};

use rand::{seq::IndexedRandom, Rng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Segment filter that keeps every seed group.
pub const ALL_SEGMENTS: &str = "All Segments";

/// Number of variants asked for feedback in one sprint.
pub const VARIANTS_PER_SPRINT: usize = 50;

const MIN_AGE: u32 = 18;
const AGE_JITTER: u32 = 5;
const INCOME_RANGE: std::ops::RangeInclusive<f64> = 0.7..=1.3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no seed personas available for segment `{0}`")]
    NoPersonasForSegment(String),
    #[error("cannot read persona file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid persona file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// A curated profile as stored in the seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedProfile {
    pub name: String,
    pub age: u32,
    pub occupation: String,
    pub location: String,
    pub income: u64,
}

/// One segment of the seed store with up to two base personas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaGroup {
    pub segment: String,
    #[serde(default)]
    pub male: Option<SeedProfile>,
    #[serde(default)]
    pub female: Option<SeedProfile>,
}

impl PersonaGroup {
    fn members(&self) -> impl Iterator<Item = Persona> + '_ {
        [(Gender::Male, &self.male), (Gender::Female, &self.female)]
            .into_iter()
            .filter_map(move |(gender, profile)| {
                profile
                    .as_ref()
                    .map(|profile| Persona::from_seed(profile, &self.segment, gender))
            })
    }
}

#[derive(Deserialize)]
struct PersonaFile {
    personas: Vec<PersonaGroup>,
}

/// A simulated respondent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub name: String,
    pub age: u32,
    pub occupation: String,
    pub location: String,
    pub income: u64,
    pub segment: String,
    pub gender: Gender,
}

impl Persona {
    fn from_seed(seed: &SeedProfile, segment: &str, gender: Gender) -> Self {
        Self {
            name: seed.name.clone(),
            age: seed.age,
            occupation: seed.occupation.clone(),
            location: seed.location.clone(),
            income: seed.income,
            segment: segment.to_string(),
            gender,
        }
    }
}

/// Reads the seed store: a JSON object whose `personas` key holds the groups.
pub fn load_personas(path: &Path) -> Result<Vec<PersonaGroup>, Error> {
    let raw = fs::read_to_string(path)?;
    let file: PersonaFile = serde_json::from_str(&raw)?;
    debug!("Loaded {} persona groups from {}", file.personas.len(), path.display());
    Ok(file.personas)
}

/// Distinct segments in sorted order, followed by [`ALL_SEGMENTS`].
pub fn segment_options(groups: &[PersonaGroup]) -> Vec<String> {
    let segments: BTreeSet<&str> = groups.iter().map(|g| g.segment.as_str()).collect();
    segments
        .into_iter()
        .map(str::to_string)
        .chain(std::iter::once(ALL_SEGMENTS.to_string()))
        .collect()
}

/// Derives the `index`-th variant of `seed` with jittered age and income.
pub fn mutate<R: Rng + ?Sized>(seed: &Persona, index: usize, rng: &mut R) -> Persona {
    let first = seed.name.split_whitespace().next().unwrap_or_default();
    let low = seed.age.saturating_sub(AGE_JITTER).max(MIN_AGE);
    let high = (seed.age + AGE_JITTER).max(low);
    // Truncation toward zero, matching an integer cast of the scaled income.
    let income = (seed.income as f64 * rng.random_range(INCOME_RANGE)) as u64;

    Persona {
        name: format!("{first} Variant {}", index + 1),
        age: rng.random_range(low..=high),
        income,
        ..seed.clone()
    }
}

/// Picks random base personas of `segment` and mutates them until
/// `target_count` variants exist.
pub fn select_variants<R: Rng + ?Sized>(
    segment: &str,
    groups: &[PersonaGroup],
    target_count: usize,
    rng: &mut R,
) -> Result<Vec<Persona>, Error> {
    let base: Vec<Persona> = groups
        .iter()
        .filter(|g| segment == ALL_SEGMENTS || g.segment == segment)
        .flat_map(|g| g.members())
        .collect();
    if base.is_empty() {
        return Err(Error::NoPersonasForSegment(segment.to_string()));
    }
    debug!("Segment `{segment}` has {} base personas", base.len());

    let mut variants = Vec::with_capacity(target_count);
    for index in 0..target_count {
        let seed = base
            .choose(rng)
            .ok_or_else(|| Error::NoPersonasForSegment(segment.to_string()))?;
        variants.push(mutate(seed, index, rng));
    }
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rand::{rngs::StdRng, SeedableRng};
    use tempfile::NamedTempFile;

    use super::*;

    fn profile(name: &str, age: u32, income: u64) -> SeedProfile {
        SeedProfile {
            name: name.to_string(),
            age,
            occupation: "Teacher".to_string(),
            location: "Brisbane".to_string(),
            income,
        }
    }

    fn groups() -> Vec<PersonaGroup> {
        vec![
            PersonaGroup {
                segment: "Young Accumulators".to_string(),
                male: Some(profile("Liam Nguyen", 19, 52_000)),
                female: Some(profile("Chloe Smith", 27, 61_000)),
            },
            PersonaGroup {
                segment: "Retirees".to_string(),
                male: None,
                female: Some(profile("Margaret Jones", 68, 38_000)),
            },
        ]
    }

    #[test]
    fn mutate_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let seed = Persona::from_seed(&profile("Liam Nguyen", 19, 52_000), "Y", Gender::Male);
        for index in 0..500 {
            let variant = mutate(&seed, index, &mut rng);
            assert!((18..=24).contains(&variant.age), "age {}", variant.age);
            assert!((36_399..=67_600).contains(&variant.income));
            assert_eq!(variant.name, format!("Liam Variant {}", index + 1));
            assert_eq!(variant.occupation, seed.occupation);
            assert_eq!(variant.location, seed.location);
            assert_eq!(variant.segment, seed.segment);
            assert_eq!(variant.gender, seed.gender);
        }
    }

    #[test]
    fn mutate_keeps_age_floor_for_young_seeds() {
        let mut rng = StdRng::seed_from_u64(1);
        let seed = Persona::from_seed(&profile("Ava", 16, 10_000), "Y", Gender::Female);
        for index in 0..200 {
            let variant = mutate(&seed, index, &mut rng);
            assert!((18..=21).contains(&variant.age));
        }
    }

    #[test]
    fn select_variants_filters_by_segment() {
        let mut rng = StdRng::seed_from_u64(3);
        let variants = select_variants("Retirees", &groups(), 50, &mut rng).unwrap();
        assert_eq!(variants.len(), 50);
        assert!(variants.iter().all(|p| p.segment == "Retirees"));
        assert!(variants.iter().all(|p| p.name.starts_with("Margaret Variant ")));
        assert_eq!(variants[49].name, "Margaret Variant 50");
    }

    #[test]
    fn select_variants_all_segments_draws_from_every_group() {
        let mut rng = StdRng::seed_from_u64(11);
        let variants = select_variants(ALL_SEGMENTS, &groups(), 50, &mut rng).unwrap();
        assert_eq!(variants.len(), 50);
        let segments: BTreeSet<_> = variants.iter().map(|p| p.segment.as_str()).collect();
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn select_variants_rejects_empty_pool() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = select_variants("Crypto Enthusiasts", &groups(), 50, &mut rng).unwrap_err();
        assert!(matches!(err, Error::NoPersonasForSegment(ref s) if s == "Crypto Enthusiasts"));

        let empty = vec![PersonaGroup {
            segment: "Empty".to_string(),
            male: None,
            female: None,
        }];
        assert!(select_variants("Empty", &empty, 50, &mut rng).is_err());
    }

    #[test]
    fn segment_options_are_sorted_with_all_last() {
        let mut groups = groups();
        groups.push(groups[0].clone());
        assert_eq!(
            segment_options(&groups),
            vec!["Retirees", "Young Accumulators", ALL_SEGMENTS]
        );
    }

    #[test]
    fn loads_seed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"personas": [{{"segment": "Retirees",
                "female": {{"name": "Margaret Jones", "age": 68, "occupation": "Retired nurse",
                            "location": "Hobart", "income": 38000}}}}]}}"#
        )
        .unwrap();
        let groups = load_personas(file.path()).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].male.is_none());
        assert_eq!(groups[0].female.as_ref().unwrap().location, "Hobart");
    }

    #[test]
    fn rejects_malformed_seed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"groups": []}}"#).unwrap();
        assert!(matches!(load_personas(file.path()), Err(Error::Json(_))));
    }
}
