use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A synthetic counterpart shown to a user when no real partner appears
/// in time. The media asset is a pre-recorded clip the client plays in
/// place of a live remote stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticProfile {
    pub id: String,
    pub name: String,
    pub country: String,
    pub video_src: String,
}

fn profile(id: &str, name: &str, country: &str) -> SyntheticProfile {
    SyntheticProfile {
        id: id.to_string(),
        name: name.to_string(),
        country: country.to_string(),
        video_src: format!("/videos/{id}.mp4"),
    }
}

fn default_catalog() -> Vec<SyntheticProfile> {
    vec![
        profile("fake1", "Emma Wilson", "USA"),
        profile("fake2", "David Chen", "Canada"),
        profile("fake3", "Sophia Lopez", "Spain"),
        profile("fake4", "James Brown", "UK"),
        profile("fake5", "Mia Johnson", "Australia"),
        profile("fake6", "Alex Kim", "South Korea"),
        profile("fake7", "Olivia Davis", "France"),
        profile("fake8", "Mohammed Al-Farsi", "UAE"),
    ]
}

/// Catalog of synthetic counterparts with consume-once semantics per
/// usage epoch: an identity is not handed out again until the whole
/// catalog has been consumed, at which point the used-set resets.
#[derive(Debug)]
pub struct SyntheticRoster {
    catalog: Vec<SyntheticProfile>,
    used: HashSet<String>,
}

impl Default for SyntheticRoster {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl SyntheticRoster {
    pub fn new(catalog: Vec<SyntheticProfile>) -> Self {
        Self {
            catalog,
            used: HashSet::new(),
        }
    }

    /// Pick a counterpart not yet used this epoch; wraps around when the
    /// catalog is exhausted so a pick always succeeds for a non-empty
    /// catalog.
    pub fn pick<R: Rng>(&mut self, rng: &mut R) -> Option<SyntheticProfile> {
        if self.catalog.is_empty() {
            return None;
        }

        let available: Vec<&SyntheticProfile> = self
            .catalog
            .iter()
            .filter(|p| !self.used.contains(&p.id))
            .collect();

        if available.is_empty() {
            self.used.clear();
            return self.catalog.choose(rng).cloned();
        }

        let chosen = (*available.choose(rng)?).clone();
        self.used.insert(chosen.id.clone());
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn no_repeat_within_an_epoch() {
        let mut roster = SyntheticRoster::default();
        let mut rng = thread_rng();
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let picked = roster.pick(&mut rng).expect("catalog not empty");
            assert!(seen.insert(picked.id), "identity repeated within epoch");
        }
    }

    #[test]
    fn exhaustion_resets_the_epoch() {
        let mut roster = SyntheticRoster::default();
        let mut rng = thread_rng();
        for _ in 0..8 {
            roster.pick(&mut rng).unwrap();
        }
        // Ninth pick wraps around instead of failing.
        assert!(roster.pick(&mut rng).is_some());
        // And the epoch restarted, so further picks keep succeeding.
        for _ in 0..16 {
            assert!(roster.pick(&mut rng).is_some());
        }
    }

    #[test]
    fn empty_catalog_yields_none() {
        let mut roster = SyntheticRoster::new(Vec::new());
        assert!(roster.pick(&mut thread_rng()).is_none());
    }
}
