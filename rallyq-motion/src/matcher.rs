use std::collections::BTreeMap;

use crate::similarity::{compare_profiles, AngleProfile, Category};
use crate::template::Template;
use rallyq_common::PoseFrame;

/// Best template of a region for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub template: String,
    pub similarity: f32,
}

/// Winning template per region, regions without a match are absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResults(BTreeMap<Category, Match>);

impl MatchResults {
    pub fn get(&self, category: Category) -> Option<&Match> {
        self.0.get(&category)
    }

    pub fn any(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &Match)> {
        self.0.iter()
    }
}

#[derive(Debug)]
struct Entry {
    name: String,
    category: Category,
    frames: Vec<AngleProfile>,
}

/// Scores each pose against all templates and counts matches.
/// A template is counted once per streak of consecutive winning frames.
#[derive(Debug)]
pub struct TemplateMatcher {
    threshold: f32,
    entries: Vec<Entry>,
    counts: BTreeMap<Category, BTreeMap<String, u32>>,
    /// Winners of the previous frame
    last: BTreeMap<Category, String>,
}

impl TemplateMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            entries: vec![],
            counts: Category::ALL.iter().map(|c| (*c, BTreeMap::new())).collect(),
            last: BTreeMap::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Replace the compared templates, counts of surviving templates are kept
    pub fn set_templates(&mut self, templates: &[Template]) {
        self.entries = templates
            .iter()
            .map(|t| Entry {
                name: t.name.clone(),
                category: t.category,
                frames: t
                    .frames
                    .iter()
                    .filter_map(|f| AngleProfile::new(f, t.category))
                    .collect(),
            })
            .collect();

        for (category, counts) in self.counts.iter_mut() {
            let names: Vec<&str> = self
                .entries
                .iter()
                .filter(|e| e.category == *category)
                .map(|e| e.name.as_str())
                .collect();
            counts.retain(|name, _| names.contains(&name.as_str()));
            for name in names {
                counts.entry(name.to_string()).or_insert(0);
            }
        }
        self.last.clear();
        tracing::debug!("matching against {} templates", self.entries.len());
    }

    pub fn reset_counts(&mut self) {
        self.counts
            .values_mut()
            .flat_map(|counts| counts.values_mut())
            .for_each(|count| *count = 0);
        self.last.clear();
    }

    /// Score a pose and update the counters
    pub fn process(&mut self, pose: &PoseFrame) -> MatchResults {
        let mut results = BTreeMap::new();

        for category in Category::ALL {
            let best = AngleProfile::new(pose, category).and_then(|current| {
                let mut best: Option<Match> = None;
                for entry in self.entries.iter().filter(|e| e.category == category) {
                    let similarity = compare_profiles(&current, &entry.frames, self.threshold);
                    if similarity > best.as_ref().map_or(0.0, |b| b.similarity) {
                        best = Some(Match {
                            template: entry.name.clone(),
                            similarity,
                        });
                    }
                }
                best
            });

            match best {
                Some(best) => {
                    if self.last.get(&category) != Some(&best.template) {
                        *self
                            .counts
                            .entry(category)
                            .or_default()
                            .entry(best.template.clone())
                            .or_insert(0) += 1;
                        tracing::debug!(template = %best.template, %category, "new match");
                    }
                    self.last.insert(category, best.template.clone());
                    results.insert(category, best);
                }
                None => {
                    self.last.remove(&category);
                }
            }
        }

        MatchResults(results)
    }

    /// Match count of every template of a region
    pub fn counts(&self, category: Category) -> &BTreeMap<String, u32> {
        &self.counts[&category]
    }

    /// Sum of the counts of a region
    pub fn total(&self, category: Category) -> u32 {
        self.counts[&category].values().sum()
    }
}
