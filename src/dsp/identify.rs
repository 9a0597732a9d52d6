use super::{l2_norm, MagnitudeSpectrum, Spectrogram};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Minimum score for a positive identification.
pub const DEFAULT_IDENTIFICATION_THRESHOLD: f32 = 0.85;

const NORM_EPSILON: f32 = 1e-9;

/// Stored template payload, tagged by dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TemplateData {
    /// Magnitude vector, one value per bin.
    #[serde(rename = "1d")]
    Spectrum { bins: Vec<f32> },
    /// Time × frequency tile, row-major, oldest row first.
    #[serde(rename = "2d")]
    Tile {
        rows: usize,
        cols: usize,
        data: Vec<f32>,
    },
}

impl TemplateData {
    /// Build a tile from row vectors; every row must share a width.
    pub fn tile_from_rows(rows: &[Vec<f32>]) -> EngineResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(EngineError::ShapeMismatch {
                    expected: cols,
                    found: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(TemplateData::Tile {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn dimensions(&self) -> u8 {
        match self {
            TemplateData::Spectrum { .. } => 1,
            TemplateData::Tile { .. } => 2,
        }
    }
}

/// Named reference pattern. 1-D templates are stored at unit L2 norm.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTemplate {
    name: String,
    data: TemplateData,
}

impl SignalTemplate {
    pub fn new(name: impl Into<String>, data: TemplateData) -> EngineResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::InvalidTemplate(
                "template name must not be empty".to_string(),
            ));
        }
        let data = match data {
            TemplateData::Spectrum { bins } => {
                let norm = l2_norm(&bins);
                if bins.is_empty() || !norm.is_finite() || norm <= NORM_EPSILON {
                    return Err(EngineError::InvalidTemplate(format!(
                        "template '{name}' has no energy"
                    )));
                }
                TemplateData::Spectrum {
                    bins: bins.into_iter().map(|v| v / norm).collect(),
                }
            }
            TemplateData::Tile { rows, cols, data } => {
                if rows == 0 || cols == 0 || rows * cols != data.len() {
                    return Err(EngineError::InvalidTemplate(format!(
                        "template '{name}' declares {rows}x{cols} but holds {} values",
                        data.len()
                    )));
                }
                if l2_norm(&data) <= NORM_EPSILON {
                    return Err(EngineError::InvalidTemplate(format!(
                        "template '{name}' has no energy"
                    )));
                }
                TemplateData::Tile { rows, cols, data }
            }
        };
        Ok(Self { name, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &TemplateData {
        &self.data
    }
}

/// Insertion-ordered templates with unique names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSet {
    templates: Vec<SignalTemplate>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `template`, replacing (in place) any existing one with the same name.
    pub fn insert(&mut self, template: SignalTemplate) {
        match self
            .templates
            .iter_mut()
            .find(|existing| existing.name == template.name)
        {
            Some(slot) => *slot = template,
            None => self.templates.push(template),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.templates.len();
        self.templates.retain(|template| template.name != name);
        before != self.templates.len()
    }

    pub fn get(&self, name: &str) -> Option<&SignalTemplate> {
        self.templates.iter().find(|template| template.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalTemplate> {
        self.templates.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl FromIterator<SignalTemplate> for TemplateSet {
    fn from_iter<I: IntoIterator<Item = SignalTemplate>>(iter: I) -> Self {
        let mut set = TemplateSet::new();
        for template in iter {
            set.insert(template);
        }
        set
    }
}

/// Result of one identification pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifyOutcome {
    /// Highest-scoring template, matched or not.
    pub best_name: Option<String>,
    pub best_score: f32,
    /// `best_score` cleared the identification threshold.
    pub matched: bool,
    /// Templates that could not be aligned with the live data.
    pub skipped: Vec<String>,
}

impl IdentifyOutcome {
    /// Name of the positive match, if any.
    pub fn match_name(&self) -> Option<&str> {
        if self.matched {
            self.best_name.as_deref()
        } else {
            None
        }
    }
}

/// Linear scan of the template set using cosine similarity for spectra and
/// normalized cross-correlation for tiles.
#[derive(Debug, Clone, Copy)]
pub struct SignalIdentifier {
    threshold: f32,
}

impl Default for SignalIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFICATION_THRESHOLD)
    }
}

impl SignalIdentifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn identify(
        &self,
        live: &MagnitudeSpectrum,
        spectrogram: &Spectrogram,
        templates: &TemplateSet,
    ) -> IdentifyOutcome {
        let mut outcome = IdentifyOutcome::default();
        let mut best: Option<(&str, f32)> = None;
        let live_norm = l2_norm(live);

        for template in templates.iter() {
            let score = match &template.data {
                TemplateData::Spectrum { bins } => {
                    if bins.len() != live.len() {
                        outcome.skipped.push(template.name.clone());
                        continue;
                    }
                    if live_norm <= NORM_EPSILON {
                        continue;
                    }
                    cosine_similarity(live, live_norm, bins)
                }
                TemplateData::Tile { rows, cols, data } => {
                    let Some(tile) = spectrogram.tile(*rows, *cols) else {
                        outcome.skipped.push(template.name.clone());
                        continue;
                    };
                    match normalized_cross_correlation(&tile, data) {
                        Some(score) => score,
                        None => continue,
                    }
                }
            };
            trace!(template = %template.name, score, "template scored");
            // Strict comparison keeps the first template on ties.
            if best.map_or(true, |(_, current)| score > current) {
                best = Some((&template.name, score));
            }
        }

        if let Some((name, score)) = best {
            outcome.best_name = Some(name.to_string());
            outcome.best_score = score;
            outcome.matched = score > self.threshold;
        }
        outcome
    }
}

/// Dot product of `live / live_norm` with an already unit-length template.
pub(crate) fn cosine_similarity(live: &[f32], live_norm: f32, unit_template: &[f32]) -> f32 {
    live.iter()
        .zip(unit_template.iter())
        .map(|(&a, &b)| (a / live_norm) * b)
        .sum()
}

pub(crate) fn normalized_cross_correlation(live: &[f32], template: &[f32]) -> Option<f32> {
    if live.len() != template.len() {
        return None;
    }
    let live_norm = l2_norm(live);
    let template_norm = l2_norm(template);
    if live_norm <= NORM_EPSILON || template_norm <= NORM_EPSILON {
        return None;
    }
    let dot: f32 = live.iter().zip(template.iter()).map(|(a, b)| a * b).sum();
    Some(dot / (live_norm * template_norm))
}
