use super::{MagnitudeSpectrum, TemplateData};
use crate::audio::RingBuffer;
use crate::error::{EngineError, EngineResult};

/// Bounded time × bin history of gated spectra, newest row last.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    rows: RingBuffer<Vec<f32>>,
    bins: usize,
}

impl Spectrogram {
    pub fn new(history: usize, bins: usize) -> Self {
        Self {
            rows: RingBuffer::new(history),
            bins,
        }
    }

    /// Append one row. Rows of a different width reset the history first,
    /// since tiles must be rectangular.
    pub fn push(&mut self, spectrum: &MagnitudeSpectrum) {
        if spectrum.len() != self.bins {
            self.rows.clear();
            self.bins = spectrum.len();
        }
        self.rows.push(spectrum.to_vec());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn history(&self) -> usize {
        self.rows.capacity()
    }

    /// The most recent `rows` rows restricted to the first `cols` bins,
    /// row-major with the oldest row first. `None` when history is too short
    /// or the requested width exceeds the bin count.
    pub fn tile(&self, rows: usize, cols: usize) -> Option<Vec<f32>> {
        if rows == 0 || cols == 0 || rows > self.rows.len() || cols > self.bins {
            return None;
        }
        let skip = self.rows.len() - rows;
        let mut data = Vec::with_capacity(rows * cols);
        for row in self.rows.iter().skip(skip) {
            data.extend_from_slice(&row[..cols]);
        }
        Some(data)
    }

    /// Capture the current tile as 2-D template data.
    pub fn capture_tile(&self, rows: usize, cols: usize) -> EngineResult<TemplateData> {
        let data = self.tile(rows, cols).ok_or(EngineError::ShapeMismatch {
            expected: rows * cols,
            found: self.rows.len() * self.bins,
        })?;
        Ok(TemplateData::Tile { rows, cols, data })
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
